//! Live set of admitted connections, keyed by client id.
//!
//! Every operation takes the same lock, so a snapshot never observes a
//! half-applied insert or removal. Callers copy what they need out of a
//! snapshot and do network I/O after the lock is released.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::protocol::{Handshake, Role, Topic};

pub type ClientId = u64;

/// Capacity of each connection's outbound queue.
pub const OUTBOX_CAPACITY: usize = 128;

/// Sending side of a connection's outbound queue. The session that owns the
/// socket drains the receiving side.
pub type Outbox = mpsc::Sender<String>;

#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub peer: SocketAddr,
    pub role: Role,
    pub topic: Topic,
    pub outbox: Outbox,
}

impl ClientEntry {
    pub fn new(peer: SocketAddr, handshake: Handshake, outbox: Outbox) -> Self {
        Self {
            peer,
            role: handshake.role,
            topic: handshake.topic,
            outbox,
        }
    }
}

/// A subscriber picked out of the registry for one publish call.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    pub id: ClientId,
    pub peer: SocketAddr,
    pub outbox: Outbox,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),
}

pub struct Registry {
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates a connection identity. Ids are never reused.
    pub fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Admits `entry` and returns the number of registered clients.
    pub async fn register(
        &self,
        id: ClientId,
        entry: ClientEntry,
    ) -> Result<usize, RegistryError> {
        let mut clients = self.clients.lock().await;
        if clients.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        clients.insert(id, entry);
        Ok(clients.len())
    }

    /// Removes the entry for `id`, if any, along with the remaining count.
    /// Removing an absent id is a no-op.
    pub async fn deregister(&self, id: ClientId) -> (Option<ClientEntry>, usize) {
        let mut clients = self.clients.lock().await;
        let removed = clients.remove(&id);
        (removed, clients.len())
    }

    /// Subscribers currently registered on `topic`.
    pub async fn snapshot(&self, topic: &Topic) -> Vec<SubscriberHandle> {
        let clients = self.clients.lock().await;
        clients
            .iter()
            .filter(|(_, entry)| {
                entry.role == Role::Subscriber
                    && entry.topic.as_str().eq_ignore_ascii_case(topic.as_str())
            })
            .map(|(id, entry)| SubscriberHandle {
                id: *id,
                peer: entry.peer,
                outbox: entry.outbox.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().await.contains_key(&id)
    }
}
