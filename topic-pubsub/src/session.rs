//! Per-connection protocol state machine.
//!
//! ```text
//! AwaitingHandshake --invalid--> Rejected
//!        |
//!      valid
//!        v
//!     Active --terminate / EOF / I/O error--> Terminating --> Closed
//!        |                                                      ^
//!   registration refused ----------> Unregistered --------------+
//! ```
//!
//! While `Active`, the session also drains its outbox so the router can hand
//! off deliveries without waiting on this connection's socket.

use std::{io, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{Handshake, HandshakeError, MessageReader, Publication, Role, is_terminate},
    registry::{ClientEntry, ClientId, OUTBOX_CAPACITY},
    router::Router,
};

/// Why an admitted session ended.
#[derive(Debug)]
pub enum Termination {
    /// The client sent the termination keyword.
    Requested,
    /// The peer closed its side without saying goodbye.
    PeerClosed,
    /// Reading or writing the socket failed, e.g. on a reset.
    Failed(io::Error),
}

#[derive(Debug)]
pub enum SessionOutcome {
    Rejected(HandshakeError),
    Closed(Termination),
}

enum State {
    AwaitingHandshake,
    Active(Handshake),
    Terminating(Termination),
    /// Admission failed, so there is no registry entry of ours to remove.
    Unregistered(Termination),
    Rejected(HandshakeError),
}

pub struct Session<S> {
    id: ClientId,
    peer: SocketAddr,
    reader: MessageReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    router: Router,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, id: ClientId, peer: SocketAddr, router: Router) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id,
            peer,
            reader: MessageReader::new(reader),
            writer,
            router,
        }
    }

    /// Drives the connection until it is closed or rejected.
    pub async fn run(mut self) -> SessionOutcome {
        let mut state = State::AwaitingHandshake;
        loop {
            state = match state {
                State::AwaitingHandshake => self.await_handshake().await,
                State::Active(handshake) => self.admit_and_serve(handshake).await,
                State::Terminating(termination) => {
                    self.terminate(&termination).await;
                    return SessionOutcome::Closed(termination);
                }
                State::Unregistered(termination) => {
                    self.close().await;
                    return SessionOutcome::Closed(termination);
                }
                State::Rejected(error) => {
                    warn!(peer = %self.peer, %error, "rejected connection");
                    self.close().await;
                    return SessionOutcome::Rejected(error);
                }
            };
        }
    }

    async fn await_handshake(&mut self) -> State {
        let message = match self.reader.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => return State::Rejected(HandshakeError::ConnectionClosed),
            Err(error) => {
                debug!(peer = %self.peer, ?error, "read failed before handshake");
                return State::Rejected(HandshakeError::ConnectionClosed);
            }
        };

        match Handshake::parse(&message) {
            Ok(handshake) => State::Active(handshake),
            Err(error) => State::Rejected(error),
        }
    }

    async fn admit_and_serve(&mut self, handshake: Handshake) -> State {
        let (outbox, mut inbox) = mpsc::channel(OUTBOX_CAPACITY);
        let role = handshake.role;
        let topic = handshake.topic.clone();
        let entry = ClientEntry::new(self.peer, handshake, outbox);

        match self.router.registry().register(self.id, entry).await {
            Ok(active) => {
                info!(client_id = self.id, peer = %self.peer, %role, %topic, "registered client");
                info!(active, "current active clients");
            }
            Err(error) => {
                // The id belongs to someone else's entry; leave it alone.
                warn!(client_id = self.id, peer = %self.peer, %error, "failed to register client");
                return State::Unregistered(Termination::Failed(io::Error::other(error)));
            }
        }

        loop {
            select! {
                message = self.reader.next_message() => {
                    match message {
                        Ok(Some(message)) => {
                            if let Some(termination) = self.handle_message(role, &message).await {
                                return State::Terminating(termination);
                            }
                        }
                        Ok(None) => return State::Terminating(Termination::PeerClosed),
                        Err(error) => return State::Terminating(Termination::Failed(error)),
                    }
                }
                Some(line) = inbox.recv() => {
                    if let Err(error) = self.writer.write_all(line.as_bytes()).await {
                        return State::Terminating(Termination::Failed(error));
                    }
                    if let Err(error) = self.writer.flush().await {
                        return State::Terminating(Termination::Failed(error));
                    }
                }
            }
        }
    }

    async fn handle_message(&self, role: Role, message: &str) -> Option<Termination> {
        debug!(client_id = self.id, %role, payload = message, "received message");

        if is_terminate(message) {
            return Some(Termination::Requested);
        }

        match role {
            Role::Publisher => match Publication::parse(message) {
                Some(publication) => {
                    info!(
                        client_id = self.id,
                        topic = %publication.topic,
                        content = %publication.content,
                        "publishing"
                    );
                    self.router.publish(&publication, self.id).await;
                }
                None => {
                    warn!(
                        client_id = self.id,
                        payload = message,
                        "malformed publisher payload, not routed"
                    );
                }
            },
            Role::Subscriber => {
                debug!(client_id = self.id, "ignoring subscriber payload");
            }
        }

        None
    }

    async fn terminate(&mut self, termination: &Termination) {
        match termination {
            Termination::Requested => {
                info!(client_id = self.id, peer = %self.peer, "client requested termination");
            }
            Termination::PeerClosed => {
                info!(client_id = self.id, peer = %self.peer, "client disconnected unexpectedly");
            }
            Termination::Failed(error) => {
                warn!(client_id = self.id, peer = %self.peer, ?error, "client connection failed");
            }
        }

        let (removed, active) = self.router.registry().deregister(self.id).await;
        if removed.is_some() {
            info!(client_id = self.id, active, "removed client");
        }
        self.close().await;
    }

    async fn close(&mut self) {
        if let Err(error) = self.writer.shutdown().await {
            debug!(peer = %self.peer, ?error, "failed to shut down connection cleanly");
        }
        debug!(peer = %self.peer, "connection closed");
    }
}
