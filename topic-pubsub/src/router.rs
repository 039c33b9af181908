use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::{
    protocol::Publication,
    registry::{ClientId, Registry, SubscriberHandle},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber connection is closing")]
    Closed,
    #[error("subscriber outbox is full")]
    Backlogged,
}

/// Outcome of one publish call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans publications out to the subscribers of a topic.
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Queues `publication` for every subscriber of its topic.
    ///
    /// Failures are logged per subscriber and never reach the publisher. The
    /// origin is only recorded; a client subscribed to the topic it publishes
    /// on would receive its own message.
    pub async fn publish(&self, publication: &Publication, origin: ClientId) -> PublishReport {
        let subscribers = self.registry.snapshot(&publication.topic).await;
        let line = publication.delivery_line();
        let mut report = PublishReport::default();

        for subscriber in &subscribers {
            match deliver(subscriber, &line) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        client_id = subscriber.id,
                        peer = %subscriber.peer,
                        topic = %publication.topic,
                        %error,
                        "failed to deliver publication"
                    );
                }
            }
        }

        info!(
            origin,
            topic = %publication.topic,
            delivered = report.delivered,
            failed = report.failed,
            "message sent to {} subscriber(s)",
            report.delivered
        );
        report
    }
}

fn deliver(subscriber: &SubscriberHandle, line: &str) -> Result<(), DeliveryError> {
    subscriber
        .outbox
        .try_send(line.to_string())
        .map_err(|error| match error {
            TrySendError::Full(_) => DeliveryError::Backlogged,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })?;
    debug!(client_id = subscriber.id, "queued publication");
    Ok(())
}
