//! Domain event publication.

use async_trait::async_trait;
use tracing::debug;
use crate::domain::events::DomainEvent;
use crate::{EcommerceError, Result};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// Publishes JSON-encoded events to NATS.
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self { Self { client } }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).map_err(|e| EcommerceError::StorageError(e.to_string()))?;
        self.client
            .publish(event.subject().to_string(), payload.into())
            .await
            .map_err(|e| EcommerceError::StorageError(e.to_string()))?;
        debug!(subject = event.subject(), "event published");
        Ok(())
    }
}

/// Used when no broker is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        debug!(subject = event.subject(), "no event broker configured, dropping event");
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    pub(crate) events: std::sync::Mutex<Vec<DomainEvent>>,
}

#[cfg(test)]
#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
