//! Message sources for the aggregator.
//!
//! A [`Transport`] hands every pending `(topic, payload)` pair to a handler
//! supplied by the caller. The handler runs synchronously on the polling
//! thread, inside [`Transport::poll_once`].

pub mod memory;
pub mod mqtt;

pub use memory::MemoryTransport;
pub use mqtt::{connect_with_retry, MqttTransport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("MQTT request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("broker rejected subscription (packet id {0})")]
    SubscriptionRejected(u16),
    #[error("invalid transport settings: {0}")]
    InvalidConfig(String),
    #[error("connection closed")]
    Disconnected,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

pub trait Transport {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Deliver every message that is already available, without blocking.
    /// Returns the number of messages handed to `on_message`.
    fn poll_once(
        &mut self,
        on_message: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<usize, TransportError>;

    /// Re-establish the session after a failure, including subscriptions.
    fn reconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
