use super::{Transport, TransportError};
use std::collections::VecDeque;

/// In-process transport backed by a queue.
///
/// Only messages published on a subscribed topic are delivered. A simulated
/// link failure makes polls fail until [`Transport::reconnect`] succeeds.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    subscriptions: Vec<String>,
    pending: VecDeque<(Vec<u8>, Vec<u8>)>,
    connected: bool,
    refuse_reconnects: u32,
    reconnect_attempts: u32,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.pending.push_back((topic.as_bytes().to_vec(), payload.to_vec()));
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop the link. The next `refuse` reconnect attempts fail as well.
    pub fn disconnect(&mut self, refuse: u32) {
        self.connected = false;
        self.refuse_reconnects = refuse;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if !self.subscriptions.iter().any(|t| t == topic) {
            self.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    fn poll_once(
        &mut self,
        on_message: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        let mut delivered = 0;
        while let Some((topic, payload)) = self.pending.pop_front() {
            if self.subscriptions.iter().any(|t| t.as_bytes() == topic.as_slice()) {
                on_message(&topic, &payload);
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        self.reconnect_attempts += 1;
        if self.refuse_reconnects > 0 {
            self.refuse_reconnects -= 1;
            return Err(TransportError::Disconnected);
        }
        self.connected = true;
        Ok(())
    }
}
