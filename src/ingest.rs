use crate::codec::{self, DecodeError, PublisherId};
use crate::store::AggregationStore;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(PublisherId),
    Rejected(DecodeError),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected: u64,
    pub last_error: Option<&'static str>,
}

/// Turns raw transport payloads into store updates.
///
/// A payload that fails to decode is logged and counted; the store is only
/// touched after a successful decode.
#[derive(Debug, Default)]
pub struct IngestHandler {
    stats: IngestStats,
}

impl IngestHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(
        &mut self,
        store: &mut AggregationStore,
        topic: &[u8],
        raw: &[u8],
        now: u64,
    ) -> IngestOutcome {
        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                self.stats.rejected = self.stats.rejected.wrapping_add(1);
                self.stats.last_error = Some(error_kind(&e));
                warn!(
                    "Dropping malformed message on {} ({} bytes): {}",
                    String::from_utf8_lossy(topic),
                    raw.len(),
                    e
                );
                return IngestOutcome::Rejected(e);
            }
        };

        info!("Received -> {}: {:.2}°C", message.id, message.temperature);
        if let Some(sender_time) = message.sender_time {
            debug!("{} reported sender time {}s (not used for ageing)", message.id, sender_time);
        }

        self.stats.accepted = self.stats.accepted.wrapping_add(1);
        store.upsert(message.id.clone(), message.temperature, now);
        IngestOutcome::Accepted(message.id)
    }

    pub fn get_stats(&self) -> &IngestStats {
        &self.stats
    }
}

fn error_kind(error: &DecodeError) -> &'static str {
    match error {
        DecodeError::Truncated(_) => "truncated",
        DecodeError::VarintOverflow(_) => "varint_overflow",
        DecodeError::UnsupportedWireType(_) => "unsupported_wire_type",
        DecodeError::WireTypeMismatch { .. } => "wire_type_mismatch",
        DecodeError::InvalidFieldNumber => "invalid_field_number",
        DecodeError::MissingField(_) => "missing_field",
        DecodeError::InvalidId => "invalid_id",
        DecodeError::InvalidTemperature => "invalid_temperature",
        DecodeError::TimeOutOfRange => "time_out_of_range",
    }
}
