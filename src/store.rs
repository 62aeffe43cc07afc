use crate::codec::PublisherId;
use serde::Serialize;
use std::collections::HashMap;

// Default retention: readings older than 10 minutes are dropped
pub const RETENTION_WINDOW_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub temperature: f32,
    /// Monotonic seconds at which the reading was ingested.
    pub observed_at: u64,
}

impl Reading {
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.observed_at)
    }

    pub fn is_stale(&self, now: u64, window: u64) -> bool {
        self.age(now) > window
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublisherSummary {
    pub id: PublisherId,
    pub temperature: f32,
    pub age_seconds: u64,
}

/// Serialisable view of the whole store, for logging.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub publishers: alloc::vec::Vec<PublisherSummary>,
    pub average: Option<f32>,
}

/// Latest reading per publisher.
///
/// Entries are only ever replaced whole by [`AggregationStore::upsert`] and
/// removed by [`AggregationStore::expire`]. Callers expire before averaging
/// so that stale readings never contribute.
#[derive(Debug, Default)]
pub struct AggregationStore {
    latest: HashMap<PublisherId, Reading>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, id: PublisherId, temperature: f32, observed_at: u64) {
        self.latest.insert(
            id,
            Reading {
                temperature,
                observed_at,
            },
        );
    }

    /// Remove every entry older than `window` seconds and return their ids.
    /// An entry aged exactly `window` is kept.
    pub fn expire(&mut self, now: u64, window: u64) -> alloc::vec::Vec<PublisherId> {
        let stale: alloc::vec::Vec<PublisherId> = self
            .latest
            .iter()
            .filter(|(_, reading)| reading.is_stale(now, window))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.latest.remove(id);
        }

        stale
    }

    /// Mean of the retained temperatures, `None` when nothing is retained.
    pub fn average(&self) -> Option<f32> {
        if self.latest.is_empty() {
            return None;
        }
        let sum: f64 = self
            .latest
            .values()
            .map(|reading| f64::from(reading.temperature))
            .sum();
        Some((sum / self.latest.len() as f64) as f32)
    }

    pub fn snapshot(&self) -> impl Iterator<Item = (&PublisherId, &Reading)> + '_ {
        self.latest.iter()
    }

    pub fn summary(&self, now: u64) -> FleetSummary {
        let mut publishers: alloc::vec::Vec<PublisherSummary> = self
            .snapshot()
            .map(|(id, reading)| PublisherSummary {
                id: id.clone(),
                temperature: reading.temperature,
                age_seconds: reading.age(now),
            })
            .collect();
        publishers.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

        FleetSummary {
            publishers,
            average: self.average(),
        }
    }

    pub fn get(&self, id: &PublisherId) -> Option<&Reading> {
        self.latest.get(id)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
