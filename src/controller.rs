use crate::actuator::{self, Actuator};
use crate::clock::Clock;
use crate::codec::PublisherId;
use crate::config::AggregationConfig;
use crate::ingest::{IngestHandler, IngestStats};
use crate::store::AggregationStore;
use crate::transport::Transport;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF_INITIAL_SECS: u64 = 1;
const RECONNECT_BACKOFF_MAX_SECS: u64 = 60;

/// What happened during one control cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub now: u64,
    pub received: usize,
    pub expired: alloc::vec::Vec<PublisherId>,
    pub average: Option<f32>,
    /// Level written to the actuator, `None` when it was left untouched.
    pub level: Option<bool>,
    pub transport_up: bool,
}

/// Reconnect schedule for a lost transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    next_attempt_at: u64,
    delay: u64,
}

impl ReconnectBackoff {
    pub fn starting_at(now: u64) -> Self {
        Self {
            next_attempt_at: now,
            delay: RECONNECT_BACKOFF_INITIAL_SECS,
        }
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_attempt_at
    }

    pub fn record_failure(&mut self, now: u64) {
        self.next_attempt_at = now.saturating_add(self.delay);
        self.delay = (self.delay * 2).min(RECONNECT_BACKOFF_MAX_SECS);
    }

    pub fn next_attempt_at(&self) -> u64 {
        self.next_attempt_at
    }
}

/// The control loop: owns the store and drives the actuator from it.
pub struct Aggregator<T: Transport, A: Actuator, C: Clock> {
    store: AggregationStore,
    ingest: IngestHandler,
    transport: T,
    actuator: A,
    clock: C,
    config: AggregationConfig,
    level: Option<bool>,
    reconnect: Option<ReconnectBackoff>,
    cycles: u64,
}

impl<T: Transport, A: Actuator, C: Clock> Aggregator<T, A, C> {
    pub fn new(transport: T, actuator: A, clock: C, config: AggregationConfig) -> Self {
        Self {
            store: AggregationStore::new(),
            ingest: IngestHandler::new(),
            transport,
            actuator,
            clock,
            config,
            level: None,
            reconnect: None,
            cycles: 0,
        }
    }

    /// Run one cycle: poll, expire, average, actuate.
    pub fn cycle(&mut self) -> CycleReport {
        self.cycles = self.cycles.wrapping_add(1);

        let received = self.poll_transport();

        let now = self.clock.now();
        let expired = self
            .store
            .expire(now, self.config.retention_window_secs);
        for id in &expired {
            info!("⌛ {} expired after {}s without a reading", id, self.config.retention_window_secs);
        }

        let average = self.store.average();
        let level = actuator::decide(average, self.config.threshold_celsius);
        if let Some(avg) = average {
            debug!("Average temperature: {:.2}°C over {} publishers", avg, self.store.len());
        }
        if let Some(on) = level {
            if self.level != Some(on) {
                info!(
                    "💡 Fleet average {:.2}°C {} threshold {:.2}°C, indicator {}",
                    average.unwrap_or_default(),
                    if on { "above" } else { "at or below" },
                    self.config.threshold_celsius,
                    if on { "ON" } else { "OFF" }
                );
            }
            self.actuator.set_level(on);
            self.level = Some(on);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            if let Ok(json) = serde_json::to_string(&self.store.summary(now)) {
                debug!("Fleet: {}", json);
            }
        }

        CycleReport {
            now,
            received,
            expired,
            average,
            level,
            transport_up: self.reconnect.is_none(),
        }
    }

    fn poll_transport(&mut self) -> usize {
        let mut now = self.clock.now();

        if let Some(mut backoff) = self.reconnect {
            if !backoff.is_due(now) {
                return 0;
            }
            match self.transport.reconnect() {
                Ok(()) => {
                    info!("Transport restored");
                    self.reconnect = None;
                    // Reconnecting may have taken a while
                    now = self.clock.now();
                }
                Err(e) => {
                    backoff.record_failure(now);
                    warn!(
                        "Reconnect failed: {}; next attempt at t={}s",
                        e,
                        backoff.next_attempt_at()
                    );
                    self.reconnect = Some(backoff);
                    return 0;
                }
            }
        }

        let store = &mut self.store;
        let ingest = &mut self.ingest;
        let mut received = 0;
        let result = self.transport.poll_once(&mut |topic: &[u8], payload: &[u8]| {
            received += 1;
            ingest.handle(store, topic, payload, now);
        });

        if let Err(e) = result {
            warn!("Transport error: {}; reconnecting", e);
            self.reconnect = Some(ReconnectBackoff::starting_at(now));
        }
        received
    }

    /// Run cycles on a fixed interval forever.
    pub async fn run(&mut self) {
        let mut interval = time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "🌡️  Aggregating: window {}s, threshold {:.2}°C",
            self.config.retention_window_secs, self.config.threshold_celsius
        );
        loop {
            interval.tick().await;
            self.cycle();
        }
    }

    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AggregationStore {
        &mut self.store
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn ingest_stats(&self) -> &IngestStats {
        self.ingest.get_stats()
    }

    /// Last level written to the actuator.
    pub fn level(&self) -> Option<bool> {
        self.level
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_transport_up(&self) -> bool {
        self.reconnect.is_none()
    }
}
