//! # Fleet Temperature Aggregator
//!
//! Collects temperature readings published by a small fleet of sensor
//! nodes, keeps the latest reading per publisher for a rolling retention
//! window, and drives a binary indicator from the fleet-wide average.
//!
//! ## Features
//!
//! - **Compact wire format**: protobuf-compatible tag-length-value codec
//! - **Windowed aggregation**: last-value-wins per publisher, stale readings evicted
//! - **Threshold indicator**: ON strictly above the threshold, held when no data
//! - **Fault isolation**: a malformed message is dropped, never fatal
//! - **MQTT transport**: `rumqttc` client with background reconnect and resubscribe
//!
//! ## Quick Start
//!
//! ```rust
//! use thermofleet::actuator::LogActuator;
//! use thermofleet::clock::ManualClock;
//! use thermofleet::codec::{encode, PublisherId, TemperatureMessage};
//! use thermofleet::config::AggregationConfig;
//! use thermofleet::transport::{MemoryTransport, Transport};
//! use thermofleet::Aggregator;
//!
//! let mut transport = MemoryTransport::new();
//! transport.subscribe("temp/pico").unwrap();
//!
//! let message = TemperatureMessage::new(PublisherId::new("kitchen").unwrap(), 26.5);
//! transport.publish("temp/pico", &encode(&message).unwrap());
//!
//! let mut aggregator = Aggregator::new(
//!     transport,
//!     LogActuator::new(),
//!     ManualClock::new(0),
//!     AggregationConfig::default(),
//! );
//!
//! let report = aggregator.cycle();
//! assert_eq!(report.average, Some(26.5));
//! assert_eq!(aggregator.actuator().level(), Some(true));
//! ```
//!
//! ## Architecture
//!
//! - [`codec`] - Wire codec for the temperature message
//! - [`store`] - Per-publisher rolling state, expiry and averaging
//! - [`ingest`] - Decode-and-upsert glue with failure isolation
//! - [`controller`] - The poll / expire / average / actuate loop
//! - [`transport`] - Message sources (in-memory queue, MQTT)
//! - [`actuator`] - Indicator outputs (log, sysfs GPIO)
//! - [`clock`] - Monotonic and manual time sources
//! - [`config`] - Deploy-time TOML configuration

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod actuator;
pub mod clock;
pub mod codec;
pub mod config;
pub mod controller;
pub mod ingest;
pub mod store;
pub mod transport;

// Re-export main public types for convenience
pub use codec::{decode, encode, DecodeError, PublisherId, TemperatureMessage};
pub use controller::{Aggregator, CycleReport};
pub use store::{AggregationStore, Reading};
