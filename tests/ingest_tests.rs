use thermofleet::codec::{encode, DecodeError, Field, PublisherId, TemperatureMessage};
use thermofleet::ingest::{IngestHandler, IngestOutcome};
use thermofleet::store::AggregationStore;

const TOPIC: &[u8] = b"temp/pico";

fn payload(id: &str, temperature: f32) -> Vec<u8> {
    let message = TemperatureMessage::new(PublisherId::new(id).unwrap(), temperature);
    encode(&message).unwrap().to_vec()
}

#[test]
fn test_valid_message_updates_store() {
    let mut store = AggregationStore::new();
    let mut handler = IngestHandler::new();

    let outcome = handler.handle(&mut store, TOPIC, &payload("kitchen", 21.5), 42);

    let id = PublisherId::new("kitchen").unwrap();
    assert_eq!(outcome, IngestOutcome::Accepted(id.clone()));
    let reading = store.get(&id).unwrap();
    assert_eq!(reading.temperature, 21.5);
    assert_eq!(reading.observed_at, 42);
    assert_eq!(handler.get_stats().accepted, 1);
}

#[test]
fn test_sender_time_does_not_affect_age() {
    let mut store = AggregationStore::new();
    let mut handler = IngestHandler::new();
    let message = TemperatureMessage::new(PublisherId::new("A").unwrap(), 20.0).with_sender_time(86_399);

    handler.handle(&mut store, TOPIC, &encode(&message).unwrap(), 7);

    assert_eq!(store.get(&message.id).unwrap().observed_at, 7);
}

#[test]
fn test_malformed_message_leaves_store_untouched() {
    let mut store = AggregationStore::new();
    let mut handler = IngestHandler::new();
    handler.handle(&mut store, TOPIC, &payload("A", 20.0), 0);

    let truncated = payload("A", 99.0);
    let outcome = handler.handle(&mut store, TOPIC, &truncated[..truncated.len() - 1], 5);

    assert_eq!(outcome, IngestOutcome::Rejected(DecodeError::Truncated(Field::Temp)));
    assert!(!outcome.is_accepted());
    assert_eq!(store.len(), 1);
    let reading = store.get(&PublisherId::new("A").unwrap()).unwrap();
    assert_eq!(reading.temperature, 20.0);
    assert_eq!(reading.observed_at, 0);
}

#[test]
fn test_rejections_are_counted() {
    let mut store = AggregationStore::new();
    let mut handler = IngestHandler::new();

    handler.handle(&mut store, TOPIC, b"not protobuf at all", 0);
    handler.handle(&mut store, TOPIC, &[], 0);
    handler.handle(&mut store, TOPIC, &payload("B", 19.0), 0);

    let stats = handler.get_stats();
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.last_error, Some("missing_field"));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_topic_is_informational_only() {
    let mut store = AggregationStore::new();
    let mut handler = IngestHandler::new();

    let outcome = handler.handle(&mut store, b"some/other/topic", &payload("A", 20.0), 0);
    assert!(outcome.is_accepted());
    assert_eq!(store.len(), 1);
}
