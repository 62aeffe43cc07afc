use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use thermofleet::actuator::LogActuator;
use thermofleet::clock::ManualClock;
use thermofleet::codec::{encode, PublisherId, TemperatureMessage};
use thermofleet::config::{AggregationConfig, TransportConfig};
use thermofleet::transport::{connect_with_retry, Transport, TransportError};
use thermofleet::Aggregator;

const TOPIC: &str = "temp/pico";

fn reading(id: &str, temperature: f32) -> Vec<u8> {
    encode(&TemperatureMessage::new(PublisherId::new(id).unwrap(), temperature))
        .unwrap()
        .to_vec()
}

fn client_config(listener: &TcpListener) -> TransportConfig {
    TransportConfig {
        broker: listener.local_addr().unwrap().to_string(),
        client_id: "test-subscriber".to_string(),
        connect_timeout_ms: 2_000,
        connect_attempts: 1,
        connect_backoff_ms: 50,
        ..TransportConfig::default()
    }
}

/// Read one MQTT packet sent by the client, `None` once it hangs up.
async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut len = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        len |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

/// Skip packets until one of type `kind` arrives and return its body.
async fn expect_packet(stream: &mut TcpStream, kind: u8) -> Vec<u8> {
    loop {
        let (header, body) = read_packet(stream)
            .await
            .expect("client closed the connection early");
        if header >> 4 == kind {
            return body;
        }
    }
}

/// Accept a client and answer its CONNECT with `return_code`.
async fn accept_session(listener: &TcpListener, return_code: u8) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let connect = expect_packet(&mut stream, 1).await;
    assert_eq!(&connect[..6], b"\x00\x04MQTT");
    stream.write_all(&[0x20, 0x02, 0x00, return_code]).await.unwrap();
    stream
}

/// Read a SUBSCRIBE and return its packet id and topic filter.
async fn read_subscribe(stream: &mut TcpStream) -> (u16, String) {
    let body = expect_packet(stream, 8).await;
    let packet_id = u16::from_be_bytes([body[0], body[1]]);
    let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
    let topic = String::from_utf8(body[4..4 + len].to_vec()).unwrap();
    // Requested QoS 0
    assert_eq!(body[4 + len], 0x00);
    (packet_id, topic)
}

fn suback(packet_id: u16, return_code: u8) -> [u8; 5] {
    let [hi, lo] = packet_id.to_be_bytes();
    [0x90, 0x03, hi, lo, return_code]
}

fn publish_frame(topic: &str, payload: &[u8], packet_id: Option<u16>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if let Some(id) = packet_id {
        body.extend_from_slice(&id.to_be_bytes());
    }
    body.extend_from_slice(payload);

    let mut frame = vec![if packet_id.is_some() { 0x32 } else { 0x30 }];
    let mut len = body.len();
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if len == 0 {
            break;
        }
    }
    frame.extend_from_slice(&body);
    frame
}

/// Keep the session open until the client sends DISCONNECT or hangs up.
async fn hold_until_disconnect(mut stream: TcpStream) {
    while let Some((header, _)) = read_packet(&mut stream).await {
        if header == 0xE0 {
            break;
        }
    }
}

async fn poll_until<T: Transport>(transport: &mut T, expected: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut received = Vec::new();
    for _ in 0..300 {
        let _ = transport.poll_once(&mut |topic: &[u8], payload: &[u8]| {
            received.push((topic.to_vec(), payload.to_vec()));
        });
        if received.len() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    received
}

#[tokio::test]
async fn test_receives_publishes_and_acks_qos1() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = client_config(&listener);
    let payload = reading("kitchen", 22.5);
    let broker_payload = payload.clone();

    let broker = tokio::spawn(async move {
        let mut stream = accept_session(&listener, 0x00).await;
        let (packet_id, topic) = read_subscribe(&mut stream).await;
        assert_eq!(topic, TOPIC);
        stream.write_all(&suback(packet_id, 0x00)).await.unwrap();

        stream.write_all(&publish_frame(TOPIC, &broker_payload, None)).await.unwrap();
        stream.write_all(&publish_frame(TOPIC, &broker_payload, Some(7))).await.unwrap();
        assert_eq!(expect_packet(&mut stream, 4).await, vec![0x00, 0x07]);

        hold_until_disconnect(stream).await;
    });

    let mut transport = connect_with_retry(&config).await.unwrap();
    assert!(transport.is_connected());
    transport.subscribe(TOPIC).unwrap();

    let received = poll_until(&mut transport, 2).await;
    assert_eq!(received.len(), 2);
    for (topic, body) in &received {
        assert_eq!(topic.as_slice(), TOPIC.as_bytes());
        assert_eq!(body, &payload);
    }

    transport.disconnect().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connection_refused_by_broker() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = client_config(&listener);

    let broker = tokio::spawn(async move {
        let _stream = accept_session(&listener, 0x05).await;
    });

    let err = connect_with_retry(&config).await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)), "got {:?}", err);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_connect_gives_up_after_bounded_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = TransportConfig {
        connect_attempts: 3,
        connect_backoff_ms: 10,
        ..client_config(&listener)
    };
    drop(listener);

    let started = Instant::now();
    assert!(connect_with_retry(&config).await.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_invalid_broker_address() {
    let config = TransportConfig {
        broker: "no-port-here".to_string(),
        ..TransportConfig::default()
    };
    assert!(matches!(
        connect_with_retry(&config).await,
        Err(TransportError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_subscription_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = client_config(&listener);

    let broker = tokio::spawn(async move {
        let mut stream = accept_session(&listener, 0x00).await;
        let (packet_id, _) = read_subscribe(&mut stream).await;
        stream.write_all(&suback(packet_id, 0x80)).await.unwrap();
        hold_until_disconnect(stream).await;
        packet_id
    });

    let mut transport = connect_with_retry(&config).await.unwrap();
    transport.subscribe(TOPIC).unwrap();

    let mut rejected = None;
    for _ in 0..300 {
        if let Err(e) = transport.poll_once(&mut |_: &[u8], _: &[u8]| {}) {
            rejected = Some(e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    transport.disconnect().await.unwrap();
    let packet_id = broker.await.unwrap();
    assert!(
        matches!(rejected, Some(TransportError::SubscriptionRejected(id)) if id == packet_id),
        "got {:?}",
        rejected
    );
}

#[tokio::test]
async fn test_reconnect_restores_subscription_without_losing_messages() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = client_config(&listener);
    let payload = reading("garage", 19.0);
    let broker_payload = payload.clone();

    let broker = tokio::spawn(async move {
        let mut stream = accept_session(&listener, 0x00).await;
        let (packet_id, _) = read_subscribe(&mut stream).await;
        stream.write_all(&suback(packet_id, 0x00)).await.unwrap();
        drop(stream);

        let mut stream = accept_session(&listener, 0x00).await;
        let (packet_id, topic) = read_subscribe(&mut stream).await;
        assert_eq!(topic, TOPIC);
        // Delivered before the SUBACK for the restored subscription
        stream.write_all(&publish_frame(TOPIC, &broker_payload, None)).await.unwrap();
        stream.write_all(&suback(packet_id, 0x00)).await.unwrap();

        hold_until_disconnect(stream).await;
    });

    let mut transport = connect_with_retry(&config).await.unwrap();
    transport.subscribe(TOPIC).unwrap();

    let received = poll_until(&mut transport, 1).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1, payload);
    assert!(transport.reconnect().is_ok());

    transport.disconnect().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn test_stalled_broker_does_not_block() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = TransportConfig {
        connect_timeout_ms: 300,
        ..client_config(&listener)
    };
    let (release, released) = oneshot::channel::<()>();

    // Completes the handshake, then never reads again
    let broker = tokio::spawn(async move {
        let stream = accept_session(&listener, 0x00).await;
        let _ = released.await;
        drop(stream);
    });

    let mut transport = connect_with_retry(&config).await.unwrap();
    let bulk = vec![0u8; 4_000];

    let outcome = tokio::time::timeout(Duration::from_secs(30), async {
        for _ in 0..5_000 {
            if let Err(e) = transport.publish(TOPIC, &bulk).await {
                return Some(e);
            }
        }
        None
    })
    .await
    .expect("publishing to a stalled broker never returned");
    assert!(matches!(outcome, Some(TransportError::Timeout(_))), "got {:?}", outcome);

    let started = Instant::now();
    let _ = transport.poll_once(&mut |_: &[u8], _: &[u8]| {});
    assert!(started.elapsed() < Duration::from_millis(100));

    let _ = release.send(());
    drop(transport);
    broker.await.unwrap();
}

#[tokio::test]
async fn test_aggregator_over_mqtt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = client_config(&listener);

    let broker = tokio::spawn(async move {
        let mut stream = accept_session(&listener, 0x00).await;
        let (packet_id, _) = read_subscribe(&mut stream).await;
        stream.write_all(&suback(packet_id, 0x00)).await.unwrap();

        let mut burst = publish_frame(TOPIC, &reading("A", 30.0), None);
        burst.extend_from_slice(&publish_frame(TOPIC, b"\x0A\x05trunc", None));
        burst.extend_from_slice(&publish_frame(TOPIC, &reading("B", 24.0), None));
        stream.write_all(&burst).await.unwrap();

        hold_until_disconnect(stream).await;
    });

    let mut transport = connect_with_retry(&config).await.unwrap();
    transport.subscribe(TOPIC).unwrap();
    let mut aggregator = Aggregator::new(
        transport,
        LogActuator::new(),
        ManualClock::new(0),
        AggregationConfig::default(),
    );

    for _ in 0..300 {
        aggregator.cycle();
        if aggregator.store().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(aggregator.store().len(), 2);
    assert_eq!(aggregator.store().average(), Some(27.0));
    assert_eq!(aggregator.actuator().level(), Some(true));
    assert_eq!(aggregator.ingest_stats().rejected, 1);

    drop(aggregator);
    broker.await.unwrap();
}
