//! MQTT client built on `rumqttc`.
//!
//! The `rumqttc` event loop runs in its own tokio task. Incoming publishes
//! are queued on a bounded channel that `poll_once` drains without waiting,
//! so a stalled broker can never block a control cycle. The task reconnects
//! with exponential backoff and restores subscriptions after every CONNACK.

use super::{Transport, TransportError};
use crate::config::TransportConfig;
use core::fmt;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, SubscribeReasonCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Largest MQTT packet accepted or sent, in bytes.
pub const MAX_PACKET_SIZE: usize = 4096;
const REQUEST_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 256;
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug)]
enum LinkEvent {
    Message { topic: String, payload: Vec<u8> },
    SubscriptionRejected(u16),
}

/// State shared between the transport handle and its event-loop task.
#[derive(Debug, Default)]
struct Link {
    connected: AtomicBool,
    closing: AtomicBool,
    topics: Mutex<Vec<String>>,
}

impl Link {
    fn topics(&self) -> MutexGuard<'_, Vec<String>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    events: mpsc::Receiver<LinkEvent>,
    link: Arc<Link>,
    driver: JoinHandle<()>,
    request_timeout: Duration,
}

impl fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("connected", &self.link.is_connected())
            .field("topics", &*self.link.topics())
            .finish_non_exhaustive()
    }
}

impl MqttTransport {
    /// Take over an event loop that has completed its CONNACK handshake.
    fn start(client: AsyncClient, eventloop: EventLoop, config: &TransportConfig) -> Self {
        let link = Arc::new(Link {
            connected: AtomicBool::new(true),
            ..Link::default()
        });
        let (sender, events) = mpsc::channel(EVENT_CAPACITY);
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&link),
            sender,
            Duration::from_millis(config.connect_backoff_ms),
        ));

        Self {
            client,
            events,
            link,
            driver,
            request_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    /// Queue a QoS 0 PUBLISH. Fails with `Timeout` if the request queue
    /// stays full for the configured connect timeout.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let request = self.client.publish(topic, QoS::AtMostOnce, false, payload.to_vec());
        time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout("publish"))??;
        Ok(())
    }

    /// Send DISCONNECT and wait for the event loop to stop.
    pub async fn disconnect(mut self) -> Result<(), TransportError> {
        self.link.closing.store(true, Ordering::Release);
        time::timeout(self.request_timeout, self.client.disconnect())
            .await
            .map_err(|_| TransportError::Timeout("disconnect"))??;

        time::timeout(self.request_timeout, &mut self.driver)
            .await
            .map_err(|_| TransportError::Timeout("disconnect"))?
            .map_err(|_| TransportError::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn next_event(&mut self) -> nb::Result<LinkEvent, TransportError> {
        match self.events.try_recv() {
            Ok(event) => Ok(event),
            Err(TryRecvError::Empty) => Err(nb::Error::WouldBlock),
            Err(TryRecvError::Disconnected) => Err(nb::Error::Other(TransportError::Disconnected)),
        }
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl Transport for MqttTransport {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        {
            let mut topics = self.link.topics();
            if !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
        self.client.try_subscribe(topic, QoS::AtMostOnce)?;
        info!("📨 Subscribed to {}", topic);
        Ok(())
    }

    fn poll_once(
        &mut self,
        on_message: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<usize, TransportError> {
        if !self.link.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let mut delivered = 0;
        loop {
            match self.next_event() {
                Ok(LinkEvent::Message { topic, payload }) => {
                    on_message(topic.as_bytes(), &payload);
                    delivered += 1;
                }
                Ok(LinkEvent::SubscriptionRejected(packet_id)) => {
                    return Err(TransportError::SubscriptionRejected(packet_id))
                }
                Err(nb::Error::WouldBlock) => return Ok(delivered),
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }

    /// The event-loop task reconnects on its own; this only reports whether
    /// it has succeeded yet.
    fn reconnect(&mut self) -> Result<(), TransportError> {
        if self.driver.is_finished() || !self.link.is_connected() {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    link: Arc<Link>,
    events: mpsc::Sender<LinkEvent>,
    initial_backoff: Duration,
) {
    let mut backoff = initial_backoff;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                let message = LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if events.send(message).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                backoff = initial_backoff;
                link.connected.store(true, Ordering::Release);
                info!("🔗 Reconnected to MQTT broker");

                let topics = link.topics().clone();
                for topic in topics {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        warn!("Failed to restore subscription to {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    warn!("Broker rejected subscription (packet id {})", ack.pkid);
                    if events.send(LinkEvent::SubscriptionRejected(ack.pkid)).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(event) => debug!("MQTT event: {:?}", event),
            Err(e) => {
                link.connected.store(false, Ordering::Release);
                if link.closing.load(Ordering::Acquire) {
                    break;
                }
                warn!("MQTT connection lost: {}; retrying in {:?}", e, backoff);
                time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }

    link.connected.store(false, Ordering::Release);
    debug!("MQTT event loop stopped");
}

fn broker_endpoint(broker: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidConfig(format!("broker address '{}' is not host:port", broker));
    let (host, port) = broker.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

fn mqtt_options(config: &TransportConfig) -> Result<MqttOptions, TransportError> {
    if config.client_id.is_empty() || config.client_id.starts_with(' ') {
        return Err(TransportError::InvalidConfig(format!(
            "client id '{}' is not usable",
            config.client_id
        )));
    }
    let (host, port) = broker_endpoint(&config.broker)?;

    let mut options = MqttOptions::new(config.client_id.as_str(), host, port);
    options
        .set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)))
        .set_clean_session(true)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    Ok(options)
}

async fn handshake(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Incoming::ConnAck(_)) => return Ok(()),
            event => debug!("Ignoring {:?} before CONNACK", event),
        }
    }
}

/// Connect with bounded retries and exponential backoff. Fails with the last
/// error once `connect_attempts` attempts are exhausted.
pub async fn connect_with_retry(config: &TransportConfig) -> Result<MqttTransport, TransportError> {
    let options = mqtt_options(config)?;
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let mut backoff = Duration::from_millis(config.connect_backoff_ms);
    let mut last_error = None;

    for attempt in 1..=config.connect_attempts {
        match time::timeout(timeout, handshake(&mut eventloop)).await {
            Ok(Ok(())) => {
                info!("🔗 Connected to MQTT broker {} as {}", config.broker, config.client_id);
                return Ok(MqttTransport::start(client, eventloop, config));
            }
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => last_error = Some(TransportError::Timeout("CONNACK")),
        }
        if let Some(e) = &last_error {
            warn!(
                "Connection attempt {}/{} to {} failed: {}",
                attempt, config.connect_attempts, config.broker, e
            );
        }
        if attempt < config.connect_attempts {
            time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(last_error.unwrap_or(TransportError::Timeout("CONNACK")))
}
