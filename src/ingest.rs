use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use crossbeam_channel::Sender;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info, trace, warn};

use crate::cli::{BrokerConfig, Config};
use crate::key::{derive, is_bridge, AggregationKey};
use crate::state::SharedTable;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Filters raw publishes through the key extractor and records them.
#[derive(Clone)]
pub struct Ingestor {
    table: SharedTable,
    base_topic: String,
    detail_depth: u32,
    ignore_bridge: bool,
}

impl Ingestor {
    pub fn new(table: SharedTable, config: &Config) -> Self {
        Self {
            table,
            base_topic: config.base_topic.clone(),
            detail_depth: config.detail_depth,
            ignore_bridge: config.ignore_bridge,
        }
    }

    /// Returns the key the message was counted under, or `None` if it was filtered out.
    pub fn handle(&self, topic: &str, payload: &Bytes, now: Instant) -> Option<AggregationKey> {
        let Some(key) = derive(topic, &self.base_topic, self.detail_depth, self.ignore_bridge) else {
            trace!(topic, bridge = is_bridge(topic, &self.base_topic), "Filtered");
            return None;
        };
        trace!(topic, %key, size = payload.len(), "Recorded");
        self.table.record(key.clone(), payload.len() as u64, now);
        Some(key)
    }
}

/// Broker link as last reported to the sink.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Link {
    Connecting,
    Up,
    Down,
}

/// Status line for a connection error, or `None` if the sink already knows the link is down.
fn link_lost(link: Link, error: &dyn std::fmt::Display) -> Option<String> {
    match link {
        Link::Connecting => Some(format!("MQTT: cannot connect ({error}), retrying...")),
        Link::Up => Some(format!("MQTT: disconnected ({error}), reconnecting...")),
        Link::Down => None,
    }
}

pub fn connect(broker: &BrokerConfig) -> (Client, Connection) {
    let mut options = MqttOptions::new(broker.client_id.clone(), broker.host.clone(), broker.port);
    options.set_keep_alive(KEEP_ALIVE);
    if let Some((user, password)) = &broker.credentials {
        options.set_credentials(user.clone(), password.clone());
    }
    Client::new(options, REQUEST_CAPACITY)
}

/// Drives the MQTT connection until `stop` is set. Connection losses are
/// reported on `status` and retried; the table keeps its totals across them.
pub fn run_ingest(
    client: Client,
    mut connection: Connection,
    ingestor: Ingestor,
    subscription: String,
    status: Sender<String>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let mut link = Link::Connecting;
    for notification in connection.iter() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                link = Link::Up;
                info!(code = ?ack.code, "Connected to MQTT broker");
                // clean sessions drop subscriptions, so subscribe on every connect
                client
                    .try_subscribe(subscription.clone(), QoS::AtMostOnce)
                    .with_context(|| format!("Subscribing to {subscription}"))?;
                info!(topic = %subscription, "Subscribed");
                let _ = status.send(format!("MQTT: connected, subscribed to {subscription}"));
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                ingestor.handle(&publish.topic, &publish.payload, Instant::now());
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                debug!(codes = ?ack.return_codes, "Subscription acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(line) = link_lost(link, &e) {
                    let _ = status.send(line);
                }
                link = Link::Down;
                warn!(error = %e, "MQTT connection error, retrying in 1s");
                std::thread::sleep(RECONNECT_DELAY);
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }
    info!("Ingestion stopped");
    Ok(())
}
