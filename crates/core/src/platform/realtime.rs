//! Realtime change-feed client.
//!
//! One task owns one WebSocket connection to the backend's realtime
//! service. Subscribers talk to it over a command channel: each
//! subscription becomes a channel topic that is joined on the live
//! connection, fanned out to its own event queue, and left again when the
//! [`Subscription`] is dropped. Lost connections are retried with
//! exponential backoff, and every active topic is re-joined after a
//! reconnect.

use super::types::{ChangeEvent, ChangeOp, EventFilter, Subscription};
use crate::config::Config;
use crate::error::{Error, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const EVENT_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

enum Command {
    Subscribe {
        table: String,
        filter: Option<EventFilter>,
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe(u64),
}

struct Topic {
    name: String,
    table: String,
    filter: Option<EventFilter>,
    tx: mpsc::Sender<ChangeEvent>,
}

/// Handle to the realtime task. Dropping the last handle shuts it down.
pub(super) struct RealtimeHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl RealtimeHandle {
    /// Spawn the connection task. Must be called within a runtime.
    pub(super) fn spawn(config: Config) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let weak_tx = cmd_tx.downgrade();
        tokio::spawn(run(config, cmd_rx, weak_tx));
        Self { cmd_tx }
    }

    /// Open a subscription. Works while disconnected too: the topic is
    /// queued and joined once the link is up.
    pub(super) async fn subscribe(
        &self,
        table: &str,
        filter: Option<EventFilter>,
    ) -> Result<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                table: table.to_string(),
                filter,
                reply: reply_tx,
            })
            .map_err(|_| Error::Realtime("realtime task has shut down".into()))?;
        reply_rx
            .await
            .map_err(|_| Error::Realtime("realtime task dropped the request".into()))
    }
}

// ==================== Connection task ====================

enum ServeEnd {
    Reconnect,
    Shutdown,
}

async fn run(
    config: Config,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    weak_tx: mpsc::WeakUnboundedSender<Command>,
) {
    let url = config.realtime_url();
    let mut topics: HashMap<u64, Topic> = HashMap::new();
    let mut next_id: u64 = 1;
    let mut msg_ref: u64 = 0;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match connect_async(&url).await {
            Ok((stream, _)) => {
                debug!("realtime connected");
                backoff = INITIAL_BACKOFF;
                let end = serve(
                    stream,
                    &mut cmd_rx,
                    &mut topics,
                    &mut next_id,
                    &mut msg_ref,
                    &weak_tx,
                )
                .await;
                match end {
                    ServeEnd::Reconnect => warn!("realtime connection lost, reconnecting"),
                    ServeEnd::Shutdown => return,
                }
            }
            Err(e) => {
                warn!(
                    "realtime connect failed: {e}, retrying in {}s",
                    backoff.as_secs()
                );
            }
        }

        // Keep serving subscribe/unsubscribe during the backoff window so
        // callers are never blocked on a dead link.
        let wait = tokio::time::sleep(backoff);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                command = cmd_rx.recv() => match command {
                    Some(command) => handle_offline(command, &mut topics, &mut next_id, &weak_tx),
                    None => return,
                },
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn serve(
    stream: WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    topics: &mut HashMap<u64, Topic>,
    next_id: &mut u64,
    msg_ref: &mut u64,
    weak_tx: &mpsc::WeakUnboundedSender<Command>,
) -> ServeEnd {
    let (mut sink, mut source) = stream.split();

    // Fresh connection: join every topic that is already active.
    for topic in topics.values() {
        if send_frame(&mut sink, join_payload(topic, next_ref(msg_ref))).await.is_err() {
            return ServeEnd::Reconnect;
        }
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(&text, topics),
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        return ServeEnd::Reconnect;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return ServeEnd::Reconnect,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("realtime stream error: {e}");
                    return ServeEnd::Reconnect;
                }
            },
            command = cmd_rx.recv() => match command {
                Some(Command::Subscribe { table, filter, reply }) => {
                    if let Some(id) = open_topic(topics, next_id, weak_tx, table, filter, reply) {
                        if let Some(topic) = topics.get(&id) {
                            if send_frame(&mut sink, join_payload(topic, next_ref(msg_ref))).await.is_err() {
                                return ServeEnd::Reconnect;
                            }
                        }
                    }
                }
                Some(Command::Unsubscribe(id)) => {
                    if let Some(topic) = topics.remove(&id) {
                        if send_frame(&mut sink, leave_payload(&topic, next_ref(msg_ref))).await.is_err() {
                            return ServeEnd::Reconnect;
                        }
                    }
                }
                None => return ServeEnd::Shutdown,
            },
            _ = heartbeat.tick() => {
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": next_ref(msg_ref),
                });
                if send_frame(&mut sink, beat).await.is_err() {
                    return ServeEnd::Reconnect;
                }
            }
        }
    }
}

fn handle_offline(
    command: Command,
    topics: &mut HashMap<u64, Topic>,
    next_id: &mut u64,
    weak_tx: &mpsc::WeakUnboundedSender<Command>,
) {
    match command {
        Command::Subscribe {
            table,
            filter,
            reply,
        } => {
            // Registered now, joined when the link comes back.
            open_topic(topics, next_id, weak_tx, table, filter, reply);
        }
        Command::Unsubscribe(id) => {
            topics.remove(&id);
        }
    }
}

/// Register a topic and hand the caller its subscription.
///
/// Returns `None` when the caller already went away; in that case nothing
/// was registered, so there is no topic to join or leak.
fn open_topic(
    topics: &mut HashMap<u64, Topic>,
    next_id: &mut u64,
    weak_tx: &mpsc::WeakUnboundedSender<Command>,
    table: String,
    filter: Option<EventFilter>,
    reply: oneshot::Sender<Subscription>,
) -> Option<u64> {
    let id = *next_id;
    *next_id += 1;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let weak = weak_tx.clone();
    let subscription = Subscription::new(rx, move || {
        if let Some(cmd_tx) = weak.upgrade() {
            let _ = cmd_tx.send(Command::Unsubscribe(id));
        }
    });
    if reply.send(subscription).is_err() {
        return None;
    }

    topics.insert(
        id,
        Topic {
            name: format!("realtime:natter-{id}"),
            table,
            filter,
            tx,
        },
    );
    Some(id)
}

fn next_ref(msg_ref: &mut u64) -> String {
    *msg_ref += 1;
    msg_ref.to_string()
}

fn join_payload(topic: &Topic, reference: String) -> Value {
    let mut change = json!({
        "event": "*",
        "schema": "public",
        "table": topic.table,
    });
    if let Some(filter) = &topic.filter {
        change["filter"] = Value::String(filter.to_wire());
    }
    json!({
        "topic": topic.name,
        "event": "phx_join",
        "ref": reference,
        "join_ref": reference,
        "payload": { "config": { "postgres_changes": [change] } },
    })
}

fn leave_payload(topic: &Topic, reference: String) -> Value {
    json!({
        "topic": topic.name,
        "event": "phx_leave",
        "payload": {},
        "ref": reference,
    })
}

async fn send_frame(
    sink: &mut WsSink,
    payload: Value,
) -> std::result::Result<(), tokio_tungstenite::tungstenite::Error> {
    sink.send(Message::Text(payload.to_string())).await
}

/// Decode one inbound frame and route change events to their topic.
fn dispatch(text: &str, topics: &HashMap<u64, Topic>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("undecodable realtime frame: {e}");
            return;
        }
    };
    let event = frame.get("event").and_then(Value::as_str).unwrap_or_default();
    match event {
        "postgres_changes" => {
            let topic_name = frame.get("topic").and_then(Value::as_str).unwrap_or_default();
            let Some(topic) = topics.values().find(|t| t.name == topic_name) else {
                return;
            };
            let data = &frame["payload"]["data"];
            let op: ChangeOp = match serde_json::from_value(data["type"].clone()) {
                Ok(op) => op,
                Err(_) => {
                    debug!("unknown change type in realtime frame");
                    return;
                }
            };
            let row = match op {
                ChangeOp::Delete => data.get("old_record").cloned().unwrap_or(Value::Null),
                _ => data.get("record").cloned().unwrap_or(Value::Null),
            };
            let table = data
                .get("table")
                .and_then(Value::as_str)
                .unwrap_or(&topic.table)
                .to_string();
            match topic.tx.try_send(ChangeEvent { table, op, row }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("realtime subscriber lagging, dropping event"),
                // Guard is about to unsubscribe this topic.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        "phx_reply" => {
            let status = frame["payload"]["status"].as_str().unwrap_or("?");
            debug!("channel reply: {status}");
        }
        "phx_error" => {
            warn!("channel error on {}", frame["topic"].as_str().unwrap_or("?"));
        }
        "system" | "presence_state" | "presence_diff" | "" => {}
        other => debug!("ignoring realtime event {other}"),
    }
}

// ==================== Tests ====================
