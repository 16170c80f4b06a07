// Realtime change feed — Phoenix-channel websocket scoped to table inserts.
//
// Protocol (vsn 1.0.0, JSON frames `{topic, event, payload, ref, join_ref}`):
//   -> phx_join on `realtime:public:{table}` asking for INSERT postgres_changes
//   <- phx_reply {status: "ok"} once the channel is joined
//   <- postgres_changes {data: {type: "INSERT", record: {...}, commit_timestamp}}
//   -> heartbeat on topic `phoenix` every HEARTBEAT_INTERVAL
//   -> phx_leave, then close, on teardown
//
// A dropped connection is re-established after RECONNECT_BACKOFF. Inserts
// committed while disconnected are never replayed.

use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::store::models::{parse_timestamp, InterestEvent};
use crate::store::traits::{InsertFeed, FEED_BUFFER};

/// Interval between keep-alive frames.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Delay before each reconnect attempt; the last entry repeats.
pub const RECONNECT_BACKOFF: [Duration; 4] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
];

/// Ref used for the channel join so its reply can be recognised.
const JOIN_REF: &str = "1";

/// Where and what to subscribe to.
#[derive(Debug, Clone)]
pub struct RealtimeTarget {
    pub socket_url: String,
    pub table: String,
    pub key: String,
}

impl RealtimeTarget {
    /// Derive the websocket endpoint from the project's https base URL.
    pub fn new(base_url: &str, key: &str, table: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };

        Self {
            socket_url: format!("{ws_base}/realtime/v1/websocket?apikey={key}&vsn=1.0.0"),
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    pub fn topic(&self) -> String {
        format!("realtime:public:{}", self.table)
    }

    fn join_frame(&self) -> String {
        json!({
            "topic": self.topic(),
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "INSERT", "schema": "public", "table": self.table }
                    ],
                    "private": false
                },
                "access_token": self.key
            },
            "ref": JOIN_REF,
            "join_ref": JOIN_REF
        })
        .to_string()
    }

    fn leave_frame(&self, msg_ref: u64) -> String {
        json!({
            "topic": self.topic(),
            "event": "phx_leave",
            "payload": {},
            "ref": msg_ref.to_string(),
            "join_ref": JOIN_REF
        })
        .to_string()
    }
}

fn heartbeat_frame(msg_ref: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string()
    })
    .to_string()
}

/// Start the feed worker and hand back its receiving end.
pub fn spawn_feed(target: RealtimeTarget) -> InsertFeed {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let worker = tokio::spawn(run_feed(target, tx, shutdown_rx));
    InsertFeed::with_shutdown(rx, worker, shutdown_tx)
}

/// Why a websocket session ended.
enum SessionEnd {
    /// Teardown requested; do not reconnect.
    Shutdown,
    /// Nobody is reading the feed any more; do not reconnect.
    ConsumerGone,
    /// Connection-level failure; reconnect after backoff.
    Disconnected(String),
}

async fn run_feed(
    target: RealtimeTarget,
    tx: mpsc::Sender<InterestEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempt = 0usize;

    loop {
        match tokio_tungstenite::connect_async(target.socket_url.as_str()).await {
            Ok((socket, _)) => {
                debug!(table = %target.table, "Realtime socket connected");
                match run_session(socket, &target, &tx, &mut shutdown, &mut attempt).await {
                    SessionEnd::Shutdown => {
                        info!(table = %target.table, "Realtime feed closed");
                        return;
                    }
                    SessionEnd::ConsumerGone => {
                        debug!(table = %target.table, "Realtime feed consumer dropped");
                        return;
                    }
                    SessionEnd::Disconnected(reason) => {
                        warn!(table = %target.table, reason = %reason, "Realtime feed disconnected");
                    }
                }
            }
            Err(e) => {
                warn!(table = %target.table, error = %e, "Realtime connect failed");
            }
        }

        let delay = RECONNECT_BACKOFF[attempt.min(RECONNECT_BACKOFF.len() - 1)];
        attempt += 1;
        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            _ = tx.closed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    target: &RealtimeTarget,
    tx: &mpsc::Sender<InterestEvent>,
    shutdown: &mut oneshot::Receiver<()>,
    attempt: &mut usize,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let topic = target.topic();
    let mut next_ref: u64 = 2;

    if let Err(e) = sink.send(Message::text(target.join_frame())).await {
        return SessionEnd::Disconnected(format!("join send failed: {e}"));
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately; the join frame already covers it.
    heartbeat.tick().await;

    loop {
        // Shutdown wins over consumer-gone so the channel is left cleanly.
        tokio::select! {
            biased;
            _ = &mut *shutdown => {
                let _ = sink.send(Message::text(target.leave_frame(next_ref))).await;
                let _ = sink.close().await;
                return SessionEnd::Shutdown;
            }
            _ = tx.closed() => {
                let _ = sink.close().await;
                return SessionEnd::ConsumerGone;
            }
            _ = heartbeat.tick() => {
                let frame = heartbeat_frame(next_ref);
                next_ref += 1;
                if let Err(e) = sink.send(Message::text(frame)).await {
                    return SessionEnd::Disconnected(format!("heartbeat failed: {e}"));
                }
            }
            message = stream.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Disconnected(format!("server closed: {frame:?}"));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
                    None => return SessionEnd::Disconnected("stream ended".to_string()),
                };

                match decode_frame(text.as_str(), &topic) {
                    FeedFrame::Insert(event) => {
                        if tx.send(event).await.is_err() {
                            return SessionEnd::ConsumerGone;
                        }
                    }
                    FeedFrame::Joined => {
                        *attempt = 0;
                        info!(topic = %topic, "Realtime channel joined");
                    }
                    FeedFrame::JoinRejected(reason) => {
                        return SessionEnd::Disconnected(format!("join rejected: {reason}"));
                    }
                    FeedFrame::ChannelClosed(event) => {
                        return SessionEnd::Disconnected(format!("channel {event}"));
                    }
                    FeedFrame::Ignored => {}
                }
            }
        }
    }
}

/// What a single inbound frame means for the feed.
#[derive(Debug, PartialEq)]
pub enum FeedFrame {
    Insert(InterestEvent),
    Joined,
    JoinRejected(String),
    ChannelClosed(String),
    Ignored,
}

#[derive(Deserialize)]
struct RawFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
}

/// Interpret one inbound text frame for the channel `topic`.
pub fn decode_frame(text: &str, topic: &str) -> FeedFrame {
    let frame: RawFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "Unparseable realtime frame");
            return FeedFrame::Ignored;
        }
    };

    if frame.topic != topic {
        return FeedFrame::Ignored;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.msg_ref.as_deref() == Some(JOIN_REF) => {
            match frame.payload["status"].as_str() {
                Some("ok") => FeedFrame::Joined,
                status => {
                    let reason = frame.payload["response"]["reason"]
                        .as_str()
                        .or(status)
                        .unwrap_or("no status");
                    FeedFrame::JoinRejected(reason.to_string())
                }
            }
        }
        "postgres_changes" => {
            let data = &frame.payload["data"];
            if data["type"].as_str() == Some("INSERT") {
                FeedFrame::Insert(decode_record(data))
            } else {
                FeedFrame::Ignored
            }
        }
        "phx_error" | "phx_close" => FeedFrame::ChannelClosed(frame.event),
        _ => FeedFrame::Ignored,
    }
}

/// Decode the inserted row. Every insert notification yields an event, even
/// when the row doesn't match `InterestEvent`; missing fields stay null and
/// the commit time stands in for `clicked_at`.
fn decode_record(data: &Value) -> InterestEvent {
    let record = &data["record"];
    match serde_json::from_value::<InterestEvent>(record.clone()) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Realtime record did not match the event shape");
            let text = |field: &str| record[field].as_str().map(String::from);
            InterestEvent {
                id: record["id"].as_i64(),
                country: text("country"),
                city: text("city"),
                ip_address: text("ip_address"),
                clicked_at: data["commit_timestamp"]
                    .as_str()
                    .and_then(parse_timestamp)
                    .unwrap_or_else(Utc::now),
            }
        }
    }
}
