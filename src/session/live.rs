//! Live feed client
//!
//! Speaks the hub protocol of the streaming endpoint: negotiate a connection
//! token over HTTP, open the websocket, invoke `Subscribe` with the topic
//! list. The reply to the subscribe call is the initial snapshot; every
//! `feed` invocation afterwards is one partial update.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{LiveTimingError, Result};
use crate::types::{parse_utc, RawDataPoint, Topic};

use super::feed::at_offset;
use super::types::{CapturePaths, InitialSnapshot};

/// Hub name on the streaming endpoint
pub const HUB: &str = "Streaming";
const CLIENT_PROTOCOL: &str = "1.5";

/// One decoded message from a hub frame
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Reply to the subscribe call: full state keyed by topic name
    Snapshot(Value),
    /// A partial update for one topic
    Feed { topic: String, payload: Value },
}

/// Decode a websocket text frame; keep-alive frames decode to nothing
pub fn parse_hub_frame(text: &str) -> Result<Vec<HubMessage>> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|e| LiveTimingError::Protocol(format!("frame is not JSON: {}", e)))?;
    let mut messages = Vec::new();
    if let Some(reply) = frame.get("R") {
        messages.push(HubMessage::Snapshot(reply.clone()));
    }
    if let Some(invocations) = frame.get("M").and_then(Value::as_array) {
        for invocation in invocations {
            if invocation.get("M").and_then(Value::as_str) != Some("feed") {
                continue;
            }
            let args = invocation.get("A").and_then(Value::as_array);
            let topic = args.and_then(|a| a.first()).and_then(Value::as_str);
            let payload = args.and_then(|a| a.get(1));
            match (topic, payload) {
                (Some(topic), Some(payload)) => messages.push(HubMessage::Feed {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                }),
                _ => tracing::warn!("Feed invocation without topic and payload"),
            }
        }
    }
    Ok(messages)
}

/// Stamps live points by receive offset against the session anchor
///
/// Until the first heartbeat is seen the anchor is the wall-clock time the
/// connection opened. Stamps never go backwards: when the heartbeat anchor lands
/// earlier than the wall-clock one, points are held at the last stamp until
/// their offset passes it.
#[derive(Debug)]
pub struct Stamper {
    opened: Instant,
    anchor: DateTime<Utc>,
    anchored: bool,
    last: Option<DateTime<Utc>>,
}

impl Stamper {
    pub fn new(opened_at: DateTime<Utc>) -> Self {
        Self {
            opened: Instant::now(),
            anchor: opened_at,
            anchored: false,
            last: None,
        }
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// Anchor on a heartbeat received `offset` after the connection opened
    pub fn observe_heartbeat(&mut self, payload: &Value, offset: Duration) {
        if self.anchored {
            return;
        }
        let Some(utc) = payload.get("Utc").and_then(Value::as_str).and_then(parse_utc) else {
            return;
        };
        let offset = TimeDelta::from_std(offset).unwrap_or(TimeDelta::zero());
        self.anchor = utc - offset;
        self.anchored = true;
        tracing::info!(anchor = %self.anchor, "Anchored live session");
    }

    pub fn stamp(&mut self, topic: Topic, payload: Value, offset: Duration) -> RawDataPoint {
        let mut timestamp = at_offset(self.anchor, offset);
        if let Some(last) = self.last {
            timestamp = timestamp.max(last);
        }
        self.last = Some(timestamp);
        RawDataPoint::new(topic, payload, timestamp)
    }

    /// Time since the connection opened
    pub fn elapsed(&self) -> Duration {
        self.opened.elapsed()
    }
}

/// Capture location for a live session, from its `SessionInfo` snapshot
pub fn capture_paths_for(data_dir: &Path, snapshot: &InitialSnapshot) -> Option<CapturePaths> {
    let info = snapshot.get(Topic::SessionInfo)?;
    let location = info.pointer("/Meeting/Location")?.as_str()?;
    let name = info.get("Name")?.as_str()?;
    let year = info
        .get("StartDate")
        .and_then(Value::as_str)
        .and_then(|s| s.get(..4))
        .and_then(|y| y.parse().ok())
        .unwrap_or_else(|| Utc::now().year());
    Some(CapturePaths::for_session(data_dir, year, location, name))
}

#[derive(Debug, Deserialize)]
struct Negotiation {
    #[serde(rename = "ConnectionToken")]
    connection_token: String,
}

/// Client for the streaming hub
#[derive(Debug, Clone)]
pub struct LiveClient {
    base: Url,
    http: reqwest::Client,
    topics: Vec<Topic>,
}

impl LiveClient {
    pub fn new(base_url: &str, topics: Vec<Topic>, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, http, topics })
    }

    fn connection_data() -> String {
        json!([{ "name": HUB }]).to_string()
    }

    pub fn negotiate_url(&self) -> Result<Url> {
        let mut url = self.base.join("signalr/negotiate")?;
        url.query_pairs_mut()
            .append_pair("connectionData", &Self::connection_data())
            .append_pair("clientProtocol", CLIENT_PROTOCOL);
        Ok(url)
    }

    pub fn connect_url(&self, token: &str) -> Result<Url> {
        let mut url = self.base.join("signalr/connect")?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|_| LiveTimingError::Protocol(format!("cannot use {} for {}", scheme, url)))?;
        url.query_pairs_mut()
            .append_pair("transport", "webSockets")
            .append_pair("connectionToken", token)
            .append_pair("connectionData", &Self::connection_data())
            .append_pair("clientProtocol", CLIENT_PROTOCOL);
        Ok(url)
    }

    /// The `Subscribe` invocation for the configured topics
    pub fn subscribe_message(&self) -> String {
        let topics: Vec<&str> = self.topics.iter().map(Topic::wire_name).collect();
        json!({ "H": HUB, "M": "Subscribe", "A": [topics], "I": 1 }).to_string()
    }

    async fn negotiate(&self) -> Result<(String, Option<String>)> {
        let response = self
            .http
            .get(self.negotiate_url()?)
            .send()
            .await?
            .error_for_status()?;
        let cookie = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");
        let negotiation: Negotiation = serde_json::from_str(&response.text().await?)?;
        Ok((negotiation.connection_token, Some(cookie).filter(|c| !c.is_empty())))
    }

    /// Stream the session until the feed closes or `cancel` fires
    ///
    /// The initial snapshot goes out on `snapshots` once; points go out on
    /// `points` in receive order. Unknown topics are dropped.
    pub async fn run(
        self,
        snapshots: Sender<InitialSnapshot>,
        points: Sender<RawDataPoint>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (token, cookie) = self.negotiate().await?;
        let mut request = self.connect_url(&token)?.as_str().into_client_request()?;
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| LiveTimingError::Protocol(format!("bad cookie: {}", e)))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = stream.split();
        let mut stamper = Stamper::new(Utc::now());
        write.send(Message::Text(self.subscribe_message())).await?;
        tracing::info!(topics = self.topics.len(), "Subscribed to live feed");

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Live feed cancelled");
                    break;
                }
                next = read.next() => next,
            };
            let Some(frame) = frame else {
                tracing::info!("Live feed stream ended");
                break;
            };
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(reason) => {
                    tracing::info!(?reason, "Live feed closed by server");
                    break;
                }
                _ => continue,
            };
            let messages = match parse_hub_frame(&text) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed hub frame");
                    continue;
                }
            };
            for message in messages {
                let offset = stamper.elapsed();
                match message {
                    HubMessage::Snapshot(state) => {
                        let snapshot = InitialSnapshot::from_value(state);
                        if let Some(heartbeat) = snapshot.get(Topic::Heartbeat) {
                            stamper.observe_heartbeat(heartbeat, offset);
                        }
                        if snapshots.send(snapshot).is_err() {
                            tracing::debug!("Snapshot receiver dropped");
                        }
                    }
                    HubMessage::Feed { topic, payload } => {
                        let Some(topic) = Topic::from_wire(&topic) else {
                            tracing::debug!(%topic, "Dropping update for unknown topic");
                            continue;
                        };
                        if topic == Topic::Heartbeat {
                            stamper.observe_heartbeat(&payload, offset);
                        }
                        if points.send(stamper.stamp(topic, payload, offset)).is_err() {
                            tracing::info!("Point receiver dropped, stopping live feed");
                            cancel.cancel();
                        }
                    }
                }
            }
        }

        let _ = write.send(Message::Close(None)).await;
        Ok(())
    }
}
