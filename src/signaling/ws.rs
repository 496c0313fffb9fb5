//! WebSocket signaling transport speaking Phoenix channel framing.
//!
//! One socket multiplexes any number of topics. Every frame is a JSON
//! [`Envelope`]; replies to our own pushes come back as `phx_reply` with the
//! same `ref`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::{
    JoinRequest, JoinResponse, JoinedChannel, OutboundEvent, RawEvent, Signaling, SignalingSink,
};
use crate::error::{Error, Result};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    status: String,
    #[serde(default)]
    response: Value,
}

#[derive(Default)]
struct Routes {
    topics: HashMap<String, mpsc::UnboundedSender<RawEvent>>,
    replies: HashMap<String, oneshot::Sender<Reply>>,
}

pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

pub struct WsSignaling {
    outgoing: mpsc::UnboundedSender<Envelope>,
    routes: Arc<Mutex<Routes>>,
    next_ref: Arc<AtomicU64>,
}

impl WsSignaling {
    /// Opens the socket at `url`. `on_disconnect` fires once when it closes.
    pub async fn connect(url: &str, on_disconnect: Option<DisconnectHandler>) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!(url, "signaling socket connected");
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Envelope>();
        let routes = Arc::new(Mutex::new(Routes::default()));
        let next_ref = Arc::new(AtomicU64::new(1));

        // Handle outgoing messages and keep the socket alive
        let heartbeat_ref = Arc::clone(&next_ref);
        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            loop {
                let envelope = tokio::select! {
                    envelope = outgoing_rx.recv() => match envelope {
                        Some(envelope) => envelope,
                        None => break,
                    },
                    _ = heartbeat.tick() => Envelope {
                        topic: "phoenix".to_owned(),
                        event: "heartbeat".to_owned(),
                        payload: Value::Object(Default::default()),
                        reference: Some(heartbeat_ref.fetch_add(1, Ordering::Relaxed).to_string()),
                    },
                };

                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(event = %envelope.event, "failed to encode signaling frame: {e}");
                        continue;
                    }
                };
                trace!(topic = %envelope.topic, event = %envelope.event, "sending");
                if let Err(e) = write.send(Message::Text(json)).await {
                    warn!("signaling socket write failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        let reader_routes = Arc::clone(&routes);
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "signaling socket closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("signaling socket read failed: {e}");
                        break;
                    }
                };

                let envelope: Envelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("dropping undecodable signaling frame: {e}");
                        continue;
                    }
                };
                route(&reader_routes, envelope).await;
            }

            // Dropping every sender closes each joined channel's event stream.
            let mut routes = reader_routes.lock().await;
            routes.topics.clear();
            routes.replies.clear();
            drop(routes);

            info!("signaling socket disconnected");
            if let Some(on_disconnect) = on_disconnect {
                on_disconnect();
            }
        });

        Ok(Self {
            outgoing: outgoing_tx,
            routes,
            next_ref,
        })
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

async fn route(routes: &Mutex<Routes>, envelope: Envelope) {
    let mut routes = routes.lock().await;

    if envelope.event == "phx_reply" {
        let waiting = envelope
            .reference
            .as_ref()
            .and_then(|reference| routes.replies.remove(reference));
        if let Some(waiting) = waiting {
            match serde_json::from_value::<Reply>(envelope.payload) {
                Ok(reply) => {
                    let _ = waiting.send(reply);
                }
                Err(e) => warn!(topic = %envelope.topic, "malformed reply: {e}"),
            }
        }
        return;
    }

    if envelope.event == "phx_close" || envelope.event == "phx_error" {
        if routes.topics.remove(&envelope.topic).is_some() {
            warn!(topic = %envelope.topic, event = %envelope.event, "channel closed by server");
        }
        return;
    }

    match routes.topics.get(&envelope.topic) {
        Some(tx) => {
            if tx.send(RawEvent::new(envelope.event, envelope.payload)).is_err() {
                routes.topics.remove(&envelope.topic);
            }
        }
        None => trace!(topic = %envelope.topic, event = %envelope.event, "no channel for topic"),
    }
}

#[async_trait]
impl Signaling for WsSignaling {
    async fn join(&self, topic: &str, request: JoinRequest) -> Result<JoinedChannel> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        let reference = self.next_ref();

        {
            let mut routes = self.routes.lock().await;
            routes.topics.insert(topic.to_owned(), events_tx);
            routes.replies.insert(reference.clone(), reply_tx);
        }

        let join = Envelope {
            topic: topic.to_owned(),
            event: "phx_join".to_owned(),
            payload: serde_json::to_value(&request)?,
            reference: Some(reference),
        };
        self.outgoing
            .send(join)
            .map_err(|_| Error::SignalingClosed)?;

        let reply = reply_rx.await.map_err(|_| Error::SignalingClosed)?;
        if reply.status != "ok" {
            self.routes.lock().await.topics.remove(topic);
            return Err(Error::Join {
                room: topic.to_owned(),
                reason: reply.response.to_string(),
            });
        }

        let response: JoinResponse = serde_json::from_value(reply.response)?;
        info!(topic, peer = %response.peer.id, "joined channel");

        Ok(JoinedChannel {
            sink: Arc::new(WsChannel {
                topic: topic.to_owned(),
                outgoing: self.outgoing.clone(),
                next_ref: Arc::clone(&self.next_ref),
            }),
            events,
            response,
        })
    }
}

/// Push side of one joined topic.
struct WsChannel {
    topic: String,
    outgoing: mpsc::UnboundedSender<Envelope>,
    next_ref: Arc<AtomicU64>,
}

impl SignalingSink for WsChannel {
    fn push(&self, event: OutboundEvent) -> Result<()> {
        let raw = event.into_raw()?;
        let envelope = Envelope {
            topic: self.topic.clone(),
            event: raw.event,
            payload: raw.payload,
            reference: Some(self.next_ref.fetch_add(1, Ordering::Relaxed).to_string()),
        };
        self.outgoing
            .send(envelope)
            .map_err(|_| Error::SignalingClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_phoenix_field_names() {
        let envelope = Envelope {
            topic: "room:lobby".into(),
            event: "phx_join".into(),
            payload: json!({ "displayName": "Ann", "jwt": "t" }),
            reference: Some("1".into()),
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "topic": "room:lobby",
                "event": "phx_join",
                "payload": { "displayName": "Ann", "jwt": "t" },
                "ref": "1"
            })
        );
    }

    #[tokio::test]
    async fn replies_resolve_the_waiting_join() {
        let routes = Mutex::new(Routes::default());
        let (tx, rx) = oneshot::channel();
        routes.lock().await.replies.insert("7".into(), tx);

        route(
            &routes,
            serde_json::from_value(json!({
                "topic": "room:lobby",
                "event": "phx_reply",
                "ref": "7",
                "payload": { "status": "ok", "response": { "peer": { "id": "me" } } }
            }))
            .unwrap(),
        )
        .await;

        let reply = rx.await.unwrap();
        assert_eq!(reply.status, "ok");
        assert!(routes.lock().await.replies.is_empty());
    }

    #[tokio::test]
    async fn events_are_routed_by_topic_and_close_drops_the_route() {
        let routes = Mutex::new(Routes::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        routes.lock().await.topics.insert("room:lobby".into(), tx);

        let frame = |event: &str| -> Envelope {
            serde_json::from_value(json!({
                "topic": "room:lobby",
                "event": event,
                "payload": { "count": 2 },
                "ref": null
            }))
            .unwrap()
        };

        route(&routes, frame("onPeerCountUpdated")).await;
        route(&routes, frame("phx_close")).await;

        let raw = rx.recv().await.unwrap();
        assert_eq!(raw, RawEvent::new("onPeerCountUpdated", json!({ "count": 2 })));
        assert!(rx.recv().await.is_none());
    }
}
