//! The auxiliary duplex: a best-effort side channel scoped to one peer in one
//! room, independent of any peer connection.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::peer::PeerId;

pub trait AuxiliarySink: Send + Sync {
    fn send(&self, message: Bytes) -> Result<()>;
}

pub struct AuxiliaryChannel {
    pub sink: Arc<dyn AuxiliarySink>,
    /// Inbound messages; ends when the duplex drops.
    pub messages: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
pub trait AuxiliaryConnector: Send + Sync {
    async fn connect(&self, room_id: &str, peer_id: &PeerId) -> Result<AuxiliaryChannel>;
}

/// Connects to `{base_url}/data/{room}/{peer}/websocket`.
pub struct WsAuxiliaryConnector {
    base_url: String,
}

impl WsAuxiliaryConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn url(&self, room_id: &str, peer_id: &PeerId) -> String {
        format!(
            "{}/data/{room_id}/{peer_id}/websocket",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl AuxiliaryConnector for WsAuxiliaryConnector {
    async fn connect(&self, room_id: &str, peer_id: &PeerId) -> Result<AuxiliaryChannel> {
        let url = self.url(room_id, peer_id);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!(%url, "auxiliary channel opened");
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Bytes>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Binary(message.to_vec())).await {
                    warn!("auxiliary channel write failed: {e}");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let data = match msg {
                    Ok(Message::Text(text)) => Bytes::from(text),
                    Ok(Message::Binary(data)) => Bytes::from(data),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("auxiliary channel error: {e}");
                        break;
                    }
                };
                if incoming_tx.send(data).is_err() {
                    break;
                }
            }
            debug!("auxiliary channel closed");
        });

        Ok(AuxiliaryChannel {
            sink: Arc::new(WsAuxiliarySink {
                outgoing: outgoing_tx,
            }),
            messages: incoming_rx,
        })
    }
}

struct WsAuxiliarySink {
    outgoing: mpsc::UnboundedSender<Bytes>,
}

impl AuxiliarySink for WsAuxiliarySink {
    fn send(&self, message: Bytes) -> Result<()> {
        self.outgoing
            .send(message)
            .map_err(|_| Error::NoAuxiliaryChannel)
    }
}
