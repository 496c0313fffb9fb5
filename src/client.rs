//! Entry points: connect to the room server, then join rooms over that
//! connection.

use std::sync::Arc;

use tracing::warn;

use crate::config::{ClientConfig, RoomConfig};
use crate::data::{AuxiliaryConnector, WsAuxiliaryConnector};
use crate::error::Result;
use crate::media::{Devices, MediaConstraints, MediaDevices, MediaStream};
use crate::room::{self, RoomHandle, RoomInit};
use crate::rtc::webrtc_rs::WebRtcFactory;
use crate::rtc::PeerConnectionFactory;
use crate::signaling::ws::{DisconnectHandler, WsSignaling};
use crate::signaling::{JoinRequest, Signaling};

/// Capabilities every room on a connection is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub devices: Arc<dyn MediaDevices>,
    /// `None` runs rooms without an auxiliary duplex.
    pub auxiliary: Option<Arc<dyn AuxiliaryConnector>>,
}

pub struct Client {
    config: ClientConfig,
    collaborators: Collaborators,
    on_disconnect: Option<DisconnectHandler>,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn PeerConnectionFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let auxiliary: Arc<dyn AuxiliaryConnector> =
            Arc::new(WsAuxiliaryConnector::new(config.url.clone()));
        Self {
            config,
            collaborators: Collaborators {
                factory,
                devices,
                auxiliary: Some(auxiliary),
            },
            on_disconnect: None,
        }
    }

    /// A client negotiating with webrtc-rs.
    pub fn with_webrtc(config: ClientConfig, devices: Arc<dyn MediaDevices>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config, Arc::new(WebRtcFactory::new()), devices))
    }

    pub fn with_auxiliary(mut self, connector: Option<Arc<dyn AuxiliaryConnector>>) -> Self {
        self.collaborators.auxiliary = connector;
        self
    }

    /// Called whenever a signaling socket opened by [`Client::connect`] closes.
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens the signaling socket.
    pub async fn connect(&self) -> Result<Connection> {
        self.config.validate()?;
        let signaling =
            WsSignaling::connect(&self.config.socket_url(), self.on_disconnect.clone()).await?;
        Ok(Connection::new(
            Arc::new(signaling),
            self.config.clone(),
            self.collaborators.clone(),
        ))
    }

    pub async fn get_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        self.collaborators.devices.user_media(constraints).await
    }

    pub async fn get_devices(&self) -> Result<Devices> {
        let devices = self.collaborators.devices.enumerate_devices().await?;
        Ok(devices.into_iter().collect())
    }
}

/// An open signaling connection.
pub struct Connection {
    signaling: Arc<dyn Signaling>,
    config: ClientConfig,
    collaborators: Collaborators,
}

impl Connection {
    pub fn new(
        signaling: Arc<dyn Signaling>,
        config: ClientConfig,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            signaling,
            config,
            collaborators,
        }
    }

    /// Joins `room_id`, authorizing with `token`.
    ///
    /// Fails only if the join itself fails. A room whose auxiliary duplex
    /// can't be opened still joins, without that duplex.
    pub async fn join_room(
        &self,
        room_id: &str,
        token: &str,
        config: RoomConfig,
    ) -> Result<RoomHandle> {
        self.config.validate()?;
        let RoomConfig {
            display_name,
            callbacks,
        } = config;

        let channel = self
            .signaling
            .join(
                &format!("room:{room_id}"),
                JoinRequest {
                    display_name,
                    jwt: token.to_owned(),
                },
            )
            .await?;

        let auxiliary = match &self.collaborators.auxiliary {
            Some(connector) => match connector.connect(room_id, &channel.response.peer.id).await {
                Ok(auxiliary) => Some(auxiliary),
                Err(e) => {
                    warn!(room = room_id, "auxiliary channel unavailable: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(room::spawn(RoomInit {
            room_id: room_id.to_owned(),
            channel,
            config: self.config.clone(),
            callbacks,
            factory: Arc::clone(&self.collaborators.factory),
            devices: Arc::clone(&self.collaborators.devices),
            auxiliary,
        }))
    }
}
