//! Client and room configuration.
//!
//! [`ClientConfig`] deserializes from any serde source and can be loaded from
//! `ROOM_CLIENT_*` environment variables. [`RoomConfig`] carries what a single
//! join needs: the display name and the application callbacks.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::callbacks::RoomCallbacks;
use crate::error::{Error, Result};

pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

pub const DEFAULT_AUDIO_LEVEL_INTERVAL: Duration = Duration::from_millis(100);

pub const DEFAULT_RETRY_JOIN_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "room-data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the room server, e.g. `wss://rooms.example.com`.
    pub url: String,

    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,

    #[serde(default = "default_audio_level_interval", with = "humantime_serde")]
    pub audio_level_interval: Duration,

    /// Delay before re-issuing a subscription the server asked us to retry.
    #[serde(default = "default_retry_join_delay", with = "humantime_serde")]
    pub retry_join_delay: Duration,

    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_ICE_SERVER.to_owned()]
}

fn default_audio_level_interval() -> Duration {
    DEFAULT_AUDIO_LEVEL_INTERVAL
}

fn default_retry_join_delay() -> Duration {
    DEFAULT_RETRY_JOIN_DELAY
}

fn default_data_channel_label() -> String {
    DEFAULT_DATA_CHANNEL_LABEL.to_owned()
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ice_servers: default_ice_servers(),
            audio_level_interval: DEFAULT_AUDIO_LEVEL_INTERVAL,
            retry_join_delay: DEFAULT_RETRY_JOIN_DELAY,
            data_channel_label: default_data_channel_label(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let url = vars
            .get("ROOM_CLIENT_URL")
            .cloned()
            .ok_or_else(|| Error::Config("missing ROOM_CLIENT_URL".to_owned()))?;

        let mut config = Self::new(url);

        if let Some(servers) = vars.get("ROOM_CLIENT_ICE_SERVERS") {
            config.ice_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }

        if let Some(interval) = vars.get("ROOM_CLIENT_AUDIO_LEVEL_INTERVAL") {
            config.audio_level_interval = parse_duration("ROOM_CLIENT_AUDIO_LEVEL_INTERVAL", interval)?;
        }

        if let Some(delay) = vars.get("ROOM_CLIENT_RETRY_JOIN_DELAY") {
            config.retry_join_delay = parse_duration("ROOM_CLIENT_RETRY_JOIN_DELAY", delay)?;
        }

        if let Some(label) = vars.get("ROOM_CLIENT_DATA_CHANNEL_LABEL") {
            config.data_channel_label = label.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values a room can't run with. Joining calls this, so a config
    /// built by hand or deserialized is held to the same rules as the env.
    pub fn validate(&self) -> Result<()> {
        if self.audio_level_interval.is_zero() {
            return Err(Error::Config(
                "audio level interval must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Signaling socket endpoint.
    pub fn socket_url(&self) -> String {
        format!("{}/socket/websocket", self.url.trim_end_matches('/'))
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("invalid {name} {value:?}: {e}")))
}

/// Per-join configuration.
#[derive(Debug, Default)]
pub struct RoomConfig {
    pub display_name: String,
    pub callbacks: RoomCallbacks,
}

impl RoomConfig {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            callbacks: RoomCallbacks::default(),
        }
    }

    pub fn callbacks(mut self, callbacks: RoomCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}
