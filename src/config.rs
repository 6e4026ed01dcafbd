//! Session configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::CameraFacing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A STUN or TURN server handed to the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }
}

/// Capture constraints applied when the engine opens a video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServerConfig>,
    pub capture: CaptureConstraints,
    /// Always negotiate a receive video section, even with no local track.
    pub offer_to_receive_video: bool,
    /// Delay before a retained remote track is delivered to subscribers,
    /// so the rendering surface has time to initialize.
    pub remote_track_replay_delay_ms: u64,
    /// Camera used by the first `start()`; flipped on every `stop()`.
    pub initial_facing: CameraFacing,
    /// Buffer size of each broadcast stream.
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            capture: CaptureConstraints::default(),
            offer_to_receive_video: true,
            remote_track_replay_delay_ms: 100,
            initial_facing: CameraFacing::Back,
            event_channel_capacity: 100,
        }
    }
}

impl SessionConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Config without any STUN/TURN servers, for host-only local sessions.
    pub fn local_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            ..Self::default()
        }
    }

    pub fn remote_track_replay_delay(&self) -> Duration {
        Duration::from_millis(self.remote_track_replay_delay_ms)
    }
}

fn default_ice_servers() -> Vec<IceServerConfig> {
    let mut servers = vec![IceServerConfig::stun("stun:stun.l.google.com:19302")];
    for i in 1..=6 {
        servers.push(IceServerConfig::stun(&format!(
            "stun:stun{i}.l.google.com:19302"
        )));
    }
    servers.push(IceServerConfig::stun("stun:relay.metered.ca:80"));
    servers.push(IceServerConfig::turn(
        "turn:openrelay.metered.ca:80",
        "openrelayproject",
        "openrelayproject",
    ));
    servers
}
