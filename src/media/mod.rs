//! Media engine collaborator.
//!
//! The negotiation core never touches capture, codecs or transports directly.
//! It drives a [`MediaEngine`] that hands out a single [`PeerConnection`] and
//! local video tracks, and listens to the [`MediaEvent`]s the connection
//! reports back through a [`MediaEventSender`].

pub mod webrtc;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signaling::IceCandidateRecord;

pub use self::webrtc::WebRtcMediaEngine;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] ::webrtc::Error),

    #[error("track {0} is not attached")]
    UnknownTrack(String),

    #[error("track handle does not belong to this engine")]
    ForeignHandle,

    #[error("media engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Source a local video track is captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoSource {
    FrontCamera,
    BackCamera,
    File,
}

impl VideoSource {
    pub fn track_id_prefix(&self) -> &'static str {
        match self {
            Self::FrontCamera => "FrontCameraVideo",
            Self::BackCamera => "BackCameraVideo",
            Self::File => "VideoFile",
        }
    }

    /// A fresh, globally unique track id for this source.
    pub fn new_track_id(&self) -> String {
        format!("{}{}", self.track_id_prefix(), uuid::Uuid::new_v4())
    }
}

impl fmt::Display for VideoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FrontCamera => "front camera",
            Self::BackCamera => "back camera",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

/// Camera used when a source is activated without an explicit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    pub fn toggled(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl From<CameraFacing> for VideoSource {
    fn from(facing: CameraFacing) -> Self {
        match facing {
            CameraFacing::Front => VideoSource::FrontCamera,
            CameraFacing::Back => VideoSource::BackCamera,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Engine-specific object behind a track or sender handle.
pub type NativeHandle = Arc<dyn Any + Send + Sync>;

fn downcast_handle<T: Any + Send + Sync>(handle: &Option<NativeHandle>) -> Option<Arc<T>> {
    handle.clone()?.downcast::<T>().ok()
}

/// A local video track, not yet or currently attached to a peer connection.
#[derive(Clone)]
pub struct LocalTrack {
    pub id: String,
    pub source: VideoSource,
    native: Option<NativeHandle>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, source: VideoSource) -> Self {
        Self {
            id: id.into(),
            source,
            native: None,
        }
    }

    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }

    pub fn native<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        downcast_handle(&self.native)
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// A track received from the remote peer.
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    native: Option<NativeHandle>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            native: None,
        }
    }

    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }

    pub fn native<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        downcast_handle(&self.native)
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Returned by [`PeerConnection::add_track`]; needed to detach the track again.
#[derive(Clone)]
pub struct TrackSender {
    pub track_id: String,
    native: Option<NativeHandle>,
}

impl TrackSender {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            native: None,
        }
    }

    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }

    pub fn native<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        downcast_handle(&self.native)
    }
}

impl fmt::Debug for TrackSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackSender")
            .field("track_id", &self.track_id)
            .finish_non_exhaustive()
    }
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    IceCandidate(IceCandidateRecord),
    TrackAdded(RemoteTrack),
    TrackRemoved { track_id: String },
    RenegotiationNeeded,
}

/// Sink the peer connection reports [`MediaEvent`]s into.
///
/// Events land in the same queue as every other session command, so they are
/// processed in arrival order relative to signaling and user requests.
#[derive(Clone)]
pub struct MediaEventSender {
    sink: Arc<dyn Fn(MediaEvent) -> bool + Send + Sync>,
}

impl MediaEventSender {
    pub fn new(sink: impl Fn(MediaEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Returns `false` once the session has gone away.
    pub fn emit(&self, event: MediaEvent) -> bool {
        (self.sink)(event)
    }
}

impl fmt::Debug for MediaEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MediaEventSender")
    }
}

/// The single peer connection of a session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn add_track(&self, track: &LocalTrack) -> Result<TrackSender, MediaError>;

    async fn remove_track(&self, sender: &TrackSender) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), MediaError>;

    /// Human-readable transport statistics, if the engine collects any.
    async fn stats_summary(&self) -> Option<String> {
        None
    }

    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_peer_connection(
        &self,
        events: MediaEventSender,
    ) -> Result<Arc<dyn PeerConnection>, MediaError>;

    async fn create_local_track(&self, source: VideoSource) -> Result<LocalTrack, MediaError>;
}
