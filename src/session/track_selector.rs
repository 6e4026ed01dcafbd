//! Local video source policy.
//!
//! At most one local track is attached at any time. Switching detaches the
//! old track before the new one is attached, so observers never see two
//! senders on the connection. The new track is created before anything is
//! detached, and the old one is put back if the new one cannot be attached.

use log::{debug, info, warn};
use thiserror::Error;

use super::events::TrackEvents;
use crate::media::{
    CameraFacing, LocalTrack, MediaEngine, MediaError, PeerConnection, TrackSender, VideoSource,
};

struct AttachedTrack {
    track: LocalTrack,
    sender: TrackSender,
}

/// Holds the attached local track, if any.
#[derive(Default)]
pub struct LocalTrackSlot {
    attached: Option<AttachedTrack>,
}

impl LocalTrackSlot {
    pub fn source(&self) -> Option<VideoSource> {
        self.attached.as_ref().map(|a| a.track.source)
    }

    pub fn track(&self) -> Option<&LocalTrack> {
        self.attached.as_ref().map(|a| &a.track)
    }
}

/// A failed [`TrackSelector::activate`].
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ActivateError {
    pub source: MediaError,
    /// The set of senders on the connection changed before the failure, so
    /// the remote side needs a new offer.
    pub connection_changed: bool,
}

impl ActivateError {
    fn unchanged(source: MediaError) -> Self {
        Self {
            source,
            connection_changed: false,
        }
    }
}

pub struct TrackSelector {
    slot: LocalTrackSlot,
    default_facing: CameraFacing,
}

impl TrackSelector {
    pub fn new(default_facing: CameraFacing) -> Self {
        Self {
            slot: LocalTrackSlot::default(),
            default_facing,
        }
    }

    pub fn current_source(&self) -> Option<VideoSource> {
        self.slot.source()
    }

    pub fn current_track(&self) -> Option<&LocalTrack> {
        self.slot.track()
    }

    pub fn default_facing(&self) -> CameraFacing {
        self.default_facing
    }

    /// Replaces the attached track with a new one for `source`, or for the
    /// default camera when `source` is `None`, and publishes it.
    pub async fn activate(
        &mut self,
        pc: &dyn PeerConnection,
        engine: &dyn MediaEngine,
        source: Option<VideoSource>,
        events: &TrackEvents,
    ) -> Result<LocalTrack, ActivateError> {
        let source = source.unwrap_or_else(|| self.default_facing.into());

        let track = engine
            .create_local_track(source)
            .await
            .map_err(ActivateError::unchanged)?;

        let previous = self.detach(pc).await.map_err(ActivateError::unchanged)?;

        let sender = match pc.add_track(&track).await {
            Ok(sender) => sender,
            Err(e) => {
                let connection_changed = previous.is_some();
                if let Some(previous) = previous {
                    self.restore(pc, previous).await;
                }
                return Err(ActivateError {
                    source: e,
                    connection_changed,
                });
            }
        };
        info!("Attached {} track {}", source, track.id);

        self.slot.attached = Some(AttachedTrack {
            track: track.clone(),
            sender,
        });
        // No subscribers is fine.
        let _ = events.local_track_available.send(track.clone());
        Ok(track)
    }

    /// Detaches the current track. The default facing is left alone.
    pub async fn deactivate_all(&mut self, pc: &dyn PeerConnection) -> Result<(), MediaError> {
        self.detach(pc).await.map(|_| ())
    }

    /// Removes the attached track from the connection and hands it back. On
    /// failure the track stays attached.
    async fn detach(&mut self, pc: &dyn PeerConnection) -> Result<Option<LocalTrack>, MediaError> {
        let Some(attached) = self.slot.attached.take() else {
            return Ok(None);
        };
        if let Err(e) = pc.remove_track(&attached.sender).await {
            self.slot.attached = Some(attached);
            return Err(e);
        }
        info!("Detached {} track {}", attached.track.source, attached.track.id);
        Ok(Some(attached.track))
    }

    /// Re-attaches a track that was detached for a switch that failed.
    async fn restore(&mut self, pc: &dyn PeerConnection, track: LocalTrack) {
        match pc.add_track(&track).await {
            Ok(sender) => {
                info!("Restored {} track {}", track.source, track.id);
                self.slot.attached = Some(AttachedTrack { track, sender });
            }
            Err(e) => warn!("Could not restore {} track {}: {}", track.source, track.id, e),
        }
    }

    pub fn toggle_default_source(&mut self) {
        self.default_facing = self.default_facing.toggled();
        debug!("Default camera is now {:?}", self.default_facing);
    }
}
