use std::fmt;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::media::{LocalTrack, RemoteTrack};

macro_rules! define_track_events {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Broadcast streams observers subscribe to. Late subscribers only see
        /// events sent after they subscribed.
        #[derive(Debug)]
        pub struct TrackEvents {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl TrackEvents {
            pub fn with_capacity(capacity: usize) -> Self {
                Self {
                    $(
                        $field: broadcast::channel(capacity).0,
                    )*
                }
            }
        }
    };
}

define_track_events! {
    (local_track_available, LocalTrack),
    (remote_track_available, RemoteTrack),
    (negotiation_failed, NegotiationFailure),
}

/// Engine or transport step that can fail without ending the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NegotiationStep {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    AttachTrack,
    DetachTrack,
    SendSignal,
}

impl fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateOffer => "create offer",
            Self::CreateAnswer => "create answer",
            Self::SetLocalDescription => "set local description",
            Self::SetRemoteDescription => "set remote description",
            Self::AddIceCandidate => "add ICE candidate",
            Self::AttachTrack => "attach track",
            Self::DetachTrack => "detach track",
            Self::SendSignal => "send signal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiationFailure {
    pub step: NegotiationStep,
    pub reason: String,
}

impl NegotiationFailure {
    pub fn new(step: NegotiationStep, reason: impl fmt::Display) -> Self {
        Self {
            step,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for NegotiationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.step, self.reason)
    }
}
