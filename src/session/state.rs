//! Session lifecycle state.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::media::{CameraFacing, PeerConnection, SdpType, VideoSource};
use crate::signaling::IceCandidateRecord;

/// Whether the screen showing the session is currently up.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub enum ScreenState {
    /// `start()` has never been called.
    #[default]
    Uninitialized,
    Ready { since: DateTime<Utc> },
    Destroyed { at: DateTime<Utc> },
}

impl ScreenState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Applies a transition. `ScreenReady` is only accepted when not already
    /// ready, `ScreenDestroyed` only when ready.
    pub fn apply_transition(
        &mut self,
        transition: ScreenTransition,
    ) -> Result<(), InvalidTransition> {
        let new_state = match (&*self, transition) {
            (Self::Uninitialized | Self::Destroyed { .. }, ScreenTransition::ScreenReady) => {
                Self::Ready { since: Utc::now() }
            }
            (Self::Ready { .. }, ScreenTransition::ScreenDestroyed) => {
                Self::Destroyed { at: Utc::now() }
            }
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        *self = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenTransition {
    ScreenReady,
    ScreenDestroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Offer/answer phase of the peer connection.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq, Eq)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

impl SignalingState {
    pub fn after_local(kind: SdpType) -> Self {
        match kind {
            SdpType::Offer => Self::HaveLocalOffer,
            SdpType::Answer => Self::Stable,
        }
    }

    pub fn after_remote(kind: SdpType) -> Self {
        match kind {
            SdpType::Offer => Self::HaveRemoteOffer,
            SdpType::Answer => Self::Stable,
        }
    }
}

/// The single peer connection and its negotiation bookkeeping.
pub struct Session {
    pub peer_connection: Arc<dyn PeerConnection>,
    pub created_at: DateTime<Utc>,
    pub signaling_state: SignalingState,
    remote_description_applied: bool,
    pending_ice: VecDeque<IceCandidateRecord>,
    offer_in_flight: bool,
    renegotiation_pending: bool,
}

impl Session {
    pub fn new(peer_connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer_connection,
            created_at: Utc::now(),
            signaling_state: SignalingState::Stable,
            remote_description_applied: false,
            pending_ice: VecDeque::new(),
            offer_in_flight: false,
            renegotiation_pending: false,
        }
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_applied
    }

    /// Candidates that arrive before any remote description are held here.
    pub fn buffer_ice(&mut self, candidate: IceCandidateRecord) {
        self.pending_ice.push_back(candidate);
    }

    pub fn pending_ice_len(&self) -> usize {
        self.pending_ice.len()
    }

    /// Claims the offer slot. While another offer is between create-offer
    /// and its OFFER being sent this returns `false` and records that one
    /// more offer is wanted.
    pub fn begin_offer(&mut self) -> bool {
        if self.offer_in_flight {
            self.renegotiation_pending = true;
            return false;
        }
        self.offer_in_flight = true;
        true
    }

    /// Releases the offer slot. Returns whether an offer was requested while
    /// it was held.
    pub fn finish_offer(&mut self) -> bool {
        self.offer_in_flight = false;
        std::mem::take(&mut self.renegotiation_pending)
    }

    pub fn offer_in_flight(&self) -> bool {
        self.offer_in_flight
    }

    /// Marks the remote description as applied and hands back everything
    /// buffered so far, oldest first.
    pub fn mark_remote_applied(&mut self) -> Vec<IceCandidateRecord> {
        self.remote_description_applied = true;
        self.pending_ice.drain(..).collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("created_at", &self.created_at)
            .field("signaling_state", &self.signaling_state)
            .field("remote_description_applied", &self.remote_description_applied)
            .field("pending_ice", &self.pending_ice.len())
            .field("offer_in_flight", &self.offer_in_flight)
            .finish()
    }
}

/// Point-in-time view of the session, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub screen: ScreenState,
    /// `None` until the peer connection has been created.
    pub signaling: Option<SignalingState>,
    pub active_source: Option<VideoSource>,
    pub default_facing: CameraFacing,
    pub remote_track_retained: bool,
    pub pending_ice: usize,
    pub offer_in_flight: bool,
    pub session_created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_lifecycle() {
        let mut state = ScreenState::default();
        assert!(!state.is_ready());

        state.apply_transition(ScreenTransition::ScreenReady).unwrap();
        assert!(state.is_ready());

        state.apply_transition(ScreenTransition::ScreenDestroyed).unwrap();
        assert!(matches!(state, ScreenState::Destroyed { .. }));

        state.apply_transition(ScreenTransition::ScreenReady).unwrap();
        assert!(state.is_ready());
    }

    #[test]
    fn test_ready_twice_is_rejected() {
        let mut state = ScreenState::default();
        state.apply_transition(ScreenTransition::ScreenReady).unwrap();

        let err = state
            .apply_transition(ScreenTransition::ScreenReady)
            .unwrap_err();
        assert_eq!(err.attempted, "ScreenReady");
        assert!(err.current_state.starts_with("Ready"));
        assert!(state.is_ready());
    }

    #[test]
    fn test_destroy_without_ready_is_rejected() {
        let mut state = ScreenState::default();
        assert!(
            state
                .apply_transition(ScreenTransition::ScreenDestroyed)
                .is_err()
        );
        assert_eq!(state, ScreenState::Uninitialized);
    }

    #[test]
    fn test_overlapping_offers_are_coalesced() {
        let pc: Arc<dyn PeerConnection> = Arc::new(
            crate::test_utils::RecordingEngine::new().recording_peer_connection(),
        );
        let mut session = Session::new(pc);

        assert!(session.begin_offer());
        assert!(!session.begin_offer());
        assert!(!session.begin_offer());
        assert!(session.offer_in_flight());

        // Two requests while busy still make only one follow-up offer.
        assert!(session.finish_offer());
        assert!(!session.offer_in_flight());
        assert!(session.begin_offer());
        assert!(!session.finish_offer());
    }

    #[test]
    fn test_signaling_state_follows_descriptions() {
        assert_eq!(
            SignalingState::after_local(SdpType::Offer),
            SignalingState::HaveLocalOffer
        );
        assert_eq!(
            SignalingState::after_remote(SdpType::Offer),
            SignalingState::HaveRemoteOffer
        );
        assert_eq!(SignalingState::after_local(SdpType::Answer), SignalingState::Stable);
        assert_eq!(SignalingState::after_remote(SdpType::Answer), SignalingState::Stable);
    }
}
