//! Session negotiation.
//!
//! A [`NegotiationCore`] owns one peer connection for the lifetime of a call
//! screen. All signaling, media engine events and user requests funnel into a
//! single worker task, which drives the offer/answer/ICE exchange and keeps at
//! most one local video track attached.

pub mod core;
pub mod error;
pub mod events;
pub mod state;
pub mod track_selector;
mod worker;

pub use self::core::NegotiationCore;
pub use error::SessionError;
pub use events::{NegotiationFailure, NegotiationStep, TrackEvents};
pub use state::{
    InvalidTransition, ScreenState, ScreenTransition, Session, SessionSnapshot, SignalingState,
};
pub use track_selector::{ActivateError, LocalTrackSlot, TrackSelector};
