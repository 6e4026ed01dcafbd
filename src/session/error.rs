//! Session error types.

use thiserror::Error;

use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer connection could not be created. Nothing else can proceed.
    #[error("failed to create peer connection: {0}")]
    PeerConnection(#[source] MediaError),

    #[error("invalid session state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("session is not started")]
    NotReady,

    #[error("media engine error: {0}")]
    Media(#[from] MediaError),

    #[error("session worker has stopped")]
    Closed,
}
