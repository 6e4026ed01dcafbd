//! Signaling commands exchanged with the remote peer.
//!
//! The transport itself is an external collaborator: anything that delivers
//! [`SignalingMessage`]s in order and implements [`SignalingChannel`] for the
//! outgoing direction can drive a session.
//!
//! # Wire format
//!
//! Each message is a command tag (`OFFER`, `ANSWER`, `ICE`) plus a payload
//! string. SDP payloads are passed through untouched; ICE payloads use the
//! `$`-delimited encoding in [`ice`].

pub mod ice;
pub mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

pub use ice::{ICE_SEPARATOR, IceCandidateError, IceCandidateRecord};

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling channel disconnected")]
    Disconnected,

    #[error("unknown signaling command: {0}")]
    UnknownCommand(String),

    #[error("malformed ICE payload: {0}")]
    MalformedIce(#[from] IceCandidateError),
}

/// Command tag of a signaling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingType {
    Offer,
    Answer,
    Ice,
}

impl SignalingType {
    pub const ALL: [SignalingType; 3] = [Self::Offer, Self::Answer, Self::Ice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "OFFER",
            Self::Answer => "ANSWER",
            Self::Ice => "ICE",
        }
    }
}

impl fmt::Display for SignalingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalingType {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SignalingError::UnknownCommand(s.to_string()))
    }
}

/// A typed signaling command, consumed exactly once by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingCommand {
    Offer(String),
    Answer(String),
    /// Still-encoded candidate; decoding happens inside the session so a
    /// malformed payload only drops this one event.
    Ice(String),
}

impl SignalingCommand {
    pub fn signaling_type(&self) -> SignalingType {
        match self {
            Self::Offer(_) => SignalingType::Offer,
            Self::Answer(_) => SignalingType::Answer,
            Self::Ice(_) => SignalingType::Ice,
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Self::Offer(p) | Self::Answer(p) | Self::Ice(p) => p,
        }
    }

    pub fn into_message(self) -> SignalingMessage {
        let command = self.signaling_type().as_str().to_string();
        let payload = match self {
            Self::Offer(p) | Self::Answer(p) | Self::Ice(p) => p,
        };
        SignalingMessage { command, payload }
    }
}

/// Raw `(command, payload)` pair as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    pub command: String,
    pub payload: String,
}

impl SignalingMessage {
    pub fn new(command: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// Frame as a single text line: `"<TAG> <payload>"`.
    pub fn to_line(&self) -> String {
        format!("{} {}", self.command, self.payload)
    }

    /// Split a text line at the first space. A line without a space is a
    /// bare command with an empty payload.
    pub fn parse_line(line: &str) -> Self {
        match line.split_once(' ') {
            Some((command, payload)) => Self::new(command, payload),
            None => Self::new(line, ""),
        }
    }
}

impl TryFrom<SignalingMessage> for SignalingCommand {
    type Error = SignalingError;

    fn try_from(msg: SignalingMessage) -> Result<Self, Self::Error> {
        Ok(match msg.command.parse::<SignalingType>()? {
            SignalingType::Offer => Self::Offer(msg.payload),
            SignalingType::Answer => Self::Answer(msg.payload),
            SignalingType::Ice => Self::Ice(msg.payload),
        })
    }
}

/// Decodes the payload of an ICE command.
pub fn decode_ice(payload: &str) -> Result<IceCandidateRecord, SignalingError> {
    Ok(IceCandidateRecord::decode(payload)?)
}

/// Outgoing half of the signaling transport.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send_command(
        &self,
        command: SignalingType,
        payload: String,
    ) -> Result<(), SignalingError>;
}
