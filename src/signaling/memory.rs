//! In-process signaling transport.
//!
//! [`pair`] returns two endpoints cross-wired through tokio channels, so
//! whatever one side sends arrives in order on the other side's receiver.

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use super::{SignalingChannel, SignalingError, SignalingMessage, SignalingType};

const CHANNEL_CAPACITY: usize = 100;

/// Sending half of one endpoint of an in-memory signaling link.
#[derive(Debug, Clone)]
pub struct MemorySignaling {
    name: String,
    peer_tx: mpsc::Sender<SignalingMessage>,
}

impl MemorySignaling {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl SignalingChannel for MemorySignaling {
    async fn send_command(
        &self,
        command: SignalingType,
        payload: String,
    ) -> Result<(), SignalingError> {
        debug!(target: "Signaling/Memory", "{} -> {} ({} bytes)", self.name, command, payload.len());
        self.peer_tx
            .send(SignalingMessage::new(command.as_str(), payload))
            .await
            .map_err(|_| SignalingError::Disconnected)
    }
}

pub type Endpoint = (MemorySignaling, mpsc::Receiver<SignalingMessage>);

/// Creates two connected endpoints named `a` and `b`.
pub fn pair(a: &str, b: &str) -> (Endpoint, Endpoint) {
    let (to_a, from_b) = mpsc::channel(CHANNEL_CAPACITY);
    let (to_b, from_a) = mpsc::channel(CHANNEL_CAPACITY);

    let left = MemorySignaling {
        name: a.to_string(),
        peer_tx: to_b,
    };
    let right = MemorySignaling {
        name: b.to_string(),
        peer_tx: to_a,
    };
    ((left, from_b), (right, from_a))
}
