use std::sync::Arc;

use log::debug;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::SessionError;
use super::events::{NegotiationFailure, TrackEvents};
use super::state::SessionSnapshot;
use super::worker::{NegotiationWorker, WorkerCommand};
use crate::config::SessionConfig;
use crate::media::{LocalTrack, MediaEngine, RemoteTrack, VideoSource};
use crate::signaling::{SignalingChannel, SignalingCommand, SignalingMessage};

/// Handle to a running negotiation session.
///
/// Cloning is cheap; every clone talks to the same worker. The worker stops
/// on [`shutdown`](Self::shutdown) or once every handle is dropped.
#[derive(Clone)]
pub struct NegotiationCore {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    events: Arc<TrackEvents>,
}

impl NegotiationCore {
    /// Spawns the worker on the current tokio runtime. No peer connection is
    /// created until it is first needed.
    pub fn spawn(
        engine: Arc<dyn MediaEngine>,
        signaling: Arc<dyn SignalingChannel>,
        config: SessionConfig,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let events = Arc::new(TrackEvents::with_capacity(config.event_channel_capacity));

        let mut worker = NegotiationWorker::new(
            command_rx,
            commands.downgrade(),
            engine,
            signaling,
            events.clone(),
            config,
        );
        tokio::spawn(async move { worker.run().await });

        Self { commands, events }
    }

    /// Forwards every message from an ordered signaling transport into the
    /// session until the transport closes.
    pub fn attach_signaling(&self, mut incoming: mpsc::Receiver<SignalingMessage>) -> JoinHandle<()> {
        let commands = self.commands.downgrade();
        tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                let Some(commands) = commands.upgrade() else {
                    break;
                };
                match SignalingCommand::try_from(message) {
                    Ok(command) => {
                        if commands.send(WorkerCommand::Signal(command)).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Ignoring signaling message: {}", e),
                }
            }
            debug!("Signaling transport closed");
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Marks the screen ready, replays a saved remote track, attaches the
    /// default camera and sends an offer.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(WorkerCommand::Start).await?
    }

    /// Detaches the local track and flips the default camera for the next
    /// `start()`. Does nothing if the screen is not ready.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(WorkerCommand::Stop).await?
    }

    /// Returns `false` if `target` was already active, in which case no offer
    /// is sent.
    pub async fn switch_source(&self, target: VideoSource) -> Result<bool, SessionError> {
        self.request(|reply| WorkerCommand::SwitchSource(target, reply))
            .await?
    }

    pub async fn renegotiate(&self) -> Result<(), SessionError> {
        self.request(WorkerCommand::Renegotiate).await?
    }

    /// Queues an incoming signaling command behind everything already queued.
    pub fn handle_incoming_signal(&self, command: SignalingCommand) -> Result<(), SessionError> {
        self.commands
            .send(WorkerCommand::Signal(command))
            .map_err(|_| SessionError::Closed)
    }

    pub fn subscribe_local(&self) -> broadcast::Receiver<LocalTrack> {
        self.events.local_track_available.subscribe()
    }

    pub fn subscribe_remote(&self) -> broadcast::Receiver<RemoteTrack> {
        self.events.remote_track_available.subscribe()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<NegotiationFailure> {
        self.events.negotiation_failed.subscribe()
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(WorkerCommand::Snapshot).await
    }

    /// Detaches the local track, closes the peer connection and stops the
    /// worker. Later calls on any handle return [`SessionError::Closed`].
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(WorkerCommand::Shutdown).await
    }
}
