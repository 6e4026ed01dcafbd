//! The serialized negotiation actor.
//!
//! Every state mutation happens inside [`NegotiationWorker::run`], one
//! command at a time in arrival order. Media engine calls that complete
//! asynchronously (create offer/answer, set local/remote description) run in
//! spawned tasks and post their result back as a [`Completion`], so the loop
//! never waits on them.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use super::error::SessionError;
use super::events::{NegotiationFailure, NegotiationStep, TrackEvents};
use super::state::{ScreenState, ScreenTransition, Session, SessionSnapshot, SignalingState};
use super::track_selector::TrackSelector;
use crate::config::SessionConfig;
use crate::media::{
    MediaEngine, MediaError, MediaEvent, MediaEventSender, PeerConnection, RemoteTrack, SdpType,
    SessionDescription, TrackKind, VideoSource,
};
use crate::signaling::{
    self, IceCandidateRecord, SignalingChannel, SignalingCommand, SignalingType,
};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

pub(crate) enum WorkerCommand {
    Start(Reply<()>),
    Stop(Reply<()>),
    SwitchSource(VideoSource, Reply<bool>),
    Renegotiate(Reply<()>),
    Signal(SignalingCommand),
    Media(MediaEvent),
    Completion(Completion),
    /// Fires after the replay delay of a remote track.
    DeliverRemoteTrack { track_id: String, seq: u64 },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) enum Completion {
    OfferCreated(Result<SessionDescription, MediaError>),
    AnswerCreated(Result<SessionDescription, MediaError>),
    LocalDescriptionSet(SessionDescription, Result<(), MediaError>),
    RemoteDescriptionSet(SdpType, Result<(), MediaError>),
}

type Inbox = mpsc::WeakUnboundedSender<WorkerCommand>;

fn post(inbox: &Inbox, command: WorkerCommand) {
    if let Some(tx) = inbox.upgrade() {
        let _ = tx.send(command);
    }
}

pub(crate) struct NegotiationWorker {
    command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    inbox: Inbox,

    engine: Arc<dyn MediaEngine>,
    signaling: Arc<dyn SignalingChannel>,
    events: Arc<TrackEvents>,
    config: SessionConfig,

    session: Option<Session>,
    screen: ScreenState,
    selector: TrackSelector,
    remote_track: Option<RemoteTrack>,
    /// Only the most recently scheduled delivery may publish.
    remote_delivery: u64,
}

impl NegotiationWorker {
    pub(crate) fn new(
        command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
        inbox: Inbox,
        engine: Arc<dyn MediaEngine>,
        signaling: Arc<dyn SignalingChannel>,
        events: Arc<TrackEvents>,
        config: SessionConfig,
    ) -> Self {
        Self {
            command_rx,
            inbox,
            engine,
            signaling,
            events,
            selector: TrackSelector::new(config.initial_facing),
            config,
            session: None,
            screen: ScreenState::default(),
            remote_track: None,
            remote_delivery: 0,
        }
    }

    pub(crate) async fn run(&mut self) {
        info!("NegotiationWorker started");
        while let Some(command) = self.command_rx.recv().await {
            match command {
                WorkerCommand::Start(reply) => {
                    let _ = reply.send(self.start().await);
                }
                WorkerCommand::Stop(reply) => {
                    let _ = reply.send(self.stop().await);
                }
                WorkerCommand::SwitchSource(target, reply) => {
                    let _ = reply.send(self.switch_source(target).await);
                }
                WorkerCommand::Renegotiate(reply) => {
                    let _ = reply.send(self.send_offer().await);
                }
                WorkerCommand::Signal(command) => self.handle_signal(command).await,
                WorkerCommand::Media(event) => self.handle_media_event(event).await,
                WorkerCommand::Completion(completion) => {
                    self.handle_completion(completion).await
                }
                WorkerCommand::DeliverRemoteTrack { track_id, seq } => {
                    self.deliver_remote_track(&track_id, seq)
                }
                WorkerCommand::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                WorkerCommand::Shutdown(reply) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        info!("NegotiationWorker stopped");
    }

    /// Returns the peer connection, creating the session on first use.
    async fn ensure_session(&mut self) -> Result<Arc<dyn PeerConnection>, SessionError> {
        if let Some(session) = &self.session {
            return Ok(session.peer_connection.clone());
        }

        let inbox = self.inbox.clone();
        let events = MediaEventSender::new(move |event| {
            inbox
                .upgrade()
                .is_some_and(|tx| tx.send(WorkerCommand::Media(event)).is_ok())
        });
        let pc = self
            .engine
            .create_peer_connection(events)
            .await
            .map_err(|e| {
                error!("Failed to create peer connection: {}", e);
                SessionError::PeerConnection(e)
            })?;

        info!("Session created");
        self.session = Some(Session::new(pc.clone()));
        Ok(pc)
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        let pc = self.ensure_session().await?;
        self.screen.apply_transition(ScreenTransition::ScreenReady)?;
        info!("Screen ready");

        if let Some(track) = self.remote_track.clone() {
            debug!("Replaying saved remote track {}", track.id);
            self.publish_remote_track(track);
        }

        if let Err(e) = self
            .selector
            .activate(pc.as_ref(), self.engine.as_ref(), None, &self.events)
            .await
        {
            self.report(NegotiationStep::AttachTrack, e);
        }

        self.send_offer().await
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if self.screen.is_ready() {
            if let Some(session) = &self.session {
                let pc = session.peer_connection.clone();
                if let Err(e) = self.selector.deactivate_all(pc.as_ref()).await {
                    self.report(NegotiationStep::DetachTrack, e);
                }
            }
            self.screen
                .apply_transition(ScreenTransition::ScreenDestroyed)?;
            info!("Screen destroyed");
        } else {
            debug!("stop() while screen is {:?}, no track to detach", self.screen);
        }
        self.selector.toggle_default_source();
        Ok(())
    }

    async fn switch_source(&mut self, target: VideoSource) -> Result<bool, SessionError> {
        if !self.screen.is_ready() {
            return Err(SessionError::NotReady);
        }
        if self.selector.current_source() == Some(target) {
            debug!("Already on {}, not switching", target);
            return Ok(false);
        }

        let pc = self.ensure_session().await?;
        match self
            .selector
            .activate(pc.as_ref(), self.engine.as_ref(), Some(target), &self.events)
            .await
        {
            Ok(_) => {
                self.send_offer().await?;
                Ok(true)
            }
            Err(e) => {
                if e.connection_changed {
                    warn!("Switch to {} failed after detaching, renegotiating", target);
                    self.send_offer().await?;
                }
                Err(SessionError::Media(e.source))
            }
        }
    }

    /// Starts a new offer. The OFFER is sent once the local description has
    /// been committed. At most one offer is in flight; requests made
    /// meanwhile collapse into a single follow-up offer.
    async fn send_offer(&mut self) -> Result<(), SessionError> {
        let pc = self.ensure_session().await?;
        if let Some(session) = self.session.as_mut()
            && !session.begin_offer()
        {
            debug!("Offer already in flight, queueing renegotiation");
            return Ok(());
        }
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = pc.create_offer().await;
            post(
                &inbox,
                WorkerCommand::Completion(Completion::OfferCreated(result)),
            );
        });
        Ok(())
    }

    async fn handle_signal(&mut self, command: SignalingCommand) {
        debug!(
            "<- {} ({} bytes)",
            command.signaling_type(),
            command.payload().len()
        );

        let pc = match self.ensure_session().await {
            Ok(pc) => pc,
            Err(e) => {
                error!("Dropping {}: {}", command.signaling_type(), e);
                return;
            }
        };

        match command {
            SignalingCommand::Offer(sdp) => {
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let result = pc.set_remote_description(SessionDescription::offer(sdp)).await;
                    post(
                        &inbox,
                        WorkerCommand::Completion(Completion::RemoteDescriptionSet(
                            SdpType::Offer,
                            result,
                        )),
                    );
                    let answer = pc.create_answer().await;
                    post(
                        &inbox,
                        WorkerCommand::Completion(Completion::AnswerCreated(answer)),
                    );
                });
            }
            SignalingCommand::Answer(sdp) => {
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let result = pc
                        .set_remote_description(SessionDescription::answer(sdp))
                        .await;
                    post(
                        &inbox,
                        WorkerCommand::Completion(Completion::RemoteDescriptionSet(
                            SdpType::Answer,
                            result,
                        )),
                    );
                });
            }
            SignalingCommand::Ice(payload) => match signaling::decode_ice(&payload) {
                Ok(candidate) => self.apply_remote_candidate(pc, candidate).await,
                Err(e) => warn!("Dropping ICE payload {:?}: {}", payload, e),
            },
        }
    }

    async fn apply_remote_candidate(
        &mut self,
        pc: Arc<dyn PeerConnection>,
        candidate: IceCandidateRecord,
    ) {
        if let Some(session) = self.session.as_mut()
            && !session.has_remote_description()
        {
            debug!("No remote description yet, buffering ICE candidate");
            session.buffer_ice(candidate);
            return;
        }
        if let Err(e) = pc.add_ice_candidate(candidate).await {
            self.report(NegotiationStep::AddIceCandidate, e);
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        let Some(pc) = self.session.as_ref().map(|s| s.peer_connection.clone()) else {
            return;
        };

        match completion {
            Completion::OfferCreated(Ok(offer)) => {
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    if let Some(stats) = pc.stats_summary().await {
                        debug!("Stats before offer: {}", stats);
                    }
                    let result = pc.set_local_description(offer.clone()).await;
                    post(
                        &inbox,
                        WorkerCommand::Completion(Completion::LocalDescriptionSet(offer, result)),
                    );
                });
            }
            Completion::OfferCreated(Err(e)) => {
                self.report(NegotiationStep::CreateOffer, e);
                self.finish_offer().await;
            }
            Completion::AnswerCreated(Ok(answer)) => {
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let result = pc.set_local_description(answer.clone()).await;
                    post(
                        &inbox,
                        WorkerCommand::Completion(Completion::LocalDescriptionSet(answer, result)),
                    );
                });
            }
            Completion::AnswerCreated(Err(e)) => self.report(NegotiationStep::CreateAnswer, e),
            Completion::LocalDescriptionSet(desc, Ok(())) => {
                self.set_signaling_state(SignalingState::after_local(desc.kind));
                match desc.kind {
                    SdpType::Offer => {
                        self.send(SignalingType::Offer, desc.sdp).await;
                        self.finish_offer().await;
                    }
                    SdpType::Answer => self.send(SignalingType::Answer, desc.sdp).await,
                }
            }
            Completion::LocalDescriptionSet(desc, Err(e)) => {
                self.report(NegotiationStep::SetLocalDescription, e);
                if desc.kind == SdpType::Offer {
                    self.finish_offer().await;
                }
            }
            Completion::RemoteDescriptionSet(kind, Ok(())) => {
                self.set_signaling_state(SignalingState::after_remote(kind));
                let pending = self
                    .session
                    .as_mut()
                    .map(Session::mark_remote_applied)
                    .unwrap_or_default();
                if !pending.is_empty() {
                    debug!("Applying {} buffered ICE candidates", pending.len());
                }
                for candidate in pending {
                    if let Err(e) = pc.add_ice_candidate(candidate).await {
                        self.report(NegotiationStep::AddIceCandidate, e);
                    }
                }
            }
            Completion::RemoteDescriptionSet(_, Err(e)) => {
                self.report(NegotiationStep::SetRemoteDescription, e)
            }
        }
    }

    async fn finish_offer(&mut self) {
        if self.session.as_mut().is_some_and(Session::finish_offer) {
            debug!("Sending queued renegotiation");
            if let Err(e) = self.send_offer().await {
                self.report(NegotiationStep::CreateOffer, e);
            }
        }
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::IceCandidate(candidate) => match candidate.encode() {
                Ok(payload) => self.send(SignalingType::Ice, payload).await,
                Err(e) => warn!("Not sending local ICE candidate: {}", e),
            },
            MediaEvent::TrackAdded(track) if track.kind == TrackKind::Video => {
                info!("Remote video track {} available", track.id);
                self.remote_track = Some(track.clone());
                if self.screen.is_ready() {
                    self.publish_remote_track(track);
                }
            }
            MediaEvent::TrackAdded(track) => {
                debug!("Ignoring remote {:?} track {}", track.kind, track.id);
            }
            MediaEvent::TrackRemoved { track_id } => {
                if self
                    .remote_track
                    .as_ref()
                    .is_some_and(|t| t.id == track_id)
                {
                    info!("Remote video track {} removed", track_id);
                    self.remote_track = None;
                }
            }
            MediaEvent::RenegotiationNeeded => {
                debug!("Ignoring engine renegotiation request");
            }
        }
    }

    /// Schedules delivery of a remote track after the configured delay.
    fn publish_remote_track(&mut self, track: RemoteTrack) {
        self.remote_delivery += 1;
        let seq = self.remote_delivery;
        let inbox = self.inbox.clone();
        let delay = self.config.remote_track_replay_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            post(
                &inbox,
                WorkerCommand::DeliverRemoteTrack {
                    track_id: track.id,
                    seq,
                },
            );
        });
    }

    /// Publishes the retained remote track if it is still the one scheduled
    /// and the screen is still up.
    fn deliver_remote_track(&self, track_id: &str, seq: u64) {
        if seq != self.remote_delivery {
            debug!("Delivery of remote track {} superseded", track_id);
            return;
        }
        if !self.screen.is_ready() {
            debug!("Screen gone, not delivering remote track {}", track_id);
            return;
        }
        match &self.remote_track {
            Some(track) if track.id == track_id => {
                let _ = self.events.remote_track_available.send(track.clone());
            }
            _ => debug!("Remote track {} no longer retained", track_id),
        }
    }

    async fn send(&self, command: SignalingType, payload: String) {
        debug!("-> {} ({} bytes)", command, payload.len());
        if let Err(e) = self.signaling.send_command(command, payload).await {
            self.report(NegotiationStep::SendSignal, e);
        }
    }

    fn set_signaling_state(&mut self, state: SignalingState) {
        if let Some(session) = self.session.as_mut()
            && session.signaling_state != state
        {
            debug!("Signaling state {:?} -> {:?}", session.signaling_state, state);
            session.signaling_state = state;
        }
    }

    fn report(&self, step: NegotiationStep, reason: impl std::fmt::Display) {
        let failure = NegotiationFailure::new(step, reason);
        warn!("{}", failure);
        let _ = self.events.negotiation_failed.send(failure);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            screen: self.screen.clone(),
            signaling: self.session.as_ref().map(|s| s.signaling_state),
            active_source: self.selector.current_source(),
            default_facing: self.selector.default_facing(),
            remote_track_retained: self.remote_track.is_some(),
            pending_ice: self.session.as_ref().map_or(0, Session::pending_ice_len),
            offer_in_flight: self.session.as_ref().is_some_and(Session::offer_in_flight),
            session_created_at: self.session.as_ref().map(|s| s.created_at),
        }
    }

    async fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let pc = session.peer_connection;
        if let Err(e) = self.selector.deactivate_all(pc.as_ref()).await {
            warn!("Failed to detach local track on shutdown: {}", e);
        }
        if let Err(e) = pc.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        info!("Session closed");
    }
}
