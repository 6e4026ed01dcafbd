//! Scripted collaborators for tests.
//!
//! [`RecordingEngine`] and [`RecordingSignaling`] append every call they
//! receive to one shared journal, so a test can assert the relative order of
//! engine operations and outgoing signaling.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::media::{
    LocalTrack, MediaEngine, MediaError, MediaEvent, MediaEventSender, PeerConnection, SdpType,
    SessionDescription, TrackSender, VideoSource,
};
use crate::signaling::{IceCandidateRecord, SignalingChannel, SignalingError, SignalingType};

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePeerConnection,
    CreateLocalTrack(VideoSource),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType, String),
    SetRemote(SdpType, String),
    AddTrack(String),
    RemoveTrack(String),
    AddIce(IceCandidateRecord),
    Stats,
    Close,
    Send(SignalingType, String),
}

/// Engine operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    PeerConnection,
    CreateLocalTrack,
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocal,
    SetRemote,
    AddIce,
}

#[derive(Default)]
struct Shared {
    journal: Mutex<Vec<Call>>,
    attached: Mutex<Vec<String>>,
    max_attached: AtomicUsize,
    descriptions: AtomicUsize,
    events: Mutex<Option<MediaEventSender>>,
    failing: Mutex<HashSet<FailPoint>>,
    failing_once: Mutex<HashSet<FailPoint>>,
    offer_delays: Mutex<VecDeque<Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn record(&self, call: Call) {
        lock(&self.journal).push(call);
    }

    fn check(&self, point: FailPoint) -> Result<(), MediaError> {
        if lock(&self.failing).contains(&point) || lock(&self.failing_once).remove(&point) {
            return Err(MediaError::Engine(format!("{point:?} failed")));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingEngine {
    shared: Arc<Shared>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signaling channel that records into this engine's journal.
    pub fn signaling(&self) -> RecordingSignaling {
        RecordingSignaling {
            shared: self.shared.clone(),
        }
    }

    pub fn fail(&self, point: FailPoint) {
        lock(&self.shared.failing).insert(point);
    }

    /// Fails only the next call at `point`.
    pub fn fail_once(&self, point: FailPoint) {
        lock(&self.shared.failing_once).insert(point);
    }

    /// Makes the next `create_offer` calls take the given times, one per call.
    pub fn delay_offers(&self, delays: impl IntoIterator<Item = Duration>) {
        lock(&self.shared.offer_delays).extend(delays);
    }

    pub fn journal(&self) -> Vec<Call> {
        lock(&self.shared.journal).clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        lock(&self.shared.journal).iter().filter(|c| pred(c)).count()
    }

    /// Outgoing signaling of the given type, in send order.
    pub fn sent(&self, kind: SignalingType) -> Vec<String> {
        lock(&self.shared.journal)
            .iter()
            .filter_map(|c| match c {
                Call::Send(t, payload) if *t == kind => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn attached_tracks(&self) -> Vec<String> {
        lock(&self.shared.attached).clone()
    }

    /// Highest number of simultaneously attached tracks ever observed.
    pub fn max_attached(&self) -> usize {
        self.shared.max_attached.load(Ordering::SeqCst)
    }

    /// A peer connection recording into this engine's journal, without going
    /// through [`MediaEngine::create_peer_connection`].
    pub fn recording_peer_connection(&self) -> RecordingPeerConnection {
        RecordingPeerConnection {
            shared: self.shared.clone(),
        }
    }

    /// Injects a media event as if the peer connection raised it. Returns
    /// `false` when no peer connection exists or the session is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        let events = lock(&self.shared.events).clone();
        events.is_some_and(|sender| sender.emit(event))
    }

    /// Polls the journal until `pred` holds, for at most two seconds.
    pub async fn wait_for(&self, pred: impl Fn(&[Call]) -> bool) -> bool {
        let poll = async {
            loop {
                if pred(&self.journal()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), poll).await.is_ok()
    }
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn create_peer_connection(
        &self,
        events: MediaEventSender,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        self.shared.record(Call::CreatePeerConnection);
        self.shared.check(FailPoint::PeerConnection)?;
        *lock(&self.shared.events) = Some(events);
        Ok(Arc::new(self.recording_peer_connection()))
    }

    async fn create_local_track(&self, source: VideoSource) -> Result<LocalTrack, MediaError> {
        self.shared.record(Call::CreateLocalTrack(source));
        self.shared.check(FailPoint::CreateLocalTrack)?;
        Ok(LocalTrack::new(source.new_track_id(), source))
    }
}

pub struct RecordingPeerConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl PeerConnection for RecordingPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.shared.record(Call::CreateOffer);
        let delay = lock(&self.shared.offer_delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.check(FailPoint::CreateOffer)?;
        let n = self.shared.descriptions.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.shared.record(Call::CreateAnswer);
        self.shared.check(FailPoint::CreateAnswer)?;
        let n = self.shared.descriptions.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("answer-{n}")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.shared.record(Call::SetLocal(desc.kind, desc.sdp));
        self.shared.check(FailPoint::SetLocal)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.shared.record(Call::SetRemote(desc.kind, desc.sdp));
        self.shared.check(FailPoint::SetRemote)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<TrackSender, MediaError> {
        self.shared.record(Call::AddTrack(track.id.clone()));
        self.shared.check(FailPoint::AddTrack)?;
        let mut attached = lock(&self.shared.attached);
        attached.push(track.id.clone());
        self.shared
            .max_attached
            .fetch_max(attached.len(), Ordering::SeqCst);
        Ok(TrackSender::new(&track.id))
    }

    async fn remove_track(&self, sender: &TrackSender) -> Result<(), MediaError> {
        self.shared.record(Call::RemoveTrack(sender.track_id.clone()));
        let mut attached = lock(&self.shared.attached);
        let Some(pos) = attached.iter().position(|id| *id == sender.track_id) else {
            return Err(MediaError::UnknownTrack(sender.track_id.clone()));
        };
        attached.remove(pos);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), MediaError> {
        self.shared.record(Call::AddIce(candidate));
        self.shared.check(FailPoint::AddIce)
    }

    async fn stats_summary(&self) -> Option<String> {
        self.shared.record(Call::Stats);
        Some(format!(
            "{} tracks attached",
            lock(&self.shared.attached).len()
        ))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.shared.record(Call::Close);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecordingSignaling {
    shared: Arc<Shared>,
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn send_command(
        &self,
        command: SignalingType,
        payload: String,
    ) -> Result<(), SignalingError> {
        self.shared.record(Call::Send(command, payload));
        Ok(())
    }
}
