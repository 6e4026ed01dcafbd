use std::sync::Arc;
use std::time::Duration;

use peer_session::config::SessionConfig;
use peer_session::media::{CameraFacing, MediaEvent, SdpType, VideoSource};
use peer_session::session::{NegotiationCore, NegotiationStep, ScreenState, SessionError};
use peer_session::signaling::{IceCandidateRecord, SignalingCommand, SignalingType};
use peer_session::test_utils::{Call, FailPoint, RecordingEngine};

fn spawn_core(engine: &RecordingEngine) -> NegotiationCore {
    let config = SessionConfig {
        remote_track_replay_delay_ms: 10,
        ..SessionConfig::local_only()
    };
    NegotiationCore::spawn(Arc::new(engine.clone()), Arc::new(engine.signaling()), config)
}

fn position(journal: &[Call], call: &Call) -> usize {
    journal
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call:?} not found in {journal:?}"))
}

/// Lets already-spawned engine tasks finish before asserting that nothing
/// else happened.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_start_commits_offer_before_sending_it() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);
    let mut local = core.subscribe_local();

    core.start().await.unwrap();
    assert!(engine.wait_for(|j| j.iter().any(|c| matches!(c, Call::Send(..)))).await);

    let track = tokio::time::timeout(Duration::from_secs(1), local.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(track.source, VideoSource::BackCamera);

    let journal = engine.journal();
    let add = position(&journal, &Call::AddTrack(track.id.clone()));
    let create = position(&journal, &Call::CreateOffer);
    let stats = position(&journal, &Call::Stats);
    let set_local = position(&journal, &Call::SetLocal(SdpType::Offer, "offer-0".into()));
    let send = position(&journal, &Call::Send(SignalingType::Offer, "offer-0".into()));
    assert!(add < create);
    assert!(create < stats);
    assert!(stats < set_local);
    assert!(set_local < send);

    settle().await;
    assert_eq!(engine.sent(SignalingType::Offer), vec!["offer-0"]);
    assert_eq!(engine.count(|c| *c == Call::CreatePeerConnection), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.start().await.unwrap();
    let err = core.start().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidTransition(_)));

    settle().await;
    assert_eq!(engine.sent(SignalingType::Offer).len(), 1);
    assert_eq!(engine.count(|c| matches!(c, Call::AddTrack(_))), 1);
}

#[tokio::test]
async fn test_incoming_answer_only_sets_remote_description() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.handle_incoming_signal(SignalingCommand::Answer("remote-answer".into()))
        .unwrap();
    assert!(
        engine
            .wait_for(|j| j.contains(&Call::SetRemote(SdpType::Answer, "remote-answer".into())))
            .await
    );

    settle().await;
    assert_eq!(engine.count(|c| matches!(c, Call::SetRemote(..))), 1);
    assert_eq!(engine.count(|c| matches!(c, Call::Send(..))), 0);
    assert_eq!(engine.count(|c| matches!(c, Call::CreateAnswer)), 0);
}

#[tokio::test]
async fn test_incoming_offer_is_answered_in_order() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.handle_incoming_signal(SignalingCommand::Offer("remote-offer".into()))
        .unwrap();
    assert!(
        engine
            .wait_for(|j| j.iter().any(|c| matches!(c, Call::Send(SignalingType::Answer, _))))
            .await
    );

    let journal = engine.journal();
    let set_remote = position(&journal, &Call::SetRemote(SdpType::Offer, "remote-offer".into()));
    let create = position(&journal, &Call::CreateAnswer);
    let set_local = position(&journal, &Call::SetLocal(SdpType::Answer, "answer-0".into()));
    let send = position(&journal, &Call::Send(SignalingType::Answer, "answer-0".into()));
    assert!(set_remote < create);
    assert!(create < set_local);
    assert!(set_local < send);

    settle().await;
    assert_eq!(engine.sent(SignalingType::Answer).len(), 1);
    assert!(engine.sent(SignalingType::Offer).is_empty());

    let snapshot = core.snapshot().await.unwrap();
    assert_eq!(
        snapshot.signaling,
        Some(peer_session::session::SignalingState::Stable)
    );
}

#[tokio::test]
async fn test_answer_is_sent_even_if_remote_offer_fails() {
    let engine = RecordingEngine::new();
    engine.fail(FailPoint::SetRemote);
    let core = spawn_core(&engine);
    let mut failures = core.subscribe_failures();

    core.handle_incoming_signal(SignalingCommand::Offer("bad-offer".into()))
        .unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.step, NegotiationStep::SetRemoteDescription);
    assert!(
        engine
            .wait_for(|j| j.iter().any(|c| matches!(c, Call::Send(SignalingType::Answer, _))))
            .await
    );
}

#[tokio::test]
async fn test_ice_before_remote_description_is_buffered() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.handle_incoming_signal(SignalingCommand::Ice("0$0$cand-a".into()))
        .unwrap();
    core.handle_incoming_signal(SignalingCommand::Ice("0$0$cand-b".into()))
        .unwrap();

    let snapshot = core.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_ice, 2);
    assert_eq!(engine.count(|c| matches!(c, Call::AddIce(_))), 0);

    core.handle_incoming_signal(SignalingCommand::Answer("remote-answer".into()))
        .unwrap();
    assert!(engine.wait_for(|j| j.iter().any(|c| matches!(c, Call::AddIce(_)))).await);
    settle().await;

    let added: Vec<_> = engine
        .journal()
        .into_iter()
        .filter_map(|c| match c {
            Call::AddIce(candidate) => Some(candidate.sdp),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec!["cand-a", "cand-b"]);
    assert_eq!(core.snapshot().await.unwrap().pending_ice, 0);

    core.handle_incoming_signal(SignalingCommand::Ice("video$1$cand-c".into()))
        .unwrap();
    core.snapshot().await.unwrap();
    assert!(
        engine
            .journal()
            .contains(&Call::AddIce(IceCandidateRecord::new("video", 1, "cand-c")))
    );
}

#[tokio::test]
async fn test_malformed_ice_is_dropped_without_ending_session() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.handle_incoming_signal(SignalingCommand::Ice("garbage".into()))
        .unwrap();
    core.handle_incoming_signal(SignalingCommand::Ice("0$zero$cand".into()))
        .unwrap();
    core.handle_incoming_signal(SignalingCommand::Answer("remote-answer".into()))
        .unwrap();

    assert!(
        engine
            .wait_for(|j| j.contains(&Call::SetRemote(SdpType::Answer, "remote-answer".into())))
            .await
    );
    let snapshot = core.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_ice, 0);
    assert_eq!(engine.count(|c| matches!(c, Call::AddIce(_))), 0);

    core.start().await.unwrap();
}

#[tokio::test]
async fn test_local_candidates_are_relayed() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);
    core.start().await.unwrap();

    assert!(engine.emit(MediaEvent::IceCandidate(IceCandidateRecord::new(
        "0",
        0,
        "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"
    ))));
    assert!(engine.emit(MediaEvent::IceCandidate(IceCandidateRecord::new(
        "0",
        0,
        "candidate$with-separator"
    ))));
    core.snapshot().await.unwrap();

    assert_eq!(
        engine.sent(SignalingType::Ice),
        vec!["0$0$candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host"]
    );
}

#[tokio::test]
async fn test_engine_renegotiation_requests_are_ignored() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);
    core.start().await.unwrap();
    assert!(engine.wait_for(|j| j.iter().any(|c| matches!(c, Call::Send(..)))).await);

    assert!(engine.emit(MediaEvent::RenegotiationNeeded));
    core.snapshot().await.unwrap();
    settle().await;

    assert_eq!(engine.count(|c| *c == Call::CreateOffer), 1);
    assert_eq!(engine.sent(SignalingType::Offer).len(), 1);
}

#[tokio::test]
async fn test_renegotiate_sends_fresh_offer() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.renegotiate().await.unwrap();
    core.renegotiate().await.unwrap();
    assert!(engine.wait_for(|j| j.iter().filter(|c| matches!(c, Call::Send(..))).count() == 2).await);

    assert_eq!(engine.sent(SignalingType::Offer), vec!["offer-0", "offer-1"]);
    // No screen, so no local track.
    assert_eq!(engine.count(|c| matches!(c, Call::AddTrack(_))), 0);
}

#[tokio::test]
async fn test_slow_offer_is_not_overtaken_by_newer_one() {
    let engine = RecordingEngine::new();
    engine.delay_offers([Duration::from_millis(100)]);
    let core = spawn_core(&engine);

    core.start().await.unwrap();
    assert!(core.snapshot().await.unwrap().offer_in_flight);
    assert!(core.switch_source(VideoSource::FrontCamera).await.unwrap());
    assert!(
        engine
            .wait_for(|j| j.iter().filter(|c| matches!(c, Call::Send(SignalingType::Offer, _))).count() == 2)
            .await
    );
    settle().await;

    assert_eq!(engine.sent(SignalingType::Offer), vec!["offer-0", "offer-1"]);
    let journal = engine.journal();
    let last_set_local = journal
        .iter()
        .rposition(|c| matches!(c, Call::SetLocal(SdpType::Offer, _)))
        .unwrap();
    assert_eq!(journal[last_set_local], Call::SetLocal(SdpType::Offer, "offer-1".into()));

    // The second offer is only created once the first one is on the wire,
    // after the front camera was attached.
    let first_sent = position(&journal, &Call::Send(SignalingType::Offer, "offer-0".into()));
    let second_create = journal
        .iter()
        .rposition(|c| *c == Call::CreateOffer)
        .unwrap();
    let front_added = journal
        .iter()
        .rposition(|c| matches!(c, Call::AddTrack(id) if id.starts_with("FrontCamera")))
        .unwrap_or_else(|| panic!("front camera never attached: {journal:?}"));
    assert!(first_sent < second_create);
    assert!(front_added < second_create);
    assert!(!core.snapshot().await.unwrap().offer_in_flight);
}

#[tokio::test]
async fn test_offer_failure_releases_offer_slot() {
    let engine = RecordingEngine::new();
    engine.fail_once(FailPoint::CreateOffer);
    let core = spawn_core(&engine);
    let mut failures = core.subscribe_failures();

    core.renegotiate().await.unwrap();
    let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.step, NegotiationStep::CreateOffer);

    core.renegotiate().await.unwrap();
    assert!(engine.wait_for(|j| j.iter().any(|c| matches!(c, Call::Send(..)))).await);
    assert_eq!(engine.sent(SignalingType::Offer), vec!["offer-0"]);
}

#[tokio::test]
async fn test_peer_connection_failure_is_fatal_to_start() {
    let engine = RecordingEngine::new();
    engine.fail(FailPoint::PeerConnection);
    let core = spawn_core(&engine);

    let err = core.start().await.unwrap_err();
    assert!(matches!(err, SessionError::PeerConnection(_)));
    assert!(matches!(
        core.renegotiate().await,
        Err(SessionError::PeerConnection(_))
    ));

    let snapshot = core.snapshot().await.unwrap();
    assert_eq!(snapshot.screen, ScreenState::Uninitialized);
    assert!(snapshot.signaling.is_none());
    assert_eq!(engine.count(|c| matches!(c, Call::CreateLocalTrack(_))), 0);
}

#[tokio::test]
async fn test_offer_failure_is_published() {
    let engine = RecordingEngine::new();
    engine.fail(FailPoint::CreateOffer);
    let core = spawn_core(&engine);
    let mut failures = core.subscribe_failures();

    core.start().await.unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(1), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.step, NegotiationStep::CreateOffer);
    settle().await;
    assert!(engine.sent(SignalingType::Offer).is_empty());
}

#[tokio::test]
async fn test_stop_without_start_only_flips_camera() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);

    core.stop().await.unwrap();
    let snapshot = core.snapshot().await.unwrap();
    assert_eq!(snapshot.screen, ScreenState::Uninitialized);
    assert_eq!(snapshot.default_facing, CameraFacing::Front);

    core.stop().await.unwrap();
    assert_eq!(core.snapshot().await.unwrap().default_facing, CameraFacing::Back);
    assert!(engine.journal().is_empty());

    core.stop().await.unwrap();
    let mut local = core.subscribe_local();
    core.start().await.unwrap();
    let track = tokio::time::timeout(Duration::from_secs(1), local.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(track.source, VideoSource::FrontCamera);
}

#[tokio::test]
async fn test_shutdown_closes_peer_connection() {
    let engine = RecordingEngine::new();
    let core = spawn_core(&engine);
    core.start().await.unwrap();
    assert!(engine.wait_for(|j| j.iter().any(|c| matches!(c, Call::Send(..)))).await);

    core.shutdown().await.unwrap();

    let journal = engine.journal();
    assert!(journal.iter().any(|c| matches!(c, Call::RemoveTrack(_))));
    assert_eq!(journal.last(), Some(&Call::Close));
    assert!(matches!(core.start().await, Err(SessionError::Closed)));
}
