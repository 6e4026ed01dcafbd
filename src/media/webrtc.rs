//! [`MediaEngine`] backed by webrtc-rs.
//!
//! Each peer connection gets its own API instance with the default codecs and
//! interceptors. Local tracks are VP8 sample tracks; feeding frames into them
//! is the job of whatever owns the capture device.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_VP8, MediaEngine as RtcMediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{
    LocalTrack, MediaEngine, MediaError, MediaEvent, MediaEventSender, PeerConnection,
    RemoteTrack, SdpType, SessionDescription, TrackKind, TrackSender, VideoSource,
};
use crate::config::{CaptureConstraints, IceServerConfig, SessionConfig};
use crate::signaling::IceCandidateRecord;

const VIDEO_CLOCK_RATE: u32 = 90_000;
const LOCAL_STREAM_ID: &str = "peer-session";

pub struct WebRtcMediaEngine {
    ice_servers: Vec<IceServerConfig>,
    capture: CaptureConstraints,
    offer_to_receive_video: bool,
}

impl WebRtcMediaEngine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            capture: config.capture,
            offer_to_receive_video: config.offer_to_receive_video,
        }
    }

    fn create_api() -> Result<webrtc::api::API, MediaError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        Ok(api)
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaEngine for WebRtcMediaEngine {
    async fn create_peer_connection(
        &self,
        events: MediaEventSender,
    ) -> Result<Arc<dyn PeerConnection>, MediaError> {
        let api = Self::create_api()?;
        let pc = Arc::new(api.new_peer_connection(self.rtc_configuration()).await?);

        if self.offer_to_receive_video {
            pc.add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        }

        let connection = WebRtcPeerConnection {
            pc,
            events,
            remote_tracks: Arc::new(Mutex::new(Vec::new())),
        };
        connection.install_handlers();

        info!(
            "Created peer connection ({} ICE servers)",
            self.ice_servers.len()
        );
        Ok(Arc::new(connection))
    }

    async fn create_local_track(&self, source: VideoSource) -> Result<LocalTrack, MediaError> {
        let id = source.new_track_id();
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
            id.clone(),
            LOCAL_STREAM_ID.to_owned(),
        ));
        debug!(
            "Opened {} track {} at {}x{}@{}",
            source, id, self.capture.width, self.capture.height, self.capture.fps
        );
        Ok(LocalTrack::new(id, source).with_native(track))
    }
}

/// Remote track announced through `on_track`, with the transceiver it arrived on.
struct AnnouncedTrack {
    transceiver: Arc<RTCRtpTransceiver>,
    track_id: String,
}

pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    events: MediaEventSender,
    remote_tracks: Arc<Mutex<Vec<AnnouncedTrack>>>,
}

impl WebRtcPeerConnection {
    fn install_handlers(&self) {
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            events.emit(MediaEvent::IceCandidate(IceCandidateRecord::new(
                                init.sdp_mid.unwrap_or_default(),
                                init.sdp_mline_index.unwrap_or_default(),
                                init.candidate,
                            )));
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));

        let events = self.events.clone();
        let remote_tracks = self.remote_tracks.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                let remote_tracks = remote_tracks.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    };
                    let track_id = track.id();
                    info!("Remote {:?} track {} added", kind, track_id);
                    remote_tracks.lock().await.push(AnnouncedTrack {
                        transceiver,
                        track_id: track_id.clone(),
                    });
                    events.emit(MediaEvent::TrackAdded(
                        RemoteTrack::new(track_id, kind).with_native(track),
                    ));
                })
            },
        ));

        let events = self.events.clone();
        self.pc.on_negotiation_needed(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                events.emit(MediaEvent::RenegotiationNeeded);
            })
        }));

        self.pc
            .on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
                Box::pin(async move {
                    info!("Peer connection state: {}", state);
                })
            }));
    }

    /// Reports tracks whose transceiver stopped receiving after the last
    /// remote description.
    async fn sweep_removed_tracks(&self) {
        let mut remote_tracks = self.remote_tracks.lock().await;
        remote_tracks.retain(|announced| {
            let receiving = matches!(
                announced.transceiver.current_direction(),
                RTCRtpTransceiverDirection::Recvonly | RTCRtpTransceiverDirection::Sendrecv
            );
            if !receiving {
                info!("Remote track {} removed", announced.track_id);
                self.events.emit(MediaEvent::TrackRemoved {
                    track_id: announced.track_id.clone(),
                });
            }
            receiving
        });
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let rtc = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, MediaError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer | RTCSdpType::Pranswer => SdpType::Answer,
        other => {
            return Err(MediaError::Engine(format!(
                "unsupported description type {other}"
            )));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        self.sweep_removed_tracks().await;
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<TrackSender, MediaError> {
        let native = track
            .native::<TrackLocalStaticSample>()
            .ok_or(MediaError::ForeignHandle)?;
        let sender = self
            .pc
            .add_track(native as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        Ok(TrackSender::new(&track.id).with_native(sender))
    }

    async fn remove_track(&self, sender: &TrackSender) -> Result<(), MediaError> {
        let native = sender
            .native::<RTCRtpSender>()
            .ok_or(MediaError::ForeignHandle)?;
        self.pc.remove_track(&native).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), MediaError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.sdp,
                sdp_mid: Some(candidate.sdp_mid),
                sdp_mline_index: Some(candidate.sdp_mline_index),
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    async fn stats_summary(&self) -> Option<String> {
        let stats = self.pc.get_stats().await;
        Some(format!(
            "{} stats reports, connection {}",
            stats.reports.len(),
            self.pc.connection_state()
        ))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WebRtcMediaEngine {
        WebRtcMediaEngine::new(&SessionConfig::local_only())
    }

    fn silent_events() -> MediaEventSender {
        MediaEventSender::new(|_| true)
    }

    #[test]
    fn test_ice_servers_are_mapped() {
        let engine = WebRtcMediaEngine::new(&SessionConfig::default());
        let rtc = engine.rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 9);
        let turn = rtc.ice_servers.last().unwrap();
        assert_eq!(turn.username, "openrelayproject");
        assert_eq!(turn.credential, "openrelayproject");
        assert!(rtc.ice_servers[0].username.is_empty());
    }

    #[tokio::test]
    async fn test_offer_carries_video_section() {
        let pc = engine()
            .create_peer_connection(silent_events())
            .await
            .unwrap();
        let offer = pc.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=video"));
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_track_attach_and_detach() {
        let engine = engine();
        let pc = engine.create_peer_connection(silent_events()).await.unwrap();

        let track = engine.create_local_track(VideoSource::FrontCamera).await.unwrap();
        assert!(track.id.starts_with("FrontCameraVideo"));

        let sender = pc.add_track(&track).await.unwrap();
        assert_eq!(sender.track_id, track.id);
        pc.remove_track(&sender).await.unwrap();
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_handles_are_rejected() {
        let pc = engine()
            .create_peer_connection(silent_events())
            .await
            .unwrap();
        let err = pc
            .add_track(&LocalTrack::new("x", VideoSource::File))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ForeignHandle));
        pc.close().await.unwrap();
    }
}
