//! WebRTC Media-Engine
//!
//! Implementiert den Peer-Transport mit webrtc-rs. Pro Session wird eine
//! frische Peer Connection gebaut (Default-Codecs und Interceptors); die
//! Callbacks der Connection werden als `SessionPeerEvent` in die Event-Loop
//! weitergereicht.

use super::error::CallError;
use super::media::{TrackInfo, TrackKind};
use super::monitor::ConnectionState;
use super::peer::{PeerEvent, PeerEventSender, PeerFactory, PeerTransport, SessionPeerEvent};
use super::session::CallId;
use crate::config::IceConfig;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Opus läuft immer mit 48kHz
const AUDIO_CLOCK_RATE: u32 = 48000;
const AUDIO_CHANNELS: u16 = 1;
const VIDEO_CLOCK_RATE: u32 = 90000;

fn engine_err(e: impl std::fmt::Display) -> CallError {
    CallError::Engine(e.to_string())
}

// ============================================================================
// TYPE MAPPING
// ============================================================================

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, CallError> {
    let result = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    result.map_err(|e| CallError::InvalidDescription(e.to_string()))
}

fn from_rtc_description(desc: &RTCSessionDescription) -> Result<SessionDescription, CallError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp.clone())),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp.clone())),
        other => Err(CallError::InvalidDescription(format!(
            "unsupported description type {}",
            other
        ))),
    }
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: AUDIO_CLOCK_RATE,
            channels: AUDIO_CHANNELS,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: VIDEO_CLOCK_RATE,
            ..Default::default()
        },
    }
}

// ============================================================================
// PEER FACTORY
// ============================================================================

/// Baut WebRTC Peer Connections aus der ICE-Konfiguration
pub struct WebRtcPeerFactory {
    config: RTCConfiguration,
}

impl WebRtcPeerFactory {
    pub fn new(ice: &IceConfig) -> Self {
        Self {
            config: ice.rtc_configuration(),
        }
    }

    /// Erstellt eine neue Peer Connection
    async fn new_peer_connection(&self) -> Result<RTCPeerConnection, CallError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine_err)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(engine_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        api.new_peer_connection(self.config.clone())
            .await
            .map_err(engine_err)
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        call_id: CallId,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        let pc = Arc::new(self.new_peer_connection().await?);
        register_handlers(&pc, call_id, events);
        tracing::debug!(%call_id, "Peer connection created");

        Ok(Arc::new(WebRtcPeer {
            call_id,
            pc,
            closed: AtomicBool::new(false),
        }))
    }
}

impl std::fmt::Debug for WebRtcPeerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcPeerFactory")
            .field("ice_servers", &self.config.ice_servers.len())
            .field("ice_transport_policy", &self.config.ice_transport_policy)
            .finish()
    }
}

/// Registriert die Callbacks der Peer Connection
fn register_handlers(pc: &RTCPeerConnection, call_id: CallId, events: PeerEventSender) {
    let forward = move |event: PeerEvent| {
        let _ = events.send(SessionPeerEvent { call_id, event });
    };

    let on_state = forward.clone();
    pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
        on_state(PeerEvent::ConnectionState(to_connection_state(s)));
        Box::pin(async {})
    }));

    let on_candidate = forward.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        // None markiert das Ende des Gatherings
        if let Some(c) = candidate {
            match c.to_json() {
                Ok(init) => on_candidate(PeerEvent::LocalCandidate(from_rtc_candidate(init))),
                Err(e) => tracing::warn!(%call_id, "Failed to serialize local candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let on_track = forward;
    pc.on_track(Box::new(move |track, _, _| {
        tracing::info!(%call_id, "Received remote {} track", track.kind());
        match track.kind() {
            RTPCodecType::Audio => on_track(PeerEvent::RemoteTrack(TrackKind::Audio)),
            RTPCodecType::Video => on_track(PeerEvent::RemoteTrack(TrackKind::Video)),
            _ => {}
        }
        Box::pin(async {})
    }));
}

// ============================================================================
// PEER TRANSPORT
// ============================================================================

pub struct WebRtcPeer {
    call_id: CallId,
    pc: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn add_local_tracks(&self, tracks: &[TrackInfo]) -> Result<(), CallError> {
        for info in tracks {
            let track: Arc<dyn TrackLocal + Send + Sync> = Arc::new(TrackLocalStaticRTP::new(
                codec_for(info.kind),
                info.id.clone(),
                info.stream_id.clone(),
            ));
            self.pc
                .add_track(track)
                .await
                .map_err(engine_err)?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        let offer = self.pc.create_offer(None).await.map_err(engine_err)?;
        from_rtc_description(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        let answer = self.pc.create_answer(None).await.map_err(engine_err)?;
        from_rtc_description(&answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_local_description(to_rtc_description(&desc)?)
            .await
            .map_err(engine_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.pc
            .set_remote_description(to_rtc_description(&desc)?)
            .await
            .map_err(engine_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(engine_err)
    }

    async fn gathered_local_description(&self) -> Result<SessionDescription, CallError> {
        let mut done = self.pc.gathering_complete_promise().await;
        let _ = done.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::Engine("no local description after gathering".into()))?;
        from_rtc_description(&local)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.pc.close().await {
            tracing::warn!(call_id = %self.call_id, "Error closing peer connection: {}", e);
        }
        tracing::debug!(call_id = %self.call_id, "Peer connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn maps_connection_states() {
        assert_eq!(
            to_connection_state(RTCPeerConnectionState::Failed),
            ConnectionState::Failed
        );
        assert_eq!(
            to_connection_state(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
        assert!(to_connection_state(RTCPeerConnectionState::Disconnected).is_terminal());
    }

    #[test]
    fn candidates_keep_all_fields() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        assert_eq!(
            from_rtc_candidate(to_rtc_candidate(candidate.clone())),
            candidate
        );
    }

    #[tokio::test]
    async fn offer_survives_the_engine() {
        let ice = IceConfig {
            servers: Vec::new(),
            ..Default::default()
        };
        let factory = WebRtcPeerFactory::new(&ice);
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = factory.create(CallId::new(), tx).await.unwrap();

        peer.add_local_tracks(&[TrackInfo {
            id: "audio-test".into(),
            kind: TrackKind::Audio,
            stream_id: "stream-test".into(),
        }])
        .await
        .unwrap();

        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("opus"));

        peer.set_local_description(offer).await.unwrap();
        peer.close().await;
        peer.close().await;
    }
}
