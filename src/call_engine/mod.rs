//! Call Engine Module - Session-Aushandlung, Medien und WebRTC
//!
//! Dieses Modul verwaltet:
//! - Den Zustandsautomaten eines Calls (CallSession)
//! - Gepufferte Connectivity Candidates
//! - Lokale Capture-Geräte (Mikrofon, Kamera)
//! - Überwachung des Transport-Zustands
//! - Die WebRTC Peer Connections
//!
//! Von außen wird nur der `CallCoordinator` angesprochen.

#[cfg(feature = "audio")]
mod audio;
#[cfg(feature = "video-capture")]
mod camera;
mod candidates;
mod coordinator;
mod engine;
mod error;
mod media;
mod monitor;
mod negotiation;
mod peer;
mod session;

#[cfg(feature = "audio")]
pub use audio::{AudioError, MicrophoneCapture};
#[cfg(feature = "video-capture")]
pub use camera::CameraCapture;
pub use candidates::CandidateBuffer;
pub use coordinator::{
    CallCoordinator, CallEvent, CallSettings, CallSnapshot, EndReason, InterruptHandle,
};
pub use engine::{WebRtcPeer, WebRtcPeerFactory};
pub use error::CallError;
pub use media::{
    CaptureDevice, HostMediaDevices, LocalTrack, MediaConstraints, MediaDevices,
    MediaSessionManager, TrackInfo, TrackKind,
};
pub use monitor::{ConnectionMonitor, ConnectionState, MonitorDecision};
pub use negotiation::NegotiationStrategy;
pub use peer::{
    PeerEvent, PeerEventReceiver, PeerEventSender, PeerFactory, PeerTransport, SessionPeerEvent,
};
pub use session::{
    CallId, CallRole, CallSession, CallState, CandidateOutcome, InterruptReason, TeardownSignal,
};
