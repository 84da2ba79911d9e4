//! Schnittstelle zur Media-Engine
//!
//! Die CallSession treibt den Peer-Transport nur über diese Traits.
//! Die produktive Implementierung steckt in `engine.rs` (webrtc-rs),
//! Tests verwenden Fakes.

use super::error::CallError;
use super::media::{TrackInfo, TrackKind};
use super::monitor::ConnectionState;
use super::session::CallId;
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Signale eines Peer-Transports
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Lokal entdeckter Candidate (Trickle)
    LocalCandidate(IceCandidate),
    ConnectionState(ConnectionState),
    RemoteTrack(TrackKind),
}

/// PeerEvent mit der Call-ID des erzeugenden Transports
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPeerEvent {
    pub call_id: CallId,
    pub event: PeerEvent,
}

pub type PeerEventSender = mpsc::UnboundedSender<SessionPeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<SessionPeerEvent>;

/// Ein Peer-Transport gehört genau einer CallSession
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Bindet lokale Tracks (vor dem Erzeugen der Descriptions)
    async fn add_local_tracks(&self, tracks: &[TrackInfo]) -> Result<(), CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError>;

    /// Wartet auf das Ende des ICE-Gatherings und liefert die lokale
    /// Description inklusive aller Candidates (Single-Shot)
    async fn gathered_local_description(&self) -> Result<SessionDescription, CallError>;

    /// Schließt den Transport. Mehrfaches Schließen ist erlaubt.
    async fn close(&self);
}

/// Erzeugt pro Session einen frischen Transport
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        call_id: CallId,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransport>, CallError>;
}
