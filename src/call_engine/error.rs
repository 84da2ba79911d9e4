//! Fehlerarten der Call-Engine

use super::monitor::ConnectionState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Mikrofon/Kamera nicht verfügbar (verweigert, fehlt, belegt)
    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Operation im aktuellen Zustand nicht erlaubt
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Event wurde gesendet, Zustellung durch den Relay ist unbekannt
    #[error("Signaling delivery unknown: {0}")]
    SignalingDeliveryUnknown(String),

    /// Candidate wurde von der Media-Engine abgelehnt (nicht fatal)
    #[error("Candidate application failed: {0}")]
    CandidateApplicationFailed(String),

    /// Transport endgültig verloren
    #[error("Transport reached terminal state {0:?}")]
    TransportTerminal(ConnectionState),

    /// Media-Engine konnte eine Description nicht erzeugen oder anwenden
    #[error("Media engine error: {0}")]
    Engine(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    /// Schritt wurde durch Teardown abgebrochen
    #[error("Call was torn down while a step was pending")]
    Cancelled,
}

impl CallError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CallError::InvalidTransition(msg.into())
    }
}
