//! Call App - P2P Audio/Video-Calls und Chat
//!
//! Ein Terminal-Client für Anrufe und Textnachrichten mit:
//! - Socket.IO-Relay als Signaling-Server
//! - WebRTC für P2P Audio/Video
//! - Pluggable Candidate-Austausch (Trickle oder Single-Shot)
//!
//! Der Kern ist `call_engine::CallCoordinator`: er verhandelt eine Session
//! aus Offer, Answer und Candidates, die in beliebiger Reihenfolge über
//! den Relay eintreffen können.

pub mod app;
pub mod call_engine;
pub mod chat;
pub mod config;
pub mod signaling;

#[cfg(test)]
mod testing;

use tracing_subscriber::EnvFilter;

/// Standard-Filter, falls `RUST_LOG` nicht gesetzt ist
const DEFAULT_LOG_FILTER: &str = "call_app=debug,webrtc=warn";

/// Initialisiert das Logging (einmal pro Prozess, vom Binary aufgerufen)
///
/// Logs gehen nach stderr, damit sie die Ausgabe auf stdout nicht stören.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
