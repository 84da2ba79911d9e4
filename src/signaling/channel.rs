//! Abstraktion über den Relay-Kanal
//!
//! Der CallCoordinator kennt nur dieses Trait, nicht die WebSocket-Verbindung.
//! Dadurch lassen sich in Tests Fake-Kanäle injizieren.

use super::client::SignalingError;
use super::messages::ClientEvent;

/// Bidirektionaler Relay-Kanal (ausgehende Seite)
///
/// Senden ist fire-and-forget: `Ok` heißt nur, dass das Event in die
/// Sende-Queue gelegt wurde, nicht dass der Relay es zugestellt hat.
pub trait SignalingChannel: Send + Sync {
    fn emit(&self, event: ClientEvent) -> Result<(), SignalingError>;
}
