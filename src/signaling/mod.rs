//! Signaling Module - Socket.IO Relay Client
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Relay-Server:
//! - WebSocket-Verbindung aufbauen und halten
//! - Engine.IO / Socket.IO Framing
//! - Events serialisieren und senden
//! - Eingehende Events parsen und weiterleiten
//!

mod channel;
mod client;
pub mod framing;
mod messages;

pub use channel::SignalingChannel;
pub use client::{SignalingClient, SignalingError, SignalingEvent};
pub use messages::*;
