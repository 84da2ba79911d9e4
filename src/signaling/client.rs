//! WebSocket Client für den Socket.IO Relay
//!
//! Verwaltet die WebSocket-Verbindung zum Relay-Server:
//! - Engine.IO Handshake und Namespace-Connect
//! - Ping/Pong nach Vorgabe des Servers
//! - Join mit der gewählten Identität
//! - Event-basierte Weiterleitung eingehender Nachrichten

use super::channel::SignalingChannel;
use super::framing::{self, OpenInfo, Packet};
use super::messages::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Maximale Wartezeit auf Open-Handshake und Namespace-Connect
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum SignalingError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Not connected to relay")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Namespace-Connect bestätigt, Join gesendet
    Connected { sid: String },

    /// Verbindung getrennt (Server, Netzwerk oder Ping-Timeout)
    Disconnected,

    /// Dekodiertes Relay-Event
    Message(ServerEvent),
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    identity: Option<String>,
    sid: Option<String>,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für die Relay-Kommunikation
pub struct SignalingClient {
    server_url: String,
    state: Arc<RwLock<ClientState>>,
    tx: Option<mpsc::Sender<String>>,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient
    pub fn new(server_url: String) -> Self {
        Self {
            server_url,
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: None,
        }
    }

    /// Gibt die eigene Identität zurück (nach dem Join)
    pub fn identity(&self) -> Option<String> {
        self.state.read().identity.clone()
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Baut die Socket.IO WebSocket-URL aus der konfigurierten Relay-URL
    ///
    /// `http://host:3001` → `ws://host:3001/socket.io/?EIO=4&transport=websocket`
    pub fn websocket_url(server_url: &str) -> Result<Url, SignalingError> {
        let mut url =
            Url::parse(server_url).map_err(|e| SignalingError::InvalidUrl(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(SignalingError::InvalidUrl(format!("scheme {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| SignalingError::InvalidUrl(server_url.to_string()))?;

        if url.path() == "/" || url.path().is_empty() {
            url.set_path("/socket.io/");
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket");

        Ok(url)
    }

    /// Verbindet mit dem Relay und meldet die Identität an
    ///
    /// Gibt einen Receiver für alle eingehenden Events zurück. Die Events
    /// werden in Empfangsreihenfolge gequeued.
    pub async fn connect(
        &mut self,
        identity: String,
    ) -> Result<mpsc::UnboundedReceiver<SignalingEvent>, SignalingError> {
        let ws_url = Self::websocket_url(&self.server_url)?;

        tracing::info!("Connecting to relay: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // Open-Handshake abwarten
        let open = tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::await_open(&mut read))
            .await
            .map_err(|_| SignalingError::HandshakeFailed("Timeout".to_string()))??;

        tracing::debug!(
            "Engine.IO session {} (ping every {} ms)",
            open.sid,
            open.ping_interval
        );

        // Namespace-Connect senden und Bestätigung abwarten
        write
            .send(Message::Text(framing::CONNECT.to_string()))
            .await
            .map_err(|e| SignalingError::HandshakeFailed(e.to_string()))?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::await_namespace(&mut read, &mut write))
            .await
            .map_err(|_| SignalingError::HandshakeFailed("Timeout".to_string()))??;

        // Message-Sender erstellen
        let (tx, mut rx) = mpsc::channel::<String>(100);
        self.tx = Some(tx.clone());

        {
            let mut state = self.state.write();
            state.is_connected = true;
            state.identity = Some(identity.clone());
            state.sid = Some(open.sid.clone());
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(SignalingEvent::Connected {
            sid: open.sid.clone(),
        });

        // Read-Task starten
        let state_clone = Arc::clone(&self.state);
        let pong_tx = tx.clone();
        let liveness = open.liveness_window();

        tokio::spawn(async move {
            loop {
                let next = match tokio::time::timeout(liveness, read.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!("No ping from relay within {:?}", liveness);
                        break;
                    }
                };

                match next {
                    Some(Ok(Message::Text(text))) => match framing::decode(&text) {
                        Ok(Packet::Ping) => {
                            if let Err(e) = pong_tx.try_send(framing::PONG.to_string()) {
                                tracing::warn!("Failed to queue pong: {}", e);
                            }
                        }
                        Ok(Packet::Event { name, payload }) => {
                            match ServerEvent::decode(&name, payload) {
                                Ok(Some(event)) => {
                                    let _ = event_tx.send(SignalingEvent::Message(event));
                                }
                                Ok(None) => tracing::debug!("Ignoring relay event '{}'", name),
                                Err(e) => tracing::warn!("Malformed '{}' event: {}", name, e),
                            }
                        }
                        Ok(Packet::Disconnected) | Ok(Packet::Close) => {
                            tracing::info!("Relay closed the session");
                            break;
                        }
                        Ok(other) => tracing::debug!("Relay packet: {:?}", other),
                        Err(e) => tracing::warn!("Undecodable relay frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            // Disconnect-Status setzen
            state_clone.write().is_connected = false;
            let _ = event_tx.send(SignalingEvent::Disconnected);
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        // Join senden
        self.emit(ClientEvent::Join(identity.clone()))?;
        tracing::info!("Joined relay as '{}'", identity);

        Ok(event_rx)
    }

    async fn await_open<S>(read: &mut S) -> Result<OpenInfo, SignalingError>
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => match framing::decode(&text) {
                    Ok(Packet::Open(info)) => return Ok(info),
                    Ok(other) => tracing::debug!("Packet before open: {:?}", other),
                    Err(e) => return Err(SignalingError::HandshakeFailed(e.to_string())),
                },
                Ok(_) => {}
                Err(e) => return Err(SignalingError::HandshakeFailed(e.to_string())),
            }
        }
        Err(SignalingError::HandshakeFailed(
            "Connection closed during handshake".to_string(),
        ))
    }

    async fn await_namespace<S, W>(read: &mut S, write: &mut W) -> Result<(), SignalingError>
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
        W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        while let Some(msg) = read.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(_) => continue,
                Err(e) => return Err(SignalingError::HandshakeFailed(e.to_string())),
            };
            match framing::decode(&text) {
                Ok(Packet::Connected) => return Ok(()),
                Ok(Packet::ConnectError(message)) => {
                    return Err(SignalingError::HandshakeFailed(message))
                }
                Ok(Packet::Ping) => {
                    write
                        .send(Message::Text(framing::PONG.to_string()))
                        .await
                        .map_err(|e| SignalingError::HandshakeFailed(e.to_string()))?;
                }
                Ok(other) => tracing::debug!("Packet before connect: {:?}", other),
                Err(e) => tracing::warn!("Undecodable handshake frame: {}", e),
            }
        }
        Err(SignalingError::HandshakeFailed(
            "Connection closed during handshake".to_string(),
        ))
    }
}

impl SignalingChannel for SignalingClient {
    /// Sendet ein Event (non-blocking, verwendet try_send)
    fn emit(&self, event: ClientEvent) -> Result<(), SignalingError> {
        let tx = self.tx.as_ref().ok_or(SignalingError::NotConnected)?;
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }

        let payload = event
            .payload()
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;
        let frame = framing::encode_event(event.name(), &payload)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        tx.try_send(frame)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}
