//! Engine.IO v4 / Socket.IO v5 Framing
//!
//! Der Relay spricht Socket.IO über eine nackte WebSocket-Verbindung.
//! Jede Text-Frame beginnt mit dem Engine.IO-Pakettyp, Message-Pakete (`4`)
//! tragen zusätzlich den Socket.IO-Pakettyp:
//!
//! - `0{...}`   Open-Handshake mit `sid`, `pingInterval`, `pingTimeout`
//! - `2` / `3`  Ping / Pong (der Server pingt, der Client antwortet)
//! - `40`       Namespace-Connect, `41` Disconnect, `44{...}` Connect-Error
//! - `42["event", payload]` Event

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Client-Paket: Verbindung zum Default-Namespace
pub const CONNECT: &str = "40";

/// Client-Paket: Antwort auf einen Ping
pub const PONG: &str = "3";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown packet type: {0}")]
    UnknownType(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Parameter aus dem Open-Handshake
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenInfo {
    /// Maximale Zeit ohne Ping, bevor die Verbindung als tot gilt
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Dekodiertes Paket vom Server
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Noop,
    Connected,
    Disconnected,
    ConnectError(String),
    Event { name: String, payload: Value },
}

/// Dekodiert eine Text-Frame
pub fn decode(frame: &str) -> Result<Packet, FrameError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(Packet::Open)
            .map_err(|e| FrameError::Malformed(e.to_string())),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '6' => Ok(Packet::Noop),
        '4' => decode_message(rest),
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

fn decode_message(body: &str) -> Result<Packet, FrameError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let rest = skip_namespace(chars.as_str());

    match kind {
        '0' => Ok(Packet::Connected),
        '1' => Ok(Packet::Disconnected),
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| rest.to_string());
            Ok(Packet::ConnectError(message))
        }
        '2' => {
            // Optionale Ack-ID vor dem JSON-Array überspringen
            let json = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut args: Vec<Value> =
                serde_json::from_str(json).map_err(|e| FrameError::Malformed(e.to_string()))?;
            if args.is_empty() {
                return Err(FrameError::Malformed("event without name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => return Err(FrameError::Malformed(format!("event name {}", other))),
            };
            let payload = if args.is_empty() {
                Value::Null
            } else {
                args.remove(0)
            };
            Ok(Packet::Event { name, payload })
        }
        other => Err(FrameError::UnknownType(format!("4{}", other))),
    }
}

/// Entfernt ein `/namespace,`-Präfix (wir nutzen nur den Default-Namespace)
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

/// Kodiert ein Event als `42["name",payload]`
pub fn encode_event(name: &str, payload: &Value) -> Result<String, serde_json::Error> {
    let array = serde_json::to_string(&[Value::String(name.to_string()), payload.clone()])?;
    Ok(format!("42{}", array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let packet =
            decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#)
                .unwrap();
        match packet {
            Packet::Open(info) => {
                assert_eq!(info.sid, "abc");
                assert_eq!(info.liveness_window(), Duration::from_millis(30_000));
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[test]
    fn decodes_control_packets() {
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(decode("3").unwrap(), Packet::Pong);
        assert_eq!(decode("1").unwrap(), Packet::Close);
        assert_eq!(decode(r#"40{"sid":"xyz"}"#).unwrap(), Packet::Connected);
        assert_eq!(decode("41").unwrap(), Packet::Disconnected);
    }

    #[test]
    fn decodes_event_with_payload() {
        let packet = decode(r#"42["update-user-list",["alice","bob"]]"#).unwrap();
        assert_eq!(
            packet,
            Packet::Event {
                name: "update-user-list".into(),
                payload: json!(["alice", "bob"]),
            }
        );
    }

    #[test]
    fn decodes_event_without_payload_and_with_ack_id() {
        assert_eq!(
            decode(r#"4217["call-ended"]"#).unwrap(),
            Packet::Event {
                name: "call-ended".into(),
                payload: Value::Null,
            }
        );
    }

    #[test]
    fn strips_namespace_prefix() {
        let packet = decode(r#"42/chat,["new-message",{"text":"hi"}]"#).unwrap();
        assert!(matches!(packet, Packet::Event { ref name, .. } if name == "new-message"));
    }

    #[test]
    fn connect_error_extracts_message() {
        assert_eq!(
            decode(r#"44{"message":"Not authorized"}"#).unwrap(),
            Packet::ConnectError("Not authorized".into())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(decode(""), Err(FrameError::Empty));
        assert!(matches!(decode("9"), Err(FrameError::UnknownType(_))));
        assert!(matches!(decode("42{}"), Err(FrameError::Malformed(_))));
        assert!(matches!(decode("42[]"), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn encodes_event() {
        let frame = encode_event("join", &json!("alice")).unwrap();
        assert_eq!(frame, r#"42["join","alice"]"#);
        assert_eq!(
            decode(&frame).unwrap(),
            Packet::Event {
                name: "join".into(),
                payload: json!("alice"),
            }
        );
    }
}
