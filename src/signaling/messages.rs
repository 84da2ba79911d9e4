//! Message Types für das Relay-Protokoll
//!
//! Diese Strukturen spiegeln die Socket.IO-Events des Relay-Servers wider
//! und ermöglichen typsichere Kommunikation. Jedes ausgehende Call-Event
//! trägt `fromUserId` und `toUserId`, damit der Relay ohne Wissen über
//! Call-Sessions routen kann.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// SESSION DESCRIPTIONS & CANDIDATES
// ============================================================================

/// Art einer Session Description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opake Session Description (`{ "type": "offer", "sdp": "..." }`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity Candidate im Browser-Format (`RTCIceCandidateInit`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Chat-Nachricht (wird vom Relay gespeichert und weitergeleitet)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
}

// ============================================================================
// CLIENT → RELAY PAYLOADS
// ============================================================================

/// SDP Offer an einen Peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub to_user_id: String,
    pub from_user_id: String,
    pub offer: SessionDescription,
}

impl OfferPayload {
    pub fn new(from_user_id: String, to_user_id: String, offer: SessionDescription) -> Self {
        Self {
            to_user_id,
            from_user_id,
            offer,
        }
    }
}

/// SDP Answer an den Anrufer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub to_user_id: String,
    pub from_user_id: String,
    pub answer: SessionDescription,
}

impl AnswerPayload {
    pub fn new(from_user_id: String, to_user_id: String, answer: SessionDescription) -> Self {
        Self {
            to_user_id,
            from_user_id,
            answer,
        }
    }
}

/// Einzelner ICE Candidate (Trickle)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub to_user_id: String,
    pub from_user_id: String,
    pub candidate: IceCandidate,
}

impl CandidatePayload {
    pub fn new(from_user_id: String, to_user_id: String, candidate: IceCandidate) -> Self {
        Self {
            to_user_id,
            from_user_id,
            candidate,
        }
    }
}

/// Anruf beenden
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallPayload {
    pub to_user_id: String,
    pub from_user_id: String,
}

impl EndCallPayload {
    pub fn new(from_user_id: String, to_user_id: String) -> Self {
        Self {
            to_user_id,
            from_user_id,
        }
    }
}

/// Alle Events, die der Client an den Relay schickt
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Einmalig nach dem Verbinden
    Join(String),
    SendMessage(ChatMessage),
    CallUser(OfferPayload),
    AnswerCall(AnswerPayload),
    IceCandidate(CandidatePayload),
    EndCall(EndCallPayload),
}

impl ClientEvent {
    /// Socket.IO Event-Name
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::CallUser(_) => "call-user",
            ClientEvent::AnswerCall(_) => "answer-call",
            ClientEvent::IceCandidate(_) => "ice-candidate",
            ClientEvent::EndCall(_) => "end-call",
        }
    }

    /// JSON-Payload des Events
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            ClientEvent::Join(identity) => Ok(Value::String(identity.clone())),
            ClientEvent::SendMessage(msg) => serde_json::to_value(msg),
            ClientEvent::CallUser(p) => serde_json::to_value(p),
            ClientEvent::AnswerCall(p) => serde_json::to_value(p),
            ClientEvent::IceCandidate(p) => serde_json::to_value(p),
            ClientEvent::EndCall(p) => serde_json::to_value(p),
        }
    }

    /// Empfänger (falls das Event an einen Peer geroutet wird)
    pub fn to_id(&self) -> Option<&str> {
        match self {
            ClientEvent::Join(_) => None,
            ClientEvent::SendMessage(msg) => Some(&msg.recipient_id),
            ClientEvent::CallUser(p) => Some(&p.to_user_id),
            ClientEvent::AnswerCall(p) => Some(&p.to_user_id),
            ClientEvent::IceCandidate(p) => Some(&p.to_user_id),
            ClientEvent::EndCall(p) => Some(&p.to_user_id),
        }
    }
}

// ============================================================================
// RELAY → CLIENT MESSAGES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingCallPayload {
    from_user_id: String,
    offer: SessionDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallAnsweredPayload {
    from_user_id: String,
    answer: SessionDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteCandidatePayload {
    #[serde(default)]
    from_user_id: Option<String>,
    candidate: IceCandidate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallEndedPayload {
    #[serde(default)]
    from_user_id: Option<String>,
}

/// Alle Events, die der Relay an den Client liefert
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Roster-Broadcast (enthält auch die eigene Identität)
    UserList(Vec<String>),
    /// History-Replay nach dem Join
    LoadMessages(Vec<ChatMessage>),
    NewMessage(ChatMessage),
    IncomingCall {
        from_id: String,
        offer: SessionDescription,
    },
    CallAnswered {
        from_id: String,
        answer: SessionDescription,
    },
    IceCandidate {
        from_id: Option<String>,
        candidate: IceCandidate,
    },
    CallEnded {
        from_id: Option<String>,
    },
}

impl ServerEvent {
    /// Dekodiert ein benanntes Event. Unbekannte Events ergeben `Ok(None)`.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            "update-user-list" => ServerEvent::UserList(serde_json::from_value(payload)?),
            "load-messages" => ServerEvent::LoadMessages(serde_json::from_value(payload)?),
            "new-message" => ServerEvent::NewMessage(serde_json::from_value(payload)?),
            "incoming-call" => {
                let p: IncomingCallPayload = serde_json::from_value(payload)?;
                ServerEvent::IncomingCall {
                    from_id: p.from_user_id,
                    offer: p.offer,
                }
            }
            "call-answered" => {
                let p: CallAnsweredPayload = serde_json::from_value(payload)?;
                ServerEvent::CallAnswered {
                    from_id: p.from_user_id,
                    answer: p.answer,
                }
            }
            "ice-candidate" => {
                let p: RemoteCandidatePayload = serde_json::from_value(payload)?;
                ServerEvent::IceCandidate {
                    from_id: p.from_user_id,
                    candidate: p.candidate,
                }
            }
            "call-ended" => {
                // Manche Relays schicken call-ended ohne Payload
                let p: CallEndedPayload = if payload.is_null() {
                    CallEndedPayload::default()
                } else {
                    serde_json::from_value(payload)?
                };
                ServerEvent::CallEnded {
                    from_id: p.from_user_id,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Gehört das Event zur Call-Signalisierung (im Gegensatz zu Chat/Roster)?
    pub fn is_call_signal(&self) -> bool {
        matches!(
            self,
            ServerEvent::IncomingCall { .. }
                | ServerEvent::CallAnswered { .. }
                | ServerEvent::IceCandidate { .. }
                | ServerEvent::CallEnded { .. }
        )
    }
}
