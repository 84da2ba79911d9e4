//! Chat und Roster
//!
//! Hält die Online-Liste und die Nachrichten, die der Relay liefert.
//! Der Relay ist die einzige Quelle der Wahrheit: `load-messages` ersetzt
//! den lokalen Verlauf vollständig, `new-message` hängt an.

use crate::signaling::{ChatMessage, ClientEvent, ServerEvent, SignalingChannel, SignalingError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message text is empty")]
    EmptyText,

    #[error("No recipient given")]
    NoRecipient,

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Lokale Sicht auf Roster und Nachrichtenverlauf
pub struct ChatRoom {
    local_id: String,
    signaling: Arc<dyn SignalingChannel>,
    roster: Vec<String>,
    messages: Vec<ChatMessage>,
}

impl ChatRoom {
    pub fn new(local_id: impl Into<String>, signaling: Arc<dyn SignalingChannel>) -> Self {
        Self {
            local_id: local_id.into(),
            signaling,
            roster: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Andere Online-Nutzer (ohne die eigene Identität)
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.roster.iter().any(|u| u == user_id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Übernimmt ein Relay-Event. Gibt `true` zurück, wenn sich etwas geändert hat.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::UserList(users) => {
                self.roster = users
                    .iter()
                    .filter(|u| **u != self.local_id)
                    .cloned()
                    .collect();
                tracing::debug!("Roster updated: {} user(s) online", self.roster.len());
                true
            }
            ServerEvent::LoadMessages(history) => {
                self.messages = history.clone();
                tracing::debug!("Loaded {} message(s) from relay", self.messages.len());
                true
            }
            ServerEvent::NewMessage(message) => {
                self.messages.push(message.clone());
                true
            }
            _ => false,
        }
    }

    /// Verlauf zwischen uns und `peer_id` in Empfangsreihenfolge
    pub fn conversation(&self, peer_id: &str) -> Vec<&ChatMessage> {
        self.messages
            .iter()
            .filter(|m| {
                (m.sender_id == self.local_id && m.recipient_id == peer_id)
                    || (m.sender_id == peer_id && m.recipient_id == self.local_id)
            })
            .collect()
    }

    /// Schickt eine Nachricht über den Relay
    ///
    /// Die Nachricht erscheint erst im Verlauf, wenn der Relay sie als
    /// `new-message` zurückspiegelt.
    pub fn send_message(&self, recipient_id: &str, text: &str) -> Result<(), ChatError> {
        let recipient_id = recipient_id.trim();
        if recipient_id.is_empty() {
            return Err(ChatError::NoRecipient);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyText);
        }

        self.signaling.emit(ClientEvent::SendMessage(ChatMessage {
            sender_id: self.local_id.clone(),
            recipient_id: recipient_id.to_string(),
            text: text.to_string(),
        }))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingChannel;

    fn msg(from: &str, to: &str, text: &str) -> ChatMessage {
        ChatMessage {
            sender_id: from.into(),
            recipient_id: to.into(),
            text: text.into(),
        }
    }

    fn room() -> (ChatRoom, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::default());
        (ChatRoom::new("alice", channel.clone()), channel)
    }

    #[test]
    fn roster_excludes_local_identity() {
        let (mut room, _) = room();
        assert!(room.apply(&ServerEvent::UserList(vec![
            "alice".into(),
            "bob".into(),
            "carol".into(),
        ])));
        assert_eq!(room.roster(), ["bob".to_string(), "carol".to_string()]);
        assert!(room.is_online("bob"));
        assert!(!room.is_online("alice"));
    }

    #[test]
    fn history_is_replaced_and_new_messages_appended() {
        let (mut room, _) = room();
        room.apply(&ServerEvent::NewMessage(msg("bob", "alice", "stale")));
        room.apply(&ServerEvent::LoadMessages(vec![
            msg("alice", "bob", "hi"),
            msg("carol", "alice", "hey"),
        ]));
        room.apply(&ServerEvent::NewMessage(msg("bob", "alice", "hello")));

        let texts: Vec<_> = room.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["hi", "hey", "hello"]);
    }

    #[test]
    fn conversation_filters_by_peer() {
        let (mut room, _) = room();
        room.apply(&ServerEvent::LoadMessages(vec![
            msg("alice", "bob", "1"),
            msg("carol", "alice", "2"),
            msg("bob", "alice", "3"),
            msg("bob", "carol", "4"),
        ]));
        let texts: Vec<_> = room
            .conversation("bob")
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, ["1", "3"]);
    }

    #[test]
    fn call_signals_are_not_chat_events() {
        let (mut room, _) = room();
        assert!(!room.apply(&ServerEvent::CallEnded { from_id: None }));
        assert!(room.messages().is_empty());
    }

    #[test]
    fn send_message_emits_trimmed_text() {
        let (room, channel) = room();
        room.send_message("bob", "  hello there ").unwrap();
        assert_eq!(
            channel.take(),
            vec![ClientEvent::SendMessage(msg("alice", "bob", "hello there"))]
        );
    }

    #[test]
    fn send_message_validates_input() {
        let (room, channel) = room();
        assert!(matches!(
            room.send_message("bob", "   "),
            Err(ChatError::EmptyText)
        ));
        assert!(matches!(
            room.send_message("", "hi"),
            Err(ChatError::NoRecipient)
        ));
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn send_failure_is_reported() {
        let (room, channel) = room();
        channel.set_failing(true);
        assert!(matches!(
            room.send_message("bob", "hi"),
            Err(ChatError::Signaling(_))
        ));
    }
}
