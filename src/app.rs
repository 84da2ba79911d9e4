//! Terminal-Frontend
//!
//! Liest Befehle von stdin und führt alle Eingänge (Befehle, Relay-Events,
//! Engine-Events, Ring-Timer) in einer einzigen Event-Loop zusammen. Der
//! CallCoordinator sieht dadurch immer nur ein Event zur Zeit.

use crate::call_engine::{
    CallCoordinator, CallEvent, CallId, CallState, EndReason, HostMediaDevices, InterruptHandle,
    InterruptReason, WebRtcPeerFactory,
};
use crate::chat::ChatRoom;
use crate::config::AppConfig;
use crate::signaling::{ServerEvent, SignalingChannel, SignalingClient, SignalingEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

const HELP: &str = "\
Commands:
  call <id>          call a user
  accept             accept the ringing call
  decline            decline the ringing call
  hangup             end the current call
  mic | cam          toggle microphone / camera
  msg <id> <text>    send a chat message
  users              list online users
  history <id>       show the conversation with a user
  status             show the current call
  quit               hang up and exit";

// ============================================================================
// USER COMMANDS
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}' (type 'help')")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// Eine Zeile von stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Call(String),
    Accept,
    Decline,
    HangUp,
    ToggleMic,
    ToggleCam,
    Message { to: String, text: String },
    Users,
    History(String),
    Status,
    Help,
    Quit,
}

impl UserCommand {
    /// Parst eine Eingabezeile. Leere Zeilen ergeben `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        let command = match cmd.to_ascii_lowercase().as_str() {
            "call" => {
                let peer = single_arg(rest).ok_or(CommandError::Usage("call <id>"))?;
                UserCommand::Call(peer)
            }
            "accept" => UserCommand::Accept,
            "decline" => UserCommand::Decline,
            "hangup" | "hang-up" => UserCommand::HangUp,
            "mic" => UserCommand::ToggleMic,
            "cam" => UserCommand::ToggleCam,
            "msg" => {
                let (to, text) = rest
                    .split_once(char::is_whitespace)
                    .map(|(to, text)| (to.to_string(), text.trim().to_string()))
                    .filter(|(_, text)| !text.is_empty())
                    .ok_or(CommandError::Usage("msg <id> <text>"))?;
                UserCommand::Message { to, text }
            }
            "users" => UserCommand::Users,
            "history" => {
                let peer = single_arg(rest).ok_or(CommandError::Usage("history <id>"))?;
                UserCommand::History(peer)
            }
            "status" => UserCommand::Status,
            "help" | "?" => UserCommand::Help,
            "quit" | "exit" => UserCommand::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// Befehle, die einen laufenden Aufbau sofort abbrechen sollen
    fn interrupt_reason(&self) -> Option<InterruptReason> {
        match self {
            UserCommand::HangUp | UserCommand::Quit => Some(InterruptReason::HangUp),
            UserCommand::Decline => Some(InterruptReason::Decline),
            _ => None,
        }
    }
}

fn single_arg(rest: &str) -> Option<String> {
    let mut parts = rest.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(arg), None) => Some(arg.to_string()),
        _ => None,
    }
}

// ============================================================================
// EVENT LOOP
// ============================================================================

/// Verbindet mit dem Relay und läuft bis `quit` oder Verbindungsverlust
pub async fn run(config: AppConfig, identity: String) -> Result<()> {
    let mut client = SignalingClient::new(config.signaling.url.clone());
    let mut relay_rx = client
        .connect(identity.clone())
        .await
        .with_context(|| format!("Failed to connect to relay at {}", config.signaling.url))?;
    let signaling: Arc<dyn SignalingChannel> = Arc::new(client);

    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
    let mut coordinator = CallCoordinator::new(
        identity.clone(),
        Arc::clone(&signaling),
        Arc::new(WebRtcPeerFactory::new(&config.ice)),
        Arc::new(HostMediaDevices::new(config.media.camera_device.clone())),
        config.call_settings(),
        peer_tx,
    );
    let mut chat = ChatRoom::new(identity.clone(), signaling);
    let mut call_events = coordinator.subscribe();

    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<CallId>();
    let ring_timeout = config.call.ring_timeout();

    let mut commands = spawn_stdin_reader(coordinator.interrupt_handle());

    println!("Connected as '{}'. Type 'help' for commands.", identity);

    loop {
        tokio::select! {
            biased;

            event = call_events.recv() => match event {
                Ok(event) => on_call_event(event, &timer_tx, ring_timeout),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} call event(s)", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            Some(command) = commands.recv() => {
                if !handle_command(command, &mut coordinator, &chat).await {
                    break;
                }
            }

            event = relay_rx.recv() => match event {
                Some(SignalingEvent::Connected { sid }) => {
                    tracing::debug!("Relay session {}", sid);
                }
                Some(SignalingEvent::Message(event)) => {
                    on_relay_event(event, &mut coordinator, &mut chat).await;
                }
                Some(SignalingEvent::Disconnected) | None => {
                    println!("Lost connection to relay.");
                    let _ = coordinator.hang_up().await;
                    break;
                }
            },

            Some(event) = peer_rx.recv() => coordinator.on_peer_event(event).await,

            Some(call_id) = timer_rx.recv() => {
                coordinator.expire_unanswered(call_id).await;
            }
        }
    }

    // Verbleibende Events (z.B. Ended nach quit) noch ausgeben
    while let Ok(event) = call_events.try_recv() {
        on_call_event(event, &timer_tx, ring_timeout);
    }

    tracing::info!("Shutting down");
    Ok(())
}

/// Liest stdin zeilenweise. Auflegen und Ablehnen brechen einen laufenden
/// Aufbau sofort ab, bevor der Befehl in die Queue geht.
fn spawn_stdin_reader(interrupt: InterruptHandle) -> mpsc::UnboundedReceiver<UserCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let _ = tx.send(UserCommand::Quit);
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    let _ = tx.send(UserCommand::Quit);
                    break;
                }
            };

            match UserCommand::parse(&line) {
                Ok(Some(command)) => {
                    if let Some(reason) = command.interrupt_reason() {
                        interrupt.interrupt(reason);
                    }
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => println!("{}", e),
            }
        }
    });

    rx
}

/// Führt einen Befehl aus. `false` beendet die Event-Loop.
async fn handle_command(
    command: UserCommand,
    coordinator: &mut CallCoordinator,
    chat: &ChatRoom,
) -> bool {
    let result = match command {
        UserCommand::Call(peer) => {
            if !chat.is_online(&peer) {
                tracing::warn!("'{}' is not in the roster, calling anyway", peer);
            }
            coordinator.start_call(&peer).await
        }
        UserCommand::Accept => coordinator.accept_incoming().await,
        UserCommand::Decline => coordinator.decline_incoming().await,
        UserCommand::HangUp => coordinator.hang_up().await,
        UserCommand::ToggleMic => coordinator.toggle_mic().map(|on| {
            println!("Microphone {}", if on { "on" } else { "muted" });
        }),
        UserCommand::ToggleCam => coordinator.toggle_cam().map(|on| {
            println!("Camera {}", if on { "on" } else { "off" });
        }),
        UserCommand::Message { to, text } => {
            if let Err(e) = chat.send_message(&to, &text) {
                println!("Message not sent: {}", e);
            }
            Ok(())
        }
        UserCommand::Users => {
            if chat.roster().is_empty() {
                println!("Nobody else is online.");
            } else {
                println!("Online: {}", chat.roster().join(", "));
            }
            Ok(())
        }
        UserCommand::History(peer) => {
            let conversation = chat.conversation(&peer);
            if conversation.is_empty() {
                println!("No messages with {}.", peer);
            }
            for msg in conversation {
                println!("  {}: {}", msg.sender_id, msg.text);
            }
            Ok(())
        }
        UserCommand::Status => {
            print_status(coordinator);
            Ok(())
        }
        UserCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        UserCommand::Quit => {
            let _ = coordinator.hang_up().await;
            return false;
        }
    };

    if let Err(e) = result {
        println!("Error: {}", e);
    }
    true
}

async fn on_relay_event(
    event: ServerEvent,
    coordinator: &mut CallCoordinator,
    chat: &mut ChatRoom,
) {
    if event.is_call_signal() {
        if let Err(e) = coordinator.handle_signal(event).await {
            tracing::warn!("Call signal not handled: {}", e);
        }
        return;
    }

    if let ServerEvent::NewMessage(msg) = &event {
        if msg.sender_id != coordinator.local_id() {
            println!("[{}] {}", msg.sender_id, msg.text);
        }
    }
    if chat.apply(&event) {
        if let ServerEvent::UserList(_) = event {
            tracing::info!("Online: {}", chat.roster().join(", "));
        }
    }
}

fn on_call_event(
    event: CallEvent,
    timer_tx: &mpsc::UnboundedSender<CallId>,
    ring_timeout: Duration,
) {
    match event {
        CallEvent::StateChanged {
            call_id,
            peer_id,
            state,
        } => {
            match state {
                CallState::Offering => println!("Calling {}...", peer_id),
                CallState::Connected => println!("Connected with {}.", peer_id),
                CallState::Failed => println!("Call with {} failed.", peer_id),
                _ => {}
            }
            if matches!(state, CallState::Offering | CallState::Ringing) {
                arm_ring_timer(call_id, ring_timeout, timer_tx.clone());
            }
        }
        CallEvent::IncomingCall { from_id, .. } => {
            println!("Incoming call from {} (accept / decline)", from_id);
        }
        CallEvent::RemoteTrack { kind, .. } => {
            tracing::info!("Receiving {} from peer", kind.as_str());
        }
        CallEvent::Ended { peer_id, reason, .. } => {
            println!("Call with {} ended: {}", peer_id, describe(reason));
        }
        CallEvent::Error(message) => println!("Call error: {}", message),
    }
}

fn arm_ring_timer(call_id: CallId, timeout: Duration, tx: mpsc::UnboundedSender<CallId>) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = tx.send(call_id);
    });
}

fn describe(reason: EndReason) -> String {
    match reason {
        EndReason::LocalHangUp => "hung up".into(),
        EndReason::RemoteHangUp => "remote hung up".into(),
        EndReason::RemoteCancelled => "caller cancelled".into(),
        EndReason::Declined => "declined".into(),
        EndReason::TransportLost(state) => format!("connection {:?}", state).to_lowercase(),
        EndReason::Timeout => "no answer".into(),
        EndReason::NegotiationFailed => "negotiation failed".into(),
    }
}

fn print_status(coordinator: &CallCoordinator) {
    let Some(snapshot) = coordinator.snapshot() else {
        println!("No call.");
        return;
    };
    let duration = snapshot
        .connected_at
        .map(|t| format!(", {}s", (Utc::now() - t).num_seconds()))
        .unwrap_or_default();
    println!(
        "{:?} call with {}: {:?}{} (mic {}, cam {})",
        snapshot.role,
        snapshot.peer_id,
        snapshot.state,
        duration,
        if snapshot.mic_enabled { "on" } else { "off" },
        if snapshot.cam_enabled { "on" } else { "off" },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_commands() {
        assert_eq!(
            UserCommand::parse("call bob"),
            Ok(Some(UserCommand::Call("bob".into())))
        );
        assert_eq!(UserCommand::parse("  ACCEPT "), Ok(Some(UserCommand::Accept)));
        assert_eq!(UserCommand::parse("hangup"), Ok(Some(UserCommand::HangUp)));
        assert_eq!(UserCommand::parse("mic"), Ok(Some(UserCommand::ToggleMic)));
        assert_eq!(UserCommand::parse("quit"), Ok(Some(UserCommand::Quit)));
        assert_eq!(UserCommand::parse("   "), Ok(None));
    }

    #[test]
    fn message_keeps_the_whole_text() {
        assert_eq!(
            UserCommand::parse("msg bob hello there  bob"),
            Ok(Some(UserCommand::Message {
                to: "bob".into(),
                text: "hello there  bob".into(),
            }))
        );
    }

    #[test]
    fn reports_usage_errors() {
        assert_eq!(
            UserCommand::parse("call"),
            Err(CommandError::Usage("call <id>"))
        );
        assert_eq!(
            UserCommand::parse("call bob carol"),
            Err(CommandError::Usage("call <id>"))
        );
        assert_eq!(
            UserCommand::parse("msg bob"),
            Err(CommandError::Usage("msg <id> <text>"))
        );
        assert_eq!(
            UserCommand::parse("dial bob"),
            Err(CommandError::Unknown("dial".into()))
        );
    }

    #[test]
    fn only_teardown_commands_interrupt() {
        assert_eq!(
            UserCommand::HangUp.interrupt_reason(),
            Some(InterruptReason::HangUp)
        );
        assert_eq!(
            UserCommand::Decline.interrupt_reason(),
            Some(InterruptReason::Decline)
        );
        assert_eq!(UserCommand::Accept.interrupt_reason(), None);
        assert_eq!(UserCommand::Call("bob".into()).interrupt_reason(), None);
    }

    #[test]
    fn end_reasons_are_readable() {
        assert_eq!(describe(EndReason::Timeout), "no answer");
        assert_eq!(describe(EndReason::RemoteCancelled), "caller cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn ring_timer_fires_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let call_id = CallId::new();
        arm_ring_timer(call_id, Duration::from_secs(45), tx);
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(44)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(rx.recv().await, Some(call_id));
    }
}
