//! Überwachung des Transport-Zustands einer Session
//!
//! Bildet die Connection-States der Media-Engine auf genau eine
//! Entscheidung ab: `failed`, `disconnected` und `closed` beenden den Call,
//! alle anderen Zustände sind rein informativ.

use super::session::CallId;

/// Connectivity-Zustand des Peer-Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

/// Entscheidung des Monitors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorDecision {
    /// Teardown wie beim Auflegen, ohne ausgehendes end-call
    Terminate,
    Informational,
    /// Event stammt von einem anderen (alten) Transport
    Stale,
}

#[derive(Debug)]
pub struct ConnectionMonitor {
    call_id: CallId,
    last: ConnectionState,
    terminated: bool,
}

impl ConnectionMonitor {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            last: ConnectionState::New,
            terminated: false,
        }
    }

    pub fn last_state(&self) -> ConnectionState {
        self.last
    }

    /// Verarbeitet einen Zustandswechsel. `Terminate` wird höchstens einmal geliefert.
    pub fn observe(&mut self, call_id: CallId, state: ConnectionState) -> MonitorDecision {
        if call_id != self.call_id || self.terminated {
            return MonitorDecision::Stale;
        }

        tracing::info!(%call_id, "Peer connection state: {:?} -> {:?}", self.last, state);
        self.last = state;

        if state.is_terminal() {
            self.terminated = true;
            MonitorDecision::Terminate
        } else {
            MonitorDecision::Informational
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_terminate_once() {
        for state in [
            ConnectionState::Failed,
            ConnectionState::Disconnected,
            ConnectionState::Closed,
        ] {
            let id = CallId::new();
            let mut monitor = ConnectionMonitor::new(id);
            assert_eq!(monitor.observe(id, state), MonitorDecision::Terminate);
            assert_eq!(
                monitor.observe(id, ConnectionState::Closed),
                MonitorDecision::Stale
            );
        }
    }

    #[test]
    fn progress_states_are_informational() {
        let id = CallId::new();
        let mut monitor = ConnectionMonitor::new(id);
        for state in [
            ConnectionState::New,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            assert_eq!(monitor.observe(id, state), MonitorDecision::Informational);
        }
        assert_eq!(monitor.last_state(), ConnectionState::Connected);
    }

    #[test]
    fn events_from_other_sessions_are_stale() {
        let mut monitor = ConnectionMonitor::new(CallId::new());
        assert_eq!(
            monitor.observe(CallId::new(), ConnectionState::Failed),
            MonitorDecision::Stale
        );
        assert_eq!(monitor.last_state(), ConnectionState::New);
    }
}
