//! Zustandsautomat eines einzelnen Calls
//!
//! Eine CallSession gehört genau zu einem Peer und besitzt genau einen
//! Peer-Transport. Lokale und Remote Description werden jeweils höchstens
//! einmal gesetzt; gepufferte Candidates werden direkt nach der Remote
//! Description ausgeleert.
//!
//! Jeder asynchrone Schritt läuft gegen das Teardown-Signal der Session.
//! Ist der Teardown einmal eingeleitet, endet jeder noch laufende Schritt
//! mit `CallError::Cancelled` und verändert die Session nicht mehr.

use super::candidates::CandidateBuffer;
use super::error::CallError;
use super::monitor::{ConnectionMonitor, ConnectionState, MonitorDecision};
use super::negotiation::NegotiationStrategy;
use super::peer::PeerTransport;
use crate::signaling::{IceCandidate, SdpKind, SessionDescription};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS & STATES
// ============================================================================

/// Eindeutige ID einer Session (für Logs und Timer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status eines Calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Kein Call
    Idle,
    /// Ausgehender Call, Offer wird erzeugt bzw. ist gesendet
    Offering,
    /// Eingehender Call wartet auf accept/decline
    Ringing,
    /// Callee erzeugt die Answer
    Answering,
    /// Caller wendet die empfangene Answer an
    AwaitingAnswer,
    Connected,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// Ein Call ist im Gange (weder Idle noch beendet)
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != CallState::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

// ============================================================================
// TEARDOWN SIGNAL
// ============================================================================

/// Wodurch ein Teardown von außen ausgelöst wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    HangUp,
    Decline,
}

/// Einmal-Signal: "diese Session wird abgebaut"
#[derive(Debug)]
pub struct TeardownSignal {
    call_id: CallId,
    tx: watch::Sender<bool>,
    reason: Mutex<Option<InterruptReason>>,
}

impl TeardownSignal {
    pub fn new(call_id: CallId) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            call_id,
            tx,
            reason: Mutex::new(None),
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Löst das Signal aus. Nur der erste Aufruf zählt.
    pub fn cancel(&self, reason: Option<InterruptReason>) -> bool {
        let mut current = self.reason.lock();
        if self.is_cancelled() {
            return false;
        }
        *current = reason;
        self.tx.send_replace(true);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn reason(&self) -> Option<InterruptReason> {
        *self.reason.lock()
    }

    /// Wartet, bis das Signal ausgelöst wurde
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Führt einen Schritt aus, der beim Teardown abgebrochen wird
    pub async fn guarded<T, F>(&self, step: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, CallError>>,
    {
        if self.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(CallError::Cancelled),
            result = step => result,
        }
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Ergebnis eines eingehenden Candidates
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    Applied,
    Buffered,
    /// Von der Media-Engine abgelehnt (nicht fatal)
    Rejected(CallError),
    /// Session ist bereits beendet
    Ignored,
}

pub struct CallSession {
    call_id: CallId,
    peer_id: String,
    role: CallRole,
    state: CallState,
    pending_offer: Option<SessionDescription>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    candidates: CandidateBuffer,
    transport: Option<Arc<dyn PeerTransport>>,
    monitor: ConnectionMonitor,
    teardown: Arc<TeardownSignal>,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    fn new(peer_id: String, role: CallRole, state: CallState) -> Self {
        let call_id = CallId::new();
        Self {
            call_id,
            peer_id,
            role,
            state,
            pending_offer: None,
            local_description: None,
            remote_description: None,
            candidates: CandidateBuffer::new(),
            transport: None,
            monitor: ConnectionMonitor::new(call_id),
            teardown: Arc::new(TeardownSignal::new(call_id)),
            created_at: Utc::now(),
            connected_at: None,
        }
    }

    /// Ausgehender Call (OFFERING)
    pub fn outbound(peer_id: impl Into<String>) -> Self {
        Self::new(peer_id.into(), CallRole::Caller, CallState::Offering)
    }

    /// Eingehender Call (RINGING), das Offer wird bis zum accept gehalten
    pub fn inbound(peer_id: impl Into<String>, offer: SessionDescription) -> Self {
        let mut session = Self::new(peer_id.into(), CallRole::Callee, CallState::Ringing);
        session.pending_offer = Some(offer);
        session
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn pending_offer(&self) -> Option<&SessionDescription> {
        self.pending_offer.as_ref()
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn teardown_signal(&self) -> Arc<TeardownSignal> {
        Arc::clone(&self.teardown)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// Dauer seit dem Verbindungsaufbau
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.connected_at.map(|t| Utc::now() - t)
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// Bindet den (frischen) Peer-Transport dieser Session
    pub fn bind_transport(&mut self, transport: Arc<dyn PeerTransport>) -> Result<(), CallError> {
        if self.transport.is_some() {
            return Err(CallError::invalid("transport already bound to this session"));
        }
        if self.state.is_terminal() {
            return Err(CallError::Cancelled);
        }
        self.transport = Some(transport);
        Ok(())
    }

    /// RINGING → ANSWERING, liefert das gespeicherte Offer
    pub fn begin_answer(&mut self) -> Result<SessionDescription, CallError> {
        if self.state != CallState::Ringing {
            return Err(CallError::invalid(format!(
                "cannot accept in state {:?}",
                self.state
            )));
        }
        let offer = self
            .pending_offer
            .take()
            .ok_or_else(|| CallError::invalid("no stored offer"))?;
        self.state = CallState::Answering;
        Ok(offer)
    }

    /// OFFERING → AWAITING_ANSWER
    pub fn begin_accept_answer(&mut self) -> Result<(), CallError> {
        if self.state != CallState::Offering || self.local_description.is_none() {
            return Err(CallError::invalid(format!(
                "unexpected answer in state {:?}",
                self.state
            )));
        }
        self.state = CallState::AwaitingAnswer;
        Ok(())
    }

    /// Beide Descriptions gesetzt → CONNECTED
    pub fn mark_connected(&mut self) -> Result<(), CallError> {
        if !matches!(self.state, CallState::Answering | CallState::AwaitingAnswer) {
            return Err(CallError::invalid(format!(
                "cannot connect from state {:?}",
                self.state
            )));
        }
        if self.local_description.is_none() || self.remote_description.is_none() {
            return Err(CallError::invalid("descriptions incomplete"));
        }
        self.state = CallState::Connected;
        self.connected_at = Some(Utc::now());
        tracing::info!(call_id = %self.call_id, "Call connected with {}", self.peer_id);
        Ok(())
    }

    // ========================================================================
    // NEGOTIATION STEPS
    // ========================================================================

    fn bound_transport(&self) -> Result<Arc<dyn PeerTransport>, CallError> {
        self.transport
            .clone()
            .ok_or_else(|| CallError::invalid("no transport bound"))
    }

    /// Erzeugt und setzt die lokale Description (Offer oder Answer)
    pub async fn create_local(
        &mut self,
        kind: SdpKind,
        strategy: NegotiationStrategy,
    ) -> Result<SessionDescription, CallError> {
        if self.local_description.is_some() {
            return Err(CallError::invalid("local description already set"));
        }
        let transport = self.bound_transport()?;
        let signal = self.teardown_signal();

        let description = signal
            .guarded(async {
                let desc = match kind {
                    SdpKind::Offer => transport.create_offer().await?,
                    SdpKind::Answer => transport.create_answer().await?,
                };
                transport.set_local_description(desc.clone()).await?;
                strategy.finalize_local(transport.as_ref(), desc).await
            })
            .await?;

        tracing::debug!(call_id = %self.call_id, "Local {:?} set", kind);
        self.local_description = Some(description.clone());
        Ok(description)
    }

    /// Setzt die Remote Description und leert danach den Candidate-Puffer
    ///
    /// Liefert die Anzahl der angewendeten gepufferten Candidates.
    pub async fn apply_remote(&mut self, desc: SessionDescription) -> Result<usize, CallError> {
        if self.remote_description.is_some() {
            return Err(CallError::invalid("remote description already set"));
        }
        let transport = self.bound_transport()?;
        let signal = self.teardown_signal();

        signal
            .guarded(transport.set_remote_description(desc.clone()))
            .await?;
        self.remote_description = Some(desc);

        let buffered = self.candidates.drain_if_ready(true);
        let mut applied = 0;
        for candidate in buffered {
            match signal.guarded(transport.add_ice_candidate(candidate)).await {
                Ok(()) => applied += 1,
                Err(CallError::Cancelled) => return Err(CallError::Cancelled),
                Err(e) => {
                    tracing::warn!(call_id = %self.call_id, "Buffered candidate rejected: {}", e);
                }
            }
        }

        tracing::debug!(
            call_id = %self.call_id,
            "Remote description set, {} buffered candidate(s) applied",
            applied
        );
        Ok(applied)
    }

    /// Wendet einen Remote-Candidate an oder puffert ihn
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> CandidateOutcome {
        if self.state.is_terminal() {
            return CandidateOutcome::Ignored;
        }

        let transport = match (&self.remote_description, &self.transport) {
            (Some(_), Some(transport)) => Arc::clone(transport),
            _ => {
                if !self.candidates.push(candidate) {
                    return CandidateOutcome::Ignored;
                }
                tracing::debug!(
                    call_id = %self.call_id,
                    "Candidate buffered ({} pending)",
                    self.candidates.len()
                );
                return CandidateOutcome::Buffered;
            }
        };

        match self
            .teardown
            .guarded(transport.add_ice_candidate(candidate))
            .await
        {
            Ok(()) => CandidateOutcome::Applied,
            Err(CallError::Cancelled) => CandidateOutcome::Ignored,
            Err(e) => {
                let err = CallError::CandidateApplicationFailed(e.to_string());
                tracing::warn!(call_id = %self.call_id, "{}", err);
                CandidateOutcome::Rejected(err)
            }
        }
    }

    /// Leitet einen Connection-State an den Monitor weiter
    pub fn observe_transport(&mut self, call_id: CallId, state: ConnectionState) -> MonitorDecision {
        if self.state.is_terminal() {
            return MonitorDecision::Stale;
        }
        self.monitor.observe(call_id, state)
    }

    pub fn last_transport_state(&self) -> ConnectionState {
        self.monitor.last_state()
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Baut die Session ab: Signal auslösen, Transport schließen, Puffer und
    /// Descriptions freigeben
    ///
    /// Idempotent: nur der erste Aufruf hat eine Wirkung und liefert `true`.
    pub async fn close(&mut self, final_state: CallState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        debug_assert!(final_state.is_terminal());

        self.teardown.cancel(None);
        self.state = final_state;

        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.candidates.clear();
        self.pending_offer = None;
        self.local_description = None;
        self.remote_description = None;

        tracing::info!(call_id = %self.call_id, "Session closed as {:?}", final_state);
        true
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.call_id)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("local_set", &self.local_description.is_some())
            .field("remote_set", &self.remote_description.is_some())
            .field("pending_candidates", &self.candidates.len())
            .finish()
    }
}
