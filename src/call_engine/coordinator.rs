//! CallCoordinator - Fassade über Session, Medien und Signaling
//!
//! Der Coordinator ist die einzige Komponente, die von außen angesprochen
//! wird. Er verarbeitet ein Event nach dem anderen (`&mut self`): lokale
//! Intents (Anrufen, Annehmen, Auflegen, Mute), Relay-Events und Events der
//! Media-Engine. Zustandswechsel werden als `CallEvent` über einen
//! Broadcast-Kanal veröffentlicht.
//!
//! Aufbau- und Gerätefehler brechen den Versuch ab und führen zurück nach
//! IDLE. Transportverlust und Remote-Hangup sind keine Fehler, sondern enden
//! als `CallEvent::Ended { reason }`. Nichts wird wiederholt.

use super::error::CallError;
use super::media::{MediaConstraints, MediaDevices, MediaSessionManager, TrackKind};
use super::monitor::{ConnectionState, MonitorDecision};
use super::negotiation::NegotiationStrategy;
use super::peer::{PeerEvent, PeerEventSender, PeerFactory, SessionPeerEvent};
use super::session::{
    CallId, CallRole, CallSession, CallState, CandidateOutcome, InterruptReason, TeardownSignal,
};
use crate::signaling::{
    AnswerPayload, CandidatePayload, ClientEvent, EndCallPayload, IceCandidate, OfferPayload,
    SdpKind, ServerEvent, SessionDescription, SignalingChannel,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// EVENTS & SNAPSHOTS
// ============================================================================

/// Warum ein Call beendet wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    LocalHangUp,
    RemoteHangUp,
    /// Anrufer hat aufgelegt, bevor wir angenommen haben
    RemoteCancelled,
    Declined,
    TransportLost(ConnectionState),
    /// Niemand hat innerhalb der Ring-Zeit reagiert
    Timeout,
    NegotiationFailed,
}

/// Events die vom CallCoordinator ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    StateChanged {
        call_id: CallId,
        peer_id: String,
        state: CallState,
    },
    IncomingCall {
        call_id: CallId,
        from_id: String,
    },
    RemoteTrack {
        call_id: CallId,
        kind: TrackKind,
    },
    Ended {
        call_id: CallId,
        peer_id: String,
        reason: EndReason,
    },
    Error(String),
}

/// Read-only Sicht auf die aktuelle Session
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub peer_id: String,
    pub role: CallRole,
    pub state: CallState,
    pub local_description: Option<SessionDescription>,
    pub remote_description: Option<SessionDescription>,
    pub pending_candidates: usize,
    pub connected_at: Option<DateTime<Utc>>,
    pub mic_enabled: bool,
    pub cam_enabled: bool,
}

/// Verhandlungs- und Medien-Einstellungen (aus der Konfiguration)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSettings {
    pub negotiation: NegotiationStrategy,
    pub media: MediaConstraints,
}

// ============================================================================
// INTERRUPT HANDLE
// ============================================================================

/// Bricht laufende Schritte der aktuellen Session von außerhalb der
/// Event-Loop ab (z.B. aus dem Input-Reader bei "hangup")
#[derive(Clone, Default)]
pub struct InterruptHandle {
    current: Arc<Mutex<Option<(Arc<TeardownSignal>, CallState)>>>,
}

impl InterruptHandle {
    fn track(&self, session: Option<&CallSession>) {
        *self.current.lock() = session
            .filter(|s| !s.state().is_terminal())
            .map(|s| (s.teardown_signal(), s.state()));
    }

    /// Löst den Teardown aus, falls das im aktuellen Zustand Sinn ergibt.
    /// Der eigentliche Abbau passiert danach in der Event-Loop.
    pub fn interrupt(&self, reason: InterruptReason) -> bool {
        let current = self.current.lock();
        let Some((signal, state)) = current.as_ref() else {
            return false;
        };
        let allowed = match reason {
            InterruptReason::Decline => {
                matches!(state, CallState::Ringing | CallState::Answering)
            }
            InterruptReason::HangUp => !state.is_terminal(),
        };
        if !allowed {
            return false;
        }
        tracing::debug!(call_id = %signal.call_id(), "Interrupt requested: {:?}", reason);
        signal.cancel(Some(reason))
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.lock();
        f.debug_struct("InterruptHandle")
            .field("state", &current.as_ref().map(|(_, state)| *state))
            .finish()
    }
}

// ============================================================================
// CALL COORDINATOR
// ============================================================================

pub struct CallCoordinator {
    local_id: String,
    signaling: Arc<dyn SignalingChannel>,
    peers: Arc<dyn PeerFactory>,
    media: MediaSessionManager,
    session: Option<CallSession>,
    settings: CallSettings,
    peer_events: PeerEventSender,
    interrupt: InterruptHandle,
    events: broadcast::Sender<CallEvent>,
}

impl CallCoordinator {
    /// Erstellt einen Coordinator für die lokale Identität
    ///
    /// `peer_events` ist die Sendeseite der Queue, aus der die Event-Loop
    /// die Engine-Events wieder an `on_peer_event` zurückgibt.
    pub fn new(
        local_id: impl Into<String>,
        signaling: Arc<dyn SignalingChannel>,
        peers: Arc<dyn PeerFactory>,
        devices: Arc<dyn MediaDevices>,
        settings: CallSettings,
        peer_events: PeerEventSender,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            local_id: local_id.into(),
            signaling,
            peers,
            media: MediaSessionManager::new(devices),
            session: None,
            settings,
            peer_events,
            interrupt: InterruptHandle::default(),
            events,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(CallState::Idle)
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.session.as_ref().map(|s| CallSnapshot {
            call_id: s.call_id(),
            peer_id: s.peer_id().to_string(),
            role: s.role(),
            state: s.state(),
            local_description: s.local_description().cloned(),
            remote_description: s.remote_description().cloned(),
            pending_candidates: s.pending_candidates(),
            connected_at: s.connected_at(),
            mic_enabled: self.media.mic_enabled(),
            cam_enabled: self.media.cam_enabled(),
        })
    }

    fn active(&self) -> Option<&CallSession> {
        self.session.as_ref().filter(|s| !s.state().is_terminal())
    }

    fn active_mut(&mut self) -> Option<&mut CallSession> {
        self.session.as_mut().filter(|s| !s.state().is_terminal())
    }

    // ========================================================================
    // LOCAL INTENTS
    // ========================================================================

    /// Startet einen ausgehenden Anruf
    pub async fn start_call(&mut self, peer_id: &str) -> Result<(), CallError> {
        let peer_id = peer_id.trim();
        if peer_id.is_empty() {
            return Err(CallError::invalid("peer id must not be empty"));
        }
        if peer_id == self.local_id {
            return Err(CallError::invalid("cannot call yourself"));
        }
        if let Some(existing) = self.active() {
            return Err(CallError::invalid(format!(
                "already in a call with {} ({:?})",
                existing.peer_id(),
                existing.state()
            )));
        }

        let session = CallSession::outbound(peer_id);
        tracing::info!(call_id = %session.call_id(), "Calling {}", peer_id);
        self.session = Some(session);
        self.notify_state();

        match self.negotiate_offer().await {
            Ok(offer) => {
                self.emit(ClientEvent::CallUser(OfferPayload::new(
                    self.local_id.clone(),
                    peer_id.to_string(),
                    offer,
                )));
                Ok(())
            }
            Err(CallError::Cancelled) => {
                self.finish_interrupted(false).await;
                Err(CallError::Cancelled)
            }
            Err(e) => {
                tracing::error!("Failed to start call to {}: {}", peer_id, e);
                self.abort_attempt(&e).await;
                Err(e)
            }
        }
    }

    async fn negotiate_offer(&mut self) -> Result<SessionDescription, CallError> {
        let (call_id, signal) = match self.active() {
            Some(s) => (s.call_id(), s.teardown_signal()),
            None => return Err(CallError::Cancelled),
        };

        signal.guarded(self.media.acquire(self.settings.media)).await?;
        let transport = signal
            .guarded(self.peers.create(call_id, self.peer_events.clone()))
            .await?;

        let session = self.session.as_mut().ok_or(CallError::Cancelled)?;
        session.bind_transport(Arc::clone(&transport))?;
        signal.guarded(self.media.attach(transport.as_ref())).await?;

        session
            .create_local(SdpKind::Offer, self.settings.negotiation)
            .await
    }

    /// Nimmt den klingelnden Anruf an
    pub async fn accept_incoming(&mut self) -> Result<(), CallError> {
        let session = self
            .session
            .as_mut()
            .filter(|s| s.state() == CallState::Ringing)
            .ok_or_else(|| CallError::invalid("no ringing call to accept"))?;
        let offer = session.begin_answer()?;
        let peer_id = session.peer_id().to_string();
        tracing::info!(call_id = %session.call_id(), "Accepting call from {}", peer_id);
        self.notify_state();

        match self.negotiate_answer(offer).await {
            Ok(answer) => {
                self.emit(ClientEvent::AnswerCall(AnswerPayload::new(
                    self.local_id.clone(),
                    peer_id,
                    answer,
                )));
                if let Some(session) = self.session.as_mut() {
                    session.mark_connected()?;
                }
                self.notify_state();
                Ok(())
            }
            Err(CallError::Cancelled) => {
                self.finish_interrupted(true).await;
                Err(CallError::Cancelled)
            }
            Err(e) => {
                // Kein answer-call: der Anrufer bleibt in OFFERING bis Timeout/Hangup
                tracing::error!("Failed to accept call from {}: {}", peer_id, e);
                self.abort_attempt(&e).await;
                Err(e)
            }
        }
    }

    async fn negotiate_answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        let (call_id, signal) = match self.active() {
            Some(s) => (s.call_id(), s.teardown_signal()),
            None => return Err(CallError::Cancelled),
        };

        signal.guarded(self.media.acquire(self.settings.media)).await?;
        let transport = signal
            .guarded(self.peers.create(call_id, self.peer_events.clone()))
            .await?;

        let session = self.session.as_mut().ok_or(CallError::Cancelled)?;
        session.bind_transport(Arc::clone(&transport))?;
        session.apply_remote(offer).await?;
        signal.guarded(self.media.attach(transport.as_ref())).await?;

        session
            .create_local(SdpKind::Answer, self.settings.negotiation)
            .await
    }

    /// Lehnt den klingelnden Anruf ab (ohne Signal an den Anrufer)
    pub async fn decline_incoming(&mut self) -> Result<(), CallError> {
        match self.session.as_ref().map(|s| s.state()) {
            Some(CallState::Ringing) => {
                self.teardown(EndReason::Declined, CallState::Ended, false)
                    .await;
                Ok(())
            }
            Some(state) if state.is_terminal() => Ok(()),
            Some(state) => Err(CallError::invalid(format!(
                "cannot decline in state {:?}",
                state
            ))),
            None => Err(CallError::invalid("no incoming call")),
        }
    }

    /// Legt auf. Ohne laufenden Call ein No-op.
    pub async fn hang_up(&mut self) -> Result<(), CallError> {
        if self.active().is_some() {
            self.teardown(EndReason::LocalHangUp, CallState::Ended, true)
                .await;
        }
        Ok(())
    }

    /// Schaltet das Mikrofon um und liefert den neuen Zustand
    pub fn toggle_mic(&mut self) -> Result<bool, CallError> {
        if !self.media.has_track(TrackKind::Audio) {
            return Err(CallError::invalid("no active microphone track"));
        }
        let enabled = !self.media.mic_enabled();
        self.media.set_mic_enabled(enabled);
        tracing::info!("Microphone {}", if enabled { "on" } else { "muted" });
        Ok(enabled)
    }

    /// Schaltet die Kamera um und liefert den neuen Zustand
    pub fn toggle_cam(&mut self) -> Result<bool, CallError> {
        if !self.media.has_track(TrackKind::Video) {
            return Err(CallError::invalid("no active camera track"));
        }
        let enabled = !self.media.cam_enabled();
        self.media.set_cam_enabled(enabled);
        tracing::info!("Camera {}", if enabled { "on" } else { "off" });
        Ok(enabled)
    }

    // ========================================================================
    // INBOUND SIGNALING
    // ========================================================================

    /// Verteilt ein Relay-Event. Chat- und Roster-Events werden ignoriert.
    pub async fn handle_signal(&mut self, event: ServerEvent) -> Result<(), CallError> {
        match event {
            ServerEvent::IncomingCall { from_id, offer } => {
                self.on_incoming_offer(&from_id, offer).await
            }
            ServerEvent::CallAnswered { from_id, answer } => self.on_answer(&from_id, answer).await,
            ServerEvent::IceCandidate { from_id, candidate } => {
                self.on_candidate(from_id.as_deref(), candidate).await;
                Ok(())
            }
            ServerEvent::CallEnded { from_id } => {
                self.on_end(from_id.as_deref()).await;
                Ok(())
            }
            ServerEvent::UserList(_) | ServerEvent::LoadMessages(_) | ServerEvent::NewMessage(_) => {
                Ok(())
            }
        }
    }

    /// Eingehendes Offer: neue Session in RINGING
    pub async fn on_incoming_offer(
        &mut self,
        from_id: &str,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        if from_id.is_empty() || from_id == self.local_id {
            return Err(CallError::invalid("offer without a valid sender"));
        }
        if offer.kind != SdpKind::Offer {
            return Err(CallError::InvalidDescription(format!(
                "expected offer from {}, got {:?}",
                from_id, offer.kind
            )));
        }

        if let Some(existing) = self.active() {
            if existing.peer_id() == from_id && existing.pending_offer() == Some(&offer) {
                tracing::debug!("Duplicate offer from {} ignored", from_id);
                return Ok(());
            }

            let busy_with = existing.peer_id().to_string();
            tracing::warn!("Rejecting call from {}: busy with {}", from_id, busy_with);
            if busy_with != from_id {
                self.emit(ClientEvent::EndCall(EndCallPayload::new(
                    self.local_id.clone(),
                    from_id.to_string(),
                )));
            }
            return Err(CallError::invalid(format!(
                "already in a call with {}",
                busy_with
            )));
        }

        let session = CallSession::inbound(from_id, offer);
        let call_id = session.call_id();
        tracing::info!(%call_id, "Incoming call from {}", from_id);
        self.session = Some(session);

        self.publish(CallEvent::IncomingCall {
            call_id,
            from_id: from_id.to_string(),
        });
        self.notify_state();
        Ok(())
    }

    /// Answer des Angerufenen
    pub async fn on_answer(
        &mut self,
        from_id: &str,
        answer: SessionDescription,
    ) -> Result<(), CallError> {
        if answer.kind != SdpKind::Answer {
            return Err(CallError::InvalidDescription(format!(
                "expected answer from {}, got {:?}",
                from_id, answer.kind
            )));
        }
        let session = self
            .active_mut()
            .filter(|s| s.peer_id() == from_id)
            .ok_or_else(|| CallError::invalid(format!("no call with {} awaits an answer", from_id)))?;

        session.begin_accept_answer()?;
        self.notify_state();

        let Some(session) = self.session.as_mut() else {
            return Err(CallError::Cancelled);
        };
        match session.apply_remote(answer).await {
            Ok(_) => {
                session.mark_connected()?;
                self.notify_state();
                Ok(())
            }
            Err(CallError::Cancelled) => {
                self.finish_interrupted(true).await;
                Err(CallError::Cancelled)
            }
            Err(e) => {
                tracing::error!("Failed to apply answer from {}: {}", from_id, e);
                self.publish(CallEvent::Error(e.to_string()));
                self.teardown(EndReason::NegotiationFailed, CallState::Failed, true)
                    .await;
                Err(e)
            }
        }
    }

    /// Remote-Candidate: anwenden oder bis zur Remote Description puffern
    pub async fn on_candidate(
        &mut self,
        from_id: Option<&str>,
        candidate: IceCandidate,
    ) -> CandidateOutcome {
        let Some(session) = self.active_mut() else {
            tracing::debug!("Candidate without active call ignored");
            return CandidateOutcome::Ignored;
        };
        if let Some(from) = from_id {
            if from != session.peer_id() {
                tracing::debug!("Candidate from {} ignored (call is with {})", from, session.peer_id());
                return CandidateOutcome::Ignored;
            }
        }
        session.add_remote_candidate(candidate).await
    }

    /// Gegenseite hat aufgelegt (oder vor dem Annehmen abgebrochen)
    pub async fn on_end(&mut self, from_id: Option<&str>) -> bool {
        let Some(session) = self.active() else {
            tracing::debug!("call-ended without active call ignored");
            return false;
        };
        if let Some(from) = from_id {
            if from != session.peer_id() {
                tracing::debug!("call-ended from {} ignored", from);
                return false;
            }
        }

        let reason = if session.state() == CallState::Ringing {
            EndReason::RemoteCancelled
        } else {
            EndReason::RemoteHangUp
        };
        self.teardown(reason, CallState::Ended, false).await
    }

    // ========================================================================
    // MEDIA ENGINE EVENTS
    // ========================================================================

    pub async fn on_peer_event(&mut self, event: SessionPeerEvent) {
        let SessionPeerEvent { call_id, event } = event;
        match event {
            PeerEvent::ConnectionState(state) => {
                self.on_transport_state(call_id, state).await;
            }
            PeerEvent::LocalCandidate(candidate) => self.on_local_candidate(call_id, candidate),
            PeerEvent::RemoteTrack(kind) => {
                if self.active().map(|s| s.call_id()) == Some(call_id) {
                    self.publish(CallEvent::RemoteTrack { call_id, kind });
                }
            }
        }
    }

    /// Connection-State des Transports der Session `call_id`
    pub async fn on_transport_state(&mut self, call_id: CallId, state: ConnectionState) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match session.observe_transport(call_id, state) {
            MonitorDecision::Terminate => {
                tracing::warn!(%call_id, "Transport lost ({:?}), ending call", state);
                self.teardown(EndReason::TransportLost(state), CallState::Ended, false)
                    .await
            }
            MonitorDecision::Informational => false,
            MonitorDecision::Stale => {
                tracing::debug!(%call_id, "Stale transport state {:?} ignored", state);
                false
            }
        }
    }

    /// Lokal entdeckter Candidate (nur im Trickle-Modus gesendet)
    pub fn on_local_candidate(&mut self, call_id: CallId, candidate: IceCandidate) {
        if !self.settings.negotiation.sends_candidates() {
            return;
        }
        let Some(peer_id) = self
            .active()
            .filter(|s| s.call_id() == call_id)
            .map(|s| s.peer_id().to_string())
        else {
            tracing::debug!(%call_id, "Local candidate for stale session dropped");
            return;
        };
        tracing::debug!(%call_id, "Sending local candidate to {}", peer_id);
        self.emit(ClientEvent::IceCandidate(CandidatePayload::new(
            self.local_id.clone(),
            peer_id,
            candidate,
        )));
    }

    /// Ring-Timeout: unbeantwortete Calls beenden
    pub async fn expire_unanswered(&mut self, call_id: CallId) -> bool {
        let state = match self.active() {
            Some(s) if s.call_id() == call_id => s.state(),
            _ => return false,
        };
        match state {
            CallState::Offering => {
                tracing::info!(%call_id, "Call was not answered in time");
                self.teardown(EndReason::Timeout, CallState::Ended, true)
                    .await
            }
            CallState::Ringing => {
                tracing::info!(%call_id, "Incoming call was not accepted in time");
                self.teardown(EndReason::Timeout, CallState::Ended, false)
                    .await
            }
            _ => false,
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Sendet ein Event; Fehler sind nicht fatal
    fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.signaling.emit(event) {
            let err = CallError::SignalingDeliveryUnknown(format!("{}: {}", name, e));
            tracing::warn!("{}", err);
            self.publish(CallEvent::Error(err.to_string()));
        }
    }

    fn publish(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    /// Aktualisiert den Interrupt-Handle und meldet den Zustand
    fn notify_state(&self) {
        self.interrupt.track(self.session.as_ref());
        let (call_id, peer_id, state) = match &self.session {
            Some(s) => (s.call_id(), s.peer_id().to_string(), s.state()),
            None => return,
        };
        self.publish(CallEvent::StateChanged {
            call_id,
            peer_id,
            state,
        });
    }

    /// Räumt einen gescheiterten Aufbau ab und kehrt nach IDLE zurück
    async fn abort_attempt(&mut self, error: &CallError) {
        self.media.release();
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.close(CallState::Failed).await;
        self.interrupt.track(None);

        self.publish(CallEvent::Error(error.to_string()));
        self.publish(CallEvent::StateChanged {
            call_id: session.call_id(),
            peer_id: session.peer_id().to_string(),
            state: CallState::Idle,
        });
    }

    /// Beendet eine Session, deren Schritt per Interrupt abgebrochen wurde
    ///
    /// `peer_knows` ist false, solange noch kein Offer gesendet wurde
    /// (dann kein end-call).
    async fn finish_interrupted(&mut self, peer_knows: bool) {
        let reason = self
            .session
            .as_ref()
            .and_then(|s| s.teardown_signal().reason());
        match reason {
            Some(InterruptReason::Decline) => {
                self.teardown(EndReason::Declined, CallState::Ended, false)
                    .await;
            }
            _ => {
                self.teardown(EndReason::LocalHangUp, CallState::Ended, peer_knows)
                    .await;
            }
        }
    }

    /// Gemeinsamer Abbau für Auflegen, Ablehnen, Remote-Ende und Transportverlust
    ///
    /// Medien freigeben, Transport schließen, Zustand setzen, optional
    /// end-call senden. Nur der erste Aufruf pro Session wirkt.
    async fn teardown(
        &mut self,
        reason: EndReason,
        final_state: CallState,
        notify_peer: bool,
    ) -> bool {
        let Some(session) = self.active_mut() else {
            return false;
        };
        let call_id = session.call_id();
        let peer_id = session.peer_id().to_string();
        let duration = session.duration();

        self.media.release();
        if let Some(session) = self.session.as_mut() {
            session.close(final_state).await;
        }
        self.interrupt.track(None);

        if notify_peer {
            self.emit(ClientEvent::EndCall(EndCallPayload::new(
                self.local_id.clone(),
                peer_id.clone(),
            )));
        }

        match duration {
            Some(d) => tracing::info!(
                %call_id,
                "Call with {} ended after {}s ({:?})",
                peer_id,
                d.num_seconds(),
                reason
            ),
            None => tracing::info!(%call_id, "Call with {} ended ({:?})", peer_id, reason),
        }

        self.publish(CallEvent::StateChanged {
            call_id,
            peer_id: peer_id.clone(),
            state: final_state,
        });
        self.publish(CallEvent::Ended {
            call_id,
            peer_id,
            reason,
        });
        true
    }
}

impl std::fmt::Debug for CallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCoordinator")
            .field("local_id", &self.local_id)
            .field("session", &self.session)
            .field("media", &self.media)
            .field("settings", &self.settings)
            .finish()
    }
}
