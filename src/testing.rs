//! Test-Fakes für Relay, Media-Engine und Capture-Geräte

use crate::call_engine::{
    CallCoordinator, CallError, CallId, CallSettings, CaptureDevice, ConnectionState,
    MediaConstraints, MediaDevices, PeerEvent, PeerEventReceiver, PeerEventSender, PeerFactory,
    PeerTransport, SessionPeerEvent, TrackInfo, TrackKind,
};
use crate::signaling::{
    ClientEvent, IceCandidate, ServerEvent, SessionDescription, SignalingChannel, SignalingError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// SIGNALING
// ============================================================================

/// Zeichnet alle gesendeten Events auf
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<ClientEvent>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().clone()
    }

    /// Entnimmt alle bisher gesendeten Events
    pub fn take(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|e| e.name()).collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SignalingChannel for RecordingChannel {
    fn emit(&self, event: ClientEvent) -> Result<(), SignalingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SignalingError::NotConnected);
        }
        self.sent.lock().push(event);
        Ok(())
    }
}

/// Was der Relay aus einem Client-Event für den Empfänger macht
pub fn relay(event: ClientEvent) -> Option<(String, ServerEvent)> {
    match event {
        ClientEvent::Join(_) => None,
        ClientEvent::SendMessage(msg) => {
            Some((msg.recipient_id.clone(), ServerEvent::NewMessage(msg)))
        }
        ClientEvent::CallUser(p) => Some((
            p.to_user_id,
            ServerEvent::IncomingCall {
                from_id: p.from_user_id,
                offer: p.offer,
            },
        )),
        ClientEvent::AnswerCall(p) => Some((
            p.to_user_id,
            ServerEvent::CallAnswered {
                from_id: p.from_user_id,
                answer: p.answer,
            },
        )),
        ClientEvent::IceCandidate(p) => Some((
            p.to_user_id,
            ServerEvent::IceCandidate {
                from_id: Some(p.from_user_id),
                candidate: p.candidate,
            },
        )),
        ClientEvent::EndCall(p) => Some((
            p.to_user_id,
            ServerEvent::CallEnded {
                from_id: Some(p.from_user_id),
            },
        )),
    }
}

// ============================================================================
// CAPTURE DEVICES
// ============================================================================

/// Beobachtbarer Zustand eines Fake-Geräts
#[derive(Debug)]
pub struct FakeDeviceState {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeDeviceState {
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeDevice(Arc<FakeDeviceState>);

impl CaptureDevice for FakeDevice {
    fn kind(&self) -> TrackKind {
        self.0.kind
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.0.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct FakeDevices {
    opened: Mutex<Vec<Arc<FakeDeviceState>>>,
    failing: Mutex<Option<TrackKind>>,
}

impl FakeDevices {
    pub fn failing_on(kind: TrackKind) -> Self {
        let devices = Self::default();
        devices.set_failing(Some(kind));
        devices
    }

    pub fn set_failing(&self, kind: Option<TrackKind>) {
        *self.failing.lock() = kind;
    }

    pub fn opened(&self) -> Vec<Arc<FakeDeviceState>> {
        self.opened.lock().clone()
    }

    /// Kein geöffnetes Gerät läuft noch
    pub fn all_stopped(&self) -> bool {
        self.opened.lock().iter().all(|d| d.is_stopped())
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, CallError> {
        if *self.failing.lock() == Some(kind) {
            return Err(CallError::DeviceUnavailable(format!(
                "{} permission denied",
                kind.as_str()
            )));
        }
        let state = Arc::new(FakeDeviceState {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        self.opened.lock().push(Arc::clone(&state));
        Ok(Box::new(FakeDevice(state)))
    }
}

// ============================================================================
// PEER TRANSPORT
// ============================================================================

#[derive(Debug)]
pub struct FakePeer {
    call_id: CallId,
    events: PeerEventSender,
    tracks: Mutex<Vec<TrackInfo>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<IceCandidate>>,
    reject_candidates: AtomicBool,
    fail_remote: AtomicBool,
    stall: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

impl FakePeer {
    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.lock().clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied.lock().clone()
    }

    pub fn reject_candidates(&self, reject: bool) {
        self.reject_candidates.store(reject, Ordering::SeqCst);
    }

    /// Descriptions werden nie fertig (bis zum Teardown)
    pub fn stall_descriptions(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Simuliert ein Event der Media-Engine
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(SessionPeerEvent {
            call_id: self.call_id,
            event,
        });
    }

    pub fn emit_state(&self, state: ConnectionState) {
        self.emit(PeerEvent::ConnectionState(state));
    }

    async fn maybe_stall(&self) {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl PeerTransport for FakePeer {
    async fn add_local_tracks(&self, tracks: &[TrackInfo]) -> Result<(), CallError> {
        self.tracks.lock().extend_from_slice(tracks);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, CallError> {
        self.maybe_stall().await;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} offer\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111",
            self.call_id
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, CallError> {
        self.maybe_stall().await;
        if self.remote.lock().is_none() {
            return Err(CallError::Engine("no remote offer".into()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} answer\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111",
            self.call_id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError> {
        self.maybe_stall().await;
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(CallError::Engine("malformed remote description".into()));
        }
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CallError> {
        if self.remote.lock().is_none() {
            return Err(CallError::Engine("remote description not set".into()));
        }
        if self.reject_candidates.load(Ordering::SeqCst) {
            return Err(CallError::Engine("candidate rejected".into()));
        }
        self.applied.lock().push(candidate);
        Ok(())
    }

    async fn gathered_local_description(&self) -> Result<SessionDescription, CallError> {
        let mut local = self
            .local
            .lock()
            .clone()
            .ok_or_else(|| CallError::Engine("no local description".into()))?;
        local
            .sdp
            .push_str("\r\na=candidate:1 1 udp 2122260223 127.0.0.1 9 typ host\r\na=end-of-candidates");
        Ok(local)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct FakePeerFactory {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail_create: AtomicBool,
    fail_remote: AtomicBool,
    stall: AtomicBool,
}

impl FakePeerFactory {
    pub fn last(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Neue Peers lehnen Remote Descriptions ab
    pub fn set_fail_remote(&self, fail: bool) {
        self.fail_remote.store(fail, Ordering::SeqCst);
    }

    /// Neue Peers erzeugen nie eine Description
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        call_id: CallId,
        events: PeerEventSender,
    ) -> Result<Arc<dyn PeerTransport>, CallError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CallError::Engine("peer connection refused".into()));
        }
        let peer = Arc::new(FakePeer {
            call_id,
            events,
            tracks: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            reject_candidates: AtomicBool::new(false),
            fail_remote: AtomicBool::new(self.fail_remote.load(Ordering::SeqCst)),
            stall: AtomicBool::new(self.stall.load(Ordering::SeqCst)),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
        });
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ============================================================================
// TEST ENDPOINT
// ============================================================================

/// Ein Coordinator mit allen Fakes drumherum
pub struct TestEndpoint {
    pub coordinator: CallCoordinator,
    pub channel: Arc<RecordingChannel>,
    pub peers: Arc<FakePeerFactory>,
    pub devices: Arc<FakeDevices>,
    pub peer_rx: PeerEventReceiver,
}

impl TestEndpoint {
    /// Trickle, Audio und Video
    pub fn new(id: &str) -> Self {
        Self::with_settings(
            id,
            CallSettings {
                media: MediaConstraints {
                    audio: true,
                    video: true,
                },
                ..Default::default()
            },
        )
    }

    pub fn with_settings(id: &str, settings: CallSettings) -> Self {
        let channel = Arc::new(RecordingChannel::default());
        let peers = Arc::new(FakePeerFactory::default());
        let devices = Arc::new(FakeDevices::default());
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let coordinator = CallCoordinator::new(
            id,
            channel.clone(),
            peers.clone(),
            devices.clone(),
            settings,
            peer_tx,
        );
        Self {
            coordinator,
            channel,
            peers,
            devices,
            peer_rx,
        }
    }

    /// Stellt alle bisher gesendeten Events von `self` an `to` zu
    pub async fn deliver_to(&self, to: &mut TestEndpoint) -> Vec<Result<(), CallError>> {
        let mut results = Vec::new();
        for event in self.channel.take() {
            if let Some((recipient, server_event)) = relay(event) {
                if recipient == to.coordinator.local_id() {
                    results.push(to.coordinator.handle_signal(server_event).await);
                }
            }
        }
        results
    }

    /// Verarbeitet alle anstehenden Engine-Events
    pub async fn pump_peer_events(&mut self) {
        while let Ok(event) = self.peer_rx.try_recv() {
            self.coordinator.on_peer_event(event).await;
        }
    }
}
