//! Lokale Medien: Capture-Geräte, Tracks und Mute
//!
//! Der MediaSessionManager besitzt höchstens einen lokalen Stream. Tracks
//! werden beim Release explizit gestoppt (Hardware freigeben), nicht nur
//! gedroppt. Mute/Kamera-Aus schalten nur die Track-Enablement um; der Track
//! bleibt in der Aushandlung und sendet Stille bzw. Schwarzbild.

use super::error::CallError;
use super::peer::PeerTransport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// TRACK TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Beschreibung eines lokalen Tracks für die Media-Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
}

/// Welche Geräte für einen Call geöffnet werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: cfg!(feature = "video-capture"),
        }
    }
}

impl MediaConstraints {
    pub fn kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.audio {
            kinds.push(TrackKind::Audio);
        }
        if self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

// ============================================================================
// DEVICE ABSTRACTION
// ============================================================================

/// Ein geöffnetes Capture-Gerät
pub trait CaptureDevice: Send {
    fn kind(&self) -> TrackKind;

    /// Aus: Gerät läuft weiter, liefert aber Stille/Schwarzbild
    fn set_enabled(&mut self, enabled: bool);

    /// Gibt die Hardware frei
    fn stop(&mut self);
}

/// Quelle für Capture-Geräte
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, CallError>;
}

/// Capture-Geräte des Hosts (cpal für Audio, V4L2 für Video)
#[derive(Debug, Clone, Default)]
pub struct HostMediaDevices {
    camera_device: Option<String>,
}

impl HostMediaDevices {
    pub fn new(camera_device: Option<String>) -> Self {
        Self { camera_device }
    }
}

#[async_trait]
impl MediaDevices for HostMediaDevices {
    async fn open(&self, kind: TrackKind) -> Result<Box<dyn CaptureDevice>, CallError> {
        match kind {
            TrackKind::Audio => open_microphone(),
            TrackKind::Video => open_camera(self.camera_device.as_deref()),
        }
    }
}

#[cfg(feature = "audio")]
fn open_microphone() -> Result<Box<dyn CaptureDevice>, CallError> {
    let mic = super::audio::MicrophoneCapture::start()
        .map_err(|e| CallError::DeviceUnavailable(e.to_string()))?;
    Ok(Box::new(mic))
}

#[cfg(not(feature = "audio"))]
fn open_microphone() -> Result<Box<dyn CaptureDevice>, CallError> {
    Err(CallError::DeviceUnavailable(
        "audio capture not built (enable feature `audio`)".to_string(),
    ))
}

#[cfg(feature = "video-capture")]
fn open_camera(path: Option<&str>) -> Result<Box<dyn CaptureDevice>, CallError> {
    let camera = super::camera::CameraCapture::start(path, 640, 480, 15)
        .map_err(|e| CallError::DeviceUnavailable(format!("{:#}", e)))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "video-capture"))]
fn open_camera(_path: Option<&str>) -> Result<Box<dyn CaptureDevice>, CallError> {
    Err(CallError::DeviceUnavailable(
        "camera capture not built (enable feature `video-capture`)".to_string(),
    ))
}

// ============================================================================
// LOCAL TRACKS
// ============================================================================

pub struct LocalTrack {
    info: TrackInfo,
    enabled: bool,
    stopped: bool,
    device: Box<dyn CaptureDevice>,
}

impl LocalTrack {
    fn new(stream_id: &str, device: Box<dyn CaptureDevice>) -> Self {
        let kind = device.kind();
        Self {
            info: TrackInfo {
                id: format!("{}-{}", kind.as_str(), Uuid::new_v4()),
                kind,
                stream_id: stream_id.to_string(),
            },
            enabled: true,
            stopped: false,
            device,
        }
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.stopped {
            return;
        }
        self.enabled = enabled;
        self.device.set_enabled(enabled);
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.device.stop();
            self.stopped = true;
            tracing::debug!("Stopped {} track {}", self.info.kind.as_str(), self.info.id);
        }
    }
}

// Auch ein abgebrochenes acquire() muss die Geräte freigeben
impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("info", &self.info)
            .field("enabled", &self.enabled)
            .field("stopped", &self.stopped)
            .finish()
    }
}

// ============================================================================
// MEDIA SESSION MANAGER
// ============================================================================

pub struct MediaSessionManager {
    devices: Arc<dyn MediaDevices>,
    tracks: Vec<LocalTrack>,
    mic_enabled: bool,
    cam_enabled: bool,
}

impl MediaSessionManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            tracks: Vec::new(),
            mic_enabled: true,
            cam_enabled: true,
        }
    }

    /// Öffnet alle angeforderten Geräte
    ///
    /// Schlägt ein Gerät fehl, werden die bereits geöffneten wieder gestoppt.
    pub async fn acquire(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<Vec<TrackInfo>, CallError> {
        if self.is_live() {
            return Err(CallError::DeviceUnavailable(
                "capture devices are busy".to_string(),
            ));
        }

        let kinds = constraints.kinds();
        if kinds.is_empty() {
            return Err(CallError::DeviceUnavailable(
                "neither audio nor video requested".to_string(),
            ));
        }

        let stream_id = format!("stream-{}", Uuid::new_v4());
        let mut tracks = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let device = self.devices.open(kind).await?;
            tracks.push(LocalTrack::new(&stream_id, device));
        }

        tracing::info!("Acquired {} local track(s)", tracks.len());

        self.tracks = tracks;
        self.mic_enabled = true;
        self.cam_enabled = true;
        Ok(self.track_infos())
    }

    /// Bindet die Tracks an den Transport (vor Offer/Answer)
    pub async fn attach(&self, peer: &dyn PeerTransport) -> Result<(), CallError> {
        if !self.is_live() {
            return Err(CallError::DeviceUnavailable(
                "no local stream acquired".to_string(),
            ));
        }
        peer.add_local_tracks(&self.track_infos()).await
    }

    pub fn track_infos(&self) -> Vec<TrackInfo> {
        self.tracks.iter().map(|t| t.info().clone()).collect()
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn is_live(&self) -> bool {
        !self.tracks.is_empty()
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.info.kind == kind)
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled
    }

    pub fn cam_enabled(&self) -> bool {
        self.cam_enabled
    }

    /// Mikrofon stumm schalten (ohne Neuverhandlung)
    pub fn set_mic_enabled(&mut self, enabled: bool) {
        self.mic_enabled = enabled;
        self.set_kind_enabled(TrackKind::Audio, enabled);
    }

    /// Kamera aus/an (ohne Neuverhandlung)
    pub fn set_cam_enabled(&mut self, enabled: bool) {
        self.cam_enabled = enabled;
        self.set_kind_enabled(TrackKind::Video, enabled);
    }

    fn set_kind_enabled(&mut self, kind: TrackKind, enabled: bool) {
        for track in self.tracks.iter_mut().filter(|t| t.info.kind == kind) {
            track.set_enabled(enabled);
        }
    }

    /// Stoppt alle Tracks. Mehrfacher Aufruf ist ein No-op.
    pub fn release(&mut self) -> bool {
        if self.tracks.is_empty() {
            return false;
        }
        for track in self.tracks.iter_mut() {
            track.stop();
        }
        self.tracks.clear();
        self.mic_enabled = true;
        self.cam_enabled = true;
        tracing::info!("Local media released");
        true
    }
}

impl std::fmt::Debug for MediaSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSessionManager")
            .field("tracks", &self.tracks)
            .field("mic_enabled", &self.mic_enabled)
            .field("cam_enabled", &self.cam_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevices, FakePeerFactory};
    use crate::call_engine::peer::PeerFactory;
    use crate::call_engine::session::CallId;
    use tokio::sync::mpsc;

    fn both() -> MediaConstraints {
        MediaConstraints {
            audio: true,
            video: true,
        }
    }

    #[tokio::test]
    async fn acquire_opens_every_requested_device() {
        let devices = Arc::new(FakeDevices::default());
        let mut media = MediaSessionManager::new(devices.clone());

        let tracks = media.acquire(both()).await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].kind, TrackKind::Audio);
        assert_eq!(tracks[1].kind, TrackKind::Video);
        assert_eq!(tracks[0].stream_id, tracks[1].stream_id);
        assert_eq!(devices.opened().len(), 2);
        assert!(media.is_live());
    }

    #[tokio::test]
    async fn second_acquire_is_busy() {
        let mut media = MediaSessionManager::new(Arc::new(FakeDevices::default()));
        media.acquire(both()).await.unwrap();
        assert!(matches!(
            media.acquire(both()).await,
            Err(CallError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn failed_device_stops_the_ones_already_open() {
        let devices = Arc::new(FakeDevices::failing_on(TrackKind::Video));
        let mut media = MediaSessionManager::new(devices.clone());

        let result = media.acquire(both()).await;
        assert!(matches!(result, Err(CallError::DeviceUnavailable(_))));
        assert!(!media.is_live());

        let opened = devices.opened();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].is_stopped());
    }

    #[tokio::test]
    async fn nothing_requested_is_unavailable() {
        let mut media = MediaSessionManager::new(Arc::new(FakeDevices::default()));
        let none = MediaConstraints {
            audio: false,
            video: false,
        };
        assert!(matches!(
            media.acquire(none).await,
            Err(CallError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn mute_keeps_tracks_running() {
        let devices = Arc::new(FakeDevices::default());
        let mut media = MediaSessionManager::new(devices.clone());
        media.acquire(both()).await.unwrap();

        media.set_mic_enabled(false);
        assert!(!media.mic_enabled());
        assert!(media.cam_enabled());

        let opened = devices.opened();
        let mic = opened.iter().find(|d| d.kind() == TrackKind::Audio).unwrap();
        let cam = opened.iter().find(|d| d.kind() == TrackKind::Video).unwrap();
        assert!(!mic.is_enabled());
        assert!(!mic.is_stopped());
        assert!(cam.is_enabled());

        media.set_cam_enabled(false);
        assert!(!cam.is_enabled());
        assert_eq!(media.tracks().len(), 2);
    }

    #[tokio::test]
    async fn release_stops_tracks_and_is_idempotent() {
        let devices = Arc::new(FakeDevices::default());
        let mut media = MediaSessionManager::new(devices.clone());
        media.acquire(both()).await.unwrap();
        media.set_mic_enabled(false);

        assert!(media.release());
        assert!(devices.opened().iter().all(|d| d.is_stopped()));
        assert!(!media.is_live());
        assert!(media.mic_enabled());

        assert!(!media.release());
    }

    #[tokio::test]
    async fn attach_hands_tracks_to_the_transport() {
        let mut media = MediaSessionManager::new(Arc::new(FakeDevices::default()));
        let factory = FakePeerFactory::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = factory.create(CallId::new(), tx).await.unwrap();

        assert!(media.attach(peer.as_ref()).await.is_err());

        let tracks = media.acquire(both()).await.unwrap();
        media.attach(peer.as_ref()).await.unwrap();
        assert_eq!(factory.last().unwrap().tracks(), tracks);
    }
}
