//! Konfiguration
//!
//! Wird als TOML aus dem Konfigurationsverzeichnis geladen:
//! - Windows: `%APPDATA%/kaufm/call-app/config/config.toml`
//! - macOS: `~/Library/Application Support/com.kaufm.call-app/config.toml`
//! - Linux: `~/.config/call-app/config.toml`
//!
//! Fehlt die Datei, gelten die Defaults. `SIGNALING_URL` überschreibt die
//! Relay-Adresse, CLI-Flags werden danach vom Binary angewendet.
//!
//! ```toml
//! [signaling]
//! url = "http://localhost:3001"
//!
//! [[ice.servers]]
//! urls = ["stun:stun.l.google.com:19302"]
//!
//! [call]
//! negotiation = "single-shot"
//! ring_timeout_secs = 30
//! ```

use crate::call_engine::{CallSettings, MediaConstraints, NegotiationStrategy};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

const DEFAULT_SIGNALING_URL: &str = "http://localhost:3001";
const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// CONFIG SECTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub signaling: SignalingConfig,
    pub ice: IceConfig,
    pub call: CallConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Relay-Adresse (http/https oder ws/wss)
    pub url: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SIGNALING_URL.to_string(),
        }
    }
}

/// Ein STUN- oder TURN-Server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServerConfig {
    fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            ..Default::default()
        }
    }

    fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    /// Nur TURN-Relay-Candidates verwenden
    Relay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub servers: Vec<IceServerConfig>,
    pub transport_policy: IceTransportPolicy,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
            ],
            transport_policy: IceTransportPolicy::All,
        }
    }
}

impl IceConfig {
    /// Baut die Konfiguration für eine neue Peer Connection
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let ice_transport_policy = match self.transport_policy {
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        };

        RTCConfiguration {
            ice_servers,
            ice_transport_policy,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub negotiation: NegotiationStrategy,
    /// Nach dieser Zeit wird ein unbeantworteter Call beendet
    pub ring_timeout_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            negotiation: NegotiationStrategy::default(),
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
        }
    }
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
    /// V4L2-Gerät, z.B. `/dev/video2`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_device: Option<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let defaults = MediaConstraints::default();
        Self {
            audio: defaults.audio,
            video: defaults.video,
            camera_device: None,
        }
    }
}

impl MediaConfig {
    pub fn constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: self.audio,
            video: self.video,
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl AppConfig {
    /// Pfad der Standard-Konfigurationsdatei
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("com", "kaufm", "call-app").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Lädt die Konfiguration (expliziter Pfad oder Standardpfad)
    ///
    /// Ein expliziter Pfad muss existieren, der Standardpfad darf fehlen.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path()?;
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!("No config file at {:?}, using defaults", path);
                    Self::default()
                }
            }
        };

        config.apply_env(std::env::var("SIGNALING_URL").ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded config from {:?}", path);
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Übernimmt den Wert von `SIGNALING_URL`, falls gesetzt
    pub fn apply_env(&mut self, signaling_url: Option<String>) {
        if let Some(url) = signaling_url.filter(|u| !u.trim().is_empty()) {
            tracing::debug!("Signaling URL overridden by environment: {}", url);
            self.signaling.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signaling.url.trim().is_empty() {
            return Err(ConfigError::Invalid("signaling.url is empty".into()));
        }

        for server in &self.ice.servers {
            if server.urls.is_empty() {
                return Err(ConfigError::Invalid("ice server without urls".into()));
            }
            for url in &server.urls {
                let known = ["stun:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !known {
                    return Err(ConfigError::Invalid(format!(
                        "unsupported ice server url: {}",
                        url
                    )));
                }
            }
            if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
                return Err(ConfigError::Invalid(format!(
                    "turn server {} needs username and credential",
                    server.urls.join(", ")
                )));
            }
        }

        if self.ice.transport_policy == IceTransportPolicy::Relay
            && !self.ice.servers.iter().any(IceServerConfig::is_turn)
        {
            return Err(ConfigError::Invalid(
                "transport_policy = \"relay\" requires a turn server".into(),
            ));
        }

        if self.call.ring_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "call.ring_timeout_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Einstellungen für den CallCoordinator
    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            negotiation: self.call.negotiation,
            media: self.media.constraints(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
