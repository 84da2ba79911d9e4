//! Mikrofon-Capture über cpal
//!
//! Hält das Standard-Eingabegerät für die Dauer eines Calls offen. Kodierung
//! und Paketierung übernimmt die Media-Engine des Hosts; dieses Modul
//! besitzt nur den Gerätezugriff. Stummschalten pausiert den Stream.

use super::media::{CaptureDevice, TrackKind};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use thiserror::Error;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz ist der Standard für Opus)
const SAMPLE_RATE: u32 = 48000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// MICROPHONE CAPTURE
// ============================================================================

/// Laufende Aufnahme vom Standard-Eingabegerät
pub struct MicrophoneCapture {
    stream: Option<Stream>,
    enabled: bool,
}

// cpal::Stream ist nicht Send. Der Stream wird nur vom besitzenden
// MediaSessionManager angefasst (start/stop), nie aus dem Callback.
unsafe impl Send for MicrophoneCapture {}

impl MicrophoneCapture {
    /// Öffnet das Standard-Mikrofon und startet die Aufnahme
    pub fn start() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;

        // Beste Konfiguration finden
        let config = Self::find_best_input_config(&device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let stream = device
            .build_input_stream(
                &config,
                |_: &[f32], _: &cpal::InputCallbackInfo| {},
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            enabled: true,
        })
    }

    /// Findet die beste Input-Konfiguration
    fn find_best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

        select_best_config(configs.collect())
    }
}

impl CaptureDevice for MicrophoneCapture {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        if let Some(stream) = &self.stream {
            let result = if enabled { stream.play() } else { stream.pause() };
            if let Err(e) = result {
                tracing::warn!("Failed to switch capture stream: {}", e);
            }
        }
        tracing::debug!("Microphone enabled: {}", enabled);
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::warn!("Failed to pause capture stream: {}", e);
            }
            drop(stream);
            tracing::info!("Audio capture stopped");
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// CONFIG SELECTION
// ============================================================================

/// Wählt die beste Konfiguration aus einer Liste
fn select_best_config(configs: Vec<SupportedStreamConfigRange>) -> Result<StreamConfig, AudioError> {
    // Priorität: 48kHz > andere, F32 > andere
    let target_rate = cpal::SampleRate(SAMPLE_RATE);

    for config in &configs {
        if config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
            && config.sample_format() == SampleFormat::F32
        {
            return Ok(config.with_sample_rate(target_rate).into());
        }
    }

    for config in &configs {
        if config.sample_format() == SampleFormat::F32 {
            return Ok(config.with_max_sample_rate().into());
        }
    }

    Err(AudioError::UnsupportedConfig(
        "No f32 input configuration found".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_configs_is_unsupported() {
        assert!(matches!(
            select_best_config(Vec::new()),
            Err(AudioError::UnsupportedConfig(_))
        ));
    }

    #[test]
    fn capture_is_graceful_on_headless() {
        // Auf CI ohne Soundkarte darf start() nur einen Fehler liefern
        if let Ok(mut mic) = MicrophoneCapture::start() {
            mic.set_enabled(false);
            mic.set_enabled(true);
            mic.stop();
            mic.stop();
        }
    }
}
