//! V4L2-Kamera (Feature `video-capture`)
//!
//! Ein Capture-Thread hält das Gerät per mmap-Streaming aktiv. Kodierung und
//! Paketierung übernimmt die Media-Engine des Hosts, die Frames werden hier
//! nur abgeholt. Ist die Kamera ausgeschaltet, ruht der Thread.

use super::media::{CaptureDevice, TrackKind};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Pause zwischen zwei Prüfungen, solange die Kamera aus ist
const IDLE_POLL: Duration = Duration::from_millis(50);

pub struct CameraCapture {
    stop: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CameraCapture {
    /// Öffnet die Kamera (Standard `/dev/video0`) und startet den Capture-Thread
    pub fn start(device_path: Option<&str>, width: u32, height: u32, fps: u32) -> Result<Self> {
        let path = device_path.unwrap_or("/dev/video0");
        let dev = Device::with_path(path)
            .with_context(|| format!("Failed to open camera at {}", path))?;

        let mut fmt = dev.format().context("Failed to get camera format")?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(b"YUYV");
        let actual = dev
            .set_format(&fmt)
            .context("Failed to set camera format (YUYV)")?;

        tracing::info!(
            "Camera opened: {}x{} fourcc={} (requested {}x{} @ {}fps)",
            actual.width,
            actual.height,
            actual.fourcc,
            width,
            height,
            fps
        );

        if let Ok(mut params) = dev.params() {
            params.interval = v4l::Fraction::new(1, fps);
            let _ = dev.set_params(&params);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let enabled = Arc::new(AtomicBool::new(true));

        let stop_flag = Arc::clone(&stop);
        let enabled_flag = Arc::clone(&enabled);
        let handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                if let Err(e) = capture_loop(dev, &stop_flag, &enabled_flag) {
                    tracing::error!("Camera capture loop exited: {:#}", e);
                }
            })
            .context("Failed to spawn camera thread")?;

        Ok(Self {
            stop,
            enabled,
            handle: Some(handle),
        })
    }
}

impl CaptureDevice for CameraCapture {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::debug!("Camera enabled: {}", enabled);
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Camera thread panicked");
            }
            tracing::info!("Camera capture stopped");
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(dev: Device, stop: &AtomicBool, enabled: &AtomicBool) -> Result<()> {
    let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
        .context("Failed to start V4L2 mmap stream")?;

    while !stop.load(Ordering::Relaxed) {
        if !enabled.load(Ordering::Relaxed) {
            std::thread::sleep(IDLE_POLL);
            continue;
        }
        stream.next().context("Failed to read camera frame")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_an_error() {
        let result = CameraCapture::start(Some("/dev/no-such-camera"), 640, 480, 30);
        assert!(result.is_err());
    }
}
