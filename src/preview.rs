//! Live preview sinks and the alarm output.

use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::IncidentClass;

/// What the frame loop knows about the current frame, besides pixels.
#[derive(Clone, Debug, Default)]
pub struct PreviewOverlay {
    pub active: Vec<IncidentClass>,
    /// Detections drawn on the frame.
    pub outlined: usize,
    pub violence_mean: Option<f32>,
}

/// Returned by a preview after each frame; `Quit` ends the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreviewControl {
    Continue,
    Quit,
}

/// A display surface updated once per processed frame.
pub trait PreviewSink {
    fn show(&mut self, frame: &Frame, overlay: &PreviewOverlay) -> Result<PreviewControl>;
}

/// Discards everything.
pub struct NullPreview;

impl PreviewSink for NullPreview {
    fn show(&mut self, _frame: &Frame, _overlay: &PreviewOverlay) -> Result<PreviewControl> {
        Ok(PreviewControl::Continue)
    }
}

/// Set once a line reading `q` arrives on `input`. The reader thread is
/// detached and exits at end of input.
pub fn watch_for_quit<R>(input: R) -> Arc<AtomicBool>
where
    R: BufRead + Send + 'static,
{
    let flag = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&flag);
    let spawned = thread::Builder::new()
        .name("preview-quit".into())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    seen.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("quit key unavailable: {}", e);
    }
    flag
}

fn control(quit: &Option<Arc<AtomicBool>>) -> PreviewControl {
    match quit {
        Some(flag) if flag.load(Ordering::SeqCst) => PreviewControl::Quit,
        _ => PreviewControl::Continue,
    }
}

/// Logs banner changes immediately and a status line every `every` frames.
pub struct LogPreview {
    every: u64,
    last_active: Vec<IncidentClass>,
    quit: Option<Arc<AtomicBool>>,
}

impl LogPreview {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            last_active: Vec::new(),
            quit: None,
        }
    }

    /// Quit the frame loop when `q` + Enter is typed on stdin.
    pub fn quit_on_stdin(self) -> Self {
        log::info!("type q + Enter to stop");
        self.quit_on(watch_for_quit(std::io::BufReader::new(std::io::stdin())))
    }

    pub fn quit_on(mut self, flag: Arc<AtomicBool>) -> Self {
        self.quit = Some(flag);
        self
    }
}

impl Default for LogPreview {
    fn default() -> Self {
        Self::new(150)
    }
}

impl PreviewSink for LogPreview {
    fn show(&mut self, frame: &Frame, overlay: &PreviewOverlay) -> Result<PreviewControl> {
        if overlay.active != self.last_active {
            if overlay.active.is_empty() {
                log::info!("[frame {}] banner cleared", frame.index);
            } else {
                let banners: Vec<&str> = overlay.active.iter().map(|c| c.banner()).collect();
                log::info!("[frame {}] {}", frame.index, banners.join(" | "));
            }
            self.last_active = overlay.active.clone();
        }
        if frame.index % self.every == 0 {
            log::debug!(
                "[frame {}] {}x{} outlined={} violence_mean={}",
                frame.index,
                frame.width,
                frame.height,
                overlay.outlined,
                overlay
                    .violence_mean
                    .map(|m| format!("{:.3}", m))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Ok(control(&self.quit))
    }
}

/// Overwrites a single JPEG with the latest annotated frame.
pub struct JpegPreview {
    path: PathBuf,
    quit: Option<Arc<AtomicBool>>,
}

impl JpegPreview {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            quit: None,
        }
    }

    pub fn quit_on(mut self, flag: Arc<AtomicBool>) -> Self {
        self.quit = Some(flag);
        self
    }
}

impl PreviewSink for JpegPreview {
    fn show(&mut self, frame: &Frame, _overlay: &PreviewOverlay) -> Result<PreviewControl> {
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        image
            .save_with_format(&tmp, image::ImageFormat::Jpeg)
            .with_context(|| format!("write preview {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("publish preview {}", self.path.display()))?;
        Ok(control(&self.quit))
    }
}

/// Audible/visible alarm raised while a class is active.
pub trait Alarm: Send + Sync {
    fn sound(&self, class: IncidentClass);
}

pub struct SilentAlarm;

impl Alarm for SilentAlarm {
    fn sound(&self, _class: IncidentClass) {}
}

/// Terminal bell plus a warning, at most once per `interval`.
pub struct BellAlarm {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl BellAlarm {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    fn due(&self) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        let now = Instant::now();
        if last.is_some_and(|t| now.duration_since(t) < self.interval) {
            return false;
        }
        *last = Some(now);
        true
    }
}

impl Default for BellAlarm {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl Alarm for BellAlarm {
    fn sound(&self, class: IncidentClass) {
        if !self.due() {
            return;
        }
        log::warn!("ALARM: {}", class.banner());
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}
