//! Local file frame source.
//!
//! `stub://<name>?frames=N` produces a bounded synthetic stream (default 300
//! frames) at the configured geometry. Any other value is a local video path,
//! decoded with FFmpeg when the `ingest-file-ffmpeg` feature is enabled.

use anyhow::{anyhow, Context, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::FrameSource;
use crate::frame::Frame;

/// Frames produced by a `stub://` source without `frames=`.
pub const DEFAULT_STUB_FRAMES: u64 = 300;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path or `stub://` URI.
    pub path: String,
    /// Frame rate reported when the file does not carry one (and for stubs).
    pub target_fps: u32,
    /// Synthetic frame geometry.
    pub width: u32,
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths and stub:// (got {:?})",
                config.path
            ));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)?),
            });
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(Box::new(FfmpegFileSource::new(config)?)),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-file-ffmpeg feature",
                config.path
            ))
        }
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn frame_rate(&self) -> u32 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.config.target_fps,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_rate(),
        }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.backend {
            FileBackend::Synthetic(source) => Some((source.config.width, source.config.height)),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => Some(source.dimensions()),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    limit: u64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "synthetic source needs non-zero geometry, got {}x{}",
                config.width,
                config.height
            ));
        }
        let limit = stub_frame_limit(&config.path)?;
        log::info!(
            "FileSource: {} (synthetic, {} frames, {}x{} @ {} fps)",
            config.path,
            limit,
            config.width,
            config.height,
            config.target_fps
        );
        Ok(Self {
            config,
            limit,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.limit {
            return Ok(None);
        }
        let index = self.frame_count;
        self.frame_count += 1;
        let pixels = self.synthetic_pixels(index);
        Frame::new(index, self.config.width, self.config.height, pixels).map(Some)
    }

    /// Diagonal gradient that drifts one step per frame.
    fn synthetic_pixels(&self, index: u64) -> Vec<u8> {
        let (w, h) = (self.config.width as u64, self.config.height as u64);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let v = ((x + y + index) % 256) as u8;
                pixels.extend_from_slice(&[v, v / 2, 255 - v]);
            }
        }
        pixels
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn stub_frame_limit(uri: &str) -> Result<u64> {
    let parsed = url::Url::parse(uri).with_context(|| format!("invalid stub uri {}", uri))?;
    match parsed.query_pairs().find(|(k, _)| k == "frames") {
        Some((_, v)) => v
            .parse()
            .with_context(|| format!("invalid frames={} in {}", v, uri)),
        None => Ok(DEFAULT_STUB_FRAMES),
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
