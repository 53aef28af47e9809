//! Frame ingestion sources.
//!
//! - Synthetic `stub://` streams (tests, demos)
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! Sources hand out frames in arrival order with a zero-based index. End of
//! stream is `Ok(None)`; an `Err` is a source failure and stops the frame loop.

use anyhow::Result;

use crate::frame::Frame;

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileSource, FileStats};

pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Nominal frames per second; used as the clip frame rate.
    fn frame_rate(&self) -> u32;

    /// Frame dimensions, once known.
    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn frame_rate(&self) -> u32 {
        (**self).frame_rate()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        (**self).dimensions()
    }
}

/// Replays pre-built frames. Handy for driving the loop from tests.
pub struct VecSource {
    frames: std::vec::IntoIter<Frame>,
    fps: u32,
}

impl VecSource {
    pub fn new(frames: Vec<Frame>, fps: u32) -> Self {
        Self {
            frames: frames.into_iter(),
            fps,
        }
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.next())
    }

    fn frame_rate(&self) -> u32 {
        self.fps
    }
}
