//! Evidence clip recording.
//!
//! A `ClipRecorder` owns one clip in progress. Frames are streamed to a
//! `.part` file next to the final path; `finalize` flushes, syncs and renames
//! it, so a clip observed at its final path is always complete.
//!
//! The default encoding is `mjpeg`: Motion-JPEG in an AVI container, which
//! common players open without extra codecs. `raw` holds the annotated RGB24
//! frames verbatim and exists for tests and frame-exact inspection. With
//! `clip-ffmpeg`, clips can be H.264/MP4.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::{rgb_len, Frame};

mod avi;
#[cfg(feature = "clip-ffmpeg")]
mod h264;

const CLIP_MAGIC: &[u8; 4] = b"ICLP";
const CLIP_TRAILER: &[u8; 4] = b"ICLE";
const CLIP_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClipCodec {
    #[default]
    Mjpeg,
    Raw,
    H264,
}

impl ClipCodec {
    pub fn fourcc(self) -> [u8; 4] {
        match self {
            ClipCodec::Mjpeg => *b"MJPG",
            ClipCodec::Raw => *b"RGB3",
            ClipCodec::H264 => *b"avc1",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ClipCodec::Mjpeg => "avi",
            ClipCodec::Raw => "iclip",
            ClipCodec::H264 => "mp4",
        }
    }

    fn from_fourcc(fourcc: [u8; 4]) -> Result<Self> {
        match &fourcc {
            b"MJPG" => Ok(ClipCodec::Mjpeg),
            b"RGB3" => Ok(ClipCodec::Raw),
            b"avc1" => Ok(ClipCodec::H264),
            _ => Err(anyhow!("unknown clip fourcc {:?}", fourcc)),
        }
    }
}

impl std::str::FromStr for ClipCodec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mjpeg" | "mjpg" => Ok(ClipCodec::Mjpeg),
            "raw" => Ok(ClipCodec::Raw),
            "h264" | "avc1" => Ok(ClipCodec::H264),
            other => Err(anyhow!(
                "unknown clip codec '{}' (expected mjpeg|raw|h264)",
                other
            )),
        }
    }
}

/// Geometry and encoding of a clip.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub codec: ClipCodec,
}

/// Recorder misuse. These are programming errors and are surfaced loudly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecorderError {
    AlreadyFinalized,
    AppendAfterFinalize,
    FrameSizeMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::AlreadyFinalized => write!(f, "clip recorder already finalized"),
            RecorderError::AppendAfterFinalize => {
                write!(f, "append called on a finalized clip recorder")
            }
            RecorderError::FrameSizeMismatch { expected, got } => write!(
                f,
                "frame is {}x{}, clip is {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
        }
    }
}

impl std::error::Error for RecorderError {}

/// A finalized clip, handed off to the evidence pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub path: PathBuf,
    pub spec: ClipSpec,
    pub frame_count: u64,
    pub byte_len: u64,
}

impl Clip {
    /// File name, used as the human-readable ledger label.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn duration(&self) -> Duration {
        if self.spec.frame_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count as f64 / self.spec.frame_rate as f64)
    }
}

trait ClipEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
    /// Flush everything to durable storage.
    fn finish(&mut self) -> Result<()>;
}

pub struct ClipRecorder {
    spec: ClipSpec,
    path: PathBuf,
    part_path: PathBuf,
    encoder: Option<Box<dyn ClipEncoder>>,
    frames: u64,
    finalized: bool,
}

impl ClipRecorder {
    /// Open a new clip at `path`. Parent directories are created.
    pub fn start(path: impl Into<PathBuf>, spec: ClipSpec) -> Result<Self> {
        let path = path.into();
        if spec.width == 0 || spec.height == 0 || spec.frame_rate == 0 {
            return Err(anyhow!(
                "invalid clip geometry {}x{} @ {} fps",
                spec.width,
                spec.height,
                spec.frame_rate
            ));
        }
        if path.exists() {
            return Err(anyhow!("clip {} already exists", path.display()));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create clip directory {}", parent.display()))?;
            }
        }
        let part_path = part_path_for(&path);
        let encoder: Box<dyn ClipEncoder> = match spec.codec {
            ClipCodec::Mjpeg => Box::new(avi::MjpegAviEncoder::create(&part_path, spec)?),
            ClipCodec::Raw => Box::new(RawEncoder::create(&part_path, spec)?),
            #[cfg(feature = "clip-ffmpeg")]
            ClipCodec::H264 => Box::new(h264::FfmpegEncoder::create(&part_path, spec)?),
            #[cfg(not(feature = "clip-ffmpeg"))]
            ClipCodec::H264 => {
                return Err(anyhow!("h264 clips require the clip-ffmpeg feature"));
            }
        };
        Ok(Self {
            spec,
            path,
            part_path,
            encoder: Some(encoder),
            frames: 0,
            finalized: false,
        })
    }

    /// Frames appended so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn append(&mut self, frame: &Frame) -> Result<()> {
        if self.finalized {
            return Err(RecorderError::AppendAfterFinalize.into());
        }
        if frame.width != self.spec.width || frame.height != self.spec.height {
            return Err(RecorderError::FrameSizeMismatch {
                expected: (self.spec.width, self.spec.height),
                got: (frame.width, frame.height),
            }
            .into());
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| anyhow!("clip encoder missing"))?;
        encoder.write_frame(frame)?;
        self.frames += 1;
        Ok(())
    }

    /// Flush, close and publish the clip. A second call is rejected.
    pub fn finalize(&mut self) -> Result<Clip> {
        if self.finalized {
            return Err(RecorderError::AlreadyFinalized.into());
        }
        self.finalized = true;
        let mut encoder = self
            .encoder
            .take()
            .ok_or_else(|| anyhow!("clip encoder missing"))?;
        encoder.finish()?;
        drop(encoder);
        fs::rename(&self.part_path, &self.path).with_context(|| {
            format!(
                "publish clip {} -> {}",
                self.part_path.display(),
                self.path.display()
            )
        })?;
        let byte_len = fs::metadata(&self.path)?.len();
        Ok(Clip {
            path: self.path.clone(),
            spec: self.spec,
            frame_count: self.frames,
            byte_len,
        })
    }

    /// Drop the clip in progress without publishing anything.
    pub fn abort(mut self) {
        self.finalized = true;
        self.encoder = None;
        if let Err(e) = fs::remove_file(&self.part_path) {
            log::debug!("abandoned clip {}: {}", self.part_path.display(), e);
        }
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

// ----------------------------------------------------------------------------
// Raw container
// ----------------------------------------------------------------------------
//
// header : "ICLP" | version u16 | width u32 | height u32 | fps u32 | fourcc [4]
// frame  : len u32 | RGB24 bytes
// trailer: "ICLE" | frame_count u64
// All integers little-endian.

struct RawEncoder {
    writer: BufWriter<File>,
    frames: u64,
}

impl RawEncoder {
    fn create(path: &Path, spec: ClipSpec) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create clip {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(CLIP_MAGIC)?;
        writer.write_all(&CLIP_VERSION.to_le_bytes())?;
        writer.write_all(&spec.width.to_le_bytes())?;
        writer.write_all(&spec.height.to_le_bytes())?;
        writer.write_all(&spec.frame_rate.to_le_bytes())?;
        writer.write_all(&spec.codec.fourcc())?;
        Ok(Self { writer, frames: 0 })
    }
}

impl ClipEncoder for RawEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let len = u32::try_from(frame.byte_len()).map_err(|_| anyhow!("frame too large"))?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(frame.pixels())?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.write_all(CLIP_TRAILER)?;
        self.writer.write_all(&self.frames.to_le_bytes())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Contents of a clip read back from disk.
#[derive(Debug)]
pub struct ClipContents {
    pub spec: ClipSpec,
    /// RGB24 pixels for `raw` clips, JPEG payloads for `mjpeg` clips.
    pub frames: Vec<Vec<u8>>,
}

/// Read back a `raw` or `mjpeg` clip, checking its recorded frame count.
pub fn read_clip(path: &Path) -> Result<ClipContents> {
    let mut file = File::open(path).with_context(|| format!("open clip {}", path.display()))?;
    let magic = read_array::<4>(&mut file)?;
    if &magic == b"RIFF" {
        file.seek(SeekFrom::Start(0))?;
        let (spec, frames) = avi::read_avi(&mut file)?;
        return Ok(ClipContents { spec, frames });
    }
    if &magic != CLIP_MAGIC {
        return Err(anyhow!("not a clip: bad magic"));
    }
    let mut reader = BufReader::new(file);
    let version = u16::from_le_bytes(read_array::<2>(&mut reader)?);
    if version != CLIP_VERSION {
        return Err(anyhow!("unsupported clip version {}", version));
    }
    let width = u32::from_le_bytes(read_array::<4>(&mut reader)?);
    let height = u32::from_le_bytes(read_array::<4>(&mut reader)?);
    let frame_rate = u32::from_le_bytes(read_array::<4>(&mut reader)?);
    let codec = ClipCodec::from_fourcc(read_array::<4>(&mut reader)?)?;
    let spec = ClipSpec {
        width,
        height,
        frame_rate,
        codec,
    };
    let frame_len = rgb_len(width, height)?;

    let mut frames = Vec::new();
    loop {
        let tag = read_array::<4>(&mut reader)?;
        if &tag == CLIP_TRAILER {
            let expected = u64::from_le_bytes(read_array::<8>(&mut reader)?);
            if expected != frames.len() as u64 {
                return Err(anyhow!(
                    "clip trailer reports {} frames, found {}",
                    expected,
                    frames.len()
                ));
            }
            return Ok(ClipContents { spec, frames });
        }
        let len = u32::from_le_bytes(tag) as usize;
        if len != frame_len {
            return Err(anyhow!("corrupt clip: frame of {} bytes, expected {}", len, frame_len));
        }
        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .map_err(|e| anyhow!("truncated clip: {}", e))?;
        frames.push(buf);
    }
}

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| anyhow!("truncated clip: {}", e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ClipSpec {
        ClipSpec {
            width: 4,
            height: 3,
            frame_rate: 10,
            codec: ClipCodec::Raw,
        }
    }

    fn numbered_frame(i: u64) -> Frame {
        let pixels = (0..36).map(|p| (p as u64 * 7 + i) as u8).collect();
        Frame::new(i, 4, 3, pixels).unwrap()
    }

    #[test]
    fn finalized_clip_contains_exactly_the_appended_frames_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("clips").join("FIRE_test.iclip");
        let mut recorder = ClipRecorder::start(&path, spec())?;
        let frames: Vec<Frame> = (0..17).map(numbered_frame).collect();
        for frame in &frames {
            recorder.append(frame)?;
        }
        let clip = recorder.finalize()?;
        assert_eq!(clip.frame_count, 17);
        assert_eq!(clip.path, path);
        assert!(!part_path_for(&path).exists());

        let contents = read_clip(&clip.path)?;
        assert_eq!(contents.spec, spec());
        assert_eq!(contents.frames.len(), 17);
        for (read, written) in contents.frames.iter().zip(&frames) {
            assert_eq!(read.as_slice(), written.pixels());
        }
        Ok(())
    }

    #[test]
    fn second_finalize_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = ClipRecorder::start(dir.path().join("a.iclip"), spec())?;
        recorder.append(&numbered_frame(0))?;
        recorder.finalize()?;
        let err = recorder.finalize().unwrap_err();
        assert_eq!(
            err.downcast_ref::<RecorderError>(),
            Some(&RecorderError::AlreadyFinalized)
        );
        Ok(())
    }

    #[test]
    fn append_after_finalize_fails_loudly() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = ClipRecorder::start(dir.path().join("b.iclip"), spec())?;
        recorder.finalize()?;
        let err = recorder.append(&numbered_frame(1)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RecorderError>(),
            Some(&RecorderError::AppendAfterFinalize)
        );
        Ok(())
    }

    #[test]
    fn rejects_frames_of_another_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut recorder = ClipRecorder::start(dir.path().join("c.iclip"), spec())?;
        let big = Frame::filled(0, 8, 8, [1, 2, 3])?;
        let err = recorder.append(&big).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecorderError>(),
            Some(RecorderError::FrameSizeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn concurrent_recorders_write_independent_clips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut a = ClipRecorder::start(dir.path().join("COLLISION.iclip"), spec())?;
        let mut b = ClipRecorder::start(dir.path().join("FIRE.iclip"), spec())?;
        for i in 0..5 {
            a.append(&numbered_frame(i))?;
            if i % 2 == 0 {
                b.append(&numbered_frame(100 + i))?;
            }
        }
        assert_eq!(a.finalize()?.frame_count, 5);
        assert_eq!(b.finalize()?.frame_count, 3);
        Ok(())
    }

    #[test]
    fn abort_leaves_nothing_behind() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("d.iclip");
        let mut recorder = ClipRecorder::start(&path, spec())?;
        recorder.append(&numbered_frame(0))?;
        recorder.abort();
        assert!(!path.exists());
        assert!(!part_path_for(&path).exists());
        Ok(())
    }

    #[test]
    fn mjpeg_clip_is_an_indexed_avi_of_jpeg_frames() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("COLLISION_test.avi");
        let spec = ClipSpec {
            width: 64,
            height: 48,
            frame_rate: 30,
            codec: ClipCodec::Mjpeg,
        };
        let mut recorder = ClipRecorder::start(&path, spec)?;
        for i in 0..9u64 {
            let mut frame = Frame::filled(i, 64, 48, [20, 40, 60])?;
            frame.banner([255, 0, 0]);
            recorder.append(&frame)?;
        }
        let clip = recorder.finalize()?;
        assert_eq!(clip.frame_count, 9);
        assert!(clip.byte_len < 9 * 64 * 48 * 3 / 4);

        let bytes = fs::read(&path)?;
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize,
            bytes.len() - 8
        );

        let contents = read_clip(&path)?;
        assert_eq!(contents.spec, spec);
        assert_eq!(contents.frames.len(), 9);
        for jpeg in &contents.frames {
            assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
        }
        let decoded = image::load_from_memory(&contents.frames[0])?;
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        Ok(())
    }

    #[test]
    fn empty_mjpeg_clip_still_reads_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("FIRE_empty.avi");
        let spec = ClipSpec {
            width: 8,
            height: 8,
            frame_rate: 15,
            codec: ClipCodec::Mjpeg,
        };
        let clip = ClipRecorder::start(&path, spec)?.finalize()?;
        assert_eq!(clip.frame_count, 0);
        assert!(read_clip(&path)?.frames.is_empty());
        Ok(())
    }

    #[test]
    fn codec_names_parse() {
        assert_eq!("MJPEG".parse::<ClipCodec>().unwrap(), ClipCodec::Mjpeg);
        assert_eq!("raw".parse::<ClipCodec>().unwrap(), ClipCodec::Raw);
        assert!("vp9".parse::<ClipCodec>().is_err());
        assert_eq!(ClipCodec::default().extension(), "avi");
    }

    #[test]
    fn duration_follows_frame_rate() {
        let clip = Clip {
            path: PathBuf::from("x.iclip"),
            spec: spec(),
            frame_count: 25,
            byte_len: 0,
        };
        assert_eq!(clip.duration(), Duration::from_millis(2500));
        assert_eq!(clip.file_name(), "x.iclip");
    }
}
