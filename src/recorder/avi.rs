//! Motion-JPEG in an AVI (RIFF) container.
//!
//! Layout: `RIFF 'AVI ' { LIST hdrl { avih, LIST strl { strh, strf } }, LIST movi { 00dc... }, idx1 }`.
//! Frame count, buffer sizes and chunk lengths are patched in place by `finish`.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::{ClipCodec, ClipEncoder, ClipSpec};
use crate::frame::Frame;

const JPEG_QUALITY: u8 = 80;
const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const FRAME_CHUNK: &[u8; 4] = b"00dc";

// Byte offsets of the fields rewritten by `finish`.
const RIFF_SIZE_AT: u64 = 4;
const AVIH_MAX_BYTES_PER_SEC_AT: u64 = 36;
const AVIH_TOTAL_FRAMES_AT: u64 = 48;
const AVIH_BUFFER_SIZE_AT: u64 = 60;
const STRH_LENGTH_AT: u64 = 140;
const STRH_BUFFER_SIZE_AT: u64 = 144;
const MOVI_SIZE_AT: u64 = 216;
/// Position of the `movi` fourcc; `idx1` offsets are relative to it.
const MOVI_FOURCC_AT: u64 = 220;
const HEADER_LEN: u64 = 224;

pub(super) struct MjpegAviEncoder {
    writer: BufWriter<File>,
    spec: ClipSpec,
    /// (offset from `movi`, payload length) per frame.
    index: Vec<(u32, u32)>,
    position: u64,
    largest_frame: u32,
    jpeg: Vec<u8>,
}

impl MjpegAviEncoder {
    pub(super) fn create(path: &Path, spec: ClipSpec) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create clip {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let header = header(spec);
        debug_assert_eq!(header.len() as u64, HEADER_LEN);
        writer.write_all(&header)?;
        Ok(Self {
            writer,
            spec,
            index: Vec::new(),
            position: HEADER_LEN,
            largest_frame: 0,
            jpeg: Vec::new(),
        })
    }

    fn patch(&mut self, at: u64, value: u32) -> Result<()> {
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(at))?;
        file.write_all(&value.to_le_bytes())?;
        Ok(())
    }
}

impl ClipEncoder for MjpegAviEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.jpeg.clear();
        JpegEncoder::new_with_quality(&mut self.jpeg, JPEG_QUALITY)
            .encode(frame.pixels(), frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;

        let len = self.jpeg.len() as u32;
        let padded = self.jpeg.len() as u64 + (self.jpeg.len() as u64 & 1);
        // idx1 and RIFF sizes are 32-bit.
        if self.position + 8 + padded + 16 * (self.index.len() as u64 + 1) > u32::MAX as u64 {
            return Err(anyhow!("avi clip exceeds the 4 GiB container limit"));
        }
        let offset = (self.position - MOVI_FOURCC_AT) as u32;

        self.writer.write_all(FRAME_CHUNK)?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&self.jpeg)?;
        if len & 1 == 1 {
            self.writer.write_all(&[0])?;
        }
        self.index.push((offset, len));
        self.position += 8 + padded;
        self.largest_frame = self.largest_frame.max(len);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let movi_end = self.position;
        self.writer.write_all(b"idx1")?;
        self.writer
            .write_all(&((self.index.len() * 16) as u32).to_le_bytes())?;
        for (offset, len) in &self.index {
            self.writer.write_all(FRAME_CHUNK)?;
            self.writer.write_all(&AVIIF_KEYFRAME.to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(&len.to_le_bytes())?;
        }
        self.writer.flush()?;
        let total = movi_end + 8 + self.index.len() as u64 * 16;

        let frames = self.index.len() as u32;
        let buffer = self.largest_frame + 8;
        self.patch(RIFF_SIZE_AT, (total - 8) as u32)?;
        self.patch(
            AVIH_MAX_BYTES_PER_SEC_AT,
            buffer.saturating_mul(self.spec.frame_rate),
        )?;
        self.patch(AVIH_TOTAL_FRAMES_AT, frames)?;
        self.patch(AVIH_BUFFER_SIZE_AT, buffer)?;
        self.patch(STRH_LENGTH_AT, frames)?;
        self.patch(STRH_BUFFER_SIZE_AT, buffer)?;
        self.patch(MOVI_SIZE_AT, (movi_end - MOVI_FOURCC_AT) as u32)?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }
}

fn header(spec: ClipSpec) -> Vec<u8> {
    let mut h = Vec::with_capacity(HEADER_LEN as usize);
    let u32le = |h: &mut Vec<u8>, v: u32| h.extend_from_slice(&v.to_le_bytes());
    let u16le = |h: &mut Vec<u8>, v: u16| h.extend_from_slice(&v.to_le_bytes());

    h.extend_from_slice(b"RIFF");
    u32le(&mut h, 0);
    h.extend_from_slice(b"AVI ");

    h.extend_from_slice(b"LIST");
    u32le(&mut h, 192);
    h.extend_from_slice(b"hdrl");

    h.extend_from_slice(b"avih");
    u32le(&mut h, 56);
    u32le(&mut h, 1_000_000 / spec.frame_rate);
    u32le(&mut h, 0); // max bytes/sec
    u32le(&mut h, 0); // padding granularity
    u32le(&mut h, AVIF_HASINDEX);
    u32le(&mut h, 0); // total frames
    u32le(&mut h, 0); // initial frames
    u32le(&mut h, 1); // streams
    u32le(&mut h, 0); // suggested buffer size
    u32le(&mut h, spec.width);
    u32le(&mut h, spec.height);
    for _ in 0..4 {
        u32le(&mut h, 0);
    }

    h.extend_from_slice(b"LIST");
    u32le(&mut h, 116);
    h.extend_from_slice(b"strl");

    h.extend_from_slice(b"strh");
    u32le(&mut h, 56);
    h.extend_from_slice(b"vids");
    h.extend_from_slice(&ClipCodec::Mjpeg.fourcc());
    u32le(&mut h, 0); // flags
    u16le(&mut h, 0); // priority
    u16le(&mut h, 0); // language
    u32le(&mut h, 0); // initial frames
    u32le(&mut h, 1); // scale
    u32le(&mut h, spec.frame_rate);
    u32le(&mut h, 0); // start
    u32le(&mut h, 0); // length
    u32le(&mut h, 0); // suggested buffer size
    u32le(&mut h, u32::MAX); // quality: default
    u32le(&mut h, 0); // sample size
    u16le(&mut h, 0);
    u16le(&mut h, 0);
    u16le(&mut h, spec.width as u16);
    u16le(&mut h, spec.height as u16);

    h.extend_from_slice(b"strf");
    u32le(&mut h, 40);
    u32le(&mut h, 40);
    u32le(&mut h, spec.width);
    u32le(&mut h, spec.height);
    u16le(&mut h, 1); // planes
    u16le(&mut h, 24); // bit count
    h.extend_from_slice(&ClipCodec::Mjpeg.fourcc());
    u32le(&mut h, spec.width.saturating_mul(spec.height).saturating_mul(3));
    for _ in 0..4 {
        u32le(&mut h, 0);
    }

    h.extend_from_slice(b"LIST");
    u32le(&mut h, 4);
    h.extend_from_slice(b"movi");
    h
}

/// Read an MJPEG AVI back through its index. Returns geometry and the JPEG
/// payload of every frame.
pub(super) fn read_avi(file: &mut File) -> Result<(ClipSpec, Vec<Vec<u8>>)> {
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .map_err(|e| anyhow!("truncated clip: {}", e))?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"AVI " {
        return Err(anyhow!("not an avi clip"));
    }
    if &header[MOVI_FOURCC_AT as usize..HEADER_LEN as usize] != b"movi" {
        return Err(anyhow!("unsupported avi layout"));
    }
    let word = |at: u64| {
        let at = at as usize;
        u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
    };
    if header[112..116] != ClipCodec::Mjpeg.fourcc() || header[188..192] != ClipCodec::Mjpeg.fourcc() {
        return Err(anyhow!("avi clip is not motion-jpeg"));
    }
    let spec = ClipSpec {
        width: word(64),
        height: word(68),
        frame_rate: word(132),
        codec: ClipCodec::Mjpeg,
    };
    let total_frames = word(AVIH_TOTAL_FRAMES_AT);
    let movi_len = word(MOVI_SIZE_AT) as u64;

    file.seek(SeekFrom::Start(MOVI_FOURCC_AT + movi_len))?;
    let mut tag = [0u8; 8];
    file.read_exact(&mut tag)
        .map_err(|e| anyhow!("avi index missing: {}", e))?;
    if &tag[0..4] != b"idx1" {
        return Err(anyhow!("avi index missing"));
    }
    let entries = u32::from_le_bytes([tag[4], tag[5], tag[6], tag[7]]) as usize / 16;
    if entries != total_frames as usize {
        return Err(anyhow!(
            "avi header reports {} frames, index holds {}",
            total_frames,
            entries
        ));
    }
    let mut index = vec![0u8; entries * 16];
    file.read_exact(&mut index)
        .map_err(|e| anyhow!("truncated avi index: {}", e))?;

    let mut frames = Vec::with_capacity(entries);
    for entry in index.chunks_exact(16) {
        let offset = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as u64;
        let len = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]) as usize;
        file.seek(SeekFrom::Start(MOVI_FOURCC_AT + offset + 8))?;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|e| anyhow!("truncated avi frame: {}", e))?;
        frames.push(payload);
    }
    Ok((spec, frames))
}
