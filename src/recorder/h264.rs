//! H.264/MP4 clip encoding using FFmpeg.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg::util::format::pixel::Pixel;
use ffmpeg::Rational;
use std::path::Path;

use super::{ClipEncoder, ClipSpec};
use crate::frame::Frame;

pub(super) struct FfmpegEncoder {
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    next_pts: i64,
    width: u32,
    height: u32,
}

impl FfmpegEncoder {
    pub(super) fn create(path: &Path, spec: ClipSpec) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        // The .part suffix hides the container type from ffmpeg's guesser.
        let mut output = ffmpeg::format::output_as(&path, "mp4")
            .with_context(|| format!("open clip output {}", path.display()))?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::H264)
            .ok_or_else(|| anyhow!("ffmpeg has no H.264 encoder"))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let fps = i32::try_from(spec.frame_rate).map_err(|_| anyhow!("frame rate too large"))?;
        let encoder_time_base = Rational::new(1, fps);

        let mut stream = output.add_stream(codec).context("add clip video stream")?;
        let stream_index = stream.index();
        let mut video = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("create H.264 encoder context")?;
        video.set_width(spec.width);
        video.set_height(spec.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(encoder_time_base);
        video.set_frame_rate(Some(Rational::new(fps, 1)));
        if global_header {
            video.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = video.open_as(codec).context("open H.264 encoder")?;
        stream.set_parameters(&encoder);
        stream.set_time_base(encoder_time_base);

        output.write_header().context("write clip header")?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow!("clip stream vanished after header"))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            Pixel::RGB24,
            spec.width,
            spec.height,
            Pixel::YUV420P,
            spec.width,
            spec.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            next_pts: 0,
            width: spec.width,
            height: spec.height,
        })
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .context("write clip packet")?;
        }
        Ok(())
    }
}

impl ClipEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb.stride(0);
        let src = frame.pixels();
        let dst = rgb.data_mut(0);
        for row in 0..self.height as usize {
            dst[row * stride..row * stride + row_bytes]
                .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .context("convert frame to YUV")?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;
        self.encoder
            .send_frame(&yuv)
            .context("send frame to H.264 encoder")?;
        self.drain()
    }

    fn finish(&mut self) -> Result<()> {
        self.encoder.send_eof().context("flush H.264 encoder")?;
        self.drain()?;
        self.output.write_trailer().context("write clip trailer")?;
        Ok(())
    }
}
