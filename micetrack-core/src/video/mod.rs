//! video — FFmpeg decode bridge
//!
//! Every replay reopens the file and decodes from the first packet, so each
//! pass sees the same frames in the same order.  Frames are converted to
//! packed BGR24, the layout the detection code expects.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, decoder, format, frame, media, software::scaling};
use tracing::{debug, info};

use crate::frame::Frame;
use crate::pipeline::FrameSource;

/// Scaling flags; source and target sizes are equal, so only the pixel
/// format conversion matters.
const SCALE_FLAGS: scaling::Flags = scaling::Flags::BILINEAR;

/// A video file replayed through FFmpeg.
pub struct VideoSource {
    path: PathBuf,
    limit: Option<u64>,
}

impl VideoSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ffmpeg::init().context("failed to initialise FFmpeg")?;
        let path = path.as_ref().to_path_buf();
        // fail early on unreadable input rather than at the first pass
        let ictx = format::input(&path)
            .with_context(|| format!("could not open input file {}", path.display()))?;
        ictx.streams()
            .best(media::Type::Video)
            .context("no video stream found in input")?;
        Ok(Self { path, limit: None })
    }

    /// Stop every pass after `limit` frames.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for VideoSource {
    fn replay(&mut self, visit: &mut dyn FnMut(u64, &Frame) -> Result<()>) -> Result<()> {
        let mut ictx = format::input(&self.path).context("could not open input file")?;
        let video_stream_index = ictx
            .streams()
            .best(media::Type::Video)
            .context("no video stream found in input")?
            .index();

        let input_video_stream = ictx
            .stream(video_stream_index)
            .context("video stream vanished")?;
        let decoder_ctx = codec::context::Context::from_parameters(input_video_stream.parameters())
            .context("failed to build decoder context")?;
        let mut decoder = decoder_ctx
            .decoder()
            .video()
            .context("failed to open video decoder")?;

        let src_width = decoder.width();
        let src_height = decoder.height();
        let src_pixel_fmt = decoder.format();
        info!(
            src_width,
            src_height,
            ?src_pixel_fmt,
            path = %self.path.display(),
            "opened input video stream"
        );

        let mut to_bgr = scaling::Context::get(
            src_pixel_fmt,
            src_width,
            src_height,
            format::Pixel::BGR24,
            src_width,
            src_height,
            SCALE_FLAGS,
        )
        .context("failed to create to-BGR scaler")?;

        let mut pass = DecodePass {
            to_bgr: &mut to_bgr,
            decoded: frame::Video::empty(),
            bgr: frame::Video::empty(),
            width: src_width,
            height: src_height,
            limit: self.limit.unwrap_or(u64::MAX),
            count: 0,
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != video_stream_index {
                continue;
            }
            decoder
                .send_packet(&packet)
                .context("decoder send_packet")?;
            if !pass.drain(&mut decoder, visit)? {
                info!(frames = pass.count, "frame limit reached");
                return Ok(());
            }
        }

        decoder.send_eof().ok();
        pass.drain(&mut decoder, visit)?;
        info!(frames = pass.count, "decode complete");
        Ok(())
    }

    fn len_hint(&self) -> Option<u64> {
        let total = total_frames(&self.path);
        let total = self.limit.map_or(total, |limit| total.min(limit));
        (total > 0).then_some(total)
    }
}

struct DecodePass<'a> {
    to_bgr: &'a mut scaling::Context,
    decoded: frame::Video,
    bgr: frame::Video,
    width: u32,
    height: u32,
    limit: u64,
    count: u64,
}

impl DecodePass<'_> {
    /// Hand every frame the decoder has ready to `visit`.  Returns `false`
    /// once the frame limit is reached.
    fn drain(
        &mut self,
        decoder: &mut decoder::Video,
        visit: &mut dyn FnMut(u64, &Frame) -> Result<()>,
    ) -> Result<bool> {
        while self.count < self.limit {
            if decoder.receive_frame(&mut self.decoded).is_err() {
                return Ok(true);
            }
            self.to_bgr
                .run(&self.decoded, &mut self.bgr)
                .context("to-BGR scaling failed")?;

            // drop row padding
            let stride = self.bgr.stride(0);
            let raw = self.bgr.data(0);
            let row_len = self.width as usize * 3;
            let mut data = Vec::with_capacity(row_len * self.height as usize);
            for row in 0..self.height as usize {
                let start = row * stride;
                data.extend_from_slice(&raw[start..start + row_len]);
            }
            let frame = Frame::from_raw(self.width, self.height, 3, data)?;

            visit(self.count, &frame)?;
            self.count += 1;
            if self.count % 100 == 0 {
                debug!(frames = self.count, "decoded frames");
            }
        }
        Ok(false)
    }
}

/// Frame count of the best video stream, estimated from duration and frame
/// rate when the container does not record it.  0 when unknown.
pub fn total_frames<P: AsRef<Path>>(input_path: P) -> u64 {
    ffmpeg::init().ok();
    let Ok(ictx) = format::input(&input_path) else {
        return 0;
    };
    let Some(stream) = ictx.streams().best(media::Type::Video) else {
        return 0;
    };
    if stream.frames() > 0 {
        return stream.frames() as u64;
    }
    let (duration, tb, fps) = (stream.duration(), stream.time_base(), stream.avg_frame_rate());
    if duration <= 0 || tb.denominator() <= 0 || fps.numerator() <= 0 || fps.denominator() <= 0 {
        return 0;
    }
    let seconds = duration as f64 * f64::from(tb.numerator()) / f64::from(tb.denominator());
    (seconds * f64::from(fps.numerator()) / f64::from(fps.denominator())).round() as u64
}
