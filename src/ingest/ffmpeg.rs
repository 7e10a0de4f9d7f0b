//! Video file and network stream source using FFmpeg.
//!
//! Decodes the best video stream to RGB24 in memory. URIs with a scheme
//! (`rtsp://`, `http://`, ...) are treated as live unless configured otherwise.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbImage;

use super::{FrameSource, SourceConfig};

struct Decoding {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

pub(crate) struct FfmpegSource {
    uri: String,
    decoding: Option<Decoding>,
    frame_size: (u32, u32),
    fps: Option<f32>,
    live: bool,
    max_frames: Option<u64>,
    frame_count: u64,
}

impl FfmpegSource {
    pub(crate) fn open(config: &SourceConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let uri = config.uri.trim().to_string();
        let input = ffmpeg::format::input(&uri)
            .with_context(|| format!("failed to open '{}' with ffmpeg", uri))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", uri))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = (rate.denominator() != 0 && rate.numerator() > 0)
            .then(|| rate.numerator() as f32 / rate.denominator() as f32);
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        let frame_size = (decoder.width(), decoder.height());
        let live = config.live.unwrap_or_else(|| uri.contains("://"));
        log::info!(
            "FfmpegSource: opened {} ({}x{}, fps={:?}, live={})",
            uri,
            frame_size.0,
            frame_size.1,
            fps,
            live
        );

        Ok(Self {
            uri,
            decoding: Some(Decoding {
                input,
                stream_index,
                decoder,
                scaler,
                eof_sent: false,
            }),
            frame_size,
            fps,
            live,
            max_frames: config.max_frames,
            frame_count: 0,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.max_frames.is_some_and(|max| self.frame_count >= max) {
            return Ok(None);
        }
        let decoding = self
            .decoding
            .as_mut()
            .ok_or_else(|| anyhow!("ffmpeg source {} already released", self.uri))?;

        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if decoding.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                decoding
                    .scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                self.frame_count += 1;
                return frame_to_image(&rgb_frame).map(Some);
            }
            if decoding.eof_sent {
                return Ok(None);
            }

            let mut next_packet = None;
            for (stream, packet) in decoding.input.packets() {
                if stream.index() == decoding.stream_index {
                    next_packet = Some(packet);
                    break;
                }
            }
            match next_packet {
                Some(packet) => decoding
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    decoding.decoder.send_eof().context("flush ffmpeg decoder")?;
                    decoding.eof_sent = true;
                }
            }
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.decoding.take().is_some() {
            log::info!(
                "FfmpegSource: released {} after {} frames",
                self.uri,
                self.frame_count
            );
        }
        Ok(())
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn native_fps(&self) -> Option<f32> {
        self.fps
    }
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than expected")?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .context("ffmpeg frame row is out of bounds")?,
            );
        }
        pixels
    };

    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("ffmpeg frame buffer does not match {}x{}", width, height))
}
