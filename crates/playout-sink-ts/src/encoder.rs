// crates/playout-sink-ts/src/encoder.rs
//
// H.264 + AAC encoder state feeding one MPEG-TS output. Adapted from the
// batch MP4 exporter's encoder setup: same codec choices, same
// avcodec_parameters_from_context FFI step (Stream::codec() does not exist in
// this version of ffmpeg-the-third), same AAC fixed-frame-size FIFO. The
// difference is the source: there is no demuxer/decoder here, every video
// frame arrives pre-scaled to the output geometry and every audio block
// arrives as interleaved S16 at the channel's house sample rate, so this
// module only resamples (S16 interleaved -> FLTP planar) and never scales.
//
// PTS strategy: both streams use a 90 kHz stream timebase. The video PTS
// passed in is already rescaled to that timebase by the caller (the
// engine's own clock is continuous across the whole session, so no
// block-local offset tracking is needed here). Audio PTS is derived from a
// running sample counter in the audio stream's native rate and rescaled to
// 90 kHz only when writing packets, exactly as the batch exporter rescales
// 1/44100 AAC timestamps into the muxer's stream timebase.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{output as open_output, Pixel, Sample};
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AvAudioFrame;
use ffmpeg::util::frame::video::Video as AvVideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;

use playout_core::RationalFps;

use crate::error::SinkError;

fn mux_tb() -> Rational {
    Rational::new(1, 90_000)
}

fn io_err(what: &str, e: impl std::fmt::Display) -> SinkError {
    SinkError::EncoderInit(format!("{what}: {e}"))
}

/// Write a packed (stride-free) YUV420P buffer into an encoder-owned
/// `VideoFrame`, respecting each plane's linesize padding.
fn write_packed_yuv420p(packed: &[u8], frame: &mut AvVideoFrame, w: usize, h: usize, uv_w: usize, uv_h: usize) {
    let y_stride = frame.stride(0);
    let y_dst = frame.data_mut(0);
    for row in 0..h {
        y_dst[row * y_stride..row * y_stride + w].copy_from_slice(&packed[row * w..row * w + w]);
    }

    let u_offset = w * h;
    let u_stride = frame.stride(1);
    let u_dst = frame.data_mut(1);
    for row in 0..uv_h {
        let src = u_offset + row * uv_w;
        u_dst[row * u_stride..row * u_stride + uv_w].copy_from_slice(&packed[src..src + uv_w]);
    }

    let v_offset = u_offset + uv_w * uv_h;
    let v_stride = frame.stride(2);
    let v_dst = frame.data_mut(2);
    for row in 0..uv_h {
        let src = v_offset + row * uv_w;
        v_dst[row * v_stride..row * v_stride + uv_w].copy_from_slice(&packed[src..src + uv_w]);
    }
}

/// Stereo FLTP sample ring buffer, filled post-resample. Mirrors the batch
/// exporter's `AudioFifo`; mono inputs are duplicated into both planes.
struct AudioFifo {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl AudioFifo {
    fn new() -> Self {
        Self { left: Vec::new(), right: Vec::new() }
    }

    fn len(&self) -> usize {
        self.left.len()
    }

    fn push(&mut self, frame: &AvAudioFrame) {
        let n = frame.samples();
        if n == 0 {
            return;
        }
        unsafe {
            let l_bytes = frame.data(0);
            let l_f32 = std::slice::from_raw_parts(l_bytes.as_ptr() as *const f32, n);
            self.left.extend_from_slice(l_f32);

            let r_bytes = if frame.ch_layout().channels() >= 2 { frame.data(1) } else { frame.data(0) };
            let r_f32 = std::slice::from_raw_parts(r_bytes.as_ptr() as *const f32, n);
            self.right.extend_from_slice(r_f32);
        }
    }

    fn pop_frame(&mut self, n: usize, sample_idx: i64) -> AvAudioFrame {
        let available = self.left.len().min(n);

        let mut frame = AvAudioFrame::new(Sample::F32(SampleType::Planar), n, ChannelLayoutMask::STEREO);
        frame.set_pts(Some(sample_idx));

        unsafe {
            let ldata = frame.data_mut(0);
            let ldst = std::slice::from_raw_parts_mut(ldata.as_mut_ptr() as *mut f32, n);
            ldst[..available].copy_from_slice(&self.left[..available]);
            if available < n {
                ldst[available..].fill(0.0);
            }

            let rdata = frame.data_mut(1);
            let rdst = std::slice::from_raw_parts_mut(rdata.as_mut_ptr() as *mut f32, n);
            rdst[..available].copy_from_slice(&self.right[..available]);
            if available < n {
                rdst[available..].fill(0.0);
            }
        }

        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }
}

pub struct TsEncoder {
    octx: ffmpeg::format::context::Output,
    video_encoder: ffmpeg::encoder::video::Video,
    audio_encoder: ffmpeg::encoder::audio::Audio,
    audio_resampler: Option<resampling::Context>,
    fifo: AudioFifo,
    audio_frame_size: usize,
    out_sample_idx: i64,
    audio_native_tb: Rational,
    ost_audio_tb: Rational,
    in_sample_rate: u32,
    in_channels: u16,
    headers_written: bool,
}

impl TsEncoder {
    /// `bitrate_bps`/`gop_size` come from `ChannelConfig` — unlike the batch
    /// exporter's CRF-quality target, a continuous broadcast feed needs a
    /// bounded, predictable bitrate and a fixed keyframe interval so
    /// downstream ingest never sees an unbounded GOP.
    pub fn open(
        path: &std::path::Path,
        width: u32,
        height: u32,
        fps: RationalFps,
        sample_rate: u32,
        channels: u16,
        bitrate_bps: u32,
        gop_size: u32,
    ) -> Result<Self, SinkError> {
        let mut octx = open_output(path).map_err(|e| SinkError::OpenFailed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

        let h264 = ffmpeg::encoder::find(CodecId::H264).ok_or(SinkError::EncoderUnavailable { codec: "h264" })?;
        let mut ost_video = octx.add_stream(h264).map_err(|e| io_err("add video stream", e))?;
        ost_video.set_time_base(mux_tb());

        let video_enc_ctx = codec::context::Context::new_with_codec(h264);
        let mut video_enc = video_enc_ctx.encoder().video().map_err(|e| io_err("video encoder context", e))?;
        video_enc.set_width(width);
        video_enc.set_height(height);
        video_enc.set_format(Pixel::YUV420P);
        video_enc.set_time_base(mux_tb());
        video_enc.set_frame_rate(Some(Rational::new(fps.num as i32, fps.den as i32)));
        video_enc.set_bit_rate(bitrate_bps as usize);

        // No safe setter for gop_size exists on this encoder context; write
        // the AVCodecContext field directly, same as the batch exporter's
        // sample_aspect_ratio override.
        unsafe {
            (*video_enc.as_mut_ptr()).gop_size = gop_size as i32;
        }

        let mut opts = ffmpeg::Dictionary::new();
        opts.set("preset", "veryfast");
        opts.set("tune", "zerolatency");

        let video_encoder = video_enc.open_as_with(h264, opts).map_err(|e| io_err("open h264 encoder", e))?;

        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
                video_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(io_err("avcodec_parameters_from_context (video)", ret));
            }
        }

        let audio_native_tb = Rational::new(1, sample_rate as i32);
        let aac = ffmpeg::encoder::find(CodecId::AAC).ok_or(SinkError::EncoderUnavailable { codec: "aac" })?;
        let mut ost_audio = octx.add_stream(aac).map_err(|e| io_err("add audio stream", e))?;
        ost_audio.set_time_base(mux_tb());

        let audio_enc_ctx = codec::context::Context::new_with_codec(aac);
        let mut audio_enc = audio_enc_ctx.encoder().audio().map_err(|e| io_err("audio encoder context", e))?;
        audio_enc.set_rate(sample_rate as i32);
        audio_enc.set_ch_layout(if channels >= 2 { ChannelLayout::STEREO } else { ChannelLayout::MONO });
        audio_enc.set_format(Sample::F32(SampleType::Planar));
        audio_enc.set_bit_rate(128_000);

        let audio_encoder = audio_enc
            .open_as_with(aac, ffmpeg::Dictionary::new())
            .map_err(|e| io_err("open aac encoder", e))?;
        let audio_frame_size = (audio_encoder.frame_size() as usize).max(1024);
        let ost_audio_tb = octx.stream(1).ok_or_else(|| io_err("missing audio stream", "index 1"))?.time_base();

        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
                audio_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(io_err("avcodec_parameters_from_context (audio)", ret));
            }
        }

        Ok(Self {
            octx,
            video_encoder,
            audio_encoder,
            audio_resampler: None,
            fifo: AudioFifo::new(),
            audio_frame_size,
            out_sample_idx: 0,
            audio_native_tb,
            ost_audio_tb,
            in_sample_rate: sample_rate,
            in_channels: channels,
            headers_written: false,
        })
    }

    fn ensure_header(&mut self) -> Result<(), SinkError> {
        if !self.headers_written {
            self.octx.write_header().map_err(|e| SinkError::HeaderWriteFailed(e.to_string()))?;
            self.headers_written = true;
        }
        Ok(())
    }

    /// `yuv` is a single packed YUV420P buffer at the encoder's fixed width/height.
    /// `yuv` is packed, stride-free YUV420P: Y (w*h) ++ U (uv_w*uv_h) ++ V (uv_w*uv_h).
    pub fn push_video(&mut self, yuv: &[u8], pts_90k: i64) -> Result<(), SinkError> {
        self.ensure_header()?;

        let w = self.video_encoder.width() as usize;
        let h = self.video_encoder.height() as usize;
        let (uv_w, uv_h) = (w / 2, h / 2);
        let mut frame = AvVideoFrame::new(Pixel::YUV420P, w as u32, h as u32);

        write_packed_yuv420p(yuv, &mut frame, w, h, uv_w, uv_h);
        unsafe {
            (*frame.as_mut_ptr()).sample_aspect_ratio = ffmpeg::ffi::AVRational { num: 1, den: 1 };
        }
        frame.set_pts(Some(pts_90k));

        self.video_encoder.send_frame(&frame).map_err(|e| io_err("send video frame", e))?;
        self.drain_video_packets()
    }

    fn drain_video_packets(&mut self) -> Result<(), SinkError> {
        let mut pkt = Packet::empty();
        while self.video_encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(0);
            pkt.rescale_ts(mux_tb(), mux_tb());
            pkt.write_interleaved(&mut self.octx).map_err(|e| SinkError::PacketWriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// `samples` is interleaved S16 at `channels` channels, `channels` matching
    /// what this encoder was opened with.
    pub fn push_audio(&mut self, samples: &[i16], channels: u16) -> Result<(), SinkError> {
        self.ensure_header()?;
        if samples.is_empty() {
            return Ok(());
        }

        let nb_samples = samples.len() / channels.max(1) as usize;
        let mut raw = AvAudioFrame::new(
            Sample::I16(SampleType::Packed),
            nb_samples,
            if channels >= 2 { ChannelLayoutMask::STEREO } else { ChannelLayoutMask::MONO },
        );
        raw.set_rate(self.in_sample_rate);
        unsafe {
            let dst = raw.data_mut(0);
            let dst16 = std::slice::from_raw_parts_mut(dst.as_mut_ptr() as *mut i16, samples.len());
            dst16.copy_from_slice(samples);
        }

        let rs = self.audio_resampler.get_or_insert_with(|| {
            let src_layout = if self.in_channels >= 2 { ChannelLayout::STEREO } else { ChannelLayout::MONO };
            resampling::Context::get2(
                Sample::I16(SampleType::Packed),
                src_layout,
                self.in_sample_rate,
                Sample::F32(SampleType::Planar),
                ChannelLayout::STEREO,
                self.in_sample_rate,
            )
            .expect("create audio resampler")
        });

        let mut resampled = AvAudioFrame::empty();
        if rs.run(&raw, &mut resampled).is_ok() && resampled.samples() > 0 {
            self.fifo.push(&resampled);
        }

        self.drain_audio_fifo(false)
    }

    fn drain_audio_fifo(&mut self, flush: bool) -> Result<(), SinkError> {
        while self.fifo.len() >= self.audio_frame_size || (flush && self.fifo.len() > 0) {
            let frame = self.fifo.pop_frame(self.audio_frame_size, self.out_sample_idx);
            self.out_sample_idx += self.audio_frame_size as i64;

            self.audio_encoder.send_frame(&frame).map_err(|e| io_err("send audio frame", e))?;
            self.drain_audio_packets()?;
        }
        Ok(())
    }

    fn drain_audio_packets(&mut self) -> Result<(), SinkError> {
        let mut pkt = Packet::empty();
        while self.audio_encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(1);
            pkt.rescale_ts(self.audio_native_tb, self.ost_audio_tb);
            pkt.write_interleaved(&mut self.octx).map_err(|e| SinkError::PacketWriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), SinkError> {
        self.ensure_header()?;

        let _ = self.video_encoder.send_eof();
        self.drain_video_packets()?;

        self.drain_audio_fifo(true)?;
        let _ = self.audio_encoder.send_eof();
        self.drain_audio_packets()?;

        self.octx.write_trailer().map_err(|e| io_err("write trailer", e))
    }
}
