//! [`FrameDecoder`] backed by FFmpeg's AC-3 and DTS decoders.

extern crate ffmpeg_next as ffmpeg;

use ffmpeg::format::sample::{Sample, Type};
use media::codec::AudioCodec;

use super::{DecodedFrame, FrameDecoder, NativeError};

fn native(e: ffmpeg::Error) -> NativeError {
    NativeError::with_message(i32::from(e), e.to_string())
}

pub struct FfmpegFrameDecoder {
    decoder: ffmpeg::decoder::Audio,
    frame: ffmpeg::frame::Audio,
}

impl FfmpegFrameDecoder {
    pub fn new(codec: AudioCodec) -> Result<Self, NativeError> {
        ffmpeg::init().map_err(native)?;
        let id = match codec {
            AudioCodec::Ac3 => ffmpeg::codec::Id::AC3,
            AudioCodec::Dts => ffmpeg::codec::Id::DTS,
        };
        let found = ffmpeg::decoder::find(id)
            .ok_or_else(|| NativeError::with_message(-1, format!("no FFmpeg decoder for {id:?}")))?;
        let decoder = ffmpeg::codec::context::Context::new_with_codec(found)
            .decoder()
            .audio()
            .map_err(native)?;
        Ok(Self {
            decoder,
            frame: ffmpeg::frame::Audio::empty(),
        })
    }

    fn append_frame(&self, out: &mut DecodedFrame) -> Result<(), NativeError> {
        let frame = &self.frame;
        let n = frame.samples();
        // TODO: request a stereo downmix so centre and surround channels are not dropped.
        let right_plane = if frame.planes() > 1 { 1 } else { 0 };
        out.sample_rate = frame.rate();

        match frame.format() {
            Sample::F32(Type::Planar) => {
                let left = frame.plane::<f32>(0);
                let right = frame.plane::<f32>(right_plane);
                out.samples
                    .extend(left.iter().zip(right).take(n).map(|(l, r)| [*l, *r]));
            }
            Sample::I32(Type::Planar) => {
                let scale = 1.0 / 2_147_483_648.0;
                let left = frame.plane::<i32>(0);
                let right = frame.plane::<i32>(right_plane);
                out.samples.extend(
                    left.iter()
                        .zip(right)
                        .take(n)
                        .map(|(l, r)| [*l as f32 * scale, *r as f32 * scale]),
                );
            }
            other => {
                return Err(NativeError::with_message(
                    -1,
                    format!("unsupported sample format {other:?}"),
                ));
            }
        }
        Ok(())
    }
}

impl FrameDecoder for FfmpegFrameDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<DecodedFrame, NativeError> {
        let packet = ffmpeg::Packet::copy(frame);
        self.decoder.send_packet(&packet).map_err(native)?;

        let mut out = DecodedFrame::default();
        while self.decoder.receive_frame(&mut self.frame).is_ok() {
            self.append_frame(&mut out)?;
        }
        Ok(out)
    }
}
