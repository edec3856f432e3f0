use std::io::{Read, Seek, Write};
use std::time::Duration;

use media::queue::{EncodedConsumer, EncodedProducer, QueueConfig, encoded_queue};
use media::reader::NaluAction;
use media::track::{AudioTrack, VideoTrack};
use media::{MediaError, MediaFile};

/// Totals for one extracted stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// NALUs for video, frames for audio.
    pub units: usize,
    pub bytes: u64,
    /// Timestamp of the first unit written.
    pub first_timestamp: Option<Duration>,
}

/// Write every filled buffer of `consumer` to `out` and hand it back to the
/// producer.
fn drain<W: Write>(
    consumer: &mut EncodedConsumer,
    out: &mut W,
    stats: &mut StreamStats,
) -> media::Result<()> {
    while let Some(buffer) = consumer.dequeue() {
        out.write_all(buffer.as_slice())?;
        stats.units += 1;
        stats.bytes += buffer.len() as u64;
        if stats.first_timestamp.is_none() {
            stats.first_timestamp = buffer.timestamp;
        }
        consumer.recycle(buffer);
    }
    Ok(())
}

/// Write the video track as an Annex B H.264 stream, SPS and PPS first.
///
/// With `start` the reader is positioned on the key frame preceding it.
/// SEI NALUs are dropped.
pub fn write_video<R: Read + Seek, W: Write>(
    media: &MediaFile,
    source: R,
    track: &VideoTrack,
    start: Option<Duration>,
    out: &mut W,
) -> media::Result<StreamStats> {
    let (mut producer, mut consumer) = encoded_queue(QueueConfig {
        buffer_size: track.max_bytes_in_frame.max(QueueConfig::default().buffer_size),
        ..QueueConfig::default()
    })?;
    let mut reader = media.video_reader(source, track, &mut producer)?;
    if let Some(time) = start {
        let position = reader.seek(time)?;
        log::info!("Video starts at {:.3}s", position.time().as_secs_f64());
    }

    let mut stats = StreamStats::default();
    loop {
        drain(&mut consumer, out, &mut stats)?;
        let mut buffer = producer.next_buffer().ok_or(MediaError::QueueFull)?;
        match reader.write_next_nalu(&mut buffer)? {
            NaluAction::Decode | NaluAction::EndOfFrame => producer.enqueue(buffer)?,
            NaluAction::Ignore => producer.discard(buffer),
            NaluAction::EndOfStream => {
                producer.discard(buffer);
                break;
            }
        }
    }
    drain(&mut consumer, out, &mut stats)?;
    out.flush()?;
    Ok(stats)
}

/// Write the audio track as a raw elementary stream, one compressed frame
/// after another.
pub fn write_audio<R: Read + Seek, W: Write>(
    media: &MediaFile,
    source: R,
    track: &AudioTrack,
    start: Option<Duration>,
    out: &mut W,
) -> media::Result<StreamStats> {
    let (mut producer, mut consumer) = encoded_queue(QueueConfig {
        buffer_size: track.max_bytes_in_frame.max(QueueConfig::default().buffer_size),
        ..QueueConfig::default()
    })?;
    let mut reader = media.audio_reader(source, track)?;
    if let Some(time) = start {
        let position = reader.seek(time)?;
        log::info!("Audio starts at {:.3}s", position.time().as_secs_f64());
    }

    let mut stats = StreamStats::default();
    while reader.read(&mut producer)? {
        drain(&mut consumer, out, &mut stats)?;
    }
    drain(&mut consumer, out, &mut stats)?;
    out.flush()?;
    Ok(stats)
}
