use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::Duration;

use super::{Mp4File, Mp4Position, Mp4Track};
use crate::error::{MediaError, Result};
use crate::queue::{EncodedBuffer, EncodedProducer};
use crate::reader::{self, NaluAction, SampleSpan};
use crate::track::{AudioTrack, VideoTrack};

/// Read cursor over the samples of one track.
pub struct SampleCursor<R> {
    source: R,
    file: Arc<Mp4File>,
    track: usize,
    sample: usize,
    stale: bool,
}

impl<R: Read + Seek> SampleCursor<R> {
    pub fn new(source: R, file: Arc<Mp4File>, track_id: u64) -> Result<Self> {
        let track = file.track_index(track_id).ok_or_else(|| {
            MediaError::SeekFailed(format!("track {track_id} is not in the file"))
        })?;
        Ok(Self {
            source,
            file,
            track,
            sample: 0,
            stale: false,
        })
    }

    fn track(&self) -> &Mp4Track {
        &self.file.tracks[self.track]
    }

    fn position(&self, sample: usize) -> Mp4Position {
        let track = self.track();
        let dts = track.samples.get(sample).map(|s| s.dts).unwrap_or(0);
        Mp4Position {
            time: track.ticks_to_duration(dts),
            sample,
        }
    }

    pub fn find_stream_position(&self, time: Duration) -> Result<Mp4Position> {
        let track = self.track();
        let ticks = track.duration_to_ticks(time);
        let sample = track.samples.find_sample_at(ticks).ok_or_else(|| {
            MediaError::SeekFailed(format!(
                "no sample of track {} at or before {time:?}",
                track.track_id
            ))
        })?;
        log::debug!("stream position for track {} at {time:?}: sample {sample}", track.track_id);
        Ok(self.position(sample))
    }

    pub fn find_key_frame(&self, position: Mp4Position) -> Result<Mp4Position> {
        let found = self.track().samples.find_keyframe_at_or_before(position.sample);
        log::debug!("key frame for sample {}: {found:?}", position.sample);
        Ok(found.map(|i| self.position(i)).unwrap_or(Mp4Position::START))
    }

    /// Move the cursor to `position`. Clears the stale state.
    pub fn seek_to_sample(&mut self, position: Mp4Position) -> Result<()> {
        if position.sample > self.track().samples.len() {
            return Err(MediaError::SeekFailed(format!(
                "sample {} is out of range",
                position.sample
            )));
        }
        self.sample = position.sample;
        self.stale = false;
        Ok(())
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.stale {
            return Err(MediaError::StaleReader);
        }
        let result = f(self);
        if let Err(e) = &result {
            if e.is_structural() {
                self.stale = true;
            }
        }
        result
    }

    fn current_sample(&self) -> Option<SampleSpan> {
        let track = self.track();
        let sample = track.samples.get(self.sample)?;
        Some(SampleSpan {
            position: sample.offset,
            length: sample.size as u64,
            timestamp: track.ticks_to_duration(sample.pts()),
            keyframe: sample.keyframe,
        })
    }

    fn advance(&mut self) {
        self.sample += 1;
    }
}

/// Reader of the selected H.264 track, producing Annex B NALUs.
pub struct Mp4VideoReader<R> {
    cursor: SampleCursor<R>,
    length_size: usize,
    /// Bytes of the current sample already consumed.
    offset: u64,
}

impl<R: Read + Seek> Mp4VideoReader<R> {
    /// Create a reader at the first sample and queue the track's SPS and PPS.
    pub fn new(
        source: R,
        file: Arc<Mp4File>,
        track: &VideoTrack,
        queue: &mut EncodedProducer,
    ) -> Result<Self> {
        let cursor = SampleCursor::new(source, file, track.track_number)?;
        track.params.enqueue_parameters(queue)?;
        Ok(Self {
            cursor,
            length_size: track.params.config.nalu_length_size as usize,
            offset: 0,
        })
    }

    pub fn find_stream_position(&mut self, time: Duration) -> Result<Mp4Position> {
        self.cursor.find_stream_position(time)
    }

    pub fn find_key_frame(&mut self, position: Mp4Position) -> Result<Mp4Position> {
        self.cursor.find_key_frame(position)
    }

    pub fn seek_to_sample(&mut self, position: Mp4Position) -> Result<()> {
        self.offset = 0;
        self.cursor.seek_to_sample(position)
    }

    pub fn write_next_nalu(&mut self, dest: &mut EncodedBuffer) -> Result<NaluAction> {
        let (length_size, offset) = (self.length_size, self.offset);
        let (action, resume) = self.cursor.guarded(|cursor| {
            let Some(sample) = cursor.current_sample() else {
                return Ok((NaluAction::EndOfStream, 0));
            };
            let (action, resume) =
                reader::next_nalu(&mut cursor.source, &sample, length_size, offset, dest)?;
            if resume == 0 {
                cursor.advance();
            }
            Ok((action, resume))
        })?;
        self.offset = resume;
        Ok(action)
    }
}

/// Reader of the selected AC-3 or DTS track.
pub struct Mp4AudioReader<R> {
    cursor: SampleCursor<R>,
}

impl<R: Read + Seek> Mp4AudioReader<R> {
    pub fn new(source: R, file: Arc<Mp4File>, track: &AudioTrack) -> Result<Self> {
        Ok(Self {
            cursor: SampleCursor::new(source, file, track.track_number)?,
        })
    }

    pub fn find_stream_position(&mut self, time: Duration) -> Result<Mp4Position> {
        self.cursor.find_stream_position(time)
    }

    pub fn seek_to_sample(&mut self, position: Mp4Position) -> Result<()> {
        self.cursor.seek_to_sample(position)
    }

    /// Push the next sample into `queue`. Returns `false` at end of stream.
    pub fn read(&mut self, queue: &mut EncodedProducer) -> Result<bool> {
        self.cursor.guarded(|cursor| {
            let Some(sample) = cursor.current_sample() else {
                return Ok(false);
            };
            let mut buffer = queue.next_buffer().ok_or(MediaError::QueueFull)?;

            let filled = buffer
                .append_uninit(sample.length as usize)
                .and_then(|payload| {
                    reader::read_at(&mut cursor.source, sample.position, payload, "reading audio sample")
                });
            if let Err(e) = filled {
                queue.discard(buffer);
                return Err(e);
            }

            buffer.timestamp = Some(sample.timestamp);
            buffer.keyframe = true;
            queue.enqueue(buffer)?;
            cursor.advance();
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::tests::{avcc, baseline_720p_sps};
    use crate::mp4::parse_mp4;
    use crate::mp4::tests::{TrackSpec, ac3_entry, avc1_entry, ftyp, moov, mp4_box, trak};
    use crate::queue::{QueueConfig, encoded_queue};
    use std::io::Cursor;

    const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];

    fn length_prefixed(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend((nal.len() as u32).to_be_bytes());
            out.extend(*nal);
        }
        out
    }

    /// Video track of three samples (IDR, P, P+SEI) and a two-frame AC-3
    /// track, with the media data after `moov`.
    fn build_file() -> Vec<u8> {
        // I slice, then P slices
        let idr: &[u8] = &[0x65, 0x88, 0x80];
        let p: &[u8] = &[0x41, 0x9A, 0x80];
        let sei: &[u8] = &[0x06, 0x05, 0x80];
        let samples = [
            length_prefixed(&[idr]),
            length_prefixed(&[p]),
            length_prefixed(&[sei, p]),
        ];
        let audio = [vec![0x0B, 0x77, 1, 1], vec![0x0B, 0x77, 2, 2]];

        let video_spec = |offset| TrackSpec {
            track_id: 1,
            handler: b"vide",
            timescale: 1000,
            sample_entry: avc1_entry(&avcc(&baseline_720p_sps(), &PPS), 1280, 720),
            sizes: samples.iter().map(|s| s.len() as u32).collect(),
            delta: 40,
            sync: Some(vec![1]),
            chunk_offset: offset,
        };
        let audio_spec = |offset| TrackSpec {
            track_id: 2,
            handler: b"soun",
            timescale: 48_000,
            sample_entry: ac3_entry(2, 48_000),
            sizes: vec![4, 4],
            delta: 1536,
            sync: None,
            chunk_offset: offset,
        };

        let mut mdat_payload: Vec<u8> = samples.concat();
        let audio_at = mdat_payload.len() as u32;
        mdat_payload.extend(audio.concat());

        // Box sizes do not depend on the chunk offsets.
        let head_len = ftyp().len()
            + moov(1000, 120, &[trak(&video_spec(0)), trak(&audio_spec(0))]).len()
            + 8;
        let base = head_len as u32;

        let mut data = ftyp();
        data.extend(moov(
            1000,
            120,
            &[trak(&video_spec(base)), trak(&audio_spec(base + audio_at))],
        ));
        data.extend(mp4_box(b"mdat", &mdat_payload));
        data
    }

    fn open() -> (Arc<Mp4File>, Vec<u8>) {
        let data = build_file();
        let file = parse_mp4(&mut Cursor::new(data.clone())).unwrap();
        (Arc::new(file), data)
    }

    #[test]
    fn test_video_nalus() {
        let (file, data) = open();
        let track = file.find_video_track().unwrap();
        let (mut producer, mut consumer) = encoded_queue(QueueConfig::default()).unwrap();
        let mut reader =
            Mp4VideoReader::new(Cursor::new(data), file.clone(), &track, &mut producer).unwrap();

        let sps = consumer.dequeue().unwrap();
        assert_eq!(&sps.as_slice()[4..], baseline_720p_sps().as_slice());
        let pps = consumer.dequeue().unwrap();
        assert_eq!(&pps.as_slice()[4..], &PPS);

        let mut actions = Vec::new();
        let mut times = Vec::new();
        let mut dest = EncodedBuffer::with_capacity(1024);
        loop {
            dest.clear();
            let action = reader.write_next_nalu(&mut dest).unwrap();
            actions.push(action);
            if action == NaluAction::EndOfStream {
                break;
            }
            times.push(dest.timestamp);
        }
        assert_eq!(
            actions,
            vec![
                NaluAction::EndOfFrame,
                NaluAction::EndOfFrame,
                NaluAction::Ignore,
                NaluAction::EndOfFrame,
                NaluAction::EndOfStream,
            ]
        );
        assert_eq!(times[1], Some(Duration::from_millis(40)));
        assert_eq!(times[3], Some(Duration::from_millis(80)));
    }

    #[test]
    fn test_seek_to_key_frame() {
        let (file, data) = open();
        let track = file.find_video_track().unwrap();
        let (mut producer, _consumer) = encoded_queue(QueueConfig::default()).unwrap();
        let mut reader = Mp4VideoReader::new(Cursor::new(data), file, &track, &mut producer).unwrap();

        let position = reader.find_stream_position(Duration::from_millis(90)).unwrap();
        assert_eq!(position.sample, 2);
        assert_eq!(position.time, Duration::from_millis(80));
        let key = reader.find_key_frame(position).unwrap();
        assert_eq!(key, Mp4Position::START);
        reader.seek_to_sample(position).unwrap();

        let mut dest = EncodedBuffer::with_capacity(1024);
        assert_eq!(reader.write_next_nalu(&mut dest).unwrap(), NaluAction::Ignore);
    }

    #[test]
    fn test_audio_frames() {
        let (file, data) = open();
        let track = file.find_audio_track().unwrap();
        let (mut producer, mut consumer) = encoded_queue(QueueConfig::default()).unwrap();
        let mut reader = Mp4AudioReader::new(Cursor::new(data), file, &track).unwrap();

        assert!(reader.read(&mut producer).unwrap());
        assert!(reader.read(&mut producer).unwrap());
        assert!(!reader.read(&mut producer).unwrap());

        let first = consumer.dequeue().unwrap();
        assert_eq!(first.as_slice(), &[0x0B, 0x77, 1, 1]);
        let second = consumer.dequeue().unwrap();
        assert_eq!(second.timestamp, Some(Duration::from_millis(32)));
    }

    #[test]
    fn test_truncated_sample_stales_reader() {
        let (file, mut data) = open();
        let track = file.find_audio_track().unwrap();
        data.truncate(data.len() - 2);
        let (mut producer, _consumer) = encoded_queue(QueueConfig::default()).unwrap();
        let mut reader = Mp4AudioReader::new(Cursor::new(data), file, &track).unwrap();

        assert!(reader.read(&mut producer).unwrap());
        assert!(reader.read(&mut producer).unwrap_err().is_structural());
        assert!(matches!(reader.read(&mut producer), Err(MediaError::StaleReader)));
        reader.seek_to_sample(Mp4Position::START).unwrap();
        assert!(reader.read(&mut producer).unwrap());
    }
}
