use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::Duration;

use super::MkvFile;
use super::blob::{Blob, Lacing};
use super::cluster::ClusterCache;
use super::lacing::split_frames;
use super::seek::{self, MkvPosition};
use crate::ebml::MAX_BINARY_SIZE;
use crate::error::{MediaError, Result};
use crate::queue::{EncodedBuffer, EncodedProducer};
use crate::reader::{self, NaluAction, SampleSpan};
use crate::track::{AudioTrack, VideoTrack};

/// Read cursor over the blobs of one track.
pub struct TrackCursor<R> {
    source: R,
    file: Arc<MkvFile>,
    track: u64,
    default_duration: Option<u64>,
    cache: ClusterCache,
    cluster: usize,
    blob: usize,
    /// Frames of the current blob; several when the blob is laced.
    frames: Vec<SampleSpan>,
    frame: usize,
    lace_buf: Vec<u8>,
    stale: bool,
}

impl<R: Read + Seek> TrackCursor<R> {
    pub fn new(source: R, file: Arc<MkvFile>, track: u64) -> Self {
        let default_duration = file.track_entry(track).and_then(|t| t.default_duration);
        Self {
            source,
            file,
            track,
            default_duration,
            cache: ClusterCache::new(),
            cluster: 0,
            blob: 0,
            frames: Vec::new(),
            frame: 0,
            lace_buf: Vec::new(),
            stale: false,
        }
    }

    pub fn file(&self) -> &MkvFile {
        &self.file
    }

    pub fn track(&self) -> u64 {
        self.track
    }

    pub fn find_stream_position(&mut self, time: Duration) -> Result<MkvPosition> {
        let ticks = self.file.duration_to_ticks(time);
        seek::find_stream_position(&self.file, &mut self.cache, &mut self.source, self.track, ticks)
    }

    pub fn find_key_frame(&mut self, position: MkvPosition) -> Result<MkvPosition> {
        seek::find_key_frame(&self.file, &mut self.cache, &mut self.source, self.track, position)
    }

    /// Move the cursor to `position`. Clears the stale state.
    pub fn seek_to_sample(&mut self, position: MkvPosition) -> Result<()> {
        if position.cluster >= self.file.clusters.len() && position != MkvPosition::START {
            return Err(MediaError::SeekFailed(format!(
                "cluster {} is out of range",
                position.cluster
            )));
        }
        self.cluster = position.cluster;
        self.blob = position.blob;
        self.frames.clear();
        self.frame = 0;
        self.stale = false;
        Ok(())
    }

    /// Run `f`, marking the cursor stale when it fails on malformed data.
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

    fn timestamp(&self, cluster: u64, relative: i16) -> Duration {
        let ticks = (cluster as i64 + relative as i64).max(0) as u64;
        self.file.ticks_to_duration(ticks)
    }

    /// The frame under the cursor, loading the next blob of the track when
    /// the current one is used up. `None` at end of stream.
    fn current_frame(&mut self) -> Result<Option<SampleSpan>> {
        if let Some(frame) = self.frames.get(self.frame) {
            return Ok(Some(*frame));
        }
        self.frames.clear();
        self.frame = 0;

        loop {
            if self.cluster >= self.file.clusters.len() {
                return Ok(None);
            }
            let (start, track) = (self.blob, self.track);
            let cluster = self.cache.get(&mut self.source, &self.file, self.cluster)?;
            let cluster_timestamp = cluster.timestamp;
            let found = cluster
                .blobs
                .iter()
                .enumerate()
                .skip(start)
                .find(|(_, b)| b.track == track)
                .map(|(i, b)| (i, *b));

            match found {
                Some((index, blob)) => {
                    self.blob = index;
                    let base = self.timestamp(cluster_timestamp, blob.timestamp);
                    self.load_frames(blob, base)?;
                    return Ok(self.frames.first().copied());
                }
                None => {
                    self.cluster += 1;
                    self.blob = 0;
                }
            }
        }
    }

    fn load_frames(&mut self, blob: Blob, base: Duration) -> Result<()> {
        if blob.lacing() == Lacing::None {
            self.frames.push(SampleSpan {
                position: blob.position,
                length: blob.length,
                timestamp: base,
                keyframe: blob.keyframe,
            });
            return Ok(());
        }

        if blob.length > MAX_BINARY_SIZE {
            return Err(MediaError::InvalidData {
                offset: blob.position,
                message: format!("laced block of {} bytes", blob.length),
            });
        }
        self.lace_buf.resize(blob.length as usize, 0);
        reader::read_at(&mut self.source, blob.position, &mut self.lace_buf, "reading laced block")?;

        let step = self.default_duration.map(Duration::from_nanos);
        for (i, range) in split_frames(blob.lacing(), &self.lace_buf, blob.position)?
            .into_iter()
            .enumerate()
        {
            let timestamp = match step {
                Some(step) => base + step * i as u32,
                None => base,
            };
            self.frames.push(SampleSpan {
                position: blob.position + range.start as u64,
                length: range.len() as u64,
                timestamp,
                keyframe: blob.keyframe,
            });
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.frame += 1;
        if self.frame >= self.frames.len() {
            self.frames.clear();
            self.frame = 0;
            self.blob += 1;
        }
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8], context: &'static str) -> Result<()> {
        reader::read_at(&mut self.source, offset, buf, context)
    }
}

/// Reader of the selected H.264 track, producing Annex B NALUs.
pub struct MkvVideoReader<R> {
    cursor: TrackCursor<R>,
    length_size: usize,
    /// Bytes of the current frame already consumed.
    offset: u64,
}

impl<R: Read + Seek> MkvVideoReader<R> {
    /// Create a reader positioned at the start of the stream and queue the
    /// track's SPS and PPS.
    pub fn new(
        source: R,
        file: Arc<MkvFile>,
        track: &VideoTrack,
        queue: &mut EncodedProducer,
    ) -> Result<Self> {
        track.params.enqueue_parameters(queue)?;
        Ok(Self {
            cursor: TrackCursor::new(source, file, track.track_number),
            length_size: track.params.config.nalu_length_size as usize,
            offset: 0,
        })
    }

    pub fn find_stream_position(&mut self, time: Duration) -> Result<MkvPosition> {
        self.cursor.find_stream_position(time)
    }

    pub fn find_key_frame(&mut self, position: MkvPosition) -> Result<MkvPosition> {
        self.cursor.find_key_frame(position)
    }

    pub fn seek_to_sample(&mut self, position: MkvPosition) -> Result<()> {
        self.offset = 0;
        self.cursor.seek_to_sample(position)
    }

    /// Write the next NALU of the track into `dest` as start code + payload.
    pub fn write_next_nalu(&mut self, dest: &mut EncodedBuffer) -> Result<NaluAction> {
        let (length_size, offset) = (self.length_size, self.offset);
        let (action, resume) = self.cursor.guarded(|cursor| {
            let Some(frame) = cursor.current_frame()? else {
                return Ok((NaluAction::EndOfStream, 0));
            };
            let (action, resume) =
                reader::next_nalu(&mut cursor.source, &frame, length_size, offset, dest)?;
            if resume == 0 {
                cursor.advance();
            }
            Ok((action, resume))
        })?;
        // A failed NALU leaves the frame offset where it was.
        self.offset = resume;
        Ok(action)
    }
}

/// Reader of the selected AC-3 or DTS track.
pub struct MkvAudioReader<R> {
    cursor: TrackCursor<R>,
    stripped_header: Vec<u8>,
}

impl<R: Read + Seek> MkvAudioReader<R> {
    pub fn new(source: R, file: Arc<MkvFile>, track: &AudioTrack) -> Self {
        Self {
            cursor: TrackCursor::new(source, file, track.track_number),
            stripped_header: track.stripped_header.clone().unwrap_or_default(),
        }
    }

    pub fn find_stream_position(&mut self, time: Duration) -> Result<MkvPosition> {
        self.cursor.find_stream_position(time)
    }

    pub fn seek_to_sample(&mut self, position: MkvPosition) -> Result<()> {
        self.cursor.seek_to_sample(position)
    }

    /// Push the next frame into `queue`. Returns `false` at end of stream.
    ///
    /// Fails with [`MediaError::QueueFull`] without consuming the frame when
    /// no buffer is free.
    pub fn read(&mut self, queue: &mut EncodedProducer) -> Result<bool> {
        let header = &self.stripped_header;
        self.cursor.guarded(|cursor| {
            let Some(frame) = cursor.current_frame()? else {
                return Ok(false);
            };
            let mut buffer = queue.next_buffer().ok_or(MediaError::QueueFull)?;

            let filled = (|| {
                buffer.extend(header)?;
                let payload = buffer.append_uninit(frame.length as usize)?;
                cursor.read_at(frame.position, payload, "reading audio frame")
            })();
            if let Err(e) = filled {
                queue.discard(buffer);
                return Err(e);
            }

            buffer.timestamp = Some(frame.timestamp);
            buffer.keyframe = true;
            queue.enqueue(buffer)?;
            cursor.advance();
            Ok(true)
        })
    }
}
