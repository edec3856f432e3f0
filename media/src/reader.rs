//! Container-independent track readers.

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use crate::avc::{self, NAL_START_CODE};
use crate::error::{MediaError, Result};
use crate::mkv::reader::{MkvAudioReader, MkvVideoReader};
use crate::mkv::seek::MkvPosition;
use crate::mp4::reader::{Mp4AudioReader, Mp4VideoReader};
use crate::mp4::Mp4Position;
use crate::queue::{EncodedBuffer, EncodedProducer};

/// What the caller should do with the NALU just written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluAction {
    /// Submit the NALU; more NALUs of the same frame follow.
    Decode,
    /// Submit the NALU; it was the last one of its frame.
    EndOfFrame,
    /// Drop the NALU (SEI).
    Ignore,
    /// Nothing was written, the track is exhausted.
    EndOfStream,
}

impl NaluAction {
    fn after_nalu(nal_type: u8, end_of_frame: bool) -> Self {
        match nal_type {
            avc::NAL_SEI => NaluAction::Ignore,
            _ if end_of_frame => NaluAction::EndOfFrame,
            _ => NaluAction::Decode,
        }
    }
}

/// A sample position returned by a reader's seek queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPosition {
    Mkv(MkvPosition),
    Mp4(Mp4Position),
}

impl StreamPosition {
    pub fn time(&self) -> Duration {
        match self {
            StreamPosition::Mkv(p) => p.time,
            StreamPosition::Mp4(p) => p.time,
        }
    }
}

fn position_mismatch() -> MediaError {
    MediaError::SeekFailed("stream position belongs to another container".to_string())
}

/// One sample on disk, or one frame of a laced block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SampleSpan {
    pub position: u64,
    pub length: u64,
    pub timestamp: Duration,
    pub keyframe: bool,
}

pub(crate) fn read_at<R: Read + Seek>(
    source: &mut R,
    offset: u64,
    buf: &mut [u8],
    context: &'static str,
) -> Result<()> {
    source.seek(SeekFrom::Start(offset))?;
    source.read_exact(buf).map_err(|e| MediaError::IoAtOffset {
        offset,
        context,
        source: e,
    })
}

/// Append the length-prefixed NALU found `offset` bytes into `sample` to
/// `dest` as start code + payload. Returns the NAL unit type and the sample
/// offset past the NALU. `dest` is left untouched on error.
pub(crate) fn write_nalu<R: Read + Seek>(
    source: &mut R,
    sample: &SampleSpan,
    length_size: usize,
    offset: u64,
    dest: &mut EncodedBuffer,
) -> Result<(u8, u64)> {
    let mark = dest.len();
    let result = copy_nalu(source, sample, length_size, offset, dest);
    if result.is_err() {
        dest.truncate(mark);
    }
    result
}

fn copy_nalu<R: Read + Seek>(
    source: &mut R,
    sample: &SampleSpan,
    length_size: usize,
    mut offset: u64,
    dest: &mut EncodedBuffer,
) -> Result<(u8, u64)> {
    let mut len_buf = [0u8; 4];
    let prefix = &mut len_buf[4 - length_size..];
    read_at(source, sample.position + offset, prefix, "reading NALU length")?;
    let len = prefix.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    offset += length_size as u64;
    if len == 0 || offset + len > sample.length {
        return Err(MediaError::InvalidData {
            offset: sample.position + offset,
            message: format!(
                "NALU of {len} bytes at sample offset {offset} overruns the {}-byte sample",
                sample.length
            ),
        });
    }

    let start = dest.len() + NAL_START_CODE.len();
    dest.extend(&NAL_START_CODE)?;
    let payload = dest.append_uninit(len as usize)?;
    read_at(source, sample.position + offset, payload, "reading NALU")?;

    let nal = &dest.as_slice()[start..];
    let nal_type = avc::nal_type(nal[0]);
    if nal_type == avc::NAL_IDR || nal_type == avc::NAL_SLICE {
        avc::slice_type(nal)?;
    }
    dest.timestamp = Some(sample.timestamp);
    dest.keyframe |= sample.keyframe || nal_type == avc::NAL_IDR;
    Ok((nal_type, offset + len))
}

/// Shared NALU step: write one NALU of `sample`, returning the action and
/// the sample offset to resume from (0 once the sample is consumed).
pub(crate) fn next_nalu<R: Read + Seek>(
    source: &mut R,
    sample: &SampleSpan,
    length_size: usize,
    offset: u64,
    dest: &mut EncodedBuffer,
) -> Result<(NaluAction, u64)> {
    let (nal_type, next) = write_nalu(source, sample, length_size, offset, dest)?;
    let end_of_frame = next >= sample.length;
    let resume = if end_of_frame { 0 } else { next };
    Ok((NaluAction::after_nalu(nal_type, end_of_frame), resume))
}

/// Reader of the selected video track, producing Annex B H.264 NALUs.
pub enum VideoTrackReader<R> {
    Mkv(MkvVideoReader<R>),
    Mp4(Mp4VideoReader<R>),
}

impl<R: Read + Seek> VideoTrackReader<R> {
    /// Last sample at or before `time`. The read cursor does not move.
    pub fn find_stream_position(&mut self, time: Duration) -> Result<StreamPosition> {
        match self {
            VideoTrackReader::Mkv(r) => r.find_stream_position(time).map(StreamPosition::Mkv),
            VideoTrackReader::Mp4(r) => r.find_stream_position(time).map(StreamPosition::Mp4),
        }
    }

    /// Nearest decodable start point at or before `position`.
    pub fn find_key_frame(&mut self, position: StreamPosition) -> Result<StreamPosition> {
        match (self, position) {
            (VideoTrackReader::Mkv(r), StreamPosition::Mkv(p)) => {
                r.find_key_frame(p).map(StreamPosition::Mkv)
            }
            (VideoTrackReader::Mp4(r), StreamPosition::Mp4(p)) => {
                r.find_key_frame(p).map(StreamPosition::Mp4)
            }
            _ => Err(position_mismatch()),
        }
    }

    pub fn seek_to_sample(&mut self, position: StreamPosition) -> Result<()> {
        match (self, position) {
            (VideoTrackReader::Mkv(r), StreamPosition::Mkv(p)) => r.seek_to_sample(p),
            (VideoTrackReader::Mp4(r), StreamPosition::Mp4(p)) => r.seek_to_sample(p),
            _ => Err(position_mismatch()),
        }
    }

    /// Position the reader on the key frame preceding `time`.
    pub fn seek(&mut self, time: Duration) -> Result<StreamPosition> {
        let position = self.find_stream_position(time)?;
        let key_frame = self.find_key_frame(position)?;
        self.seek_to_sample(key_frame)?;
        log::debug!("video seek to {time:?} landed at {:?}", key_frame.time());
        Ok(key_frame)
    }

    pub fn write_next_nalu(&mut self, dest: &mut EncodedBuffer) -> Result<NaluAction> {
        match self {
            VideoTrackReader::Mkv(r) => r.write_next_nalu(dest),
            VideoTrackReader::Mp4(r) => r.write_next_nalu(dest),
        }
    }
}

/// Reader of the selected audio track, one compressed frame per buffer.
pub enum AudioTrackReader<R> {
    Mkv(MkvAudioReader<R>),
    Mp4(Mp4AudioReader<R>),
}

impl<R: Read + Seek> AudioTrackReader<R> {
    pub fn find_stream_position(&mut self, time: Duration) -> Result<StreamPosition> {
        match self {
            AudioTrackReader::Mkv(r) => r.find_stream_position(time).map(StreamPosition::Mkv),
            AudioTrackReader::Mp4(r) => r.find_stream_position(time).map(StreamPosition::Mp4),
        }
    }

    pub fn seek_to_sample(&mut self, position: StreamPosition) -> Result<()> {
        match (self, position) {
            (AudioTrackReader::Mkv(r), StreamPosition::Mkv(p)) => r.seek_to_sample(p),
            (AudioTrackReader::Mp4(r), StreamPosition::Mp4(p)) => r.seek_to_sample(p),
            _ => Err(position_mismatch()),
        }
    }

    pub fn seek(&mut self, time: Duration) -> Result<StreamPosition> {
        let position = self.find_stream_position(time)?;
        self.seek_to_sample(position)?;
        Ok(position)
    }

    /// Push the next frame into `queue`. Returns `false` at end of stream.
    pub fn read(&mut self, queue: &mut EncodedProducer) -> Result<bool> {
        match self {
            AudioTrackReader::Mkv(r) => r.read(queue),
            AudioTrackReader::Mp4(r) => r.read(queue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::tests::BitWriter;
    use std::io::Cursor;

    fn idr_slice() -> Vec<u8> {
        // first_mb_in_slice = 0, slice_type = 7 (I, all slices)
        let mut w = BitWriter::default();
        w.ue(0);
        w.ue(7);
        w.ue(0);
        let mut nal = vec![0x65];
        nal.extend(w.finish());
        nal
    }

    fn sample_with(nals: &[&[u8]]) -> (Vec<u8>, SampleSpan) {
        let mut data = Vec::new();
        for nal in nals {
            data.extend((nal.len() as u32).to_be_bytes());
            data.extend(*nal);
        }
        let span = SampleSpan {
            position: 0,
            length: data.len() as u64,
            timestamp: Duration::from_millis(40),
            keyframe: false,
        };
        (data, span)
    }

    #[test]
    fn test_nalu_actions() {
        let idr = idr_slice();
        let sei = [0x06u8, 0x05, 0x01, 0x80];
        let (data, span) = sample_with(&[&sei, &idr]);
        let mut source = Cursor::new(data);
        let mut dest = EncodedBuffer::with_capacity(256);

        let (action, offset) = next_nalu(&mut source, &span, 4, 0, &mut dest).unwrap();
        assert_eq!(action, NaluAction::Ignore);
        assert_eq!(&dest.as_slice()[..5], &[0, 0, 0, 1, 0x06]);
        assert!(offset > 0);

        dest.clear();
        let (action, offset) = next_nalu(&mut source, &span, 4, offset, &mut dest).unwrap();
        assert_eq!(action, NaluAction::EndOfFrame);
        assert_eq!(offset, 0);
        assert!(dest.keyframe);
        assert_eq!(dest.timestamp, Some(Duration::from_millis(40)));
        assert_eq!(&dest.as_slice()[4..], idr.as_slice());
    }

    #[test]
    fn test_overrunning_nalu_leaves_buffer() {
        let mut data = 100u32.to_be_bytes().to_vec();
        data.extend([0x65, 0x88]);
        let span = SampleSpan {
            position: 0,
            length: data.len() as u64,
            timestamp: Duration::ZERO,
            keyframe: true,
        };
        let mut dest = EncodedBuffer::with_capacity(256);
        dest.extend(&[9, 9]).unwrap();
        let err = next_nalu(&mut Cursor::new(data), &span, 4, 0, &mut dest).unwrap_err();
        assert!(err.is_structural());
        assert_eq!(dest.as_slice(), &[9, 9]);
    }

    #[test]
    fn test_two_byte_length_prefix() {
        let idr = idr_slice();
        let mut data = (idr.len() as u16).to_be_bytes().to_vec();
        data.extend(&idr);
        let span = SampleSpan {
            position: 0,
            length: data.len() as u64,
            timestamp: Duration::ZERO,
            keyframe: true,
        };
        let mut dest = EncodedBuffer::with_capacity(256);
        let (action, _) = next_nalu(&mut Cursor::new(data), &span, 2, 0, &mut dest).unwrap();
        assert_eq!(action, NaluAction::EndOfFrame);
        assert_eq!(dest.len(), 4 + idr.len());
    }

    #[test]
    fn test_position_time() {
        let p = StreamPosition::Mp4(Mp4Position {
            time: Duration::from_secs(2),
            sample: 50,
        });
        assert_eq!(p.time(), Duration::from_secs(2));
        assert_eq!(StreamPosition::Mkv(MkvPosition::START).time(), Duration::ZERO);
    }
}
