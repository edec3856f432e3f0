//! Bounded single-producer / single-consumer queue of compressed samples
//! between a track reader and a decoder.
//!
//! Buffers circulate between two rings: the producer takes an empty buffer
//! from the free ring, fills it and pushes it onto the filled ring; the
//! consumer pops filled buffers and hands them back through the free ring
//! once the decoder is done with them.

use std::time::Duration;

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};

use crate::error::{MediaError, Result};

/// Smallest usable capacity: SPS and PPS precede the first frame.
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// Queue sizing.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Number of buffers in circulation.
    pub capacity: usize,
    /// Size of every buffer, in bytes.
    pub buffer_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            buffer_size: 1024 * 1024,
        }
    }
}

/// One compressed sample, or one NALU for video.
#[derive(Debug)]
pub struct EncodedBuffer {
    data: Vec<u8>,
    capacity: usize,
    pub timestamp: Option<Duration>,
    pub keyframe: bool,
}

impl EncodedBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            timestamp: None,
            keyframe: false,
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.timestamp = None;
        self.keyframe = false;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    /// Append bytes, failing rather than growing past the buffer size.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        let needed = self.data.len() + bytes.len();
        if needed > self.capacity {
            return Err(MediaError::BufferTooSmall {
                needed,
                capacity: self.capacity,
            });
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Grow by `len` zeroed bytes and return them for the caller to fill.
    pub fn append_uninit(&mut self, len: usize) -> Result<&mut [u8]> {
        let start = self.data.len();
        let needed = start + len;
        if needed > self.capacity {
            return Err(MediaError::BufferTooSmall {
                needed,
                capacity: self.capacity,
            });
        }
        self.data.resize(needed, 0);
        Ok(&mut self.data[start..])
    }
}

/// Writer half, owned by the track reader.
pub struct EncodedProducer {
    filled: HeapProd<EncodedBuffer>,
    free: HeapCons<EncodedBuffer>,
    spare: Option<EncodedBuffer>,
}

/// Reader half, owned by the decoder.
pub struct EncodedConsumer {
    filled: HeapCons<EncodedBuffer>,
    free: HeapProd<EncodedBuffer>,
}

/// Create a queue with `config.capacity` preallocated buffers.
pub fn encoded_queue(config: QueueConfig) -> Result<(EncodedProducer, EncodedConsumer)> {
    if config.capacity < MIN_QUEUE_CAPACITY {
        return Err(MediaError::QueueCapacity {
            min: MIN_QUEUE_CAPACITY,
            got: config.capacity,
        });
    }

    let (filled_prod, filled_cons) = HeapRb::<EncodedBuffer>::new(config.capacity).split();
    let (mut free_prod, free_cons) = HeapRb::<EncodedBuffer>::new(config.capacity).split();
    for _ in 0..config.capacity {
        if free_prod
            .try_push(EncodedBuffer::with_capacity(config.buffer_size))
            .is_err()
        {
            break;
        }
    }

    Ok((
        EncodedProducer {
            filled: filled_prod,
            free: free_cons,
            spare: None,
        },
        EncodedConsumer {
            filled: filled_cons,
            free: free_prod,
        },
    ))
}

impl EncodedProducer {
    /// Take an empty buffer, if the consumer has returned any.
    pub fn next_buffer(&mut self) -> Option<EncodedBuffer> {
        let mut buffer = self.spare.take().or_else(|| self.free.try_pop())?;
        buffer.clear();
        Some(buffer)
    }

    pub fn has_free_buffer(&self) -> bool {
        self.spare.is_some() || self.free.occupied_len() > 0
    }

    /// Hand a filled buffer to the consumer.
    pub fn enqueue(&mut self, buffer: EncodedBuffer) -> Result<()> {
        self.filled.try_push(buffer).map_err(|_| MediaError::QueueFull)
    }

    /// Keep a buffer that ended up unused, e.g. for an ignored NALU. It is
    /// handed out again by the next [`next_buffer`](Self::next_buffer).
    pub fn discard(&mut self, buffer: EncodedBuffer) {
        self.spare = Some(buffer);
    }

    /// Filled buffers not yet taken by the consumer.
    pub fn pending(&self) -> usize {
        self.filled.occupied_len()
    }
}

impl EncodedConsumer {
    /// Take the oldest filled buffer.
    pub fn dequeue(&mut self) -> Option<EncodedBuffer> {
        self.filled.try_pop()
    }

    /// Give a consumed buffer back to the producer.
    pub fn recycle(&mut self, mut buffer: EncodedBuffer) {
        buffer.clear();
        // The free ring holds the whole pool, so there is always room.
        let _ = self.free.try_push(buffer);
    }

    pub fn len(&self) -> usize {
        self.filled.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.filled.occupied_len() == 0
    }
}
