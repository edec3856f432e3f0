//! Splitting of laced block payloads into frames.

use std::ops::Range;

use super::blob::Lacing;
use crate::ebml::{parse_signed_varint, parse_varint};
use crate::error::{MediaError, Result};

fn invalid(offset: u64, message: impl Into<String>) -> MediaError {
    MediaError::InvalidData {
        offset,
        message: message.into(),
    }
}

/// A single laced frame can never be larger than the block holding it.
fn frame_size(size: u64, data: &[u8], offset: u64) -> Result<usize> {
    usize::try_from(size)
        .ok()
        .filter(|&s| s <= data.len())
        .ok_or_else(|| {
            invalid(
                offset,
                format!("laced frame of {size} bytes in a block of {}", data.len()),
            )
        })
}

/// Split a block payload into frame ranges relative to `data`.
///
/// `data` starts at the lacing header; `offset` is its absolute file offset,
/// used for error reporting. The last frame takes whatever the header does
/// not account for.
pub fn split_frames(lacing: Lacing, data: &[u8], offset: u64) -> Result<Vec<Range<usize>>> {
    if lacing == Lacing::None {
        return Ok(vec![0..data.len()]);
    }

    let count = *data
        .first()
        .ok_or_else(|| invalid(offset, "empty laced block"))? as usize
        + 1;
    let mut pos = 1;
    let mut sizes = Vec::with_capacity(count);

    match lacing {
        Lacing::None => {}
        Lacing::Xiph => {
            for _ in 0..count - 1 {
                let mut size = 0usize;
                loop {
                    let b = *data
                        .get(pos)
                        .ok_or_else(|| invalid(offset, "truncated Xiph lacing header"))?;
                    pos += 1;
                    size += b as usize;
                    if b != 0xFF {
                        break;
                    }
                }
                sizes.push(frame_size(size as u64, data, offset)?);
            }
        }
        Lacing::Fixed => {
            let payload = data.len() - 1;
            if payload % count != 0 {
                return Err(invalid(
                    offset,
                    format!("fixed lacing of {count} frames over {payload} bytes"),
                ));
            }
            sizes.resize(count - 1, payload / count);
        }
        Lacing::Ebml => {
            if count > 1 {
                let (first, len) = parse_varint(&data[pos..])
                    .ok_or_else(|| invalid(offset, "truncated EBML lacing header"))?;
                pos += len;
                let mut size = frame_size(first, data, offset)? as i64;
                sizes.push(size as usize);
                for _ in 0..count - 2 {
                    let (delta, len) = parse_signed_varint(&data[pos..])
                        .ok_or_else(|| invalid(offset, "truncated EBML lacing header"))?;
                    pos += len;
                    size += delta;
                    if size < 0 {
                        return Err(invalid(offset, "negative EBML laced frame size"));
                    }
                    sizes.push(frame_size(size as u64, data, offset)?);
                }
            }
        }
    }

    let needed = sizes
        .iter()
        .try_fold(pos, |acc, &size| acc.checked_add(size))
        .filter(|&needed| needed <= data.len())
        .ok_or_else(|| {
            invalid(
                offset,
                format!(
                    "laced frames need more than the {} bytes of the block",
                    data.len()
                ),
            )
        })?;
    let remaining = data.len() - needed;
    sizes.push(remaining);

    let mut ranges = Vec::with_capacity(count);
    for size in sizes {
        ranges.push(pos..pos + size);
        pos += size;
    }
    Ok(ranges)
}
