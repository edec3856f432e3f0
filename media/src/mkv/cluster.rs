//! Cluster placeholders gathered at open time, and the small arena of fully
//! parsed clusters the readers work from.

use std::io::{Read, Seek, SeekFrom};

use super::MkvFile;
use super::blob::Blob;
use crate::ebml::{self, ElementHeader, ids};
use crate::error::{MediaError, Result};

/// Number of parsed clusters kept per reader.
pub const CLUSTER_CACHE_SLOTS: usize = 4;

/// A cluster known by its position and timestamp only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct ClusterPlaceholder {
    /// Offset of the cluster element relative to the segment payload.
    pub position: u64,
    /// Cluster timestamp, in ticks.
    pub timestamp: u64,
}

/// A fully parsed cluster.
#[derive(Debug, Default, Clone)]
pub struct Cluster {
    pub index: usize,
    pub timestamp: u64,
    /// Blocks of every track, in file order.
    pub blobs: Vec<Blob>,
}

fn is_top_level(id: u32) -> bool {
    ids::SEGMENT_CHILDREN.contains(&id)
}

/// Read the timestamp of the cluster at `header` and leave the reader at the
/// cluster end. Unknown-size clusters end at the next top-level element.
pub(crate) fn scan_cluster<R: Read + Seek>(
    reader: &mut R,
    header: &ElementHeader,
    segment_data_offset: u64,
) -> Result<ClusterPlaceholder> {
    let mut timestamp = None;
    while let Some(child) = ebml::next_child(reader, header.end())? {
        if header.size.is_none() && is_top_level(child.id) {
            reader.seek(SeekFrom::Start(child.offset))?;
            break;
        }
        if child.id == ids::TIMESTAMP {
            timestamp = Some(ebml::read_uint(reader, &child)?);
            if let Some(end) = header.end() {
                reader.seek(SeekFrom::Start(end))?;
                break;
            }
        } else {
            ebml::skip(reader, &child)?;
        }
    }

    Ok(ClusterPlaceholder {
        position: header.offset - segment_data_offset,
        timestamp: timestamp.ok_or(MediaError::MissingElement {
            element: "Cluster Timestamp",
        })?,
    })
}

/// Parse the cluster element at `offset` into `cluster`, reusing its storage.
pub(crate) fn parse_cluster<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    cluster: &mut Cluster,
) -> Result<()> {
    reader.seek(SeekFrom::Start(offset))?;
    let header = ebml::read_header(reader)?.ok_or(MediaError::Truncated { offset, needed: 1 })?;
    if header.id != ids::CLUSTER {
        return Err(MediaError::UnexpectedElement {
            offset,
            id: header.id,
            expected: "Cluster",
        });
    }

    cluster.blobs.clear();
    while let Some(child) = ebml::next_child(reader, header.end())? {
        if header.size.is_none() && is_top_level(child.id) {
            break;
        }
        match child.id {
            ids::TIMESTAMP => cluster.timestamp = ebml::read_uint(reader, &child)?,
            ids::SIMPLE_BLOCK => {
                cluster.blobs.push(Blob::read(reader, &child, true)?);
                ebml::skip(reader, &child)?;
            }
            ids::BLOCK_GROUP => {
                if let Some(blob) = parse_block_group(reader, &child)? {
                    cluster.blobs.push(blob);
                }
            }
            _ => ebml::skip(reader, &child)?,
        }
    }
    Ok(())
}

fn parse_block_group<R: Read + Seek>(
    reader: &mut R,
    parent: &ElementHeader,
) -> Result<Option<Blob>> {
    let mut blob = None;
    let mut referenced = false;
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::BLOCK => {
                blob = Some(Blob::read(reader, &child, false)?);
                ebml::skip(reader, &child)?;
            }
            ids::REFERENCE_BLOCK => {
                referenced = true;
                ebml::skip(reader, &child)?;
            }
            _ => ebml::skip(reader, &child)?,
        }
    }
    Ok(blob.map(|b| Blob {
        keyframe: !referenced,
        ..b
    }))
}

struct Slot {
    cluster: Cluster,
    loaded: Option<usize>,
    last_used: u64,
}

/// Arena of parsed clusters keyed by placeholder index. The least recently
/// used slot is recycled, keeping its blob vector.
pub struct ClusterCache {
    slots: Vec<Slot>,
    clock: u64,
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterCache {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(CLUSTER_CACHE_SLOTS),
            clock: 0,
        }
    }

    /// Return cluster `index`, parsing it if it isn't cached.
    pub fn get<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        file: &MkvFile,
        index: usize,
    ) -> Result<&Cluster> {
        self.clock += 1;

        let slot = match self.slots.iter().position(|s| s.loaded == Some(index)) {
            Some(slot) => slot,
            None => {
                let placeholder = file.clusters.get(index).ok_or_else(|| {
                    MediaError::SeekFailed(format!("cluster {index} is out of range"))
                })?;
                let slot = self.free_slot();
                let entry = &mut self.slots[slot];
                entry.loaded = None;
                log::trace!("loading cluster {index} at segment offset 0x{:X}", placeholder.position);
                parse_cluster(
                    reader,
                    file.segment_data_offset + placeholder.position,
                    &mut entry.cluster,
                )?;
                entry.cluster.index = index;
                entry.loaded = Some(index);
                slot
            }
        };

        let entry = &mut self.slots[slot];
        entry.last_used = self.clock;
        Ok(&entry.cluster)
    }

    fn free_slot(&mut self) -> usize {
        if self.slots.len() < CLUSTER_CACHE_SLOTS {
            self.slots.push(Slot {
                cluster: Cluster::default(),
                loaded: None,
                last_used: 0,
            });
            return self.slots.len() - 1;
        }
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| (s.loaded.is_some(), s.last_used))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Number of clusters currently parsed.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.loaded.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.loaded = None;
        }
    }
}
