//! Per-track seek index built from the cue table, and the seek queries the
//! readers run against it.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek};
use std::time::Duration;

use super::MkvFile;
use super::cluster::{ClusterCache, ClusterPlaceholder};
use super::cues::CuePoint;
use crate::error::{MediaError, Result};

/// Number of clusters scanned forward from the cluster found by timestamp.
const SEEK_SCAN_CLUSTERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct SeekPoint {
    /// Ticks of the segment timestamp scale.
    pub time: u64,
    /// Index into the cluster placeholders.
    pub cluster: usize,
}

/// Seek points per track number, sorted by time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct SeekIndex {
    tracks: BTreeMap<u64, Vec<SeekPoint>>,
}

/// A position inside an MKV track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct MkvPosition {
    /// Timestamp of the sample.
    pub time: Duration,
    pub cluster: usize,
    /// Index into the cluster's blobs, all tracks counted.
    pub blob: usize,
}

impl MkvPosition {
    pub const START: MkvPosition = MkvPosition {
        time: Duration::ZERO,
        cluster: 0,
        blob: 0,
    };
}

/// Map cue points onto cluster indices, one sorted list per track.
pub fn build_seek_index(cues: &[CuePoint], clusters: &[ClusterPlaceholder]) -> Result<SeekIndex> {
    let by_position: HashMap<u64, usize> = clusters
        .iter()
        .enumerate()
        .map(|(i, c)| (c.position, i))
        .collect();

    let mut tracks: BTreeMap<u64, Vec<SeekPoint>> = BTreeMap::new();
    for cue in cues {
        for pos in &cue.positions {
            let cluster = *by_position
                .get(&pos.cluster_position)
                .ok_or(MediaError::ClusterNotFound {
                    position: pos.cluster_position,
                })?;
            tracks.entry(pos.track).or_default().push(SeekPoint {
                time: cue.time,
                cluster,
            });
        }
    }

    for points in tracks.values_mut() {
        points.sort_by_key(|p| p.time);
    }
    Ok(SeekIndex { tracks })
}

impl SeekIndex {
    pub fn is_empty(&self) -> bool {
        self.tracks.values().all(|p| p.is_empty())
    }

    /// Track numbers with their seek points, in track order.
    pub fn tracks(&self) -> impl Iterator<Item = (u64, &[SeekPoint])> {
        self.tracks.iter().map(|(track, points)| (*track, points.as_slice()))
    }

    /// Seek points of one track, sorted by time.
    pub fn track(&self, track: u64) -> &[SeekPoint] {
        self.tracks.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The last seek point at or before `time`. Of several points sharing that
    /// timestamp the first is returned.
    pub fn lookup(&self, track: u64, time: u64) -> Option<SeekPoint> {
        let points = self.track(track);
        let after = points.partition_point(|p| p.time <= time);
        if after == 0 {
            return None;
        }
        let found = points[after - 1].time;
        let first = points.partition_point(|p| p.time < found);
        Some(points[first])
    }
}

/// Find the last sample of `track` whose timestamp is at or before `time`
/// (in ticks). Nothing is cached beyond the parsed clusters.
pub fn find_stream_position<R: Read + Seek>(
    file: &MkvFile,
    cache: &mut ClusterCache,
    reader: &mut R,
    track: u64,
    time: u64,
) -> Result<MkvPosition> {
    if file.clusters.is_empty() {
        return Err(MediaError::SeekFailed("the file has no clusters".to_string()));
    }

    let first = match file.clusters.binary_search_by_key(&time, |c| c.timestamp) {
        Ok(i) => i,
        Err(0) => return Ok(MkvPosition::START),
        Err(i) => i - 1,
    };

    let mut found = None;
    let last = (first + SEEK_SCAN_CLUSTERS).min(file.clusters.len());
    for index in first..last {
        let cluster = cache.get(reader, file, index)?;
        for (i, blob) in cluster.blobs.iter().enumerate() {
            if blob.track != track {
                continue;
            }
            let t = cluster.timestamp as i64 + blob.timestamp as i64;
            if t <= time as i64 {
                found = Some(MkvPosition {
                    time: file.ticks_to_duration(t.max(0) as u64),
                    cluster: index,
                    blob: i,
                });
            }
        }
    }

    log::debug!("stream position for track {track} at tick {time}: {found:?}");
    found.ok_or_else(|| {
        MediaError::SeekFailed(format!("no sample of track {track} at or before tick {time}"))
    })
}

/// Move `position` back to a point the decoder can start from.
///
/// With cues the cluster of the nearest cue point at or before the position
/// is used; without them clusters are scanned backwards for a keyframe.
pub fn find_key_frame<R: Read + Seek>(
    file: &MkvFile,
    cache: &mut ClusterCache,
    reader: &mut R,
    track: u64,
    position: MkvPosition,
) -> Result<MkvPosition> {
    let points = file.seek_index.track(track);
    if !points.is_empty() {
        let cluster = match points.binary_search_by_key(&position.cluster, |p| p.cluster) {
            Ok(i) => points[i].cluster,
            Err(0) => 0,
            Err(i) => points[i - 1].cluster,
        };
        let ticks = file.clusters.get(cluster).map(|c| c.timestamp).unwrap_or(0);
        log::debug!("key frame for cluster {} from cues: cluster {cluster}", position.cluster);
        return Ok(MkvPosition {
            time: file.ticks_to_duration(ticks),
            cluster,
            blob: 0,
        });
    }

    if file.clusters.is_empty() {
        return Ok(MkvPosition::START);
    }
    for index in (0..=position.cluster.min(file.clusters.len() - 1)).rev() {
        let cluster = cache.get(reader, file, index)?;
        let end = if index == position.cluster {
            (position.blob + 1).min(cluster.blobs.len())
        } else {
            cluster.blobs.len()
        };
        let hit = cluster.blobs[..end]
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| b.track == track && b.keyframe);
        if let Some((i, blob)) = hit {
            let t = cluster.timestamp as i64 + blob.timestamp as i64;
            log::debug!("key frame for cluster {} by scan: cluster {index} blob {i}", position.cluster);
            return Ok(MkvPosition {
                time: file.ticks_to_duration(t.max(0) as u64),
                cluster: index,
                blob: i,
            });
        }
    }

    Ok(MkvPosition::START)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkv::cues::CueTrackPosition;

    fn cue(time: u64, track: u64, cluster_position: u64) -> CuePoint {
        CuePoint {
            time,
            positions: vec![CueTrackPosition {
                track,
                cluster_position,
                relative_position: None,
                block_number: None,
                duration: None,
            }],
        }
    }

    fn clusters() -> Vec<ClusterPlaceholder> {
        (0..4)
            .map(|i| ClusterPlaceholder {
                position: 0x1000 * (i + 1),
                timestamp: 1000 * i,
            })
            .collect()
    }

    #[test]
    fn test_seek_index_sorted_per_track() {
        let cues = vec![
            cue(3000, 1, 0x4000),
            cue(0, 1, 0x1000),
            cue(1000, 2, 0x2000),
            cue(2000, 1, 0x3000),
        ];
        let index = build_seek_index(&cues, &clusters()).unwrap();
        let times: Vec<u64> = index.track(1).iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0, 2000, 3000]);
        assert_eq!(index.track(1)[1].cluster, 2);
        assert_eq!(index.track(2).len(), 1);
        assert!(index.track(9).is_empty());
    }

    #[test]
    fn test_seek_index_unknown_cluster() {
        let cues = vec![cue(0, 1, 0x1234)];
        assert!(matches!(
            build_seek_index(&cues, &clusters()),
            Err(MediaError::ClusterNotFound { position: 0x1234 })
        ));
    }

    #[test]
    fn test_lookup_exact_and_between() {
        let cues = vec![cue(0, 1, 0x1000), cue(2000, 1, 0x3000), cue(3000, 1, 0x4000)];
        let index = build_seek_index(&cues, &clusters()).unwrap();
        for point in index.track(1) {
            assert_eq!(index.lookup(1, point.time), Some(*point));
        }
        assert_eq!(index.lookup(1, 2500).unwrap().cluster, 2);
        assert_eq!(index.lookup(1, 99_999).unwrap().cluster, 3);
    }

    #[test]
    fn test_lookup_before_first_and_ties() {
        let cues = vec![cue(500, 1, 0x1000), cue(500, 1, 0x2000), cue(900, 1, 0x3000)];
        let index = build_seek_index(&cues, &clusters()).unwrap();
        assert_eq!(index.lookup(1, 499), None);
        assert_eq!(index.lookup(1, 700).unwrap().cluster, 0);
    }
}
