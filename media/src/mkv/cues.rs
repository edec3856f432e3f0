use std::io::{Read, Seek};

use crate::ebml::{self, ElementHeader, ids};
use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct CueTrackPosition {
    pub track: u64,
    /// Cluster offset relative to the segment payload.
    pub cluster_position: u64,
    /// Block offset relative to the cluster payload.
    pub relative_position: Option<u64>,
    pub block_number: Option<u64>,
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[cfg_attr(feature = "jsonschema", derive(schemars::JsonSchema))]
pub struct CuePoint {
    /// Ticks of the segment timestamp scale.
    pub time: u64,
    pub positions: Vec<CueTrackPosition>,
}

pub(crate) fn parse_cues<R: Read + Seek>(
    reader: &mut R,
    parent: &ElementHeader,
) -> Result<Vec<CuePoint>> {
    let mut cues = Vec::new();
    while let Some(child) = ebml::next_child(reader, parent.end())? {
        if child.id != ids::CUE_POINT {
            ebml::skip(reader, &child)?;
            continue;
        }

        let mut time = None;
        let mut positions = Vec::new();
        while let Some(item) = ebml::next_child(reader, child.end())? {
            match item.id {
                ids::CUE_TIME => time = Some(ebml::read_uint(reader, &item)?),
                ids::CUE_TRACK_POSITIONS => positions.push(parse_positions(reader, &item)?),
                _ => ebml::skip(reader, &item)?,
            }
        }

        cues.push(CuePoint {
            time: time.ok_or(MediaError::MissingElement { element: "CueTime" })?,
            positions,
        });
    }
    Ok(cues)
}

fn parse_positions<R: Read + Seek>(
    reader: &mut R,
    parent: &ElementHeader,
) -> Result<CueTrackPosition> {
    let mut track = None;
    let mut cluster_position = None;
    let mut relative_position = None;
    let mut block_number = None;
    let mut duration = None;

    while let Some(child) = ebml::next_child(reader, parent.end())? {
        match child.id {
            ids::CUE_TRACK => track = Some(ebml::read_uint(reader, &child)?),
            ids::CUE_CLUSTER_POSITION => cluster_position = Some(ebml::read_uint(reader, &child)?),
            ids::CUE_RELATIVE_POSITION => relative_position = Some(ebml::read_uint(reader, &child)?),
            ids::CUE_BLOCK_NUMBER => block_number = Some(ebml::read_uint(reader, &child)?),
            ids::CUE_DURATION => duration = Some(ebml::read_uint(reader, &child)?),
            _ => ebml::skip(reader, &child)?,
        }
    }

    Ok(CueTrackPosition {
        track: track.ok_or(MediaError::MissingElement { element: "CueTrack" })?,
        cluster_position: cluster_position.ok_or(MediaError::MissingElement {
            element: "CueClusterPosition",
        })?,
        relative_position,
        block_number,
        duration,
    })
}
