//! Tile coordinates and the path grammar that produces them.
//!
//! A renderer lays tiles out as
//! `maps/<dataset>/tiles/<lod>/x<x>/z<z>.<ext>[.gz]` below the webroot.
//! [`extract`] turns such a path into a [`TileCoordinate`], and
//! [`TileUpdate`] is the JSON frame pushed to subscribers.

pub mod path;

use serde::Serialize;

pub use path::{Mismatch, PathMatch, extract, tile_dir};

/// A single tile within one dataset's tile pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    /// Dataset (map/world) the tile belongs to.
    pub dataset: String,
    /// Level of detail.
    pub lod: u32,
    pub x: i64,
    pub z: i64,
}

impl TileCoordinate {
    /// Build the wire payload for this coordinate.
    ///
    /// Partitioned subscribers already know their dataset, so the key is only
    /// carried when `with_dataset` is set (unscoped broadcasting).
    pub fn to_update(&self, with_dataset: bool) -> TileUpdate<'_> {
        TileUpdate {
            dataset: with_dataset.then_some(self.dataset.as_str()),
            lod: self.lod,
            x: self.x,
            z: self.z,
        }
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}': lod={} x={} z={}",
            self.dataset, self.lod, self.x, self.z
        )
    }
}

/// JSON frame sent to subscribers, e.g. `{"lod":3,"x":1,"z":-2}`.
#[derive(Debug, Serialize)]
pub struct TileUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<&'a str>,
    pub lod: u32,
    pub x: i64,
    pub z: i64,
}

impl TileUpdate<'_> {
    /// Serialize to the compact JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
