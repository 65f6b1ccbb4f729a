//! Path grammar for tile files.
//!
//! Paths are checked segment by segment:
//!
//! ```text
//! maps / <dataset> / tiles / <lod> / x<int> / z<int>.<png|json>[.gz]
//! ```
//!
//! Anything else is [`PathMatch::Unmatched`]. Mismatches are routine
//! (marker files, settings, temp files) and are never errors.

use std::path::{Component, Path, PathBuf};

use super::TileCoordinate;

/// Directory below the webroot that holds all datasets.
pub const MAPS_DIR: &str = "maps";

/// Marker segment between the dataset and the tile pyramid.
pub const TILES_MARKER: &str = "tiles";

/// Tile payload extensions.
pub const TILE_EXTENSIONS: &[&str] = &["png", "json"];

/// Optional compression suffixes after the tile extension.
pub const COMPRESSION_EXTENSIONS: &[&str] = &["gz"];

/// Result of running a path through the grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    Matched(TileCoordinate),
    Unmatched(Mismatch),
}

impl PathMatch {
    /// The coordinate, if the path matched.
    pub fn coordinate(self) -> Option<TileCoordinate> {
        match self {
            PathMatch::Matched(coord) => Some(coord),
            PathMatch::Unmatched(_) => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, PathMatch::Matched(_))
    }
}

/// Why a path was not a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// Not made of plain UTF-8 segments (absolute, `..`, invalid encoding).
    NotRelative,
    /// Wrong number of segments.
    SegmentCount(usize),
    /// First segment is not `maps`.
    MapsDir,
    /// Third segment is not the `tiles` marker.
    TilesMarker,
    Lod,
    X,
    Z,
    Extension,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::NotRelative => write!(f, "not a relative UTF-8 path"),
            Mismatch::SegmentCount(n) => write!(f, "expected 6 segments, found {n}"),
            Mismatch::MapsDir => write!(f, "not below '{MAPS_DIR}/'"),
            Mismatch::TilesMarker => write!(f, "missing '{TILES_MARKER}' marker"),
            Mismatch::Lod => write!(f, "invalid level of detail"),
            Mismatch::X => write!(f, "invalid x directory"),
            Mismatch::Z => write!(f, "invalid z file name"),
            Mismatch::Extension => write!(f, "unsupported extension"),
        }
    }
}

/// Tile directory of one dataset below `webroot`.
pub fn tile_dir(webroot: &Path, dataset: &str) -> PathBuf {
    webroot.join(MAPS_DIR).join(dataset).join(TILES_MARKER)
}

/// Extract a tile coordinate from a path relative to the webroot.
pub fn extract(path: &Path) -> PathMatch {
    match parse_segments(path) {
        Ok(coord) => PathMatch::Matched(coord),
        Err(mismatch) => PathMatch::Unmatched(mismatch),
    }
}

fn parse_segments(path: &Path) -> Result<TileCoordinate, Mismatch> {
    let mut segments = Vec::with_capacity(6);
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                segments.push(part.to_str().ok_or(Mismatch::NotRelative)?);
            }
            Component::CurDir => {}
            _ => return Err(Mismatch::NotRelative),
        }
    }

    let [maps, dataset, marker, lod, x_dir, file_name] = segments[..] else {
        return Err(Mismatch::SegmentCount(segments.len()));
    };

    if maps != MAPS_DIR {
        return Err(Mismatch::MapsDir);
    }
    if marker != TILES_MARKER {
        return Err(Mismatch::TilesMarker);
    }

    let lod = parse_unsigned(lod).ok_or(Mismatch::Lod)?;
    let x = x_dir
        .strip_prefix('x')
        .and_then(parse_signed)
        .ok_or(Mismatch::X)?;

    let (z_part, extension) = split_tile_file(file_name)?;
    if !TILE_EXTENSIONS.contains(&extension) {
        return Err(Mismatch::Extension);
    }
    let z = z_part
        .strip_prefix('z')
        .and_then(parse_signed)
        .ok_or(Mismatch::Z)?;

    Ok(TileCoordinate {
        dataset: dataset.to_string(),
        lod,
        x,
        z,
    })
}

/// Split `z10.png.gz` into (`z10`, `png`), dropping a compression suffix.
fn split_tile_file(file_name: &str) -> Result<(&str, &str), Mismatch> {
    let (stem, extension) = file_name.rsplit_once('.').ok_or(Mismatch::Extension)?;
    if COMPRESSION_EXTENSIONS.contains(&extension) {
        stem.rsplit_once('.').ok_or(Mismatch::Extension)
    } else {
        Ok((stem, extension))
    }
}

fn parse_unsigned(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Base-10 integer with an optional leading `-`. No `+`, no whitespace.
fn parse_signed(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
