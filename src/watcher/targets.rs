//! Discovery of the per-dataset tile directories below a webroot.

use std::path::{Path, PathBuf};

use crate::tile::path::{MAPS_DIR, TILES_MARKER, tile_dir};

use super::WatchError;

/// The tile directory of one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    /// Dataset key, the directory name below `maps/`.
    pub dataset: String,
    /// Absolute path of `<webroot>/maps/<dataset>/tiles`.
    pub path: PathBuf,
}

/// Enumerate `maps/*/tiles` below `webroot`, sorted by dataset key.
///
/// Returns an empty list when nothing matches; deciding whether that is fatal
/// is up to the caller.
pub fn discover_targets(webroot: &Path) -> Result<Vec<WatchTarget>, WatchError> {
    let root = webroot.to_str().ok_or_else(|| WatchError::Discovery {
        path: webroot.to_path_buf(),
        reason: "path is not valid UTF-8".to_string(),
    })?;
    // Escape the webroot so only the dataset segment is a wildcard
    let pattern = format!("{}/{MAPS_DIR}/*/{TILES_MARKER}", glob::Pattern::escape(root));

    let entries = glob::glob(&pattern).map_err(|e| WatchError::Discovery {
        path: webroot.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut targets = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("[targets] skipping unreadable entry: {e}");
                continue;
            }
        };
        if !path.is_dir() {
            continue;
        }
        let dataset = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|name| name.to_str());
        match dataset {
            Some(dataset) => targets.push(WatchTarget {
                dataset: dataset.to_string(),
                path: tile_dir(webroot, dataset),
            }),
            None => tracing::warn!("[targets] skipping non UTF-8 dataset {}", path.display()),
        }
    }

    targets.sort_by(|a, b| a.dataset.cmp(&b.dataset));
    Ok(targets)
}
