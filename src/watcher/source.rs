//! Change types and the source trait the supervisor pulls batches from.

use std::path::PathBuf;

use async_trait::async_trait;
use notify::EventKind;
use notify::event::{ModifyKind, RenameMode};

use super::WatchError;

/// What happened to a path, reduced to what the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    /// Deletes, rename sources, access, metadata noise. Never batched.
    Other,
}

impl ChangeKind {
    /// Classify a raw notify event kind.
    ///
    /// The destination side of a rename counts as a creation: renderers
    /// write to a temp file and move it into place.
    pub fn from_event(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
            EventKind::Modify(ModifyKind::Name(_)) => ChangeKind::Other,
            EventKind::Modify(_) => ChangeKind::Modified,
            _ => ChangeKind::Other,
        }
    }

    pub fn is_reported(self) -> bool {
        matches!(self, ChangeKind::Created | ChangeKind::Modified)
    }

    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Other => "other",
        }
    }
}

/// A single changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Distinct changes observed during one debounce window, ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    pub changes: Vec<RawChange>,
}

impl ChangeBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.changes.iter().map(|c| &c.path)
    }
}

impl IntoIterator for ChangeBatch {
    type Item = RawChange;
    type IntoIter = std::vec::IntoIter<RawChange>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// A cancellable, pull-based sequence of change batches.
///
/// `Ok(None)` means the sequence ended because shutdown was requested.
/// An `Err` is fatal; callers must not poll again after one.
#[async_trait]
pub trait ChangeSource: Send {
    /// Wait for the next debounced batch.
    async fn next_batch(&mut self) -> Result<Option<ChangeBatch>, WatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    #[test]
    fn test_event_kind_classification() {
        let created = EventKind::Create(CreateKind::File);
        let written = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        let touched = EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime));
        let moved_in = EventKind::Modify(ModifyKind::Name(RenameMode::To));
        let moved_out = EventKind::Modify(ModifyKind::Name(RenameMode::From));
        let removed = EventKind::Remove(RemoveKind::File);
        let read = EventKind::Access(AccessKind::Read);

        assert_eq!(ChangeKind::from_event(&created), ChangeKind::Created);
        assert_eq!(ChangeKind::from_event(&written), ChangeKind::Modified);
        assert_eq!(ChangeKind::from_event(&touched), ChangeKind::Modified);
        assert_eq!(ChangeKind::from_event(&moved_in), ChangeKind::Created);
        assert_eq!(ChangeKind::from_event(&moved_out), ChangeKind::Other);
        assert_eq!(ChangeKind::from_event(&removed), ChangeKind::Other);
        assert_eq!(ChangeKind::from_event(&read), ChangeKind::Other);
        assert_eq!(ChangeKind::from_event(&EventKind::Any), ChangeKind::Other);
    }
}
