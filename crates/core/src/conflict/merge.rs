//! Merge callbacks.
//!
//! Interactive name and content merging is delegated to the caller through
//! [`NameMerger`] and [`ContentMerger`]. Closures implement both traits, and
//! [`PolicyNameMerger`] / [`AutoContentMerger`] cover the non-interactive case.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::conflict::model::{Conflict, ContentTriplet};
use crate::conflict::three_way;
use crate::errors::MergeCallbackError;
use crate::path::ServerPath;

/// Chooses the server path for a rename/rename conflict.
pub trait NameMerger: Send + Sync {
    fn merge_name(&self, conflict: &Conflict) -> Result<ServerPath, MergeCallbackError>;
}

impl<F> NameMerger for F
where
    F: Fn(&Conflict) -> Result<ServerPath, MergeCallbackError> + Send + Sync,
{
    fn merge_name(&self, conflict: &Conflict) -> Result<ServerPath, MergeCallbackError> {
        self(conflict)
    }
}

/// Whether a content merger produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Accepted,
    Cancelled,
}

/// Buffer a content merger writes the merged file into. Nothing reaches the
/// working copy until the resolver applies it.
#[derive(Debug)]
pub struct MergeTarget {
    local_path: PathBuf,
    buffer: Vec<u8>,
}

impl MergeTarget {
    pub fn new(local_path: PathBuf) -> Self {
        Self {
            local_path,
            buffer: Vec::new(),
        }
    }

    /// Where the merged content will be written.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for MergeTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Produces merged content for an edit/edit conflict.
pub trait ContentMerger: Send + Sync {
    fn merge_content(
        &self,
        conflict: &Conflict,
        triplet: &ContentTriplet,
        target: &mut MergeTarget,
    ) -> Result<MergeOutcome, MergeCallbackError>;
}

impl<F> ContentMerger for F
where
    F: Fn(&Conflict, &ContentTriplet, &mut MergeTarget) -> Result<MergeOutcome, MergeCallbackError>
        + Send
        + Sync,
{
    fn merge_content(
        &self,
        conflict: &Conflict,
        triplet: &ContentTriplet,
        target: &mut MergeTarget,
    ) -> Result<MergeOutcome, MergeCallbackError> {
        self(conflict, triplet, target)
    }
}

// ---------------------------------------------------------------------------
// Non-interactive mergers
// ---------------------------------------------------------------------------

/// Which side a [`PolicyNameMerger`] keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamePolicy {
    #[default]
    Yours,
    Theirs,
}

impl std::fmt::Display for NamePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yours => write!(f, "yours"),
            Self::Theirs => write!(f, "theirs"),
        }
    }
}

/// Resolves rename/rename conflicts by a fixed policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyNameMerger {
    pub policy: NamePolicy,
}

impl PolicyNameMerger {
    pub fn new(policy: NamePolicy) -> Self {
        Self { policy }
    }
}

impl NameMerger for PolicyNameMerger {
    fn merge_name(&self, conflict: &Conflict) -> Result<ServerPath, MergeCallbackError> {
        let chosen = match self.policy {
            NamePolicy::Yours => Some(&conflict.your_server_item),
            NamePolicy::Theirs => conflict.their_server_item.as_ref(),
        };
        chosen.cloned().ok_or_else(|| {
            MergeCallbackError::Failed(format!(
                "item {} has no {} name",
                conflict.item_id, self.policy
            ))
        })
    }
}

/// Merges content with [`three_way::merge_text`]. Clean merges are accepted;
/// conflicted ones are cancelled unless `write_conflict_markers` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoContentMerger {
    pub write_conflict_markers: bool,
}

impl AutoContentMerger {
    pub fn new(write_conflict_markers: bool) -> Self {
        Self {
            write_conflict_markers,
        }
    }
}

impl ContentMerger for AutoContentMerger {
    fn merge_content(
        &self,
        conflict: &Conflict,
        triplet: &ContentTriplet,
        target: &mut MergeTarget,
    ) -> Result<MergeOutcome, MergeCallbackError> {
        let (base, yours, theirs) = triplet.as_text().map_err(|side| {
            MergeCallbackError::Failed(format!(
                "{side} content of item {} is not UTF-8 text",
                conflict.item_id
            ))
        })?;
        let result = three_way::merge_text(base, yours, theirs);
        if result.has_conflicts && !self.write_conflict_markers {
            warn!(
                item_id = conflict.item_id,
                regions = result.conflict_markers.len(),
                "automatic merge left conflicts, leaving item unresolved"
            );
            return Ok(MergeOutcome::Cancelled);
        }
        if result.has_conflicts {
            info!(
                item_id = conflict.item_id,
                regions = result.conflict_markers.len(),
                "writing merge result with conflict markers"
            );
        }
        target
            .write_all(result.merged_content.as_bytes())
            .map_err(|e| MergeCallbackError::Failed(e.to_string()))?;
        Ok(MergeOutcome::Accepted)
    }
}
