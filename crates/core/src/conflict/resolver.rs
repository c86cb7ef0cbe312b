//! Conflict resolution actions.
//!
//! [`ConflictResolver`] owns the outstanding conflicts of one batch and
//! resolves them one at a time by item id: accept yours, accept theirs, or
//! accept merge. Each resolution is terminal; a resolved conflict leaves the
//! outstanding set.
//!
//! Accept-merge gathers content and runs the merge callbacks before touching
//! the working copy, so a failed or cancelled callback leaves the disk as it
//! was.

use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::conflict::merge::{ContentMerger, MergeOutcome, MergeTarget, NameMerger};
use crate::conflict::model::{ChangeTypes, Conflict, ContentTriplet, Resolution};
use crate::errors::{ConflictError, MergeCallbackError, WorkspaceError};
use crate::orchestrator::CancellationToken;
use crate::path::ServerPath;
use crate::server::ServerBoundary;
use crate::store::ContentStore;
use crate::workspace::{move_local_item, remove_local_item, write_local_file, Workspace};

/// How one side (name or content) of a merge was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideResolution {
    /// That side was not in conflict.
    NoConflict,
    AcceptYours,
    AcceptTheirs,
    Merged,
}

/// The resolution reported to the server for a merge. Yours/theirs only when
/// every side in conflict agreed on it.
pub fn combine_resolutions(name: SideResolution, content: SideResolution) -> Resolution {
    use SideResolution::{AcceptTheirs, AcceptYours, NoConflict};
    match (name, content) {
        (NoConflict, NoConflict) => Resolution::AcceptMerge,
        (AcceptYours | NoConflict, AcceptYours | NoConflict) => Resolution::AcceptYours,
        (AcceptTheirs | NoConflict, AcceptTheirs | NoConflict) => Resolution::AcceptTheirs,
        _ => Resolution::AcceptMerge,
    }
}

/// Local paths touched while resolving, grouped by what happened to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdatedFiles {
    /// Written with merged content or moved to a merged name.
    pub merged: Vec<PathBuf>,
    /// Left as they were (accept yours).
    pub skipped: Vec<PathBuf>,
    /// Overwritten with the server version.
    pub updated: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl UpdatedFiles {
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
            && self.skipped.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
    }
}

/// A conflict that reached its terminal resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConflict {
    pub item_id: i32,
    pub conflict_id: i32,
    pub resolution: Resolution,
    pub local_path: Option<PathBuf>,
}

/// Collaborators a resolver works with.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub server: &'a dyn ServerBoundary,
    pub workspace: &'a dyn Workspace,
    pub store: &'a ContentStore,
    pub name_merger: &'a dyn NameMerger,
    pub content_merger: &'a dyn ContentMerger,
    pub cancel: &'a CancellationToken,
}

/// Resolves the outstanding conflicts of one batch.
pub struct ConflictResolver<'a> {
    ctx: ResolveContext<'a>,
    conflicts: Vec<Conflict>,
    updated_files: UpdatedFiles,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(ctx: ResolveContext<'a>, conflicts: Vec<Conflict>) -> Self {
        Self {
            ctx,
            conflicts,
            updated_files: UpdatedFiles::default(),
        }
    }

    /// Conflicts still awaiting resolution.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn find(&self, item_id: i32) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.item_id == item_id)
    }

    pub fn updated_files(&self) -> &UpdatedFiles {
        &self.updated_files
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// Dispatch to the accept-* operation for `resolution`.
    pub fn accept(
        &mut self,
        item_id: i32,
        resolution: Resolution,
    ) -> Result<ResolvedConflict, ConflictError> {
        match resolution {
            Resolution::AcceptYours => self.accept_yours(item_id),
            Resolution::AcceptTheirs => self.accept_theirs(item_id),
            Resolution::AcceptMerge => self.accept_merge(item_id),
        }
    }

    /// Keep the local state as is.
    #[instrument(skip(self))]
    pub fn accept_yours(&mut self, item_id: i32) -> Result<ResolvedConflict, ConflictError> {
        let conflict = self.outstanding(item_id)?.clone();
        info!(conflict_id = conflict.conflict_id, "resolving conflict: accept yours");

        let local = Some(conflict.source_local_item.clone());
        self.ctx.server.resolve_conflict(
            conflict.conflict_id,
            Resolution::AcceptYours,
            local.as_deref(),
        )?;
        self.updated_files.skipped.push(conflict.source_local_item.clone());
        Ok(self.finish(&conflict, Resolution::AcceptYours, local))
    }

    /// Replace the local state with the server's.
    #[instrument(skip(self))]
    pub fn accept_theirs(&mut self, item_id: i32) -> Result<ResolvedConflict, ConflictError> {
        let conflict = self.outstanding(item_id)?.clone();
        info!(conflict_id = conflict.conflict_id, "resolving conflict: accept theirs");

        let Some(their_path) = conflict.their_server_item.clone() else {
            remove_local_item(&conflict.source_local_item)?;
            self.ctx
                .server
                .resolve_conflict(conflict.conflict_id, Resolution::AcceptTheirs, None)?;
            self.updated_files.removed.push(conflict.source_local_item.clone());
            return Ok(self.finish(&conflict, Resolution::AcceptTheirs, None));
        };

        let target = match &conflict.target_local_item {
            Some(target) => target.clone(),
            None => self.ctx.workspace.require_local_path(&their_path)?,
        };

        if conflict.item_type.is_folder() {
            move_local_item(&conflict.source_local_item, &target)?;
            fs::create_dir_all(&target).map_err(|source| WorkspaceError::Io {
                path: target.clone(),
                source,
            })?;
        } else {
            let content = self.fetch(&their_path, conflict.their_version)?;
            write_local_file(&target, &content)?;
            if conflict.source_local_item != target {
                remove_local_item(&conflict.source_local_item)?;
                self.updated_files.removed.push(conflict.source_local_item.clone());
            }
        }

        self.ctx.server.resolve_conflict(
            conflict.conflict_id,
            Resolution::AcceptTheirs,
            Some(&target),
        )?;
        self.updated_files.updated.push(target.clone());
        Ok(self.finish(&conflict, Resolution::AcceptTheirs, Some(target)))
    }

    /// Merge names and/or content through the callbacks, then apply the result.
    #[instrument(skip(self))]
    pub fn accept_merge(&mut self, item_id: i32) -> Result<ResolvedConflict, ConflictError> {
        let conflict = self.outstanding(item_id)?.clone();
        if let Some(detail) = conflict.merge_blocker() {
            return Err(ConflictError::UnsupportedOperation { item_id, detail });
        }
        info!(conflict_id = conflict.conflict_id, "resolving conflict: accept merge");

        // Content first: everything the callbacks need is gathered up front.
        let triplet = if conflict.is_content_conflict() {
            Some(self.populate_triplet(&conflict)?)
        } else {
            None
        };

        let (name_resolution, target_path) = if conflict.is_name_conflict() {
            let chosen = self
                .ctx
                .name_merger
                .merge_name(&conflict)
                .map_err(|source| ConflictError::Callback { item_id, source })?;
            let side = if chosen == conflict.your_server_item {
                SideResolution::AcceptYours
            } else if Some(&chosen) == conflict.their_server_item.as_ref() {
                SideResolution::AcceptTheirs
            } else {
                SideResolution::Merged
            };
            debug!(name = %chosen, "name merge chose target");
            (side, Some(chosen))
        } else {
            (SideResolution::NoConflict, None)
        };

        let target_local = match &target_path {
            Some(path) => self.ctx.workspace.require_local_path(path)?,
            None => self.unrenamed_target(&conflict),
        };

        let (content_resolution, merged) = match &triplet {
            Some(triplet) => {
                let mut target = MergeTarget::new(target_local.clone());
                let outcome = self
                    .ctx
                    .content_merger
                    .merge_content(&conflict, triplet, &mut target)
                    .map_err(|source| ConflictError::Callback { item_id, source })?;
                if outcome == MergeOutcome::Cancelled {
                    return Err(ConflictError::Callback {
                        item_id,
                        source: MergeCallbackError::Cancelled,
                    });
                }
                (SideResolution::Merged, Some(target.into_bytes()))
            }
            None => (SideResolution::NoConflict, None),
        };

        if self.is_cancelled() {
            warn!("batch cancelled, merge result discarded");
            return Err(ConflictError::Cancelled(item_id));
        }

        match merged {
            Some(bytes) => {
                write_local_file(&target_local, &bytes)?;
                if conflict.source_local_item != target_local {
                    remove_local_item(&conflict.source_local_item)?;
                }
            }
            None => move_local_item(&conflict.source_local_item, &target_local)?,
        }

        let resolution = combine_resolutions(name_resolution, content_resolution);
        self.ctx
            .server
            .resolve_conflict(conflict.conflict_id, resolution, Some(&target_local))?;
        self.updated_files.merged.push(target_local.clone());
        Ok(self.finish(&conflict, resolution, Some(target_local)))
    }

    /// Where a merge lands when the names are not in conflict: the their-side
    /// location, unless yours renamed the item.
    fn unrenamed_target(&self, conflict: &Conflict) -> PathBuf {
        if conflict.your_changes.contains(ChangeTypes::RENAME) {
            return conflict.source_local_item.clone();
        }
        conflict
            .target_local_item
            .clone()
            .or_else(|| {
                conflict
                    .their_server_item
                    .as_ref()
                    .and_then(|path| self.ctx.workspace.local_path(path))
            })
            .unwrap_or_else(|| conflict.source_local_item.clone())
    }

    fn outstanding(&self, item_id: i32) -> Result<&Conflict, ConflictError> {
        self.find(item_id).ok_or(ConflictError::NotFound(item_id))
    }

    fn finish(
        &mut self,
        conflict: &Conflict,
        resolution: Resolution,
        local_path: Option<PathBuf>,
    ) -> ResolvedConflict {
        self.conflicts.retain(|c| c.item_id != conflict.item_id);
        info!(
            item_id = conflict.item_id,
            %resolution,
            remaining = self.conflicts.len(),
            "conflict resolved"
        );
        ResolvedConflict {
            item_id: conflict.item_id,
            conflict_id: conflict.conflict_id,
            resolution,
            local_path,
        }
    }

    /// Server content, from the store when cached.
    fn fetch(&self, path: &ServerPath, revision: i32) -> Result<Vec<u8>, ConflictError> {
        let server = self.ctx.server;
        self.ctx.store.get_or_fetch(path, revision, |out| {
            server.download(path, revision, out).map_err(ConflictError::from)
        })
    }

    fn populate_triplet(&self, conflict: &Conflict) -> Result<ContentTriplet, ConflictError> {
        let their_path =
            conflict
                .their_server_item
                .as_ref()
                .ok_or_else(|| ConflictError::MissingContent {
                    item_id: conflict.item_id,
                    detail: "no their-side item".to_string(),
                })?;

        let yours = match fs::read(&conflict.source_local_item) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConflictError::MissingContent {
                    item_id: conflict.item_id,
                    detail: format!(
                        "local file '{}' does not exist",
                        conflict.source_local_item.display()
                    ),
                })
            }
            Err(source) => {
                return Err(WorkspaceError::Io {
                    path: conflict.source_local_item.clone(),
                    source,
                }
                .into())
            }
        };

        let base = self.fetch(conflict.base_path(), conflict.base_version)?;
        let theirs = self.fetch(their_path, conflict.their_version)?;

        Ok(ContentTriplet::new(base, yours, theirs))
    }
}
