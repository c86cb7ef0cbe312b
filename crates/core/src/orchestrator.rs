//! Batch conflict resolution.
//!
//! The [`ResolutionEngine`] applies a [`ResolutionPlan`] to the conflicts of
//! one batch:
//!
//! 1. Validate the plan against the reported conflicts (one entry per
//!    conflict, no strays, no duplicates) before touching anything.
//! 2. Apply each entry in plan order, falling back to the entry's fallback
//!    kind when the requested one is unsupported.
//! 3. Record per-conflict failures and keep going; abort on anything that
//!    leaves the batch in an unknown state (store, server, workspace).
//! 4. Fail with [`ResolveError::Incomplete`] if anything is left outstanding.
//!
//! A lock flag prevents two batches from running on one engine at once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::conflict::{
    Conflict, ConflictResolver, ContentMerger, NameMerger, ResolveContext, ResolvedConflict,
    Resolution, UpdatedFiles,
};
use crate::errors::{ConflictError, ErrorKind, ResolveError, StoreError};
use crate::server::ServerBoundary;
use crate::store::ContentStore;
use crate::workspace::Workspace;

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// What to do with one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedResolution {
    pub item_id: i32,
    pub resolution: Resolution,
    /// Used when `resolution` is unsupported for the conflict.
    #[serde(default)]
    pub fallback: Option<Resolution>,
}

/// Ordered resolutions for a batch, keyed by item id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolutionPlan {
    entries: Vec<PlannedResolution>,
}

impl ResolutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, item_id: i32, resolution: Resolution) -> Self {
        self.entries.push(PlannedResolution {
            item_id,
            resolution,
            fallback: None,
        });
        self
    }

    pub fn with_fallback(mut self, item_id: i32, resolution: Resolution, fallback: Resolution) -> Self {
        self.entries.push(PlannedResolution {
            item_id,
            resolution,
            fallback: Some(fallback),
        });
        self
    }

    /// Apply `resolution` to every conflict, in the order given.
    pub fn uniform(conflicts: &[Conflict], resolution: Resolution, fallback: Option<Resolution>) -> Self {
        Self {
            entries: conflicts
                .iter()
                .map(|c| PlannedResolution {
                    item_id: c.item_id,
                    resolution,
                    fallback,
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[PlannedResolution] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check that `plan` names every conflict exactly once.
pub fn validate_plan(conflicts: &[Conflict], plan: &ResolutionPlan) -> Result<(), ResolveError> {
    if plan.len() != conflicts.len() {
        return Err(ResolveError::PlanCountMismatch {
            planned: plan.len(),
            reported: conflicts.len(),
        });
    }
    let mut seen = HashSet::new();
    for entry in plan.entries() {
        if !seen.insert(entry.item_id) {
            return Err(ResolveError::DuplicatePlanEntry(entry.item_id));
        }
        if !conflicts.iter().any(|c| c.item_id == entry.item_id) {
            return Err(ResolveError::DanglingPlanEntry(entry.item_id));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared flag a caller sets to stop a running batch. Checked before each
/// conflict and before a merge result is written.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A conflict left outstanding by a per-conflict failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedConflict {
    pub item_id: i32,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailedConflict {
    fn new(item_id: i32, error: &ConflictError) -> Self {
        Self {
            item_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of a fully resolved batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub resolved: Vec<ResolvedConflict>,
    /// Entries resolved with their fallback kind.
    pub fallbacks_used: usize,
    pub updated_files: UpdatedFiles,
}

/// Apply `plan` to the conflicts held by `resolver`.
pub fn resolve_batch(
    resolver: &mut ConflictResolver<'_>,
    plan: &ResolutionPlan,
) -> Result<BatchReport, ResolveError> {
    validate_plan(resolver.conflicts(), plan)?;
    info!(conflicts = plan.len(), "resolving conflict batch");

    let mut report = BatchReport::default();
    let mut failures = Vec::new();

    for entry in plan.entries() {
        if resolver.is_cancelled() {
            warn!(resolved = report.resolved.len(), "batch cancelled");
            return Err(ResolveError::Cancelled {
                resolved: report.resolved.len(),
            });
        }

        let mut result = resolver.accept(entry.item_id, entry.resolution);
        if let (Err(ConflictError::UnsupportedOperation { detail, .. }), Some(fallback)) =
            (&result, entry.fallback)
        {
            info!(
                item_id = entry.item_id,
                %fallback,
                reason = %detail,
                "requested resolution unsupported, using fallback"
            );
            result = resolver.accept(entry.item_id, fallback);
            if result.is_ok() {
                report.fallbacks_used += 1;
            }
        }

        match result {
            Ok(resolved) => report.resolved.push(resolved),
            Err(ConflictError::Cancelled(_)) => {
                return Err(ResolveError::Cancelled {
                    resolved: report.resolved.len(),
                })
            }
            Err(e) if e.is_per_conflict() => {
                warn!(item_id = entry.item_id, error = %e, "conflict left unresolved");
                failures.push(FailedConflict::new(entry.item_id, &e));
            }
            Err(source) => {
                return Err(ResolveError::Aborted {
                    item_id: entry.item_id,
                    source,
                })
            }
        }
    }

    if !resolver.conflicts().is_empty() {
        let unresolved = resolver.conflicts().iter().map(|c| c.item_id).collect();
        return Err(ResolveError::Incomplete {
            unresolved,
            failures,
        });
    }

    report.updated_files = resolver.updated_files().clone();
    info!(
        resolved = report.resolved.len(),
        fallbacks = report.fallbacks_used,
        "conflict batch resolved"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Owns the collaborators for conflict resolution and runs batches.
pub struct ResolutionEngine {
    server: Arc<dyn ServerBoundary>,
    workspace: Arc<dyn Workspace>,
    store: Arc<ContentStore>,
    name_merger: Box<dyn NameMerger>,
    content_merger: Box<dyn ContentMerger>,
    cancel: CancellationToken,
    /// Set while a batch runs.
    running: Arc<AtomicBool>,
}

impl ResolutionEngine {
    pub fn new(
        server: Arc<dyn ServerBoundary>,
        workspace: Arc<dyn Workspace>,
        store: Arc<ContentStore>,
        name_merger: Box<dyn NameMerger>,
        content_merger: Box<dyn ContentMerger>,
    ) -> Self {
        info!("initializing resolution engine");
        Self {
            server,
            workspace,
            store,
            name_merger,
            content_merger,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn server(&self) -> &dyn ServerBoundary {
        self.server.as_ref()
    }

    /// A handle that cancels batches run by this engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve `conflicts` according to `plan`.
    pub fn resolve_batch(
        &self,
        conflicts: Vec<Conflict>,
        plan: &ResolutionPlan,
    ) -> Result<BatchReport, ResolveError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ResolveError::AlreadyRunning);
        }
        let _guard = RunningGuard {
            running: self.running.clone(),
            cancel: self.cancel.clone(),
        };

        let ctx = ResolveContext {
            server: self.server.as_ref(),
            workspace: self.workspace.as_ref(),
            store: &self.store,
            name_merger: self.name_merger.as_ref(),
            content_merger: self.content_merger.as_ref(),
            cancel: &self.cancel,
        };
        let mut resolver = ConflictResolver::new(ctx, conflicts);
        resolve_batch(&mut resolver, plan)
    }

    /// Remove the content store's directory. Call on the way out.
    pub fn shutdown(&self) -> Result<(), StoreError> {
        info!(cached = self.store.len(), "shutting down resolution engine");
        self.store.cleanup()
    }
}

/// Drop guard that clears the `running` flag and any cancellation request
/// aimed at the batch that just ended.
struct RunningGuard {
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.cancel.reset();
        self.running.store(false, Ordering::SeqCst);
    }
}
