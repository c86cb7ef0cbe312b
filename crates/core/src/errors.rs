//! Error types for the tfvcresolve core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. [`ErrorKind`] classifies any of them into the coarse
//! categories callers act on (contract violation, unsupported operation,
//! callback failure, storage I/O, server communication).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::FailedConflict;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Programmer or integration error. Never retried.
    ContractViolation,
    /// Accept-merge requested on a conflict that cannot be merged.
    UnsupportedOperation,
    /// A name/content merger failed or the user cancelled it.
    CallbackFailure,
    /// Content store read/write failure.
    StorageIo,
    /// Any failure reported by the server boundary.
    ServerCommunication,
    /// Local working-copy failure (mapping missing, disk write failed).
    Workspace,
    /// The batch was cancelled by the caller.
    Cancelled,
    /// Configuration could not be loaded or is invalid.
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContractViolation => write!(f, "contract_violation"),
            Self::UnsupportedOperation => write!(f, "unsupported_operation"),
            Self::CallbackFailure => write!(f, "callback_failure"),
            Self::StorageIo => write!(f, "storage_io"),
            Self::ServerCommunication => write!(f, "server_communication"),
            Self::Workspace => write!(f, "workspace"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Config => write!(f, "config"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Path(_) => ErrorKind::ContractViolation,
            Self::Store(e) => e.kind(),
            Self::Server(_) => ErrorKind::ServerCommunication,
            Self::Workspace(_) => ErrorKind::Workspace,
            Self::Conflict(e) => e.kind(),
            Self::Resolve(e) => e.kind(),
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

// ---------------------------------------------------------------------------
// Server paths
// ---------------------------------------------------------------------------

/// A string that is not a well-formed server path. Always a contract
/// violation: server paths come from the server or from validated input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("server path is empty")]
    Empty,

    #[error("server path '{0}' is not rooted at '$/'")]
    NotRooted(String),

    #[error("server path '{0}' contains an empty segment")]
    EmptySegment(String),
}

// ---------------------------------------------------------------------------
// Content store
// ---------------------------------------------------------------------------

/// Errors from the content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `create` was called for a key that already has a slot.
    #[error("content slot for '{path}' at revision {revision} already exists")]
    SlotExists { path: String, revision: i32 },

    /// The backing file of a slot disappeared underneath the store.
    #[error("cached content for '{path}' at revision {revision} is missing from '{}'", file.display())]
    Missing {
        path: String,
        revision: i32,
        file: PathBuf,
    },

    /// The handle does not belong to this store (or was invalidated).
    #[error("unknown content handle for '{path}' at revision {revision}")]
    UnknownHandle { path: String, revision: i32 },

    /// Generic I/O wrapper.
    #[error("content store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SlotExists { .. } | Self::UnknownHandle { .. } => ErrorKind::ContractViolation,
            Self::Missing { .. } | Self::Io(_) => ErrorKind::StorageIo,
        }
    }
}

// ---------------------------------------------------------------------------
// Server boundary
// ---------------------------------------------------------------------------

/// Sub-kind of a server failure. Kept for logging only; the engine treats
/// every kind as fatal for the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorKind {
    Connection,
    Authentication,
    HostNotFound,
    NotFound,
    Forbidden,
}

impl std::fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Authentication => write!(f, "authentication"),
            Self::HostNotFound => write!(f, "host_not_found"),
            Self::NotFound => write!(f, "not_found"),
            Self::Forbidden => write!(f, "forbidden"),
        }
    }
}

/// Opaque server communication failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("server communication failed ({kind}): {message}")]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub message: String,
}

impl ServerError {
    pub fn new(kind: ServerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServerErrorKind::NotFound, message)
    }
}

// ---------------------------------------------------------------------------
// Workspace boundary
// ---------------------------------------------------------------------------

/// Errors from the local working copy.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// No working folder maps the server path.
    #[error("no local mapping for server path '{0}'")]
    NoMapping(String),

    /// Writing or removing a local file failed.
    #[error("workspace I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Merge callbacks
// ---------------------------------------------------------------------------

/// Failure reported by a name or content merger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeCallbackError {
    /// The user backed out of the merge.
    #[error("merge cancelled by user")]
    Cancelled,

    /// The merger could not produce a result.
    #[error("merge callback failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Single-conflict errors
// ---------------------------------------------------------------------------

/// Errors from resolving a single conflict.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// No outstanding conflict has this item id.
    #[error("no outstanding conflict for item {0}")]
    NotFound(i32),

    /// Accept-merge was requested for a conflict that cannot be merged.
    #[error("cannot merge conflict on item {item_id}: {detail}")]
    UnsupportedOperation { item_id: i32, detail: String },

    /// A merge callback failed or was cancelled by the user.
    #[error("merge callback for item {item_id} did not complete: {source}")]
    Callback {
        item_id: i32,
        #[source]
        source: MergeCallbackError,
    },

    /// Content required for the merge is not available.
    #[error("missing content for item {item_id}: {detail}")]
    MissingContent { item_id: i32, detail: String },

    /// The batch was cancelled before the merge result was applied.
    #[error("batch cancelled before resolving item {0}")]
    Cancelled(i32),

    #[error("conflict store error: {0}")]
    Store(#[from] StoreError),

    #[error("conflict server error: {0}")]
    Server(#[from] ServerError),

    #[error("conflict workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

impl ConflictError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::ContractViolation,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::Callback { .. } => ErrorKind::CallbackFailure,
            Self::MissingContent { .. } => ErrorKind::StorageIo,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Store(e) => e.kind(),
            Self::Server(_) => ErrorKind::ServerCommunication,
            Self::Workspace(_) => ErrorKind::Workspace,
        }
    }

    /// Per-conflict failures leave the conflict outstanding but let the rest
    /// of the batch proceed. Everything else aborts the batch.
    pub fn is_per_conflict(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnsupportedOperation | ErrorKind::CallbackFailure
        )
    }
}

// ---------------------------------------------------------------------------
// Batch errors
// ---------------------------------------------------------------------------

/// Errors from resolving a whole conflict batch.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The plan does not cover the reported conflicts one-to-one.
    #[error("resolution plan has {planned} entries but {reported} conflicts were reported")]
    PlanCountMismatch { planned: usize, reported: usize },

    /// A plan entry names an item with no reported conflict.
    #[error("resolution plan names item {0} which has no reported conflict")]
    DanglingPlanEntry(i32),

    /// The plan names the same item twice.
    #[error("resolution plan names item {0} more than once")]
    DuplicatePlanEntry(i32),

    /// Conflicts remained outstanding after the plan was applied.
    #[error("{} conflict(s) left unresolved after applying the plan ({} failed)", unresolved.len(), failures.len())]
    Incomplete {
        unresolved: Vec<i32>,
        failures: Vec<FailedConflict>,
    },

    /// Another batch is already running on this engine.
    #[error("a resolution batch is already running")]
    AlreadyRunning,

    /// The caller cancelled the batch.
    #[error("batch cancelled after resolving {resolved} conflict(s)")]
    Cancelled { resolved: usize },

    /// A conflict failed in a way that is fatal for the batch.
    #[error("resolving item {item_id} aborted the batch: {source}")]
    Aborted {
        item_id: i32,
        #[source]
        source: ConflictError,
    },
}

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PlanCountMismatch { .. }
            | Self::DanglingPlanEntry(_)
            | Self::DuplicatePlanEntry(_)
            | Self::Incomplete { .. }
            | Self::AlreadyRunning => ErrorKind::ContractViolation,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Aborted { source, .. } => source.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
