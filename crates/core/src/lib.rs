//! tfvcresolve core library.
//!
//! This crate provides the building blocks for resolving TFVC conflicts on a
//! local workspace: server path ordering, a per-run cache of server file
//! content, the label request model, the conflict model with its merge
//! protocol, and the batch resolution engine.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod labels;
pub mod models;
pub mod orchestrator;
pub mod path;
pub mod server;
pub mod store;
pub mod workspace;

// Re-exports for convenience.
pub use config::EngineConfig;
pub use errors::{CoreError, ErrorKind};
pub use labels::LabelModel;
pub use orchestrator::{CancellationToken, ResolutionEngine, ResolutionPlan};
pub use path::ServerPath;
pub use store::ContentStore;
