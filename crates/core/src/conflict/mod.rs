//! Conflict model, merge callbacks, three-way merging and resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Modelling** -- what each side changed and whether a merge is possible.
//! 2. **Merging** -- name and content merge callbacks, and a line-based
//!    three-way merge for the non-interactive case.
//! 3. **Resolution** -- applying accept-yours / accept-theirs / accept-merge to
//!    the working copy and reporting it to the server.

pub mod merge;
pub mod model;
pub mod resolver;
pub mod three_way;

pub use merge::{
    AutoContentMerger, ContentMerger, MergeOutcome, MergeTarget, NameMerger, NamePolicy,
    PolicyNameMerger,
};
pub use model::{ChangeTypes, Conflict, ConflictType, ContentTriplet, Resolution};
pub use resolver::{
    combine_resolutions, ConflictResolver, ResolveContext, ResolvedConflict, SideResolution,
    UpdatedFiles,
};
pub use three_way::{merge_text, MergeResult};
