//! Line-based three-way merge of text content.
//!
//! Uses the `diffy` crate. When both sides touch the same region the result
//! carries `<<<<<<<` / `|||||||` / `=======` / `>>>>>>>` markers.

use tracing::debug;

/// The result of a three-way merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Merged content; contains conflict markers when `has_conflicts` is set.
    pub merged_content: String,
    pub has_conflicts: bool,
    pub conflict_markers: Vec<ConflictMarker>,
}

impl MergeResult {
    fn clean(content: &str) -> Self {
        Self {
            merged_content: content.to_string(),
            has_conflicts: false,
            conflict_markers: Vec::new(),
        }
    }
}

/// A conflict region within merged output, 1-indexed and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictMarker {
    pub start_line: usize,
    pub end_line: usize,
}

/// Merge `yours` and `theirs` against their common `base`.
pub fn merge_text(base: &str, yours: &str, theirs: &str) -> MergeResult {
    if yours == base || yours == theirs {
        debug!("yours unchanged or identical to theirs, theirs wins cleanly");
        return MergeResult::clean(theirs);
    }
    if theirs == base {
        debug!("theirs unchanged, yours wins cleanly");
        return MergeResult::clean(yours);
    }

    match diffy::merge(base, yours, theirs) {
        Ok(merged) => {
            debug!("clean three-way merge");
            MergeResult::clean(&merged)
        }
        Err(conflicted) => {
            let markers = find_markers(&conflicted);
            debug!(regions = markers.len(), "three-way merge left conflicts");
            MergeResult {
                merged_content: conflicted,
                has_conflicts: true,
                conflict_markers: markers,
            }
        }
    }
}

fn find_markers(content: &str) -> Vec<ConflictMarker> {
    let mut markers = Vec::new();
    let mut start = None;
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if line.starts_with("<<<<<<<") {
            start = Some(line_no);
        } else if line.starts_with(">>>>>>>") {
            if let Some(start_line) = start.take() {
                markers.push(ConflictMarker {
                    start_line,
                    end_line: line_no,
                });
            }
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_files() {
        let base = "line1\nline2\nline3\n";
        let result = merge_text(base, base, base);
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, base);
    }

    #[test]
    fn test_one_side_changed() {
        let base = "line1\nline2\nline3\n";
        let changed = "line1\nmodified\nline3\n";
        assert_eq!(merge_text(base, changed, base).merged_content, changed);
        assert_eq!(merge_text(base, base, changed).merged_content, changed);
    }

    #[test]
    fn test_non_overlapping_changes() {
        let base = "line1\nline2\nline3\nline4\nline5\nline6\nline7\nline8\n";
        let yours = "LINE1\nline2\nline3\nline4\nline5\nline6\nline7\nline8\n";
        let theirs = "line1\nline2\nline3\nline4\nline5\nline6\nline7\nLINE8\n";
        let result = merge_text(base, yours, theirs);
        assert!(!result.has_conflicts);
        assert!(result.merged_content.contains("LINE1"));
        assert!(result.merged_content.contains("LINE8"));
    }

    #[test]
    fn test_conflicting_changes() {
        let result = merge_text("original\n", "local\n", "server\n");
        assert!(result.has_conflicts);
        assert!(result.merged_content.contains("<<<<<<<"));
        assert!(result.merged_content.contains(">>>>>>>"));
        assert!(result.merged_content.contains("local"));
        assert!(result.merged_content.contains("server"));
        assert_eq!(result.conflict_markers.len(), 1);
        assert_eq!(result.conflict_markers[0].start_line, 1);
    }

    #[test]
    fn test_same_change_both_sides() {
        let result = merge_text("old\n", "new\n", "new\n");
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "new\n");
    }
}
