//! Conflict records as reported by the server.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::ItemType;
use crate::path::ServerPath;

// ---------------------------------------------------------------------------
// Change types
// ---------------------------------------------------------------------------

/// Set of pending-change kinds on one side of a conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChangeTypes(u32);

impl ChangeTypes {
    pub const NONE: Self = Self(0);
    pub const ADD: Self = Self(1);
    pub const EDIT: Self = Self(1 << 1);
    pub const ENCODING: Self = Self(1 << 2);
    pub const RENAME: Self = Self(1 << 3);
    pub const DELETE: Self = Self(1 << 4);
    pub const UNDELETE: Self = Self(1 << 5);
    pub const BRANCH: Self = Self(1 << 6);
    pub const MERGE: Self = Self(1 << 7);
    pub const LOCK: Self = Self(1 << 8);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::ADD, "add"),
        (Self::EDIT, "edit"),
        (Self::ENCODING, "encoding"),
        (Self::RENAME, "rename"),
        (Self::DELETE, "delete"),
        (Self::UNDELETE, "undelete"),
        (Self::BRANCH, "branch"),
        (Self::MERGE, "merge"),
        (Self::LOCK, "lock"),
    ];

    pub fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChangeTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ChangeTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Error returned for an unknown change-type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown change type '{0}'")]
pub struct ParseChangeTypesError(pub String);

impl FromStr for ChangeTypes {
    type Err = ParseChangeTypesError;

    /// Accepts names separated by commas and/or whitespace, case-insensitive
    /// (`"Edit, Rename"`, `"edit rename"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = Self::NONE;
        for token in s.split(|c: char| c == ',' || c.is_whitespace()) {
            if token.is_empty() || token.eq_ignore_ascii_case("none") {
                continue;
            }
            let flag = Self::NAMES
                .iter()
                .find(|(_, name)| token.eq_ignore_ascii_case(name))
                .map(|(flag, _)| *flag)
                .ok_or_else(|| ParseChangeTypesError(token.to_string()))?;
            result |= flag;
        }
        Ok(result)
    }
}

impl TryFrom<String> for ChangeTypes {
    type Error = ParseChangeTypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChangeTypes> for String {
    fn from(value: ChangeTypes) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// The operation that produced the conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    #[default]
    Get,
    Checkin,
    Local,
    Merge,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Checkin => write!(f, "checkin"),
            Self::Local => write!(f, "local"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Resolution reported to the server for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AcceptYours,
    AcceptTheirs,
    AcceptMerge,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcceptYours => write!(f, "accept-yours"),
            Self::AcceptTheirs => write!(f, "accept-theirs"),
            Self::AcceptMerge => write!(f, "accept-merge"),
        }
    }
}

/// One item id under contention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: i32,
    /// Base item id; plans refer to conflicts by this.
    pub item_id: i32,
    #[serde(default)]
    pub conflict_type: ConflictType,
    pub item_type: ItemType,
    #[serde(default)]
    pub your_changes: ChangeTypes,
    /// Changes made on the server since the base version.
    #[serde(default)]
    pub base_changes: ChangeTypes,
    /// The server flagged a namespace collision (two items at one path).
    #[serde(default)]
    pub namespace_conflict: bool,
    #[serde(default)]
    pub forced: bool,
    /// Local path of yours.
    pub source_local_item: PathBuf,
    /// Local path theirs maps to; `None` when theirs is deleted.
    #[serde(default)]
    pub target_local_item: Option<PathBuf>,
    pub your_server_item: ServerPath,
    /// `None` when theirs is deleted.
    #[serde(default)]
    pub their_server_item: Option<ServerPath>,
    /// Defaults to the your-side path.
    #[serde(default)]
    pub base_server_item: Option<ServerPath>,
    #[serde(default)]
    pub your_version: i32,
    #[serde(default)]
    pub base_version: i32,
    #[serde(default)]
    pub their_version: i32,
    #[serde(default)]
    pub your_last_merged_version: i32,
    #[serde(default)]
    pub their_last_merged_version: i32,
}

impl Conflict {
    /// Changes on the their side, derived from the base changes.
    pub fn their_changes(&self) -> ChangeTypes {
        self.base_changes
    }

    pub fn base_path(&self) -> &ServerPath {
        self.base_server_item.as_ref().unwrap_or(&self.your_server_item)
    }

    pub fn is_delete_conflict(&self) -> bool {
        self.your_changes.contains(ChangeTypes::DELETE)
            || self.their_changes().contains(ChangeTypes::DELETE)
            || self.their_server_item.is_none()
    }

    /// Both sides renamed the item to different names.
    pub fn is_name_conflict(&self) -> bool {
        self.your_changes.contains(ChangeTypes::RENAME)
            && self.their_changes().contains(ChangeTypes::RENAME)
            && self.their_server_item.as_ref() != Some(&self.your_server_item)
    }

    /// The file content needs a three-way merge.
    pub fn is_content_conflict(&self) -> bool {
        !self.item_type.is_folder()
            && self.their_changes().contains(ChangeTypes::EDIT)
            && (self.your_changes.contains(ChangeTypes::EDIT)
                || self.conflict_type == ConflictType::Merge)
    }

    /// A namespace collision reported for a get or checkin. The flag carries
    /// no meaning for local and merge conflicts.
    pub fn is_namespace_conflict(&self) -> bool {
        self.namespace_conflict
            && matches!(self.conflict_type, ConflictType::Get | ConflictType::Checkin)
    }

    /// Whether accept-merge is possible for this conflict.
    pub fn can_merge(&self) -> bool {
        if self.is_namespace_conflict() || self.is_delete_conflict() {
            return false;
        }
        if self.item_type.is_folder() {
            return false;
        }
        if self.is_name_conflict() {
            return true;
        }

        let theirs = self.their_changes();
        if self.your_changes.contains(ChangeTypes::EDIT) && theirs.contains(ChangeTypes::EDIT) {
            return true;
        }
        self.conflict_type == ConflictType::Merge
            && theirs.contains(ChangeTypes::EDIT)
            && (self.forced
                || self.their_last_merged_version != self.base_version
                || self.your_last_merged_version != self.your_version)
    }

    /// Why [`can_merge`](Self::can_merge) is false.
    pub fn merge_blocker(&self) -> Option<String> {
        if self.can_merge() {
            return None;
        }
        let reason = if self.is_namespace_conflict() {
            "namespace conflicts cannot be merged".to_string()
        } else if self.is_delete_conflict() {
            "one side deleted the item".to_string()
        } else if self.item_type.is_folder() {
            "folder conflicts cannot be merged".to_string()
        } else {
            format!(
                "nothing to merge (yours: {}, theirs: {})",
                self.your_changes,
                self.their_changes()
            )
        };
        Some(reason)
    }
}

/// Base, yours and theirs content of one conflicting file, byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTriplet {
    pub base: Vec<u8>,
    pub yours: Vec<u8>,
    pub theirs: Vec<u8>,
}

impl ContentTriplet {
    pub fn new(base: impl Into<Vec<u8>>, yours: impl Into<Vec<u8>>, theirs: impl Into<Vec<u8>>) -> Self {
        Self {
            base: base.into(),
            yours: yours.into(),
            theirs: theirs.into(),
        }
    }

    /// The three sides as text, or the name of the first side that is not
    /// valid UTF-8.
    pub fn as_text(&self) -> Result<(&str, &str, &str), &'static str> {
        let base = std::str::from_utf8(&self.base).map_err(|_| "base")?;
        let yours = std::str::from_utf8(&self.yours).map_err(|_| "yours")?;
        let theirs = std::str::from_utf8(&self.theirs).map_err(|_| "theirs")?;
        Ok((base, yours, theirs))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::edit_edit;
    use super::*;
    use std::path::Path;

    #[test]
    fn test_change_types_parse_and_display() {
        let parsed: ChangeTypes = "Edit, Rename".parse().unwrap();
        assert!(parsed.contains(ChangeTypes::EDIT));
        assert!(parsed.contains(ChangeTypes::RENAME));
        assert!(!parsed.contains(ChangeTypes::DELETE));
        assert_eq!(parsed.to_string(), "edit, rename");
        assert_eq!("".parse::<ChangeTypes>().unwrap(), ChangeTypes::NONE);
        assert!("bogus".parse::<ChangeTypes>().is_err());
        assert!(!ChangeTypes::EDIT.contains(ChangeTypes::NONE));
    }

    #[test]
    fn test_edit_edit_is_mergeable() {
        let c = edit_edit(1, Path::new("/ws"), "a.txt");
        assert!(c.can_merge());
        assert!(c.is_content_conflict());
        assert!(!c.is_name_conflict());
        assert_eq!(c.merge_blocker(), None);
    }

    #[test]
    fn test_deletes_and_folders_are_not_mergeable() {
        let mut c = edit_edit(1, Path::new("/ws"), "a.txt");
        c.base_changes = ChangeTypes::DELETE;
        c.their_server_item = None;
        assert!(!c.can_merge());
        assert!(c.merge_blocker().unwrap().contains("deleted"));

        let mut folder = edit_edit(2, Path::new("/ws"), "dir");
        folder.item_type = ItemType::Folder;
        assert!(!folder.can_merge());

        let mut ns = edit_edit(3, Path::new("/ws"), "a.txt");
        ns.namespace_conflict = true;
        assert!(!ns.can_merge());
        assert!(ns.merge_blocker().unwrap().contains("namespace"));
    }

    #[test]
    fn test_namespace_flag_only_blocks_get_and_checkin() {
        let mut c = edit_edit(1, Path::new("/ws"), "a.txt");
        c.namespace_conflict = true;

        c.conflict_type = ConflictType::Checkin;
        assert!(c.is_namespace_conflict());
        assert!(!c.can_merge());

        c.conflict_type = ConflictType::Merge;
        assert!(!c.is_namespace_conflict());
        assert!(c.can_merge());

        c.conflict_type = ConflictType::Local;
        assert!(c.can_merge());
    }

    #[test]
    fn test_rename_rename_is_name_conflict() {
        let mut c = edit_edit(1, Path::new("/ws"), "a.txt");
        c.your_changes = ChangeTypes::RENAME;
        c.base_changes = ChangeTypes::RENAME;
        c.their_server_item = Some(ServerPath::parse("$/proj/b.txt").unwrap());
        assert!(c.is_name_conflict());
        assert!(!c.is_content_conflict());
        assert!(c.can_merge());
    }

    #[test]
    fn test_merge_type_conflict_rules() {
        let mut c = edit_edit(1, Path::new("/ws"), "a.txt");
        c.conflict_type = ConflictType::Merge;
        c.your_changes = ChangeTypes::NONE;
        assert!(!c.can_merge());

        c.forced = true;
        assert!(c.can_merge());
        assert!(c.is_content_conflict());

        c.forced = false;
        c.their_last_merged_version = 0;
        assert!(c.can_merge());
    }

    #[test]
    fn test_conflict_from_json() {
        let json = r#"{
            "conflict_id": 7,
            "item_id": 70,
            "item_type": "file",
            "your_changes": "edit",
            "base_changes": "edit rename",
            "source_local_item": "/ws/a.txt",
            "your_server_item": "$/proj/a.txt",
            "their_server_item": "$/proj/b.txt",
            "their_version": 3
        }"#;
        let c: Conflict = serde_json::from_str(json).unwrap();
        assert_eq!(c.conflict_type, ConflictType::Get);
        assert!(c.their_changes().contains(ChangeTypes::RENAME));
        assert_eq!(c.base_path().as_str(), "$/proj/a.txt");
        assert!(c.can_merge());
    }
}
