//! Domain model types shared by the label model, the content store and the
//! conflict subsystem.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::ServerPath;

// ---------------------------------------------------------------------------
// Version specs
// ---------------------------------------------------------------------------

/// A point in history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSpec {
    /// A changeset number.
    Changeset(i32),
    /// A label name.
    Label(String),
    /// The state of the repository at a point in time.
    Date(DateTime<Utc>),
    /// The tip.
    Latest,
}

impl VersionSpec {
    /// The changeset number, if this spec is one.
    pub fn changeset(&self) -> Option<i32> {
        match self {
            Self::Changeset(cs) => Some(*cs),
            _ => None,
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changeset(cs) => write!(f, "C{cs}"),
            Self::Label(name) => write!(f, "L{name}"),
            Self::Date(date) => write!(f, "D{}", date.to_rfc3339()),
            Self::Latest => write!(f, "T"),
        }
    }
}

/// Error returned when a version spec string is not in `C`/`L`/`D`/`T`
/// notation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version spec '{0}'")]
pub struct ParseVersionSpecError(pub String);

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionSpecError(s.to_string());
        let mut chars = s.chars();
        let prefix = chars.next().ok_or_else(invalid)?;
        let rest = chars.as_str();
        match prefix.to_ascii_uppercase() {
            'T' if rest.is_empty() => Ok(Self::Latest),
            'C' => rest.parse().map(Self::Changeset).map_err(|_| invalid()),
            'L' if !rest.is_empty() => Ok(Self::Label(rest.to_string())),
            'D' => DateTime::parse_from_rfc3339(rest)
                .map(|d| Self::Date(d.with_timezone(&Utc)))
                .map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Whether an item is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Folder,
}

impl ItemType {
    pub fn is_folder(self) -> bool {
        self == Self::Folder
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Folder => write!(f, "folder"),
        }
    }
}

/// How deep a server query descends below its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionType {
    /// Only the item itself.
    None,
    /// The item and its direct children.
    OneLevel,
    /// The whole subtree.
    Full,
}

/// An item as the server reports it for a given version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub path: ServerPath,
    pub item_type: ItemType,
    pub item_id: i32,
    /// Changeset in which this version of the item was last changed.
    pub changeset: i32,
    /// Opaque download reference, present for files.
    #[serde(default)]
    pub download_url: Option<String>,
}

impl Item {
    pub fn file(path: ServerPath, item_id: i32, changeset: i32) -> Self {
        Self {
            path,
            item_type: ItemType::File,
            item_id,
            changeset,
            download_url: None,
        }
    }

    pub fn folder(path: ServerPath, item_id: i32, changeset: i32) -> Self {
        Self {
            path,
            item_type: ItemType::Folder,
            item_id,
            changeset,
            download_url: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.item_type.is_folder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_spec_notation() {
        assert_eq!(VersionSpec::Changeset(42).to_string(), "C42");
        assert_eq!(VersionSpec::Label("v1".into()).to_string(), "Lv1");
        assert_eq!(VersionSpec::Latest.to_string(), "T");

        assert_eq!("C42".parse::<VersionSpec>().unwrap(), VersionSpec::Changeset(42));
        assert_eq!("t".parse::<VersionSpec>().unwrap(), VersionSpec::Latest);
        assert_eq!(
            "Lrelease-1".parse::<VersionSpec>().unwrap(),
            VersionSpec::Label("release-1".into())
        );
        let date: VersionSpec = "D2024-03-01T12:00:00Z".parse().unwrap();
        assert!(matches!(date, VersionSpec::Date(_)));
    }

    #[test]
    fn test_version_spec_rejects_garbage() {
        assert!("".parse::<VersionSpec>().is_err());
        assert!("Cabc".parse::<VersionSpec>().is_err());
        assert!("L".parse::<VersionSpec>().is_err());
        assert!("X1".parse::<VersionSpec>().is_err());
    }
}
