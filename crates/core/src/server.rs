//! The server boundary.
//!
//! The engine never talks to the version-control server directly; it goes
//! through [`ServerBoundary`]. [`InMemoryServer`] is a complete implementation
//! backed by an in-memory item history, used by tests and by batch replay.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::conflict::Resolution;
use crate::errors::{ServerError, ServerErrorKind};
use crate::models::{Item, RecursionType, VersionSpec};
use crate::path::{compare_parent_to_child, ServerPath};

/// Operations the engine needs from the server.
pub trait ServerBoundary: Send + Sync {
    /// Items under `path` as of `version`, parent-first.
    fn query_items(
        &self,
        project: &str,
        path: &ServerPath,
        recursion: RecursionType,
        version: &VersionSpec,
    ) -> Result<Vec<Item>, ServerError>;

    /// Stream the content of the file at `path` as of changeset `revision`.
    fn download(
        &self,
        path: &ServerPath,
        revision: i32,
        out: &mut dyn Write,
    ) -> Result<(), ServerError>;

    /// Acknowledge a conflict resolution.
    fn resolve_conflict(
        &self,
        conflict_id: i32,
        resolution: Resolution,
        new_local_path: Option<&Path>,
    ) -> Result<(), ServerError>;
}

// ---------------------------------------------------------------------------
// In-memory server
// ---------------------------------------------------------------------------

/// One version of an item in the in-memory history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVersion {
    #[serde(flatten)]
    pub item: Item,
    /// The item was deleted in `item.changeset`.
    #[serde(default)]
    pub deleted: bool,
}

/// Content of a file as committed in `revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContent {
    pub path: ServerPath,
    pub revision: i32,
    /// Raw bytes. Snapshots may give either a string or a byte array.
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Bytes(Vec<u8>),
}

fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match RawContent::deserialize(deserializer)? {
        RawContent::Text(text) => text.into_bytes(),
        RawContent::Bytes(bytes) => bytes,
    })
}

/// A label pinned to a changeset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRef {
    pub name: String,
    pub changeset: i32,
}

/// A resolution acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcknowledgedResolution {
    pub conflict_id: i32,
    pub resolution: Resolution,
    pub new_local_path: Option<PathBuf>,
}

/// Server backed by an in-memory item history.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InMemoryServer {
    #[serde(default)]
    items: Vec<ItemVersion>,
    #[serde(default)]
    contents: Vec<FileContent>,
    #[serde(default)]
    labels: Vec<LabelRef>,
    /// Every call fails with this kind when set.
    #[serde(skip)]
    failure: Option<ServerErrorKind>,
    #[serde(skip)]
    downloads: AtomicUsize,
    #[serde(skip)]
    acknowledged: Mutex<Vec<AcknowledgedResolution>>,
}

impl InMemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(ItemVersion {
            item,
            deleted: false,
        });
        self
    }

    pub fn with_deletion(mut self, item: Item) -> Self {
        self.items.push(ItemVersion {
            item,
            deleted: true,
        });
        self
    }

    pub fn with_content(mut self, path: ServerPath, revision: i32, content: impl Into<Vec<u8>>) -> Self {
        self.contents.push(FileContent {
            path,
            revision,
            content: content.into(),
        });
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, changeset: i32) -> Self {
        self.labels.push(LabelRef {
            name: name.into(),
            changeset,
        });
        self
    }

    /// Make every call fail with `kind`.
    pub fn failing(mut self, kind: ServerErrorKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Number of downloads served.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Resolutions acknowledged so far, in order.
    pub fn acknowledged(&self) -> Vec<AcknowledgedResolution> {
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_failure(&self) -> Result<(), ServerError> {
        match self.failure {
            Some(kind) => Err(ServerError::new(kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn latest_changeset(&self) -> i32 {
        self.items.iter().map(|v| v.item.changeset).max().unwrap_or(0)
    }

    fn resolve_version(&self, version: &VersionSpec) -> Result<i32, ServerError> {
        match version {
            VersionSpec::Changeset(cs) => Ok(*cs),
            VersionSpec::Latest => Ok(self.latest_changeset()),
            VersionSpec::Label(name) => self
                .labels
                .iter()
                .find(|l| &l.name == name)
                .map(|l| l.changeset)
                .ok_or_else(|| ServerError::not_found(format!("label '{name}'"))),
            VersionSpec::Date(_) => Err(ServerError::not_found(format!(
                "date version {version} is not tracked"
            ))),
        }
    }
}

impl ServerBoundary for InMemoryServer {
    #[instrument(skip_all, fields(path = %path, version = %version))]
    fn query_items(
        &self,
        project: &str,
        path: &ServerPath,
        recursion: RecursionType,
        version: &VersionSpec,
    ) -> Result<Vec<Item>, ServerError> {
        self.check_failure()?;
        let changeset = self.resolve_version(version)?;

        // Latest version of every item id at or before `changeset`.
        let mut latest: Vec<&ItemVersion> = Vec::new();
        for candidate in self.items.iter().filter(|v| v.item.changeset <= changeset) {
            match latest.iter_mut().find(|v| v.item.item_id == candidate.item.item_id) {
                Some(slot) if slot.item.changeset < candidate.item.changeset => *slot = candidate,
                Some(_) => {}
                None => latest.push(candidate),
            }
        }

        let mut items: Vec<Item> = latest
            .into_iter()
            .filter(|v| !v.deleted)
            .map(|v| &v.item)
            .filter(|item| match recursion {
                RecursionType::None => &item.path == path,
                RecursionType::OneLevel => {
                    &item.path == path || item.path.parent().as_ref() == Some(path)
                }
                RecursionType::Full => item.path.is_under(path),
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| compare_parent_to_child(&a.path, &b.path));

        debug!(project, count = items.len(), changeset, "queried items");
        Ok(items)
    }

    #[instrument(skip_all, fields(path = %path, revision = revision))]
    fn download(
        &self,
        path: &ServerPath,
        revision: i32,
        out: &mut dyn Write,
    ) -> Result<(), ServerError> {
        self.check_failure()?;
        let content = self
            .contents
            .iter()
            .filter(|c| &c.path == path && c.revision <= revision)
            .max_by_key(|c| c.revision)
            .ok_or_else(|| ServerError::not_found(format!("{path} at changeset {revision}")))?;

        out.write_all(&content.content)
            .map_err(|e| ServerError::new(ServerErrorKind::Connection, e.to_string()))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resolve_conflict(
        &self,
        conflict_id: i32,
        resolution: Resolution,
        new_local_path: Option<&Path>,
    ) -> Result<(), ServerError> {
        self.check_failure()?;
        debug!(conflict_id, %resolution, "conflict resolution acknowledged");
        self.acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AcknowledgedResolution {
                conflict_id,
                resolution,
                new_local_path: new_local_path.map(Path::to_path_buf),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    fn server() -> InMemoryServer {
        InMemoryServer::new()
            .with_item(Item::folder(p("$/proj"), 1, 1))
            .with_item(Item::folder(p("$/proj/src"), 2, 1))
            .with_item(Item::file(p("$/proj/src/a.rs"), 3, 1))
            .with_item(Item::file(p("$/proj/src/a.rs"), 3, 4))
            .with_item(Item::file(p("$/proj/b.rs"), 4, 2))
            .with_deletion(Item::file(p("$/proj/b.rs"), 4, 5))
            .with_label("v1", 3)
            .with_content(p("$/proj/src/a.rs"), 1, "one")
            .with_content(p("$/proj/src/a.rs"), 4, "four")
    }

    #[test]
    fn test_query_recursion() {
        let server = server();
        let all = server
            .query_items("proj", &p("$/proj"), RecursionType::Full, &VersionSpec::Changeset(3))
            .unwrap();
        let paths: Vec<&str> = all.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["$/proj", "$/proj/b.rs", "$/proj/src", "$/proj/src/a.rs"]);

        let one = server
            .query_items("proj", &p("$/proj"), RecursionType::OneLevel, &VersionSpec::Changeset(3))
            .unwrap();
        assert_eq!(one.len(), 3);

        let single = server
            .query_items("proj", &p("$/proj/src/a.rs"), RecursionType::None, &VersionSpec::Latest)
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].changeset, 4);
    }

    #[test]
    fn test_query_hides_deleted_and_resolves_labels() {
        let server = server();
        let latest = server
            .query_items("proj", &p("$/proj"), RecursionType::Full, &VersionSpec::Latest)
            .unwrap();
        assert!(latest.iter().all(|i| i.path != p("$/proj/b.rs")));

        let labelled = server
            .query_items("proj", &p("$/proj"), RecursionType::Full, &VersionSpec::Label("v1".into()))
            .unwrap();
        assert!(labelled.iter().any(|i| i.path == p("$/proj/b.rs")));

        let err = server
            .query_items("proj", &p("$/proj"), RecursionType::Full, &VersionSpec::Label("nope".into()))
            .unwrap_err();
        assert_eq!(err.kind, ServerErrorKind::NotFound);
    }

    #[test]
    fn test_download_picks_latest_content_at_revision() {
        let server = server();
        let mut buf = Vec::new();
        server.download(&p("$/proj/src/a.rs"), 3, &mut buf).unwrap();
        assert_eq!(buf, b"one");

        buf.clear();
        server.download(&p("$/proj/src/a.rs"), 9, &mut buf).unwrap();
        assert_eq!(buf, b"four");
        assert_eq!(server.download_count(), 2);
    }

    #[test]
    fn test_injected_failure() {
        let server = server().failing(ServerErrorKind::Authentication);
        let mut buf = Vec::new();
        let err = server.download(&p("$/proj/src/a.rs"), 1, &mut buf).unwrap_err();
        assert_eq!(err.kind, ServerErrorKind::Authentication);
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "items": [
                {"path": "$/proj/a.txt", "item_type": "file", "item_id": 7, "changeset": 2}
            ],
            "contents": [
                {"path": "$/proj/a.txt", "revision": 2, "content": "hi"},
                {"path": "$/proj/b.bin", "revision": 2, "content": [255, 0, 128]}
            ]
        }"#;
        let server: InMemoryServer = serde_json::from_str(json).unwrap();
        let mut buf = Vec::new();
        server.download(&p("$/proj/a.txt"), 2, &mut buf).unwrap();
        assert_eq!(buf, b"hi");

        buf.clear();
        server.download(&p("$/proj/b.bin"), 2, &mut buf).unwrap();
        assert_eq!(buf, [255u8, 0, 128]);
    }
}
