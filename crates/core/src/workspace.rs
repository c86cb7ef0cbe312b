//! The workspace boundary: server/local path mapping and the local-disk
//! mutations the resolver performs on the working copy.
//!
//! Local writes go through a temp file in the target directory that is then
//! persisted over the target, so a failed write never leaves a half-written
//! working file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::WorkspaceError;
use crate::path::ServerPath;

/// Resolves server paths to local paths and back. Read-only.
pub trait Workspace: Send + Sync {
    fn local_path(&self, server_path: &ServerPath) -> Option<PathBuf>;

    fn server_path(&self, local_path: &Path) -> Option<ServerPath>;

    /// Like [`local_path`](Self::local_path), failing when unmapped.
    fn require_local_path(&self, server_path: &ServerPath) -> Result<PathBuf, WorkspaceError> {
        self.local_path(server_path)
            .ok_or_else(|| WorkspaceError::NoMapping(server_path.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Working-folder mappings
// ---------------------------------------------------------------------------

/// One server folder mapped to one local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingFolder {
    pub server_path: ServerPath,
    pub local_path: PathBuf,
}

/// Workspace defined by a list of working folders. The most specific mapping
/// wins in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedWorkspace {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub folders: Vec<WorkingFolder>,
}

impl MappedWorkspace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            folders: Vec::new(),
        }
    }

    pub fn with_mapping(mut self, server_path: ServerPath, local_path: impl Into<PathBuf>) -> Self {
        self.folders.push(WorkingFolder {
            server_path,
            local_path: local_path.into(),
        });
        self
    }
}

impl Workspace for MappedWorkspace {
    fn local_path(&self, server_path: &ServerPath) -> Option<PathBuf> {
        let folder = self
            .folders
            .iter()
            .filter(|f| server_path.is_under(&f.server_path))
            .max_by_key(|f| f.server_path.depth())?;

        let mut local = folder.local_path.clone();
        for segment in server_path.components().skip(folder.server_path.depth() + 1) {
            local.push(segment);
        }
        Some(local)
    }

    fn server_path(&self, local_path: &Path) -> Option<ServerPath> {
        let folder = self
            .folders
            .iter()
            .filter(|f| local_path.starts_with(&f.local_path))
            .max_by_key(|f| f.local_path.components().count())?;

        let relative = local_path.strip_prefix(&folder.local_path).ok()?;
        let mut server = folder.server_path.clone();
        for component in relative.components() {
            server = server.join(component.as_os_str().to_str()?).ok()?;
        }
        Some(server)
    }
}

// ---------------------------------------------------------------------------
// Local disk mutation
// ---------------------------------------------------------------------------

fn io_error(path: &Path, source: io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Replace the content of `path` with `bytes`, creating parent directories.
pub fn write_local_file(path: &Path, bytes: &[u8]) -> Result<(), WorkspaceError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| io_error(parent, e))?;
    tmp.write_all(bytes).map_err(|e| io_error(path, e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote local file");
    Ok(())
}

/// Remove a local file or directory tree. Missing items are not an error.
pub fn remove_local_item(path: &Path) -> Result<(), WorkspaceError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "removed local item");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Move a local item, creating the destination's parent directories. A
/// missing source is not an error.
pub fn move_local_item(from: &Path, to: &Path) -> Result<(), WorkspaceError> {
    if from == to || !from.exists() {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    fs::rename(from, to).map_err(|e| io_error(from, e))?;
    debug!(from = %from.display(), to = %to.display(), "moved local item");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    #[test]
    fn test_local_path_uses_most_specific_mapping() {
        let ws = MappedWorkspace::new("ws")
            .with_mapping(p("$/proj"), "/work/proj")
            .with_mapping(p("$/proj/vendor"), "/vendor");

        assert_eq!(
            ws.local_path(&p("$/proj/src/a.rs")),
            Some(PathBuf::from("/work/proj/src/a.rs"))
        );
        assert_eq!(
            ws.local_path(&p("$/proj/vendor/lib.rs")),
            Some(PathBuf::from("/vendor/lib.rs"))
        );
        assert_eq!(ws.local_path(&p("$/proj")), Some(PathBuf::from("/work/proj")));
        assert_eq!(ws.local_path(&p("$/other/a.rs")), None);
        assert!(matches!(
            ws.require_local_path(&p("$/other")),
            Err(WorkspaceError::NoMapping(_))
        ));
    }

    #[test]
    fn test_server_path_reverse_mapping() {
        let ws = MappedWorkspace::new("ws").with_mapping(p("$/proj"), "/work/proj");
        assert_eq!(
            ws.server_path(Path::new("/work/proj/src/a.rs")),
            Some(p("$/proj/src/a.rs"))
        );
        assert_eq!(ws.server_path(Path::new("/work/proj")), Some(p("$/proj")));
        assert_eq!(ws.server_path(Path::new("/elsewhere/a.rs")), None);
    }

    #[test]
    fn test_write_remove_move() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested/deeper/a.txt");

        write_local_file(&file, b"first").unwrap();
        write_local_file(&file, b"second").unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"second");

        let moved = dir.path().join("renamed/b.txt");
        move_local_item(&file, &moved).unwrap();
        assert!(!file.exists());
        assert_eq!(fs::read(&moved).unwrap(), b"second");

        remove_local_item(&moved).unwrap();
        assert!(!moved.exists());
        remove_local_item(&moved).unwrap();
        move_local_item(&moved, &file).unwrap();
    }
}
