//! End-to-end tests for batch conflict resolution.
//!
//! These tests exercise the real `ResolutionEngine` with:
//! - An in-memory server holding item history and file content
//! - A mapped workspace rooted in a temp directory
//! - A real content store on disk
//!
//! No network I/O.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use tfvcresolve_core::conflict::{
    AutoContentMerger, ChangeTypes, Conflict, ConflictType, ContentTriplet, MergeOutcome,
    MergeTarget, PolicyNameMerger, Resolution,
};
use tfvcresolve_core::errors::{ErrorKind, MergeCallbackError, ResolveError};
use tfvcresolve_core::models::ItemType;
use tfvcresolve_core::server::InMemoryServer;
use tfvcresolve_core::workspace::MappedWorkspace;
use tfvcresolve_core::{ContentStore, ResolutionEngine, ResolutionPlan, ServerPath};

// ===========================================================================
// Helpers
// ===========================================================================

fn sp(s: &str) -> ServerPath {
    ServerPath::parse(s).unwrap()
}

struct TestEnv {
    _dir: TempDir,
    root: PathBuf,
    server: Arc<InMemoryServer>,
    engine: ResolutionEngine,
}

impl TestEnv {
    fn new(server: InMemoryServer, content: Box<dyn tfvcresolve_core::conflict::ContentMerger>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("ws");
        fs::create_dir_all(&root).unwrap();

        let server = Arc::new(server);
        let workspace = MappedWorkspace::new("e2e").with_mapping(sp("$/proj"), &root);
        let store = ContentStore::new(Some(dir.path().join("cache")));
        let engine = ResolutionEngine::new(
            server.clone(),
            Arc::new(workspace),
            Arc::new(store),
            Box::new(PolicyNameMerger::default()),
            content,
        );
        Self {
            _dir: dir,
            root,
            server,
            engine,
        }
    }

    fn local(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn write_local(&self, name: &str, content: &str) {
        fs::write(self.local(name), content).unwrap();
    }

    fn read_local(&self, name: &str) -> String {
        fs::read_to_string(self.local(name)).unwrap()
    }
}

fn file_conflict(item_id: i32, root: &Path, name: &str, yours: ChangeTypes, theirs: ChangeTypes) -> Conflict {
    let server_path = sp(&format!("$/proj/{name}"));
    let deleted = theirs.contains(ChangeTypes::DELETE);
    Conflict {
        conflict_id: item_id + 1000,
        item_id,
        conflict_type: ConflictType::Get,
        item_type: ItemType::File,
        your_changes: yours,
        base_changes: theirs,
        namespace_conflict: false,
        forced: false,
        source_local_item: root.join(name),
        target_local_item: (!deleted).then(|| root.join(name)),
        your_server_item: server_path.clone(),
        their_server_item: (!deleted).then(|| server_path.clone()),
        base_server_item: Some(server_path),
        your_version: 1,
        base_version: 1,
        their_version: 2,
        your_last_merged_version: 1,
        their_last_merged_version: 1,
    }
}

fn fixed_merger(
    text: &'static str,
) -> impl Fn(&Conflict, &ContentTriplet, &mut MergeTarget) -> Result<MergeOutcome, MergeCallbackError>
       + Send
       + Sync {
    move |_: &Conflict, _: &ContentTriplet, target: &mut MergeTarget| {
        use std::io::Write;
        target
            .write_all(text.as_bytes())
            .map_err(|e| MergeCallbackError::Failed(e.to_string()))?;
        Ok(MergeOutcome::Accepted)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn test_edit_edit_accept_merge() {
    let server = InMemoryServer::new()
        .with_content(sp("$/proj/f.txt"), 1, "original")
        .with_content(sp("$/proj/f.txt"), 2, "server");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_merger = seen.clone();
    let merger = move |c: &Conflict,
                       t: &ContentTriplet,
                       target: &mut MergeTarget|
          -> Result<MergeOutcome, MergeCallbackError> {
        seen_by_merger.lock().unwrap().push(t.clone());
        fixed_merger("merged")(c, t, target)
    };
    let env = TestEnv::new(server, Box::new(merger));
    env.write_local("f.txt", "local");

    let conflict = file_conflict(1, &env.root, "f.txt", ChangeTypes::EDIT, ChangeTypes::EDIT);
    assert!(conflict.can_merge());
    let plan = ResolutionPlan::new().with(1, Resolution::AcceptMerge);

    let report = env.engine.resolve_batch(vec![conflict], &plan).unwrap();

    assert_eq!(env.read_local("f.txt"), "merged");
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].resolution, Resolution::AcceptMerge);
    assert_eq!(report.updated_files.merged, vec![env.local("f.txt")]);

    let triplets = seen.lock().unwrap();
    assert_eq!(triplets.len(), 1);
    assert_eq!(triplets[0].base, b"original");
    assert_eq!(triplets[0].yours, b"local");
    assert_eq!(triplets[0].theirs, b"server");

    let acks = env.server.acknowledged();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].conflict_id, 1001);
    assert_eq!(acks[0].resolution, Resolution::AcceptMerge);
}

#[test]
fn test_delete_delete_merge_is_unsupported() {
    let env = TestEnv::new(InMemoryServer::new(), Box::new(AutoContentMerger::default()));
    let conflict = file_conflict(1, &env.root, "gone.txt", ChangeTypes::DELETE, ChangeTypes::DELETE);
    assert!(!conflict.can_merge());

    let plan = ResolutionPlan::new().with(1, Resolution::AcceptMerge);
    let err = env.engine.resolve_batch(vec![conflict], &plan).unwrap_err();
    match err {
        ResolveError::Incomplete { unresolved, failures } => {
            assert_eq!(unresolved, vec![1]);
            assert_eq!(failures[0].kind, ErrorKind::UnsupportedOperation);
        }
        other => panic!("expected Incomplete, got {other:?}"),
    }
    assert!(env.server.acknowledged().is_empty());
}

#[test]
fn test_short_plan_rejected_before_any_mutation() {
    let server = InMemoryServer::new()
        .with_content(sp("$/proj/a.txt"), 2, "server a")
        .with_content(sp("$/proj/b.txt"), 2, "server b")
        .with_content(sp("$/proj/c.txt"), 2, "server c");
    let env = TestEnv::new(server, Box::new(AutoContentMerger::default()));
    let mut conflicts = Vec::new();
    for (id, name) in [(1, "a.txt"), (2, "b.txt"), (3, "c.txt")] {
        env.write_local(name, "local");
        conflicts.push(file_conflict(id, &env.root, name, ChangeTypes::EDIT, ChangeTypes::EDIT));
    }

    let plan = ResolutionPlan::new()
        .with(1, Resolution::AcceptTheirs)
        .with(2, Resolution::AcceptTheirs);
    let err = env.engine.resolve_batch(conflicts, &plan).unwrap_err();

    assert!(matches!(err, ResolveError::PlanCountMismatch { planned: 2, reported: 3 }));
    assert_eq!(err.kind(), ErrorKind::ContractViolation);
    for name in ["a.txt", "b.txt", "c.txt"] {
        assert_eq!(env.read_local(name), "local");
    }
    assert!(env.server.acknowledged().is_empty());
    assert_eq!(env.server.download_count(), 0);
}

#[test]
fn test_mixed_batch_resolves_everything() {
    let server = InMemoryServer::new()
        .with_content(sp("$/proj/merge.txt"), 1, "a\nb\nc\nd\ne\nf\ng\nh\n")
        .with_content(sp("$/proj/merge.txt"), 2, "a\nb\nc\nd\ne\nf\ng\nH\n")
        .with_content(sp("$/proj/theirs.txt"), 2, "from server");
    let env = TestEnv::new(server, Box::new(AutoContentMerger::default()));
    env.write_local("merge.txt", "A\nb\nc\nd\ne\nf\ng\nh\n");
    env.write_local("theirs.txt", "local");
    env.write_local("yours.txt", "keep me");
    env.write_local("deleted.txt", "local edit");

    let conflicts = vec![
        file_conflict(1, &env.root, "merge.txt", ChangeTypes::EDIT, ChangeTypes::EDIT),
        file_conflict(2, &env.root, "theirs.txt", ChangeTypes::EDIT, ChangeTypes::EDIT),
        file_conflict(3, &env.root, "yours.txt", ChangeTypes::EDIT, ChangeTypes::EDIT),
        file_conflict(4, &env.root, "deleted.txt", ChangeTypes::EDIT, ChangeTypes::DELETE),
    ];
    let plan = ResolutionPlan::new()
        .with(1, Resolution::AcceptMerge)
        .with(2, Resolution::AcceptTheirs)
        .with(3, Resolution::AcceptYours)
        .with_fallback(4, Resolution::AcceptMerge, Resolution::AcceptTheirs);

    let report = env.engine.resolve_batch(conflicts, &plan).unwrap();

    assert_eq!(report.resolved.len(), 4);
    assert_eq!(report.fallbacks_used, 1);
    assert_eq!(env.read_local("merge.txt"), "A\nb\nc\nd\ne\nf\ng\nH\n");
    assert_eq!(env.read_local("theirs.txt"), "from server");
    assert_eq!(env.read_local("yours.txt"), "keep me");
    assert!(!env.local("deleted.txt").exists());
    assert_eq!(report.updated_files.skipped, vec![env.local("yours.txt")]);
    assert_eq!(report.updated_files.removed, vec![env.local("deleted.txt")]);
    assert_eq!(env.server.acknowledged().len(), 4);

    env.engine.shutdown().unwrap();
    assert!(env.engine.store().is_empty());
}

#[test]
fn test_conflicted_auto_merge_left_for_the_user() {
    let server = InMemoryServer::new()
        .with_content(sp("$/proj/f.txt"), 1, "original\n")
        .with_content(sp("$/proj/f.txt"), 2, "server\n");
    let env = TestEnv::new(server, Box::new(AutoContentMerger::default()));
    env.write_local("f.txt", "local\n");

    let conflicts = vec![file_conflict(1, &env.root, "f.txt", ChangeTypes::EDIT, ChangeTypes::EDIT)];
    let plan = ResolutionPlan::new().with(1, Resolution::AcceptMerge);
    let err = env.engine.resolve_batch(conflicts, &plan).unwrap_err();

    match err {
        ResolveError::Incomplete { unresolved, failures } => {
            assert_eq!(unresolved, vec![1]);
            assert_eq!(failures[0].kind, ErrorKind::CallbackFailure);
        }
        other => panic!("expected Incomplete, got {other:?}"),
    }
    assert_eq!(env.read_local("f.txt"), "local\n");
    // base and theirs stay cached for a retry
    assert_eq!(env.engine.store().len(), 2);
}
