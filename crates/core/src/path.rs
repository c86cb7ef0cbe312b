//! Server paths and the parent-before-child ordering used across the engine.
//!
//! A [`ServerPath`] is a slash-delimited path rooted at `$/`. Paths are
//! compared case-sensitively: the server is the authority on case.
//!
//! Two orderings are provided:
//!
//! | Function | Use |
//! |----------|-----|
//! | [`compare_parent_to_child`] | Ancestors before descendants, unrelated paths component-wise. |
//! | [`compare_parent_to_child_typed`] | Same, but at one level files go before subfolders. For display. |

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PathError;

const SEPARATOR: char = '/';
const ROOT: &str = "$/";
const ROOT_COMPONENT: &str = "$";

// ---------------------------------------------------------------------------
// ServerPath
// ---------------------------------------------------------------------------

/// A validated, canonical server path.
///
/// Canonical form: the root is `$/`; every other path is `$/seg(/seg)*` with
/// no trailing slash and no empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerPath(String);

impl ServerPath {
    /// Parse and canonicalize a server path.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if raw == ROOT_COMPONENT || raw == ROOT {
            return Ok(Self::root());
        }
        let rest = raw
            .strip_prefix(ROOT)
            .ok_or_else(|| PathError::NotRooted(raw.to_string()))?;
        let rest = rest.strip_suffix(SEPARATOR).unwrap_or(rest);
        if rest.split(SEPARATOR).any(str::is_empty) {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        Ok(Self(format!("{ROOT}{rest}")))
    }

    /// The repository root, `$/`.
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Path segments, starting with `$` for the root.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Number of segments below the root (`$/` is 0, `$/a` is 1).
    pub fn depth(&self) -> usize {
        self.components().count() - 1
    }

    /// The parent path, obtained by truncating at the last separator.
    pub fn parent(&self) -> Option<ServerPath> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind(SEPARATOR)?;
        if idx + 1 == ROOT.len() {
            Some(Self::root())
        } else {
            Some(Self(self.0[..idx].to_string()))
        }
    }

    /// The last segment (`$` for the root).
    pub fn last_component(&self) -> &str {
        if self.is_root() {
            return ROOT_COMPONENT;
        }
        match self.0.rfind(SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Append one or more segments.
    pub fn join(&self, child: &str) -> Result<ServerPath, PathError> {
        if self.is_root() {
            Self::parse(&format!("{ROOT}{child}"))
        } else {
            Self::parse(&format!("{}{SEPARATOR}{child}", self.0))
        }
    }

    /// The team project this path belongs to (`$/Project` for
    /// `$/Project/src/a.rs`), or `None` for the root.
    pub fn team_project(&self) -> Option<ServerPath> {
        let project = self.components().nth(1)?;
        Some(Self(format!("{ROOT}{project}")))
    }

    /// True iff `self` is `root` or a strict descendant of it. Matches whole
    /// segments: `$/Foo` is not under `$/Fo`.
    pub fn is_under(&self, root: &ServerPath) -> bool {
        if root.is_root() || self.0 == root.0 {
            return true;
        }
        self.0.len() > root.0.len()
            && self.0.starts_with(root.as_str())
            && self.0.as_bytes()[root.0.len()] == SEPARATOR as u8
    }

    /// True iff `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &ServerPath) -> bool {
        self != other && other.is_under(self)
    }
}

impl fmt::Display for ServerPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServerPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ServerPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ServerPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServerPath> for String {
    fn from(path: ServerPath) -> Self {
        path.0
    }
}

impl PartialOrd for ServerPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerPath {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_parent_to_child(self, other)
    }
}

// ---------------------------------------------------------------------------
// Comparators
// ---------------------------------------------------------------------------

/// Total order in which every ancestor precedes all of its descendants.
///
/// Segments are compared left to right; a path that runs out of segments
/// first is the ancestor and orders first. Files and folders at the same level
/// may interleave, so this is not suitable for display; see
/// [`compare_parent_to_child_typed`].
pub fn compare_parent_to_child(a: &ServerPath, b: &ServerPath) -> Ordering {
    a.components().cmp(b.components())
}

/// Directory-aware ordering for display. At the same level files go before
/// subfolders regardless of their names; ancestors still precede descendants.
pub fn compare_parent_to_child_typed(
    a: &ServerPath,
    a_is_dir: bool,
    b: &ServerPath,
    b_is_dir: bool,
) -> Ordering {
    let ca: Vec<&str> = a.components().collect();
    let cb: Vec<&str> = b.components().collect();
    let min = ca.len().min(cb.len());

    // all levels except the last shared one
    for i in 0..min - 1 {
        if ca[i] != cb[i] {
            return ca[i].cmp(cb[i]);
        }
    }

    let last = min - 1;
    if ca.len() == cb.len() {
        return match (a_is_dir, b_is_dir) {
            (x, y) if x == y => ca[last].cmp(cb[last]),
            (true, _) => Ordering::Greater,
            (false, _) => Ordering::Less,
        };
    }

    if ca.len() == min && !a_is_dir {
        Ordering::Less
    } else if cb.len() == min && !b_is_dir {
        Ordering::Greater
    } else if ca[last] == cb[last] {
        ca.len().cmp(&cb.len())
    } else {
        ca[last].cmp(cb[last])
    }
}

/// True iff `candidate` is `root` or a strict descendant of it.
pub fn is_under(candidate: &ServerPath, root: &ServerPath) -> bool {
    candidate.is_under(root)
}

/// The deepest path both arguments are under.
pub fn common_ancestor(a: &ServerPath, b: &ServerPath) -> ServerPath {
    let shared: Vec<&str> = a
        .components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect();
    if shared.len() <= 1 {
        return ServerPath::root();
    }
    ServerPath(shared.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ServerPath {
        ServerPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_canonicalizes() {
        assert_eq!(p("$/").as_str(), "$/");
        assert_eq!(p("$").as_str(), "$/");
        assert_eq!(p("$/Proj/src/").as_str(), "$/Proj/src");
        assert_eq!(p("$/Proj/src/a.rs").as_str(), "$/Proj/src/a.rs");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(ServerPath::parse(""), Err(PathError::Empty));
        assert!(matches!(ServerPath::parse("Proj/a"), Err(PathError::NotRooted(_))));
        assert!(matches!(ServerPath::parse("/Proj"), Err(PathError::NotRooted(_))));
        assert!(matches!(
            ServerPath::parse("$/Proj//a"),
            Err(PathError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_parent_chain() {
        let path = p("$/Proj/src/a.rs");
        assert_eq!(path.parent(), Some(p("$/Proj/src")));
        assert_eq!(p("$/Proj").parent(), Some(ServerPath::root()));
        assert_eq!(ServerPath::root().parent(), None);
        assert_eq!(path.depth(), 3);
        assert_eq!(path.last_component(), "a.rs");
        assert_eq!(ServerPath::root().last_component(), "$");
    }

    #[test]
    fn test_join_and_team_project() {
        assert_eq!(ServerPath::root().join("Proj").unwrap(), p("$/Proj"));
        assert_eq!(p("$/Proj").join("src/a.rs").unwrap(), p("$/Proj/src/a.rs"));
        assert_eq!(p("$/Proj/src/a.rs").team_project(), Some(p("$/Proj")));
        assert_eq!(ServerPath::root().team_project(), None);
    }

    #[test]
    fn test_is_under_matches_segments() {
        assert!(p("$/Foo").is_under(&p("$/Foo")));
        assert!(p("$/Foo/bar").is_under(&p("$/Foo")));
        assert!(!p("$/Foo").is_under(&p("$/Fo")));
        assert!(!p("$/Foobar/x").is_under(&p("$/Foo")));
        assert!(p("$/anything").is_under(&ServerPath::root()));
        assert!(!ServerPath::root().is_under(&p("$/Foo")));
    }

    #[test]
    fn test_ancestor_ordering() {
        let pairs = [
            ("$/", "$/a"),
            ("$/a", "$/a/b"),
            ("$/a", "$/a/b/c/d"),
            ("$/a-b", "$/a-b/c"),
            ("$/a", "$/a/-"),
        ];
        for (ancestor, descendant) in pairs {
            let (a, d) = (p(ancestor), p(descendant));
            assert_eq!(compare_parent_to_child(&a, &d), Ordering::Less);
            assert_eq!(compare_parent_to_child(&d, &a), Ordering::Greater);
            assert!(is_under(&d, &a));
            assert!(!is_under(&a, &d));
            assert_eq!(
                compare_parent_to_child_typed(&a, true, &d, false),
                Ordering::Less
            );
            assert_eq!(
                compare_parent_to_child_typed(&a, true, &d, true),
                Ordering::Less
            );
        }
    }

    #[test]
    fn test_segment_order_beats_raw_string_order() {
        // '-' sorts before '/' as a byte, but "$/a/z" is a child of "$/a".
        let mut paths = vec![p("$/a/z"), p("$/a-b"), p("$/a")];
        paths.sort();
        assert_eq!(paths, vec![p("$/a"), p("$/a/z"), p("$/a-b")]);
    }

    #[test]
    fn test_typed_files_before_folders() {
        let file = p("$/proj/zzz.txt");
        let folder = p("$/proj/aaa");
        assert_eq!(
            compare_parent_to_child_typed(&file, false, &folder, true),
            Ordering::Less
        );
        assert_eq!(
            compare_parent_to_child_typed(&folder, true, &file, false),
            Ordering::Greater
        );

        // a file at one level precedes everything inside a sibling folder
        let nested = p("$/proj/aaa/b.txt");
        assert_eq!(
            compare_parent_to_child_typed(&file, false, &nested, false),
            Ordering::Less
        );
        assert_eq!(
            compare_parent_to_child_typed(&file, false, &p("$/proj/yyy.txt"), false),
            Ordering::Greater
        );
    }

    #[test]
    fn test_common_ancestor() {
        assert_eq!(common_ancestor(&p("$/a/b/c"), &p("$/a/b/d")), p("$/a/b"));
        assert_eq!(common_ancestor(&p("$/a"), &p("$/b")), ServerPath::root());
        assert_eq!(common_ancestor(&p("$/a/b"), &p("$/a/b")), p("$/a/b"));
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let json = serde_json::to_string(&p("$/Proj/a")).unwrap();
        assert_eq!(json, "\"$/Proj/a\"");
        let bad: Result<ServerPath, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
