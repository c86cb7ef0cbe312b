//! Label request model.
//!
//! A label request is a set of [`LabelItemSpec`]s. Adding a spec absorbs
//! every retained spec beneath it; the display set is then computed by
//! letting deeper specs override shallower ones for the items they cover.
//!
//! Absorption is insertion-order sensitive: a child spec added *after* its
//! ancestor survives and overrides the ancestor for its subtree. Use
//! [`LabelModel::add_all`] to get "broadest spec wins" behaviour.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ServerError;
use crate::models::{Item, RecursionType, VersionSpec};
use crate::path::{compare_parent_to_child, compare_parent_to_child_typed, ServerPath};
use crate::server::ServerBoundary;

/// One labelling request: a path at a version, optionally recursive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelItemSpec {
    pub path: ServerPath,
    pub version: VersionSpec,
    #[serde(default)]
    pub recursive: bool,
}

impl LabelItemSpec {
    pub fn new(path: ServerPath, version: VersionSpec, recursive: bool) -> Self {
        Self {
            path,
            version,
            recursive,
        }
    }

    pub fn recursion(&self) -> RecursionType {
        if self.recursive {
            RecursionType::Full
        } else {
            RecursionType::None
        }
    }
}

/// A spec together with the items it affects when evaluated on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelItemSpecWithItems {
    pub spec: LabelItemSpec,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl LabelItemSpecWithItems {
    pub fn new(spec: LabelItemSpec, items: Vec<Item>) -> Self {
        Self { spec, items }
    }

    /// A spec pinned to `item` that contributes no items, hiding `item`
    /// (and, for folders, its subtree) from the display set.
    pub fn for_removal(item: &Item) -> Self {
        let version = VersionSpec::Changeset(item.changeset);
        Self {
            spec: LabelItemSpec::new(item.path.clone(), version, item.is_folder()),
            items: Vec::new(),
        }
    }

    /// Evaluate `spec` against the server.
    pub fn resolve(
        spec: LabelItemSpec,
        project: &str,
        server: &dyn ServerBoundary,
    ) -> Result<Self, ServerError> {
        let items = server.query_items(project, &spec.path, spec.recursion(), &spec.version)?;
        debug!(path = %spec.path, version = %spec.version, items = items.len(), "resolved label spec");
        Ok(Self { spec, items })
    }
}

/// An item in the display set with the version of the spec it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelItem {
    pub item: Item,
    pub version: VersionSpec,
}

fn by_spec_path(a: &LabelItemSpecWithItems, b: &LabelItemSpecWithItems) -> Ordering {
    compare_parent_to_child(&a.spec.path, &b.spec.path)
}

/// The retained specs of one label request.
#[derive(Debug, Clone, Default)]
pub struct LabelModel {
    specs: Vec<LabelItemSpecWithItems>,
}

impl LabelModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec, dropping every retained spec at or below its path.
    pub fn add(&mut self, new_spec: LabelItemSpecWithItems) {
        let before = self.specs.len();
        self.specs
            .retain(|existing| !existing.spec.path.is_under(&new_spec.spec.path));
        let absorbed = before - self.specs.len();
        if absorbed > 0 {
            debug!(path = %new_spec.spec.path, absorbed, "label spec absorbed retained specs");
        }
        self.specs.push(new_spec);
    }

    /// Add many specs, deepest first, so the broadest spec absorbs the rest.
    pub fn add_all(&mut self, specs: impl IntoIterator<Item = LabelItemSpecWithItems>) {
        let mut specs: Vec<_> = specs.into_iter().collect();
        specs.sort_by(|a, b| by_spec_path(b, a));
        for spec in specs {
            self.add(spec);
        }
    }

    /// Items the request would label, parent-first. An item is attributed to
    /// the deepest retained spec covering it.
    pub fn calculate_items_to_display(&self) -> Vec<LabelItem> {
        let mut ordered: Vec<&LabelItemSpecWithItems> = self.specs.iter().collect();
        ordered.sort_by(|a, b| by_spec_path(a, b));

        let mut result = Vec::new();
        for (idx, spec) in ordered.iter().enumerate() {
            for item in &spec.items {
                let overridden = ordered[idx + 1..]
                    .iter()
                    .any(|later| item.path.is_under(&later.spec.path));
                if !overridden {
                    result.push(LabelItem {
                        item: item.clone(),
                        version: spec.spec.version.clone(),
                    });
                }
            }
        }

        result.sort_by(|a, b| {
            compare_parent_to_child_typed(
                &a.item.path,
                a.item.is_folder(),
                &b.item.path,
                b.item.is_folder(),
            )
        });
        result
    }

    /// Retained specs, parent-first.
    pub fn label_item_specs(&self) -> Vec<LabelItemSpec> {
        let mut ordered: Vec<&LabelItemSpecWithItems> = self.specs.iter().collect();
        ordered.sort_by(|a, b| by_spec_path(a, b));
        ordered.into_iter().map(|s| s.spec.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn clear(&mut self) {
        self.specs.clear();
    }
}
