//! Batch snapshot files.
//!
//! A snapshot is a JSON document holding the server state a batch runs
//! against, the conflicts the server reported, and optionally the plan:
//!
//! ```json
//! {
//!   "server": { "items": [...], "contents": [...], "labels": [...] },
//!   "conflicts": [ { "conflict_id": 1, "item_id": 10, ... } ],
//!   "plan": [ { "item_id": 10, "resolution": "accept_merge" } ]
//! }
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use tfvcresolve_core::conflict::{Conflict, Resolution};
use tfvcresolve_core::labels::LabelItemSpec;
use tfvcresolve_core::models::VersionSpec;
use tfvcresolve_core::server::InMemoryServer;
use tfvcresolve_core::{ResolutionPlan, ServerPath};

#[derive(Debug, Default, Deserialize)]
pub struct BatchSnapshot {
    #[serde(default)]
    pub server: InMemoryServer,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    #[serde(default)]
    pub plan: Option<ResolutionPlan>,
}

impl BatchSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }

    /// The snapshot's own plan, or one applying `accept` to every conflict.
    pub fn plan_or(&self, accept: Option<Resolution>, fallback: Option<Resolution>) -> Result<ResolutionPlan> {
        match (accept, &self.plan) {
            (Some(resolution), _) => Ok(ResolutionPlan::uniform(&self.conflicts, resolution, fallback)),
            (None, Some(plan)) => Ok(plan.clone()),
            (None, None) => bail!("snapshot has no plan; pass --accept"),
        }
    }
}

/// Parse `PATH[@VERSION]`, e.g. `$/Proj/src@C42` or `$/Proj@Lrelease`.
pub fn parse_label_spec(raw: &str, recursive: bool) -> Result<LabelItemSpec> {
    let (path, version) = match raw.rsplit_once('@') {
        Some((path, version)) => {
            let version: VersionSpec = version
                .parse()
                .with_context(|| format!("bad version in '{raw}'"))?;
            (path, version)
        }
        None => (raw, VersionSpec::Latest),
    };
    let path = ServerPath::parse(path).with_context(|| format!("bad server path in '{raw}'"))?;
    Ok(LabelItemSpec::new(path, version, recursive))
}
