//! tfvcresolve command-line tool.
//!
//! Replays conflict batches against a local workspace, computes label
//! display sets, and generates / validates configuration files.

mod signals;
mod snapshot;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tfvcresolve_core::config::EngineConfig;
use tfvcresolve_core::conflict::Resolution;
use tfvcresolve_core::errors::ResolveError;
use tfvcresolve_core::labels::{LabelItemSpecWithItems, LabelModel};
use tfvcresolve_core::orchestrator::BatchReport;
use tfvcresolve_core::workspace::MappedWorkspace;
use tfvcresolve_core::ResolutionEngine;

use snapshot::{parse_label_spec, BatchSnapshot};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// tfvcresolve command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "tfvcresolve",
    version,
    about = "Resolve TFVC conflicts and inspect label requests"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "~/.config/tfvcresolve/config.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a conflict batch recorded in a snapshot file.
    Resolve {
        /// Snapshot JSON with server state, conflicts and an optional plan.
        snapshot: PathBuf,

        /// Apply this resolution to every conflict instead of the snapshot's plan.
        #[arg(long, value_enum)]
        accept: Option<AcceptArg>,

        /// Resolution to use where the requested one is unsupported.
        #[arg(long, value_enum)]
        fallback: Option<AcceptArg>,
    },

    /// Show which items a label request would apply to.
    Labels {
        /// Snapshot JSON providing the server state.
        snapshot: PathBuf,

        /// Item specs as PATH[@VERSION], in the order they are added.
        #[arg(required = true)]
        specs: Vec<String>,

        /// Evaluate every spec recursively.
        #[arg(short, long)]
        recursive: bool,

        /// Add specs deepest-first so the broadest one wins.
        #[arg(long)]
        broadest_wins: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./tfvcresolve.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum AcceptArg {
    Yours,
    Theirs,
    Merge,
}

impl From<AcceptArg> for Resolution {
    fn from(value: AcceptArg) -> Self {
        match value {
            AcceptArg::Yours => Resolution::AcceptYours,
            AcceptArg::Theirs => Resolution::AcceptTheirs,
            AcceptArg::Merge => Resolution::AcceptMerge,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = PathBuf::from(expand_tilde(&cli.config));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(configured_log_level(&config_path))),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = PathBuf::from(expand_tilde(&cli.config));
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&config_path),
        Commands::Resolve {
            snapshot,
            accept,
            fallback,
        } => {
            let config = load_config(&config_path)?;
            cmd_resolve(
                config,
                &snapshot,
                accept.map(Resolution::from),
                fallback.map(Resolution::from),
            )
            .await
        }
        Commands::Labels {
            snapshot,
            specs,
            recursive,
            broadest_wins,
        } => {
            let config = load_config(&config_path)?;
            cmd_labels(&config, &snapshot, &specs, recursive, broadest_wins)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config file, or defaults when the file does not exist.
fn load_config(path: &Path) -> Result<EngineConfig> {
    let mut config = if path.exists() {
        EngineConfig::load_from_file(path).context("failed to load configuration file")?
    } else {
        warn!(path = %path.display(), "configuration file not found, using defaults");
        EngineConfig::default()
    };
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Log level from the config file, or "warn" when it cannot be read.
fn configured_log_level(path: &Path) -> String {
    EngineConfig::load_from_file(path)
        .map(|c| c.engine.log_level)
        .unwrap_or_else(|_| "warn".to_string())
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_resolve(
    config: EngineConfig,
    snapshot_path: &Path,
    accept: Option<Resolution>,
    fallback: Option<Resolution>,
) -> Result<()> {
    if config.workspace.folders.is_empty() {
        bail!("no workspace folders configured; add [[workspace.folders]] to the config");
    }

    let snapshot = BatchSnapshot::load(snapshot_path)?;
    let plan = snapshot.plan_or(accept, fallback)?;
    let conflict_count = snapshot.conflicts.len();

    let workspace = MappedWorkspace {
        name: config.workspace.name.clone(),
        folders: config.workspace.folders.clone(),
    };
    let engine = Arc::new(ResolutionEngine::new(
        Arc::new(snapshot.server),
        Arc::new(workspace),
        Arc::new(config.content_store()),
        config.name_merger(),
        config.content_merger(),
    ));
    info!(conflicts = conflict_count, "starting batch");

    let cancel = engine.cancellation_token();
    let worker = {
        let engine = engine.clone();
        let conflicts = snapshot.conflicts;
        tokio::task::spawn_blocking(move || engine.resolve_batch(conflicts, &plan))
    };
    tokio::pin!(worker);

    let result = tokio::select! {
        joined = &mut worker => joined,
        _ = signals::wait_for_shutdown() => {
            eprintln!("Cancelling batch...");
            cancel.cancel();
            worker.await
        }
    };

    if let Err(e) = engine.shutdown() {
        warn!(error = %e, "failed to clean up content store");
    }

    match result.context("resolution task panicked")? {
        Ok(report) => {
            print_report(&report);
            println!();
            println!("All {} conflict(s) resolved.", report.resolved.len());
            Ok(())
        }
        Err(ResolveError::Incomplete {
            unresolved,
            failures,
        }) => {
            if !failures.is_empty() {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(vec!["Item", "Kind", "Reason"]);
                for f in &failures {
                    table.add_row(vec![
                        Cell::new(f.item_id),
                        Cell::new(f.kind).fg(Color::Red),
                        Cell::new(&f.message),
                    ]);
                }
                println!("{table}");
            }
            bail!(
                "{} conflict(s) left unresolved: {:?}",
                unresolved.len(),
                unresolved
            )
        }
        Err(e) => Err(e).context("conflict batch failed"),
    }
}

fn print_report(report: &BatchReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Item", "Conflict", "Resolution", "Local path"]);

    for r in &report.resolved {
        let resolution = match r.resolution {
            Resolution::AcceptYours => Cell::new(r.resolution).fg(Color::Blue),
            Resolution::AcceptTheirs => Cell::new(r.resolution).fg(Color::Yellow),
            Resolution::AcceptMerge => Cell::new(r.resolution).fg(Color::Green),
        };
        let local = r
            .local_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(removed)".to_string());
        table.add_row(vec![
            Cell::new(r.item_id),
            Cell::new(r.conflict_id),
            resolution,
            Cell::new(local),
        ]);
    }

    println!("{table}");
    if report.fallbacks_used > 0 {
        println!("{} conflict(s) resolved with their fallback.", report.fallbacks_used);
    }
}

fn cmd_labels(
    config: &EngineConfig,
    snapshot_path: &Path,
    raw_specs: &[String],
    recursive: bool,
    broadest_wins: bool,
) -> Result<()> {
    let snapshot = BatchSnapshot::load(snapshot_path)?;

    let mut resolved = Vec::with_capacity(raw_specs.len());
    for raw in raw_specs {
        let spec = parse_label_spec(raw, recursive)?;
        let with_items =
            LabelItemSpecWithItems::resolve(spec, &config.engine.project, &snapshot.server)
                .with_context(|| format!("failed to query items for '{raw}'"))?;
        resolved.push(with_items);
    }

    let mut model = LabelModel::new();
    if broadest_wins {
        model.add_all(resolved);
    } else {
        for spec in resolved {
            model.add(spec);
        }
    }

    println!("Retained specs:");
    for spec in model.label_item_specs() {
        println!(
            "  {} @ {}{}",
            spec.path,
            spec.version,
            if spec.recursive { " (recursive)" } else { "" }
        );
    }
    println!();

    let items = model.calculate_items_to_display();
    if items.is_empty() {
        println!("No items would be labelled.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Path", "Type", "Changeset", "Version"]);
    for entry in &items {
        table.add_row(vec![
            Cell::new(&entry.item.path),
            Cell::new(entry.item.item_type),
            Cell::new(entry.item.changeset),
            Cell::new(&entry.version),
        ]);
    }
    println!("{table}");
    println!("{} item(s).", items.len());
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# tfvcresolve configuration

[engine]
log_level = "info"
project = "MyProject"

[store]
# Parent of the per-run content cache directory; system temp dir when unset.
# Can be overridden with TFVCRESOLVE_CONTENT_DIR.
# base_dir = "/var/tmp/tfvcresolve"

[merge]
# Side kept on rename/rename conflicts: "yours" or "theirs".
name_policy = "yours"
# Write conflicted automatic merges with markers instead of leaving them unresolved.
write_conflict_markers = false

[workspace]
name = "default"

[[workspace.folders]]
server_path = "$/MyProject"
local_path = "/path/to/working/copy"
"#;

    if output.exists() {
        bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the project name and workspace folder mappings");
    println!(
        "  2. Validate with: tfvcresolve validate --config {}",
        output.display()
    );
    println!(
        "  3. Replay a batch: tfvcresolve resolve --config {} batch.json",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        EngineConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.apply_env_overrides();
    println!("  [OK] Environment overrides processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Log level     : {}", config.engine.log_level);
    println!(
        "  Project       : {}",
        if config.engine.project.is_empty() {
            "(none)"
        } else {
            &config.engine.project
        }
    );
    println!(
        "  Content dir   : {}",
        config
            .store
            .base_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "system temp".to_string())
    );
    println!("  Name policy   : {}", config.merge.name_policy);
    println!(
        "  Markers       : {}",
        if config.merge.write_conflict_markers {
            "written"
        } else {
            "not written"
        }
    );
    println!("  Folders       : {}", config.workspace.folders.len());
    for folder in &config.workspace.folders {
        println!(
            "    {} -> {}",
            folder.server_path,
            folder.local_path.display()
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}
