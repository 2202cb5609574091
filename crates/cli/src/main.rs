//! formsync command-line tool.
//!
//! The `post-merge` and `pre-commit` subcommands are the git hook entry
//! points; the rest install hooks, inspect state and manage configuration.

mod logging;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use formsync_core::config::DEFAULT_CONFIG_FILE;
use formsync_core::models::DocumentStatus;
use formsync_core::oracle::{ConflictOracle, MergeState};
use formsync_core::registry::DocumentRegistry;
use formsync_core::vcs::GitClient;
use formsync_core::{hooks, Exporter, HookGate, Reconciler, RunSummary, SyncConfig};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Keep rich-form documents and their plain-text sources in sync across git merges.
#[derive(Parser, Debug)]
#[command(name = "formsync", version, about)]
struct Cli {
    /// Path to the TOML configuration file (default: `.formsync.toml` at the
    /// repository root, if present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Console log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Any path inside the repository (default: the current directory).
    #[arg(short = 'C', long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every managed document with the remote (post-merge hook).
    #[command(alias = "reconcile")]
    PostMerge {
        /// Squash flag git passes to the post-merge hook ("0" or "1").
        #[arg(hide = true)]
        squash: Option<String>,
    },

    /// Export every rich form to its source form (pre-commit hook).
    PreCommit,

    /// Install the post-merge and pre-commit hooks.
    Install {
        /// Overwrite hooks not written by formsync.
        #[arg(long)]
        force: bool,

        /// Binary the hooks should run (default: this executable).
        #[arg(long)]
        binary: Option<String>,
    },

    /// Show gate, merge and document state.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manually hold or release the hook gate.
    Gate {
        #[command(subcommand)]
        action: GateAction,
    },

    /// Write a default configuration file.
    Init {
        /// Output path (default: `.formsync.toml` at the repository root).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate the configuration.
    Validate,
}

#[derive(Subcommand, Debug)]
enum GateAction {
    /// Create the gate marker; hooks become no-ops.
    Acquire,
    /// Remove the gate marker.
    Release,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let start = match &cli.repo {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let repo_root = GitClient::discover_root(&start).context("not inside a git repository")?;

    if let Commands::Init { output } = &cli.command {
        let output = output
            .clone()
            .unwrap_or_else(|| repo_root.join(DEFAULT_CONFIG_FILE));
        cmd_init(&output)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = SyncConfig::discover(cli.config.as_deref(), &repo_root)
        .context("failed to load configuration")?;

    let hook = match cli.command {
        Commands::PostMerge { .. } => Some("post-merge"),
        Commands::PreCommit => Some("pre-commit"),
        _ => None,
    };
    let level = cli.log_level.as_deref().unwrap_or(config.log.level.as_str());
    let run_log = hook.map(|h| config.log.resolve_file(h));
    let _log_guard = logging::init(level, run_log.as_deref());

    match cli.command {
        Commands::PostMerge { .. } => cmd_post_merge(&config, &repo_root).await,
        Commands::PreCommit => cmd_pre_commit(&config, &repo_root).await,
        Commands::Install { force, binary } => {
            cmd_install(&repo_root, force, binary)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { json } => {
            cmd_status(&config, &repo_root, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gate { action } => {
            cmd_gate(&config, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            println!("{}", style::success("Configuration is valid"));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Init { .. } => Ok(ExitCode::SUCCESS),
    }
}

// ---------------------------------------------------------------------------
// Hook entry points
// ---------------------------------------------------------------------------

async fn cmd_post_merge(config: &SyncConfig, repo_root: &Path) -> Result<ExitCode> {
    info!(repo = %repo_root.display(), "post-merge hook started");
    let reconciler =
        Reconciler::new(config, repo_root).context("failed to initialize reconciler")?;
    let summary = reconciler.run().await.context("reconciliation failed")?;
    Ok(report(&summary))
}

async fn cmd_pre_commit(config: &SyncConfig, repo_root: &Path) -> Result<ExitCode> {
    info!(repo = %repo_root.display(), "pre-commit hook started");
    let summary = Exporter::new(config, repo_root)
        .run()
        .await
        .context("export failed")?;
    Ok(report(&summary))
}

/// Print the run summary and map it to the process exit code.
fn report(summary: &RunSummary) -> ExitCode {
    if summary.skipped {
        if summary.total() == 0 {
            println!("{}", style::dim("hook gate held, nothing to do"));
            return ExitCode::SUCCESS;
        }
        println!(
            "{}",
            style::dim("hook gate taken during the run, remaining documents skipped")
        );
    }

    for outcome in summary.failures() {
        if let DocumentStatus::Failed { step, error } = &outcome.status {
            eprintln!(
                "{}",
                style::error(&format!("{} failed at {step}: {error}", outcome.document))
            );
        }
    }

    let line = summary.summary_line();
    if summary.all_succeeded() {
        println!("{}", style::success(&line));
        ExitCode::SUCCESS
    } else {
        println!("{}", style::warn(&line));
        ExitCode::FAILURE
    }
}

// ---------------------------------------------------------------------------
// Management subcommands
// ---------------------------------------------------------------------------

fn cmd_install(repo_root: &Path, force: bool, binary: Option<String>) -> Result<()> {
    let binary = match binary {
        Some(b) => b,
        None => std::env::current_exe()
            .context("failed to locate the formsync executable")?
            .display()
            .to_string(),
    };
    let written = hooks::install(repo_root, &binary, force).context("failed to install hooks")?;
    for path in written {
        println!("{}", style::success(&format!("installed {}", path.display())));
    }
    Ok(())
}

fn cmd_status(config: &SyncConfig, repo_root: &Path, json: bool) -> Result<()> {
    let gate = HookGate::new(&config.gate.marker_path);
    let oracle = ConflictOracle::new(repo_root).context("failed to open repository")?;
    let managed_dir = config.repository.resolve_managed_dir(repo_root);
    let registry = DocumentRegistry::new(&managed_dir, config.documents.clone());
    let documents = registry.list_documents().with_context(|| {
        format!("failed to list documents in {}", managed_dir.display())
    })?;
    let merging = oracle.is_merge_in_progress();

    if json {
        let docs: Vec<_> = documents
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "source": d.source,
                    "rich": d.rich,
                    "entry_point": d.is_entry_point,
                    "has_rich": d.has_rich(),
                })
            })
            .collect();
        let status = serde_json::json!({
            "repository": repo_root,
            "managed_dir": managed_dir,
            "gate_held": gate.is_held(),
            "merge_in_progress": merging,
            "conflict_policy": config.conflict.policy.to_string(),
            "documents": docs,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", style::header("formsync status"));
    println!("  Repository:  {}", repo_root.display());
    println!("  Managed dir: {}", managed_dir.display());
    println!("  Policy:      {}", config.conflict.policy);
    if gate.is_held() {
        println!("  {}", style::warn(&format!("Hook gate held ({})", gate.marker_path().display())));
    } else {
        println!("  {}", style::success("Hook gate free"));
    }
    if merging {
        println!("  {}", style::warn("Merge in progress"));
    }

    println!();
    println!("{}", style::header(&format!("Documents ({})", documents.len())));
    for doc in &documents {
        let marker = if doc.is_entry_point {
            style::dim(" (entry point)")
        } else {
            String::new()
        };
        let line = format!("{}{marker}", doc.name);
        if doc.has_rich() {
            println!("  {}", style::success(&line));
        } else {
            println!("  {}", style::warn(&format!("{line}: {} missing", doc.rich_file_name())));
        }
    }
    Ok(())
}

fn cmd_gate(config: &SyncConfig, action: GateAction) -> Result<()> {
    let gate = HookGate::new(&config.gate.marker_path);
    let path = gate.marker_path().display().to_string();
    match action {
        GateAction::Acquire => {
            gate.acquire()
                .with_context(|| format!("failed to create {path}"))?;
            println!("{}", style::success(&format!("hooks disabled ({path})")));
        }
        GateAction::Release => {
            gate.release()
                .with_context(|| format!("failed to remove {path}"))?;
            println!("{}", style::success("hooks enabled"));
        }
    }
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# formsync configuration
# Every value below is the default; delete what you do not change.

[repository]
# managed_dir = "tex"      # default: repo root if its name starts with "tex", else "tex/"
remote = "origin"
branch = "master"

[documents]
source_extension = "tex"
rich_extension = "lyx"
entry_point = "main"
exclude = ["*temp*"]
include_entry_point = true

[envelope]
begin_marker = '\begin{document}'
end_marker = '\end{document}'
include_prefix = '\include'

[converter]
rich_to_text = ["lyx", "--export-to", "latex", "{source}", "-f", "{rich}"]
text_to_rich = ["tex2lyx", "-f", "{source}"]

[gate]
marker_path = "~/.formsync/hooks.disabled"

[conflict]
policy = "auto_theirs"     # or "interactive"
poll_interval_ms = 1000
# timeout_secs = 600

[log]
level = "info"
# file = "~/.formsync/run.log"   # default: ~/.formsync/<hook>.log

[commit]
tag = "[hook]"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust the converter commands if LyX is not on your PATH");
    println!("  2. Install the hooks with: formsync install");
    Ok(())
}
