//! Data model shared by the registry, the orchestrator and the CLI.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A managed document: one plain-text source form paired with one rich form.
///
/// At rest the two forms are content-equivalent under the converter. A
/// reconciliation run suspends that invariant and restores it before it
/// finishes with the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// File stem shared by both forms (e.g. `intro`).
    pub name: String,
    /// Plain-text, line-diffable form.
    pub source: PathBuf,
    /// Structured, non-diffable form.
    pub rich: PathBuf,
    /// The aggregator that owns the envelope markers.
    pub is_entry_point: bool,
}

impl Document {
    pub fn source_file_name(&self) -> String {
        file_name(&self.source)
    }

    pub fn rich_file_name(&self) -> String {
        file_name(&self.rich)
    }

    pub fn has_rich(&self) -> bool {
        self.rich.exists()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Workflow steps
// ---------------------------------------------------------------------------

/// Steps of the per-document reconciliation state machine, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStep {
    EnsureRich,
    CheckpointPre,
    Export,
    CheckpointPost,
    ShaveLocal,
    Merge,
    ConflictWait,
    RestoreLocal,
    Rewind,
    Reconcile,
    Done,
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EnsureRich => "ensure_rich",
            Self::CheckpointPre => "checkpoint_pre",
            Self::Export => "export",
            Self::CheckpointPost => "checkpoint_post",
            Self::ShaveLocal => "shave_local",
            Self::Merge => "merge",
            Self::ConflictWait => "conflict_wait",
            Self::RestoreLocal => "restore_local",
            Self::Rewind => "rewind",
            Self::Reconcile => "reconcile",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DocumentStatus {
    Succeeded,
    Failed {
        /// The step that raised the failure.
        step: ReconcileStep,
        error: String,
    },
}

/// Final state of one document after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document: String,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

impl DocumentOutcome {
    pub fn succeeded(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            status: DocumentStatus::Succeeded,
        }
    }

    pub fn failed(document: impl Into<String>, step: ReconcileStep, error: impl fmt::Display) -> Self {
        Self {
            document: document.into(),
            status: DocumentStatus::Failed {
                step,
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, DocumentStatus::Succeeded)
    }
}

/// Result of one invocation over all managed documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the hook gate was found held, either before the run started
    /// or at a document's merge. Processing stopped at that point.
    pub skipped: bool,
    pub outcomes: Vec<DocumentOutcome>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            skipped: false,
            outcomes: Vec::new(),
        }
    }

    pub fn skipped() -> Self {
        let mut summary = Self::start();
        summary.skipped = true;
        summary.completed_at = Some(summary.started_at);
        summary
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// True when every document reached DONE.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// `"N/M documents successful"`.
    pub fn summary_line(&self) -> String {
        format!("{}/{} documents successful", self.succeeded(), self.total())
    }
}
