//! Reconciliation orchestrator.
//!
//! Runs after git records new history. For each managed document, strictly
//! one after another, it walks the state machine
//!
//! `EnsureRich → CheckpointPre → Export → CheckpointPost → ShaveLocal →
//! Merge → ConflictWait → RestoreLocal → Rewind → Reconcile → Done`
//!
//! The rich form is authoritative going into the merge; afterwards the rich
//! form is regenerated from the merged text, the two checkpoint commits are
//! rewound out of history, and the remote's source form wins on disk.
//!
//! All documents share one working tree and index, so nothing here runs
//! concurrently. A failure ends processing of its document only.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::{ConflictPolicyKind, EnvelopeConfig, SyncConfig};
use crate::converter::Converter;
use crate::envelope;
use crate::errors::{CommandError, ReconcileError, VcsError};
use crate::gate::HookGate;
use crate::models::{Document, DocumentOutcome, ReconcileStep, RunSummary};
use crate::oracle::{ConflictOracle, MergeState};
use crate::policy::ConflictPolicy;
use crate::registry::DocumentRegistry;
use crate::runner::CommandRunner;
use crate::vcs::{GitClient, StashSet};

/// Drives reconciliation runs for one repository.
pub struct Reconciler {
    runner: Arc<CommandRunner>,
    git: GitClient,
    oracle: ConflictOracle,
    converter: Converter,
    registry: DocumentRegistry,
    gate: HookGate,
    policy: ConflictPolicy,
    envelope: EnvelopeConfig,
    remote: String,
    remote_ref: String,
    tag: String,
}

impl Reconciler {
    /// Build a reconciler for the repository rooted at `repo_root`.
    pub fn new(config: &SyncConfig, repo_root: &Path) -> Result<Self, VcsError> {
        let runner = Arc::new(CommandRunner::new(repo_root));
        let managed_dir = config.repository.resolve_managed_dir(repo_root);
        info!(
            repo = %repo_root.display(),
            managed_dir = %managed_dir.display(),
            policy = %config.conflict.policy,
            "initializing reconciler"
        );

        Ok(Self {
            git: GitClient::new(runner.clone(), repo_root),
            oracle: ConflictOracle::new(repo_root)?,
            converter: Converter::new(config.converter.clone()),
            registry: DocumentRegistry::new(managed_dir, config.documents.clone()),
            gate: HookGate::new(&config.gate.marker_path),
            policy: ConflictPolicy::from_config(&config.conflict),
            envelope: config.envelope.clone(),
            remote: config.repository.remote.clone(),
            remote_ref: config.repository.remote_ref(),
            tag: config.commit.tag.clone(),
            runner,
        })
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Reconcile every managed document.
    ///
    /// When the hook gate is already held, another automation run is in
    /// flight (usually the one whose merge fired this hook) and the run is
    /// skipped without touching the repository. The same holds if the gate
    /// is taken while a document is being processed: that document is rolled
    /// back and the rest of the run is skipped. Document failures are
    /// recorded in the summary; only failing to list the documents is an
    /// error.
    pub async fn run(&self) -> Result<RunSummary, ReconcileError> {
        if self.gate.is_held() {
            info!(
                marker = %self.gate.marker_path().display(),
                "hook gate held, skipping reconciliation"
            );
            return Ok(RunSummary::skipped());
        }

        self.runner.clear_history();
        let mut summary = RunSummary::start();
        let documents = self.registry.list_documents()?;
        if documents.is_empty() {
            warn!(dir = %self.registry.root().display(), "no documents found to process");
        }

        for doc in &documents {
            match self.process_document(doc).await {
                Some(outcome) => summary.outcomes.push(outcome),
                None => {
                    summary.skipped = true;
                    break;
                }
            }
        }

        summary.finish();
        info!(
            succeeded = summary.succeeded(),
            total = summary.total(),
            "processing complete: {}",
            summary.summary_line()
        );
        if !summary.all_succeeded() {
            warn!("some documents were not processed successfully");
        }
        Ok(summary)
    }

    /// Run the full state machine for one document. Never fails: errors are
    /// logged and turned into a failed outcome. Returns `None` when the hook
    /// gate was found held at the merge, after undoing the checkpoints.
    #[instrument(skip_all, fields(document = %doc.name))]
    pub async fn process_document(&self, doc: &Document) -> Option<DocumentOutcome> {
        info!(source = %doc.source_file_name(), "processing");
        let mut progress = Progress::default();

        match self.reconcile(doc, &mut progress).await {
            Ok(()) => {
                info!("successfully processed {}", doc.source_file_name());
                Some(DocumentOutcome::succeeded(&doc.name))
            }
            Err(ReconcileError::GateHeld(marker)) => {
                warn!(
                    marker = %marker.display(),
                    "hook gate taken by another run, skipping remaining documents"
                );
                if let Some(anchor) = progress.unrewound_anchor() {
                    self.roll_back(anchor).await;
                }
                None
            }
            Err(e) => {
                error!(step = %progress.step, error = %e, "error processing {}", doc.source_file_name());
                if let Some(anchor) = progress.unrewound_anchor() {
                    self.roll_back(anchor).await;
                }
                Some(DocumentOutcome::failed(&doc.name, progress.step, e))
            }
        }
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    async fn reconcile(&self, doc: &Document, progress: &mut Progress) -> Result<(), ReconcileError> {
        // 1. A missing rich form makes every later step meaningless.
        progress.enter(ReconcileStep::EnsureRich);
        if !doc.has_rich() {
            warn!(rich = %doc.rich_file_name(), "rich form not found, generating it");
            self.converter.text_to_rich(&self.runner, doc).await?;
        }

        // 2. Checkpoint 1: the rich form as the user left it.
        progress.enter(ReconcileStep::CheckpointPre);
        let anchor = self.git.head_sha()?;
        self.git.stage(&doc.rich).await?;
        self.git
            .commit_checkpoint(&format!("{} Backup {}", self.tag, doc.rich_file_name()))
            .await?;
        progress.anchor = Some(anchor.clone());

        // 3. The rich form is authoritative going into the merge.
        progress.enter(ReconcileStep::Export);
        self.converter.rich_to_text(&self.runner, doc).await?;
        if !doc.is_entry_point {
            envelope::strip_file(&doc.source, &self.envelope)?;
        }

        // 4. Checkpoint 2: the exported body.
        progress.enter(ReconcileStep::CheckpointPost);
        self.git.stage(&doc.source).await?;
        self.git
            .commit_checkpoint(&format!("{} Pre-merge {}", self.tag, doc.source_file_name()))
            .await?;

        // 5-8. Stash, merge, restore. The stash is restored on every path.
        progress.enter(ReconcileStep::ShaveLocal);
        let stash = self.git.stash_push().await?;
        let merged = self.fetch_and_merge(progress).await;
        if merged.is_ok() {
            progress.enter(ReconcileStep::RestoreLocal);
        }
        let restored = self.restore_stash(stash).await;
        if let (Err(_), Err(e)) = (&merged, &restored) {
            error!(error = %e, "failed to restore stashed changes; recover with `git stash list`");
        }
        merged?;
        restored?;
        self.converter.text_to_rich(&self.runner, doc).await?;

        // 9. Drop both checkpoints (and any merge commit) from history; the
        // working tree and index keep their content.
        progress.enter(ReconcileStep::Rewind);
        info!(%anchor, "resetting HEAD to pre-checkpoint commit");
        self.git.reset_soft(&anchor).await?;
        progress.rewound = true;

        // 10. The remote's plain-text form is the source of truth.
        progress.enter(ReconcileStep::Reconcile);
        self.reconcile_source(doc).await?;

        progress.enter(ReconcileStep::Done);
        Ok(())
    }

    /// Steps 5 (fetch) to 7.
    async fn fetch_and_merge(&self, progress: &mut Progress) -> Result<(), ReconcileError> {
        self.git.fetch(&self.remote).await?;

        progress.enter(ReconcileStep::Merge);
        if self.gate.is_held() {
            return Err(ReconcileError::GateHeld(self.gate.marker_path().to_path_buf()));
        }
        let _token = self.gate.hold()?;

        info!(remote = %self.remote_ref, "merging");
        let message = format!("{} Merge {} into local", self.tag, self.remote_ref);
        let output = self.git.merge(&self.remote_ref, &message).await?;

        // Some merge drivers exit zero and still leave conflict markers, and
        // a non-zero exit may just mean "conflicts"; ask the repository.
        let conflicted = self.oracle.is_merge_in_progress();
        if !output.success() && !conflicted {
            return Err(VcsError::CommandFailed {
                step: "merge",
                source: CommandError::Failed {
                    command: format!("git merge {}", self.remote_ref),
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                },
            }
            .into());
        }

        progress.enter(ReconcileStep::ConflictWait);
        if conflicted {
            warn!(policy = %self.policy.kind(), "merge left conflicts");
            if self.policy.kind() == ConflictPolicyKind::AutoTheirs {
                let message = format!("{} Accept remote version", self.tag);
                self.git.accept_theirs(&message).await?;
            }
            self.policy.wait_until_resolved(&self.oracle).await?;
        }
        Ok(())
    }

    async fn restore_stash(&self, stash: Option<StashSet>) -> Result<(), ReconcileError> {
        match stash {
            Some(stash) => {
                let id = stash.id();
                if !self.git.stash_pop(stash).await? {
                    warn!(stash = %id, "stashed changes could not be re-applied; recover with `git stash list`");
                }
            }
            None => debug!("no stash to restore"),
        }
        Ok(())
    }

    async fn reconcile_source(&self, doc: &Document) -> Result<(), ReconcileError> {
        if !self.git.exists_at(&self.remote_ref, &doc.source)? {
            warn!(
                source = %doc.source_file_name(),
                remote = %self.remote_ref,
                "source form not on remote, keeping local version"
            );
            return Ok(());
        }

        info!("checking differences from upstream <-> local");
        let diff = self.git.diff_against(&self.remote_ref, &doc.source).await?;
        if diff.trim().is_empty() {
            info!("local source form matches remote");
        } else {
            info!(lines = diff.lines().count(), "local source form differs from remote");
            debug!(%diff, "upstream <-> local diff");
        }

        self.git.checkout_from(&self.remote_ref, &doc.source).await?;
        Ok(())
    }

    /// Best-effort removal of checkpoint commits after a failure. Skipped
    /// while a merge is unresolved so it can be finished by hand.
    async fn roll_back(&self, anchor: &str) {
        if self.oracle.is_merge_in_progress() {
            warn!("merge still unresolved, leaving checkpoints in place for manual recovery");
            return;
        }
        warn!(%anchor, "rolling back checkpoint commits");
        if let Err(e) = self.git.reset_soft(anchor).await {
            error!(error = %e, "rollback failed; checkpoint commits remain in history");
        }
    }
}

/// Where a document's run has got to.
#[derive(Debug)]
struct Progress {
    step: ReconcileStep,
    /// HEAD before the first checkpoint, once that checkpoint exists.
    anchor: Option<String>,
    rewound: bool,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            step: ReconcileStep::EnsureRich,
            anchor: None,
            rewound: false,
        }
    }
}

impl Progress {
    fn enter(&mut self, step: ReconcileStep) {
        debug!(from = %self.step, to = %step, "state transition");
        self.step = step;
    }

    fn unrewound_anchor(&self) -> Option<&str> {
        if self.rewound {
            None
        } else {
            self.anchor.as_deref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracks_rewind() {
        let mut progress = Progress::default();
        assert_eq!(progress.step, ReconcileStep::EnsureRich);
        assert_eq!(progress.unrewound_anchor(), None);

        progress.enter(ReconcileStep::CheckpointPre);
        progress.anchor = Some("abc".into());
        assert_eq!(progress.unrewound_anchor(), Some("abc"));

        progress.enter(ReconcileStep::Rewind);
        progress.rewound = true;
        assert_eq!(progress.unrewound_anchor(), None);
    }

    #[tokio::test]
    async fn test_held_gate_skips_run() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();

        let mut config = SyncConfig::default();
        config.gate.marker_path = dir.path().join("gate");
        std::fs::write(&config.gate.marker_path, "").unwrap();

        let reconciler = Reconciler::new(&config, dir.path()).unwrap();
        let summary = reconciler.run().await.unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.total(), 0);
        assert!(reconciler.runner().history().is_empty());
    }

    #[tokio::test]
    async fn test_missing_managed_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        git2::Repository::init(dir.path()).unwrap();

        let mut config = SyncConfig::default();
        config.gate.marker_path = dir.path().join("gate");

        let reconciler = Reconciler::new(&config, dir.path()).unwrap();
        assert!(matches!(
            reconciler.run().await,
            Err(ReconcileError::IoError(_))
        ));
    }
}
