//! Pre-commit export pass.
//!
//! Before a human commit, every rich form in the managed directory is
//! exported to its source form so the plain text that gets committed matches
//! what the user edited. Nothing is staged here.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, instrument, warn};

use crate::config::{EnvelopeConfig, SyncConfig};
use crate::converter::Converter;
use crate::envelope;
use crate::errors::ReconcileError;
use crate::gate::HookGate;
use crate::models::{Document, DocumentOutcome, ReconcileStep, RunSummary};
use crate::registry::{DiscoverBy, DocumentRegistry};
use crate::runner::CommandRunner;

/// Marker left in the managed directory to signal a commit in progress.
pub const COMMIT_MARKER: &str = ".commit";

pub struct Exporter {
    runner: CommandRunner,
    converter: Converter,
    registry: DocumentRegistry,
    gate: HookGate,
    envelope: EnvelopeConfig,
}

impl Exporter {
    pub fn new(config: &SyncConfig, repo_root: &Path) -> Self {
        let managed_dir = config.repository.resolve_managed_dir(repo_root);
        Self {
            runner: CommandRunner::new(repo_root),
            converter: Converter::new(config.converter.clone()),
            registry: DocumentRegistry::new(managed_dir, config.documents.clone()),
            gate: HookGate::new(&config.gate.marker_path),
            envelope: config.envelope.clone(),
        }
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn commit_marker(&self) -> PathBuf {
        self.registry.root().join(COMMIT_MARKER)
    }

    /// Export every rich form. Skipped while the hook gate is held, since
    /// the commit then belongs to the reconciliation workflow.
    pub async fn run(&self) -> Result<RunSummary, ReconcileError> {
        if self.gate.is_held() {
            info!(
                marker = %self.gate.marker_path().display(),
                "hook gate held, skipping export"
            );
            return Ok(RunSummary::skipped());
        }

        self.runner.clear_history();
        let mut summary = RunSummary::start();
        let documents = self.registry.list(DiscoverBy::Rich)?;
        if documents.is_empty() {
            warn!(dir = %self.registry.root().display(), "no rich-form files found to process");
        }

        for doc in &documents {
            summary.outcomes.push(self.export_document(doc).await);
        }

        fs::write(self.commit_marker(), b"")?;

        summary.finish();
        info!(
            succeeded = summary.succeeded(),
            total = summary.total(),
            "processing complete: {}",
            summary.summary_line()
        );
        if !summary.all_succeeded() {
            warn!("some files were not processed successfully");
        }
        Ok(summary)
    }

    #[instrument(skip_all, fields(document = %doc.name))]
    async fn export_document(&self, doc: &Document) -> DocumentOutcome {
        info!(rich = %doc.rich_file_name(), "processing");
        match self.export(doc).await {
            Ok(()) => DocumentOutcome::succeeded(&doc.name),
            Err(e) => {
                error!(error = %e, "error processing {}", doc.rich_file_name());
                DocumentOutcome::failed(&doc.name, ReconcileStep::Export, e)
            }
        }
    }

    async fn export(&self, doc: &Document) -> Result<(), ReconcileError> {
        self.converter.rich_to_text(&self.runner, doc).await?;
        if !doc.is_entry_point {
            envelope::strip_file(&doc.source, &self.envelope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterConfig;

    const WRAPPED: &str = "\\documentclass{article}\n\\begin{document}\nBody line\n\\end{document}\n";

    fn config(dir: &Path) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.repository.managed_dir = Some(PathBuf::from("tex"));
        config.gate.marker_path = dir.join("gate");
        config.converter = ConverterConfig {
            rich_to_text: vec!["cp".into(), "{rich}".into(), "{source}".into()],
            text_to_rich: vec!["cp".into(), "{source}".into(), "{rich}".into()],
        };
        config
    }

    #[tokio::test]
    async fn test_exports_and_strips_non_entry_documents() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("tex");
        fs::create_dir(&tex).unwrap();
        fs::write(tex.join("intro.lyx"), WRAPPED).unwrap();
        fs::write(tex.join("main.lyx"), WRAPPED).unwrap();

        let exporter = Exporter::new(&config(dir.path()), dir.path());
        let summary = exporter.run().await.unwrap();

        assert_eq!(summary.summary_line(), "2/2 documents successful");
        assert_eq!(fs::read_to_string(tex.join("intro.tex")).unwrap(), "Body line\n");
        assert_eq!(fs::read_to_string(tex.join("main.tex")).unwrap(), WRAPPED);
        assert!(exporter.commit_marker().exists());
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let tex = dir.path().join("tex");
        fs::create_dir(&tex).unwrap();
        fs::write(tex.join("intro.lyx"), WRAPPED).unwrap();
        fs::write(tex.join("outro.lyx"), WRAPPED).unwrap();

        let mut config = config(dir.path());
        // Fails whenever the output path names intro.
        config.converter.rich_to_text = vec![
            "sh".into(),
            "-c".into(),
            "case \"$1\" in */intro.tex) exit 3;; esac; cp \"$0\" \"$1\"".into(),
            "{rich}".into(),
            "{source}".into(),
        ];

        let summary = Exporter::new(&config, dir.path()).run().await.unwrap();
        assert_eq!(summary.summary_line(), "1/2 documents successful");
        let failed: Vec<_> = summary.failures().map(|o| o.document.as_str()).collect();
        assert_eq!(failed, vec!["intro"]);
        assert!(tex.join("outro.tex").exists());
    }

    #[tokio::test]
    async fn test_held_gate_skips_export() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        fs::write(&config.gate.marker_path, "").unwrap();

        let exporter = Exporter::new(&config, dir.path());
        let summary = exporter.run().await.unwrap();
        assert!(summary.skipped);
        assert!(!exporter.commit_marker().exists());
    }
}
