//! Discovery of the managed documents.
//!
//! A document exists wherever a source-form file lives in the managed
//! directory. Listing reads the directory each time, so it always reflects
//! the current tree and can be repeated freely.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::config::DocumentsConfig;
use crate::models::Document;

/// Which side of the pair drives discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverBy {
    /// One document per source-form file (post-merge reconciliation).
    Source,
    /// One document per rich-form file (pre-commit export).
    Rich,
}

#[derive(Debug, Clone)]
pub struct DocumentRegistry {
    root: PathBuf,
    config: DocumentsConfig,
}

impl DocumentRegistry {
    pub fn new(root: impl Into<PathBuf>, config: DocumentsConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Documents keyed by their source-form files, sorted by name.
    pub fn list_documents(&self) -> io::Result<Vec<Document>> {
        self.list(DiscoverBy::Source)
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub fn list(&self, by: DiscoverBy) -> io::Result<Vec<Document>> {
        let extension = match by {
            DiscoverBy::Source => &self.config.source_extension,
            DiscoverBy::Rich => &self.config.rich_extension,
        };

        let mut documents = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension.as_str()) {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.is_excluded(file_name) {
                debug!(file_name, "skipping scratch file");
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let document = self.document(stem);
            if document.is_entry_point && !self.config.include_entry_point {
                debug!(file_name, "skipping entry-point document");
                continue;
            }
            documents.push(document);
        }

        documents.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = documents.len(), "listed documents");
        Ok(documents)
    }

    /// The document pair for a base name, whether or not its files exist.
    pub fn document(&self, name: &str) -> Document {
        Document {
            name: name.to_string(),
            source: self
                .root
                .join(format!("{name}.{}", self.config.source_extension)),
            rich: self
                .root
                .join(format!("{name}.{}", self.config.rich_extension)),
            is_entry_point: name == self.config.entry_point,
        }
    }

    fn is_excluded(&self, file_name: &str) -> bool {
        self.config
            .exclude
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, file_name))
    }
}
