//! TOML-based configuration for formsync.
//!
//! The config file is optional: every field has a default matching a
//! LaTeX/LyX document tree, so a repository without `.formsync.toml` runs with
//! [`SyncConfig::default`]. Paths beginning with `~/` are expanded against the
//! user's home directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

/// File name looked up at the repository root when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = ".formsync.toml";

/// Placeholder substituted with the source (plain-text) path.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Placeholder substituted with the rich-form path.
pub const RICH_PLACEHOLDER: &str = "{rich}";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Repository layout and remote settings.
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Which files are managed documents.
    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Envelope markers stripped from non-entry documents.
    #[serde(default)]
    pub envelope: EnvelopeConfig,

    /// External converter invocation templates.
    #[serde(default)]
    pub converter: ConverterConfig,

    /// Hook gate marker location.
    #[serde(default)]
    pub gate: GateConfig,

    /// Merge-conflict handling.
    #[serde(default)]
    pub conflict: ConflictConfig,

    /// Run-log settings.
    #[serde(default)]
    pub log: LogConfig,

    /// Automation commit settings.
    #[serde(default)]
    pub commit: CommitConfig,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Repository layout and remote tracking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Managed directory relative to the repository root. When unset, the
    /// root itself is used if its name starts with `tex`, otherwise `tex/`.
    #[serde(default)]
    pub managed_dir: Option<PathBuf>,

    /// Remote to fetch and merge from.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Remote branch merged into local history.
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_remote() -> String {
    "origin".into()
}
fn default_branch() -> String {
    "master".into()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            managed_dir: None,
            remote: default_remote(),
            branch: default_branch(),
        }
    }
}

impl RepositoryConfig {
    /// `<remote>/<branch>`, the ref merged and checked out from.
    pub fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// Resolve the managed directory for a repository rooted at `root`.
    pub fn resolve_managed_dir(&self, root: &Path) -> PathBuf {
        match &self.managed_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root.join(dir),
            None => {
                let root_is_tex = root
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("tex"));
                if root_is_tex {
                    root.to_path_buf()
                } else {
                    root.join("tex")
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Document discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Extension of the plain-text source form (no leading dot).
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Extension of the rich form (no leading dot).
    #[serde(default = "default_rich_extension")]
    pub rich_extension: String,

    /// Base name of the entry-point aggregator document.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    /// Glob patterns matched against file names; matches are scratch files.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Whether the entry-point document takes part in reconciliation.
    #[serde(default = "default_true")]
    pub include_entry_point: bool,
}

fn default_source_extension() -> String {
    "tex".into()
}
fn default_rich_extension() -> String {
    "lyx".into()
}
fn default_entry_point() -> String {
    "main".into()
}
fn default_exclude() -> Vec<String> {
    vec!["*temp*".into()]
}
fn default_true() -> bool {
    true
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            source_extension: default_source_extension(),
            rich_extension: default_rich_extension(),
            entry_point: default_entry_point(),
            exclude: default_exclude(),
            include_entry_point: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Structural markers owned by the entry-point document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    #[serde(default = "default_begin_marker")]
    pub begin_marker: String,

    #[serde(default = "default_end_marker")]
    pub end_marker: String,

    /// Lines starting with this prefix are raw-include directives.
    #[serde(default = "default_include_prefix")]
    pub include_prefix: String,
}

fn default_begin_marker() -> String {
    r"\begin{document}".into()
}
fn default_end_marker() -> String {
    r"\end{document}".into()
}
fn default_include_prefix() -> String {
    r"\include".into()
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            begin_marker: default_begin_marker(),
            end_marker: default_end_marker(),
            include_prefix: default_include_prefix(),
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Argument templates for the external converter. Each element may contain
/// `{source}` and `{rich}`, replaced with the document's paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Regenerates the source form from the rich form.
    #[serde(default = "default_rich_to_text")]
    pub rich_to_text: Vec<String>,

    /// Synthesizes the rich form from the source form.
    #[serde(default = "default_text_to_rich")]
    pub text_to_rich: Vec<String>,
}

fn default_rich_to_text() -> Vec<String> {
    ["lyx", "--export-to", "latex", SOURCE_PLACEHOLDER, "-f", RICH_PLACEHOLDER]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_text_to_rich() -> Vec<String> {
    ["tex2lyx", "-f", SOURCE_PLACEHOLDER]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            rich_to_text: default_rich_to_text(),
            text_to_rich: default_text_to_rich(),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Hook gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Marker file whose existence means "automation in progress". Must live
    /// outside the managed directory.
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,
}

fn default_marker_path() -> PathBuf {
    PathBuf::from("~/.formsync/hooks.disabled")
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            marker_path: default_marker_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflict handling
// ---------------------------------------------------------------------------

/// How an unresolved merge is brought to completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicyKind {
    /// Stage the remote version of every conflicting path and commit.
    #[default]
    AutoTheirs,
    /// Wait for a human to resolve the markers and commit.
    Interactive,
}

impl std::fmt::Display for ConflictPolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoTheirs => write!(f, "auto_theirs"),
            Self::Interactive => write!(f, "interactive"),
        }
    }
}

/// Merge-conflict wait settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    #[serde(default)]
    pub policy: ConflictPolicyKind,

    /// Milliseconds between merge-state polls (default 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up waiting after this many seconds. Unset waits forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            policy: ConflictPolicyKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: None,
        }
    }
}

impl ConflictConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Run-log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Console tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Run-log path. Defaults to `~/.formsync/<hook>.log`, outside the
    /// working tree so `git stash -u` leaves it alone.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Run-log path for the hook named `hook`.
    pub fn resolve_file(&self, hook: &str) -> PathBuf {
        match &self.file {
            Some(file) => file.clone(),
            None => expand_tilde(&PathBuf::from(format!("~/.formsync/{hook}.log"))),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Automation commit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Prefix distinguishing automation commits from human ones.
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "[hook]".into()
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self { tag: default_tag() }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl SyncConfig {
    /// Load a [`SyncConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let mut config: SyncConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.expand_paths();

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Load `path` when given, else `<repo_root>/.formsync.toml` when present,
    /// else the defaults. The result is validated.
    pub fn discover(explicit: Option<&Path>, repo_root: &Path) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let candidate = repo_root.join(DEFAULT_CONFIG_FILE);
                if candidate.exists() {
                    Self::load_from_file(candidate)?
                } else {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            }
        };
        config.expand_paths();
        config.validate()?;
        config.validate_gate_location(repo_root)?;
        Ok(config)
    }

    /// The gate marker must live outside the managed directory, or stashing
    /// and merging there would move it under a running reconciliation.
    pub fn validate_gate_location(&self, repo_root: &Path) -> Result<(), ConfigError> {
        let marker = repo_root.join(&self.gate.marker_path);
        let managed_dir = self.repository.resolve_managed_dir(repo_root);
        if marker.starts_with(&managed_dir) {
            return Err(invalid(
                "gate.marker_path",
                &format!("must lie outside the managed directory {}", managed_dir.display()),
            ));
        }
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let docs = &self.documents;
        if docs.source_extension.trim().is_empty() {
            return Err(invalid("documents.source_extension", "must not be empty"));
        }
        if docs.rich_extension.trim().is_empty() {
            return Err(invalid("documents.rich_extension", "must not be empty"));
        }
        if docs.source_extension == docs.rich_extension {
            return Err(invalid(
                "documents.rich_extension",
                "must differ from documents.source_extension",
            ));
        }
        if docs.entry_point.trim().is_empty() {
            return Err(invalid("documents.entry_point", "must not be empty"));
        }

        if self.envelope.begin_marker.is_empty() || self.envelope.end_marker.is_empty() {
            return Err(invalid("envelope", "begin_marker and end_marker must not be empty"));
        }

        validate_template(
            "converter.rich_to_text",
            &self.converter.rich_to_text,
            &[SOURCE_PLACEHOLDER, RICH_PLACEHOLDER],
        )?;
        validate_template(
            "converter.text_to_rich",
            &self.converter.text_to_rich,
            &[SOURCE_PLACEHOLDER],
        )?;

        if self.conflict.poll_interval_ms == 0 {
            return Err(invalid("conflict.poll_interval_ms", "poll interval must be > 0"));
        }
        if self.conflict.timeout_secs == Some(0) {
            return Err(invalid("conflict.timeout_secs", "timeout must be > 0 when set"));
        }

        if self.repository.remote.is_empty() || self.repository.branch.is_empty() {
            return Err(invalid("repository", "remote and branch must not be empty"));
        }
        if self.commit.tag.trim().is_empty() {
            return Err(invalid("commit.tag", "must not be empty"));
        }

        Ok(())
    }

    fn expand_paths(&mut self) {
        self.gate.marker_path = expand_tilde(&self.gate.marker_path);
        if let Some(file) = self.log.file.take() {
            self.log.file = Some(expand_tilde(&file));
        }
        if let Some(dir) = self.repository.managed_dir.take() {
            self.repository.managed_dir = Some(expand_tilde(&dir));
        }
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

fn validate_template(field: &str, template: &[String], required: &[&str]) -> Result<(), ConfigError> {
    if template.first().map_or(true, |p| p.trim().is_empty()) {
        return Err(invalid(field, "converter command must not be empty"));
    }
    for placeholder in required {
        if !template.iter().any(|arg| arg.contains(placeholder)) {
            return Err(ConfigError::InvalidValue {
                field: field.into(),
                detail: format!("missing placeholder {placeholder}"),
            });
        }
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
