//! Error types for the formsync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`ReconcileError`] is the document-level error the orchestrator records.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Command runner errors
// ---------------------------------------------------------------------------

/// Errors from executing an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program was not found on `$PATH`.
    #[error("program not found: {0}")]
    NotFound(String),

    /// The command exited with a non-zero status.
    #[error("command failed (exit {exit_code}): {command}: {}", summarize(.stderr, .stdout))]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The command line was empty.
    #[error("empty command")]
    Empty,

    /// Generic I/O wrapper (spawn or pipe failure).
    #[error("command I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn summarize<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        stdout.trim()
    } else {
        stderr
    }
}

// ---------------------------------------------------------------------------
// Converter errors
// ---------------------------------------------------------------------------

/// Errors from the external format converter.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The converter exited non-zero or could not be started.
    #[error("conversion of '{}' failed: {source}", .path.display())]
    ConverterFailed {
        path: PathBuf,
        #[source]
        source: CommandError,
    },

    /// The converter reported success but did not produce its output file.
    #[error("converter did not produce '{}'", .0.display())]
    MissingOutput(PathBuf),

    /// Reading or rewriting a converted file failed.
    #[error("conversion I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Version-control errors
// ---------------------------------------------------------------------------

/// Errors from version-control operations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// A `git` command failed.
    #[error("git {step} failed: {source}")]
    CommandFailed {
        step: &'static str,
        #[source]
        source: CommandError,
    },

    /// The path is not inside a git repository.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// HEAD does not point at a commit (e.g. an unborn branch).
    #[error("HEAD does not resolve to a commit: {0}")]
    NoHead(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

/// Document-level failures raised by the reconciliation workflow.
///
/// Each of these aborts processing of one document only.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The converter failed for this document.
    #[error("conversion failure: {0}")]
    Conversion(#[from] ConversionError),

    /// A version-control step failed.
    #[error("version control failure: {0}")]
    Vcs(#[from] VcsError),

    /// A bounded conflict wait elapsed with the merge still unresolved.
    #[error("merge conflict still unresolved after {waited_secs}s")]
    ConflictTimeout { waited_secs: u64 },

    /// Another process holds the hook gate.
    #[error("hook gate already held at '{}'", .0.display())]
    GateHeld(PathBuf),

    /// Generic I/O wrapper.
    #[error("reconcile I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Hook installation errors
// ---------------------------------------------------------------------------

/// Errors from installing git hook scripts.
#[derive(Debug, Error)]
pub enum HookError {
    /// A hook with foreign content already exists.
    #[error("refusing to overwrite existing hook '{}' (use --force)", .0.display())]
    AlreadyExists(PathBuf),

    /// Repository lookup failed.
    #[error("hook install git error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O error.
    #[error("hook install I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = CommandError::Failed {
            command: "git fetch".into(),
            exit_code: 128,
            stdout: String::new(),
            stderr: "fatal: unable to access remote\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "command failed (exit 128): git fetch: fatal: unable to access remote"
        );

        let err = CommandError::Failed {
            command: "git merge".into(),
            exit_code: 1,
            stdout: "CONFLICT (content)".into(),
            stderr: "  ".into(),
        };
        assert!(err.to_string().ends_with("CONFLICT (content)"));

        let err = ReconcileError::ConflictTimeout { waited_secs: 30 };
        assert!(err.to_string().contains("30s"));

        let err = ConfigError::InvalidValue {
            field: "conflict.poll_interval_ms".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_subsystem_error_converts_to_reconcile() {
        let vcs = VcsError::CommandFailed {
            step: "fetch",
            source: CommandError::NotFound("git".into()),
        };
        let reconcile: ReconcileError = vcs.into();
        assert!(matches!(reconcile, ReconcileError::Vcs(_)));
    }
}
