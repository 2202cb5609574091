//! External command execution with logging and typed failures.
//!
//! Every invocation is recorded in the runner's history and logged (command
//! text, exit code, truncated output) whatever the outcome. A non-zero exit
//! becomes [`CommandError::Failed`] unless the caller tolerates it. Commands
//! are not transactional: a failure says nothing about which of the
//! command's effects already happened.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::errors::CommandError;

/// Per-stream cap on output kept in logs and history.
pub const MAX_LOGGED_OUTPUT: usize = 4096;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a single invocation treats failure and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Turn a non-zero exit into an error.
    pub fail_on_non_zero: bool,
    /// Keep stdout/stderr out of the log. The exit code is still checked.
    pub silent: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            fail_on_non_zero: true,
            silent: false,
        }
    }
}

impl ExecOptions {
    pub fn tolerate_failure(mut self) -> Self {
        self.fail_on_non_zero = false;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// One entry of the run log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: String,
    /// `None` when the process could not be started.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs in a fixed working directory.
#[derive(Debug)]
pub struct CommandRunner {
    cwd: PathBuf,
    history: Mutex<Vec<CommandRecord>>,
}

impl CommandRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Run with default options: fail on non-zero, log output.
    pub async fn run<S: AsRef<str>>(&self, argv: &[S]) -> Result<CommandOutput, CommandError> {
        self.execute(argv, ExecOptions::default()).await
    }

    /// Run `argv[0]` with the remaining elements as arguments.
    #[instrument(skip_all, fields(cmd = %render(argv)))]
    pub async fn execute<S: AsRef<str>>(
        &self,
        argv: &[S],
        opts: ExecOptions,
    ) -> Result<CommandOutput, CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
        let program = program.as_ref();
        let command = render(argv);
        debug!(%command, "executing");

        let spawned = Command::new(program)
            .args(args.iter().map(|a| a.as_ref()))
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match spawned {
            Ok(output) => output,
            Err(e) => {
                error!(%command, error = %e, "command could not be started");
                self.record(CommandRecord {
                    command,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                });
                return Err(if e.kind() == std::io::ErrorKind::NotFound {
                    CommandError::NotFound(program.to_string())
                } else {
                    CommandError::IoError(e)
                });
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        let (stdout, stderr) = if opts.silent {
            (String::new(), String::new())
        } else {
            (truncate(&result.stdout), truncate(&result.stderr))
        };
        debug!(exit_code = result.exit_code, %stdout, %stderr, "command finished");
        self.record(CommandRecord {
            command: command.clone(),
            exit_code: Some(result.exit_code),
            stdout,
            stderr,
        });

        if opts.fail_on_non_zero && !result.success() {
            error!(%command, exit_code = result.exit_code, "command failed");
            error!(stderr = %truncate(&result.stderr), stdout = %truncate(&result.stdout), "error output");
            return Err(CommandError::Failed {
                command,
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    /// Every command executed so far, oldest first.
    pub fn history(&self) -> Vec<CommandRecord> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forget the recorded history (start of a new run).
    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn record(&self, entry: CommandRecord) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

/// Render an argv as a single shell-like line for logs.
pub fn render<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| {
            let a = a.as_ref();
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{a}'")
            } else {
                a.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_LOGGED_OUTPUT {
        return text.to_string();
    }
    let mut end = MAX_LOGGED_OUTPUT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [{} bytes truncated]", &text[..end], text.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quotes_whitespace() {
        assert_eq!(
            render(&["git", "commit", "-m", "[hook] Backup intro.lyx"]),
            "git commit -m '[hook] Backup intro.lyx'"
        );
        assert_eq!(render(&["echo", ""]), "echo ''");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(MAX_LOGGED_OUTPUT);
        let cut = truncate(&long);
        assert!(cut.contains("bytes truncated"));
        assert!(truncate("short") == "short");
    }

    #[tokio::test]
    async fn test_successful_command_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(dir.path());
        let out = runner.run(&["sh", "-c", "echo hello"]).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");

        let history = runner.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exit_code, Some(0));
        assert_eq!(history[0].stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(dir.path());
        let err = runner
            .run(&["sh", "-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            CommandError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.history()[0].exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_tolerated_failure_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(dir.path());
        let out = runner
            .execute(&["sh", "-c", "exit 1"], ExecOptions::default().tolerate_failure())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
    }

    #[tokio::test]
    async fn test_silent_hides_output_but_still_checks_exit() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(dir.path());
        let out = runner
            .execute(&["sh", "-c", "echo secret"], ExecOptions::default().silent())
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "secret");
        assert!(runner.history()[0].stdout.is_empty());

        let err = runner
            .execute(&["sh", "-c", "exit 2"], ExecOptions::default().silent())
            .await;
        assert!(matches!(err, Err(CommandError::Failed { exit_code: 2, .. })));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new(dir.path());
        let err = runner
            .run(&["definitely-not-a-real-program-formsync"])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
        assert_eq!(runner.history()[0].exit_code, None);

        let empty: [&str; 0] = [];
        assert!(matches!(runner.run(&empty).await, Err(CommandError::Empty)));
    }
}
