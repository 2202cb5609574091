//! Version-control primitives used by the reconciliation workflow.
//!
//! History-mutating operations shell out to `git` through the
//! [`CommandRunner`] so that hook bypass flags and the run log behave exactly
//! like a user's command line. Read-only queries go through `git2`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Oid, Repository};
use tracing::{debug, info, instrument, warn};

use crate::errors::VcsError;
use crate::runner::{CommandOutput, CommandRunner, ExecOptions};

/// Local edits moved out of the working tree by [`GitClient::stash_push`].
///
/// Owned by exactly one run. Pass it back to [`GitClient::stash_pop`] on
/// every path, including failures.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a stash must be restored with GitClient::stash_pop"]
pub struct StashSet {
    oid: Oid,
}

impl StashSet {
    pub fn id(&self) -> String {
        self.oid.to_string()
    }
}

/// Git operations scoped to one repository.
#[derive(Debug, Clone)]
pub struct GitClient {
    runner: Arc<CommandRunner>,
    repo_root: PathBuf,
}

impl GitClient {
    /// Find the working-tree root of the repository containing `path`.
    pub fn discover_root(path: &Path) -> Result<PathBuf, VcsError> {
        let repo = Repository::discover(path)
            .map_err(|_| VcsError::RepositoryNotFound(path.display().to_string()))?;
        repo.workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| VcsError::RepositoryNotFound(format!("{} (bare)", path.display())))
    }

    /// `runner` should run commands from `repo_root`.
    pub fn new(runner: Arc<CommandRunner>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn open(&self) -> Result<Repository, VcsError> {
        Repository::open(&self.repo_root)
            .map_err(|_| VcsError::RepositoryNotFound(self.repo_root.display().to_string()))
    }

    /// Path as git should see it: relative to the repository root.
    fn rel(&self, path: &Path) -> String {
        path.strip_prefix(&self.repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    async fn git(&self, step: &'static str, args: &[&str]) -> Result<CommandOutput, VcsError> {
        self.git_with(step, args, ExecOptions::default()).await
    }

    async fn git_with(
        &self,
        step: &'static str,
        args: &[&str],
        opts: ExecOptions,
    ) -> Result<CommandOutput, VcsError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("git");
        argv.extend_from_slice(args);
        self.runner
            .execute(&argv, opts)
            .await
            .map_err(|source| VcsError::CommandFailed { step, source })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Commit id HEAD points at.
    pub fn head_sha(&self) -> Result<String, VcsError> {
        let repo = self.open()?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| VcsError::NoHead(e.message().to_string()))?;
        Ok(head.id().to_string())
    }

    /// Current `refs/stash` target, if any stash exists.
    fn stash_top(&self) -> Result<Option<Oid>, VcsError> {
        let repo = self.open()?;
        Ok(repo.refname_to_id("refs/stash").ok())
    }

    /// Whether `path` exists in the tree of `reference`.
    pub fn exists_at(&self, reference: &str, path: &Path) -> Result<bool, VcsError> {
        let repo = self.open()?;
        let tree = repo.revparse_single(reference)?.peel_to_tree()?;
        let rel = path.strip_prefix(&self.repo_root).unwrap_or(path);
        Ok(tree.get_path(rel).is_ok())
    }

    /// Repository-relative paths with unresolved conflicts.
    pub async fn unmerged_paths(&self) -> Result<Vec<String>, VcsError> {
        let out = self
            .git("diff", &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Commits
    // -----------------------------------------------------------------------

    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn stage(&self, path: &Path) -> Result<(), VcsError> {
        let rel = self.rel(path);
        self.git("add", &["add", "--", &rel]).await?;
        Ok(())
    }

    /// Create a checkpoint commit: empty commits allowed, hooks bypassed.
    #[instrument(skip(self))]
    pub async fn commit_checkpoint(&self, message: &str) -> Result<String, VcsError> {
        self.git(
            "commit",
            &["commit", "--allow-empty", "--no-verify", "-m", message],
        )
        .await?;
        let sha = self.head_sha()?;
        info!(%sha, message, "created checkpoint");
        Ok(sha)
    }

    // -----------------------------------------------------------------------
    // Stash
    // -----------------------------------------------------------------------

    /// Stash all uncommitted changes, untracked files included. Returns
    /// `None` when there was nothing to stash.
    #[instrument(skip(self))]
    pub async fn stash_push(&self) -> Result<Option<StashSet>, VcsError> {
        let before = self.stash_top()?;
        self.git("stash", &["stash", "push", "-u"]).await?;
        let after = self.stash_top()?;
        match after {
            Some(oid) if after != before => {
                info!(stash = %oid, "stashed local changes");
                Ok(Some(StashSet { oid }))
            }
            _ => {
                debug!("nothing to stash");
                Ok(None)
            }
        }
    }

    /// Restore a stash created by [`stash_push`](Self::stash_push). Failure to
    /// pop is tolerated and reported as `false`; the stash stays in the list.
    #[instrument(skip(self, stash), fields(stash = %stash.oid))]
    pub async fn stash_pop(&self, stash: StashSet) -> Result<bool, VcsError> {
        if self.stash_top()? != Some(stash.oid) {
            warn!("our stash is no longer on top, leaving it in the stash list");
            return Ok(false);
        }
        let out = self
            .git_with("stash", &["stash", "pop"], ExecOptions::default().tolerate_failure())
            .await?;
        if out.success() {
            info!("restored stashed changes");
            Ok(true)
        } else {
            warn!(stderr = %out.stderr.trim(), "stash pop failed, changes remain stashed");
            Ok(false)
        }
    }

    // -----------------------------------------------------------------------
    // Remote
    // -----------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn fetch(&self, remote: &str) -> Result<(), VcsError> {
        self.git("fetch", &["fetch", remote]).await?;
        Ok(())
    }

    /// Non-fast-forward merge of `remote_ref`, hooks bypassed. A non-zero
    /// exit is returned, not raised: conflicts must be judged from the
    /// repository state.
    #[instrument(skip(self))]
    pub async fn merge(&self, remote_ref: &str, message: &str) -> Result<CommandOutput, VcsError> {
        self.git_with(
            "merge",
            &["merge", "-v", "--no-ff", "--no-verify", remote_ref, "-m", message],
            ExecOptions::default().tolerate_failure(),
        )
        .await
    }

    /// Resolve every conflicted path with the remote side and commit.
    #[instrument(skip(self))]
    pub async fn accept_theirs(&self, message: &str) -> Result<usize, VcsError> {
        let paths = self.unmerged_paths().await?;
        for path in &paths {
            let checkout = self
                .git_with(
                    "checkout",
                    &["checkout", "--theirs", "--", path],
                    ExecOptions::default().tolerate_failure(),
                )
                .await?;
            if checkout.success() {
                self.git("add", &["add", "--", path]).await?;
            } else {
                // No remote version: the remote deleted it.
                self.git("rm", &["rm", "--quiet", "--", path]).await?;
            }
        }
        self.git("commit", &["commit", "--no-verify", "-m", message])
            .await?;
        warn!(count = paths.len(), "accepted remote version of conflicting paths");
        Ok(paths.len())
    }

    // -----------------------------------------------------------------------
    // Rewind & reconcile
    // -----------------------------------------------------------------------

    /// Move HEAD to `target`, leaving index and working tree untouched.
    #[instrument(skip(self))]
    pub async fn reset_soft(&self, target: &str) -> Result<(), VcsError> {
        self.git("reset", &["reset", "--soft", target]).await?;
        Ok(())
    }

    /// Unified diff between `reference` and the working-tree `path`.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn diff_against(&self, reference: &str, path: &Path) -> Result<String, VcsError> {
        let rel = self.rel(path);
        let out = self.git("diff", &["diff", reference, "--", &rel]).await?;
        Ok(out.stdout)
    }

    /// Overwrite `path` in index and working tree with its `reference` version.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn checkout_from(&self, reference: &str, path: &Path) -> Result<(), VcsError> {
        let rel = self.rel(path);
        self.git("checkout", &["checkout", reference, "--", &rel])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::process::Command;

    use super::*;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn init_repo(dir: &Path) -> GitClient {
        let repo = Repository::init(dir).unwrap();
        let mut cfg = repo.config().unwrap();
        cfg.set_str("user.name", "Test").unwrap();
        cfg.set_str("user.email", "test@test.com").unwrap();
        cfg.set_bool("commit.gpgsign", false).unwrap();
        fs::write(dir.join("README"), "readme\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        GitClient::new(Arc::new(CommandRunner::new(dir)), dir)
    }

    #[tokio::test]
    async fn test_checkpoint_and_soft_reset() {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path());
        let anchor = git.head_sha().unwrap();

        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        git.stage(&dir.path().join("a.txt")).await.unwrap();
        let first = git.commit_checkpoint("[hook] Backup a.txt").await.unwrap();
        let second = git.commit_checkpoint("[hook] empty").await.unwrap();
        assert_ne!(first, second);

        git.reset_soft(&anchor).await.unwrap();
        assert_eq!(git.head_sha().unwrap(), anchor);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a\n");

        let repo = Repository::open(dir.path()).unwrap();
        let status = repo.status_file(Path::new("a.txt")).unwrap();
        assert!(status.contains(git2::Status::INDEX_NEW));
    }

    #[tokio::test]
    async fn test_stash_push_without_changes_owns_nothing() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path());
        assert_eq!(git.stash_push().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stash_round_trip_includes_untracked() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path());
        fs::write(dir.path().join("README"), "edited\n").unwrap();
        fs::write(dir.path().join("scratch.txt"), "new\n").unwrap();

        let stash = git.stash_push().await.unwrap().expect("stash created");
        assert_eq!(fs::read_to_string(dir.path().join("README")).unwrap(), "readme\n");
        assert!(!dir.path().join("scratch.txt").exists());

        assert!(git.stash_pop(stash).await.unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("README")).unwrap(), "edited\n");
        assert!(dir.path().join("scratch.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_typed() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = init_repo(dir.path());
        let err = git.fetch("nowhere").await.unwrap_err();
        assert!(matches!(err, VcsError::CommandFailed { step: "fetch", .. }));
    }

    #[test]
    fn test_discover_root() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        fs::create_dir(dir.path().join("tex")).unwrap();
        let root = GitClient::discover_root(&dir.path().join("tex")).unwrap();
        assert_eq!(
            root.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
