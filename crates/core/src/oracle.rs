//! Conflict oracle: is a merge currently unresolved?
//!
//! Answered from scratch on every call by resolving `MERGE_HEAD`, since a
//! human or another process may conclude the merge at any moment. Failure to
//! resolve the reference is the normal "no merge in progress" answer.

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, warn};

use crate::errors::VcsError;

/// Anything that can report whether a merge is unresolved.
pub trait MergeState {
    fn is_merge_in_progress(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ConflictOracle {
    repo_root: PathBuf,
}

impl ConflictOracle {
    /// Fails if `repo_root` is not a git repository.
    pub fn new<P: AsRef<Path>>(repo_root: P) -> Result<Self, VcsError> {
        let path = repo_root.as_ref();
        Repository::open(path)
            .map_err(|_| VcsError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self {
            repo_root: path.to_path_buf(),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

impl MergeState for ConflictOracle {
    fn is_merge_in_progress(&self) -> bool {
        let repo = match Repository::open(&self.repo_root) {
            Ok(repo) => repo,
            Err(e) => {
                warn!(error = %e, "could not open repository, assuming no merge");
                return false;
            }
        };
        let merging = repo
            .find_reference("MERGE_HEAD")
            .and_then(|r| r.peel_to_commit())
            .is_ok();
        debug!(merging, "checked merge state");
        merging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_merge_head_presence() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("T", "t@t.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();

        let oracle = ConflictOracle::new(dir.path()).unwrap();
        assert!(!oracle.is_merge_in_progress());

        std::fs::write(repo.path().join("MERGE_HEAD"), format!("{oid}\n")).unwrap();
        assert!(oracle.is_merge_in_progress());

        std::fs::remove_file(repo.path().join("MERGE_HEAD")).unwrap();
        assert!(!oracle.is_merge_in_progress());
    }

    #[test]
    fn test_garbage_merge_head_is_not_a_merge() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(repo.path().join("MERGE_HEAD"), "not-a-sha\n").unwrap();

        let oracle = ConflictOracle::new(dir.path()).unwrap();
        assert!(!oracle.is_merge_in_progress());
    }

    #[test]
    fn test_not_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConflictOracle::new(dir.path()),
            Err(VcsError::RepositoryNotFound(_))
        ));
    }
}
