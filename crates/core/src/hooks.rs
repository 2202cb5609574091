//! Git hook installation.
//!
//! Writes small shell scripts into the repository's hooks directory that
//! hand control to the `formsync` binary. Scripts we wrote are recognised by
//! a marker line and may be rewritten freely; anything else needs `force`.

use std::fs;
use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{info, warn};

use crate::errors::HookError;

/// First comment line of every script we install.
pub const HOOK_MARKER: &str = "# installed by formsync";

/// Hooks that drive the workflow, with the subcommand each one runs.
pub const MANAGED_HOOKS: &[(&str, &str)] = &[("post-merge", "post-merge"), ("pre-commit", "pre-commit")];

/// Hooks directory of the repository containing `path`.
pub fn hooks_dir(path: &Path) -> Result<PathBuf, HookError> {
    let repo = Repository::discover(path)?;
    Ok(repo.path().join("hooks"))
}

/// Render the script for one hook.
pub fn hook_script(binary: &str, subcommand: &str) -> String {
    format!("#!/bin/sh\n{HOOK_MARKER}\nexec \"{binary}\" {subcommand} \"$@\"\n")
}

/// Install every managed hook for the repository containing `repo_path`.
/// Returns the paths written.
pub fn install(repo_path: &Path, binary: &str, force: bool) -> Result<Vec<PathBuf>, HookError> {
    let dir = hooks_dir(repo_path)?;
    fs::create_dir_all(&dir)?;

    // Check everything first so a refusal leaves no hook half-installed.
    let targets: Vec<_> = MANAGED_HOOKS
        .iter()
        .map(|(name, subcommand)| (dir.join(name), *subcommand))
        .collect();
    for (path, _) in &targets {
        if is_foreign(path)? {
            if !force {
                return Err(HookError::AlreadyExists(path.clone()));
            }
            warn!(hook = %path.display(), "overwriting existing hook");
        }
    }

    let mut written = Vec::with_capacity(targets.len());
    for (path, subcommand) in targets {
        fs::write(&path, hook_script(binary, subcommand))?;
        make_executable(&path)?;
        info!(hook = %path.display(), "installed hook");
        written.push(path);
    }
    Ok(written)
}

fn is_foreign(path: &Path) -> Result<bool, HookError> {
    if !path.exists() {
        return Ok(false);
    }
    let contents = fs::read_to_string(path).unwrap_or_default();
    Ok(!contents.lines().any(|l| l.trim() == HOOK_MARKER))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_writes_both_hooks() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();

        let written = install(dir.path(), "/usr/local/bin/formsync", false).unwrap();
        assert_eq!(written.len(), 2);

        let post_merge = fs::read_to_string(dir.path().join(".git/hooks/post-merge")).unwrap();
        assert!(post_merge.starts_with("#!/bin/sh\n"));
        assert!(post_merge.contains("\"/usr/local/bin/formsync\" post-merge"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join(".git/hooks/pre-commit"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        // Our own scripts are rewritten without force.
        install(dir.path(), "formsync", false).unwrap();
    }

    #[test]
    fn test_foreign_hook_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let hooks = hooks_dir(dir.path()).unwrap();
        fs::create_dir_all(&hooks).unwrap();
        fs::write(hooks.join("pre-commit"), "#!/bin/sh\nmake lint\n").unwrap();

        let err = install(dir.path(), "formsync", false).unwrap_err();
        assert!(matches!(err, HookError::AlreadyExists(_)));
        assert!(!hooks.join("post-merge").exists());

        install(dir.path(), "formsync", true).unwrap();
        let contents = fs::read_to_string(hooks.join("pre-commit")).unwrap();
        assert!(contents.contains(HOOK_MARKER));
    }
}
