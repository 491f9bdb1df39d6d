//! Working-tree rollback for plan repositories

use std::path::Path;

use git2::{build::CheckoutBuilder, Repository, ResetType, Status, StatusOptions};
use tracing::{debug, warn};

use crate::error::{RepoError, RepoResult};

/// Clear every uncommitted change in the plan repository
///
/// Tracked files are hard-reset to HEAD; untracked files and directories
/// are removed. A repository with no commits yet only gets the untracked
/// cleanup.
pub fn clear_uncommitted_changes(repo_dir: &Path) -> RepoResult<()> {
    debug!(repo = %repo_dir.display(), "clearing uncommitted changes");
    let repo = Repository::open(repo_dir)?;

    if let Ok(head) = repo.head() {
        if let Some(target) = head.target() {
            let commit = repo.find_object(target, None)?;
            let mut checkout = CheckoutBuilder::new();
            checkout.force();
            repo.reset(&commit, ResetType::Hard, Some(&mut checkout))?;
        }
    }

    remove_untracked(&repo, repo_dir)
}

fn remove_untracked(repo: &Repository, repo_dir: &Path) -> RepoResult<()> {
    let mut options = StatusOptions::new();
    options.include_untracked(true).recurse_untracked_dirs(true);
    let statuses = repo.statuses(Some(&mut options))?;

    for entry in statuses.iter() {
        if !entry.status().contains(Status::WT_NEW) {
            continue;
        }
        let Some(rel) = entry.path() else { continue };
        let path = repo_dir.join(rel);
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(err) = removed {
            warn!(path = %path.display(), "failed to remove untracked path: {err}");
            return Err(RepoError::Rollback(format!(
                "removing {}: {err}",
                path.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn init_repo_with_commit(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("a.txt"), "original\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("a.txt")).unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = Signature::now("test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .unwrap();
        }
        repo
    }

    #[test]
    fn resets_modified_tracked_file() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());

        std::fs::write(dir.path().join("a.txt"), "dirty\n").unwrap();
        clear_uncommitted_changes(dir.path()).unwrap();

        let body = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert_eq!(body, "original\n");
    }

    #[test]
    fn removes_untracked_files() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());

        std::fs::write(dir.path().join("new.txt"), "partial\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/inner.txt"), "partial\n").unwrap();
        clear_uncommitted_changes(dir.path()).unwrap();

        assert!(!dir.path().join("new.txt").exists());
        assert!(!dir.path().join("sub/inner.txt").exists());
    }

    #[test]
    fn clean_repo_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        init_repo_with_commit(dir.path());
        clear_uncommitted_changes(dir.path()).unwrap();
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn missing_repo_errors() {
        let dir = TempDir::new().unwrap();
        assert!(clear_uncommitted_changes(dir.path()).is_err());
    }
}
