//! Git-status-aware removal of files found in the wrong place.
//!
//! Untracked and committed-clean files can be deleted because nothing is
//! lost. Files with uncommitted edits are renamed to a backup instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::check::FixError;
use crate::probe::GitStatusProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitFileStatus {
    Untracked,
    TrackedClean,
    TrackedModified,
    NotInRepo,
}

impl GitFileStatus {
    /// Detail text for a wrong-location file in this state.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Untracked => "wrong location, untracked (safe to delete)",
            Self::TrackedClean => "wrong location, tracked but unmodified (safe to delete)",
            Self::TrackedModified => {
                "wrong location, tracked with local modifications (manual review needed)"
            }
            Self::NotInRepo => "wrong location (inside source repo)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    Delete,
    BackupRename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Deleted,
    BackedUp(PathBuf),
    /// Nothing at the path any more.
    AlreadyGone,
}

/// Classify `path` against its enclosing repository. Query failures are
/// treated as modified so the file is preserved.
pub fn classify_git_status(git: &dyn GitStatusProvider, path: &Path) -> GitFileStatus {
    let dir = path.parent().unwrap_or(path);
    let Some(repo) = git.repo_root(dir) else {
        return GitFileStatus::NotInRepo;
    };
    match git.is_tracked(&repo, path) {
        Ok(false) => return GitFileStatus::Untracked,
        Ok(true) => {}
        Err(_) => return GitFileStatus::TrackedModified,
    }
    match git.is_modified(&repo, path) {
        Ok(false) => GitFileStatus::TrackedClean,
        Ok(true) | Err(_) => GitFileStatus::TrackedModified,
    }
}

pub fn decide_repair(status: GitFileStatus) -> RepairAction {
    match status {
        GitFileStatus::TrackedModified => RepairAction::BackupRename,
        GitFileStatus::Untracked | GitFileStatus::TrackedClean | GitFileStatus::NotInRepo => {
            RepairAction::Delete
        }
    }
}

/// Classify, decide and act on one file.
pub fn repair_file(git: &dyn GitStatusProvider, path: &Path) -> Result<RepairOutcome, FixError> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(RepairOutcome::AlreadyGone);
    }
    let status = classify_git_status(git, path);
    apply_repair(path, decide_repair(status))
}

pub fn apply_repair(path: &Path, action: RepairAction) -> Result<RepairOutcome, FixError> {
    match action {
        RepairAction::Delete => match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted wrong-location file");
                Ok(RepairOutcome::Deleted)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(RepairOutcome::AlreadyGone)
            }
            Err(err) => Err(FixError::io("remove", path, err)),
        },
        RepairAction::BackupRename => {
            let backup = backup_path(path);
            fs::rename(path, &backup).map_err(|err| FixError::io("rename", path, err))?;
            info!(
                path = %path.display(),
                backup = %backup.display(),
                "preserved modified file as backup"
            );
            Ok(RepairOutcome::BackedUp(backup))
        }
    }
}

/// `<path>.bak.<unix seconds>`, with a counter appended when taken.
pub fn backup_path(path: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let base = format!("{}.bak.{secs}", path.display());
    let mut candidate = PathBuf::from(&base);
    let mut n = 1;
    while fs::symlink_metadata(&candidate).is_ok() {
        candidate = PathBuf::from(format!("{base}.{n}"));
        n += 1;
    }
    candidate
}

/// Remove `dir` if it is an empty directory; anything else is left alone.
pub fn remove_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty && fs::remove_dir(dir).is_ok() {
        info!(dir = %dir.display(), "removed empty directory");
    }
}
