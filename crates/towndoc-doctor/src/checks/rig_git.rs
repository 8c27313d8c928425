//! The rig's authoritative clone at `<rig>/mayor/rig`.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::probe::GitStatusProvider;
use crate::types::{Category, CheckContext, CheckResult};

/// Directories agents create next to the clone's tracked files.
pub const REQUIRED_EXCLUDES: [&str; 4] = ["polecats/", "witness/", "refinery/", "mayor/"];
const EXCLUDE_HEADER: &str = "# Gas Town directories";

fn mayor_clone(rig_path: &Path) -> PathBuf {
    rig_path.join("mayor").join("rig")
}

fn skipped() -> Outcome {
    CheckResult::ok("No rig specified (skipped)").into()
}

pub struct RigIsGitRepoCheck {
    git: Arc<dyn GitStatusProvider>,
}

impl RigIsGitRepoCheck {
    pub fn new(git: Arc<dyn GitStatusProvider>) -> Self {
        Self { git }
    }
}

impl Check for RigIsGitRepoCheck {
    fn name(&self) -> &'static str {
        "rig-is-git-repo"
    }

    fn description(&self) -> &'static str {
        "Verify the rig has a working mayor/rig clone"
    }

    fn category(&self) -> Category {
        Category::Rig
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let Some(rig_path) = ctx.rig_path() else {
            return skipped();
        };
        let clone = mayor_clone(&rig_path);
        let git_path = clone.join(".git");
        let meta = match fs::metadata(&git_path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return CheckResult::error("No mayor/rig clone found")
                    .with_detail(format!("Missing: {}", git_path.display()))
                    .with_hint("Clone the repository to mayor/rig/")
                    .into();
            }
            Err(err) => {
                return CheckResult::error(format!("Cannot access mayor/rig/.git: {err}")).into()
            }
        };

        if let Err(err) = self.git.status_porcelain(&clone) {
            return CheckResult::error("git status failed on mayor/rig")
                .with_detail(format!("Error: {err}"))
                .with_hint("Check git configuration and repository integrity")
                .into();
        }
        let kind = if meta.is_file() { "worktree" } else { "clone" };
        CheckResult::ok(format!("Valid mayor/rig {kind}")).into()
    }
}

#[derive(Debug)]
struct MissingExcludes {
    path: PathBuf,
    entries: Vec<String>,
}

/// Keeps agent directories out of `git status` in the mayor clone.
pub struct GitExcludeCheck {
    git: Arc<dyn GitStatusProvider>,
}

impl GitExcludeCheck {
    pub fn new(git: Arc<dyn GitStatusProvider>) -> Self {
        Self { git }
    }
}

/// Non-comment patterns already in an exclude file.
fn existing_excludes(path: &Path) -> std::io::Result<BTreeSet<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(err) => Err(err),
    }
}

impl Check for GitExcludeCheck {
    fn name(&self) -> &'static str {
        "git-exclude-configured"
    }

    fn description(&self) -> &'static str {
        "Check .git/info/exclude has Gas Town directories"
    }

    fn category(&self) -> Category {
        Category::Rig
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let Some(rig_path) = ctx.rig_path() else {
            return skipped();
        };
        let clone = mayor_clone(&rig_path);
        if fs::symlink_metadata(clone.join(".git")).is_err() {
            return CheckResult::warning("No mayor/rig clone found")
                .with_hint("Run rig-is-git-repo check first")
                .into();
        }
        let git_dir = match self.git.common_dir(&clone) {
            Ok(dir) => dir,
            Err(err) => {
                return CheckResult::error("Cannot resolve the mayor/rig git directory")
                    .with_detail(err)
                    .into()
            }
        };

        let path = git_dir.join("info").join("exclude");
        let existing = match existing_excludes(&path) {
            Ok(existing) => existing,
            Err(err) => {
                return CheckResult::error(format!("Cannot read {}: {err}", path.display())).into()
            }
        };
        let missing: Vec<String> = REQUIRED_EXCLUDES
            .iter()
            .filter(|entry| !existing.contains(**entry))
            .map(|entry| entry.to_string())
            .collect();
        if missing.is_empty() {
            return CheckResult::ok("Git exclude properly configured").into();
        }

        let result = CheckResult::warning(format!(
            "{} Gas Town directories not excluded",
            missing.len()
        ))
        .with_detail(format!("Missing: {}", missing.join(", ")))
        .with_hint("Run with --fix to add missing entries");
        Outcome::new(
            result,
            RepairPlan::new(MissingExcludes {
                path,
                entries: missing,
            }),
        )
    }

    fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(MissingExcludes { path, entries }) = plan.get::<MissingExcludes>() else {
            return Ok(());
        };
        let existing = existing_excludes(path).map_err(|err| FixError::io("read", path, err))?;
        let entries: Vec<&String> = entries.iter().filter(|e| !existing.contains(*e)).collect();
        if entries.is_empty() {
            return Ok(());
        }

        if let Some(info_dir) = path.parent() {
            fs::create_dir_all(info_dir).map_err(|err| FixError::io("create", info_dir, err))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| FixError::io("open", path, err))?;
        let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(true);

        let mut block = String::new();
        if !empty {
            block.push('\n');
        }
        block.push_str(EXCLUDE_HEADER);
        block.push('\n');
        for entry in &entries {
            block.push_str(entry);
            block.push('\n');
        }
        file.write_all(block.as_bytes())
            .map_err(|err| FixError::io("write", path, err))?;
        info!(path = %path.display(), added = entries.len(), "added git excludes");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::probe::InMemoryGit;
    use crate::types::CheckStatus;

    #[test]
    fn checks_skip_without_a_rig() {
        let git: Arc<dyn GitStatusProvider> = Arc::new(InMemoryGit::default());
        let ctx = CheckContext::new("/town");
        assert_eq!(
            RigIsGitRepoCheck::new(git.clone()).run(&ctx).result.status,
            CheckStatus::Ok
        );
        assert_eq!(GitExcludeCheck::new(git).run(&ctx).result.status, CheckStatus::Ok);
    }

    #[test]
    fn clone_and_worktree_are_recognized() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let clone = town.join("gastown/mayor/rig");
        fs::create_dir_all(clone.join(".git")).unwrap();
        let check = RigIsGitRepoCheck::new(Arc::new(InMemoryGit::default().repo(&clone)));
        let ctx = CheckContext::new(town).with_rig("gastown");
        assert_eq!(check.run(&ctx).result.message, "Valid mayor/rig clone");

        fs::remove_dir_all(clone.join(".git")).unwrap();
        fs::write(clone.join(".git"), "gitdir: /elsewhere\n").unwrap();
        assert_eq!(check.run(&ctx).result.message, "Valid mayor/rig worktree");
    }

    #[test]
    fn missing_clone_and_broken_status_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let ctx = CheckContext::new(town).with_rig("gastown");
        let clone = town.join("gastown/mayor/rig");

        let check = RigIsGitRepoCheck::new(Arc::new(InMemoryGit::default()));
        let result = check.run(&ctx).result;
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.message, "No mayor/rig clone found");

        fs::create_dir_all(clone.join(".git")).unwrap();
        let git = InMemoryGit::default()
            .repo(&clone)
            .porcelain(&clone, Err("fatal: bad object"));
        let result = RigIsGitRepoCheck::new(Arc::new(git)).run(&ctx).result;
        assert_eq!(result.message, "git status failed on mayor/rig");
        assert_eq!(result.details, vec!["Error: fatal: bad object".to_string()]);
    }

    #[test]
    fn missing_excludes_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let clone = town.join("gastown/mayor/rig");
        fs::create_dir_all(clone.join(".git/info")).unwrap();
        let exclude = clone.join(".git/info/exclude");
        fs::write(&exclude, "# local\n*.swp\npolecats/\n").unwrap();

        let check = GitExcludeCheck::new(Arc::new(InMemoryGit::default().repo(&clone)));
        let ctx = CheckContext::new(town).with_rig("gastown");
        let outcome = check.run(&ctx);
        assert_eq!(outcome.result.status, CheckStatus::Warning);
        assert_eq!(outcome.result.message, "3 Gas Town directories not excluded");
        assert_eq!(
            outcome.result.details,
            vec!["Missing: witness/, refinery/, mayor/".to_string()]
        );

        check.try_fix(&ctx, &outcome.plan).unwrap();
        assert_eq!(
            fs::read_to_string(&exclude).unwrap(),
            "# local\n*.swp\npolecats/\n\n# Gas Town directories\nwitness/\nrefinery/\nmayor/\n"
        );
        assert_eq!(check.run(&ctx).result.status, CheckStatus::Ok);
    }

    #[test]
    fn new_exclude_file_starts_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let clone = town.join("gastown/mayor/rig");
        fs::create_dir_all(clone.join(".git")).unwrap();

        let check = GitExcludeCheck::new(Arc::new(InMemoryGit::default().repo(&clone)));
        let ctx = CheckContext::new(town).with_rig("gastown");
        let outcome = check.run(&ctx);
        check.try_fix(&ctx, &outcome.plan).unwrap();
        assert_eq!(
            fs::read_to_string(clone.join(".git/info/exclude")).unwrap(),
            "# Gas Town directories\npolecats/\nwitness/\nrefinery/\nmayor/\n"
        );
    }
}
