use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use towndoc_core::fsutil::list_sub_dirs;
use towndoc_core::layout::{CREW_DIR, POLECATS_DIR, RUNTIME_DIR};
use towndoc_core::state::AgentLock;
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::{plural, rigs_in_scope};
use crate::probe::PidProbe;
use crate::types::{Category, CheckContext, CheckResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Staleness {
    DeadOwner(i32),
    Unreadable,
}

#[derive(Debug)]
struct StaleLocks(Vec<PathBuf>);

/// Finds worker lock files whose owning process has exited.
pub struct StaleLockCheck {
    pids: Arc<dyn PidProbe>,
}

impl StaleLockCheck {
    pub fn new(pids: Arc<dyn PidProbe>) -> Self {
        Self { pids }
    }

    fn staleness(&self, path: &Path) -> Option<Staleness> {
        match AgentLock::load(path) {
            Ok(Some(lock)) if self.pids.is_alive(lock.pid) => None,
            Ok(Some(lock)) => Some(Staleness::DeadOwner(lock.pid)),
            Ok(None) => None,
            Err(_) => Some(Staleness::Unreadable),
        }
    }
}

/// Every `agent.lock` under the crew and polecat workers of `rig`.
fn lock_files(layout: &TownLayout, rig: &str) -> Vec<PathBuf> {
    let mut locks = Vec::new();
    for pool in [POLECATS_DIR, CREW_DIR] {
        let pool_dir = layout.rig_path(rig).join(pool);
        for worker in list_sub_dirs(&pool_dir).unwrap_or_default() {
            let lock = pool_dir
                .join(worker)
                .join(RUNTIME_DIR)
                .join(AgentLock::FILE_NAME);
            if lock.is_file() {
                locks.push(lock);
            }
        }
    }
    locks
}

impl Check for StaleLockCheck {
    fn name(&self) -> &'static str {
        "stale-locks"
    }

    fn description(&self) -> &'static str {
        "Detect agent locks held by dead processes"
    }

    fn category(&self) -> Category {
        Category::Rig
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        let rigs = match rigs_in_scope(ctx, &layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let mut stale = Vec::new();
        let mut unreadable = 0;
        let mut details = Vec::new();
        for rig in &rigs {
            for lock in lock_files(&layout, rig) {
                let shown = lock.strip_prefix(layout.root()).unwrap_or(&lock).display();
                match self.staleness(&lock) {
                    Some(Staleness::DeadOwner(pid)) => {
                        details.push(format!("{shown} (pid {pid} not running)"));
                        stale.push(lock);
                    }
                    Some(Staleness::Unreadable) => {
                        details.push(format!("{shown} (unreadable, owner unknown, left in place)"));
                        unreadable += 1;
                    }
                    None => {}
                }
            }
        }

        if stale.is_empty() && unreadable == 0 {
            return CheckResult::ok("No stale locks").into();
        }
        let mut found = Vec::new();
        if !stale.is_empty() {
            found.push(plural(stale.len(), "stale lock"));
        }
        if unreadable > 0 {
            found.push(plural(unreadable, "unreadable lock"));
        }
        let result = CheckResult::warning(format!("Found {}", found.join(" and ")))
            .with_details(details);
        if stale.is_empty() {
            return Outcome::report(
                result.with_hint("Inspect unreadable locks by hand; --fix never removes them"),
            );
        }
        let result = result.with_hint("Run with --fix to remove locks whose owner is gone");
        Outcome::new(result, RepairPlan::new(StaleLocks(stale)))
    }

    fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(StaleLocks(locks)) = plan.get::<StaleLocks>() else {
            return Ok(());
        };
        let mut failures = Vec::new();
        for lock in locks {
            // A new owner may have taken the lock since the run.
            if !matches!(self.staleness(lock), Some(Staleness::DeadOwner(_))) {
                continue;
            }
            match fs::remove_file(lock) {
                Ok(()) => info!(path = %lock.display(), "removed stale lock"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => failures.push(format!("{}: {err}", lock.display())),
            }
        }
        FixError::collect(failures)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::probe::StaticPidProbe;
    use crate::types::CheckStatus;

    fn write_lock(town: &Path, pool: &str, worker: &str, body: &str) -> PathBuf {
        let dir = town.join("gastown").join(pool).join(worker).join(".runtime");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("agent.lock");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn dead_locks_are_removed_and_unreadable_ones_kept() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let live = write_lock(town, "polecats", "nux", r#"{"pid":100}"#);
        let dead = write_lock(town, "polecats", "slit", r#"{"pid":200}"#);
        let junk = write_lock(town, "crew", "joe", "not json");

        let check = StaleLockCheck::new(Arc::new(StaticPidProbe::alive(&[100])));
        let ctx = CheckContext::new(town);
        let outcome = check.run(&ctx);
        assert_eq!(outcome.result.status, CheckStatus::Warning);
        assert_eq!(
            outcome.result.message,
            "Found 1 stale lock and 1 unreadable lock"
        );
        assert_eq!(
            outcome.result.details,
            vec![
                "gastown/polecats/slit/.runtime/agent.lock (pid 200 not running)".to_string(),
                "gastown/crew/joe/.runtime/agent.lock (unreadable, owner unknown, left in place)"
                    .to_string(),
            ]
        );

        check.try_fix(&ctx, &outcome.plan).unwrap();
        assert!(live.exists());
        assert!(!dead.exists());
        assert!(junk.exists());
    }

    #[test]
    fn lock_mid_write_is_never_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let partial = write_lock(town, "polecats", "nux", r#"{"pid":3"#);
        let check = StaleLockCheck::new(Arc::new(StaticPidProbe::default()));
        let ctx = CheckContext::new(town);

        let outcome = check.run(&ctx);
        assert_eq!(outcome.result.status, CheckStatus::Warning);
        assert_eq!(outcome.result.message, "Found 1 unreadable lock");
        assert!(outcome.plan.is_empty());

        let forced = RepairPlan::new(StaleLocks(vec![partial.clone()]));
        check.try_fix(&ctx, &forced).unwrap();
        assert!(partial.exists());
    }

    #[test]
    fn lock_retaken_before_fix_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let town = dir.path();
        let lock = write_lock(town, "polecats", "nux", r#"{"pid":200}"#);
        let check = StaleLockCheck::new(Arc::new(StaticPidProbe::alive(&[300])));
        let ctx = CheckContext::new(town);
        let outcome = check.run(&ctx);
        assert_eq!(outcome.result.details.len(), 1);

        fs::write(&lock, r#"{"pid":300,"session_id":"gt-gastown-nux"}"#).unwrap();
        check.try_fix(&ctx, &outcome.plan).unwrap();
        assert!(lock.exists());
    }

    #[test]
    fn no_locks_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("gastown").join("polecats")).unwrap();
        let check = StaleLockCheck::new(Arc::new(StaticPidProbe::default()));
        let result = check.run(&CheckContext::new(dir.path())).result;
        assert_eq!(result.status, CheckStatus::Ok);
    }
}
