use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use towndoc_core::layout::BEADS_DIR;
use towndoc_core::state::BeadsMetadata;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::registered_rigs;
use crate::classify::{classify_post_merge_hook, HookState};
use crate::probe::CommandRunner;
use crate::types::{Category, CheckContext, CheckResult};

#[derive(Debug)]
struct StaleHookDirs(Vec<PathBuf>);

/// Finds dolt-backed checkouts whose `post-merge` hook still runs the JSONL
/// sync from the pre-dolt era.
pub struct DoltHooksCheck {
    commands: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl DoltHooksCheck {
    pub fn new(commands: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { commands, timeout }
    }
}

fn uses_dolt(dir: &Path) -> bool {
    matches!(BeadsMetadata::load(&dir.join(BEADS_DIR)), Ok(Some(meta)) if meta.is_dolt())
}

fn has_stale_hook(dir: &Path) -> bool {
    let hook = dir.join(".git").join("hooks").join("post-merge");
    fs::read_to_string(hook).is_ok_and(|content| classify_post_merge_hook(&content) == HookState::Stale)
}

impl Check for DoltHooksCheck {
    fn name(&self) -> &'static str {
        "dolt-hooks"
    }

    fn description(&self) -> &'static str {
        "Detect JSONL-sync git hooks in dolt-backed checkouts"
    }

    fn category(&self) -> Category {
        Category::Hooks
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        let rigs = match registered_rigs(&layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let mut stale = Vec::new();
        let mut details = Vec::new();
        let town = layout.root().to_path_buf();
        if uses_dolt(&town) && has_stale_hook(&town) {
            details.push("Town root has stale JSONL-sync hooks".to_string());
            stale.push(town);
        }
        for rig in &rigs {
            let dir = layout.rig_path(rig);
            if uses_dolt(&dir) && has_stale_hook(&dir) {
                details.push(format!("Rig {rig:?} has stale JSONL-sync hooks"));
                stale.push(dir);
            }
        }

        if stale.is_empty() {
            return CheckResult::ok("No stale JSONL-sync hooks in dolt-backed checkouts").into();
        }
        let result = CheckResult::warning(format!(
            "{} dolt-backed checkout(s) have stale JSONL-sync hooks",
            stale.len()
        ))
        .with_details(details)
        .with_hint("Run with --fix to reinstall hooks with 'bd hooks install --force'");
        Outcome::new(result, RepairPlan::new(StaleHookDirs(stale)))
    }

    fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(StaleHookDirs(dirs)) = plan.get::<StaleHookDirs>() else {
            return Ok(());
        };
        let mut failures = Vec::new();
        for dir in dirs {
            let output =
                self.commands
                    .run("bd", &["hooks", "install", "--force"], Some(dir), self.timeout);
            match output {
                Ok(out) if out.success() => {
                    info!(dir = %dir.display(), "reinstalled beads hooks");
                }
                Ok(out) => {
                    warn!(dir = %dir.display(), code = out.exit_code, "bd hooks install failed");
                    failures.push(format!(
                        "{}: bd hooks install exited {}: {}",
                        dir.display(),
                        out.exit_code,
                        out.stderr.trim()
                    ));
                }
                Err(err) => failures.push(format!("{}: {err}", dir.display())),
            }
        }
        FixError::collect(failures)
    }
}
