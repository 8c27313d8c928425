use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};
use towndoc_core::fsutil::dir_exists;
use towndoc_core::session::is_crew_session;
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::unreadable;
use crate::classify::{classify_session, SessionClass};
use crate::probe::TmuxClient;
use crate::types::{Category, CheckContext, CheckResult};

/// Sessions the fix may kill. Crew sessions are never included.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KillList(Vec<String>);

/// Finds tmux sessions whose rig no longer exists.
pub struct OrphanSessionCheck {
    tmux: Arc<dyn TmuxClient>,
}

impl OrphanSessionCheck {
    pub fn new(tmux: Arc<dyn TmuxClient>) -> Self {
        Self { tmux }
    }
}

fn valid_rigs(layout: &TownLayout) -> Result<BTreeSet<String>, CheckResult> {
    layout
        .pool_rigs()
        .map(|rigs| rigs.into_iter().collect())
        .map_err(|err| unreadable("town root", err))
}

/// Orphaned sessions that a fix is allowed to kill.
pub fn kill_targets<'a>(orphans: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    orphans
        .into_iter()
        .filter(|name| !is_crew_session(name))
        .cloned()
        .collect()
}

impl Check for OrphanSessionCheck {
    fn name(&self) -> &'static str {
        "orphan-sessions"
    }

    fn description(&self) -> &'static str {
        "Detect orphaned tmux sessions"
    }

    fn category(&self) -> Category {
        Category::Cleanup
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        if !dir_exists(&layout.mayor_dir()) {
            return CheckResult::warning("Not a town root (mayor/ directory missing)")
                .with_detail(layout.root().display().to_string())
                .into();
        }

        let sessions = match self.tmux.list_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                return CheckResult::warning("Could not list tmux sessions")
                    .with_detail(err)
                    .into();
            }
        };
        let rigs = match valid_rigs(&layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let orphans: Vec<String> = sessions
            .into_iter()
            .filter(|name| classify_session(name, &rigs) == SessionClass::Orphan)
            .collect();

        if orphans.is_empty() {
            return CheckResult::ok("No orphaned sessions").into();
        }

        let result = CheckResult::warning(format!(
            "Found {} orphaned session(s)",
            orphans.len()
        ))
        .with_details(orphans.iter().map(|name| format!("Orphan: {name}")))
        .with_hint("Run with --fix to kill orphaned sessions (crew sessions are never killed)");

        Outcome::new(result, RepairPlan::new(KillList(kill_targets(&orphans))))
    }

    fn try_fix(&self, ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(KillList(targets)) = plan.get::<KillList>() else {
            return Ok(());
        };
        let layout = ctx.layout();
        let mut failures = Vec::new();

        for name in targets {
            if is_crew_session(name) {
                warn!(session = %name, "refusing to kill crew session");
                continue;
            }
            match self.tmux.has_session(name) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    failures.push(format!("{name}: {err}"));
                    continue;
                }
            }
            // The rig may have been recreated since the plan was made.
            let rigs = valid_rigs(&layout)
                .map_err(|result| FixError::Command(result.message.clone()))?;
            if classify_session(name, &rigs) != SessionClass::Orphan {
                warn!(session = %name, "session is valid again, leaving it");
                continue;
            }
            match self.tmux.kill_session(name) {
                Ok(()) => info!(session = %name, "killed orphaned session"),
                Err(err) => failures.push(format!("{name}: {err}")),
            }
        }
        FixError::collect(failures)
    }
}
