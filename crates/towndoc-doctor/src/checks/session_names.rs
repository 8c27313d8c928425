use std::sync::Arc;

use tracing::{info, warn};
use towndoc_core::session::{has_own_prefix, is_crew_session};
use towndoc_core::SessionIdentity;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::probe::TmuxClient;
use crate::types::{Category, CheckContext, CheckResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
    collaborator: bool,
}

#[derive(Debug)]
struct RenamePlan(Vec<Rename>);

/// Finds sessions named with an older scheme and renames them.
pub struct SessionNameCheck {
    tmux: Arc<dyn TmuxClient>,
}

impl SessionNameCheck {
    pub fn new(tmux: Arc<dyn TmuxClient>) -> Self {
        Self { tmux }
    }
}

/// Own-prefix sessions whose canonical name differs from the current one.
/// Names that do not parse at all are left to the orphan check.
pub fn find_mismatches(sessions: &[String]) -> Vec<Rename> {
    sessions
        .iter()
        .filter(|name| has_own_prefix(name))
        .filter_map(|name| {
            let identity = SessionIdentity::parse_lenient(name).ok()?;
            let canonical = identity.canonical_name();
            (canonical != *name).then(|| Rename {
                from: name.clone(),
                to: canonical,
                collaborator: identity.is_collaborator() || is_crew_session(name),
            })
        })
        .collect()
}

impl Check for SessionNameCheck {
    fn name(&self) -> &'static str {
        "session-names"
    }

    fn description(&self) -> &'static str {
        "Detect sessions with non-canonical names"
    }

    fn category(&self) -> Category {
        Category::Cleanup
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, _ctx: &CheckContext) -> Outcome {
        let sessions = match self.tmux.list_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                return CheckResult::warning("Could not list tmux sessions")
                    .with_detail(err)
                    .into();
            }
        };

        let mismatches = find_mismatches(&sessions);
        if mismatches.is_empty() {
            return CheckResult::ok("All session names are canonical").into();
        }

        let result = CheckResult::warning(format!(
            "Found {} session(s) with non-canonical names",
            mismatches.len()
        ))
        .with_details(mismatches.iter().map(|r| format!("{} → {}", r.from, r.to)))
        .with_hint("Run with --fix to rename them (crew sessions must be renamed by hand)");

        let renames = mismatches.into_iter().filter(|r| !r.collaborator).collect();
        Outcome::new(result, RepairPlan::new(RenamePlan(renames)))
    }

    fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(RenamePlan(renames)) = plan.get::<RenamePlan>() else {
            return Ok(());
        };
        let mut failures = Vec::new();
        for rename in renames {
            if rename.collaborator {
                warn!(session = %rename.from, "refusing to rename crew session");
                continue;
            }
            match self.tmux.has_session(&rename.to) {
                Ok(false) => {}
                Ok(true) => {
                    warn!(from = %rename.from, to = %rename.to, "rename target exists, skipping");
                    continue;
                }
                Err(err) => {
                    failures.push(format!("{}: {err}", rename.to));
                    continue;
                }
            }
            match self.tmux.has_session(&rename.from) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    failures.push(format!("{}: {err}", rename.from));
                    continue;
                }
            }
            match self.tmux.rename_session(&rename.from, &rename.to) {
                Ok(()) => info!(from = %rename.from, to = %rename.to, "renamed session"),
                Err(err) => failures.push(format!("{}: {err}", rename.from)),
            }
        }
        FixError::collect(failures)
    }
}
