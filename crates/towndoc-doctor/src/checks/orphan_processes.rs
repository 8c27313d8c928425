use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::check::{Check, Outcome};
use crate::classify::{classify_ancestry, Supervision};
use crate::probe::{ProcessInfo, ProcessLister};
use crate::types::{Category, CheckContext, CheckResult};

/// Finds agent runtimes that no tmux server is supervising.
///
/// Diagnose only: an unsupervised runtime may be a user's interactive
/// session, so killing it is left to a human.
pub struct OrphanProcessCheck {
    lister: Arc<dyn ProcessLister>,
}

impl OrphanProcessCheck {
    pub fn new(lister: Arc<dyn ProcessLister>) -> Self {
        Self { lister }
    }

    fn is_orphan(&self, proc: &ProcessInfo, supervisors: &HashSet<i32>) -> bool {
        let supervision = classify_ancestry(proc.pid, supervisors, |pid| {
            if pid == proc.pid {
                Ok(proc.ppid)
            } else {
                self.lister.parent_pid(pid)
            }
        });
        supervision == Supervision::Orphaned
    }
}

impl Check for OrphanProcessCheck {
    fn name(&self) -> &'static str {
        "orphan-processes"
    }

    fn description(&self) -> &'static str {
        "Detect runtime processes outside tmux"
    }

    fn category(&self) -> Category {
        Category::Cleanup
    }

    fn run(&self, _ctx: &CheckContext) -> Outcome {
        let runtimes = match self.lister.runtime_processes() {
            Ok(runtimes) => runtimes,
            Err(err) => {
                return CheckResult::warning("Could not list processes")
                    .with_detail(err)
                    .into();
            }
        };
        if runtimes.is_empty() {
            return CheckResult::ok("No runtime processes found").into();
        }

        let mut supervisors: HashSet<i32> = match self.lister.tmux_server_pids() {
            Ok(pids) => pids.into_iter().collect(),
            Err(err) => {
                return CheckResult::warning("Could not list processes")
                    .with_detail(err)
                    .into();
            }
        };
        match self.lister.pane_pids() {
            Ok(pids) => supervisors.extend(pids),
            // No server means no panes; the server list already covers it.
            Err(err) => warn!(error = %err, "could not list tmux panes"),
        }

        let orphans: Vec<&ProcessInfo> = runtimes
            .iter()
            .filter(|proc| self.is_orphan(proc, &supervisors))
            .collect();

        if orphans.is_empty() {
            return CheckResult::ok(format!(
                "All {} runtime processes are inside tmux",
                runtimes.len()
            ))
            .into();
        }

        CheckResult::warning(format!(
            "Found {} runtime process(es) running outside tmux",
            orphans.len()
        ))
        .with_details(
            orphans
                .iter()
                .map(|proc| format!("PID {}: {}", proc.pid, proc.cmd)),
        )
        .with_hint(
            "Review these processes manually; they may be interactive sessions. \
             Stop abandoned ones with 'kill <pid>'",
        )
        .into()
    }
}
