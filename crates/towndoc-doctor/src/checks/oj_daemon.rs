use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::check::{Check, Outcome};
use crate::probe::CommandRunner;
use crate::types::{Category, CheckContext, CheckResult};

const OJ: &str = "oj";
const START_HINT: &str = "Start OJ daemon with 'oj daemon start'";

/// `oj daemon status --json`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DaemonStatus {
    status: String,
    version: String,
    uptime: String,
    jobs_active: u64,
    sessions_active: u64,
    orphan_count: u64,
}

/// `oj status --json`, reduced to what the report shows.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusOverview {
    namespaces: Vec<NamespaceStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamespaceStatus {
    workers: Vec<serde_json::Value>,
    queues: Vec<QueueStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueStatus {
    pending: u64,
}

/// Health of the job dispatch daemon, when dispatch is enabled.
pub struct OjDaemonCheck {
    commands: Arc<dyn CommandRunner>,
    enabled: bool,
    timeout: Duration,
}

impl OjDaemonCheck {
    pub fn new(commands: Arc<dyn CommandRunner>, enabled: bool, timeout: Duration) -> Self {
        Self {
            commands,
            enabled,
            timeout,
        }
    }

    fn query<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, String> {
        let command = format!("{OJ} {}", args.join(" "));
        let out = self.commands.run(OJ, args, None, self.timeout)?;
        if !out.success() {
            return Err(format!(
                "{command}: exit status {}: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        serde_json::from_str(&out.stdout).map_err(|err| format!("parsing {command} output: {err}"))
    }
}

impl Check for OjDaemonCheck {
    fn name(&self) -> &'static str {
        "oj-daemon"
    }

    fn description(&self) -> &'static str {
        "Check if OJ daemon is running and healthy"
    }

    fn category(&self) -> Category {
        Category::Infrastructure
    }

    fn run(&self, _ctx: &CheckContext) -> Outcome {
        if !self.enabled {
            return CheckResult::ok("OJ dispatch not enabled (GT_SLING_OJ != 1)").into();
        }
        if self.commands.lookup_path(OJ).is_none() {
            return CheckResult::warning("OJ binary not found in PATH")
                .with_hint("Install OJ or ensure 'oj' is in your PATH")
                .into();
        }

        let status: DaemonStatus = match self.query(&["daemon", "status", "--json"]) {
            Ok(status) => status,
            Err(err) => {
                return CheckResult::warning("OJ daemon not reachable")
                    .with_detail(err)
                    .with_hint(START_HINT)
                    .into()
            }
        };
        if status.status == "not_running" {
            return CheckResult::warning("OJ daemon is not running")
                .with_hint(START_HINT)
                .into();
        }

        let mut details = Vec::new();
        if !status.version.is_empty() {
            details.push(format!("Version: {}", status.version));
        }
        if !status.uptime.is_empty() {
            details.push(format!("Uptime: {}", status.uptime));
        }
        details.push(format!("Active jobs: {}", status.jobs_active));
        details.push(format!("Active sessions: {}", status.sessions_active));
        if status.orphan_count > 0 {
            details.push(format!(
                "Orphaned jobs: {} (run 'oj daemon orphans')",
                status.orphan_count
            ));
        }

        match self.query::<StatusOverview>(&["status", "--json"]) {
            Ok(overview) => {
                let workers: usize = overview.namespaces.iter().map(|ns| ns.workers.len()).sum();
                let pending: u64 = overview
                    .namespaces
                    .iter()
                    .flat_map(|ns| &ns.queues)
                    .map(|q| q.pending)
                    .sum();
                if workers > 0 {
                    details.push(format!("Workers: {workers}"));
                }
                if pending > 0 {
                    details.push(format!("Queue depth: {pending} pending"));
                }
            }
            Err(err) => debug!(error = %err, "oj status overview unavailable"),
        }

        if status.orphan_count > 0 {
            return CheckResult::warning(format!(
                "OJ daemon running but has {} orphaned job(s)",
                status.orphan_count
            ))
            .with_details(details)
            .with_hint("Run 'oj daemon orphans' to investigate orphaned jobs")
            .into();
        }
        CheckResult::ok(format!(
            "OJ daemon running ({} active job(s), uptime {})",
            status.jobs_active, status.uptime
        ))
        .with_details(details)
        .into()
    }
}
