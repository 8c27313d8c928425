use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{info, warn};
use towndoc_core::fsutil::{dir_exists, list_sub_dirs};
use towndoc_core::layout::{BEADS_DIR, CREW_DIR, POLECATS_DIR};
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::rigs_in_scope;
use crate::types::{Category, CheckContext, CheckResult};

const REDIRECT_FILE: &str = "redirect";

/// Database artifacts that must not sit next to a redirect.
const STALE_PATTERNS: &[&str] = &[
    "*.db",
    "*.db-*",
    "issues.jsonl",
    "interactions.jsonl",
    "metadata.json",
    "sync-state.json",
    "last-touched",
    ".local_version",
    "daemon.lock",
    "daemon.log",
    "daemon.pid",
    "bd.sock",
    "mq",
];

#[derive(Debug)]
struct StaleDirs(Vec<PathBuf>);

/// Finds `.beads` directories that redirect elsewhere yet still carry
/// database files of their own.
pub struct StaleBeadsRedirectCheck;

/// Every `.beads` directory of a rig that may hold a redirect: the rig
/// root, the refinery clone, crew workspaces and polecat worktrees.
fn beads_dirs(layout: &TownLayout, rig: &str) -> Vec<PathBuf> {
    let rig_path = layout.rig_path(rig);
    let mut dirs = vec![
        rig_path.join(BEADS_DIR),
        rig_path.join("refinery").join("rig").join(BEADS_DIR),
    ];
    for crew in list_sub_dirs(&layout.crew_dir(rig)).unwrap_or_default() {
        dirs.push(layout.crew_dir(rig).join(crew).join(BEADS_DIR));
    }
    let polecats = layout.polecats_dir(rig);
    for polecat in list_sub_dirs(&polecats).unwrap_or_default() {
        dirs.push(polecats.join(&polecat).join(rig).join(BEADS_DIR));
        dirs.push(polecats.join(&polecat).join(BEADS_DIR));
    }
    dirs.retain(|dir| dir_exists(dir));
    dirs
}

/// Artifacts in `dir` matching the stale patterns, sorted.
fn stale_items(dir: &Path) -> Vec<PathBuf> {
    let base = Pattern::escape(&dir.to_string_lossy());
    let mut items: Vec<PathBuf> = STALE_PATTERNS
        .iter()
        .filter_map(|pattern| glob::glob(&format!("{base}/{pattern}")).ok())
        .flat_map(|paths| paths.filter_map(Result::ok))
        .collect();
    items.sort();
    items.dedup();
    items
}

fn has_redirect(dir: &Path) -> bool {
    dir.join(REDIRECT_FILE).is_file()
}

fn is_stale(dir: &Path) -> bool {
    has_redirect(dir) && !stale_items(dir).is_empty()
}

fn clean(dir: &Path) -> Result<usize, FixError> {
    if !has_redirect(dir) {
        return Err(FixError::Refused {
            action: format!("clean {}", dir.display()),
            reason: "no redirect file found".to_string(),
        });
    }
    let mut removed = 0;
    for item in stale_items(dir) {
        let result = if fs::symlink_metadata(&item).is_ok_and(|m| m.is_dir()) {
            fs::remove_dir_all(&item)
        } else {
            fs::remove_file(&item)
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(FixError::io("remove", item, err)),
        }
    }
    Ok(removed)
}

impl Check for StaleBeadsRedirectCheck {
    fn name(&self) -> &'static str {
        "stale-beads-redirect"
    }

    fn description(&self) -> &'static str {
        "Detect redirected .beads directories that still hold database files"
    }

    fn category(&self) -> Category {
        Category::Cleanup
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

        let stale: Vec<PathBuf> = rigs
            .iter()
            .flat_map(|rig| beads_dirs(&layout, rig))
            .filter(|dir| is_stale(dir))
            .collect();
        if stale.is_empty() {
            return CheckResult::ok("No stale files in redirected .beads directories").into();
        }

        let details = stale.iter().map(|dir| {
            let names: Vec<String> = stale_items(dir)
                .iter()
                .filter_map(|item| item.file_name())
                .map(|name| name.to_string_lossy().into_owned())
                .collect();
            format!(
                "{}: {}",
                dir.strip_prefix(layout.root()).unwrap_or(dir).display(),
                names.join(", ")
            )
        });
        let result = CheckResult::warning(format!(
            "{} redirected .beads director{} with stale files",
            stale.len(),
            if stale.len() == 1 { "y" } else { "ies" }
        ))
        .with_details(details)
        .with_hint("Run with --fix to remove files the redirect makes unreachable");
        Outcome::new(result, RepairPlan::new(StaleDirs(stale)))
    }

    fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(StaleDirs(dirs)) = plan.get::<StaleDirs>() else {
            return Ok(());
        };
        let mut failures = Vec::new();
        for dir in dirs {
            match clean(dir) {
                Ok(0) => {}
                Ok(removed) => info!(dir = %dir.display(), removed, "cleaned redirected beads dir"),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "could not clean beads dir");
                    failures.push(err.to_string());
                }
            }
        }
        FixError::collect(failures)
    }
}
