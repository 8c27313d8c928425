//! Agent `settings.json` placement and content.
//!
//! Settings belong outside the source clones: `mayor/.claude`,
//! `deacon/.claude`, `<rig>/{witness,refinery}/.claude` and the shared
//! `<rig>/{crew,polecats}/.claude`. A copy inside a clone is picked up by
//! every agent working below it, so those copies are removed through the
//! git-aware repair policy. The town root may only hold a symlink to the
//! mayor's settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, warn};
use towndoc_core::fsutil::{is_symlink, is_symlink_to};
use towndoc_core::layout::{CREW_DIR, POLECATS_DIR};
use towndoc_core::session::MAYOR_SESSION;
use towndoc_core::TownLayout;

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::checks::unreadable;
use crate::probe::{GitStatusProvider, TmuxClient};
use crate::repair::{classify_git_status, remove_if_empty, repair_file, GitFileStatus};
use crate::types::{Category, CheckContext, CheckResult};

const CLAUDE_DIR: &str = ".claude";
const SETTINGS_FILE: &str = "settings.json";
/// Target of the town-root symlink, relative to `<town>/.claude`.
pub const TOWN_SETTINGS_LINK: &str = "../mayor/.claude/settings.json";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SettingsFile {
    path: PathBuf,
    misplaced: bool,
    /// Town-root copy, replaced by the symlink after repair.
    town_root: bool,
    /// Session that has this file loaded and can be restarted.
    session: Option<String>,
}

impl SettingsFile {
    fn correct(path: PathBuf) -> Self {
        Self {
            path,
            misplaced: false,
            town_root: false,
            session: None,
        }
    }

    fn misplaced(path: PathBuf, session: Option<String>) -> Self {
        Self {
            path,
            misplaced: true,
            town_root: false,
            session,
        }
    }
}

#[derive(Debug)]
struct MisplacedFiles(Vec<SettingsFile>);

pub struct ClaudeSettingsCheck {
    git: Arc<dyn GitStatusProvider>,
    tmux: Arc<dyn TmuxClient>,
}

impl ClaudeSettingsCheck {
    pub fn new(git: Arc<dyn GitStatusProvider>, tmux: Arc<dyn TmuxClient>) -> Self {
        Self { git, tmux }
    }

    fn restart(&self, session: &str) {
        match self.tmux.has_session(session) {
            Ok(true) => match self.tmux.kill_session(session) {
                Ok(()) => info!(session, "stopped session to reload settings"),
                Err(err) => warn!(session, error = %err, "could not stop session"),
            },
            Ok(false) => {}
            Err(err) => warn!(session, error = %err, "could not query session"),
        }
    }
}

fn is_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file())
}

fn settings_in(dir: &Path) -> PathBuf {
    dir.join(CLAUDE_DIR).join(SETTINGS_FILE)
}

/// Locate every settings file the town may carry.
fn find_settings_files(layout: &TownLayout, rigs: &[String]) -> Vec<SettingsFile> {
    let mut files = Vec::new();
    let root = layout.root();

    let town = settings_in(root);
    let linked = is_symlink(&town)
        && fs::read_link(&town).is_ok_and(|target| target == Path::new(TOWN_SETTINGS_LINK));
    if is_file(&town) && !linked {
        files.push(SettingsFile {
            town_root: true,
            ..SettingsFile::misplaced(town, Some(MAYOR_SESSION.to_string()))
        });
    }
    for agent in ["mayor", "deacon"] {
        let path = settings_in(&root.join(agent));
        if is_file(&path) {
            files.push(SettingsFile::correct(path));
        }
    }

    for rig in rigs {
        let rig_path = layout.rig_path(rig);
        for role in ["witness", "refinery"] {
            let role_dir = rig_path.join(role);
            let correct = settings_in(&role_dir);
            if is_file(&correct) {
                files.push(SettingsFile::correct(correct));
            }
            let inside_clone = settings_in(&role_dir.join("rig"));
            if is_file(&inside_clone) {
                files.push(SettingsFile::misplaced(
                    inside_clone,
                    Some(format!("gt-{rig}-{role}")),
                ));
            }
        }

        for pool in [CREW_DIR, POLECATS_DIR] {
            let pool_dir = rig_path.join(pool);
            let shared = pool_dir.join(CLAUDE_DIR);
            if is_file(&shared.join(SETTINGS_FILE)) {
                files.push(SettingsFile::correct(shared.join(SETTINGS_FILE)));
            }
            let workers = towndoc_core::fsutil::list_sub_dirs(&pool_dir).unwrap_or_default();
            for worker in workers.iter().filter(|w| w.as_str() != CLAUDE_DIR) {
                let worker_dir = pool_dir.join(worker);
                let mut candidates = vec![worker_dir.join(CLAUDE_DIR)];
                if pool == POLECATS_DIR {
                    candidates.push(worker_dir.join(rig).join(CLAUDE_DIR));
                }
                for claude_dir in candidates {
                    if is_symlink_to(&claude_dir, &shared) {
                        continue;
                    }
                    let path = claude_dir.join(SETTINGS_FILE);
                    if is_file(&path) {
                        files.push(SettingsFile::misplaced(path, None));
                    }
                }
            }
        }
    }
    files
}

/// Required pieces absent from a settings file in its correct location.
pub fn missing_settings(path: &Path) -> Vec<String> {
    let Ok(text) = fs::read_to_string(path) else {
        return vec!["unreadable".to_string()];
    };
    let Ok(Value::Object(settings)) = serde_json::from_str::<Value>(&text) else {
        return vec!["invalid JSON".to_string()];
    };

    let mut missing = Vec::new();
    if !settings.contains_key("enabledPlugins") {
        missing.push("enabledPlugins".to_string());
    }
    let Some(hooks) = settings.get("hooks").and_then(Value::as_object) else {
        missing.push("hooks".to_string());
        return missing;
    };
    if !hook_has_command(hooks, "SessionStart", "gt prime") {
        missing.push("SessionStart 'gt prime' hook".to_string());
    }
    missing
}

fn hook_has_command(hooks: &Map<String, Value>, event: &str, pattern: &str) -> bool {
    hooks
        .get(event)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|matcher| matcher.get("hooks").and_then(Value::as_array))
        .flatten()
        .filter_map(|hook| hook.get("command").and_then(Value::as_str))
        .any(|command| command.contains(pattern))
}

fn shown(layout: &TownLayout, path: &Path) -> String {
    path.strip_prefix(layout.root())
        .unwrap_or(path)
        .display()
        .to_string()
}

impl Check for ClaudeSettingsCheck {
    fn name(&self) -> &'static str {
        "claude-settings"
    }

    fn description(&self) -> &'static str {
        "Verify agent settings.json files are complete and correctly placed"
    }

    fn category(&self) -> Category {
        Category::Configuration
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        let rigs = match &ctx.rig {
            Some(rig) => vec![rig.clone()],
            None => match layout.candidate_dirs() {
                Ok(rigs) => rigs,
                Err(err) => return unreadable("town root", err).into(),
            },
        };

        let files = find_settings_files(&layout, &rigs);
        let mut details = Vec::new();
        let mut misplaced = Vec::new();
        let mut incomplete = 0;
        let mut has_modified = false;

        for file in files {
            if file.misplaced {
                let status = classify_git_status(self.git.as_ref(), &file.path);
                has_modified |= status == GitFileStatus::TrackedModified;
                details.push(format!("{}: {}", shown(&layout, &file.path), status.describe()));
                misplaced.push(file);
                continue;
            }
            let missing = missing_settings(&file.path);
            if !missing.is_empty() {
                details.push(format!(
                    "{}: missing {}",
                    shown(&layout, &file.path),
                    missing.join(", ")
                ));
                incomplete += 1;
            }
        }

        let stale = misplaced.len() + incomplete;
        if stale == 0 {
            return CheckResult::ok("All Claude settings.json files are up to date").into();
        }

        let hint = if has_modified {
            "Run with --fix to fix issues. Files with local modifications will be renamed to .bak files."
        } else if misplaced.is_empty() {
            "Recreate incomplete settings from the role template"
        } else {
            "Run with --fix to remove settings files from inside source clones"
        };
        let result = CheckResult::error(format!("Found {stale} stale Claude config file(s)"))
            .with_details(details)
            .with_hint(hint);

        if misplaced.is_empty() {
            return result.into();
        }
        Outcome::new(result, RepairPlan::new(MisplacedFiles(misplaced)))
    }

    fn try_fix(&self, ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(MisplacedFiles(files)) = plan.get::<MisplacedFiles>() else {
            return Ok(());
        };
        let mut failures = Vec::new();

        for file in files {
            if let Err(err) = repair_file(self.git.as_ref(), &file.path) {
                failures.push(format!("{}: {err}", file.path.display()));
                continue;
            }
            if let Some(claude_dir) = file.path.parent() {
                remove_if_empty(claude_dir);
            }
            if file.town_root {
                if let Err(err) = link_town_settings(ctx.town_root()) {
                    failures.push(err.to_string());
                }
            }
            if ctx.restart_sessions {
                if let Some(session) = &file.session {
                    self.restart(session);
                }
            }
        }
        FixError::collect(failures)
    }
}

/// Point `<town>/.claude/settings.json` at the mayor's settings.
fn link_town_settings(town_root: &Path) -> Result<(), FixError> {
    let claude_dir = town_root.join(CLAUDE_DIR);
    fs::create_dir_all(&claude_dir).map_err(|err| FixError::io("create", &claude_dir, err))?;
    let link = claude_dir.join(SETTINGS_FILE);
    if is_symlink(&link) || link.exists() {
        return Ok(());
    }
    std::os::unix::fs::symlink(TOWN_SETTINGS_LINK, &link)
        .map_err(|err| FixError::io("symlink", &link, err))?;
    info!(link = %link.display(), "linked town settings to mayor settings");
    Ok(())
}
