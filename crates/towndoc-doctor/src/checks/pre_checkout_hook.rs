use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::info;
use towndoc_core::fsutil::{dir_exists, write_atomic};

use crate::check::{Capability, Check, FixError, Outcome, RepairPlan};
use crate::types::{Category, CheckContext, CheckResult};

/// First line after the shebang; identifies a hook this check owns.
pub const GUARD_MARKER: &str = "# towndoc pre-checkout guard";

const GUARD_SCRIPT: &str = "#!/bin/sh
# towndoc pre-checkout guard
# The town root stays on its main branch; agents work in their own clones.
if [ -n \"$GT_ALLOW_TOWN_CHECKOUT\" ]; then
    exit 0
fi
echo \"towndoc: refusing to switch branches in the town root\" >&2
echo \"towndoc: set GT_ALLOW_TOWN_CHECKOUT=1 to override\" >&2
exit 1
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookState {
    Installed,
    Missing,
    NotExecutable,
    /// Someone else's hook; never overwritten.
    Foreign,
}

#[derive(Debug)]
struct InstallGuard(PathBuf);

/// Requires the branch guard hook in the town root's git checkout.
pub struct PreCheckoutHookCheck;

fn hook_path(town: &Path) -> PathBuf {
    town.join(".git").join("hooks").join("pre-checkout")
}

fn hook_state(path: &Path) -> Result<HookState, std::io::Error> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HookState::Missing),
        Err(err) => return Err(err),
    };
    if !content.lines().any(|line| line.trim() == GUARD_MARKER) {
        return Ok(HookState::Foreign);
    }
    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o111 == 0 {
        return Ok(HookState::NotExecutable);
    }
    Ok(HookState::Installed)
}

impl Check for PreCheckoutHookCheck {
    fn name(&self) -> &'static str {
        "pre-checkout-hook"
    }

    fn description(&self) -> &'static str {
        "Verify the town root's branch guard hook is installed"
    }

    fn category(&self) -> Category {
        Category::Hooks
    }

    fn capability(&self) -> Capability {
        Capability::Repair
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let town = ctx.town_root.as_path();
        if !dir_exists(&town.join(".git")) {
            return CheckResult::ok("Town root is not a git checkout (skipped)").into();
        }
        let path = hook_path(town);
        let state = match hook_state(&path) {
            Ok(state) => state,
            Err(err) => {
                return CheckResult::warning("Could not read the pre-checkout hook")
                    .with_detail(format!("{}: {err}", path.display()))
                    .into();
            }
        };

        let result = match state {
            HookState::Installed => return CheckResult::ok("pre-checkout hook installed").into(),
            HookState::Foreign => {
                return CheckResult::warning("pre-checkout hook is not the town branch guard")
                    .with_detail(".git/hooks/pre-checkout has other content")
                    .with_hint(format!(
                        "Add the guard by hand; the hook must contain '{GUARD_MARKER}'"
                    ))
                    .into();
            }
            HookState::Missing => CheckResult::error("pre-checkout hook is missing")
                .with_detail("Branch switches in the town root go unguarded"),
            HookState::NotExecutable => CheckResult::error("pre-checkout hook is not executable")
                .with_detail(".git/hooks/pre-checkout lacks the execute bit"),
        };
        Outcome::new(
            result.with_hint("Run with --fix to install the hook"),
            RepairPlan::new(InstallGuard(path)),
        )
    }

    fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
        let Some(InstallGuard(path)) = plan.get::<InstallGuard>() else {
            return Ok(());
        };
        match hook_state(path).map_err(|err| FixError::io("read", path, err))? {
            HookState::Installed => return Ok(()),
            HookState::Foreign => {
                return Err(FixError::Refused {
                    action: format!("overwrite {}", path.display()),
                    reason: "the hook was not written by towndoc".to_string(),
                });
            }
            HookState::Missing | HookState::NotExecutable => {}
        }
        if let Some(hooks) = path.parent() {
            fs::create_dir_all(hooks).map_err(|err| FixError::io("create", hooks, err))?;
        }
        write_atomic(path, GUARD_SCRIPT.as_bytes(), 0o755)?;
        info!(path = %path.display(), "installed pre-checkout hook");
        Ok(())
    }
}
