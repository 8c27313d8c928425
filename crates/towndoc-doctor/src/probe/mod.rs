//! Readers of ground truth that live outside the filesystem.
//!
//! Every collaborator the checks talk to sits behind a trait here, with a
//! shell-backed implementation for real runs and an in-memory double for
//! tests.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub mod command;
pub mod git;
pub mod net;
pub mod process;
pub mod tmux;

pub use command::{CommandOutput, CommandRunner, ScriptedCommandRunner, SystemCommandRunner};
pub use git::{GitStatusProvider, InMemoryGit, ShellGit};
pub use net::{Dialer, StaticDialer, TcpDialer};
pub use process::{
    InMemoryProcessLister, PidProbe, ProcessInfo, ProcessLister, ShellProcessLister,
    StaticPidProbe, SystemPidProbe,
};
pub use tmux::{InMemoryTmux, ShellTmuxClient, TmuxClient};

/// The collaborators handed to checks when the registry is built.
#[derive(Clone)]
pub struct Providers {
    pub tmux: Arc<dyn TmuxClient>,
    pub processes: Arc<dyn ProcessLister>,
    pub git: Arc<dyn GitStatusProvider>,
    pub commands: Arc<dyn CommandRunner>,
    pub dialer: Arc<dyn Dialer>,
    pub pids: Arc<dyn PidProbe>,
}

impl Providers {
    /// Providers backed by the real system. Every tmux, `ps` and git query
    /// is cut off after `timeout`.
    pub fn system(timeout: Duration) -> Self {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::default());
        Self {
            tmux: Arc::new(ShellTmuxClient::new(Arc::clone(&commands), timeout)),
            processes: Arc::new(ShellProcessLister::new(Arc::clone(&commands), timeout)),
            git: Arc::new(ShellGit::new(Arc::clone(&commands), timeout)),
            commands,
            dialer: Arc::new(TcpDialer),
            pids: Arc::new(SystemPidProbe),
        }
    }

    /// Inert doubles: no sessions, no processes, no repositories, every
    /// command missing, every dial refused, every pid dead.
    pub fn in_memory() -> Self {
        Self {
            tmux: Arc::new(InMemoryTmux::default()),
            processes: Arc::new(InMemoryProcessLister::default()),
            git: Arc::new(InMemoryGit::default()),
            commands: Arc::new(ScriptedCommandRunner::default()),
            dialer: Arc::new(StaticDialer::refusing()),
            pids: Arc::new(StaticPidProbe::default()),
        }
    }
}

/// Run `program args` and return stdout. A non-zero exit is an error
/// carrying stderr.
pub(crate) fn run_stdout(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    dir: Option<&Path>,
    timeout: Duration,
) -> Result<String, String> {
    let out = runner.run(program, args, dir, timeout)?;
    if !out.success() {
        return Err(format!(
            "{program} {} failed with exit code {}: {}",
            args.join(" "),
            out.exit_code,
            out.stderr.trim()
        ));
    }
    Ok(out.stdout)
}

/// Lock a double's state, ignoring poisoning from a panicked test thread.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
