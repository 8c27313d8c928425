//! Process table and liveness.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use super::{run_stdout, CommandRunner};

/// Executable names treated as agent runtimes.
const RUNTIME_BINARIES: [&str; 2] = ["claude", "claude-code"];

/// A single process snapshot. Observational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub cmd: String,
}

/// Evidence for the orphan-process walk.
pub trait ProcessLister: Send + Sync {
    /// PIDs of every running tmux server, across all sockets.
    fn tmux_server_pids(&self) -> Result<Vec<i32>, String>;

    /// Leader PIDs of every pane on the default server.
    fn pane_pids(&self) -> Result<Vec<i32>, String>;

    /// Agent runtime processes that may or may not be supervised.
    fn runtime_processes(&self) -> Result<Vec<ProcessInfo>, String>;

    fn parent_pid(&self, pid: i32) -> Result<i32, String>;
}

/// Reads the process table through `ps` and panes through `tmux`.
pub struct ShellProcessLister {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ShellProcessLister {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn output(&self, program: &str, args: &[&str]) -> Result<String, String> {
        run_stdout(self.runner.as_ref(), program, args, None, self.timeout)
    }

    fn table(&self) -> Result<Vec<ProcessInfo>, String> {
        let out = self.output("ps", &["-eo", "pid=,ppid=,args="])?;
        Ok(out.lines().filter_map(parse_ps_line).collect())
    }
}

impl ProcessLister for ShellProcessLister {
    fn tmux_server_pids(&self) -> Result<Vec<i32>, String> {
        Ok(self.table()?
            .into_iter()
            .filter(|p| is_tmux_server(&p.cmd))
            .map(|p| p.pid)
            .collect())
    }

    fn pane_pids(&self) -> Result<Vec<i32>, String> {
        let out = match self.output("tmux", &["list-panes", "-a", "-F", "#{pane_pid}"]) {
            Ok(out) => out,
            Err(err) if err.contains("no server running") => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(out
            .lines()
            .filter_map(|l| l.trim().parse::<i32>().ok())
            .collect())
    }

    fn runtime_processes(&self) -> Result<Vec<ProcessInfo>, String> {
        Ok(self.table()?
            .into_iter()
            .filter(|p| is_runtime(&p.cmd))
            .collect())
    }

    fn parent_pid(&self, pid: i32) -> Result<i32, String> {
        let out = self.output("ps", &["-o", "ppid=", "-p", &pid.to_string()])?;
        out.trim()
            .parse::<i32>()
            .map_err(|e| format!("parse ppid of {pid}: {e}"))
    }
}

/// Parse one `pid ppid args...` line.
fn parse_ps_line(line: &str) -> Option<ProcessInfo> {
    let mut fields = line.split_whitespace();
    let pid = fields.next()?.parse().ok()?;
    let ppid = fields.next()?.parse().ok()?;
    let cmd = fields.collect::<Vec<_>>().join(" ");
    if cmd.is_empty() {
        return None;
    }
    Some(ProcessInfo { pid, ppid, cmd })
}

/// tmux servers show up as `tmux: server` on Linux and as the plain client
/// command line (`tmux new-session ...`) elsewhere once daemonized.
fn is_tmux_server(cmd: &str) -> bool {
    let first = cmd.split_whitespace().next().unwrap_or_default();
    let base = Path::new(first)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    cmd.starts_with("tmux: server") || (base == "tmux" && cmd.contains("new-session"))
}

/// The runtime binary itself, or an interpreter running it.
fn is_runtime(cmd: &str) -> bool {
    let mut args = cmd.split_whitespace().map(|arg| {
        Path::new(arg)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    });
    match args.next() {
        Some(base) if RUNTIME_BINARIES.contains(&base) => true,
        Some("node" | "bun") => args.next().is_some_and(|s| RUNTIME_BINARIES.contains(&s)),
        _ => false,
    }
}

/// Fixed process table for tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProcessLister {
    pub server_pids: Vec<i32>,
    pub pane_pids: Vec<i32>,
    pub runtimes: Vec<ProcessInfo>,
    pub parents: BTreeMap<i32, i32>,
    pub list_error: Option<String>,
}

impl InMemoryProcessLister {
    pub fn new(server_pids: &[i32], pane_pids: &[i32]) -> Self {
        Self {
            server_pids: server_pids.to_vec(),
            pane_pids: pane_pids.to_vec(),
            ..Self::default()
        }
    }

    /// Add a runtime process and record its parent link.
    pub fn runtime(mut self, pid: i32, ppid: i32, cmd: &str) -> Self {
        self.runtimes.push(ProcessInfo {
            pid,
            ppid,
            cmd: cmd.to_string(),
        });
        self.parents.insert(pid, ppid);
        self
    }

    pub fn parent(mut self, pid: i32, ppid: i32) -> Self {
        self.parents.insert(pid, ppid);
        self
    }
}

impl ProcessLister for InMemoryProcessLister {
    fn tmux_server_pids(&self) -> Result<Vec<i32>, String> {
        match &self.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.server_pids.clone()),
        }
    }

    fn pane_pids(&self) -> Result<Vec<i32>, String> {
        Ok(self.pane_pids.clone())
    }

    fn runtime_processes(&self) -> Result<Vec<ProcessInfo>, String> {
        match &self.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.runtimes.clone()),
        }
    }

    fn parent_pid(&self, pid: i32) -> Result<i32, String> {
        self.parents
            .get(&pid)
            .copied()
            .ok_or_else(|| format!("no such process: {pid}"))
    }
}

/// Liveness of a process id.
pub trait PidProbe: Send + Sync {
    fn is_alive(&self, pid: i32) -> bool;
}

/// Signal 0 probe: a live process either accepts it or refuses with EPERM.
pub struct SystemPidProbe;

impl PidProbe for SystemPidProbe {
    fn is_alive(&self, pid: i32) -> bool {
        if pid <= 0 {
            return false;
        }
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

/// Fixed set of live pids.
#[derive(Debug, Default, Clone)]
pub struct StaticPidProbe {
    alive: BTreeSet<i32>,
}

impl StaticPidProbe {
    pub fn alive(pids: &[i32]) -> Self {
        Self {
            alive: pids.iter().copied().collect(),
        }
    }
}

impl PidProbe for StaticPidProbe {
    fn is_alive(&self, pid: i32) -> bool {
        self.alive.contains(&pid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::probe::{CommandOutput, ScriptedCommandRunner};

    #[test]
    fn ps_lines_parse() {
        let p = parse_ps_line("  4242     1 /usr/bin/claude --resume abc").unwrap();
        assert_eq!(p.pid, 4242);
        assert_eq!(p.ppid, 1);
        assert_eq!(p.cmd, "/usr/bin/claude --resume abc");
        assert!(parse_ps_line("PID PPID COMMAND").is_none());
        assert!(parse_ps_line("12 1").is_none());
    }

    #[test]
    fn shell_lister_reads_ps_and_panes() {
        let runner = ScriptedCommandRunner::default()
            .respond(
                "ps -eo pid=,ppid=,args=",
                CommandOutput::ok("  1  0 /sbin/init\n 40  1 tmux: server (/tmp/tmux-0/default)\n 77 41 claude --resume\n"),
            )
            .respond("tmux list-panes -a -F #{pane_pid}", CommandOutput::ok("41\n"))
            .respond("ps -o ppid= -p 41", CommandOutput::ok("   40\n"));
        let lister = ShellProcessLister::new(Arc::new(runner), Duration::from_secs(10));
        assert_eq!(lister.tmux_server_pids().unwrap(), vec![40]);
        assert_eq!(lister.pane_pids().unwrap(), vec![41]);
        assert_eq!(
            lister.runtime_processes().unwrap(),
            vec![ProcessInfo {
                pid: 77,
                ppid: 41,
                cmd: "claude --resume".to_string()
            }]
        );
        assert_eq!(lister.parent_pid(41).unwrap(), 40);
        assert!(lister.parent_pid(99).is_err());
    }

    #[test]
    fn recognizes_tmux_servers() {
        assert!(is_tmux_server("tmux: server (/tmp/tmux-1000/default)"));
        assert!(is_tmux_server("/usr/bin/tmux new-session -d -s hq-mayor"));
        assert!(!is_tmux_server("tmux attach -t hq-mayor"));
        assert!(!is_tmux_server("vim tmux.conf"));
    }

    #[test]
    fn recognizes_runtimes() {
        assert!(is_runtime("claude --dangerously-skip-permissions"));
        assert!(is_runtime("node /usr/local/bin/claude"));
        assert!(is_runtime("/opt/claude-code"));
        assert!(!is_runtime("claudette"));
        assert!(!is_runtime("grep claude"));
    }

    #[test]
    fn own_pid_is_alive() {
        let me = i32::try_from(std::process::id()).unwrap();
        assert!(SystemPidProbe.is_alive(me));
        assert!(!SystemPidProbe.is_alive(0));
        assert!(!SystemPidProbe.is_alive(-5));
    }
}
