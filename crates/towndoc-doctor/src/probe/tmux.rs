//! Terminal multiplexer sessions.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{lock, run_stdout, CommandRunner};

/// Session-level tmux operations used by the session checks.
pub trait TmuxClient: Send + Sync {
    /// Names of all sessions on the default server. No server is an empty list.
    fn list_sessions(&self) -> Result<Vec<String>, String>;

    fn has_session(&self, name: &str) -> Result<bool, String>;

    fn kill_session(&self, name: &str) -> Result<(), String>;

    fn rename_session(&self, from: &str, to: &str) -> Result<(), String>;
}

/// Runs the `tmux` client against the default server, each call bounded by
/// `timeout`.
pub struct ShellTmuxClient {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ShellTmuxClient {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn tmux(&self, args: &[&str]) -> Result<String, String> {
        run_stdout(self.runner.as_ref(), "tmux", args, None, self.timeout)
    }
}

/// `=` forces an exact match instead of a prefix match.
fn exact(name: &str) -> String {
    format!("={name}")
}

impl TmuxClient for ShellTmuxClient {
    fn list_sessions(&self) -> Result<Vec<String>, String> {
        match self.tmux(&["list-sessions", "-F", "#{session_name}"]) {
            Ok(out) => Ok(out
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()),
            Err(err) if is_no_server(&err) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn has_session(&self, name: &str) -> Result<bool, String> {
        if name.trim().is_empty() {
            return Err("session name is required".to_string());
        }
        let out = self
            .runner
            .run("tmux", &["has-session", "-t", &exact(name)], None, self.timeout)?;
        Ok(out.success())
    }

    fn kill_session(&self, name: &str) -> Result<(), String> {
        if name.trim().is_empty() {
            return Err("session name is required".to_string());
        }
        self.tmux(&["kill-session", "-t", &exact(name)]).map(|_| ())
    }

    fn rename_session(&self, from: &str, to: &str) -> Result<(), String> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err("session names are required".to_string());
        }
        self.tmux(&["rename-session", "-t", &exact(from), to]).map(|_| ())
    }
}

fn is_no_server(err: &str) -> bool {
    err.contains("no server running") || err.contains("error connecting to")
}

/// Session table held in memory. Records every mutation.
#[derive(Debug, Default)]
pub struct InMemoryTmux {
    sessions: Mutex<BTreeSet<String>>,
    killed: Mutex<Vec<String>>,
    renamed: Mutex<Vec<(String, String)>>,
    list_error: Option<String>,
}

impl InMemoryTmux {
    pub fn with_sessions<I, S>(sessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sessions: Mutex::new(sessions.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn failing(err: &str) -> Self {
        Self {
            list_error: Some(err.to_string()),
            ..Self::default()
        }
    }

    pub fn sessions(&self) -> Vec<String> {
        lock(&self.sessions).iter().cloned().collect()
    }

    pub fn killed(&self) -> Vec<String> {
        lock(&self.killed).clone()
    }

    pub fn renamed(&self) -> Vec<(String, String)> {
        lock(&self.renamed).clone()
    }
}

impl TmuxClient for InMemoryTmux {
    fn list_sessions(&self) -> Result<Vec<String>, String> {
        if let Some(err) = &self.list_error {
            return Err(err.clone());
        }
        Ok(self.sessions())
    }

    fn has_session(&self, name: &str) -> Result<bool, String> {
        Ok(lock(&self.sessions).contains(name))
    }

    fn kill_session(&self, name: &str) -> Result<(), String> {
        if !lock(&self.sessions).remove(name) {
            return Err(format!("can't find session: {name}"));
        }
        lock(&self.killed).push(name.to_string());
        Ok(())
    }

    fn rename_session(&self, from: &str, to: &str) -> Result<(), String> {
        let mut sessions = lock(&self.sessions);
        if sessions.contains(to) {
            return Err(format!("duplicate session: {to}"));
        }
        if !sessions.remove(from) {
            return Err(format!("can't find session: {from}"));
        }
        sessions.insert(to.to_string());
        lock(&self.renamed).push((from.to_string(), to.to_string()));
        Ok(())
    }
}
