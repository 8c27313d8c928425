//! Running collaborator command-line tools with a deadline.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use wait_timeout::ChildExt;

use super::lock;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait CommandRunner: Send + Sync {
    /// Run `program args` in `dir`. Spawn failures and timeouts are errors;
    /// a non-zero exit is reported through the output.
    fn run(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, String>;

    /// Resolve `program` on the search path.
    fn lookup_path(&self, program: &str) -> Option<PathBuf>;
}

/// Spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    path: Option<OsString>,
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self {
            path: std::env::var_os("PATH"),
        }
    }
}

impl SystemCommandRunner {
    pub fn new(path: Option<OsString>) -> Self {
        Self { path }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, String> {
        let command = display_command(program, args);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        if let Some(path) = &self.path {
            cmd.env("PATH", path);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| format!("spawn {command:?}: {err}"))?;

        let status = if timeout > Duration::ZERO {
            match child.wait_timeout(timeout) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!(
                        "{command:?} timed out after {}ms",
                        timeout.as_millis()
                    ));
                }
                Err(err) => return Err(format!("wait for {command:?}: {err}")),
            }
        } else {
            child
                .wait()
                .map_err(|err| format!("wait for {command:?}: {err}"))?
        };

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: read_pipe(child.stdout.take()),
            stderr: read_pipe(child.stderr.take()),
        })
    }

    fn lookup_path(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            let path = PathBuf::from(program);
            return is_executable(&path).then_some(path);
        }
        let search = self.path.as_ref()?;
        std::env::split_paths(search)
            .map(|dir| dir.join(program))
            .find(|candidate| is_executable(candidate))
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut out = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut out);
    }
    out
}

fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// Canned responses keyed by the full command line. Unscripted commands fail
/// to spawn. Every call is recorded with its working directory.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    responses: BTreeMap<String, Result<CommandOutput, String>>,
    on_path: BTreeSet<String>,
    calls: Mutex<Vec<(String, Option<PathBuf>)>>,
}

impl ScriptedCommandRunner {
    pub fn respond(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.insert(command.to_string(), Ok(output));
        if let Some(program) = command.split_whitespace().next() {
            self.on_path.insert(program.to_string());
        }
        self
    }

    pub fn fail(mut self, command: &str, err: &str) -> Self {
        self.responses
            .insert(command.to_string(), Err(err.to_string()));
        if let Some(program) = command.split_whitespace().next() {
            self.on_path.insert(program.to_string());
        }
        self
    }

    pub fn calls(&self) -> Vec<(String, Option<PathBuf>)> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        dir: Option<&Path>,
        _timeout: Duration,
    ) -> Result<CommandOutput, String> {
        let command = display_command(program, args);
        lock(&self.calls).push((command.clone(), dir.map(Path::to_path_buf)));
        match self.responses.get(&command) {
            Some(response) => response.clone(),
            None => Err(format!("spawn {command:?}: not found")),
        }
    }

    fn lookup_path(&self, program: &str) -> Option<PathBuf> {
        self.on_path
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}
