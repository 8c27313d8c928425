//! Version-control queries.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{run_stdout, CommandRunner};

/// Git queries needed by the safe-repair policy and the rig checks. Paths
/// are absolute; `dir` is any directory inside the work tree.
pub trait GitStatusProvider: Send + Sync {
    /// Top of the enclosing work tree, `None` outside a repository.
    fn repo_root(&self, dir: &Path) -> Option<PathBuf>;

    /// Whether `path` is in the index of the repository at `repo`.
    fn is_tracked(&self, repo: &Path, path: &Path) -> Result<bool, String>;

    /// Whether `path` differs from the index or the index from HEAD.
    fn is_modified(&self, repo: &Path, path: &Path) -> Result<bool, String>;

    /// `git status --porcelain` output for the work tree at `dir`.
    fn status_porcelain(&self, dir: &Path) -> Result<String, String>;

    /// Directory holding shared repository data (`info/exclude`, hooks).
    fn common_dir(&self, dir: &Path) -> Result<PathBuf, String>;
}

/// Runs `git` inside the directory being asked about, each call bounded by
/// `timeout`.
pub struct ShellGit {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl ShellGit {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn git_stdout(&self, dir: &Path, args: &[&str]) -> Result<String, String> {
        run_stdout(self.runner.as_ref(), "git", args, Some(dir), self.timeout)
    }
}

impl GitStatusProvider for ShellGit {
    fn repo_root(&self, dir: &Path) -> Option<PathBuf> {
        self.git_stdout(dir, &["rev-parse", "--show-toplevel"])
            .ok()
            .map(|out| PathBuf::from(out.trim()))
            .filter(|p| !p.as_os_str().is_empty())
    }

    fn is_tracked(&self, repo: &Path, path: &Path) -> Result<bool, String> {
        let rel = relative(repo, path);
        let out = self.git_stdout(repo, &["ls-files", "--", &rel])?;
        Ok(!out.trim().is_empty())
    }

    fn is_modified(&self, repo: &Path, path: &Path) -> Result<bool, String> {
        let rel = relative(repo, path);
        for args in [
            ["diff", "--quiet", "--", rel.as_str()].as_slice(),
            ["diff", "--cached", "--quiet", "--", rel.as_str()].as_slice(),
        ] {
            let out = self.runner.run("git", args, Some(repo), self.timeout)?;
            match out.exit_code {
                0 => {}
                1 => return Ok(true),
                code => {
                    return Err(format!(
                        "git {} failed with exit code {code}: {}",
                        args.join(" "),
                        out.stderr.trim()
                    ))
                }
            }
        }
        Ok(false)
    }

    fn status_porcelain(&self, dir: &Path) -> Result<String, String> {
        self.git_stdout(dir, &["status", "--porcelain"])
    }

    fn common_dir(&self, dir: &Path) -> Result<PathBuf, String> {
        let out = self.git_stdout(dir, &["rev-parse", "--git-common-dir"])?;
        let common = PathBuf::from(out.trim());
        Ok(if common.is_absolute() {
            common
        } else {
            dir.join(common)
        })
    }
}

fn relative(repo: &Path, path: &Path) -> String {
    path.strip_prefix(repo)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Repositories described up front. A path is inside a repo when one of the
/// registered roots is its ancestor.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGit {
    roots: BTreeSet<PathBuf>,
    tracked: BTreeSet<PathBuf>,
    modified: BTreeSet<PathBuf>,
    porcelain: BTreeMap<PathBuf, Result<String, String>>,
}

impl InMemoryGit {
    pub fn repo(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(root.into());
        self
    }

    pub fn tracked(mut self, path: impl Into<PathBuf>) -> Self {
        self.tracked.insert(path.into());
        self
    }

    pub fn modified(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.tracked.insert(path.clone());
        self.modified.insert(path);
        self
    }

    pub fn porcelain(mut self, dir: impl Into<PathBuf>, out: Result<&str, &str>) -> Self {
        self.porcelain.insert(
            dir.into(),
            out.map(str::to_string).map_err(str::to_string),
        );
        self
    }
}

impl GitStatusProvider for InMemoryGit {
    fn repo_root(&self, dir: &Path) -> Option<PathBuf> {
        dir.ancestors()
            .find(|a| self.roots.contains(*a))
            .map(Path::to_path_buf)
    }

    fn is_tracked(&self, _repo: &Path, path: &Path) -> Result<bool, String> {
        Ok(self.tracked.contains(path))
    }

    fn is_modified(&self, _repo: &Path, path: &Path) -> Result<bool, String> {
        Ok(self.modified.contains(path))
    }

    fn status_porcelain(&self, dir: &Path) -> Result<String, String> {
        match self.porcelain.get(dir) {
            Some(out) => out.clone(),
            None if self.repo_root(dir).is_some() => Ok(String::new()),
            None => Err(format!("not a git repository: {}", dir.display())),
        }
    }

    fn common_dir(&self, dir: &Path) -> Result<PathBuf, String> {
        self.repo_root(dir)
            .map(|root| root.join(".git"))
            .ok_or_else(|| format!("not a git repository: {}", dir.display()))
    }
}
