use std::collections::HashSet;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::SecondsFormat;
use serde::Serialize;
use tabwriter::TabWriter;
use tracing::{debug, info};
use towndoc_core::config::{
    load_config, load_config_with_env, Config, DoctorConfig, ENV_TOWN_ROOT,
};
use towndoc_core::fsutil::dir_exists;
use towndoc_core::logging;
use towndoc_doctor::checks::default_checks;
use towndoc_doctor::doctor::format_duration;
use towndoc_doctor::filter::{
    filter_by_category, filter_checks, suggest_category, suggest_check, FilterError,
};
use towndoc_doctor::probe::Providers;
use towndoc_doctor::{
    Category, Check, CheckContext, CheckResult, CheckStatus, Doctor, Report, StreamOptions,
};

const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(1);
const TREE_LAST: &str = "\u{2514} "; // └
const SEPARATOR: &str = "\u{2500}"; // ─
const SEPARATOR_WIDTH: usize = 40;

/// Everything the command needs from its surroundings.
pub trait DoctorBackend {
    /// Load and validate configuration. `config_file` is the `--config` value.
    fn load_config(&self, config_file: Option<&str>) -> Result<Config, String>;
    /// Collaborators for one run; `config` carries their timeouts.
    fn providers(&self, config: &DoctorConfig) -> Providers;
    fn current_dir(&self) -> Result<PathBuf, String>;
    /// Progress is streamed to stderr only for an interactive terminal.
    fn is_tty(&self) -> bool;
}

/// Real config file, environment, collaborators and terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDoctorBackend;

impl DoctorBackend for SystemDoctorBackend {
    fn load_config(&self, config_file: Option<&str>) -> Result<Config, String> {
        let (config, path) = load_config(config_file).map_err(|e| format!("error: {e}"))?;
        config.validate().map_err(|e| format!("error: {e}"))?;
        logging::init(&config.logging).map_err(|e| format!("error: {e}"))?;
        if let Some(path) = path {
            debug!(path = %path.display(), "loaded config file");
        }
        Ok(config)
    }

    fn providers(&self, config: &DoctorConfig) -> Providers {
        Providers::system(config.command_timeout())
    }

    fn current_dir(&self) -> Result<PathBuf, String> {
        std::env::current_dir().map_err(|e| format!("error: resolve working directory: {e}"))
    }

    fn is_tty(&self) -> bool {
        std::io::stdout().is_terminal()
    }
}

/// Fixed config and in-memory collaborators for tests.
pub struct InMemoryDoctorBackend {
    pub config: Config,
    pub providers: Providers,
    pub cwd: PathBuf,
}

impl InMemoryDoctorBackend {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            config: Config::default(),
            providers: Providers::in_memory(),
            cwd: cwd.into(),
        }
    }

    pub fn with_providers(mut self, providers: Providers) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

impl DoctorBackend for InMemoryDoctorBackend {
    fn load_config(&self, config_file: Option<&str>) -> Result<Config, String> {
        let config = match config_file {
            Some(file) => load_config_with_env(Some(file), |_| None)
                .map(|(config, _)| config)
                .map_err(|e| format!("error: {e}"))?,
            None => self.config.clone(),
        };
        config.validate().map_err(|e| format!("error: {e}"))?;
        Ok(config)
    }

    fn providers(&self, _config: &DoctorConfig) -> Providers {
        self.providers.clone()
    }

    fn current_dir(&self) -> Result<PathBuf, String> {
        Ok(self.cwd.clone())
    }

    fn is_tty(&self) -> bool {
        false
    }
}

/// Test-only command output.
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

pub fn run_for_test(args: &[&str], backend: &dyn DoctorBackend) -> CommandOutput {
    let owned_args: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = run_with_backend(&owned_args, backend, &mut stdout, &mut stderr);
    CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    }
}

pub fn run_with_backend(
    args: &[String],
    backend: &dyn DoctorBackend,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    match execute(args, backend, stdout) {
        Ok(0) => 0,
        Ok(errors) => {
            let _ = writeln!(stderr, "doctor found {errors} error(s)");
            1
        }
        Err(message) => {
            let _ = writeln!(stderr, "{message}");
            1
        }
    }
}

/// Returns the number of errors that should fail the command.
fn execute(
    args: &[String],
    backend: &dyn DoctorBackend,
    stdout: &mut dyn Write,
) -> Result<usize, String> {
    let parsed = parse_args(args)?;
    if parsed.help {
        write!(stdout, "{HELP_TEXT}").map_err(|e| e.to_string())?;
        return Ok(0);
    }

    let config = backend.load_config(parsed.config.as_deref())?;
    let providers = backend.providers(&config.doctor);
    let all = default_checks(&providers, &config.doctor);
    if parsed.list {
        write_list(&all, parsed.json, stdout)?;
        return Ok(0);
    }

    let selection = select_checks(all, &parsed.selection)?;
    let town_root = resolve_town_root(&config, backend)?;
    let mut ctx = CheckContext::new(&town_root);
    if let Some(rig) = &parsed.rig {
        if !dir_exists(&town_root.join(rig)) {
            return Err(format!(
                "error: rig {rig:?} not found in {}",
                town_root.display()
            ));
        }
        ctx = ctx.with_rig(rig);
    }
    ctx.verbose = parsed.verbose;
    ctx.restart_sessions = parsed.restart_sessions;

    let preview = parsed.dry_run;
    let apply = parsed.fix && !preview;
    let slow = parsed
        .slow
        .or_else(|| config.slow_threshold())
        .filter(|threshold| !threshold.is_zero());
    let fixable: HashSet<&'static str> = selection
        .checks
        .iter()
        .filter(|c| c.capability().can_fix())
        .map(|c| c.name())
        .collect();
    let single = selection.single.then(|| selection.checks[0].name());

    let doctor = Doctor::with_checks(selection.checks);
    info!(
        town = %town_root.display(),
        rig = parsed.rig.as_deref().unwrap_or(""),
        checks = doctor.checks().len(),
        fix = apply,
        "starting doctor"
    );

    let tty = backend.is_tty() && !parsed.json;
    let opts = StreamOptions {
        tty,
        slow_threshold: slow,
    };
    let mut sink = std::io::sink();
    let mut terminal = std::io::stderr();
    let progress: &mut dyn Write = if tty { &mut terminal } else { &mut sink };
    let report = if apply {
        doctor.fix_streaming(&ctx, progress, opts)
    } else {
        doctor.run_streaming(&ctx, progress, opts)
    };
    info!(
        ok = report.summary.ok,
        warnings = report.summary.warnings,
        errors = report.summary.errors,
        fixed = report.summary.fixed,
        "doctor finished"
    );

    let failing = report.summary.errors;
    if parsed.json {
        write_json(&report, stdout)?;
        return Ok(failing);
    }

    let mut write_human = || -> std::io::Result<()> {
        if let Some(label) = &selection.label {
            writeln!(stdout)?;
            let suffix = if preview { " (dry run)" } else { "" };
            writeln!(stdout, "Running: {label}{suffix}")?;
        }
        write_results(&report, parsed.verbose, slow, stdout)?;
        if preview {
            write_dry_run_hints(&report, &fixable, stdout)?;
        }
        match single {
            Some(name) => {
                if apply && !fixable.contains(name) && !report.is_healthy() {
                    writeln!(stdout, "     {TREE_LAST}This check does not support auto-fix.")?;
                }
            }
            None => write_summary(&report, stdout)?,
        }
        Ok(())
    };
    write_human().map_err(|e| e.to_string())?;
    Ok(failing)
}

/// Nearest ancestor of `start`, itself included, holding a `mayor/` directory.
pub fn find_town_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir_exists(&dir.join("mayor")))
        .map(Path::to_path_buf)
}

fn resolve_town_root(config: &Config, backend: &dyn DoctorBackend) -> Result<PathBuf, String> {
    if let Some(root) = &config.town_root {
        return Ok(root.clone());
    }
    let cwd = backend.current_dir()?;
    find_town_root(&cwd).ok_or_else(|| {
        format!(
            "error: not inside a town (no mayor/ directory above {}); set {ENV_TOWN_ROOT} or town_root in the config file",
            cwd.display()
        )
    })
}

// --- Check selection ---

struct Selection {
    checks: Vec<Box<dyn Check>>,
    /// Header for targeted runs.
    label: Option<String>,
    single: bool,
}

impl Selection {
    fn everything(checks: Vec<Box<dyn Check>>) -> Self {
        Self {
            checks,
            label: None,
            single: false,
        }
    }
}

/// `[category] [check]`, `[check]`, or nothing. `all` stands for every
/// category.
fn select_checks(all: Vec<Box<dyn Check>>, selection: &[String]) -> Result<Selection, String> {
    let first = selection.first().map(String::as_str);
    let second = selection.get(1).map(String::as_str);
    let Some(first) = first else {
        return Ok(Selection::everything(all));
    };

    if first.eq_ignore_ascii_case("all") {
        return match second {
            Some(name) => select_by_name(all, name),
            None => Ok(Selection::everything(all)),
        };
    }

    if let Some(category) = Category::resolve(first) {
        let checks = filter_by_category(all, first, second).map_err(|err| filter_error(&err))?;
        if checks.is_empty() {
            return Err(format!("error: no checks in category {}", category.as_str()));
        }
        if second.is_some() {
            return Ok(Selection {
                label: Some(checks[0].name().to_string()),
                checks,
                single: true,
            });
        }
        return Ok(Selection {
            label: Some(format!("{} ({} checks)", category.as_str(), checks.len())),
            checks,
            single: false,
        });
    }

    if second.is_some() {
        return Err(filter_error(&FilterError::UnknownCategory {
            input: first.to_string(),
            suggestions: suggest_category(first),
        }));
    }
    select_by_name(all, first)
}

fn select_by_name(all: Vec<Box<dyn Check>>, name: &str) -> Result<Selection, String> {
    let names: Vec<&'static str> = all.iter().map(|c| c.name()).collect();
    let mut result = filter_checks(all, &[name.to_string()]);
    if result.matched.is_empty() {
        return Err(format!(
            "error: {}",
            with_suggestions(format!("unknown check {name:?}"), &suggest_check(names, name))
        ));
    }
    let single = result.matched.len() == 1;
    let label = if single {
        result.matched[0].name().to_string()
    } else {
        format!("{} checks", result.matched.len())
    };
    Ok(Selection {
        checks: std::mem::take(&mut result.matched),
        label: Some(label),
        single,
    })
}

fn filter_error(err: &FilterError) -> String {
    format!("error: {}", with_suggestions(err.to_string(), err.suggestions()))
}

fn with_suggestions(mut message: String, suggestions: &[String]) -> String {
    let lower: Vec<String> = suggestions.iter().map(|s| s.to_lowercase()).collect();
    match lower.as_slice() {
        [] => {}
        [one] => message.push_str(&format!("\n\n  Did you mean: {one}?")),
        many => message.push_str(&format!("\n\n  Did you mean one of: {}?", many.join(", "))),
    }
    message.push_str("\n\n  Run \"towndoc --list\" to see all available checks.");
    message
}

// --- Human output ---

fn write_results(
    report: &Report,
    verbose: bool,
    slow: Option<Duration>,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    for (category, results) in report.grouped() {
        writeln!(out)?;
        writeln!(out, "{}", category.as_str())?;
        for result in results {
            write!(out, "  {}  {}", result.status.icon(), result.name)?;
            if !result.message.is_empty() {
                write!(out, " {}", result.message)?;
            }
            if slow.is_some_and(|threshold| result.elapsed >= threshold) {
                write!(out, " ({})", format_duration(result.elapsed))?;
            }
            writeln!(out)?;
            if verbose || result.status != CheckStatus::Ok {
                for detail in &result.details {
                    writeln!(out, "     {TREE_LAST}{detail}")?;
                }
            }
        }
    }
    Ok(())
}

fn write_dry_run_hints(
    report: &Report,
    fixable: &HashSet<&'static str>,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    let pending: Vec<&CheckResult> = report
        .results
        .iter()
        .filter(|r| r.status != CheckStatus::Ok && fixable.contains(r.name.as_str()))
        .collect();
    if pending.is_empty() {
        return Ok(());
    }
    writeln!(out)?;
    for result in pending {
        writeln!(out, "  Would fix: {}: {}", result.name, result.message)?;
    }
    Ok(())
}

fn write_summary(report: &Report, out: &mut dyn Write) -> std::io::Result<()> {
    let summary = &report.summary;
    writeln!(out)?;
    writeln!(out, "{}", SEPARATOR.repeat(SEPARATOR_WIDTH))?;
    let mut line = format!(
        "{} {} passed  {} {} warnings  {} {} failed",
        CheckStatus::Ok.icon(),
        summary.ok,
        CheckStatus::Warning.icon(),
        summary.warnings,
        CheckStatus::Error.icon(),
        summary.errors
    );
    if summary.fixed > 0 {
        line.push_str(&format!("  {} fixed", summary.fixed));
    }
    if summary.slow > 0 {
        line.push_str(&format!("  {} slow", summary.slow));
    }
    writeln!(out, "{line}")?;
    writeln!(out)?;

    let mut problems: Vec<&CheckResult> = report
        .results
        .iter()
        .filter(|r| r.status != CheckStatus::Ok)
        .collect();
    if problems.is_empty() {
        return writeln!(out, "{} All checks passed", CheckStatus::Ok.icon());
    }

    // Errors first, otherwise run order.
    problems.sort_by_key(|r| std::cmp::Reverse(r.status));
    writeln!(out, "{}  WARNINGS", CheckStatus::Warning.icon())?;
    for (i, result) in problems.iter().enumerate() {
        writeln!(
            out,
            "  {}  {}. {}: {}",
            result.status.icon(),
            i + 1,
            result.name,
            result.message
        )?;
        if let Some(hint) = &result.fix_hint {
            writeln!(out, "        {TREE_LAST}{hint}")?;
        }
    }
    Ok(())
}

fn write_list(checks: &[Box<dyn Check>], json: bool, out: &mut dyn Write) -> Result<(), String> {
    if json {
        let entries: Vec<CheckEntryJson<'_>> = checks
            .iter()
            .map(|c| CheckEntryJson {
                name: c.name(),
                category: c.category().as_str(),
                description: c.description(),
                fixable: c.capability().can_fix(),
            })
            .collect();
        serde_json::to_writer_pretty(&mut *out, &entries).map_err(|e| e.to_string())?;
        writeln!(out).map_err(|e| e.to_string())?;
        return Ok(());
    }

    let mut tw = TabWriter::new(&mut *out).padding(2);
    for category in Category::ORDER.into_iter().chain([Category::Other]) {
        if !checks.iter().any(|c| c.category() == category) {
            continue;
        }
        writeln!(tw, "{}:", category.as_str()).map_err(|e| e.to_string())?;
        for check in checks.iter().filter(|c| c.category() == category) {
            let fix = if check.capability().can_fix() {
                "(fixable)"
            } else {
                ""
            };
            writeln!(tw, "  {}\t{}\t{}", check.name(), fix, check.description())
                .map_err(|e| e.to_string())?;
        }
        writeln!(tw).map_err(|e| e.to_string())?;
    }
    tw.flush().map_err(|e| e.to_string())?;
    writeln!(out, "Checks marked (fixable) can be repaired with --fix.").map_err(|e| e.to_string())?;
    Ok(())
}

// --- JSON output ---

#[derive(Debug, Serialize)]
struct ReportJson<'a> {
    timestamp: String,
    summary: SummaryJson,
    checks: Vec<CheckJson<'a>>,
}

#[derive(Debug, Serialize)]
struct SummaryJson {
    total: usize,
    ok: usize,
    warnings: usize,
    errors: usize,
    fixed: usize,
    slow: usize,
}

#[derive(Debug, Serialize)]
struct CheckJson<'a> {
    name: &'a str,
    category: &'a str,
    status: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    details: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    fix_hint: Option<&'a str>,
    fixed: bool,
    elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
struct CheckEntryJson<'a> {
    name: &'a str,
    category: &'a str,
    description: &'a str,
    fixable: bool,
}

fn write_json(report: &Report, out: &mut dyn Write) -> Result<(), String> {
    let summary = &report.summary;
    let json = ReportJson {
        timestamp: report.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        summary: SummaryJson {
            total: summary.total,
            ok: summary.ok,
            warnings: summary.warnings,
            errors: summary.errors,
            fixed: summary.fixed,
            slow: summary.slow,
        },
        checks: report
            .results
            .iter()
            .map(|r| CheckJson {
                name: &r.name,
                category: r.category.as_str(),
                status: r.status.as_str(),
                message: &r.message,
                details: &r.details,
                fix_hint: r.fix_hint.as_deref(),
                fixed: r.fixed,
                elapsed_ms: u64::try_from(r.elapsed.as_millis()).unwrap_or(u64::MAX),
            })
            .collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &json).map_err(|e| e.to_string())?;
    writeln!(out).map_err(|e| e.to_string())?;
    Ok(())
}

// --- Argument parsing ---

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ParsedArgs {
    help: bool,
    fix: bool,
    dry_run: bool,
    json: bool,
    verbose: bool,
    list: bool,
    restart_sessions: bool,
    rig: Option<String>,
    config: Option<String>,
    /// Explicit `--slow`; zero disables highlighting.
    slow: Option<Duration>,
    selection: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<ParsedArgs, String> {
    let mut parsed = ParsedArgs::default();
    let mut index = 0usize;
    if args.first().is_some_and(|token| token == "doctor") {
        index += 1;
    }

    while let Some(token) = args.get(index) {
        index += 1;
        match token.as_str() {
            "-h" | "--help" | "help" => parsed.help = true,
            "--fix" => parsed.fix = true,
            "--dry-run" => parsed.dry_run = true,
            "--json" => parsed.json = true,
            "-v" | "--verbose" => parsed.verbose = true,
            "--list" | "list" => parsed.list = true,
            "--restart-sessions" => parsed.restart_sessions = true,
            "--slow" => parsed.slow = Some(DEFAULT_SLOW_THRESHOLD),
            "--rig" | "--config" => {
                let value = args
                    .get(index)
                    .filter(|value| !value.starts_with('-'))
                    .ok_or_else(|| format!("error: {token} requires a value"))?;
                index += 1;
                set_valued(&mut parsed, token, value)?;
            }
            flag if flag.starts_with("--") && flag.contains('=') => {
                let (name, value) = flag.split_once('=').unwrap_or((flag, ""));
                set_valued(&mut parsed, name, value)?;
            }
            flag if flag.starts_with('-') => {
                return Err(format!("error: unknown argument for doctor: '{flag}'"));
            }
            other => parsed.selection.push(other.to_string()),
        }
    }

    if parsed.selection.len() > 2 {
        return Err(format!(
            "error: doctor takes at most 2 positional arguments ([category] [check]), got {}",
            parsed.selection.len()
        ));
    }
    Ok(parsed)
}

fn set_valued(parsed: &mut ParsedArgs, name: &str, value: &str) -> Result<(), String> {
    let value = value.trim();
    match name {
        "--slow" => {
            parsed.slow = Some(parse_duration(value).map_err(|e| format!("error: invalid --slow duration {value:?}: {e}"))?);
            return Ok(());
        }
        "--rig" | "--config" if value.is_empty() => {
            return Err(format!("error: {name} requires a value"));
        }
        "--rig" => parsed.rig = Some(value.to_string()),
        "--config" => parsed.config = Some(value.to_string()),
        _ => return Err(format!("error: unknown argument for doctor: '{name}'")),
    }
    Ok(())
}

/// `1.5s`, `500ms`, `2m`, `1h`; a bare `0` disables.
fn parse_duration(input: &str) -> Result<Duration, String> {
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    let split = input
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| "missing unit (ms, s, m, h)".to_string())?;
    let (number, unit) = input.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid number {number:?}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("invalid number {number:?}"));
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown unit {other:?}")),
    };
    Ok(Duration::from_secs_f64(secs))
}

const HELP_TEXT: &str = "\
Run health checks on a town and optionally repair what they find.

Usage:
  towndoc [category] [check] [flags]
  towndoc --list

Categories:
  core, infrastructure, rig, patrol, configuration, cleanup, hooks

Examples:
  towndoc                          # Run all checks
  towndoc --fix                    # Run all checks and repair
  towndoc cleanup                  # Run the checks of one category
  towndoc cleanup orphan-sessions  # Run one check
  towndoc cleanup --fix --dry-run  # Preview repairs for a category

Flags:
      --config <path>      config file (default $XDG_CONFIG_HOME/towndoc/config.yaml)
      --dry-run            preview repairs without applying them
      --fix                repair detected problems where possible
  -h, --help               help for towndoc
      --json               print the report as JSON
      --list               list available checks
      --restart-sessions   restart patrol sessions after fixing their settings
      --rig <name>         check one rig only
      --slow[=<duration>]  highlight checks slower than the threshold (default 1s)
  -v, --verbose            show details for passing checks
";
