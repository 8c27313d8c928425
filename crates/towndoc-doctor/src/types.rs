use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use towndoc_core::TownLayout;

/// Outcome severity of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Ok => "\u{2713}",      // ✓
            Self::Warning => "!",
            Self::Error => "\u{2717}",   // ✗
        }
    }

    /// Plain-text prefix for non-interactive output.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Ok => "PASS",
            Self::Warning => "WARN",
            Self::Error => "FAIL",
        }
    }
}

/// Grouping used for display and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    Core,
    Infrastructure,
    Rig,
    Patrol,
    Configuration,
    Cleanup,
    Hooks,
    #[default]
    Other,
}

impl Category {
    /// Display order. `Other` always trails.
    pub const ORDER: [Category; 7] = [
        Category::Core,
        Category::Infrastructure,
        Category::Rig,
        Category::Patrol,
        Category::Configuration,
        Category::Cleanup,
        Category::Hooks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::Infrastructure => "Infrastructure",
            Self::Rig => "Rig",
            Self::Patrol => "Patrol",
            Self::Configuration => "Configuration",
            Self::Cleanup => "Cleanup",
            Self::Hooks => "Hooks",
            Self::Other => "Other",
        }
    }

    /// Case-insensitive lookup among the ordered categories.
    pub fn resolve(input: &str) -> Option<Category> {
        Self::ORDER
            .into_iter()
            .find(|cat| cat.as_str().eq_ignore_ascii_case(input.trim()))
    }
}

/// Read-only inputs shared by every check in one invocation.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub town_root: PathBuf,
    pub rig: Option<String>,
    pub verbose: bool,
    /// Allow repairs to cycle running patrol sessions.
    pub restart_sessions: bool,
}

impl CheckContext {
    pub fn new(town_root: impl Into<PathBuf>) -> Self {
        Self {
            town_root: town_root.into(),
            rig: None,
            verbose: false,
            restart_sessions: false,
        }
    }

    pub fn with_rig(mut self, rig: &str) -> Self {
        self.rig = Some(rig.to_string()).filter(|r| !r.is_empty());
        self
    }

    pub fn town_root(&self) -> &Path {
        &self.town_root
    }

    pub fn layout(&self) -> TownLayout {
        TownLayout::new(&self.town_root)
    }

    /// `town_root/rig` when a rig is selected.
    pub fn rig_path(&self) -> Option<PathBuf> {
        self.rig.as_deref().map(|rig| self.town_root.join(rig))
    }
}

/// Result of one check. Name and category are stamped by the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub details: Vec<String>,
    pub fix_hint: Option<String>,
    pub category: Category,
    pub fixed: bool,
    pub elapsed: Duration,
}

impl CheckResult {
    pub fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            status,
            message: message.into(),
            details: Vec::new(),
            fix_hint: None,
            category: Category::Other,
            fixed: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Ok, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Error, message)
    }

    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.details.extend(details.into_iter().map(Into::into));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub total: usize,
    pub ok: usize,
    pub warnings: usize,
    pub errors: usize,
    pub fixed: usize,
    pub slow: usize,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub timestamp: DateTime<Utc>,
    pub results: Vec<CheckResult>,
    pub summary: ReportSummary,
}

impl Report {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            results: Vec::new(),
            summary: ReportSummary::default(),
        }
    }

    pub fn add(&mut self, result: CheckResult) {
        self.summary.total += 1;
        match result.status {
            CheckStatus::Ok => self.summary.ok += 1,
            CheckStatus::Warning => self.summary.warnings += 1,
            CheckStatus::Error => self.summary.errors += 1,
        }
        if result.fixed {
            self.summary.fixed += 1;
        }
        self.results.push(result);
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.summary.warnings > 0
    }

    pub fn is_healthy(&self) -> bool {
        self.summary.errors == 0 && self.summary.warnings == 0
    }

    /// Results grouped by category in display order, `Other` last.
    pub fn grouped(&self) -> Vec<(Category, Vec<&CheckResult>)> {
        let mut groups = Vec::new();
        for cat in Category::ORDER.into_iter().chain([Category::Other]) {
            let members: Vec<&CheckResult> =
                self.results.iter().filter(|r| r.category == cat).collect();
            if !members.is_empty() {
                groups.push((cat, members));
            }
        }
        groups
    }
}
