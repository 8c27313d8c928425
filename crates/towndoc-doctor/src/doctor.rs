use std::io::Write;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::check::Check;
use crate::types::{CheckContext, CheckResult, CheckStatus, Report};

const PENDING_ICON: &str = "\u{25cb}"; // ○
const FIXED_ICON: &str = "\u{1f527}"; // 🔧
const SLOW_ICON: &str = "\u{23f3}"; // ⏳

/// How results are streamed while the doctor runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    /// Interactive terminal: overwrite a status line per check. Otherwise
    /// print one plain `PASS|WARN|FAIL|FIXED` line per check.
    pub tty: bool,
    /// Checks at or above this duration are flagged as slow.
    pub slow_threshold: Option<Duration>,
}

/// Ordered registry of checks.
#[derive(Default)]
pub struct Doctor {
    checks: Vec<Box<dyn Check>>,
}

impl Doctor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checks(checks: Vec<Box<dyn Check>>) -> Self {
        Self { checks }
    }

    pub fn register(&mut self, check: Box<dyn Check>) {
        self.checks.push(check);
    }

    pub fn register_all(&mut self, checks: impl IntoIterator<Item = Box<dyn Check>>) {
        self.checks.extend(checks);
    }

    pub fn checks(&self) -> &[Box<dyn Check>] {
        &self.checks
    }

    pub fn run(&self, ctx: &CheckContext) -> Report {
        self.execute(ctx, None, StreamOptions::default(), false)
    }

    /// Run every check and, for each non-Ok result from a repairable check,
    /// apply its plan and run it again.
    pub fn fix(&self, ctx: &CheckContext) -> Report {
        self.execute(ctx, None, StreamOptions::default(), true)
    }

    pub fn run_streaming(
        &self,
        ctx: &CheckContext,
        out: &mut dyn Write,
        opts: StreamOptions,
    ) -> Report {
        self.execute(ctx, Some(out), opts, false)
    }

    pub fn fix_streaming(
        &self,
        ctx: &CheckContext,
        out: &mut dyn Write,
        opts: StreamOptions,
    ) -> Report {
        self.execute(ctx, Some(out), opts, true)
    }

    fn execute(
        &self,
        ctx: &CheckContext,
        mut out: Option<&mut dyn Write>,
        opts: StreamOptions,
        fix: bool,
    ) -> Report {
        let mut report = Report::new(Utc::now());

        for check in &self.checks {
            if opts.tty {
                if let Some(w) = out.as_deref_mut() {
                    let _ = write!(w, "  {PENDING_ICON}  {}...", check.name());
                    let _ = w.flush();
                }
            }

            debug!(check = check.name(), "running check");
            let start = Instant::now();
            let outcome = check.run(ctx);
            let mut result = stamp(outcome.result, check.as_ref());

            if fix && result.status != CheckStatus::Ok && check.capability().can_fix() {
                if opts.tty {
                    if let Some(w) = out.as_deref_mut() {
                        let _ = write!(
                            w,
                            "\r  {}  {}{} (fixing)...",
                            result.status.icon(),
                            result.name,
                            message_suffix(&result.message)
                        );
                        let _ = w.flush();
                    }
                }

                info!(check = check.name(), status = result.status.as_str(), "attempting fix");
                match check.try_fix(ctx, &outcome.plan) {
                    Ok(()) => {
                        result = stamp(check.run(ctx).result, check.as_ref());
                        if result.status == CheckStatus::Ok {
                            result.message.push_str(" (fixed)");
                            result.fixed = true;
                            info!(check = check.name(), "fix verified");
                        } else {
                            warn!(
                                check = check.name(),
                                status = result.status.as_str(),
                                "problem remains after fix"
                            );
                        }
                    }
                    Err(err) => {
                        warn!(check = check.name(), error = %err, "fix failed");
                        result.details.push(format!("Fix failed: {err}"));
                    }
                }
            }

            result.elapsed = start.elapsed();
            debug!(
                check = check.name(),
                status = result.status.as_str(),
                elapsed_ms = result.elapsed.as_millis() as u64,
                "check finished"
            );

            if let Some(w) = out.as_deref_mut() {
                let slow = opts
                    .slow_threshold
                    .is_some_and(|threshold| result.elapsed >= threshold);
                if slow {
                    report.summary.slow += 1;
                }
                let _ = write_line(w, &result, slow, opts.tty);
            }

            report.add(result);
        }

        report
    }
}

fn stamp(mut result: CheckResult, check: &dyn Check) -> CheckResult {
    if result.name.is_empty() {
        result.name = check.name().to_string();
    }
    result.category = check.category();
    result
}

fn message_suffix(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(" {message}")
    }
}

fn write_line(
    w: &mut dyn Write,
    result: &CheckResult,
    slow: bool,
    tty: bool,
) -> std::io::Result<()> {
    if tty {
        let icon = if result.fixed {
            FIXED_ICON
        } else {
            result.status.icon()
        };
        // The wrench is double width.
        let pad = match (slow, result.fixed) {
            (true, _) => SLOW_ICON,
            (false, true) => " ",
            (false, false) => "  ",
        };
        write!(w, "\r  {icon}{pad}{}{}", result.name, message_suffix(&result.message))?;
        if slow {
            write!(w, " ({})", format_duration(result.elapsed))?;
        }
    } else {
        let prefix = if result.fixed {
            "FIXED"
        } else {
            result.status.prefix()
        };
        write!(w, "{prefix}  {}", result.name)?;
        if !result.message.is_empty() {
            write!(w, "  {}", result.message)?;
        }
        if slow {
            write!(w, "  ({})", format_duration(result.elapsed))?;
        }
    }
    writeln!(w)?;
    w.flush()
}

pub fn format_duration(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::cell::{Cell, RefCell};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::check::{Capability, FixError, Outcome, RepairPlan};
    use crate::types::Category;

    struct Static {
        name: &'static str,
        status: CheckStatus,
    }

    impl Check for Static {
        fn name(&self) -> &'static str {
            self.name
        }
        fn description(&self) -> &'static str {
            "static"
        }
        fn category(&self) -> Category {
            Category::Core
        }
        fn run(&self, _ctx: &CheckContext) -> Outcome {
            CheckResult::new(self.status, format!("{} says so", self.name)).into()
        }
    }

    /// Reports a warning until fixed; remembers the plan it was handed.
    struct Repairable {
        broken: Cell<bool>,
        seen_plan: RefCell<Option<String>>,
        fail_fix: bool,
    }

    impl Repairable {
        fn new(fail_fix: bool) -> Self {
            Self {
                broken: Cell::new(true),
                seen_plan: RefCell::new(None),
                fail_fix,
            }
        }
    }

    impl Check for Repairable {
        fn name(&self) -> &'static str {
            "repairable"
        }
        fn description(&self) -> &'static str {
            "repairable"
        }
        fn category(&self) -> Category {
            Category::Cleanup
        }
        fn capability(&self) -> Capability {
            Capability::Repair
        }
        fn run(&self, _ctx: &CheckContext) -> Outcome {
            if self.broken.get() {
                Outcome::new(
                    CheckResult::warning("Found 1 thing"),
                    RepairPlan::new("thing".to_string()),
                )
            } else {
                CheckResult::ok("All good").into()
            }
        }
        fn try_fix(&self, _ctx: &CheckContext, plan: &RepairPlan) -> Result<(), FixError> {
            *self.seen_plan.borrow_mut() = plan.get::<String>().cloned();
            if self.fail_fix {
                return Err(FixError::Command("disk on fire".into()));
            }
            self.broken.set(false);
            Ok(())
        }
    }

    fn ctx() -> CheckContext {
        CheckContext::new("/town")
    }

    #[test]
    fn run_executes_every_check_in_order() {
        let doctor = Doctor::with_checks(vec![
            Box::new(Static { name: "a", status: CheckStatus::Error }),
            Box::new(Static { name: "b", status: CheckStatus::Ok }),
            Box::new(Static { name: "c", status: CheckStatus::Warning }),
        ]);
        let report = doctor.run(&ctx());
        let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.summary.ok, 1);
        assert!(report.results.iter().all(|r| r.category == Category::Core));
    }

    #[test]
    fn run_never_fixes() {
        let check = Repairable::new(false);
        let doctor = Doctor::with_checks(vec![Box::new(check)]);
        let report = doctor.run(&ctx());
        assert_eq!(report.summary.warnings, 1);
        assert_eq!(report.summary.fixed, 0);
    }

    #[test]
    fn fix_hands_plan_back_and_marks_converged_results() {
        let doctor = Doctor::with_checks(vec![Box::new(Repairable::new(false))]);
        let report = doctor.fix(&ctx());
        let result = &report.results[0];
        assert!(result.fixed);
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.message, "All good (fixed)");
        assert_eq!(report.summary.fixed, 1);
    }

    #[test]
    fn fix_failure_is_reported_in_details() {
        let doctor = Doctor::with_checks(vec![Box::new(Repairable::new(true))]);
        let report = doctor.fix(&ctx());
        let result = &report.results[0];
        assert!(!result.fixed);
        assert_eq!(result.status, CheckStatus::Warning);
        assert_eq!(result.details, vec!["Fix failed: disk on fire".to_string()]);
    }

    #[test]
    fn fix_skips_diagnose_only_checks() {
        let doctor = Doctor::with_checks(vec![Box::new(Static {
            name: "diag",
            status: CheckStatus::Error,
        })]);
        let report = doctor.fix(&ctx());
        assert!(report.results[0].details.is_empty());
        assert!(report.has_errors());
    }

    #[test]
    fn plain_stream_uses_text_prefixes() {
        let doctor = Doctor::with_checks(vec![
            Box::new(Static { name: "a", status: CheckStatus::Ok }),
            Box::new(Repairable::new(false)),
            Box::new(Static { name: "c", status: CheckStatus::Error }),
        ]);
        let mut out = Vec::new();
        doctor.fix_streaming(&ctx(), &mut out, StreamOptions::default());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "PASS  a  a says so\nFIXED  repairable  All good (fixed)\nFAIL  c  c says so\n"
        );
    }

    #[test]
    fn tty_stream_overwrites_pending_line() {
        let doctor = Doctor::with_checks(vec![Box::new(Static {
            name: "a",
            status: CheckStatus::Warning,
        })]);
        let mut out = Vec::new();
        doctor.run_streaming(
            &ctx(),
            &mut out,
            StreamOptions {
                tty: true,
                slow_threshold: None,
            },
        );
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "  \u{25cb}  a...\r  !  a a says so\n");
    }

    #[test]
    fn zero_threshold_flags_everything_slow() {
        let doctor = Doctor::with_checks(vec![Box::new(Static {
            name: "a",
            status: CheckStatus::Ok,
        })]);
        let mut out = Vec::new();
        let report = doctor.run_streaming(
            &ctx(),
            &mut out,
            StreamOptions {
                tty: false,
                slow_threshold: Some(Duration::ZERO),
            },
        );
        assert_eq!(report.summary.slow, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("PASS  a  a says so  ("), "{text}");
    }

    #[test]
    fn durations_format_compactly() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }
}
