//! Selecting a subset of registered checks from command-line arguments.

use std::collections::HashSet;

use thiserror::Error;

use crate::check::Check;
use crate::types::Category;

const MAX_SUGGESTIONS: usize = 3;
const MAX_SUGGESTION_DISTANCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unknown category {input:?}")]
    UnknownCategory {
        input: String,
        suggestions: Vec<String>,
    },
    #[error("unknown check {input:?} in category {category:?}")]
    UnknownCheck {
        input: String,
        category: String,
        suggestions: Vec<String>,
    },
}

impl FilterError {
    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::UnknownCategory { suggestions, .. } | Self::UnknownCheck { suggestions, .. } => {
                suggestions
            }
        }
    }
}

/// Checks selected by name or category plus the inputs that matched nothing.
pub struct FilterResult {
    pub matched: Vec<Box<dyn Check>>,
    pub unmatched: Vec<String>,
}

/// Lowercase kebab-case: `Orphan_Sessions` becomes `orphan-sessions`.
pub fn normalize_name(input: &str) -> String {
    input.to_lowercase().replace('_', "-")
}

/// Select checks by name or category. Per argument, an exact (normalized)
/// check name wins over a case-insensitive category. No arguments selects
/// everything. Each check appears at most once, in first-match order.
pub fn filter_checks(checks: Vec<Box<dyn Check>>, args: &[String]) -> FilterResult {
    if args.is_empty() {
        return FilterResult {
            matched: checks,
            unmatched: Vec::new(),
        };
    }

    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut unmatched = Vec::new();

    for arg in args {
        let normalized = normalize_name(arg);
        if let Some(idx) = checks
            .iter()
            .position(|c| normalize_name(c.name()) == normalized)
        {
            if seen.insert(idx) {
                order.push(idx);
            }
            continue;
        }

        let mut matched = false;
        for (idx, check) in checks.iter().enumerate() {
            if check.category().as_str().eq_ignore_ascii_case(arg) {
                matched = true;
                if seen.insert(idx) {
                    order.push(idx);
                }
            }
        }
        if !matched {
            unmatched.push(arg.clone());
        }
    }

    FilterResult {
        matched: take_in_order(checks, &order),
        unmatched,
    }
}

/// Category-first selection: all checks of `category`, or the single check
/// named `check_name` within it.
pub fn filter_by_category(
    checks: Vec<Box<dyn Check>>,
    category: &str,
    check_name: Option<&str>,
) -> Result<Vec<Box<dyn Check>>, FilterError> {
    if category.is_empty() {
        return Ok(checks);
    }
    let Some(resolved) = Category::resolve(category) else {
        return Err(FilterError::UnknownCategory {
            input: category.to_string(),
            suggestions: suggest_category(category),
        });
    };

    let in_category: Vec<usize> = checks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.category() == resolved)
        .map(|(idx, _)| idx)
        .collect();

    let Some(check_name) = check_name.filter(|name| !name.is_empty()) else {
        return Ok(take_in_order(checks, &in_category));
    };

    let normalized = normalize_name(check_name);
    if let Some(&idx) = in_category
        .iter()
        .find(|&&idx| normalize_name(checks[idx].name()) == normalized)
    {
        return Ok(take_in_order(checks, &[idx]));
    }

    let names: Vec<&str> = in_category.iter().map(|&idx| checks[idx].name()).collect();
    Err(FilterError::UnknownCheck {
        input: check_name.to_string(),
        category: resolved.as_str().to_string(),
        suggestions: suggest_check(names, check_name),
    })
}

/// Categories within edit distance two of `input`, excluding exact matches.
pub fn suggest_category(input: &str) -> Vec<String> {
    let input = input.to_lowercase();
    Category::ORDER
        .iter()
        .filter(|cat| {
            let dist = levenshtein(&input, &cat.as_str().to_lowercase());
            dist > 0 && dist <= MAX_SUGGESTION_DISTANCE
        })
        .map(|cat| cat.as_str().to_string())
        .collect()
}

/// Up to three check names closest to `input`, nearest first.
pub fn suggest_check<'a>(names: impl IntoIterator<Item = &'a str>, input: &str) -> Vec<String> {
    let input = normalize_name(input);
    let mut candidates: Vec<(usize, &str)> = names
        .into_iter()
        .map(|name| (levenshtein(&input, &normalize_name(name)), name))
        .filter(|(dist, _)| *dist > 0 && *dist <= MAX_SUGGESTION_DISTANCE)
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, name)| name.to_string())
        .collect()
}

/// Edit distance over chars with a single rolling row.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            let next = (row[j + 1] + 1).min(row[j] + 1).min(prev + cost);
            prev = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

fn take_in_order(checks: Vec<Box<dyn Check>>, order: &[usize]) -> Vec<Box<dyn Check>> {
    let mut slots: Vec<Option<Box<dyn Check>>> = checks.into_iter().map(Some).collect();
    order
        .iter()
        .filter_map(|&idx| slots.get_mut(idx).and_then(Option::take))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::check::Outcome;
    use crate::types::{CheckContext, CheckResult};

    struct Named(&'static str, Category);

    impl Check for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn description(&self) -> &'static str {
            "named"
        }
        fn category(&self) -> Category {
            self.1
        }
        fn run(&self, _ctx: &CheckContext) -> Outcome {
            CheckResult::ok("ok").into()
        }
    }

    fn registry() -> Vec<Box<dyn Check>> {
        vec![
            Box::new(Named("orphan-sessions", Category::Cleanup)),
            Box::new(Named("orphan-processes", Category::Cleanup)),
            Box::new(Named("stale-locks", Category::Rig)),
            Box::new(Named("dolt-metadata", Category::Infrastructure)),
        ]
    }

    fn names(checks: &[Box<dyn Check>]) -> Vec<&'static str> {
        checks.iter().map(|c| c.name()).collect()
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_args_selects_everything() {
        let result = filter_checks(registry(), &[]);
        assert_eq!(result.matched.len(), 4);
        assert!(result.unmatched.is_empty());
    }

    #[test]
    fn names_are_normalized_and_deduplicated() {
        let result = filter_checks(
            registry(),
            &args(&["Stale_Locks", "stale-locks", "orphan-sessions"]),
        );
        assert_eq!(names(&result.matched), vec!["stale-locks", "orphan-sessions"]);
    }

    #[test]
    fn category_args_expand_and_unknowns_are_collected() {
        let result = filter_checks(registry(), &args(&["cleanup", "bogus"]));
        assert_eq!(
            names(&result.matched),
            vec!["orphan-sessions", "orphan-processes"]
        );
        assert_eq!(result.unmatched, vec!["bogus".to_string()]);
    }

    #[test]
    fn category_first_filtering() {
        let all = filter_by_category(registry(), "CLEANUP", None).unwrap();
        assert_eq!(names(&all), vec!["orphan-sessions", "orphan-processes"]);

        let one = filter_by_category(registry(), "cleanup", Some("orphan_processes")).unwrap();
        assert_eq!(names(&one), vec!["orphan-processes"]);
    }

    #[test]
    fn unknown_category_suggests_near_misses() {
        let err = filter_by_category(registry(), "clenup", None).err().unwrap();
        assert_eq!(err.to_string(), "unknown category \"clenup\"");
        assert_eq!(err.suggestions(), ["Cleanup".to_string()]);
    }

    #[test]
    fn unknown_check_suggests_within_category() {
        let err = filter_by_category(registry(), "cleanup", Some("orphan-sesions"))
            .err()
            .unwrap();
        assert!(matches!(err, FilterError::UnknownCheck { .. }));
        assert_eq!(err.suggestions(), ["orphan-sessions".to_string()]);
    }

    #[test]
    fn suggestions_sort_by_distance_then_name() {
        let got = suggest_check(["abcd", "abce", "abxx", "zzzz"], "abcf");
        assert_eq!(got, vec!["abcd".to_string(), "abce".to_string(), "abxx".to_string()]);
        assert!(suggest_check(["abcf"], "abcf").is_empty());
    }

    #[test]
    fn levenshtein_distances() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("hooks", "hooks"), 0);
        assert_eq!(levenshtein("rig", "rgi"), 2);
    }
}
