//! Boolean predicate expressions over patch targets.
//!
//! An expression is a comma-separated list of terms, each
//! `Keyword:value|value|…` or a bare constant. Within a term values OR
//! together; across terms the results OR together; a `Conjunction` term
//! flips either scope to AND. Any value may be negated with a leading `!`.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use log::warn;
use regex::RegexBuilder;

use crate::context::EngineContext;
use crate::version::EngineVersion;

/// Evaluates predicate expressions against one engine checkout.
pub struct PredicateEvaluator<'a> {
    ctx: &'a EngineContext,
}

impl<'a> PredicateEvaluator<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Evaluates `expr` for the given target path (relative to the engine
    /// source root). Unknown keywords warn and contribute `false`.
    pub fn eval(&self, expr: &str, target: &Path) -> bool {
        let terms: Vec<&str> = expr
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return false;
        }

        // Conjunction terms configure scopes before anything is evaluated.
        let mut root_conjunction = false;
        let mut value_conjunction: Vec<String> = Vec::new();
        for term in &terms {
            let (keyword, values) = split_term(term);
            if !keyword.eq_ignore_ascii_case("Conjunction") {
                continue;
            }
            match values {
                None => root_conjunction = true,
                Some(values) => {
                    for value in values.split('|').map(str::trim) {
                        if value.eq_ignore_ascii_case("Root") {
                            root_conjunction = true;
                        } else {
                            value_conjunction.push(value.to_string());
                        }
                    }
                }
            }
        }

        let mut root: Option<bool> = None;
        for term in &terms {
            let (keyword, values) = split_term(term);
            if keyword.eq_ignore_ascii_case("Conjunction") {
                continue;
            }
            let conjunctive = value_conjunction
                .iter()
                .any(|k| k.eq_ignore_ascii_case(keyword));
            let result = self.eval_term(keyword, values, conjunctive, target);
            root = Some(match root {
                None => result,
                Some(acc) if root_conjunction => acc && result,
                Some(acc) => acc || result,
            });
        }
        root.unwrap_or(false)
    }

    fn eval_term(
        &self,
        keyword: &str,
        values: Option<&str>,
        conjunctive: bool,
        target: &Path,
    ) -> bool {
        match keyword {
            k if k.eq_ignore_ascii_case("Always") => return true,
            k if k.eq_ignore_ascii_case("Never") => return false,
            _ => {}
        }
        let Some(values) = values else {
            warn!("predicate keyword '{keyword}' requires values, treating as false");
            return false;
        };
        let mut acc: Option<bool> = None;
        for raw in values.split('|').map(str::trim).filter(|v| !v.is_empty()) {
            let (negated, value) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, raw),
            };
            let result = self.eval_value(keyword, value, target) != negated;
            acc = Some(match acc {
                None => result,
                Some(acc) if conjunctive => acc && result,
                Some(acc) => acc || result,
            });
        }
        acc.unwrap_or(false)
    }

    fn eval_value(&self, keyword: &str, value: &str, target: &Path) -> bool {
        match keyword {
            k if k.eq_ignore_ascii_case("NameMatches") => {
                let name = target
                    .file_name()
                    .map(|n| n.to_string_lossy())
                    .unwrap_or_default();
                match RegexBuilder::new(value).case_insensitive(true).build() {
                    Ok(re) => re.is_match(&name),
                    Err(e) => {
                        warn!("invalid NameMatches pattern '{value}': {e}");
                        false
                    }
                }
            }
            k if k.eq_ignore_ascii_case("TargetExists") => {
                self.ctx.engine_root().join(normalize_path(value)).exists()
            }
            k if k.eq_ignore_ascii_case("IsTruthy") => is_truthy(value),
            k if k.eq_ignore_ascii_case("NewerThan") => match value.parse::<EngineVersion>() {
                Ok(version) => self.ctx.version().newer_than(version),
                Err(_) => {
                    warn!("invalid NewerThan version '{value}'");
                    false
                }
            },
            other => {
                warn!("unknown predicate keyword '{other}', treating as false");
                false
            }
        }
    }
}

fn split_term(term: &str) -> (&str, Option<&str>) {
    match term.split_once(':') {
        Some((keyword, values)) => (keyword.trim(), Some(values.trim())),
        None => (term.trim(), None),
    }
}

/// Normalizes `/` and `\` separators to the host convention.
pub fn normalize_path(value: &str) -> PathBuf {
    let normalized: String = value
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' {
                MAIN_SEPARATOR
            } else {
                c
            }
        })
        .collect();
    PathBuf::from(normalized)
}

/// A value is truthy when it parses as a number greater than zero, starts
/// with `T`/`On`, or is a binary comparison that holds.
fn is_truthy(value: &str) -> bool {
    if let Some(result) = eval_comparison(value) {
        return result;
    }
    if let Ok(number) = value.trim().parse::<f64>() {
        return number > 0.0;
    }
    let lower = value.trim().to_ascii_lowercase();
    lower.starts_with('t') || lower.starts_with("on")
}

/// Evaluates `lhs OP rhs` for `==`, `!=`, `>=`, `<=`, `>`, `<`.
/// Numeric comparison when both sides parse; case-insensitive string
/// comparison otherwise.
fn eval_comparison(value: &str) -> Option<bool> {
    // Two-character operators first so ">=" isn't split as ">".
    const OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", ">", "<"];
    for op in OPERATORS {
        let Some((lhs, rhs)) = value.split_once(op) else {
            continue;
        };
        let lhs = lhs.trim();
        let rhs = rhs.trim();
        if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
            return Some(match op {
                "==" => a == b,
                "!=" => a != b,
                ">=" => a >= b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a < b,
            });
        }
        let a = lhs.to_ascii_lowercase();
        let b = rhs.to_ascii_lowercase();
        return Some(match op {
            "==" => a == b,
            "!=" => a != b,
            ">=" => a >= b,
            "<=" => a <= b,
            ">" => a > b,
            _ => a < b,
        });
    }
    None
}
