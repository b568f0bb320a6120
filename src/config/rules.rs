//! Scoped path rules: `SkipIf`, `FlattenIf`, `RemapIf` and `RemapTarget`.
//!
//! Every rule lives in one of two domains. Repo-wide defaults load into
//! the base domain via a `^Base` key prefix and can only be overruled by
//! other base-domain rules; plugin configs normally write the user
//! domain. A rule holds iff its base domain or its user domain evaluates
//! truthy.

use std::path::{Path, PathBuf};

use crate::config::ini::{IniLine, LineOp};
use crate::config::VariableMap;
use crate::predicate::{normalize_path, PredicateEvaluator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleDomain {
    Base,
    User,
}

/// Predicate expressions split by domain.
#[derive(Debug, Clone, Default)]
pub struct ScopedRule {
    base: Vec<String>,
    user: Vec<String>,
}

impl ScopedRule {
    fn domain_mut(&mut self, domain: RuleDomain) -> &mut Vec<String> {
        match domain {
            RuleDomain::Base => &mut self.base,
            RuleDomain::User => &mut self.user,
        }
    }

    fn apply(&mut self, op: LineOp, domain: RuleDomain, expr: &str) {
        let exprs = self.domain_mut(domain);
        match op {
            LineOp::Set => {
                exprs.clear();
                exprs.push(expr.to_string());
            }
            LineOp::Append => {
                if !exprs.iter().any(|e| e == expr) {
                    exprs.push(expr.to_string());
                }
            }
            LineOp::Clear => exprs.clear(),
            LineOp::Remove => exprs.retain(|e| e != expr),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty() && self.user.is_empty()
    }

    /// `base ∨ user`: base rules hold regardless of user overrides.
    pub fn eval(&self, evaluator: &PredicateEvaluator, target: &Path) -> bool {
        self.base.iter().any(|e| evaluator.eval(e, target))
            || self.user.iter().any(|e| evaluator.eval(e, target))
    }
}

/// The rule set attached to one hierarchy node.
#[derive(Debug, Clone, Default)]
pub struct SectionRules {
    pub skip: ScopedRule,
    pub flatten: ScopedRule,
    pub remap: ScopedRule,
    pub remap_target: Option<PathBuf>,
}

impl SectionRules {
    /// Folds resolved config lines into rules, expanding variables in the
    /// expressions.
    pub fn from_lines(lines: &[IniLine], vars: &VariableMap) -> Self {
        let mut rules = Self::default();
        for line in lines {
            let (domain, key) = match line.key.strip_prefix("^Base") {
                Some(key) => (RuleDomain::Base, key),
                None => (RuleDomain::User, line.key.as_str()),
            };
            let expr = vars.expand(&line.value).unwrap_or_else(|_| line.value.clone());
            match key {
                "SkipIf" => rules.skip.apply(line.op, domain, &expr),
                "FlattenIf" => rules.flatten.apply(line.op, domain, &expr),
                "RemapIf" => rules.remap.apply(line.op, domain, &expr),
                "RemapTarget" => match line.op {
                    LineOp::Clear => rules.remap_target = None,
                    _ => rules.remap_target = Some(normalize_path(&expr)),
                },
                _ => {} // Variables and other keys are handled elsewhere.
            }
        }
        rules
    }

    pub fn is_empty(&self) -> bool {
        self.skip.is_empty()
            && self.flatten.is_empty()
            && self.remap.is_empty()
            && self.remap_target.is_none()
    }
}
