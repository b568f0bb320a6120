//! Directory-scoped rule lookup.
//!
//! Sections map to path prefixes; a trie over path components finds the
//! deepest matching section for any target. Section inheritance (child
//! sections prepending their nearest ancestor's rule lines) happens at
//! build time in the config system, so the trie holds final rule sets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::rules::SectionRules;
use crate::predicate::PredicateEvaluator;

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    rules: Option<SectionRules>,
    /// The prefix this node was inserted under, for flatten destinations.
    prefix: PathBuf,
}

/// Trie over lowercased path components, one optional rule set per node.
#[derive(Debug, Default)]
pub struct ConfigHierarchy {
    root: Node,
}

/// Outcome of consulting the hierarchy for one target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapResult {
    /// A skip rule matched; the target is not processed at all.
    Skipped,
    /// No rule rewrote the path.
    Unchanged(PathBuf),
    /// Flatten and/or remap produced a new destination.
    Remapped(PathBuf),
}

impl RemapResult {
    /// The destination, unless skipped.
    pub fn target(&self) -> Option<&Path> {
        match self {
            RemapResult::Skipped => None,
            RemapResult::Unchanged(path) | RemapResult::Remapped(path) => Some(path),
        }
    }
}

impl ConfigHierarchy {
    /// Inserts a rule set under `prefix`; the empty prefix attaches to the
    /// root and matches every target.
    pub fn insert(&mut self, prefix: &Path, rules: SectionRules) {
        let mut node = &mut self.root;
        for component in components_of(prefix) {
            node = node.children.entry(component).or_default();
        }
        node.prefix = prefix.to_path_buf();
        node.rules = Some(rules);
    }

    /// Rules of the deepest node whose prefix leads the target, with that
    /// node's prefix.
    pub fn nearest(&self, target: &Path) -> Option<(&Path, &SectionRules)> {
        let mut node = &self.root;
        let mut best = node.rules.as_ref().map(|r| (node.prefix.as_path(), r));
        for component in components_of(target) {
            match node.children.get(&component) {
                Some(child) => {
                    node = child;
                    if let Some(rules) = &node.rules {
                        best = Some((node.prefix.as_path(), rules));
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Applies the deepest matching rules in Skip → Flatten → Remap order.
    pub fn remap(&self, target: &Path, evaluator: &PredicateEvaluator) -> RemapResult {
        let Some((prefix, rules)) = self.nearest(target) else {
            return RemapResult::Unchanged(target.to_path_buf());
        };
        if rules.skip.eval(evaluator, target) {
            debug!("skip rule matched for {}", target.display());
            return RemapResult::Skipped;
        }
        let flatten = rules.flatten.eval(evaluator, target);
        let remap = rules.remap.eval(evaluator, target);
        if remap {
            if let Some(remap_target) = &rules.remap_target {
                let tail: PathBuf = if flatten {
                    target.file_name().map(PathBuf::from).unwrap_or_default()
                } else {
                    target.to_path_buf()
                };
                return RemapResult::Remapped(remap_target.join(tail));
            }
        }
        if flatten {
            let name = target.file_name().map(PathBuf::from).unwrap_or_default();
            return RemapResult::Remapped(prefix.join(name));
        }
        RemapResult::Unchanged(target.to_path_buf())
    }
}

fn components_of(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .filter(|c| !c.is_empty() && c != ".")
        .collect()
}
