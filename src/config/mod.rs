//! Per-plugin configuration: variables, scoped rules, dependency graph.
//!
//! A [`ConfigSystem`] is built once per plugin from the layered INI
//! files (`BaseCrysknife.ini`, the active `BaseCrysknife<Tag>Local.ini`,
//! the plugin's `Crysknife.ini` + `CrysknifeLocal.ini` overlay and the
//! engine-specific `CrysknifeCache.ini`) plus any driver overrides.
//! `[Dependencies]` entries instantiate child config systems, forming a
//! DAG that generate/apply walk parent-first and clear walks child-first.

mod hierarchy;
mod ini;
mod rules;
mod variables;

pub use hierarchy::{ConfigHierarchy, RemapResult};
pub use ini::{resolve_lines, IniFile, IniLine, IniSection, LineOp};
pub use rules::{RuleDomain, ScopedRule, SectionRules};
pub use variables::VariableMap;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::Regex;

use crate::context::EngineContext;
use crate::injection::{InjectionRegex, InjectionRegexGroup};
use crate::predicate::{normalize_path, PredicateEvaluator};
use crate::tag::CommentTagFormat;
use crate::CrysknifeError;

/// Variable gating which `BaseCrysknife<Tag>Local.ini` is active.
pub const LOCAL_CONFIG_PREDICATE: &str = "CRYSKNIFE_LOCAL_CONFIG_PREDICATE";
/// Cache variable recording the active local-config suffix.
pub const LOCAL_CONFIG_SUFFIX: &str = "CRYSKNIFE_LOCAL_CONFIG_SUFFIX";

const SPECIAL_SECTIONS: [&str; 3] = ["Variables", "Dependencies", "Children"];

/// One plugin's fully built configuration.
#[derive(Debug)]
pub struct ConfigSystem {
    plugin: String,
    pub variables: VariableMap,
    pub hierarchy: ConfigHierarchy,
    pub dependencies: BTreeMap<String, ConfigSystem>,
    /// Plugin tags historically co-injected into this engine, cached in
    /// `[Children]` so residual guards can be cleared on load.
    pub children_tags: Vec<String>,
    pub tag_format: CommentTagFormat,
}

impl ConfigSystem {
    /// Loads and builds the config for `plugin`, instantiating dependency
    /// children recursively (duplicates and cycles are ignored).
    pub fn create(
        ctx: &EngineContext,
        plugin: &str,
        overrides: &str,
    ) -> Result<Self, CrysknifeError> {
        let mut chain = Vec::new();
        Self::create_guarded(ctx, plugin, overrides, &mut chain)
    }

    fn create_guarded(
        ctx: &EngineContext,
        plugin: &str,
        overrides: &str,
        chain: &mut Vec<String>,
    ) -> Result<Self, CrysknifeError> {
        chain.push(plugin.to_string());
        let mut merged = IniFile::default();
        for path in Self::config_paths(ctx, plugin) {
            if !path.is_file() {
                continue;
            }
            debug!("loading config {}", path.display());
            merged.merge(IniFile::from_file(&path)?);
        }
        let (mut system, deps) = Self::from_ini(ctx, plugin, &merged, overrides)?;
        for (name, dep_overrides) in deps {
            if chain.iter().any(|seen| seen == &name) {
                debug!("dependency '{name}' already instantiated, skipping");
                continue;
            }
            let child = Self::create_guarded(ctx, &name, &dep_overrides, chain)?;
            system.dependencies.insert(name, child);
        }
        chain.pop();
        Ok(system)
    }

    fn config_paths(ctx: &EngineContext, plugin: &str) -> Vec<PathBuf> {
        let base_dir = ctx.base_config_dir();
        let patch_root = ctx.source_patch_root(plugin);
        let mut paths = vec![base_dir.join("BaseCrysknife.ini")];
        if let Some(suffix) = ctx.local_suffix() {
            paths.push(base_dir.join(format!("BaseCrysknife{suffix}Local.ini")));
        }
        paths.push(patch_root.join("Crysknife.ini"));
        paths.push(patch_root.join("CrysknifeLocal.ini"));
        paths.push(patch_root.join("CrysknifeCache.ini"));
        paths
    }

    /// Builds a config from already-parsed INI content. Returns the
    /// system plus the dependency specs for the caller to instantiate.
    pub fn from_ini(
        ctx: &EngineContext,
        plugin: &str,
        ini: &IniFile,
        overrides: &str,
    ) -> Result<(Self, Vec<(String, String)>), CrysknifeError> {
        // Variables first; everything else may reference them.
        let mut variables = VariableMap::new();
        if let Some(section) = ini.section("Variables") {
            for (name, values) in resolve_lines(&section.lines) {
                if let Some(value) = values.last() {
                    variables.set(name, value.clone());
                }
            }
        }
        for entry in overrides.split([';', '\n']) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match entry.split_once('=') {
                Some((name, value)) => variables.set(name.trim(), value.trim()),
                None => warn!("ignoring malformed override '{entry}'"),
            }
        }
        resolve_predicate_variables(&mut variables, ctx)?;

        let tag_format = CommentTagFormat::from_variables(&variables);

        // Scoped sections with ancestor inheritance.
        let mut raw: BTreeMap<PathBuf, Vec<IniLine>> = BTreeMap::new();
        for section in &ini.sections {
            for name in &section.names {
                if SPECIAL_SECTIONS.iter().any(|s| name.eq_ignore_ascii_case(s)) {
                    continue;
                }
                let prefix = if name.eq_ignore_ascii_case("Global") {
                    PathBuf::new()
                } else {
                    normalize_path(name)
                };
                raw.entry(prefix)
                    .or_default()
                    .extend(section.lines.iter().cloned());
            }
        }
        let mut hierarchy = ConfigHierarchy::default();
        let mut finals: Vec<(PathBuf, Vec<IniLine>)> = Vec::new();
        let mut prefixes: Vec<PathBuf> = raw.keys().cloned().collect();
        prefixes.sort_by_key(|p| p.components().count());
        for prefix in prefixes {
            let own = raw.remove(&prefix).unwrap_or_default();
            // Nearest ancestor section contributes its (already inherited)
            // rule lines, prepended exactly once.
            let ancestor = finals
                .iter()
                .filter(|(p, _)| prefix != *p && prefix.starts_with(p))
                .max_by_key(|(p, _)| p.components().count());
            let mut lines = ancestor.map(|(_, l)| l.clone()).unwrap_or_default();
            lines.extend(own);
            hierarchy.insert(&prefix, SectionRules::from_lines(&lines, &variables));
            finals.push((prefix, lines));
        }

        // Dependencies and cached children.
        let mut deps = Vec::new();
        if let Some(section) = ini.section("Dependencies") {
            for (name, values) in resolve_lines(&section.lines) {
                if name == plugin {
                    continue;
                }
                deps.push((name, values.last().cloned().unwrap_or_default()));
            }
        }
        let children_tags = ini
            .section("Children")
            .map(|section| resolve_lines(&section.lines).into_keys().collect())
            .unwrap_or_default();

        Ok((
            Self {
                plugin: plugin.to_string(),
                variables,
                hierarchy,
                dependencies: BTreeMap::new(),
                children_tags,
                tag_format,
            },
            deps,
        ))
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Consults the scoped rules for one target path.
    pub fn remap(&self, ctx: &EngineContext, target: &Path) -> RemapResult {
        let evaluator = PredicateEvaluator::new(ctx);
        self.hierarchy.remap(target, &evaluator)
    }

    /// Guard recognizers: this plugin plus every cached sibling tag, so
    /// residual guards from other plugins are cleared before diffing.
    pub fn injection_group(&self) -> Result<InjectionRegexGroup, CrysknifeError> {
        let primary = InjectionRegex::new(&self.plugin, &self.tag_format)?;
        let mut siblings = Vec::new();
        let mut seen = vec![self.plugin.clone()];
        for tag in self.children_tags.iter().chain(self.dependencies.keys()) {
            if seen.iter().any(|s| s == tag) {
                continue;
            }
            seen.push(tag.clone());
            siblings.push(InjectionRegex::new(tag, &self.tag_format)?);
        }
        Ok(InjectionRegexGroup::new(primary, siblings))
    }

    /// Visits this config before its dependency children (generate/apply
    /// order).
    pub fn visit_parent_first<'a>(&'a self, f: &mut dyn FnMut(&'a ConfigSystem)) {
        f(self);
        for child in self.dependencies.values() {
            child.visit_parent_first(f);
        }
    }

    /// Visits dependency children before this config (clear order).
    pub fn visit_child_first<'a>(&'a self, f: &mut dyn FnMut(&'a ConfigSystem)) {
        for child in self.dependencies.values() {
            child.visit_child_first(f);
        }
        f(self);
    }

    /// Writes the engine-specific plugin cache: persistent variables under
    /// `[Variables]` and the sibling tag list under `[Children]`.
    pub fn write_cache(&self, ctx: &EngineContext) -> Result<PathBuf, CrysknifeError> {
        let mut file = IniFile::default();
        let variables: Vec<IniLine> = self
            .variables
            .iter_persistent()
            .map(|(name, value)| IniLine::set(name, value))
            .collect();
        if !variables.is_empty() {
            file.sections.push(IniSection {
                names: vec!["Variables".to_string()],
                lines: variables,
            });
        }
        if !self.children_tags.is_empty() {
            file.sections.push(IniSection {
                names: vec!["Children".to_string()],
                lines: self
                    .children_tags
                    .iter()
                    .map(|tag| IniLine::set(tag.clone(), "1"))
                    .collect(),
            });
        }
        let path = ctx.source_patch_root(&self.plugin).join("CrysknifeCache.ini");
        fs::write(&path, file.to_string()).map_err(|source| CrysknifeError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Replaces every `@Predicate(expr)` in a variable's value with `"1"` or
/// `"0"`, evaluated once at build time.
fn resolve_predicate_variables(
    variables: &mut VariableMap,
    ctx: &EngineContext,
) -> Result<(), CrysknifeError> {
    let re = Regex::new(r"@Predicate\(([^)]*)\)").expect("static pattern");
    let evaluator = PredicateEvaluator::new(ctx);
    let names: Vec<String> = variables
        .iter()
        .filter(|(_, value)| value.contains("@Predicate("))
        .map(|(name, _)| name.to_string())
        .collect();
    for name in names {
        let value = variables.get(&name).expect("name collected above").to_string();
        let expanded = variables.expand(&value)?;
        let resolved = re.replace_all(&expanded, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str());
            if evaluator.eval(expr, Path::new("")) {
                "1"
            } else {
                "0"
            }
        });
        variables.set(name, resolved.into_owned());
    }
    Ok(())
}

/// Scans for `BaseCrysknife<Tag>Local.ini` files, keeps the one whose
/// local-config predicate holds, and records the active suffix both in
/// the context and the repo-wide cache file. More than one active local
/// config is fatal.
pub fn select_local_config(ctx: &mut EngineContext) -> Result<Option<String>, CrysknifeError> {
    let dir = ctx.base_config_dir();
    let pattern = Regex::new(r"^BaseCrysknife(.+)Local\.ini$").expect("static pattern");
    let mut active: Vec<String> = Vec::new();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => {
            ctx.set_local_suffix(None);
            return Ok(None);
        }
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = pattern.captures(&name) else {
            continue;
        };
        let suffix = caps.get(1).expect("group 1 always present").as_str().to_string();
        let ini = IniFile::from_file(&entry.path())?;
        let predicate = ini
            .section("Variables")
            .map(|s| resolve_lines(&s.lines))
            .and_then(|map| map.get(LOCAL_CONFIG_PREDICATE).and_then(|v| v.last().cloned()));
        let Some(predicate) = predicate else {
            continue;
        };
        if PredicateEvaluator::new(ctx).eval(&predicate, Path::new("")) {
            active.push(suffix);
        }
    }
    if active.len() > 1 {
        return Err(CrysknifeError::MultipleLocalConfigs { suffixes: active });
    }
    let suffix = active.pop();
    ctx.set_local_suffix(suffix.clone());

    // Record the choice so downstream build tooling can key off it.
    if let Some(suffix) = &suffix {
        let mut cache = IniFile::default();
        cache.sections.push(IniSection {
            names: vec!["Variables".to_string()],
            lines: vec![IniLine::set(LOCAL_CONFIG_SUFFIX, suffix.clone())],
        });
        let path = dir.join("CrysknifeCache.ini");
        fs::write(&path, cache.to_string()).map_err(|source| CrysknifeError::Io {
            path,
            source,
        })?;
    }
    Ok(suffix)
}
