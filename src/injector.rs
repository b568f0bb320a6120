//! Batch driver: walks plugin patch roots and runs the requested jobs
//! over every target file, honoring config rules and the dependency
//! graph.
//!
//! The injector owns the registered plugin configs and the prompt cache;
//! all file I/O of the pipeline happens here so the patch engine itself
//! stays pure on strings.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use colored::Colorize;
use log::{debug, error, info, warn};
use similar::udiff::unified_diff;
use similar::Algorithm;

use crate::config::{select_local_config, ConfigSystem, RemapResult};
use crate::context::EngineContext;
use crate::dmp::PatchHunk;
use crate::patcher::{IncrementalMode, Patcher, PATCH_EXTENSION, PROTECTED_PATCH_EXTENSION};
use crate::report;
use crate::CrysknifeError;

bitflags! {
    /// Which lifecycle stages to run; bits combine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct JobType: u8 {
        const GENERATE = 1 << 0;
        const CLEAR = 1 << 1;
        const APPLY = 1 << 2;
    }
}

bitflags! {
    /// Driver options from the CLI surface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InjectorOptions: u16 {
        const LINK = 1 << 0;
        const FORCE = 1 << 1;
        const DRY_RUN = 1 << 2;
        const VERBOSE = 1 << 3;
        const TREAT_PATCH_AS_FILE = 1 << 4;
        const CLEAR_ALL_HISTORY = 1 << 5;
        const KEEP_ALL_HISTORY = 1 << 6;
        const PROTECTED = 1 << 7;
    }
}

/// Answer to an interactive confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
    Yes,
    No,
    YesForAll,
    NoForAll,
    Abort,
}

/// What kind of destructive action is being confirmed; ForAll decisions
/// cache per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptCategory {
    OverwriteExisting,
    DeleteStale,
}

/// Interactive confirmation source; the CLI supplies a terminal-backed
/// implementation, tests and non-interactive runs use [`AutoPrompter`].
pub trait Prompter {
    fn ask(&mut self, category: PromptCategory, message: &str) -> PromptDecision;
}

/// Always answers the same way; `--force` maps to an always-yes instance.
pub struct AutoPrompter {
    pub answer_yes: bool,
}

impl Prompter for AutoPrompter {
    fn ask(&mut self, _category: PromptCategory, _message: &str) -> PromptDecision {
        if self.answer_yes {
            PromptDecision::Yes
        } else {
            PromptDecision::No
        }
    }
}

/// Aggregate result of one `process` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct Injector {
    ctx: EngineContext,
    options: InjectorOptions,
    plugins: Vec<ConfigSystem>,
    prompter: Box<dyn Prompter>,
    prompt_cache: HashMap<PromptCategory, bool>,
    /// Where failed-hunk HTML dumps land.
    dump_root: PathBuf,
}

impl Injector {
    /// Initializes the driver context: engine probe plus local-config
    /// selection. Must run before any plugin registers.
    pub fn init(
        engine_root: impl Into<PathBuf>,
        options: InjectorOptions,
        prompter: Box<dyn Prompter>,
    ) -> Result<Self, CrysknifeError> {
        let mut ctx = EngineContext::init(engine_root)?;
        select_local_config(&mut ctx)?;
        let dump_root = ctx.engine_root().join("Intermediate").join("Crysknife");
        Ok(Self {
            ctx,
            options,
            plugins: Vec::new(),
            prompter,
            prompt_cache: HashMap::new(),
            dump_root,
        })
    }

    /// Builds an injector over a prepared context; used by tests.
    pub fn with_context(
        ctx: EngineContext,
        options: InjectorOptions,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        let dump_root = ctx.engine_root().join("Intermediate").join("Crysknife");
        Self {
            ctx,
            options,
            plugins: Vec::new(),
            prompter,
            prompt_cache: HashMap::new(),
            dump_root,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Loads and registers a plugin's config system. Duplicate
    /// registrations are ignored.
    pub fn register(&mut self, plugin: &str, overrides: &str) -> Result<(), CrysknifeError> {
        if self.plugins.iter().any(|p| p.plugin() == plugin) {
            debug!("plugin {plugin} already registered");
            return Ok(());
        }
        let config = ConfigSystem::create(&self.ctx, plugin, overrides)?;
        self.plugins.push(config);
        Ok(())
    }

    /// Drops a plugin from the batch; true when it was registered.
    pub fn unregister(&mut self, plugin: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.plugin() != plugin);
        self.plugins.len() != before
    }

    /// Runs the requested jobs over every registered plugin. Clear
    /// dispatches child-first across the dependency graph; generate and
    /// apply dispatch parent-first.
    pub fn process(&mut self, jobs: JobType) -> Result<ProcessSummary, CrysknifeError> {
        let mut summary = ProcessSummary::default();
        // Collect per-job dispatch orders up front; prompting mutates self.
        let mut ordered: Vec<(JobType, Vec<String>)> = Vec::new();
        for job in [JobType::GENERATE, JobType::CLEAR, JobType::APPLY] {
            if !jobs.contains(job) {
                continue;
            }
            let mut names: Vec<String> = Vec::new();
            for config in &self.plugins {
                let mut collect = |c: &ConfigSystem| {
                    if !names.iter().any(|n| n == c.plugin()) {
                        names.push(c.plugin().to_string());
                    }
                };
                if job == JobType::CLEAR {
                    config.visit_child_first(&mut collect);
                } else {
                    config.visit_parent_first(&mut collect);
                }
            }
            ordered.push((job, names));
        }
        for (job, names) in ordered {
            for name in names {
                let outcome = self.process_plugin(job, &name)?;
                summary.succeeded += outcome.succeeded;
                summary.failed += outcome.failed;
                summary.skipped += outcome.skipped;
            }
        }
        Ok(summary)
    }

    fn find_config(&self, plugin: &str) -> Option<&ConfigSystem> {
        fn search<'a>(configs: &mut dyn Iterator<Item = &'a ConfigSystem>, plugin: &str) -> Option<&'a ConfigSystem> {
            for config in configs {
                if config.plugin() == plugin {
                    return Some(config);
                }
                if let Some(found) = search(&mut config.dependencies.values(), plugin) {
                    return Some(found);
                }
            }
            None
        }
        search(&mut self.plugins.iter(), plugin)
    }

    fn process_plugin(
        &mut self,
        job: JobType,
        plugin: &str,
    ) -> Result<ProcessSummary, CrysknifeError> {
        // Snapshot everything the patcher needs so the registry borrow
        // ends before prompting can mutate self.
        let patch_root = self.ctx.source_patch_root(plugin);
        let Some(config) = self.find_config(plugin) else {
            return Ok(ProcessSummary::default());
        };
        if !patch_root.is_dir() {
            info!("{}", format!("no SourcePatch root for {plugin}, skipping").dimmed());
            return Ok(ProcessSummary {
                skipped: 1,
                ..Default::default()
            });
        }
        let mut files = Vec::new();
        walk_files(&patch_root, &patch_root, &mut files)?;
        files.sort();

        let remaps: Vec<(PathBuf, RemapResult)> = files
            .iter()
            .map(|rel| (rel.clone(), config.remap(&self.ctx, rel)))
            .collect();
        let tag_format = config.tag_format.clone();
        let variables = config.variables.clone();
        let injection = config.injection_group()?;
        if job == JobType::GENERATE && !self.options.contains(InjectorOptions::DRY_RUN) {
            // Refresh the committed engine-specific cache alongside the
            // regenerated patches.
            config.write_cache(&self.ctx)?;
        }
        let plugin_name = plugin.to_string();

        let mut patcher = Patcher::new(
            &plugin_name,
            &injection,
            &tag_format,
            &variables,
            self.ctx.version(),
        );
        patcher.incremental = if self.options.contains(InjectorOptions::CLEAR_ALL_HISTORY) {
            IncrementalMode::Disabled
        } else if self.options.contains(InjectorOptions::KEEP_ALL_HISTORY) {
            IncrementalMode::Strict
        } else {
            IncrementalMode::Enabled
        };

        let mut summary = ProcessSummary::default();
        for (rel, remap) in remaps {
            let is_patch = patch_kind(&rel).is_some();
            match remap {
                RemapResult::Skipped => {
                    info!("{}", format!("skipped by rule: {}", rel.display()).dimmed());
                    summary.skipped += 1;
                }
                result => {
                    let dest_rel = result.target().expect("not skipped").to_path_buf();
                    let treat_as_file =
                        self.options.contains(InjectorOptions::TREAT_PATCH_AS_FILE) || !is_patch;
                    let outcome = if treat_as_file {
                        self.process_asset(job, &plugin_name, &rel, &dest_rel)?
                    } else {
                        self.process_patch(job, &patcher, &rel, &dest_rel)?
                    };
                    match outcome {
                        FileOutcome::Done => summary.succeeded += 1,
                        FileOutcome::Failed => summary.failed += 1,
                        FileOutcome::Skipped => summary.skipped += 1,
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Patch pipeline for one `.patch`/`.protected.patch` file.
    fn process_patch(
        &mut self,
        job: JobType,
        patcher: &Patcher,
        rel: &Path,
        dest_rel: &Path,
    ) -> Result<FileOutcome, CrysknifeError> {
        let plugin = patcher.plugin().to_string();
        let patch_root = self.ctx.source_patch_root(&plugin);
        let engine_target = {
            let stripped = strip_patch_extension(dest_rel);
            self.contained_path(self.ctx.engine_root(), &stripped)?
        };
        if !engine_target.is_file() {
            info!(
                "{}",
                format!("engine file missing: {}", engine_target.display()).dimmed()
            );
            return Ok(FileOutcome::Skipped);
        }
        let current = read_text(&engine_target)?;

        if job == JobType::GENERATE {
            // Residual sibling guards never belong in this plugin's
            // patches.
            let resident = patcher.injection().clear_residuals(&current);
            let cleared = patcher.injection().primary().unpatch(&resident);
            let history = if patcher.incremental == IncrementalMode::Disabled {
                Vec::new()
            } else {
                self.load_history(patcher, &patch_root, rel)?
            };
            let bundle = patcher.generate(&cleared, &resident, &history)?;

            let base = strip_patch_extension(rel);
            let main_path = patch_root.join(with_extension(&base, PATCH_EXTENSION));
            let main_text = patcher.serialize(&bundle, true)?;
            self.write_if_changed(&main_path, &main_text)?;
            if self.options.contains(InjectorOptions::PROTECTED) {
                let protected_path =
                    patch_root.join(with_extension(&base, PROTECTED_PATCH_EXTENSION));
                let protected_text = patcher.serialize(&bundle, false)?;
                self.write_if_changed(&protected_path, &protected_text)?;
            }
            Ok(FileOutcome::Done)
        } else if job == JobType::APPLY {
            let Some(text) = self.load_patch_text(&patch_root, rel)? else {
                info!("{}", format!("no patch found for {}", rel.display()).dimmed());
                return Ok(FileOutcome::Skipped);
            };
            let bundle = patcher.deserialize(&text)?;
            let cleared = patcher.injection().unpatch(&current);
            let outcome = patcher.apply(&bundle, &cleared);
            for index in outcome.failed_origins() {
                let hunk = bundle.get(index).cloned().unwrap_or_else(PatchHunk::new);
                match report::dump_failure(&self.dump_root, dest_rel, index, &hunk, &cleared) {
                    Ok(path) => warn!(
                        "hunk {index} of {} failed, dump at {}",
                        rel.display(),
                        path.display()
                    ),
                    Err(e) => warn!("hunk {index} of {} failed ({e})", rel.display()),
                }
            }
            if !outcome.any_applied() && !bundle.is_empty() {
                error!("nothing from {} could be applied", rel.display());
                return Ok(FileOutcome::Failed);
            }
            if outcome.text != current {
                if !self.confirm_overwrite(&engine_target, &current, &outcome.text)? {
                    return Ok(FileOutcome::Skipped);
                }
                self.write_text(&engine_target, &outcome.text)?;
            }
            Ok(FileOutcome::Done)
        } else if job == JobType::CLEAR {
            // Only this plugin's guards are stripped; siblings keep their
            // injections.
            let cleared = patcher.injection().primary().unpatch(&current);
            if cleared != current {
                self.write_text(&engine_target, &cleared)?;
            }
            Ok(FileOutcome::Done)
        } else {
            Ok(FileOutcome::Skipped)
        }
    }

    /// New-file pipeline: plain assets under `SourcePatch` mirror into
    /// the engine tree.
    fn process_asset(
        &mut self,
        job: JobType,
        plugin: &str,
        rel: &Path,
        dest_rel: &Path,
    ) -> Result<FileOutcome, CrysknifeError> {
        let source = self.ctx.source_patch_root(plugin).join(rel);
        let dest = self.contained_path(self.ctx.engine_root(), dest_rel)?;
        if job == JobType::APPLY {
            let content = read_text(&source)?;
            if dest.is_file() {
                let existing = read_text(&dest)?;
                if existing == content {
                    debug!("{} already up to date", dest.display());
                    return Ok(FileOutcome::Done);
                }
                if !self.confirm_overwrite(&dest, &existing, &content)? {
                    return Ok(FileOutcome::Skipped);
                }
            }
            if self.options.contains(InjectorOptions::DRY_RUN) {
                info!("dry run: {} -> {}", source.display(), dest.display());
                return Ok(FileOutcome::Done);
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|source| CrysknifeError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            if self.options.contains(InjectorOptions::LINK) {
                link_or_copy(&source, &dest)?;
            } else {
                fs::copy(&source, &dest).map_err(|e| CrysknifeError::Io {
                    path: dest.clone(),
                    source: e,
                })?;
            }
            info!("installed {}", dest.display());
            Ok(FileOutcome::Done)
        } else if job == JobType::CLEAR {
            if !dest.exists() {
                return Ok(FileOutcome::Skipped);
            }
            if !self.confirm(
                PromptCategory::DeleteStale,
                &format!("Delete {}?", dest.display()),
            )? {
                return Ok(FileOutcome::Skipped);
            }
            if self.options.contains(InjectorOptions::DRY_RUN) {
                info!("dry run: {} would be deleted", dest.display());
            } else {
                fs::remove_file(&dest).map_err(|source| CrysknifeError::Io {
                    path: dest.clone(),
                    source,
                })?;
                info!("deleted {}", dest.display());
            }
            Ok(FileOutcome::Done)
        } else if job == JobType::GENERATE {
            // Sync in-tree edits of plugin-owned files back to the patch
            // root.
            if !dest.is_file() {
                return Ok(FileOutcome::Skipped);
            }
            let engine_side = read_text(&dest)?;
            let ours = read_text(&source)?;
            if engine_side == ours {
                return Ok(FileOutcome::Done);
            }
            if !self.confirm_overwrite(&source, &ours, &engine_side)? {
                return Ok(FileOutcome::Skipped);
            }
            if self.options.contains(InjectorOptions::DRY_RUN) {
                info!("dry run: {} would sync back from the engine", source.display());
                return Ok(FileOutcome::Done);
            }
            fs::write(&source, engine_side).map_err(|e| CrysknifeError::Io {
                path: source.clone(),
                source: e,
            })?;
            Ok(FileOutcome::Done)
        } else {
            Ok(FileOutcome::Skipped)
        }
    }

    /// Prefers the protected flavor when both exist.
    fn load_patch_text(
        &self,
        patch_root: &Path,
        rel: &Path,
    ) -> Result<Option<String>, CrysknifeError> {
        let base = strip_patch_extension(rel);
        let protected = patch_root.join(with_extension(&base, PROTECTED_PATCH_EXTENSION));
        if protected.is_file() {
            return read_text(&protected).map(Some);
        }
        let main = patch_root.join(with_extension(&base, PATCH_EXTENSION));
        if main.is_file() {
            return read_text(&main).map(Some);
        }
        Ok(None)
    }

    fn load_history(
        &self,
        patcher: &Patcher,
        patch_root: &Path,
        rel: &Path,
    ) -> Result<Vec<PatchHunk>, CrysknifeError> {
        match self.load_patch_text(patch_root, rel)? {
            Some(text) => patcher.deserialize(&text),
            None => Ok(Vec::new()),
        }
    }

    fn confirm_overwrite(
        &mut self,
        path: &Path,
        existing: &str,
        proposed: &str,
    ) -> Result<bool, CrysknifeError> {
        if self.options.contains(InjectorOptions::VERBOSE)
            || self.options.contains(InjectorOptions::DRY_RUN)
        {
            let diff = unified_diff(
                Algorithm::default(),
                existing,
                proposed,
                3,
                Some(("current", "proposed")),
            );
            println!("pending changes to {}:", path.display());
            print!("{diff}");
        }
        self.confirm(
            PromptCategory::OverwriteExisting,
            &format!("Overwrite {}?", path.display()),
        )
    }

    fn confirm(
        &mut self,
        category: PromptCategory,
        message: &str,
    ) -> Result<bool, CrysknifeError> {
        if self.options.contains(InjectorOptions::FORCE) {
            return Ok(true);
        }
        if let Some(&cached) = self.prompt_cache.get(&category) {
            return Ok(cached);
        }
        match self.prompter.ask(category, message) {
            PromptDecision::Yes => Ok(true),
            PromptDecision::No => Ok(false),
            PromptDecision::YesForAll => {
                self.prompt_cache.insert(category, true);
                Ok(true)
            }
            PromptDecision::NoForAll => {
                self.prompt_cache.insert(category, false);
                Ok(false)
            }
            PromptDecision::Abort => Err(CrysknifeError::Aborted),
        }
    }

    fn write_if_changed(&self, path: &Path, content: &str) -> Result<(), CrysknifeError> {
        if path.is_file() && read_text(path)? == content {
            debug!("{} unchanged", path.display());
            return Ok(());
        }
        self.write_text(path, content)
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<(), CrysknifeError> {
        if self.options.contains(InjectorOptions::DRY_RUN) {
            info!("dry run: {} left unwritten", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CrysknifeError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, content).map_err(|source| CrysknifeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("wrote {}", path.display());
        Ok(())
    }

    /// Resolves `rel` under `root` and refuses results that land outside
    /// it once `..` and symlinks are resolved. Targets that do not exist
    /// yet resolve through their nearest existing ancestor, so a
    /// symlinked directory anywhere on the way cannot smuggle a write out
    /// of the engine tree.
    fn contained_path(&self, root: &Path, rel: &Path) -> Result<PathBuf, CrysknifeError> {
        use std::ffi::OsString;
        use std::path::Component;
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(CrysknifeError::PathEscape {
                path: rel.to_path_buf(),
            });
        }
        let base = fs::canonicalize(root).map_err(|source| CrysknifeError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        // Walk up to something that exists on disk; `root` itself does.
        let joined = root.join(rel);
        let mut existing = joined.as_path();
        let mut pending: Vec<OsString> = Vec::new();
        while !existing.exists() {
            let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                break;
            };
            pending.push(name.to_os_string());
            existing = parent;
        }
        let mut resolved = fs::canonicalize(existing).map_err(|source| CrysknifeError::Io {
            path: existing.to_path_buf(),
            source,
        })?;
        for name in pending.iter().rev() {
            resolved.push(name);
        }
        if !resolved.starts_with(&base) {
            return Err(CrysknifeError::PathEscape {
                path: rel.to_path_buf(),
            });
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Done,
    Failed,
    Skipped,
}

/// Recognized patch flavors, by compound extension.
fn patch_kind(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(&format!(".{PROTECTED_PATCH_EXTENSION}")) {
        Some(PROTECTED_PATCH_EXTENSION)
    } else if name.ends_with(&format!(".{PATCH_EXTENSION}")) {
        Some(PATCH_EXTENSION)
    } else {
        None
    }
}

fn strip_patch_extension(path: &Path) -> PathBuf {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };
    let stripped = name
        .strip_suffix(&format!(".{PROTECTED_PATCH_EXTENSION}"))
        .or_else(|| name.strip_suffix(&format!(".{PATCH_EXTENSION}")))
        .unwrap_or(name);
    path.with_file_name(stripped)
}

fn with_extension(base: &Path, extension: &str) -> PathBuf {
    let Some(name) = base.file_name().and_then(|n| n.to_str()) else {
        return base.to_path_buf();
    };
    base.with_file_name(format!("{name}.{extension}"))
}

fn read_text(path: &Path) -> Result<String, CrysknifeError> {
    fs::read_to_string(path).map_err(|source| CrysknifeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CrysknifeError> {
    let entries = fs::read_dir(dir).map_err(|source| CrysknifeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let name = rel.file_name().and_then(|n| n.to_str()).unwrap_or("");
            // Config files live beside the patches but are not targets.
            if name.starts_with("Crysknife") && name.ends_with(".ini") {
                continue;
            }
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn link_or_copy(source: &Path, dest: &Path) -> Result<(), CrysknifeError> {
    if dest.exists() {
        fs::remove_file(dest).map_err(|e| CrysknifeError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;
    }
    std::os::unix::fs::symlink(source, dest).map_err(|e| CrysknifeError::Io {
        path: dest.to_path_buf(),
        source: e,
    })
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, dest: &Path) -> Result<(), CrysknifeError> {
    // Symlinks need elevation on some platforms; a copy is the portable
    // fallback.
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|e| CrysknifeError::Io {
            path: dest.to_path_buf(),
            source: e,
        })
}
