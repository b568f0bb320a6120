//! Hunk-local `@Crysknife(...)` directives.
//!
//! Directives live inside line comments carrying the plugin's tag within
//! injected code, and attach matching metadata to their enclosing hunk:
//! context direction and length constraints plus engine-version gates.
//! Assignment is idempotent; genuinely conflicting values are fatal.

use log::warn;
use regex::Regex;

use crate::dmp::{ContextDir, PatchHunk, SkipState};
use crate::version::EngineVersion;
use crate::CrysknifeError;

/// Extracts directives from insert diffs and applies them to their hunks.
pub struct DecoratorParser<'a> {
    plugin: &'a str,
    version: EngineVersion,
    directive: Regex,
}

impl<'a> DecoratorParser<'a> {
    pub fn new(plugin: &'a str, version: EngineVersion) -> Self {
        Self {
            plugin,
            version,
            directive: Regex::new(r"@Crysknife\(([^)]*)\)").expect("static pattern"),
        }
    }

    /// Scans every hunk and attaches directive metadata. Unknown
    /// directives warn; conflicting values within one hunk are an error.
    pub fn decorate(&self, hunks: &mut [PatchHunk]) -> Result<(), CrysknifeError> {
        for hunk in hunks.iter_mut() {
            self.decorate_hunk(hunk)?;
        }
        Ok(())
    }

    fn decorate_hunk(&self, hunk: &mut PatchHunk) -> Result<(), CrysknifeError> {
        let mut context_dir: Option<ContextDir> = None;
        let mut context_length: Option<i64> = None;
        let mut skip: Option<SkipState> = None;

        for text in hunk.insertions() {
            for line in text.lines() {
                // Directives only count inside a line comment that carries
                // the plugin's tag.
                let Some(comment_at) = line.find("//") else {
                    continue;
                };
                let comment = &line[comment_at..];
                if !comment.contains(self.plugin) {
                    continue;
                }
                for caps in self.directive.captures_iter(comment) {
                    let body = caps.get(1).map_or("", |m| m.as_str());
                    for directive in body.split(',') {
                        let directive = directive.trim();
                        if directive.is_empty() {
                            continue;
                        }
                        self.apply_directive(
                            directive,
                            &mut context_dir,
                            &mut context_length,
                            &mut skip,
                        )?;
                    }
                }
            }
        }

        if let Some(dir) = context_dir {
            hunk.context_dir = dir;
        }
        if let Some(length) = context_length {
            hunk.context_length = length;
        }
        if let Some(skip) = skip {
            hunk.skip = skip;
        }
        Ok(())
    }

    fn apply_directive(
        &self,
        directive: &str,
        context_dir: &mut Option<ContextDir>,
        context_length: &mut Option<i64>,
        skip: &mut Option<SkipState>,
    ) -> Result<(), CrysknifeError> {
        let (key, value) = match directive.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (directive, ""),
        };
        match key {
            "MatchContext" => {
                let dir = match value {
                    "Upper" => ContextDir::UPPER,
                    "Lower" => ContextDir::LOWER,
                    "All" => ContextDir::all(),
                    other => {
                        warn!("unknown MatchContext value '{other}', ignoring");
                        return Ok(());
                    }
                };
                assign(context_dir, dir, directive)?;
            }
            "MatchLength" => {
                let Ok(length) = value.parse::<i64>() else {
                    warn!("invalid MatchLength value '{value}', ignoring");
                    return Ok(());
                };
                assign(context_length, length, directive)?;
            }
            "EngineNewerThan" => {
                let gate: EngineVersion = value.parse()?;
                let state = if self.version.newer_than(gate) {
                    SkipState::False
                } else {
                    SkipState::True
                };
                assign(skip, state, directive)?;
            }
            "EngineOlderThan" => {
                let gate: EngineVersion = value.parse()?;
                let state = if self.version.newer_than(gate) {
                    SkipState::True
                } else {
                    SkipState::False
                };
                assign(skip, state, directive)?;
            }
            other => {
                warn!("unknown decorator directive '{other}', ignoring");
            }
        }
        Ok(())
    }
}

/// Idempotent slot assignment: re-assigning the same value is a no-op,
/// a different value is a conflict.
fn assign<T: PartialEq + Copy + std::fmt::Debug>(
    slot: &mut Option<T>,
    value: T,
    directive: &str,
) -> Result<(), CrysknifeError> {
    match slot {
        Some(existing) if *existing != value => Err(CrysknifeError::ConflictingDecorators {
            detail: format!("'{directive}' conflicts with an earlier value {existing:?}"),
        }),
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}
