//! Patch lifecycle orchestration for one plugin: diff → hunks with
//! decorators, incremental merge against history, fuzzy apply, and the
//! packed on-disk form.

use log::{debug, warn};

use crate::decorator::DecoratorParser;
use crate::dmp::{
    diff_text1, diff_text2, levenshtein_distance, ApplyOutcome, Diff, DiffMatchPatch, PatchHunk,
    SkipState,
};
use crate::injection::InjectionRegexGroup;
use crate::tag::{CommentTagFormat, TagPacker};
use crate::config::VariableMap;
use crate::version::EngineVersion;
use crate::CrysknifeError;

/// How freshly generated hunks reconcile with the historical bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncrementalMode {
    /// The new bundle wins; only version-gated (skipped) history survives.
    Disabled,
    /// Preserve history hunks that still match, drop gated ones for the
    /// current engine version.
    #[default]
    Enabled,
    /// As Enabled, but version-gated hunks active on this engine go
    /// through the same preservation checks as everything else.
    Strict,
}

/// Extensions for the two patch flavors.
pub const PATCH_EXTENSION: &str = "patch";
pub const PROTECTED_PATCH_EXTENSION: &str = "protected.patch";

/// Inserts within this Levenshtein distance (on trimmed text) count as
/// semantically unchanged during merge.
const NEAR_EQUAL_DISTANCE: usize = 3;

/// One plugin's patch engine, borrowing the plugin's guard recognizers
/// and config for the duration of a file batch.
pub struct Patcher<'a> {
    pub dmp: DiffMatchPatch,
    plugin: &'a str,
    injection: &'a InjectionRegexGroup,
    format: &'a CommentTagFormat,
    variables: &'a VariableMap,
    version: EngineVersion,
    pub incremental: IncrementalMode,
}

impl<'a> Patcher<'a> {
    pub fn new(
        plugin: &'a str,
        injection: &'a InjectionRegexGroup,
        format: &'a CommentTagFormat,
        variables: &'a VariableMap,
        version: EngineVersion,
    ) -> Self {
        let dmp = DiffMatchPatch {
            // Location drift across engine versions is expected; content
            // similarity is what decides a match.
            match_distance: i32::MAX,
            ..DiffMatchPatch::default()
        };
        Self {
            dmp,
            plugin,
            injection,
            format,
            variables,
            version,
            incremental: IncrementalMode::default(),
        }
    }

    /// Maps the driver's tolerance knobs onto the engine parameters.
    /// `content` bounds the per-hunk error rate; `line` bounds positional
    /// drift in lines (`None` = unlimited).
    pub fn set_tolerances(&mut self, content: f32, line: Option<u32>) {
        self.dmp.match_threshold = content;
        self.dmp.patch_delete_threshold = content;
        self.dmp.match_distance = match line {
            // Rough chars-per-line conversion keeps the knob intuitive.
            Some(lines) => (lines as i32).saturating_mul(100),
            None => i32::MAX,
        };
    }

    /// Builds the diff script between the cleared text and the current
    /// engine file, seeding explicit edits at every injection boundary so
    /// hunks split exactly on the guarded seams.
    pub fn make_diffs(&self, before: &str, after: &str) -> Vec<Diff> {
        let matches = self.injection.primary().matches(after);
        let mut diffs = Vec::new();
        let mut cursor = 0;
        for m in &matches {
            if m.range.start > cursor {
                diffs.push(Diff::equal(&after[cursor..m.range.start]));
            }
            if !m.replacement.is_empty() {
                diffs.push(Diff::delete(m.replacement.clone()));
            }
            diffs.push(Diff::insert(&after[m.range.clone()]));
            cursor = m.range.end;
        }
        if cursor < after.len() {
            diffs.push(Diff::equal(&after[cursor..]));
        }

        if diff_text1(&diffs) != before || diff_text2(&diffs) != after {
            // The cleared text was not produced by this recognizer set;
            // fall back to a plain diff rather than emitting a bad script.
            warn!(
                "injection seams for {} disagree with the cleared text, diffing directly",
                self.plugin
            );
            return self.dmp.diff_main(before, after);
        }
        diffs
    }

    /// Computes the hunk bundle for one file: injection-seamed diffs,
    /// decorator extraction, then the incremental merge with history.
    pub fn generate(
        &self,
        before: &str,
        after: &str,
        history: &[PatchHunk],
    ) -> Result<Vec<PatchHunk>, CrysknifeError> {
        let diffs = self.make_diffs(before, after);
        let mut dmp = self.dmp.clone();
        dmp.split_on_insertion = true;
        let mut hunks = dmp.patch_make(before, &diffs);
        DecoratorParser::new(self.plugin, self.version).decorate(&mut hunks)?;
        Ok(self.merge(hunks, history, before))
    }

    /// Reconciles new hunks with the historical bundle per the incremental
    /// mode; the result is sorted by source offset.
    pub fn merge(
        &self,
        new: Vec<PatchHunk>,
        history: &[PatchHunk],
        cleared: &str,
    ) -> Vec<PatchHunk> {
        let mut result = match self.incremental {
            IncrementalMode::Disabled => {
                let mut result = new;
                result.extend(
                    history
                        .iter()
                        .filter(|h| h.skip == SkipState::True)
                        .cloned(),
                );
                result
            }
            mode => {
                let slack = self.dmp.match_max_bits;
                let text_len = cleared.chars().count();
                let mut preserved: Vec<PatchHunk> = Vec::new();
                // (window, hunk) pairs of history hunks that remain
                // relatable to the new bundle.
                let mut windows: Vec<(usize, usize, &PatchHunk)> = Vec::new();
                for hunk in history {
                    if hunk.skip == SkipState::True {
                        // Other engine versions still need this one.
                        preserved.push(hunk.clone());
                        continue;
                    }
                    if mode == IncrementalMode::Enabled && hunk.skip == SkipState::False {
                        debug!("dropping version-gated history hunk active on this engine");
                        continue;
                    }
                    let probe = self.dmp.patch_apply(std::slice::from_ref(hunk), cleared);
                    if probe.locations.is_empty() || probe.locations.iter().any(|&l| l < 0) {
                        debug!("history hunk no longer applies, discarding");
                        continue;
                    }
                    let first_len = hunk.diffs.first().map(Diff::len).unwrap_or(0);
                    let last_len = hunk.diffs.last().map(Diff::len).unwrap_or(0);
                    // The window arithmetic is signed in spirit; clamp both
                    // ends into the text instead of under/overflowing near
                    // file boundaries.
                    let lo = (hunk.start2 + first_len).saturating_sub(slack);
                    let hi = (hunk.start2 + hunk.length2 + slack)
                        .saturating_sub(last_len)
                        .min(text_len + slack);
                    let related: Vec<&PatchHunk> = new
                        .iter()
                        .filter(|n| (lo..=hi).contains(&n.start2))
                        .collect();
                    let keep = hunk.insertions().all(|ins| {
                        related
                            .iter()
                            .any(|n| n.insertions().any(|ni| near_equal(ins, ni)))
                    });
                    windows.push((lo, hi, hunk));
                    if keep {
                        preserved.push(hunk.clone());
                    }
                }
                for hunk in new {
                    let related: Vec<&PatchHunk> = windows
                        .iter()
                        .filter(|(lo, hi, _)| (*lo..=*hi).contains(&hunk.start2))
                        .map(|(_, _, h)| *h)
                        .collect();
                    let inserts: Vec<&str> = hunk.insertions().collect();
                    let duplicated = !related.is_empty()
                        && !inserts.is_empty()
                        && inserts.iter().all(|ins| {
                            related
                                .iter()
                                .any(|h| h.insertions().any(|hi| near_equal(ins, hi)))
                        });
                    if duplicated {
                        debug!("dropping new hunk semantically covered by history");
                        continue;
                    }
                    preserved.push(hunk);
                }
                preserved
            }
        };
        result.sort_by_key(|h| h.start1);
        result
    }

    /// Applies a bundle to `text`. The bundle itself is untouched: it is
    /// deep-copied, context-constrained, padded and split internally.
    pub fn apply(&self, bundle: &[PatchHunk], text: &str) -> ApplyOutcome {
        let mut work: Vec<PatchHunk> = bundle.to_vec();
        for hunk in &mut work {
            self.dmp.patch_constrain(hunk);
        }
        self.dmp.patch_apply(&work, text)
    }

    /// Packs guard comments to their canonical form and renders the
    /// deterministic patch file body. `skip_captures` is set for the
    /// published main flavor.
    pub fn serialize(
        &self,
        bundle: &[PatchHunk],
        skip_captures: bool,
    ) -> Result<String, CrysknifeError> {
        let packer = TagPacker::new(self.plugin, self.format, self.variables)?;
        let mut hunks = bundle.to_vec();
        packer.pack(&mut hunks, skip_captures);
        Ok(self.dmp.patch_to_text(&hunks))
    }

    /// Parses a patch file body, unpacks guard comments back to the
    /// configured dialect and re-attaches decorator metadata.
    pub fn deserialize(&self, text: &str) -> Result<Vec<PatchHunk>, CrysknifeError> {
        let mut hunks = self.dmp.patch_from_text(text)?;
        let packer = TagPacker::new(self.plugin, self.format, self.variables)?;
        packer.unpack(&mut hunks);
        DecoratorParser::new(self.plugin, self.version).decorate(&mut hunks)?;
        Ok(hunks)
    }

    pub fn plugin(&self) -> &str {
        self.plugin
    }

    pub fn version(&self) -> EngineVersion {
        self.version
    }

    pub fn injection(&self) -> &InjectionRegexGroup {
        self.injection
    }
}

fn near_equal(a: &str, b: &str) -> bool {
    levenshtein_distance(a.trim(), b.trim()) < NEAR_EQUAL_DISTANCE
}
