//! Patch hunks: construction from a diff script, context growth, padding,
//! oversize splitting, fuzzy application and the unidiff-style text form.

use std::fmt;

use bitflags::bitflags;
use log::{debug, trace};
use regex::Regex;

use super::{
    decode_uri, diff_levenshtein, diff_text1, diff_text2, encode_uri, Diff, DiffMatchPatch, Op,
};
use crate::dmp::diff::{diff_cleanup_semantic_lossless, diff_x_index};
use crate::CrysknifeError;

bitflags! {
    /// Which side of a hunk's context participates in matching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextDir: u8 {
        const UPPER = 1 << 0;
        const LOWER = 1 << 1;
    }
}

impl Default for ContextDir {
    fn default() -> Self {
        Self::all()
    }
}

/// Tri-state engine-version gate attached to a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipState {
    #[default]
    Unspecified,
    True,
    False,
}

/// One contiguous edit with surrounding context.
///
/// `start1`/`length1` count scalar values in the source text covered by the
/// non-Insert diffs; `start2`/`length2` likewise in the destination text
/// for non-Delete diffs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatchHunk {
    pub diffs: Vec<Diff>,
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
    /// Directional context constraint applied before matching.
    pub context_dir: ContextDir,
    /// Maximum retained context per constrained side; -1 means unbounded.
    pub context_length: i64,
    /// Version-gate state; `True` hunks are dropped before apply but kept
    /// through merges for other engine versions.
    pub skip: SkipState,
    /// Comment-tag captures recorded by the packer, serialized on the
    /// header line of protected patches.
    pub captures: Vec<(String, String)>,
}

impl PatchHunk {
    pub fn new() -> Self {
        Self {
            context_length: -1,
            ..Self::default()
        }
    }

    /// Inserted text of every Insert diff, in order.
    pub fn insertions(&self) -> impl Iterator<Item = &str> {
        self.diffs
            .iter()
            .filter(|d| d.op == Op::Insert)
            .map(|d| d.text.as_str())
    }
}

impl fmt::Display for PatchHunk {
    /// GNU unidiff-like header and percent-escaped body. Header indices are
    /// printed with the classic one-based, length-dependent quirks so the
    /// output round-trips byte-identically.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coords1 = match self.length1 {
            0 => format!("{},0", self.start1),
            1 => format!("{}", self.start1 + 1),
            _ => format!("{},{}", self.start1 + 1, self.length1),
        };
        let coords2 = match self.length2 {
            0 => format!("{},0", self.start2),
            1 => format!("{}", self.start2 + 1),
            _ => format!("{},{}", self.start2 + 1, self.length2),
        };
        write!(f, "@@ -{coords1} +{coords2} @@")?;
        for (name, value) in &self.captures {
            write!(f, " {}={}", name, encode_uri(value))?;
        }
        writeln!(f)?;
        for diff in &self.diffs {
            let sign = match diff.op {
                Op::Insert => '+',
                Op::Delete => '-',
                Op::Equal => ' ',
            };
            writeln!(f, "{}{}", sign, encode_uri(&diff.text))?;
        }
        Ok(())
    }
}

/// Everything `patch_apply` reports back: the patched text, a per-hunk
/// match location (−1 = failed), the mapping from post-split hunks to the
/// caller's original hunk indices, and the post-split hunks themselves.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub text: String,
    pub locations: Vec<isize>,
    pub origins: Vec<usize>,
    pub hunks: Vec<PatchHunk>,
}

impl ApplyOutcome {
    /// Indices of original hunks with at least one failed fragment,
    /// deduplicated and ordered.
    pub fn failed_origins(&self) -> Vec<usize> {
        let mut failed: Vec<usize> = self
            .locations
            .iter()
            .zip(&self.origins)
            .filter(|(loc, _)| **loc < 0)
            .map(|(_, &origin)| origin)
            .collect();
        failed.sort_unstable();
        failed.dedup();
        failed
    }

    /// True when at least one fragment matched.
    pub fn any_applied(&self) -> bool {
        self.locations.iter().any(|&loc| loc >= 0)
    }
}

impl DiffMatchPatch {
    /// Builds a hunk list from `text1` and a precomputed diff script.
    pub fn patch_make(&self, text1: &str, diffs: &[Diff]) -> Vec<PatchHunk> {
        let mut patches = Vec::new();
        if diffs.is_empty() {
            return patches;
        }
        let mut patch = PatchHunk::new();
        let mut char_count1 = 0; // Number of characters into the text1 string.
        let mut char_count2 = 0; // Number of characters into the text2 string.
        // Recreate the patches to determine context info.
        let mut prepatch: Vec<char> = text1.chars().collect();
        let mut postpatch: Vec<char> = prepatch.clone();
        for (i, diff) in diffs.iter().enumerate() {
            let text_length = diff.len();
            if patch.diffs.is_empty() && diff.op != Op::Equal {
                // A new patch starts here.
                patch.start1 = char_count1;
                patch.start2 = char_count2;
            }
            match diff.op {
                Op::Insert => {
                    patch.diffs.push(diff.clone());
                    patch.length2 += text_length;
                    postpatch.splice(char_count2..char_count2, diff.text.chars());
                }
                Op::Delete => {
                    patch.diffs.push(diff.clone());
                    patch.length1 += text_length;
                    postpatch.drain(char_count2..char_count2 + text_length);
                }
                Op::Equal => {
                    if text_length <= 2 * self.patch_margin
                        && !patch.diffs.is_empty()
                        && i != diffs.len() - 1
                    {
                        // Small equality inside a patch.
                        patch.diffs.push(diff.clone());
                        patch.length1 += text_length;
                        patch.length2 += text_length;
                    }
                    if text_length >= 2 * self.patch_margin && !patch.diffs.is_empty() {
                        // Time for a new patch.
                        self.patch_add_context(&mut patch, &prepatch);
                        patches.push(std::mem::replace(&mut patch, PatchHunk::new()));
                        // Unlike Unidiff, our patch lists have a rolling
                        // context; update prepatch to reflect the application
                        // of all prior patches.
                        prepatch = postpatch.clone();
                        char_count1 = char_count2;
                    }
                }
            }
            if diff.op != Op::Insert {
                char_count1 += text_length;
            }
            if diff.op != Op::Delete {
                char_count2 += text_length;
            }
            if diff.op == Op::Insert && self.split_on_insertion && !patch.diffs.is_empty() {
                // Force every insertion into a hunk of its own.
                self.patch_add_context(&mut patch, &prepatch);
                patches.push(std::mem::replace(&mut patch, PatchHunk::new()));
                prepatch = postpatch.clone();
                char_count1 = char_count2;
            }
        }
        if !patch.diffs.is_empty() {
            self.patch_add_context(&mut patch, &prepatch);
            patches.push(patch);
        }
        patches
    }

    /// Grows hunk context until the pattern is unique in `text`, bounded by
    /// the bitap word width, then appends one safety margin.
    fn patch_add_context(&self, patch: &mut PatchHunk, text: &[char]) {
        if text.is_empty() {
            return;
        }
        let clamp = |i: usize| i.min(text.len());
        let mut pattern =
            text[clamp(patch.start2)..clamp(patch.start2 + patch.length1)].to_vec();
        let mut padding = 0;

        // Expand while the pattern is ambiguous and still small enough to
        // match later.
        while !pattern.is_empty()
            && super::find_sub(text, &pattern, 0) != super::rfind_sub(text, &pattern, text.len())
            && pattern.len() < self.match_max_bits - 2 * self.patch_margin
        {
            padding += self.patch_margin;
            let begin = patch.start2.saturating_sub(padding);
            pattern = text[begin..clamp(patch.start2 + patch.length1 + padding)].to_vec();
        }
        // Add one chunk for good luck.
        padding += self.patch_margin;

        let begin = patch.start2.saturating_sub(padding);
        let prefix = &text[begin..clamp(patch.start2)];
        if !prefix.is_empty() {
            patch
                .diffs
                .insert(0, Diff::equal(prefix.iter().collect::<String>()));
        }
        let suffix = &text
            [clamp(patch.start2 + patch.length1)..clamp(patch.start2 + patch.length1 + padding)];
        if !suffix.is_empty() {
            patch.diffs.push(Diff::equal(suffix.iter().collect::<String>()));
        }

        patch.start1 -= prefix.len();
        patch.start2 -= prefix.len();
        patch.length1 += prefix.len() + suffix.len();
        patch.length2 += prefix.len() + suffix.len();
    }

    /// Trims leading and trailing context per the hunk's directional
    /// constraint. `context_length == -1` leaves the constrained side
    /// unbounded.
    pub fn patch_constrain(&self, patch: &mut PatchHunk) {
        let limit_for = |kept: bool, length: i64| -> usize {
            if !kept {
                0
            } else if length < 0 {
                usize::MAX
            } else {
                length as usize
            }
        };
        let upper = limit_for(
            patch.context_dir.contains(ContextDir::UPPER),
            patch.context_length,
        );
        let lower = limit_for(
            patch.context_dir.contains(ContextDir::LOWER),
            patch.context_length,
        );

        if let Some(first) = patch.diffs.first_mut() {
            if first.op == Op::Equal {
                let len = first.len();
                if len > upper {
                    let trim = len - upper;
                    first.text = first.text.chars().skip(trim).collect();
                    patch.start1 += trim;
                    patch.start2 += trim;
                    patch.length1 -= trim;
                    patch.length2 -= trim;
                }
            }
        }
        if let Some(last) = patch.diffs.last_mut() {
            if last.op == Op::Equal {
                let len = last.len();
                if len > lower {
                    let trim = len - lower;
                    last.text = last.text.chars().take(len - trim).collect();
                    patch.length1 -= trim;
                    patch.length2 -= trim;
                }
            }
        }
        patch.diffs.retain(|d| !d.is_empty());
    }

    /// Applies a hunk list to `text`, tolerating drift. Hunks flagged
    /// `skip == True` are removed up front; oversized hunks are split and
    /// their fragments mapped back to the original indices in the result.
    pub fn patch_apply(&self, patches: &[PatchHunk], text: &str) -> ApplyOutcome {
        if patches.is_empty() {
            return ApplyOutcome {
                text: text.to_string(),
                locations: Vec::new(),
                origins: Vec::new(),
                hunks: Vec::new(),
            };
        }
        let mut work: Vec<(PatchHunk, usize)> = patches
            .iter()
            .enumerate()
            .filter(|(_, p)| p.skip != SkipState::True)
            .map(|(i, p)| (p.clone(), i))
            .collect();
        if work.is_empty() {
            return ApplyOutcome {
                text: text.to_string(),
                locations: Vec::new(),
                origins: Vec::new(),
                hunks: Vec::new(),
            };
        }

        let null_padding = self.patch_add_padding(&mut work);
        let pad_len = null_padding.chars().count();
        let mut text: Vec<char> = null_padding
            .chars()
            .chain(text.chars())
            .chain(null_padding.chars())
            .collect();
        self.patch_split_max(&mut work);

        // Delta keeps track of the offset between the expected and actual
        // location of the previous patch. If there are patches expected at
        // positions 10 and 20, but the first was found at 12, delta is 2
        // and the second patch is probed for at 22.
        let mut delta: isize = 0;
        let mut locations = vec![-1isize; work.len()];
        let mut previous_end = 0usize;
        for (i, (patch, _)) in work.iter().enumerate() {
            let expected_loc = if self.match_sequentially {
                previous_end
            } else {
                (patch.start2 as isize + delta).clamp(0, text.len() as isize) as usize
            };
            let text1: Vec<char> = diff_text1(&patch.diffs).chars().collect();
            let mut start_loc;
            let mut end_loc: Option<usize> = None;
            if text1.len() > self.match_max_bits {
                // The pattern is too long for bitap; probe its head, then its
                // tail forward from just past the head match.
                start_loc = self.match_main(&text, &text1[..self.match_max_bits], expected_loc);
                if let Some(head) = start_loc {
                    let tail_expected =
                        (head + text1.len() - self.match_max_bits).min(text.len());
                    end_loc = self.match_main(
                        &text,
                        &text1[text1.len() - self.match_max_bits..],
                        tail_expected,
                    );
                    match end_loc {
                        Some(tail) if head < tail => {}
                        _ => {
                            // Can't find valid trailing context; drop this hunk.
                            start_loc = None;
                        }
                    }
                }
            } else {
                start_loc = self.match_main(&text, &text1, expected_loc);
            }
            let Some(start_loc) = start_loc else {
                trace!("hunk {i} found no match near {expected_loc}");
                // Subtract the delta for this failed patch from subsequent
                // patches.
                delta -= patch.length2 as isize - patch.length1 as isize;
                continue;
            };

            locations[i] = (start_loc as isize - pad_len as isize).max(0);
            delta = start_loc as isize - expected_loc as isize;
            let end = match end_loc {
                Some(tail) => (tail + self.match_max_bits).min(text.len()),
                None => (start_loc + text1.len()).min(text.len()),
            };
            previous_end = end;
            let actual: Vec<char> = text[start_loc..end].to_vec();
            if text1 == actual {
                // Perfect match, just shove the replacement text in.
                let replacement: Vec<char> = diff_text2(&patch.diffs).chars().collect();
                let splice_end = (start_loc + text1.len()).min(text.len());
                text.splice(start_loc..splice_end, replacement);
            } else {
                // Imperfect match. Run a diff to get a framework of
                // equivalent indices.
                let text1_str: String = text1.iter().collect();
                let actual_str: String = actual.iter().collect();
                let mut diffs = self.diff_main_checklines(&text1_str, &actual_str, false);
                if text1.len() > self.match_max_bits
                    && diff_levenshtein(&diffs) as f64 / text1.len() as f64
                        > f64::from(self.patch_delete_threshold)
                {
                    // The end points match, but the content is unacceptably
                    // bad.
                    debug!("hunk {i} exceeded the delete threshold, dropping");
                    locations[i] = -1;
                } else {
                    diff_cleanup_semantic_lossless(&mut diffs);
                    let mut index1 = 0;
                    for diff in &patch.diffs {
                        if diff.op != Op::Equal {
                            let index2 = diff_x_index(&diffs, index1);
                            let at = (start_loc + index2).min(text.len());
                            match diff.op {
                                Op::Insert => {
                                    text.splice(at..at, diff.text.chars());
                                }
                                Op::Delete => {
                                    let del_to = start_loc
                                        + diff_x_index(&diffs, index1 + diff.len());
                                    text.drain(at..del_to.clamp(at, text.len()));
                                }
                                Op::Equal => unreachable!(),
                            }
                        }
                        if diff.op != Op::Delete {
                            index1 += diff.len();
                        }
                    }
                }
            }
        }

        // Strip the padding off.
        let patched: String = text[pad_len..text.len() - pad_len].iter().collect();
        let (hunks, origins): (Vec<PatchHunk>, Vec<usize>) = work.into_iter().unzip();
        ApplyOutcome {
            text: patched,
            locations,
            origins,
            hunks,
        }
    }

    /// Adds a run of low-codepoint sentinels on both edges of the text so
    /// hunks at the boundaries have context to match against. Patch
    /// offsets are bumped accordingly.
    fn patch_add_padding(&self, patches: &mut [(PatchHunk, usize)]) -> String {
        let padding_length = self.patch_margin;
        let null_padding: String = (1..=padding_length as u32)
            .map(|i| char::from_u32(i).unwrap_or('\u{1}'))
            .collect();

        // Bump all the patches forward.
        for (patch, _) in patches.iter_mut() {
            patch.start1 += padding_length;
            patch.start2 += padding_length;
        }

        // Add some padding on start of first diff.
        let (first, _) = patches.first_mut().unwrap();
        if first.diffs.first().is_none_or(|d| d.op != Op::Equal) {
            first.diffs.insert(0, Diff::equal(null_padding.clone()));
            first.start1 -= padding_length;
            first.start2 -= padding_length;
            first.length1 += padding_length;
            first.length2 += padding_length;
        } else if padding_length > first.diffs[0].len() {
            // Grow first equality.
            let extra = padding_length - first.diffs[0].len();
            let addition: String = null_padding.chars().skip(first.diffs[0].len()).collect();
            first.diffs[0].text = format!("{}{}", addition, first.diffs[0].text);
            first.start1 -= extra;
            first.start2 -= extra;
            first.length1 += extra;
            first.length2 += extra;
        }

        // Add some padding on end of last diff.
        let (last, _) = patches.last_mut().unwrap();
        if last.diffs.last().is_none_or(|d| d.op != Op::Equal) {
            last.diffs.push(Diff::equal(null_padding.clone()));
            last.length1 += padding_length;
            last.length2 += padding_length;
        } else if padding_length > last.diffs.last().unwrap().len() {
            // Grow last equality.
            let tail = last.diffs.last_mut().unwrap();
            let extra = padding_length - tail.len();
            let addition: String = null_padding.chars().take(extra).collect();
            tail.text.push_str(&addition);
            last.length1 += extra;
            last.length2 += extra;
        }

        null_padding
    }

    /// Splits hunks whose source span exceeds the bitap word width into
    /// chained fragments, preserving each fragment's originating index.
    fn patch_split_max(&self, patches: &mut Vec<(PatchHunk, usize)>) {
        let patch_size = self.match_max_bits;
        let mut x = 0;
        while x < patches.len() {
            if patches[x].0.length1 <= patch_size {
                x += 1;
                continue;
            }
            let (mut bigpatch, origin) = patches.remove(x);
            let mut start1 = bigpatch.start1;
            let mut start2 = bigpatch.start2;
            let mut precontext: Vec<char> = Vec::new();
            let mut diffs: std::collections::VecDeque<Diff> = bigpatch.diffs.drain(..).collect();
            while !diffs.is_empty() {
                // Create one of several smaller patches.
                let mut patch = PatchHunk::new();
                patch.context_dir = bigpatch.context_dir;
                patch.context_length = bigpatch.context_length;
                patch.skip = bigpatch.skip;
                let mut empty = true;
                patch.start1 = start1.saturating_sub(precontext.len());
                patch.start2 = start2.saturating_sub(precontext.len());
                if !precontext.is_empty() {
                    patch.length1 = precontext.len();
                    patch.length2 = precontext.len();
                    patch
                        .diffs
                        .push(Diff::equal(precontext.iter().collect::<String>()));
                }
                while !diffs.is_empty() && patch.length1 < patch_size - self.patch_margin {
                    let diff_type = diffs[0].op;
                    let mut diff_text: Vec<char> = diffs[0].text.chars().collect();
                    if diff_type == Op::Insert {
                        // Insertions are harmless.
                        patch.length2 += diff_text.len();
                        start2 += diff_text.len();
                        patch.diffs.push(diffs.pop_front().unwrap());
                        empty = false;
                    } else if diff_type == Op::Delete
                        && patch.diffs.len() == 1
                        && patch.diffs[0].op == Op::Equal
                        && diff_text.len() > 2 * patch_size
                    {
                        // This is a large deletion. Let it pass in one chunk.
                        patch.length1 += diff_text.len();
                        start1 += diff_text.len();
                        empty = false;
                        patch
                            .diffs
                            .push(Diff::delete(diff_text.iter().collect::<String>()));
                        diffs.pop_front();
                    } else {
                        // Deletion or equality. Only take as much as we can
                        // stomach.
                        let take = diff_text
                            .len()
                            .min(patch_size - patch.length1 - self.patch_margin);
                        diff_text.truncate(take);
                        patch.length1 += diff_text.len();
                        start1 += diff_text.len();
                        if diff_type == Op::Equal {
                            patch.length2 += diff_text.len();
                            start2 += diff_text.len();
                        } else {
                            empty = false;
                        }
                        patch.diffs.push(Diff::new(
                            diff_type,
                            diff_text.iter().collect::<String>(),
                        ));
                        if diff_text.len() == diffs[0].len() {
                            diffs.pop_front();
                        } else {
                            let rest: String =
                                diffs[0].text.chars().skip(diff_text.len()).collect();
                            diffs[0].text = rest;
                        }
                    }
                }
                // Compute the head context for the next patch.
                let text2: Vec<char> = diff_text2(&patch.diffs).chars().collect();
                precontext = text2[text2.len().saturating_sub(self.patch_margin)..].to_vec();
                // Append the end context for this patch.
                let remaining: Vec<char> = diffs
                    .iter()
                    .filter(|d| d.op != Op::Insert)
                    .flat_map(|d| d.text.chars())
                    .collect();
                let postcontext: Vec<char> =
                    remaining[..remaining.len().min(self.patch_margin)].to_vec();
                if !postcontext.is_empty() {
                    patch.length1 += postcontext.len();
                    patch.length2 += postcontext.len();
                    let postcontext: String = postcontext.iter().collect();
                    match patch.diffs.last_mut() {
                        Some(last) if last.op == Op::Equal => last.text.push_str(&postcontext),
                        _ => patch.diffs.push(Diff::equal(postcontext)),
                    }
                }
                if !empty {
                    patches.insert(x, (patch, origin));
                    x += 1;
                }
            }
        }
    }

    /// Renders a hunk list to its deterministic text form.
    pub fn patch_to_text(&self, patches: &[PatchHunk]) -> String {
        patches.iter().map(PatchHunk::to_string).collect()
    }

    /// Parses text produced by [`patch_to_text`](Self::patch_to_text).
    pub fn patch_from_text(&self, text: &str) -> Result<Vec<PatchHunk>, CrysknifeError> {
        let mut patches = Vec::new();
        if text.is_empty() {
            return Ok(patches);
        }
        let header =
            Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(?: (.*))?$").unwrap();
        let mut lines = text.lines().peekable();
        while let Some(line) = lines.next() {
            if line.is_empty() {
                continue;
            }
            let caps = header
                .captures(line)
                .ok_or_else(|| CrysknifeError::InvalidPatch {
                    detail: format!("invalid patch header: {line}"),
                })?;
            let mut patch = PatchHunk::new();
            let bad_header = || CrysknifeError::InvalidPatch {
                detail: format!("invalid patch header: {line}"),
            };
            patch.start1 = caps[1].parse().unwrap_or(0);
            match caps.get(2).map(|m| m.as_str()) {
                None => {
                    patch.start1 = patch.start1.checked_sub(1).ok_or_else(bad_header)?;
                    patch.length1 = 1;
                }
                Some("0") => patch.length1 = 0,
                Some(len) => {
                    patch.start1 = patch.start1.checked_sub(1).ok_or_else(bad_header)?;
                    patch.length1 = len.parse().map_err(|_| bad_header())?;
                }
            }
            patch.start2 = caps[3].parse().unwrap_or(0);
            match caps.get(4).map(|m| m.as_str()) {
                None => {
                    patch.start2 = patch.start2.checked_sub(1).ok_or_else(bad_header)?;
                    patch.length2 = 1;
                }
                Some("0") => patch.length2 = 0,
                Some(len) => {
                    patch.start2 = patch.start2.checked_sub(1).ok_or_else(bad_header)?;
                    patch.length2 = len.parse().map_err(|_| bad_header())?;
                }
            }
            if let Some(tail) = caps.get(5) {
                for pair in tail.as_str().split(' ').filter(|p| !p.is_empty()) {
                    let (name, value) =
                        pair.split_once('=')
                            .ok_or_else(|| CrysknifeError::InvalidPatch {
                                detail: format!("invalid capture entry: {pair}"),
                            })?;
                    patch.captures.push((name.to_string(), decode_uri(value)?));
                }
            }

            while let Some(&body) = lines.peek() {
                if body.is_empty() {
                    lines.next();
                    continue;
                }
                let mut chars = body.chars();
                let sign = chars.next().unwrap();
                let rest: String = chars.collect();
                let op = match sign {
                    '+' => Op::Insert,
                    '-' => Op::Delete,
                    ' ' => Op::Equal,
                    '@' => break, // Start of next patch.
                    other => {
                        return Err(CrysknifeError::InvalidPatch {
                            detail: format!("invalid patch mode '{other}' in: {rest}"),
                        })
                    }
                };
                patch.diffs.push(Diff::new(op, decode_uri(&rest)?));
                lines.next();
            }
            patches.push(patch);
        }
        Ok(patches)
    }
}
