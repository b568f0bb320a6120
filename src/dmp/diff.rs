//! Diff computation: common affix stripping, half-match speedup, line-mode
//! pre-pass, Myers bisect with a wall-clock deadline, and the semantic,
//! lossless and efficiency cleanups.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{Diff, DiffMatchPatch, Op};

// Token codes for the line-mode pre-pass; indexes above the surrogate range
// are shifted past it so they stay valid scalar values.
fn token_to_char(index: usize) -> char {
    let code = if index < 0xD800 {
        index as u32
    } else {
        index as u32 + 0x800
    };
    char::from_u32(code).unwrap_or('\u{FFFD}')
}

fn char_to_token(c: char) -> usize {
    let code = c as u32;
    if code < 0xD800 {
        code as usize
    } else {
        (code - 0x800) as usize
    }
}

impl DiffMatchPatch {
    /// Computes the minimal edit script turning `text1` into `text2`.
    pub fn diff_main(&self, text1: &str, text2: &str) -> Vec<Diff> {
        self.diff_main_checklines(text1, text2, true)
    }

    /// As [`diff_main`](Self::diff_main), with explicit control over the
    /// line-mode speedup.
    pub fn diff_main_checklines(&self, text1: &str, text2: &str, checklines: bool) -> Vec<Diff> {
        let deadline = if self.diff_timeout <= 0.0 {
            None
        } else {
            Instant::now().checked_add(Duration::from_secs_f32(self.diff_timeout))
        };
        let chars1: Vec<char> = text1.chars().collect();
        let chars2: Vec<char> = text2.chars().collect();
        self.diff_inner(&chars1, &chars2, checklines, deadline)
    }

    fn diff_inner(
        &self,
        text1: &[char],
        text2: &[char],
        checklines: bool,
        deadline: Option<Instant>,
    ) -> Vec<Diff> {
        if text1 == text2 {
            if text1.is_empty() {
                return Vec::new();
            }
            return vec![Diff::equal(text1.iter().collect::<String>())];
        }

        let common_length = common_prefix(text1, text2);
        let prefix = &text1[..common_length];
        let text1 = &text1[common_length..];
        let text2 = &text2[common_length..];

        let common_length = common_suffix(text1, text2);
        let suffix = &text1[text1.len() - common_length..];
        let text1 = &text1[..text1.len() - common_length];
        let text2 = &text2[..text2.len() - common_length];

        let mut diffs = self.diff_compute(text1, text2, checklines, deadline);

        if !prefix.is_empty() {
            diffs.insert(0, Diff::equal(prefix.iter().collect::<String>()));
        }
        if !suffix.is_empty() {
            diffs.push(Diff::equal(suffix.iter().collect::<String>()));
        }
        diff_cleanup_merge(&mut diffs);
        diffs
    }

    fn diff_compute(
        &self,
        text1: &[char],
        text2: &[char],
        checklines: bool,
        deadline: Option<Instant>,
    ) -> Vec<Diff> {
        if text1.is_empty() {
            return vec![Diff::insert(text2.iter().collect::<String>())];
        }
        if text2.is_empty() {
            return vec![Diff::delete(text1.iter().collect::<String>())];
        }

        let (long, short, short_is_1) = if text1.len() > text2.len() {
            (text1, text2, false)
        } else {
            (text2, text1, true)
        };

        if let Some(i) = super::find_sub(long, short, 0) {
            // Shorter text sits inside the longer: two edits of the same kind.
            let op = if short_is_1 { Op::Insert } else { Op::Delete };
            return vec![
                Diff::new(op, long[..i].iter().collect::<String>()),
                Diff::equal(short.iter().collect::<String>()),
                Diff::new(op, long[i + short.len()..].iter().collect::<String>()),
            ];
        }

        if short.len() == 1 {
            // Single character cannot be an equality of both edits.
            return vec![
                Diff::delete(text1.iter().collect::<String>()),
                Diff::insert(text2.iter().collect::<String>()),
            ];
        }

        if let Some(hm) = self.diff_half_match(text1, text2) {
            let mut diffs = self.diff_inner(&hm.prefix1, &hm.prefix2, checklines, deadline);
            diffs.push(Diff::equal(hm.common.iter().collect::<String>()));
            diffs.extend(self.diff_inner(&hm.suffix1, &hm.suffix2, checklines, deadline));
            return diffs;
        }

        if checklines && text1.len() > 100 && text2.len() > 100 {
            return self.diff_line_mode(text1, text2, deadline);
        }

        self.diff_bisect(text1, text2, deadline)
    }

    /// Line-level diff first, then character-level re-diff of the
    /// replacement blocks.
    fn diff_line_mode(
        &self,
        text1: &[char],
        text2: &[char],
        deadline: Option<Instant>,
    ) -> Vec<Diff> {
        let s1: String = text1.iter().collect();
        let s2: String = text2.iter().collect();
        let (tokens1, tokens2, lines) = lines_to_tokens(&s1, &s2);

        let mut diffs = self.diff_inner(&tokens1, &tokens2, false, deadline);
        tokens_to_lines(&mut diffs, &lines);
        diff_cleanup_semantic(&mut diffs);

        // Rediff each contiguous replacement block at character level.
        diffs.push(Diff::equal(""));
        let mut pointer = 0;
        let mut count_delete = 0;
        let mut count_insert = 0;
        let mut text_delete = String::new();
        let mut text_insert = String::new();
        while pointer < diffs.len() {
            match diffs[pointer].op {
                Op::Insert => {
                    count_insert += 1;
                    text_insert.push_str(&diffs[pointer].text);
                }
                Op::Delete => {
                    count_delete += 1;
                    text_delete.push_str(&diffs[pointer].text);
                }
                Op::Equal => {
                    if count_delete >= 1 && count_insert >= 1 {
                        let a: Vec<char> = text_delete.chars().collect();
                        let b: Vec<char> = text_insert.chars().collect();
                        let sub = self.diff_inner(&a, &b, false, deadline);
                        let start = pointer - count_delete - count_insert;
                        diffs.splice(start..pointer, sub.iter().cloned());
                        pointer = start + sub.len();
                    }
                    count_insert = 0;
                    count_delete = 0;
                    text_delete.clear();
                    text_insert.clear();
                }
            }
            pointer += 1;
        }
        diffs.pop();
        diffs
    }

    /// Myers bisect: walk the edit graph from both ends until the paths
    /// overlap, then recurse on both halves.
    pub(crate) fn diff_bisect(
        &self,
        text1: &[char],
        text2: &[char],
        deadline: Option<Instant>,
    ) -> Vec<Diff> {
        let len1 = text1.len() as isize;
        let len2 = text2.len() as isize;
        let max_d = (len1 + len2 + 1) / 2;
        let v_offset = max_d;
        let v_length = 2 * max_d;
        let mut v1 = vec![-1isize; v_length as usize];
        let mut v2 = vec![-1isize; v_length as usize];
        v1[(v_offset + 1) as usize] = 0;
        v2[(v_offset + 1) as usize] = 0;
        let delta = len1 - len2;
        // If the total number of characters is odd, the front path will
        // collide with the reverse path.
        let front = delta % 2 != 0;
        let mut k1start = 0isize;
        let mut k1end = 0isize;
        let mut k2start = 0isize;
        let mut k2end = 0isize;
        for d in 0..max_d {
            if deadline.is_some_and(|t| Instant::now() > t) {
                break;
            }
            // Forward path.
            let mut k1 = -d + k1start;
            while k1 <= d - k1end {
                let k1_offset = (v_offset + k1) as usize;
                let mut x1 = if k1 == -d || (k1 != d && v1[k1_offset - 1] < v1[k1_offset + 1]) {
                    v1[k1_offset + 1]
                } else {
                    v1[k1_offset - 1] + 1
                };
                let mut y1 = x1 - k1;
                while x1 < len1 && y1 < len2 && text1[x1 as usize] == text2[y1 as usize] {
                    x1 += 1;
                    y1 += 1;
                }
                v1[k1_offset] = x1;
                if x1 > len1 {
                    // Ran off the right of the graph.
                    k1end += 2;
                } else if y1 > len2 {
                    // Ran off the bottom of the graph.
                    k1start += 2;
                } else if front {
                    let k2_offset = v_offset + delta - k1;
                    if k2_offset >= 0 && k2_offset < v_length && v2[k2_offset as usize] != -1 {
                        // Mirror x2 onto top-left coordinate system.
                        let x2 = len1 - v2[k2_offset as usize];
                        if x1 >= x2 {
                            return self.diff_bisect_split(
                                text1,
                                text2,
                                x1 as usize,
                                y1 as usize,
                                deadline,
                            );
                        }
                    }
                }
                k1 += 2;
            }
            // Reverse path.
            let mut k2 = -d + k2start;
            while k2 <= d - k2end {
                let k2_offset = (v_offset + k2) as usize;
                let mut x2 = if k2 == -d || (k2 != d && v2[k2_offset - 1] < v2[k2_offset + 1]) {
                    v2[k2_offset + 1]
                } else {
                    v2[k2_offset - 1] + 1
                };
                let mut y2 = x2 - k2;
                while x2 < len1
                    && y2 < len2
                    && text1[(len1 - x2 - 1) as usize] == text2[(len2 - y2 - 1) as usize]
                {
                    x2 += 1;
                    y2 += 1;
                }
                v2[k2_offset] = x2;
                if x2 > len1 {
                    k2end += 2;
                } else if y2 > len2 {
                    k2start += 2;
                } else if !front {
                    let k1_offset = v_offset + delta - k2;
                    if k1_offset >= 0 && k1_offset < v_length && v1[k1_offset as usize] != -1 {
                        let x1 = v1[k1_offset as usize];
                        let y1 = v_offset + x1 - k1_offset;
                        // Mirror x2 onto top-left coordinate system.
                        let x2 = len1 - x2;
                        if x1 >= x2 {
                            return self.diff_bisect_split(
                                text1,
                                text2,
                                x1 as usize,
                                y1 as usize,
                                deadline,
                            );
                        }
                    }
                }
                k2 += 2;
            }
        }
        // Ran out of time or no commonality at all.
        vec![
            Diff::delete(text1.iter().collect::<String>()),
            Diff::insert(text2.iter().collect::<String>()),
        ]
    }

    fn diff_bisect_split(
        &self,
        text1: &[char],
        text2: &[char],
        x: usize,
        y: usize,
        deadline: Option<Instant>,
    ) -> Vec<Diff> {
        let mut diffs = self.diff_inner(&text1[..x], &text2[..y], false, deadline);
        diffs.extend(self.diff_inner(&text1[x..], &text2[y..], false, deadline));
        diffs
    }

    /// Looks for a substring of at least half the longer text shared by
    /// both inputs; quadrant seeds at 1/4 and 1/2.
    fn diff_half_match(&self, text1: &[char], text2: &[char]) -> Option<HalfMatch> {
        if self.diff_timeout <= 0.0 {
            // No point risking a non-minimal diff when time is unbounded.
            return None;
        }
        let (long, short, text1_is_long) = if text1.len() > text2.len() {
            (text1, text2, true)
        } else {
            (text2, text1, false)
        };
        if long.len() < 4 || short.len() * 2 < long.len() {
            return None;
        }

        let hm1 = half_match_i(long, short, (long.len() + 3) / 4);
        let hm2 = half_match_i(long, short, (long.len() + 1) / 2);
        let hm = match (hm1, hm2) {
            (None, None) => return None,
            (Some(hm1), None) => hm1,
            (None, Some(hm2)) => hm2,
            (Some(hm1), Some(hm2)) => {
                if hm1.common.len() > hm2.common.len() {
                    hm1
                } else {
                    hm2
                }
            }
        };
        if text1_is_long {
            Some(hm)
        } else {
            Some(HalfMatch {
                prefix1: hm.prefix2,
                suffix1: hm.suffix2,
                prefix2: hm.prefix1,
                suffix2: hm.suffix1,
                common: hm.common,
            })
        }
    }
}

struct HalfMatch {
    prefix1: Vec<char>,
    suffix1: Vec<char>,
    prefix2: Vec<char>,
    suffix2: Vec<char>,
    common: Vec<char>,
}

fn half_match_i(long: &[char], short: &[char], i: usize) -> Option<HalfMatch> {
    let seed = &long[i..i + long.len() / 4];
    let mut j = super::find_sub(short, seed, 0);
    let mut best_common: Vec<char> = Vec::new();
    let mut best_long_a = 0;
    let mut best_long_b = 0;
    let mut best_short_a = 0;
    let mut best_short_b = 0;
    while let Some(jj) = j {
        let prefix_length = common_prefix(&long[i..], &short[jj..]);
        let suffix_length = common_suffix(&long[..i], &short[..jj]);
        if best_common.len() < suffix_length + prefix_length {
            best_common = short[jj - suffix_length..jj + prefix_length].to_vec();
            best_long_a = i - suffix_length;
            best_long_b = i + prefix_length;
            best_short_a = jj - suffix_length;
            best_short_b = jj + prefix_length;
        }
        j = super::find_sub(short, seed, jj + 1);
    }
    if best_common.len() * 2 >= long.len() {
        Some(HalfMatch {
            prefix1: long[..best_long_a].to_vec(),
            suffix1: long[best_long_b..].to_vec(),
            prefix2: short[..best_short_a].to_vec(),
            suffix2: short[best_short_b..].to_vec(),
            common: best_common,
        })
    } else {
        None
    }
}

pub(crate) fn common_prefix(text1: &[char], text2: &[char]) -> usize {
    let n = text1.len().min(text2.len());
    (0..n).find(|&i| text1[i] != text2[i]).unwrap_or(n)
}

pub(crate) fn common_suffix(text1: &[char], text2: &[char]) -> usize {
    let n = text1.len().min(text2.len());
    (0..n)
        .find(|&i| text1[text1.len() - 1 - i] != text2[text2.len() - 1 - i])
        .unwrap_or(n)
}

/// Length of the longest suffix of `text1` that is a prefix of `text2`.
fn common_overlap(text1: &[char], text2: &[char]) -> usize {
    if text1.is_empty() || text2.is_empty() {
        return 0;
    }
    let text1 = if text1.len() > text2.len() {
        &text1[text1.len() - text2.len()..]
    } else {
        text1
    };
    let text2 = if text2.len() > text1.len() {
        &text2[..text1.len()]
    } else {
        text2
    };
    if text1 == text2 {
        return text1.len();
    }
    // Quick-search loop over candidate overlap lengths.
    let mut best = 0;
    let mut length = 1;
    loop {
        if length > text1.len() {
            return best;
        }
        let pattern = &text1[text1.len() - length..];
        let Some(found) = super::find_sub(text2, pattern, 0) else {
            return best;
        };
        length += found;
        if length > text1.len() {
            return best;
        }
        if found == 0 || text1[text1.len() - length..] == text2[..length] {
            best = length;
            length += 1;
        }
    }
}

fn lines_to_tokens(text1: &str, text2: &str) -> (Vec<char>, Vec<char>, Vec<String>) {
    let mut lines: Vec<String> = vec![String::new()];
    let mut hash: HashMap<String, usize> = HashMap::new();

    let mut encode = |text: &str| -> Vec<char> {
        let mut tokens = Vec::new();
        let mut start = 0;
        while start < text.len() {
            let end = text[start..]
                .find('\n')
                .map(|i| start + i + 1)
                .unwrap_or(text.len());
            let line = &text[start..end];
            let index = match hash.get(line) {
                Some(&index) => index,
                None => {
                    lines.push(line.to_string());
                    let index = lines.len() - 1;
                    hash.insert(line.to_string(), index);
                    index
                }
            };
            tokens.push(token_to_char(index));
            start = end;
        }
        tokens
    };

    let tokens1 = encode(text1);
    let tokens2 = encode(text2);
    (tokens1, tokens2, lines)
}

fn tokens_to_lines(diffs: &mut [Diff], lines: &[String]) {
    for diff in diffs {
        let text: String = diff
            .text
            .chars()
            .map(|c| lines[char_to_token(c)].as_str())
            .collect();
        diff.text = text;
    }
}

/// Reorders and merges like edit sections, factoring out commonalities.
/// Any edit section can move as long as it doesn't cross an equality.
pub fn diff_cleanup_merge(diffs: &mut Vec<Diff>) {
    loop {
        if diffs.is_empty() {
            return;
        }
        diffs.push(Diff::equal("")); // sentinel
        let mut pointer = 0;
        let mut count_delete = 0;
        let mut count_insert = 0;
        let mut text_delete: Vec<char> = Vec::new();
        let mut text_insert: Vec<char> = Vec::new();
        while pointer < diffs.len() {
            match diffs[pointer].op {
                Op::Insert => {
                    count_insert += 1;
                    text_insert.extend(diffs[pointer].text.chars());
                    pointer += 1;
                }
                Op::Delete => {
                    count_delete += 1;
                    text_delete.extend(diffs[pointer].text.chars());
                    pointer += 1;
                }
                Op::Equal => {
                    // Upon reaching an equality, check for prior redundancies.
                    if count_delete + count_insert > 1 {
                        if count_delete != 0 && count_insert != 0 {
                            // Factor out any common prefix into the preceding
                            // equality, and any common suffix into this one.
                            let prefix = common_prefix(&text_insert, &text_delete);
                            if prefix != 0 {
                                let prefix_text: String =
                                    text_insert[..prefix].iter().collect();
                                let at = pointer - count_delete - count_insert;
                                if at > 0 && diffs[at - 1].op == Op::Equal {
                                    diffs[at - 1].text.push_str(&prefix_text);
                                } else {
                                    diffs.insert(0, Diff::equal(prefix_text));
                                    pointer += 1;
                                }
                                text_insert.drain(..prefix);
                                text_delete.drain(..prefix);
                            }
                            let suffix = common_suffix(&text_insert, &text_delete);
                            if suffix != 0 {
                                let suffix_text: String =
                                    text_insert[text_insert.len() - suffix..].iter().collect();
                                diffs[pointer].text =
                                    format!("{}{}", suffix_text, diffs[pointer].text);
                                text_insert.truncate(text_insert.len() - suffix);
                                text_delete.truncate(text_delete.len() - suffix);
                            }
                        }
                        // Delete the offending records and add the merged ones.
                        let at = pointer - count_delete - count_insert;
                        let mut replacement = Vec::new();
                        if !text_delete.is_empty() {
                            replacement
                                .push(Diff::delete(text_delete.iter().collect::<String>()));
                        }
                        if !text_insert.is_empty() {
                            replacement
                                .push(Diff::insert(text_insert.iter().collect::<String>()));
                        }
                        diffs.splice(at..pointer, replacement.iter().cloned());
                        pointer = at + replacement.len() + 1;
                    } else if pointer != 0 && diffs[pointer - 1].op == Op::Equal {
                        // Merge this equality with the previous one.
                        let text = diffs.remove(pointer).text;
                        diffs[pointer - 1].text.push_str(&text);
                    } else {
                        pointer += 1;
                    }
                    count_insert = 0;
                    count_delete = 0;
                    text_delete.clear();
                    text_insert.clear();
                }
            }
        }
        if diffs.last().is_some_and(|d| d.is_empty() && d.op == Op::Equal) {
            diffs.pop();
        }

        // Second pass: look for single edits surrounded on both sides by
        // equalities which can be shifted sideways to eliminate an equality.
        let mut changes = false;
        let mut pointer = 1;
        while !diffs.is_empty() && pointer < diffs.len() - 1 {
            if diffs[pointer - 1].op == Op::Equal && diffs[pointer + 1].op == Op::Equal {
                let prev: Vec<char> = diffs[pointer - 1].text.chars().collect();
                let edit: Vec<char> = diffs[pointer].text.chars().collect();
                let next: Vec<char> = diffs[pointer + 1].text.chars().collect();
                if edit.len() >= prev.len() && edit[edit.len() - prev.len()..] == prev[..] {
                    // Shift the edit over the previous equality.
                    let shifted: String = prev
                        .iter()
                        .chain(edit[..edit.len() - prev.len()].iter())
                        .collect();
                    diffs[pointer].text = shifted;
                    let merged: String = prev.iter().chain(next.iter()).collect();
                    diffs[pointer + 1].text = merged;
                    diffs.remove(pointer - 1);
                    changes = true;
                } else if edit.len() >= next.len() && edit[..next.len()] == next[..] {
                    // Shift the edit over the next equality.
                    let next_text: String = next.iter().collect();
                    diffs[pointer - 1].text.push_str(&next_text);
                    let shifted: String = edit[next.len()..]
                        .iter()
                        .chain(next.iter())
                        .collect();
                    diffs[pointer].text = shifted;
                    diffs.remove(pointer + 1);
                    changes = true;
                }
            }
            pointer += 1;
        }
        if !changes {
            return;
        }
    }
}

/// Reduces the number of edits by eliminating semantically trivial
/// equalities, then trims inter-hunk overlaps.
pub fn diff_cleanup_semantic(diffs: &mut Vec<Diff>) {
    let mut changes = false;
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<Vec<char>> = None;
    let mut pointer = 0;
    // Number of characters that changed prior to / after the equality.
    let mut length_insertions1 = 0;
    let mut length_deletions1 = 0;
    let mut length_insertions2 = 0;
    let mut length_deletions2 = 0;
    while pointer < diffs.len() {
        if diffs[pointer].op == Op::Equal {
            equalities.push(pointer);
            length_insertions1 = length_insertions2;
            length_deletions1 = length_deletions2;
            length_insertions2 = 0;
            length_deletions2 = 0;
            last_equality = Some(diffs[pointer].text.chars().collect());
            pointer += 1;
        } else {
            if diffs[pointer].op == Op::Insert {
                length_insertions2 += diffs[pointer].len();
            } else {
                length_deletions2 += diffs[pointer].len();
            }
            // Eliminate an equality smaller or equal to the edits on both
            // of its sides.
            let eliminate = last_equality.as_ref().is_some_and(|eq| {
                eq.len() <= length_insertions1.max(length_deletions1)
                    && eq.len() <= length_insertions2.max(length_deletions2)
            });
            if eliminate {
                let eq = last_equality.take().unwrap();
                let index = *equalities.last().unwrap();
                let eq_text: String = eq.iter().collect();
                diffs[index] = Diff::delete(eq_text.clone());
                diffs.insert(index + 1, Diff::insert(eq_text));
                equalities.pop();
                // Throw away the previous equality; it needs re-evaluation.
                equalities.pop();
                pointer = equalities.last().map_or(0, |&i| i + 1);
                length_insertions1 = 0;
                length_deletions1 = 0;
                length_insertions2 = 0;
                length_deletions2 = 0;
                last_equality = None;
                changes = true;
            } else {
                pointer += 1;
            }
        }
    }

    if changes {
        diff_cleanup_merge(diffs);
    }
    diff_cleanup_semantic_lossless(diffs);

    // Find any overlaps between deletions and insertions:
    // e.g: <del>abcxxx</del><ins>xxxdef</ins> -> <del>abc</del>xxx<ins>def</ins>
    // e.g: <del>xxxabc</del><ins>defxxx</ins> -> <ins>def</ins>xxx<del>abc</del>
    let mut pointer = 1;
    while pointer < diffs.len() {
        if diffs[pointer - 1].op == Op::Delete && diffs[pointer].op == Op::Insert {
            let deletion: Vec<char> = diffs[pointer - 1].text.chars().collect();
            let insertion: Vec<char> = diffs[pointer].text.chars().collect();
            let overlap1 = common_overlap(&deletion, &insertion);
            let overlap2 = common_overlap(&insertion, &deletion);
            if overlap1 >= overlap2 {
                if overlap1 * 2 >= deletion.len() || overlap1 * 2 >= insertion.len() {
                    // Overlap found; insert an equality and trim the edits.
                    diffs.insert(
                        pointer,
                        Diff::equal(insertion[..overlap1].iter().collect::<String>()),
                    );
                    diffs[pointer - 1].text =
                        deletion[..deletion.len() - overlap1].iter().collect();
                    diffs[pointer + 1].text = insertion[overlap1..].iter().collect();
                    pointer += 1;
                }
            } else if overlap2 * 2 >= deletion.len() || overlap2 * 2 >= insertion.len() {
                // Reversed overlap: swap the edits around the equality.
                diffs.insert(
                    pointer,
                    Diff::equal(deletion[..overlap2].iter().collect::<String>()),
                );
                let new_insert: String = insertion[..insertion.len() - overlap2].iter().collect();
                let new_delete: String = deletion[overlap2..].iter().collect();
                diffs[pointer - 1] = Diff::insert(new_insert);
                diffs[pointer + 1] = Diff::delete(new_delete);
                pointer += 1;
            }
            pointer += 1;
        }
        pointer += 1;
    }
}

/// Scores a split point between `one` and `two`; higher is semantically
/// cleaner: blank line > line break > sentence end > whitespace >
/// non-alphanumeric > none.
fn cleanup_semantic_score(one: &[char], two: &[char]) -> u32 {
    if one.is_empty() || two.is_empty() {
        // Edges are the best.
        return 6;
    }
    let char1 = one[one.len() - 1];
    let char2 = two[0];
    let non_alnum1 = !char1.is_alphanumeric();
    let non_alnum2 = !char2.is_alphanumeric();
    let whitespace1 = non_alnum1 && char1.is_whitespace();
    let whitespace2 = non_alnum2 && char2.is_whitespace();
    let line_break1 = whitespace1 && (char1 == '\n' || char1 == '\r');
    let line_break2 = whitespace2 && (char2 == '\n' || char2 == '\r');
    let blank_line1 = line_break1 && ends_with_blank_line(one);
    let blank_line2 = line_break2 && starts_with_blank_line(two);

    if blank_line1 || blank_line2 {
        5
    } else if line_break1 || line_break2 {
        4
    } else if non_alnum1 && !whitespace1 && whitespace2 {
        // End of sentence.
        3
    } else if whitespace1 || whitespace2 {
        2
    } else if non_alnum1 || non_alnum2 {
        1
    } else {
        0
    }
}

fn ends_with_blank_line(text: &[char]) -> bool {
    let s: String = text
        .iter()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    s.ends_with("\n\n") || s.ends_with("\n\r\n")
}

fn starts_with_blank_line(text: &[char]) -> bool {
    let s: String = text.iter().take(4).collect();
    s.starts_with("\r\n\r\n")
        || s.starts_with("\n\n")
        || s.starts_with("\r\n\n")
        || s.starts_with("\n\r\n")
}

/// Shifts edits sideways so their boundaries land on semantically clean
/// positions (factoring common affixes shared with the neighbour
/// equalities).
pub fn diff_cleanup_semantic_lossless(diffs: &mut Vec<Diff>) {
    let mut pointer = 1;
    while !diffs.is_empty() && pointer < diffs.len().saturating_sub(1) {
        if diffs[pointer - 1].op == Op::Equal && diffs[pointer + 1].op == Op::Equal {
            let mut equality1: Vec<char> = diffs[pointer - 1].text.chars().collect();
            let mut edit: Vec<char> = diffs[pointer].text.chars().collect();
            let mut equality2: Vec<char> = diffs[pointer + 1].text.chars().collect();

            // First, shift the edit as far left as possible.
            let offset = common_suffix(&equality1, &edit);
            if offset != 0 {
                let common = edit[edit.len() - offset..].to_vec();
                equality1.truncate(equality1.len() - offset);
                let mut shifted = common.clone();
                shifted.extend_from_slice(&edit[..edit.len() - offset]);
                edit = shifted;
                let mut new_eq2 = common;
                new_eq2.extend_from_slice(&equality2);
                equality2 = new_eq2;
            }

            // Second, step character by character right looking for the
            // best score.
            let mut best_equality1 = equality1.clone();
            let mut best_edit = edit.clone();
            let mut best_equality2 = equality2.clone();
            let mut best_score =
                cleanup_semantic_score(&equality1, &edit) + cleanup_semantic_score(&edit, &equality2);
            while !edit.is_empty() && !equality2.is_empty() && edit[0] == equality2[0] {
                equality1.push(edit[0]);
                edit.remove(0);
                edit.push(equality2[0]);
                equality2.remove(0);
                let score = cleanup_semantic_score(&equality1, &edit)
                    + cleanup_semantic_score(&edit, &equality2);
                // The >= encourages trailing rather than leading whitespace.
                if score >= best_score {
                    best_score = score;
                    best_equality1 = equality1.clone();
                    best_edit = edit.clone();
                    best_equality2 = equality2.clone();
                }
            }

            if diffs[pointer - 1].text.chars().collect::<Vec<_>>() != best_equality1 {
                // We have an improvement, save it back to the diff.
                if best_equality1.is_empty() {
                    diffs.remove(pointer - 1);
                    pointer -= 1;
                } else {
                    diffs[pointer - 1].text = best_equality1.iter().collect();
                }
                diffs[pointer].text = best_edit.iter().collect();
                if best_equality2.is_empty() {
                    diffs.remove(pointer + 1);
                } else {
                    diffs[pointer + 1].text = best_equality2.iter().collect();
                }
            }
        }
        pointer += 1;
    }
}

impl DiffMatchPatch {
    /// Reduces the number of edits by eliminating operationally trivial
    /// equalities, balancing edit cost against fragmentation.
    pub fn diff_cleanup_efficiency(&self, diffs: &mut Vec<Diff>) {
        if diffs.is_empty() {
            return;
        }
        let mut changes = false;
        let mut equalities: Vec<usize> = Vec::new();
        let mut last_equality: Option<String> = None;
        let mut pointer = 0;
        // Is there an insertion/deletion operation before/after the last
        // equality?
        let mut pre_ins = false;
        let mut pre_del = false;
        let mut post_ins = false;
        let mut post_del = false;
        while pointer < diffs.len() {
            if diffs[pointer].op == Op::Equal {
                if diffs[pointer].len() < self.diff_edit_cost && (post_ins || post_del) {
                    // Candidate found.
                    equalities.push(pointer);
                    pre_ins = post_ins;
                    pre_del = post_del;
                    last_equality = Some(diffs[pointer].text.clone());
                } else {
                    // Not a candidate; never return to this equality.
                    equalities.clear();
                    last_equality = None;
                }
                post_ins = false;
                post_del = false;
                pointer += 1;
            } else {
                if diffs[pointer].op == Op::Delete {
                    post_del = true;
                } else {
                    post_ins = true;
                }
                // Five types to be split:
                // <ins>A</ins><del>B</del>XY<ins>C</ins><del>D</del>
                // <ins>A</ins>X<ins>C</ins><del>D</del>
                // <ins>A</ins><del>B</del>X<ins>C</ins>
                // <ins>A</del>X<ins>C</ins><del>D</del>
                // <ins>A</ins><del>B</del>X<del>C</del>
                let split = last_equality.as_ref().is_some_and(|eq| {
                    (pre_ins && pre_del && post_ins && post_del)
                        || (eq.chars().count() < self.diff_edit_cost / 2
                            && u8::from(pre_ins)
                                + u8::from(pre_del)
                                + u8::from(post_ins)
                                + u8::from(post_del)
                                == 3)
                });
                if split {
                    let eq = last_equality.take().unwrap();
                    let index = *equalities.last().unwrap();
                    diffs[index] = Diff::delete(eq.clone());
                    diffs.insert(index + 1, Diff::insert(eq));
                    equalities.pop();
                    if pre_ins && pre_del {
                        // No changes made which could affect previous entry,
                        // keep going.
                        post_ins = true;
                        post_del = true;
                        equalities.clear();
                    } else {
                        equalities.pop();
                        pointer = equalities.last().map_or(0, |&i| i + 1);
                        if equalities.is_empty() {
                            pointer = 0;
                        }
                        post_ins = false;
                        post_del = false;
                    }
                    changes = true;
                } else {
                    pointer += 1;
                }
            }
        }
        if changes {
            diff_cleanup_merge(diffs);
        }
    }
}

/// Given a location in `text1`, computes the equivalent location in
/// `text2` per the diff script.
pub fn diff_x_index(diffs: &[Diff], loc: usize) -> usize {
    let mut chars1 = 0;
    let mut chars2 = 0;
    let mut last_chars1 = 0;
    let mut last_chars2 = 0;
    let mut last_diff: Option<&Diff> = None;
    for diff in diffs {
        if diff.op != Op::Insert {
            chars1 += diff.len();
        }
        if diff.op != Op::Delete {
            chars2 += diff.len();
        }
        if chars1 > loc {
            last_diff = Some(diff);
            break;
        }
        last_chars1 = chars1;
        last_chars2 = chars2;
    }
    if last_diff.is_some_and(|d| d.op == Op::Delete) {
        // The location was deleted.
        return last_chars2;
    }
    // Add the remaining character length.
    last_chars2 + (loc - last_chars1)
}
