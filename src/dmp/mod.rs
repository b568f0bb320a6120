//! Character-level diff, fuzzy match and patch engine.
//!
//! This is an implementation of the classic diff-match-patch algorithm
//! family with the extensions the patch lifecycle needs: per-hunk context
//! direction and length constraints, engine-version skip states, a
//! split-on-insertion mode so every guarded injection lands in its own
//! hunk, sequential matching, and an apply result that maps post-split
//! hunks back to their originating hunk.
//!
//! All offsets and lengths count Unicode scalar values, not bytes; the
//! serialized form (`@@ -s1,l1 +s2,l2 @@`) is byte-for-byte deterministic.

mod diff;
mod matching;
mod patch;

pub use patch::{ApplyOutcome, ContextDir, PatchHunk, SkipState};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::CrysknifeError;

/// One edit operation over a run of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Delete,
    Insert,
    Equal,
}

/// A single diff: an operation and the text it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub op: Op,
    pub text: String,
}

impl Diff {
    pub fn new(op: Op, text: impl Into<String>) -> Self {
        Self {
            op,
            text: text.into(),
        }
    }

    pub fn equal(text: impl Into<String>) -> Self {
        Self::new(Op::Equal, text)
    }

    pub fn insert(text: impl Into<String>) -> Self {
        Self::new(Op::Insert, text)
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self::new(Op::Delete, text)
    }

    /// Length in scalar values.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Source text reconstructed from a diff script (all non-Insert runs).
pub fn diff_text1(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|d| d.op != Op::Insert)
        .map(|d| d.text.as_str())
        .collect()
}

/// Destination text reconstructed from a diff script (all non-Delete runs).
pub fn diff_text2(diffs: &[Diff]) -> String {
    diffs
        .iter()
        .filter(|d| d.op != Op::Delete)
        .map(|d| d.text.as_str())
        .collect()
}

/// Number of inserted or deleted scalar values, whichever run is larger per
/// contiguous edit region.
pub fn diff_levenshtein(diffs: &[Diff]) -> usize {
    let mut levenshtein = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    for diff in diffs {
        match diff.op {
            Op::Insert => insertions += diff.len(),
            Op::Delete => deletions += diff.len(),
            Op::Equal => {
                levenshtein += insertions.max(deletions);
                insertions = 0;
                deletions = 0;
            }
        }
    }
    levenshtein + insertions.max(deletions)
}

/// Plain character-DP Levenshtein between two short strings. The merge pass
/// uses this for near-equality tests on trimmed insert text.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

// The escape set mirrors JavaScript's encodeURI: alphanumerics and
// !#$&'()*+,-./:;=?@_~ pass through, everything else (controls, space,
// quotes, brackets, percent itself) is percent-escaped.
const URI_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\');

pub(crate) fn encode_uri(text: &str) -> String {
    utf8_percent_encode(text, URI_ESCAPE).to_string()
}

pub(crate) fn decode_uri(text: &str) -> Result<String, CrysknifeError> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| CrysknifeError::InvalidPatch {
            detail: format!("illegal escape in patch body: {text}"),
        })
}

/// Tunable diff/match/patch engine. One instance is configured per plugin
/// and reused across files; all methods take `&self`.
#[derive(Debug, Clone)]
pub struct DiffMatchPatch {
    /// Seconds to spend on a diff before accepting a non-minimal result.
    /// Zero or negative disables the deadline.
    pub diff_timeout: f32,
    /// Cost of an empty edit operation in terms of edit characters, used by
    /// the efficiency cleanup.
    pub diff_edit_cost: usize,
    /// Match score ceiling; 0.0 requires perfection, 1.0 accepts anything.
    pub match_threshold: f32,
    /// Distance weight for the bitap score. `i32::MAX` effectively disables
    /// the location penalty.
    pub match_distance: i32,
    /// When the imperfect-match Levenshtein over expected length exceeds
    /// this, the hunk is dropped as unsalvageable.
    pub patch_delete_threshold: f32,
    /// Context padding appended around each hunk.
    pub patch_margin: usize,
    /// Bitap word width; patterns longer than this are matched piecewise.
    pub match_max_bits: usize,
    /// Close the open hunk after every insertion so injections stay whole.
    pub split_on_insertion: bool,
    /// Anchor each hunk's expected location after the previous successful
    /// hunk instead of at `start2 + delta`.
    pub match_sequentially: bool,
}

impl Default for DiffMatchPatch {
    fn default() -> Self {
        Self {
            diff_timeout: 1.0,
            diff_edit_cost: 4,
            match_threshold: 0.5,
            match_distance: 1000,
            patch_delete_threshold: 0.5,
            patch_margin: 4,
            match_max_bits: 64,
            split_on_insertion: false,
            match_sequentially: false,
        }
    }
}

/// Searches `haystack` for `needle` starting at `from`, by scalar index.
pub(crate) fn find_sub(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if from >= haystack.len() || haystack.len() - from < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Last occurrence of `needle` starting at or before `from`.
pub(crate) fn rfind_sub(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    if haystack.len() < needle.len() {
        return None;
    }
    let last_start = from.min(haystack.len() - needle.len());
    (0..=last_start)
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}
