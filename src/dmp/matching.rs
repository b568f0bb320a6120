//! Fuzzy location of a pattern inside a larger text.
//!
//! An exact hit always wins; otherwise a bitap search with 64-bit alphabet
//! masks scores candidate locations by error rate and distance from the
//! expected location.

use std::collections::HashMap;

use log::trace;

use super::DiffMatchPatch;

impl DiffMatchPatch {
    /// Locates the best instance of `pattern` in `text` near `loc`.
    /// Returns `None` when no match clears `match_threshold` or the
    /// pattern exceeds the bitap word width.
    pub fn match_main(&self, text: &[char], pattern: &[char], loc: usize) -> Option<usize> {
        let loc = loc.min(text.len());
        if text == pattern {
            // Shortcut.
            return Some(0);
        }
        if text.is_empty() {
            return None;
        }
        if loc + pattern.len() <= text.len() && &text[loc..loc + pattern.len()] == pattern {
            // Perfect match at the expected location.
            return Some(loc);
        }
        self.match_bitap(text, pattern, loc)
    }

    fn match_bitap(&self, text: &[char], pattern: &[char], loc: usize) -> Option<usize> {
        if pattern.is_empty() {
            return Some(loc);
        }
        if pattern.len() > self.match_max_bits {
            // Oversized patterns are matched piecewise by the apply loop.
            trace!(
                "bitap pattern of {} chars exceeds {} bits",
                pattern.len(),
                self.match_max_bits
            );
            return None;
        }

        let alphabet = match_alphabet(pattern);

        // Highest score beyond which we give up.
        let mut score_threshold = f64::from(self.match_threshold);
        // Is there a nearby exact match? (speedup)
        if let Some(best_loc) = super::find_sub(text, pattern, loc) {
            score_threshold = self
                .bitap_score(0, best_loc, loc, pattern.len())
                .min(score_threshold);
            // What about in the other direction? (speedup)
            if let Some(best_loc) = super::rfind_sub(text, pattern, loc + pattern.len()) {
                score_threshold = self
                    .bitap_score(0, best_loc, loc, pattern.len())
                    .min(score_threshold);
            }
        }

        let match_mask: u64 = 1 << (pattern.len() - 1);
        let mut best_loc: isize = -1;

        let mut bin_min;
        let mut bin_mid;
        let mut bin_max = pattern.len() + text.len();
        let mut last_rd: Vec<u64> = Vec::new();
        for d in 0..pattern.len() {
            // Scan for the best match; each iteration allows one more error.
            // Run a binary search to determine how far from 'loc' we can
            // stray at this error level.
            bin_min = 0;
            bin_mid = bin_max;
            while bin_min < bin_mid {
                if self.bitap_score(d, loc + bin_mid, loc, pattern.len()) <= score_threshold {
                    bin_min = bin_mid;
                } else {
                    bin_max = bin_mid;
                }
                bin_mid = (bin_max - bin_min) / 2 + bin_min;
            }
            // Use the result from this iteration as the maximum for the next.
            bin_max = bin_mid;
            let mut start = if loc > bin_mid { loc - bin_mid + 1 } else { 1 };
            let finish = (loc + bin_mid).min(text.len()) + pattern.len();

            let mut rd = vec![0u64; finish + 2];
            rd[finish + 1] = (1u64 << d) - 1;
            let last = |idx: usize| -> u64 { last_rd.get(idx).copied().unwrap_or(0) };
            let mut j = finish;
            while j >= start {
                let char_match = if text.len() < j {
                    // Out of range.
                    0
                } else {
                    alphabet.get(&text[j - 1]).copied().unwrap_or(0)
                };
                rd[j] = if d == 0 {
                    // First pass: exact match.
                    ((rd[j + 1] << 1) | 1) & char_match
                } else {
                    // Subsequent passes: fuzzy match.
                    (((rd[j + 1] << 1) | 1) & char_match)
                        | (((last(j + 1) | last(j)) << 1) | 1)
                        | last(j + 1)
                };
                if rd[j] & match_mask != 0 {
                    let score = self.bitap_score(d, j - 1, loc, pattern.len());
                    // This match will almost certainly be better than any
                    // existing match, but double-check anyway.
                    if score <= score_threshold {
                        score_threshold = score;
                        best_loc = (j - 1) as isize;
                        if best_loc as usize > loc {
                            // When passing loc, don't exceed our current
                            // distance from loc.
                            start = (2 * loc).saturating_sub(best_loc as usize).max(1);
                        } else {
                            // Already passed loc; downhill from here.
                            break;
                        }
                    }
                }
                j -= 1;
            }
            // No hope for a better match at greater error levels.
            if self.bitap_score(d + 1, loc, loc, pattern.len()) > score_threshold {
                break;
            }
            last_rd = rd;
        }

        if best_loc < 0 {
            None
        } else {
            Some(best_loc as usize)
        }
    }

    /// Score for a match with `errors` errors at `x`, given the expected
    /// location `loc`. 0.0 is perfect, 1.0 is terrible.
    fn bitap_score(&self, errors: usize, x: usize, loc: usize, pattern_len: usize) -> f64 {
        let accuracy = errors as f64 / pattern_len as f64;
        let proximity = loc.abs_diff(x) as f64;
        if self.match_distance == 0 {
            // Dodge divide by zero.
            return if proximity == 0.0 { accuracy } else { 1.0 };
        }
        accuracy + proximity / f64::from(self.match_distance)
    }
}

/// Bitmask of pattern character positions, little-endian on the last
/// character.
fn match_alphabet(pattern: &[char]) -> HashMap<char, u64> {
    let mut alphabet = HashMap::new();
    for (i, &c) in pattern.iter().enumerate() {
        let mask = alphabet.entry(c).or_insert(0u64);
        *mask |= 1 << (pattern.len() - i - 1);
    }
    alphabet
}
