//! Recognition and reversible stripping of guarded source regions.
//!
//! Three guard forms mark plugin-owned code inside an engine file:
//!
//! 1. Multiline: `// <Tag>: Begin` … `// <Tag>: End` around a block.
//! 2. Singleline: `<code> // <Tag>` at the end of an injected line.
//! 3. Nextline: `// <Tag>` on its own line guarding the line below.
//!
//! A tag that starts with `<plugin>-` marks a deletion restore: the block
//! holds the original engine code commented out, and stripping the guards
//! re-activates it. Any other tag marks pure injection and strips to
//! nothing.
//!
//! The multiline form is a line scanner with Begin/End depth tracking
//! rather than a greedy dot-all regex, so nested guard pairs attribute
//! correctly.

use std::ops::Range;

use log::warn;
use regex::Regex;

use crate::tag::{CommentTagFormat, GuardKind, GuardLineMatcher};

/// Which guard form produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    Multiline,
    Singleline,
    Nextline,
}

/// One guarded region found in engine source.
#[derive(Debug, Clone)]
pub struct InjectionMatch {
    /// Byte range of the full region, guards and trailing newline included.
    pub range: Range<usize>,
    pub kind: InjectionKind,
    pub tag: String,
    /// Deletion-restore block (tag starts with `<plugin>-`).
    pub is_restore: bool,
    /// What stripping substitutes: empty for injections, the re-activated
    /// stock code for restores.
    pub replacement: String,
}

/// Per-plugin guard recognizer over the configured comment dialect.
#[derive(Debug)]
pub struct InjectionRegex {
    plugin: String,
    begin: GuardLineMatcher,
    end: GuardLineMatcher,
    bare: GuardLineMatcher,
    comment_strip: Regex,
}

impl InjectionRegex {
    pub fn new(plugin: &str, format: &CommentTagFormat) -> Result<Self, crate::CrysknifeError> {
        Ok(Self {
            plugin: plugin.to_string(),
            begin: GuardLineMatcher::new(format, plugin, GuardKind::Begin, false)?,
            end: GuardLineMatcher::new(format, plugin, GuardKind::End, false)?,
            bare: GuardLineMatcher::new(format, plugin, GuardKind::Bare, false)?,
            comment_strip: Regex::new(r"(?m)^([ \t]*)// ?").expect("static pattern"),
        })
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn is_restore(&self, tag: &str) -> bool {
        tag.strip_prefix(self.plugin.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Re-activates commented-out stock code.
    fn strip_comments(&self, content: &str) -> String {
        self.comment_strip.replace_all(content, "$1").into_owned()
    }

    /// Finds every guarded region of this plugin, ordered and
    /// non-overlapping. Multiline regions win over the line forms.
    pub fn matches(&self, content: &str) -> Vec<InjectionMatch> {
        let lines = index_lines(content);
        let mut covered = vec![false; lines.len()];
        let mut found = Vec::new();

        // Pass 1: multiline regions with depth tracking.
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].text(content);
            let Some(tag) = self.begin.guard_only(line) else {
                i += 1;
                continue;
            };
            let mut depth = 1usize;
            let mut j = i;
            while depth > 0 {
                j += 1;
                if j >= lines.len() {
                    break;
                }
                let inner = lines[j].text(content);
                if self.begin.guard_only(inner).is_some() {
                    depth += 1;
                } else if self.end.guard_only(inner).is_some() {
                    depth -= 1;
                }
            }
            if depth > 0 {
                warn!(
                    "unterminated guard block '{}' at byte {}",
                    tag, lines[i].start
                );
                i += 1;
                continue;
            }
            let inner = &content[lines[i].end..lines[j].start];
            let is_restore = self.is_restore(&tag);
            let replacement = if is_restore {
                self.strip_comments(inner)
            } else {
                String::new()
            };
            found.push(InjectionMatch {
                range: lines[i].start..lines[j].end,
                kind: InjectionKind::Multiline,
                tag,
                is_restore,
                replacement,
            });
            for flag in &mut covered[i..=j] {
                *flag = true;
            }
            i = j + 1;
        }

        // Pass 2: single/next line forms outside multiline regions.
        let mut i = 0;
        while i < lines.len() {
            if covered[i] {
                i += 1;
                continue;
            }
            let line = lines[i].text(content);
            if let Some(tag) = self.end.guard_only(line) {
                warn!("stray guard end '{}' at byte {}", tag, lines[i].start);
                i += 1;
                continue;
            }
            if let Some(tag) = self.bare.guard_only(line) {
                // Next-line form: the guard protects the following line.
                let is_restore = self.is_restore(&tag);
                let guarded = (i + 1 < lines.len() && !covered[i + 1]).then_some(i + 1);
                let (end, replacement) = match guarded {
                    Some(next) => {
                        let body = lines[next].with_eol(content);
                        let replacement = if is_restore {
                            self.strip_comments(body)
                        } else {
                            String::new()
                        };
                        (lines[next].end, replacement)
                    }
                    None => (lines[i].end, String::new()),
                };
                found.push(InjectionMatch {
                    range: lines[i].start..end,
                    kind: InjectionKind::Nextline,
                    tag,
                    is_restore,
                    replacement,
                });
                covered[i] = true;
                if let Some(next) = guarded {
                    covered[next] = true;
                }
                i += 1;
                continue;
            }
            if let Some((tag, code_end)) = self.bare.trailing_guard(line) {
                // Single-line form: the code before the comment is guarded.
                let is_restore = self.is_restore(&tag);
                let code = &line[..code_end];
                let eol = &content[lines[i].start + line.len()..lines[i].end];
                let replacement = if is_restore {
                    format!("{}{}", self.strip_comments(code.trim_end()), eol)
                } else {
                    String::new()
                };
                found.push(InjectionMatch {
                    range: lines[i].start..lines[i].end,
                    kind: InjectionKind::Singleline,
                    tag,
                    is_restore,
                    replacement,
                });
                covered[i] = true;
            }
            i += 1;
        }

        found.sort_by_key(|m| m.range.start);
        found
    }

    /// Strips every guarded region: injections vanish, restores come back.
    /// Idempotent, and the identity on untagged content.
    pub fn unpatch(&self, content: &str) -> String {
        splice_matches(content, &self.matches(content))
    }
}

/// The active plugin's recognizer composed with its dependency siblings,
/// whose residual guards are cleared so diffs stay plugin-local.
#[derive(Debug)]
pub struct InjectionRegexGroup {
    primary: InjectionRegex,
    siblings: Vec<InjectionRegex>,
}

impl InjectionRegexGroup {
    pub fn new(primary: InjectionRegex, siblings: Vec<InjectionRegex>) -> Self {
        Self { primary, siblings }
    }

    pub fn primary(&self) -> &InjectionRegex {
        &self.primary
    }

    /// Removes sibling plugins' guarded regions, keeping this plugin's.
    pub fn clear_residuals(&self, content: &str) -> String {
        self.siblings
            .iter()
            .fold(content.to_string(), |text, sibling| sibling.unpatch(&text))
    }

    /// The cleared target: sibling residuals removed, then this plugin's
    /// own injections stripped and restores reverted.
    pub fn unpatch(&self, content: &str) -> String {
        self.primary.unpatch(&self.clear_residuals(content))
    }
}

pub(crate) fn splice_matches(content: &str, matches: &[InjectionMatch]) -> String {
    let mut output = String::with_capacity(content.len());
    let mut cursor = 0;
    for m in matches {
        if m.range.start < cursor {
            // Overlap means the scanner already consumed this region.
            continue;
        }
        output.push_str(&content[cursor..m.range.start]);
        output.push_str(&m.replacement);
        cursor = m.range.end;
    }
    output.push_str(&content[cursor..]);
    output
}

/// Byte-offset view of one line, exclusive of its terminator in `text()`
/// and inclusive in `with_eol()`.
#[derive(Debug, Clone, Copy)]
struct LineSpan {
    start: usize,
    /// End of the line including its terminator (or EOF).
    end: usize,
    /// End of the visible text, excluding `\r\n` / `\n`.
    text_end: usize,
}

impl LineSpan {
    fn text<'a>(&self, content: &'a str) -> &'a str {
        &content[self.start..self.text_end]
    }

    fn with_eol<'a>(&self, content: &'a str) -> &'a str {
        &content[self.start..self.end]
    }
}

fn index_lines(content: &str) -> Vec<LineSpan> {
    let mut lines = Vec::new();
    let mut start = 0;
    let bytes = content.as_bytes();
    while start < bytes.len() {
        let end = match content[start..].find('\n') {
            Some(i) => start + i + 1,
            None => bytes.len(),
        };
        let mut text_end = end;
        if text_end > start && bytes[text_end - 1] == b'\n' {
            text_end -= 1;
            if text_end > start && bytes[text_end - 1] == b'\r' {
                text_end -= 1;
            }
        }
        lines.push(LineSpan {
            start,
            end,
            text_end,
        });
        start = end;
    }
    lines
}
