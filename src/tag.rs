//! Guard comment reformatting between the canonical on-disk form and the
//! configured in-tree form.
//!
//! Serialized patches always carry the canonical `// <Tag>[: Begin|: End]`
//! spelling. Inside an engine tree a team may configure an arbitrary
//! comment dialect via regexes with named captures plus reconstruction
//! templates; the packer rewrites between the two and shuttles captured
//! values through the hunk's capture side channel so the round trip is
//! lossless for protected patches.

use log::warn;
use regex::Regex;

use crate::config::VariableMap;
use crate::dmp::{Op, PatchHunk};
use crate::CrysknifeError;

pub const CANONICAL_PREFIX: &str = " ";
pub const CANONICAL_SUFFIX: &str = "";
pub const CANONICAL_BEGIN: &str = ": Begin";
pub const CANONICAL_END: &str = ": End";

/// One structural piece of a guard comment.
#[derive(Debug, Clone)]
pub struct TagComponent {
    /// Fixed canonical spelling used in serialized patches.
    pub canonical: String,
    /// Regex recognizing the configured in-tree spelling; may declare
    /// named captures.
    pub pattern: String,
    /// Template reconstructing the in-tree spelling, with `${Name}` and
    /// `${Name|Fallback}` references to captures and variables.
    pub template: String,
}

impl TagComponent {
    fn canonical_only(canonical: &str) -> Self {
        Self {
            canonical: canonical.to_string(),
            pattern: regex::escape(canonical),
            template: canonical.to_string(),
        }
    }
}

/// The complete guard dialect for one plugin's tree.
#[derive(Debug, Clone)]
pub struct CommentTagFormat {
    pub prefix: TagComponent,
    pub suffix: TagComponent,
    pub begin: TagComponent,
    pub end: TagComponent,
    /// Swap the ordering of tag and suffix around the begin/end markers.
    pub anastrophe: bool,
}

impl Default for CommentTagFormat {
    fn default() -> Self {
        Self {
            prefix: TagComponent::canonical_only(CANONICAL_PREFIX),
            suffix: TagComponent::canonical_only(CANONICAL_SUFFIX),
            begin: TagComponent::canonical_only(CANONICAL_BEGIN),
            end: TagComponent::canonical_only(CANONICAL_END),
            anastrophe: false,
        }
    }
}

impl CommentTagFormat {
    /// Reads the format overrides from config variables; every unset piece
    /// falls back to the canonical spelling.
    pub fn from_variables(vars: &VariableMap) -> Self {
        let component = |stem: &str, canonical: &str| -> TagComponent {
            let pattern = vars
                .get(&format!("CRYSKNIFE_COMMENT_TAG_{stem}_RE"))
                .map(String::from)
                .unwrap_or_else(|| regex::escape(canonical));
            let template = vars
                .get(&format!("CRYSKNIFE_COMMENT_TAG_{stem}"))
                .map(String::from)
                .unwrap_or_else(|| canonical.to_string());
            TagComponent {
                canonical: canonical.to_string(),
                pattern,
                template,
            }
        };
        Self {
            prefix: component("PREFIX", CANONICAL_PREFIX),
            suffix: component("SUFFIX", CANONICAL_SUFFIX),
            begin: component("BEGIN", CANONICAL_BEGIN),
            end: component("END", CANONICAL_END),
            anastrophe: vars
                .get("CRYSKNIFE_COMMENT_TAG_ANASTROPHE")
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1"),
        }
    }

    /// Permissive tag pattern: the plugin name plus anything non-structural
    /// up to the next component, so inline remarks between the name and
    /// the markers survive.
    pub fn tag_pattern(plugin: &str) -> String {
        format!("{}[^\n]*?", regex::escape(plugin))
    }
}

/// Which structural marker a guard carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardKind {
    Begin,
    End,
    Bare,
}

/// A compiled recognizer for one guard kind on one side of the dialect.
/// Shared between the packer and the injection scanner.
#[derive(Debug)]
pub(crate) struct GuardLineMatcher {
    regex: Regex,
    kind: GuardKind,
    /// Names of non-Tag captures, in group order.
    capture_names: Vec<String>,
}

impl GuardLineMatcher {
    pub(crate) fn new(
        format: &CommentTagFormat,
        plugin: &str,
        kind: GuardKind,
        canonical_side: bool,
    ) -> Result<Self, CrysknifeError> {
        let piece = |c: &TagComponent| {
            if canonical_side {
                regex::escape(&c.canonical)
            } else {
                c.pattern.clone()
            }
        };
        let tag = format!("(?P<Tag>{})", CommentTagFormat::tag_pattern(plugin));
        let marker = match kind {
            GuardKind::Begin => piece(&format.begin),
            GuardKind::End => piece(&format.end),
            GuardKind::Bare => String::new(),
        };
        let body = if format.anastrophe && kind != GuardKind::Bare && !canonical_side {
            format!("{}{}{}{}", piece(&format.prefix), marker, tag, piece(&format.suffix))
        } else {
            format!("{}{}{}{}", piece(&format.prefix), tag, piece(&format.suffix), marker)
        };
        let pattern = format!("(?m)//{body}[ \t]*$");
        let regex = Regex::new(&pattern).map_err(|e| CrysknifeError::InvalidTagFormat {
            detail: format!("bad guard pattern '{pattern}': {e}"),
        })?;
        let capture_names = regex
            .capture_names()
            .flatten()
            .filter(|name| *name != "Tag")
            .map(String::from)
            .collect();
        Ok(Self {
            regex,
            kind,
            capture_names,
        })
    }

    /// The guard tag when `line` consists of nothing but this guard
    /// (leading whitespace allowed).
    pub(crate) fn guard_only(&self, line: &str) -> Option<String> {
        let caps = self.regex.captures(line)?;
        let whole = caps.get(0)?;
        if !line[..whole.start()].trim().is_empty() {
            return None;
        }
        Some(caps.name("Tag")?.as_str().to_string())
    }

    /// The guard tag and the comment's start offset when `line` carries
    /// code followed by this guard.
    pub(crate) fn trailing_guard(&self, line: &str) -> Option<(String, usize)> {
        let caps = self.regex.captures(line)?;
        let whole = caps.get(0)?;
        if line[..whole.start()].trim().is_empty() {
            return None;
        }
        Some((caps.name("Tag")?.as_str().to_string(), whole.start()))
    }
}

/// Rewrites guard comments inside patch hunks between the configured and
/// canonical dialects, adjusting destination offsets for the size delta.
pub struct TagPacker<'a> {
    plugin: &'a str,
    format: &'a CommentTagFormat,
    vars: &'a VariableMap,
    /// In-tree matchers, begin/end before bare so markers win.
    configured: Vec<GuardLineMatcher>,
    /// Canonical matchers, same ordering.
    canonical: Vec<GuardLineMatcher>,
}

impl<'a> TagPacker<'a> {
    pub fn new(
        plugin: &'a str,
        format: &'a CommentTagFormat,
        vars: &'a VariableMap,
    ) -> Result<Self, CrysknifeError> {
        let build = |canonical_side: bool| -> Result<Vec<GuardLineMatcher>, CrysknifeError> {
            Ok(vec![
                GuardLineMatcher::new(format, plugin, GuardKind::Begin, canonical_side)?,
                GuardLineMatcher::new(format, plugin, GuardKind::End, canonical_side)?,
                GuardLineMatcher::new(format, plugin, GuardKind::Bare, canonical_side)?,
            ])
        };
        Ok(Self {
            plugin,
            format,
            vars,
            configured: build(false)?,
            canonical: build(true)?,
        })
    }

    /// Configured → canonical, recording captures. Run before
    /// serialization; `skip_captures` drops the side channel for published
    /// main patches.
    pub fn pack(&self, hunks: &mut [PatchHunk], skip_captures: bool) {
        let mut delta = 0isize;
        for hunk in hunks.iter_mut() {
            hunk.start2 = (hunk.start2 as isize + delta).max(0) as usize;
            let mut captures = Vec::new();
            let mut hunk_delta = 0isize;
            for diff in &mut hunk.diffs {
                if diff.op != Op::Insert {
                    continue;
                }
                let before = diff.text.chars().count() as isize;
                diff.text = self.pack_text(&diff.text, &mut captures);
                hunk_delta += diff.text.chars().count() as isize - before;
            }
            hunk.length2 = (hunk.length2 as isize + hunk_delta).max(0) as usize;
            delta += hunk_delta;
            hunk.captures = if skip_captures { Vec::new() } else { captures };
        }
    }

    /// Canonical → configured, expanding templates from the capture side
    /// channel and the variable map. Run after deserialization.
    pub fn unpack(&self, hunks: &mut [PatchHunk]) {
        let mut delta = 0isize;
        for hunk in hunks.iter_mut() {
            hunk.start2 = (hunk.start2 as isize + delta).max(0) as usize;
            let mut cursor = 0usize;
            let mut hunk_delta = 0isize;
            let captures = std::mem::take(&mut hunk.captures);
            for diff in &mut hunk.diffs {
                if diff.op != Op::Insert {
                    continue;
                }
                let before = diff.text.chars().count() as isize;
                diff.text = self.unpack_text(&diff.text, &captures, &mut cursor);
                hunk_delta += diff.text.chars().count() as isize - before;
            }
            hunk.length2 = (hunk.length2 as isize + hunk_delta).max(0) as usize;
            delta += hunk_delta;
        }
    }

    fn pack_text(&self, text: &str, captures: &mut Vec<(String, String)>) -> String {
        self.rewrite_lines(text, |line| {
            for matcher in &self.configured {
                let Some(caps) = matcher.regex.captures(line) else {
                    continue;
                };
                let Some(tag) = caps.name("Tag") else {
                    continue;
                };
                for name in &matcher.capture_names {
                    if let Some(value) = caps.name(name) {
                        captures
                            .push((format!("Capture{}", captures.len()), value.as_str().into()));
                    }
                }
                let marker = match matcher.kind {
                    GuardKind::Begin => self.format.begin.canonical.as_str(),
                    GuardKind::End => self.format.end.canonical.as_str(),
                    GuardKind::Bare => "",
                };
                let replacement = format!(
                    "//{}{}{}{}",
                    self.format.prefix.canonical,
                    tag.as_str(),
                    self.format.suffix.canonical,
                    marker
                );
                let whole = caps.get(0).unwrap();
                return Some(format!(
                    "{}{}{}",
                    &line[..whole.start()],
                    replacement,
                    &line[whole.end()..]
                ));
            }
            None
        })
    }

    fn unpack_text(&self, text: &str, captures: &[(String, String)], cursor: &mut usize) -> String {
        self.rewrite_lines(text, |line| {
            for matcher in &self.canonical {
                let Some(caps) = matcher.regex.captures(line) else {
                    continue;
                };
                let Some(tag) = caps.name("Tag") else {
                    continue;
                };
                // The pack matcher of the same kind tells us how many
                // captured values this guard consumed; expose them both by
                // their Capture index and by their configured group name.
                let kind_index = match matcher.kind {
                    GuardKind::Begin => 0,
                    GuardKind::End => 1,
                    GuardKind::Bare => 2,
                };
                let names = &self.configured[kind_index].capture_names;
                let slot = *cursor;
                *cursor += names.len();
                let overlay = |name: &str| -> Option<String> {
                    if let Some((_, value)) = captures.iter().find(|(n, _)| n == name) {
                        return Some(value.clone());
                    }
                    names.iter().position(|n| n == name).and_then(|i| {
                        captures.get(slot + i).map(|(_, value)| value.clone())
                    })
                };
                let expand = |template: &str| -> String {
                    match self.vars.expand_with(template, &overlay) {
                        Ok(expanded) => expanded,
                        Err(e) => {
                            warn!("tag template expansion failed for {}: {e}", self.plugin);
                            template.to_string()
                        }
                    }
                };
                let prefix = expand(&self.format.prefix.template);
                let suffix = expand(&self.format.suffix.template);
                let marker = match matcher.kind {
                    GuardKind::Begin => expand(&self.format.begin.template),
                    GuardKind::End => expand(&self.format.end.template),
                    GuardKind::Bare => String::new(),
                };
                let replacement = if self.format.anastrophe && matcher.kind != GuardKind::Bare {
                    format!("//{}{}{}{}", prefix, marker, tag.as_str(), suffix)
                } else {
                    format!("//{}{}{}{}", prefix, tag.as_str(), suffix, marker)
                };
                let whole = caps.get(0).unwrap();
                return Some(format!(
                    "{}{}{}",
                    &line[..whole.start()],
                    replacement,
                    &line[whole.end()..]
                ));
            }
            None
        })
    }

    /// Applies `rewrite` to each line (sans terminator), keeping the
    /// original terminators.
    fn rewrite_lines(&self, text: &str, mut rewrite: impl FnMut(&str) -> Option<String>) -> String {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        loop {
            let (line, terminator, next) = match rest.find('\n') {
                Some(i) => {
                    let (line, tail) = rest.split_at(i);
                    match line.strip_suffix('\r') {
                        Some(line) => (line, "\r\n", &tail[1..]),
                        None => (line, "\n", &tail[1..]),
                    }
                }
                None => (rest, "", ""),
            };
            match rewrite(line) {
                Some(rewritten) => output.push_str(&rewritten),
                None => output.push_str(line),
            }
            output.push_str(terminator);
            if next.is_empty() {
                break;
            }
            rest = next;
        }
        output
    }
}
