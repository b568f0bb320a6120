//! The INI dialect used by every Crysknife config file.
//!
//! Beyond `Key=Value` pairs the dialect supports `+Key=` (append),
//! `!Key` (clear), `-Key=` (remove one value), `;` and `//` line
//! comments, trailing `\` continuations, quoted values, and
//! `[Name|Name|…]` multi-prefix section headers.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::CrysknifeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOp {
    Set,
    Append,
    Clear,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniLine {
    pub op: LineOp,
    pub key: String,
    pub value: String,
}

impl IniLine {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: LineOp::Set,
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IniSection {
    pub names: Vec<String>,
    pub lines: Vec<IniLine>,
}

impl IniSection {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// A parsed config file; sections keep their declaration order.
#[derive(Debug, Clone, Default)]
pub struct IniFile {
    pub sections: Vec<IniSection>,
}

impl IniFile {
    pub fn parse(content: &str) -> Result<Self, CrysknifeError> {
        let mut file = Self::default();
        let mut pending = String::new();
        for raw in content.lines() {
            let trimmed = raw.trim();
            if pending.is_empty() && (is_comment(trimmed) || trimmed.is_empty()) {
                continue;
            }
            if let Some(continued) = trimmed.strip_suffix('\\') {
                pending.push_str(continued.trim_end());
                continue;
            }
            pending.push_str(trimmed);
            let line = std::mem::take(&mut pending);
            file.parse_line(&line)?;
        }
        if !pending.is_empty() {
            file.parse_line(&pending)?;
        }
        Ok(file)
    }

    pub fn from_file(path: &Path) -> Result<Self, CrysknifeError> {
        let content = fs::read_to_string(path).map_err(|source| CrysknifeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    fn parse_line(&mut self, line: &str) -> Result<(), CrysknifeError> {
        if let Some(inner) = line.strip_prefix('[') {
            let Some(inner) = inner.strip_suffix(']') else {
                return Err(CrysknifeError::InvalidConfig {
                    detail: format!("unterminated section header: {line}"),
                });
            };
            self.sections.push(IniSection {
                names: inner.split('|').map(|n| n.trim().to_string()).collect(),
                lines: Vec::new(),
            });
            return Ok(());
        }

        let (op, rest) = match line.chars().next() {
            Some('+') => (LineOp::Append, &line[1..]),
            Some('!') => (LineOp::Clear, &line[1..]),
            Some('-') => (LineOp::Remove, &line[1..]),
            _ => (LineOp::Set, line),
        };
        let (key, value) = match rest.split_once('=') {
            Some((key, value)) => (key.trim(), unquote(value.trim())),
            None if op == LineOp::Clear => (rest.trim(), ""),
            None => {
                return Err(CrysknifeError::InvalidConfig {
                    detail: format!("expected Key=Value: {line}"),
                })
            }
        };
        if key.is_empty() {
            return Err(CrysknifeError::InvalidConfig {
                detail: format!("empty key in: {line}"),
            });
        }

        if self.sections.is_empty() {
            // Lines before any header belong to the global scope.
            self.sections.push(IniSection {
                names: vec!["Global".to_string()],
                lines: Vec::new(),
            });
        }
        self.sections
            .last_mut()
            .expect("section pushed above")
            .lines
            .push(IniLine {
                op,
                key: key.to_string(),
                value: value.to_string(),
            });
        Ok(())
    }

    /// Overlays `other` on top of this file: same-name sections gain the
    /// overlay's lines after their own, new sections append.
    pub fn merge(&mut self, other: IniFile) {
        for section in other.sections {
            let existing = self
                .sections
                .iter_mut()
                .find(|s| s.names == section.names);
            match existing {
                Some(existing) => existing.lines.extend(section.lines),
                None => self.sections.push(section),
            }
        }
    }

    /// First section carrying the given name.
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.has_name(name))
    }
}

impl fmt::Display for IniFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.names.join("|"))?;
            for line in &section.lines {
                match line.op {
                    LineOp::Set => writeln!(f, "{}={}", line.key, line.value)?,
                    LineOp::Append => writeln!(f, "+{}={}", line.key, line.value)?,
                    LineOp::Remove => writeln!(f, "-{}={}", line.key, line.value)?,
                    LineOp::Clear => writeln!(f, "!{}", line.key)?,
                }
            }
        }
        Ok(())
    }
}

/// Folds a line list into the effective key → values view.
pub fn resolve_lines(lines: &[IniLine]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines {
        match line.op {
            LineOp::Set => {
                map.insert(line.key.clone(), vec![line.value.clone()]);
            }
            LineOp::Append => {
                let values = map.entry(line.key.clone()).or_default();
                if !values.contains(&line.value) {
                    values.push(line.value.clone());
                }
            }
            LineOp::Clear => {
                map.remove(&line.key);
            }
            LineOp::Remove => {
                if let Some(values) = map.get_mut(&line.key) {
                    values.retain(|v| v != &line.value);
                }
            }
        }
    }
    map
}

fn is_comment(line: &str) -> bool {
    line.starts_with(';') || line.starts_with("//")
}

fn unquote(value: &str) -> &str {
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    stripped.unwrap_or(value)
}
