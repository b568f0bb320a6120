//! Variable storage and `${Name}` / `${Name|Fallback}` substitution.
//!
//! Values may reference other variables recursively; a reference cycle is
//! a hard error. Names prefixed with `#` are local to the process and are
//! skipped when a config is persisted back to disk.

use std::collections::BTreeMap;

use log::warn;

use crate::CrysknifeError;

/// Case-sensitive name → value map.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    map: BTreeMap<String, String>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.map.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.map.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// All entries except `#`-prefixed locals, in name order.
    pub fn iter_persistent(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .iter()
            .filter(|(name, _)| !name.starts_with('#'))
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Substitutes every `${Name}` / `${Name|Fallback}` in `input`.
    /// Unknown names without a fallback warn and pass through literally.
    pub fn expand(&self, input: &str) -> Result<String, CrysknifeError> {
        self.expand_with(input, &|_| None)
    }

    /// As [`expand`](Self::expand), consulting `overlay` before the map.
    /// The packer feeds hunk captures through here.
    pub fn expand_with(
        &self,
        input: &str,
        overlay: &dyn Fn(&str) -> Option<String>,
    ) -> Result<String, CrysknifeError> {
        let mut stack = Vec::new();
        self.expand_inner(input, overlay, &mut stack)
    }

    fn expand_inner(
        &self,
        input: &str,
        overlay: &dyn Fn(&str) -> Option<String>,
        stack: &mut Vec<String>,
    ) -> Result<String, CrysknifeError> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(open) = rest.find("${") {
            output.push_str(&rest[..open]);
            let body_start = open + 2;
            let Some(close) = matching_brace(&rest[body_start..]) else {
                // Unterminated reference; emit as-is.
                output.push_str(&rest[open..]);
                return Ok(output);
            };
            let body = &rest[body_start..body_start + close];
            let (name, fallback) = match split_fallback(body) {
                Some((name, fallback)) => (name, Some(fallback)),
                None => (body, None),
            };
            let resolved = overlay(name).or_else(|| self.get(name).map(String::from));
            match resolved {
                Some(value) => {
                    if stack.iter().any(|n| n == name) {
                        return Err(CrysknifeError::VariableCycle { name: name.into() });
                    }
                    stack.push(name.to_string());
                    let expanded = self.expand_inner(&value, overlay, stack)?;
                    stack.pop();
                    output.push_str(&expanded);
                }
                None => match fallback {
                    Some(fallback) => {
                        let expanded = self.expand_inner(fallback, overlay, stack)?;
                        output.push_str(&expanded);
                    }
                    None => {
                        warn!("undefined variable '{name}', leaving reference in place");
                        output.push_str(&rest[open..body_start + close + 1]);
                    }
                },
            }
            rest = &rest[body_start + close + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }
}

/// Offset of the `}` closing the reference that starts right at the slice
/// head, accounting for nested `${…}`.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Splits `Name|Fallback` at the first top-level pipe.
fn split_fallback(body: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let bytes = body.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b'|' if depth == 0 => return Some((&body[..i], &body[i + 1..])),
            _ => {}
        }
    }
    None
}
