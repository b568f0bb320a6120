//! HTML dumps for hunks that failed to apply.
//!
//! Each failed hunk is rendered as a standalone HTML file holding the
//! expected injected text and a unified diff of the hunk's source
//! expectation against the current engine content, for manual merging.

use std::fs;
use std::path::{Path, PathBuf};

use similar::udiff::unified_diff;
use similar::Algorithm;

use crate::dmp::{diff_text1, diff_text2, PatchHunk};
use crate::CrysknifeError;

/// Writes one failure report; returns the file path.
pub fn dump_failure(
    dump_root: &Path,
    target: &Path,
    hunk_index: usize,
    hunk: &PatchHunk,
    current: &str,
) -> Result<PathBuf, CrysknifeError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| CrysknifeError::Io { path, source }
    };
    fs::create_dir_all(dump_root).map_err(io_err(dump_root))?;

    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().replace('.', "_"))
        .unwrap_or_else(|| "patch".into());
    let path = dump_root.join(format!("{stem}.hunk{hunk_index}.html"));

    let expected_source = diff_text1(&hunk.diffs);
    let expected_result = diff_text2(&hunk.diffs);
    // Show the current content around where the hunk wanted to land; fall
    // back to the whole file for small targets.
    let chars: Vec<char> = current.chars().collect();
    let lo = hunk
        .start2
        .saturating_sub(expected_source.chars().count())
        .min(chars.len());
    let hi = (hunk.start2 + 2 * hunk.length2).clamp(lo, chars.len());
    let vicinity: String = chars[lo..hi].iter().collect();
    let diff = unified_diff(
        Algorithm::default(),
        &expected_source,
        &vicinity,
        3,
        Some(("expected", "engine")),
    );

    let html = format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <title>Failed hunk {index} for {target}</title></head><body>\n\
         <h2>Hunk {index} of {target} did not apply</h2>\n\
         <h3>Expected result</h3>\n<pre>{expected}</pre>\n\
         <h3>Expected source vs. current engine content</h3>\n<pre>{diff}</pre>\n\
         </body></html>\n",
        index = hunk_index,
        target = escape(&target.display().to_string()),
        expected = escape(&expected_result),
        diff = escape(&diff),
    );
    fs::write(&path, html).map_err(io_err(&path))?;
    Ok(path)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
