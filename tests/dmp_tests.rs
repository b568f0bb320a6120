use crysknife::dmp::{
    diff_text1, diff_text2, levenshtein_distance, ContextDir, Diff, DiffMatchPatch, Op, SkipState,
};

fn dmp() -> DiffMatchPatch {
    DiffMatchPatch::default()
}

// --- Diff invariants ---

#[test]
fn test_diff_reconstructs_both_sides() {
    let cases = [
        ("", ""),
        ("abc", "abc"),
        ("abc", "xyz"),
        ("The quick brown fox.", "The quick red fox."),
        ("mouse", "sofas"),
        ("", "everything was inserted"),
        ("everything was deleted", ""),
        ("line one\nline two\nline three\n", "line one\nline 2\nline three\nline four\n"),
        ("unicode: \u{00e9}\u{4e16}\u{754c}", "unicode: \u{00e9}\u{4e16}!"),
    ];
    let engine = dmp();
    for (a, b) in cases {
        let diffs = engine.diff_main(a, b);
        assert_eq!(diff_text1(&diffs), a, "text1 mismatch for {a:?} -> {b:?}");
        assert_eq!(diff_text2(&diffs), b, "text2 mismatch for {a:?} -> {b:?}");
    }
}

#[test]
fn test_diff_equal_inputs_yield_single_equality() {
    let diffs = dmp().diff_main("same text", "same text");
    assert_eq!(diffs, vec![Diff::equal("same text")]);
    assert!(dmp().diff_main("", "").is_empty());
}

#[test]
fn test_diff_common_affixes_stay_equal() {
    let diffs = dmp().diff_main("prefix-OLD-suffix", "prefix-NEW-suffix");
    assert_eq!(diffs.first().map(|d| d.op), Some(Op::Equal));
    assert_eq!(diffs.last().map(|d| d.op), Some(Op::Equal));
    assert!(diffs.first().unwrap().text.starts_with("prefix-"));
    assert!(diffs.last().unwrap().text.ends_with("-suffix"));
}

#[test]
fn test_diff_large_inputs_line_mode() {
    // Both sides exceed the 100-char line-mode threshold.
    let a: String = (0..60).map(|i| format!("line number {i}\n")).collect();
    let mut b = a.clone();
    b = b.replace("line number 30", "line number thirty");
    b.push_str("line number 60\n");
    let diffs = dmp().diff_main(&a, &b);
    assert_eq!(diff_text1(&diffs), a);
    assert_eq!(diff_text2(&diffs), b);
}

#[test]
fn test_levenshtein_distance() {
    assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    assert_eq!(levenshtein_distance("", "abc"), 3);
    assert_eq!(levenshtein_distance("abc", "abc"), 0);
    assert_eq!(levenshtein_distance("flaw", "lawn"), 2);
}

// --- Match ---

#[test]
fn test_match_exact_hit_wins() {
    let engine = dmp();
    let text: Vec<char> = "abcdefghijk".chars().collect();
    let pattern: Vec<char> = "def".chars().collect();
    assert_eq!(engine.match_main(&text, &pattern, 3), Some(3));
    assert_eq!(engine.match_main(&text, &pattern, 0), Some(3));
}

#[test]
fn test_match_fuzzy_within_threshold() {
    let engine = dmp();
    let text: Vec<char> = "I am the very model of a modern major general.".chars().collect();
    let pattern: Vec<char> = " that berry ".chars().collect();
    // No exact hit; bitap lands on the " the very " neighborhood.
    assert_eq!(engine.match_main(&text, &pattern, 5), Some(4));
}

#[test]
fn test_match_oversized_pattern_is_rejected() {
    let engine = dmp();
    let text: Vec<char> = "x".repeat(200).chars().collect();
    let pattern: Vec<char> = "y".repeat(65).chars().collect();
    assert_eq!(engine.match_main(&text, &pattern, 0), None);
}

// --- Patch construction ---

#[test]
fn test_patch_hunk_length_invariants() {
    let engine = dmp();
    let a = "The quick brown fox jumps over the lazy dog.\nPack my box with five dozen liquor jugs.\n";
    let b = "The quick red fox jumps over the lazy dog.\nPack my box with six dozen liquor jugs.\nExtra trailing line.\n";
    let diffs = engine.diff_main(a, b);
    let patches = engine.patch_make(a, &diffs);
    assert!(!patches.is_empty());
    for hunk in &patches {
        assert_eq!(
            diff_text1(&hunk.diffs).chars().count(),
            hunk.length1,
            "length1 must count the non-insert text"
        );
        assert_eq!(
            diff_text2(&hunk.diffs).chars().count(),
            hunk.length2,
            "length2 must count the non-delete text"
        );
    }
}

#[test]
fn test_patch_apply_round_trip() {
    let engine = dmp();
    let a = "fn main() {\n    println!(\"hello\");\n}\n";
    let b = "fn main() {\n    println!(\"patched\");\n    cleanup();\n}\n";
    let patches = engine.patch_make(a, &engine.diff_main(a, b));
    let outcome = engine.patch_apply(&patches, a);
    assert_eq!(outcome.text, b);
    assert!(outcome.locations.iter().all(|&l| l >= 0));
    assert_eq!(outcome.locations.len(), outcome.origins.len());
}

#[test]
fn test_patch_apply_with_drift() {
    let engine = dmp();
    let a: String = (0..50).map(|i| format!("stable line {i}\n")).collect();
    let b = a.replace("stable line 25", "stable line 25 EDITED");
    let patches = engine.patch_make(&a, &engine.diff_main(&a, &b));

    // Shift the whole target by prepending new content.
    let drifted = format!("{}{}", "// new header\n".repeat(10), a);
    let outcome = engine.patch_apply(&patches, &drifted);
    assert!(outcome.any_applied());
    assert_eq!(outcome.text, drifted.replace("stable line 25", "stable line 25 EDITED"));
}

#[test]
fn test_patch_apply_oversized_hunk_splits() {
    let engine = dmp();
    // A contiguous replaced region far larger than the 64-bit match width.
    let a = format!("HEADER\n{}\nFOOTER\n", "abcdefghij".repeat(10));
    let b = format!("HEADER\n{}\nFOOTER\n", "0123456789".repeat(10));
    let patches = engine.patch_make(&a, &engine.diff_main(&a, &b));
    assert!(patches.iter().any(|p| p.length1 > 64));
    let outcome = engine.patch_apply(&patches, &a);
    assert_eq!(outcome.text, b);
    // Fragments must map back to original hunk indices.
    assert!(outcome.hunks.len() > patches.len());
    for &origin in &outcome.origins {
        assert!(origin < patches.len());
    }
}

#[test]
fn test_patch_apply_failed_hunk_reports_minus_one() {
    let engine = dmp();
    let a = "context before\nTARGET LINE\ncontext after\n";
    let b = "context before\nREPLACED LINE\ncontext after\n";
    let patches = engine.patch_make(a, &engine.diff_main(a, b));
    let outcome = engine.patch_apply(&patches, &"z".repeat(60));
    assert!(!outcome.any_applied());
    assert!(outcome.locations.iter().all(|&l| l == -1));
    assert_eq!(outcome.failed_origins(), vec![0]);
}

#[test]
fn test_patch_apply_skip_true_hunks_removed() {
    let engine = dmp();
    let a = "one\ntwo\nthree\n";
    let b = "one\ntwo changed\nthree\n";
    let mut patches = engine.patch_make(a, &engine.diff_main(a, b));
    for hunk in &mut patches {
        hunk.skip = SkipState::True;
    }
    let outcome = engine.patch_apply(&patches, a);
    assert_eq!(outcome.text, a, "skipped hunks must not modify the text");
    assert!(outcome.locations.is_empty());
}

// --- Context constraint ---

#[test]
fn test_patch_constrain_trims_context() {
    let engine = dmp();
    let a = "aaaaaaaaaa[OLD]bbbbbbbbbb";
    let b = "aaaaaaaaaa[NEW]bbbbbbbbbb";
    let mut patches = engine.patch_make(a, &engine.diff_main(a, b));
    assert_eq!(patches.len(), 1);
    let hunk = &mut patches[0];
    let full1 = hunk.length1;
    hunk.context_dir = ContextDir::UPPER;
    hunk.context_length = 2;
    engine.patch_constrain(hunk);
    assert!(hunk.length1 < full1);
    // Leading equality trimmed to two chars, trailing dropped entirely.
    let first = hunk.diffs.first().unwrap();
    assert_eq!(first.op, Op::Equal);
    assert_eq!(first.text.chars().count(), 2);
    assert_ne!(hunk.diffs.last().unwrap().op, Op::Equal);
    assert_eq!(diff_text1(&hunk.diffs).chars().count(), hunk.length1);
    assert_eq!(diff_text2(&hunk.diffs).chars().count(), hunk.length2);
}

#[test]
fn test_patch_constrain_unbounded_is_identity() {
    let engine = dmp();
    let a = "context [OLD] context";
    let b = "context [NEW] context";
    let mut patches = engine.patch_make(a, &engine.diff_main(a, b));
    let reference = patches.clone();
    for hunk in &mut patches {
        engine.patch_constrain(hunk); // default: all directions, unbounded
    }
    assert_eq!(patches, reference);
}

// --- Serialization ---

#[test]
fn test_patch_text_round_trip() {
    let engine = dmp();
    let a = "escape me: %+&=\nsecond line\nunicode \u{2603}\n";
    let b = "escape me: %+&=!\nsecond line changed\nunicode \u{2603}\n";
    let patches = engine.patch_make(a, &engine.diff_main(a, b));
    let text = engine.patch_to_text(&patches);
    let parsed = engine.patch_from_text(&text).unwrap();
    assert_eq!(engine.patch_to_text(&parsed), text, "round trip must be lossless");

    // The parsed bundle must still apply.
    let outcome = engine.patch_apply(&parsed, a);
    assert_eq!(outcome.text, b);
}

#[test]
fn test_patch_text_deterministic() {
    let engine = dmp();
    let a = "some stable content\nwith two lines\n";
    let b = "some stable content\nwith 2 lines\n";
    let patches = engine.patch_make(a, &engine.diff_main(a, b));
    assert_eq!(engine.patch_to_text(&patches), engine.patch_to_text(&patches));
}

#[test]
fn test_patch_from_text_rejects_garbage() {
    let engine = dmp();
    assert!(engine.patch_from_text("not a patch at all").is_err());
    assert!(engine.patch_from_text("@@ -x,y +1,1 @@\n").is_err());
    // Bad body sign.
    assert!(engine
        .patch_from_text("@@ -1,3 +1,3 @@\n*bogus\n")
        .is_err());
    // Empty input is an empty bundle, not an error.
    assert!(engine.patch_from_text("").unwrap().is_empty());
}

#[test]
fn test_patch_header_single_char_coords() {
    let engine = dmp();
    let a = "x";
    let b = "y";
    let patches = engine.patch_make(a, &engine.diff_main(a, b));
    let text = engine.patch_to_text(&patches);
    let parsed = engine.patch_from_text(&text).unwrap();
    assert_eq!(engine.patch_to_text(&parsed), text);
    assert_eq!(engine.patch_apply(&parsed, a).text, b);
}

#[test]
fn test_capture_side_channel_round_trips() {
    let engine = dmp();
    let a = "before\nOLD\nafter\n";
    let b = "before\nNEW\nafter\n";
    let mut patches = engine.patch_make(a, &engine.diff_main(a, b));
    patches[0]
        .captures
        .push(("Capture0".to_string(), "value with spaces & %".to_string()));
    let text = engine.patch_to_text(&patches);
    let parsed = engine.patch_from_text(&text).unwrap();
    assert_eq!(parsed[0].captures, patches[0].captures);
    assert_eq!(engine.patch_to_text(&parsed), text);
}
