use crysknife::config::VariableMap;
use crysknife::decorator::DecoratorParser;
use crysknife::dmp::{ContextDir, Diff, DiffMatchPatch, PatchHunk, SkipState};
use crysknife::injection::{InjectionKind, InjectionRegex, InjectionRegexGroup};
use crysknife::tag::{CommentTagFormat, TagComponent, TagPacker};
use crysknife::version::EngineVersion;
use indoc::indoc;

fn plug() -> InjectionRegex {
    InjectionRegex::new("Plug", &CommentTagFormat::default()).unwrap()
}

// --- Multiline form ---

#[test]
fn test_multiline_injection_stripped() {
    let content = indoc! {"
        int a;
        // Plug: Begin
        INJ
        // Plug: End
        int b;
    "};
    assert_eq!(plug().unpatch(content), "int a;\nint b;\n");
}

#[test]
fn test_multiline_match_metadata() {
    let content = "int a;\n// Plug: Begin\nINJ\n// Plug: End\nint b;\n";
    let matches = plug().matches(content);
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.kind, InjectionKind::Multiline);
    assert!(!m.is_restore);
    assert_eq!(&content[m.range.clone()], "// Plug: Begin\nINJ\n// Plug: End\n");
    assert!(m.replacement.is_empty());
}

#[test]
fn test_unpatch_is_idempotent() {
    let content = "x();\n// Plug: Begin\ny();\n// Plug: End\nz();\n";
    let once = plug().unpatch(content);
    assert_eq!(plug().unpatch(&once), once);
}

#[test]
fn test_unpatch_identity_without_tag() {
    let content = "// SomeOther: Begin\nuntouched();\n// SomeOther: End\nplain();\n";
    assert_eq!(plug().unpatch(content), content);
}

#[test]
fn test_nested_guard_blocks_attribute_to_outer() {
    let content = indoc! {"
        keep;
        // Plug: Begin
        outer1;
        // Plug: Begin
        inner;
        // Plug: End
        outer2;
        // Plug: End
        also keep;
    "};
    assert_eq!(plug().unpatch(content), "keep;\nalso keep;\n");
}

#[test]
fn test_tag_allows_inline_remarks() {
    let content = "a;\n// Plug reason for this edit: Begin\nb;\n// Plug: End\nc;\n";
    assert_eq!(plug().unpatch(content), "a;\nc;\n");
}

// --- Deletion restores ---

#[test]
fn test_deletion_restore_reactivates_stock_code() {
    let content = indoc! {"
        // Plug-: Begin
        // int x = 1;
        // Plug: End
        int x = 2; // Plug
    "};
    assert_eq!(plug().unpatch(content), "int x = 1;\n");
}

#[test]
fn test_deletion_restore_with_named_tag() {
    let content = "// Plug-was-x: Begin\n// old();\n// Plug: End\n";
    let matches = plug().matches(content);
    assert_eq!(matches.len(), 1);
    assert!(matches[0].is_restore);
    assert_eq!(plug().unpatch(content), "old();\n");
}

#[test]
fn test_restore_preserves_indentation() {
    let content = "// Plug-: Begin\n    // indented();\n// Plug: End\n";
    assert_eq!(plug().unpatch(content), "    indented();\n");
}

// --- Single/next line forms ---

#[test]
fn test_singleline_injection_removed() {
    let content = "a();\nnew_call(); // Plug\nb();\n";
    let matches = plug().matches(content);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].kind, InjectionKind::Singleline);
    assert_eq!(plug().unpatch(content), "a();\nb();\n");
}

#[test]
fn test_singleline_restore() {
    let content = "// int y = 0; // Plug-\n";
    assert_eq!(plug().unpatch(content), "int y = 0;\n");
}

#[test]
fn test_nextline_injection_removes_guard_and_payload() {
    let content = "before();\n// Plug\ninjected();\nafter();\n";
    let matches = plug().matches(content);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].kind, InjectionKind::Nextline);
    assert_eq!(plug().unpatch(content), "before();\nafter();\n");
}

#[test]
fn test_nextline_restore() {
    let content = "// Plug-\n// stock();\nrest();\n";
    assert_eq!(plug().unpatch(content), "stock();\nrest();\n");
}

// --- Sibling composition ---

#[test]
fn test_sibling_residuals_cleared_separately() {
    let format = CommentTagFormat::default();
    let group = InjectionRegexGroup::new(
        InjectionRegex::new("Plug", &format).unwrap(),
        vec![InjectionRegex::new("Other", &format).unwrap()],
    );
    let content = indoc! {"
        stock1;
        // Other: Begin
        other_inj;
        // Other: End
        stock2;
        // Plug: Begin
        plug_inj;
        // Plug: End
        stock3;
    "};
    let resident = group.clear_residuals(content);
    assert_eq!(
        resident,
        "stock1;\nstock2;\n// Plug: Begin\nplug_inj;\n// Plug: End\nstock3;\n"
    );
    assert_eq!(group.unpatch(content), "stock1;\nstock2;\nstock3;\n");
}

// --- Comment tag packing ---

fn hunk_with_insert(text: &str) -> PatchHunk {
    let mut hunk = PatchHunk::new();
    hunk.diffs.push(Diff::equal("ctx1"));
    hunk.diffs.push(Diff::insert(text));
    hunk.diffs.push(Diff::equal("ctx2"));
    hunk.length1 = 8;
    hunk.length2 = 8 + text.chars().count();
    hunk
}

fn bracket_format() -> CommentTagFormat {
    let mut format = CommentTagFormat::default();
    format.prefix = TagComponent {
        canonical: " ".to_string(),
        pattern: r" \[(?P<Ticket>\w+)\] ".to_string(),
        template: " [${Ticket|NONE}] ".to_string(),
    };
    format
}

#[test]
fn test_pack_rewrites_to_canonical_and_collects_captures() {
    let format = bracket_format();
    let vars = VariableMap::new();
    let packer = TagPacker::new("Plug", &format, &vars).unwrap();
    let mut hunks = vec![hunk_with_insert(
        "// [JIRA123] Plug: Begin\nnew();\n// [JIRA123] Plug: End\n",
    )];
    packer.pack(&mut hunks, false);
    let packed = &hunks[0].diffs[1].text;
    assert_eq!(packed, "// Plug: Begin\nnew();\n// Plug: End\n");
    assert_eq!(
        hunks[0].captures,
        vec![
            ("Capture0".to_string(), "JIRA123".to_string()),
            ("Capture1".to_string(), "JIRA123".to_string()),
        ]
    );
}

#[test]
fn test_pack_unpack_inverse_with_captures() {
    let format = bracket_format();
    let vars = VariableMap::new();
    let packer = TagPacker::new("Plug", &format, &vars).unwrap();
    let original = "// [UE5123] Plug: Begin\nnew();\n// [UE5124] Plug: End\n";
    let mut hunks = vec![hunk_with_insert(original)];
    let reference = hunks.clone();
    packer.pack(&mut hunks, false);
    assert_ne!(hunks[0].diffs[1].text, original);
    packer.unpack(&mut hunks);
    assert_eq!(hunks[0].diffs[1].text, reference[0].diffs[1].text);
    assert_eq!(hunks[0].length2, reference[0].length2);
}

#[test]
fn test_unpack_without_captures_uses_fallback() {
    let format = bracket_format();
    let vars = VariableMap::new();
    let packer = TagPacker::new("Plug", &format, &vars).unwrap();
    let mut hunks = vec![hunk_with_insert(
        "// [JIRA123] Plug: Begin\nnew();\n// [JIRA123] Plug: End\n",
    )];
    // Main patches drop captures on serialization.
    packer.pack(&mut hunks, true);
    assert!(hunks[0].captures.is_empty());
    packer.unpack(&mut hunks);
    assert_eq!(
        hunks[0].diffs[1].text,
        "// [NONE] Plug: Begin\nnew();\n// [NONE] Plug: End\n"
    );
}

#[test]
fn test_unpack_resolves_variables() {
    let mut format = CommentTagFormat::default();
    format.suffix = TagComponent {
        canonical: String::new(),
        pattern: r" \(team\)".to_string(),
        template: " (${TEAM_NAME})".to_string(),
    };
    let mut vars = VariableMap::new();
    vars.set("TEAM_NAME", "render");
    let packer = TagPacker::new("Plug", &format, &vars).unwrap();
    let mut hunks = vec![hunk_with_insert("// Plug: Begin\nx();\n// Plug: End\n")];
    packer.unpack(&mut hunks);
    assert_eq!(
        hunks[0].diffs[1].text,
        "// Plug (render): Begin\nx();\n// Plug (render): End\n"
    );
}

#[test]
fn test_default_format_pack_is_identity() {
    let format = CommentTagFormat::default();
    let vars = VariableMap::new();
    let packer = TagPacker::new("Plug", &format, &vars).unwrap();
    let text = "// Plug: Begin\nbody();\n// Plug: End\n";
    let mut hunks = vec![hunk_with_insert(text)];
    let reference = hunks.clone();
    packer.pack(&mut hunks, false);
    packer.unpack(&mut hunks);
    assert_eq!(hunks[0].diffs, reference[0].diffs);
}

// --- Decorators ---

fn decorated_hunk(directive: &str) -> PatchHunk {
    hunk_with_insert(&format!(
        "// Plug {directive}: Begin\nnew();\n// Plug: End\n"
    ))
}

#[test]
fn test_decorator_version_gate_skips_older_engine() {
    let mut hunks = vec![decorated_hunk("@Crysknife(EngineNewerThan=5.2)")];
    DecoratorParser::new("Plug", EngineVersion::new(5, 1, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].skip, SkipState::True);

    let mut hunks = vec![decorated_hunk("@Crysknife(EngineNewerThan=5.2)")];
    DecoratorParser::new("Plug", EngineVersion::new(5, 3, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].skip, SkipState::False);
}

#[test]
fn test_decorator_older_than_gate() {
    let mut hunks = vec![decorated_hunk("@Crysknife(EngineOlderThan=5.2)")];
    DecoratorParser::new("Plug", EngineVersion::new(5, 1, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].skip, SkipState::False);
}

#[test]
fn test_decorator_match_context_and_length() {
    let mut hunks = vec![decorated_hunk("@Crysknife(MatchContext=Upper, MatchLength=120)")];
    DecoratorParser::new("Plug", EngineVersion::new(5, 0, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].context_dir, ContextDir::UPPER);
    assert_eq!(hunks[0].context_length, 120);
}

#[test]
fn test_decorator_conflicts_are_fatal() {
    let mut hunks = vec![decorated_hunk(
        "@Crysknife(MatchContext=Upper, MatchContext=Lower)",
    )];
    let result = DecoratorParser::new("Plug", EngineVersion::new(5, 0, 0)).decorate(&mut hunks);
    assert!(result.is_err());
}

#[test]
fn test_decorator_idempotent_reassignment_is_fine() {
    let mut hunks = vec![decorated_hunk(
        "@Crysknife(MatchLength=64, MatchLength=64)",
    )];
    DecoratorParser::new("Plug", EngineVersion::new(5, 0, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].context_length, 64);
}

#[test]
fn test_decorator_unknown_directive_warns_only() {
    let mut hunks = vec![decorated_hunk("@Crysknife(FutureKnob=whatever)")];
    DecoratorParser::new("Plug", EngineVersion::new(5, 0, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].skip, SkipState::Unspecified);
}

#[test]
fn test_decorator_ignores_comments_without_tag() {
    // The directive-looking text is not in a comment carrying the tag.
    let mut hunks = vec![hunk_with_insert(
        "// unrelated @Crysknife(MatchLength=7)\ncode();\n",
    )];
    DecoratorParser::new("Plug", EngineVersion::new(5, 0, 0))
        .decorate(&mut hunks)
        .unwrap();
    assert_eq!(hunks[0].context_length, -1);
}

// --- Round trip through the engine ---

#[test]
fn test_generate_style_round_trip_via_dmp() {
    // Injection seams produce hunks that reapply cleanly.
    let engine = DiffMatchPatch {
        split_on_insertion: true,
        ..DiffMatchPatch::default()
    };
    let before = "int a;\nint b;\nint c;\n";
    let after = "int a;\n// Plug: Begin\nINJ\n// Plug: End\nint b;\nint c;\n";
    let diffs = engine.diff_main(before, after);
    let patches = engine.patch_make(before, &diffs);
    let outcome = engine.patch_apply(&patches, before);
    assert_eq!(outcome.text, after);
    assert_eq!(plug().unpatch(&outcome.text), before);
}
