use std::fs;
use std::path::Path;

use crysknife::config::{
    resolve_lines, select_local_config, ConfigSystem, IniFile, LineOp, RemapResult, VariableMap,
};
use crysknife::context::EngineContext;
use crysknife::predicate::PredicateEvaluator;
use crysknife::version::EngineVersion;
use crysknife::CrysknifeError;
use indoc::indoc;
use tempfile::tempdir;

fn ctx() -> EngineContext {
    EngineContext::with_version("/nonexistent-engine", EngineVersion::new(5, 1, 0))
}

fn system(ini: &str) -> ConfigSystem {
    let ini = IniFile::parse(ini).unwrap();
    ConfigSystem::from_ini(&ctx(), "Plug", &ini, "").unwrap().0
}

// --- INI dialect ---

#[test]
fn test_ini_sections_and_ops() {
    let file = IniFile::parse(indoc! {r#"
        ; a comment
        // another comment
        [Runtime/Engine|Runtime/Launch]
        SkipIf=Always
        +SkipIf=Never
        -SkipIf=Never
        !FlattenIf
        Quoted="some value"
    "#})
    .unwrap();
    assert_eq!(file.sections.len(), 1);
    let section = &file.sections[0];
    assert_eq!(section.names, vec!["Runtime/Engine", "Runtime/Launch"]);
    let resolved = resolve_lines(&section.lines);
    assert_eq!(resolved.get("SkipIf"), Some(&vec!["Always".to_string()]));
    assert_eq!(resolved.get("Quoted"), Some(&vec!["some value".to_string()]));
    assert!(!resolved.contains_key("FlattenIf"));
}

#[test]
fn test_ini_line_continuation() {
    let file = IniFile::parse("[Global]\nSkipIf=NameMatches:\\\n  Foo|Bar\n").unwrap();
    let resolved = resolve_lines(&file.sections[0].lines);
    assert_eq!(
        resolved.get("SkipIf"),
        Some(&vec!["NameMatches:Foo|Bar".to_string()])
    );
}

#[test]
fn test_ini_append_and_clear_ordering() {
    let file = IniFile::parse(indoc! {"
        [Global]
        Key=first
        +Key=second
        !Key
        Key=third
    "})
    .unwrap();
    let resolved = resolve_lines(&file.sections[0].lines);
    assert_eq!(resolved.get("Key"), Some(&vec!["third".to_string()]));
}

#[test]
fn test_ini_parse_errors() {
    assert!(IniFile::parse("[Unterminated\n").is_err());
    assert!(IniFile::parse("[S]\njust a bare line\n").is_err());
}

#[test]
fn test_ini_writer_round_trip() {
    let text = "[Variables]\nA=1\nB=two\n\n[Children]\nOther=1\n";
    let file = IniFile::parse(text).unwrap();
    assert_eq!(file.to_string(), text);
    assert_eq!(file.sections[1].lines[0].op, LineOp::Set);
}

// --- Variables ---

#[test]
fn test_variable_expansion_with_fallback() {
    let mut vars = VariableMap::new();
    vars.set("NAME", "world");
    assert_eq!(vars.expand("hello ${NAME}").unwrap(), "hello world");
    assert_eq!(vars.expand("${MISSING|default}").unwrap(), "default");
    // Unknown without fallback passes through literally.
    assert_eq!(vars.expand("${MISSING}").unwrap(), "${MISSING}");
}

#[test]
fn test_variable_recursive_expansion() {
    let mut vars = VariableMap::new();
    vars.set("A", "a-${B}");
    vars.set("B", "b-${C|end}");
    assert_eq!(vars.expand("${A}").unwrap(), "a-b-end");
}

#[test]
fn test_variable_cycle_is_an_error() {
    let mut vars = VariableMap::new();
    vars.set("A", "${B}");
    vars.set("B", "${A}");
    assert!(matches!(
        vars.expand("${A}"),
        Err(CrysknifeError::VariableCycle { .. })
    ));
}

#[test]
fn test_local_variables_not_persisted() {
    let mut vars = VariableMap::new();
    vars.set("#LOCAL", "x");
    vars.set("KEEP", "y");
    let persistent: Vec<_> = vars.iter_persistent().map(|(n, _)| n.to_string()).collect();
    assert_eq!(persistent, vec!["KEEP"]);
}

#[test]
fn test_predicate_valued_variable_resolved_at_build() {
    let system = system(indoc! {"
        [Variables]
        YES=@Predicate(Always)
        NO=@Predicate(Never)
        VER=@Predicate(NewerThan:5.0)
    "});
    assert_eq!(system.variables.get("YES"), Some("1"));
    assert_eq!(system.variables.get("NO"), Some("0"));
    assert_eq!(system.variables.get("VER"), Some("1"));
}

// --- Predicates ---

#[test]
fn test_predicate_keywords() {
    let ctx = ctx();
    let eval = PredicateEvaluator::new(&ctx);
    let target = Path::new("Runtime/Engine/Private/RenderCore.cpp");
    assert!(eval.eval("Always", target));
    assert!(!eval.eval("Never", target));
    assert!(eval.eval("NameMatches:rendercore", target));
    assert!(!eval.eval("NameMatches:Audio", target));
    assert!(eval.eval("NameMatches:Audio|Render", target));
    assert!(eval.eval("NewerThan:5.0.99", target));
    assert!(!eval.eval("NewerThan:5.2", target));
    assert!(eval.eval("IsTruthy:1", target));
    assert!(eval.eval("IsTruthy:True", target));
    assert!(eval.eval("IsTruthy:On", target));
    assert!(!eval.eval("IsTruthy:0", target));
    assert!(eval.eval("IsTruthy:3>=2", target));
    assert!(eval.eval("IsTruthy:abc==ABC", target));
    assert!(!eval.eval("IsTruthy:abc!=ABC", target));
    // Unknown keywords warn and evaluate false.
    assert!(!eval.eval("FutureKeyword:x", target));
}

#[test]
fn test_predicate_negation_flips_result() {
    let ctx = ctx();
    let eval = PredicateEvaluator::new(&ctx);
    let target = Path::new("File.cpp");
    for expr in ["NameMatches:File", "IsTruthy:1", "NewerThan:5.0"] {
        let (keyword, value) = expr.split_once(':').unwrap();
        let negated = format!("{keyword}:!{value}");
        assert_eq!(
            eval.eval(expr, target),
            !eval.eval(&negated, target),
            "negation must flip {expr}"
        );
    }
}

#[test]
fn test_predicate_conjunction_scopes() {
    let ctx = ctx();
    let eval = PredicateEvaluator::new(&ctx);
    let target = Path::new("Foo.cpp");
    // Default OR across terms.
    assert!(eval.eval("Never, Always", target));
    // Root conjunction: AND across terms.
    assert!(!eval.eval("Conjunction, Never, Always", target));
    assert!(eval.eval("Conjunction, Always, NameMatches:Foo", target));
    // Value conjunction for one keyword: AND within its value list.
    assert!(eval.eval("NameMatches:Foo|Missing", target));
    assert!(!eval.eval("Conjunction:NameMatches, NameMatches:Foo|Missing", target));
    assert!(eval.eval("Conjunction:NameMatches, NameMatches:Foo|cpp", target));
}

#[test]
fn test_engine_version_ordering() {
    let v510: EngineVersion = "5.1.0".parse().unwrap();
    let v5099: EngineVersion = "5.0.99".parse().unwrap();
    let v50: EngineVersion = "5.0".parse().unwrap();
    let v500: EngineVersion = "5.0.0".parse().unwrap();
    assert!(v510.newer_than(v510));
    assert!(v510.newer_than(v5099));
    assert!(v500.newer_than(v50));
    assert!(!v50.newer_than(v5099));
    assert!("5.x".parse::<EngineVersion>().is_err());
    assert!("".parse::<EngineVersion>().is_err());
}

#[test]
fn test_engine_version_from_header() {
    let header = indoc! {"
        #define ENGINE_MAJOR_VERSION 5
        #define ENGINE_MINOR_VERSION 3
        #define ENGINE_PATCH_VERSION 2
    "};
    let version = EngineVersion::from_version_header(header).unwrap();
    assert_eq!(version, EngineVersion::new(5, 3, 2));
    assert!(EngineVersion::from_version_header("nothing here").is_err());
}

// --- Hierarchy, rules, remap ---

#[test]
fn test_remap_skip_rule_short_circuits() {
    let system = system(indoc! {"
        [Runtime/Engine]
        SkipIf=NameMatches:Secret
    "});
    let ctx = ctx();
    assert_eq!(
        system.remap(&ctx, Path::new("Runtime/Engine/SecretSauce.cpp")),
        RemapResult::Skipped
    );
    assert_eq!(
        system.remap(&ctx, Path::new("Runtime/Engine/Public.cpp")),
        RemapResult::Unchanged("Runtime/Engine/Public.cpp".into())
    );
}

#[test]
fn test_remap_flatten_uses_section_prefix() {
    let system = system(indoc! {"
        [Runtime/Engine/Private]
        FlattenIf=Always
    "});
    let ctx = ctx();
    assert_eq!(
        system.remap(&ctx, Path::new("Runtime/Engine/Private/Sub/Deep/File.cpp")),
        RemapResult::Remapped("Runtime/Engine/Private/File.cpp".into())
    );
}

#[test]
fn test_remap_target_with_and_without_flatten() {
    let sys = system(indoc! {"
        [Shaders]
        RemapIf=Always
        RemapTarget=Engine/Shaders
    "});
    let ctx = ctx();
    assert_eq!(
        sys.remap(&ctx, Path::new("Shaders/Private/Fog.usf")),
        RemapResult::Remapped("Engine/Shaders/Shaders/Private/Fog.usf".into())
    );

    let flattened = system(indoc! {"
        [Shaders]
        RemapIf=Always
        FlattenIf=Always
        RemapTarget=Engine/Shaders
    "});
    assert_eq!(
        flattened.remap(&ctx, Path::new("Shaders/Private/Fog.usf")),
        RemapResult::Remapped("Engine/Shaders/Fog.usf".into())
    );
}

#[test]
fn test_remap_is_deterministic() {
    let system = system(indoc! {"
        [Runtime]
        FlattenIf=NameMatches:cpp
    "});
    let ctx = ctx();
    let target = Path::new("Runtime/Sub/Thing.cpp");
    assert_eq!(system.remap(&ctx, target), system.remap(&ctx, target));
}

#[test]
fn test_section_inheritance_prepends_ancestor_rules() {
    let system = system(indoc! {"
        [Runtime/Engine]
        SkipIf=NameMatches:Secret
        [Runtime/Engine/Private]
        FlattenIf=Always
    "});
    let ctx = ctx();
    // The child section inherits the parent's skip rule.
    assert_eq!(
        system.remap(&ctx, Path::new("Runtime/Engine/Private/Sub/SecretImpl.cpp")),
        RemapResult::Skipped
    );
    // And still applies its own flatten for non-skipped files.
    assert_eq!(
        system.remap(&ctx, Path::new("Runtime/Engine/Private/Sub/Normal.cpp")),
        RemapResult::Remapped("Runtime/Engine/Private/Normal.cpp".into())
    );
}

#[test]
fn test_base_domain_resists_user_override() {
    let system = system(indoc! {"
        [Global]
        ^BaseSkipIf=NameMatches:Blocked
        !SkipIf
        SkipIf=Never
    "});
    let ctx = ctx();
    // User-domain clears and sets cannot weaken the base rule.
    assert_eq!(
        system.remap(&ctx, Path::new("Any/Dir/BlockedFile.h")),
        RemapResult::Skipped
    );
    assert_eq!(
        system.remap(&ctx, Path::new("Any/Dir/Open.h")),
        RemapResult::Unchanged("Any/Dir/Open.h".into())
    );
}

#[test]
fn test_global_section_matches_everything() {
    let system = system(indoc! {"
        [Global]
        SkipIf=NameMatches:generated
    "});
    let ctx = ctx();
    assert_eq!(
        system.remap(&ctx, Path::new("Deep/Tree/Of/Dirs/generated_file.h")),
        RemapResult::Skipped
    );
}

// --- Dependencies and children ---

#[test]
fn test_dependency_specs_reported() {
    let ini = IniFile::parse(indoc! {"
        [Dependencies]
        OtherPlugin=CRYSKNIFE_X=1
        [Children]
        Historical=1
    "})
    .unwrap();
    let (system, deps) = ConfigSystem::from_ini(&ctx(), "Plug", &ini, "").unwrap();
    assert_eq!(deps, vec![("OtherPlugin".to_string(), "CRYSKNIFE_X=1".to_string())]);
    assert_eq!(system.children_tags, vec!["Historical".to_string()]);
}

#[test]
fn test_overrides_take_precedence() {
    let ini = IniFile::parse("[Variables]\nMODE=release\n").unwrap();
    let (system, _) = ConfigSystem::from_ini(&ctx(), "Plug", &ini, "MODE=debug;EXTRA=1").unwrap();
    assert_eq!(system.variables.get("MODE"), Some("debug"));
    assert_eq!(system.variables.get("EXTRA"), Some("1"));
}

#[test]
fn test_injection_group_includes_children() {
    let system = system(indoc! {"
        [Children]
        Historical=1
    "});
    let group = system.injection_group().unwrap();
    let content = "a;\n// Historical: Begin\nresidual();\n// Historical: End\nb;\n";
    assert_eq!(group.clear_residuals(content), "a;\nb;\n");
}

// --- Local config selection ---

#[test]
fn test_single_active_local_config_selected() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("Plugins/Crysknife");
    fs::create_dir_all(&base).unwrap();
    fs::write(
        base.join("BaseCrysknifeTeamLocal.ini"),
        "[Variables]\nCRYSKNIFE_LOCAL_CONFIG_PREDICATE=Always\n",
    )
    .unwrap();
    fs::write(
        base.join("BaseCrysknifeOffLocal.ini"),
        "[Variables]\nCRYSKNIFE_LOCAL_CONFIG_PREDICATE=Never\n",
    )
    .unwrap();
    let mut ctx = EngineContext::with_version(dir.path(), EngineVersion::new(5, 1, 0));
    let suffix = select_local_config(&mut ctx).unwrap();
    assert_eq!(suffix.as_deref(), Some("Team"));
    assert_eq!(ctx.local_suffix(), Some("Team"));
    // The choice is cached for downstream tooling.
    let cache = fs::read_to_string(base.join("CrysknifeCache.ini")).unwrap();
    assert!(cache.contains("CRYSKNIFE_LOCAL_CONFIG_SUFFIX=Team"));
}

#[test]
fn test_multiple_active_local_configs_are_fatal() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("Plugins/Crysknife");
    fs::create_dir_all(&base).unwrap();
    for tag in ["Alpha", "Beta"] {
        fs::write(
            base.join(format!("BaseCrysknife{tag}Local.ini")),
            "[Variables]\nCRYSKNIFE_LOCAL_CONFIG_PREDICATE=Always\n",
        )
        .unwrap();
    }
    let mut ctx = EngineContext::with_version(dir.path(), EngineVersion::new(5, 1, 0));
    assert!(matches!(
        select_local_config(&mut ctx),
        Err(CrysknifeError::MultipleLocalConfigs { .. })
    ));
}

#[test]
fn test_no_local_config_dir_is_fine() {
    let mut ctx = ctx();
    assert_eq!(select_local_config(&mut ctx).unwrap(), None);
}
