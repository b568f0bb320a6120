use std::fs;
use std::path::Path;

use crysknife::context::EngineContext;
use crysknife::injector::{AutoPrompter, Injector, InjectorOptions, JobType};
use crysknife::version::EngineVersion;
use tempfile::{tempdir, TempDir};

struct EngineFixture {
    dir: TempDir,
}

impl EngineFixture {
    fn new() -> Self {
        Self {
            dir: tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    fn injector(&self) -> Injector {
        let ctx = EngineContext::with_version(self.root(), EngineVersion::new(5, 3, 0));
        Injector::with_context(
            ctx,
            InjectorOptions::FORCE,
            Box::new(AutoPrompter { answer_yes: true }),
        )
    }
}

#[test]
fn test_new_file_copy_apply_twice_then_clear() {
    let fx = EngineFixture::new();
    fx.write(
        "Plugins/Plug/SourcePatch/Runtime/Engine/Private/Foo.cpp",
        "int foo() { return 42; }\n",
    );

    let mut injector = fx.injector();
    injector.register("Plug", "").unwrap();

    // First apply copies the file into the engine tree.
    let summary = injector.process(JobType::APPLY).unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(
        fx.read("Runtime/Engine/Private/Foo.cpp"),
        "int foo() { return 42; }\n"
    );

    // Second apply is a no-op.
    let summary = injector.process(JobType::APPLY).unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(
        fx.read("Runtime/Engine/Private/Foo.cpp"),
        "int foo() { return 42; }\n"
    );

    // Clear deletes the installed copy.
    injector.process(JobType::CLEAR).unwrap();
    assert!(!fx.exists("Runtime/Engine/Private/Foo.cpp"));
    // The source of truth under SourcePatch stays.
    assert!(fx.exists("Plugins/Plug/SourcePatch/Runtime/Engine/Private/Foo.cpp"));
}

#[test]
fn test_generate_clear_apply_cycle_round_trips_injection() {
    let fx = EngineFixture::new();
    let injected = "int a;\n// Plug: Begin\nplugin_call();\n// Plug: End\nint b;\n";
    fx.write("Runtime/Core/Boot.cpp", injected);
    // An empty patch file registers the target for generation.
    fx.write("Plugins/Plug/SourcePatch/Runtime/Core/Boot.cpp.patch", "");

    let mut injector = fx.injector();
    injector.register("Plug", "").unwrap();

    // Generate captures the injection into the patch file.
    let summary = injector.process(JobType::GENERATE).unwrap();
    assert_eq!(summary.failed, 0);
    let patch_text = fx.read("Plugins/Plug/SourcePatch/Runtime/Core/Boot.cpp.patch");
    assert!(patch_text.starts_with("@@"));
    assert!(patch_text.contains("plugin_call"));

    // Clear strips the injection from the engine file.
    injector.process(JobType::CLEAR).unwrap();
    assert_eq!(fx.read("Runtime/Core/Boot.cpp"), "int a;\nint b;\n");

    // Apply reinstates it exactly.
    let summary = injector.process(JobType::APPLY).unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(fx.read("Runtime/Core/Boot.cpp"), injected);
}

#[test]
fn test_skip_rule_leaves_target_alone() {
    let fx = EngineFixture::new();
    fx.write("Runtime/Core/Keep.cpp", "stock();\n");
    fx.write(
        "Plugins/Plug/SourcePatch/Runtime/Core/Keep.cpp",
        "plugin_version();\n",
    );
    fx.write(
        "Plugins/Plug/SourcePatch/Crysknife.ini",
        "[Global]\nSkipIf=NameMatches:Keep\n",
    );

    let mut injector = fx.injector();
    injector.register("Plug", "").unwrap();
    let summary = injector.process(JobType::APPLY).unwrap();
    assert!(summary.skipped >= 1);
    assert_eq!(fx.read("Runtime/Core/Keep.cpp"), "stock();\n");
}

#[test]
fn test_protected_patch_written_alongside_main() {
    let fx = EngineFixture::new();
    fx.write(
        "Runtime/Core/Hooks.cpp",
        "before;\n// Plug: Begin\nhook();\n// Plug: End\nafter;\n",
    );
    fx.write("Plugins/Plug/SourcePatch/Runtime/Core/Hooks.cpp.patch", "");

    let ctx = EngineContext::with_version(fx.root(), EngineVersion::new(5, 3, 0));
    let mut injector = Injector::with_context(
        ctx,
        InjectorOptions::FORCE | InjectorOptions::PROTECTED,
        Box::new(AutoPrompter { answer_yes: true }),
    );
    injector.register("Plug", "").unwrap();
    injector.process(JobType::GENERATE).unwrap();

    assert!(fx.exists("Plugins/Plug/SourcePatch/Runtime/Core/Hooks.cpp.patch"));
    assert!(fx.exists("Plugins/Plug/SourcePatch/Runtime/Core/Hooks.cpp.protected.patch"));
}

#[test]
fn test_dry_run_touches_nothing() {
    let fx = EngineFixture::new();
    fx.write(
        "Plugins/Plug/SourcePatch/Runtime/New/File.cpp",
        "fresh();\n",
    );
    let ctx = EngineContext::with_version(fx.root(), EngineVersion::new(5, 3, 0));
    let mut injector = Injector::with_context(
        ctx,
        InjectorOptions::FORCE | InjectorOptions::DRY_RUN,
        Box::new(AutoPrompter { answer_yes: true }),
    );
    injector.register("Plug", "").unwrap();
    injector.process(JobType::APPLY).unwrap();
    assert!(!fx.exists("Runtime/New/File.cpp"));
}

#[test]
fn test_unregister_removes_plugin() {
    let fx = EngineFixture::new();
    fx.write("Plugins/Plug/SourcePatch/Runtime/X.cpp", "x();\n");
    let mut injector = fx.injector();
    injector.register("Plug", "").unwrap();
    assert!(injector.unregister("Plug"));
    assert!(!injector.unregister("Plug"));
    injector.process(JobType::APPLY).unwrap();
    assert!(!fx.exists("Runtime/X.cpp"));
}
