use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use crysknife::injector::{
    AutoPrompter, Injector, InjectorOptions, JobType, PromptCategory, PromptDecision, Prompter,
};
use crysknife::CrysknifeError;
use env_logger::Builder;
use log::{error, info, Level, LevelFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Manage comment-guarded source patches for engine plugins across engine versions.",
    long_about = "Generates, applies and clears plugin source patches against an engine checkout. \
Patches match by fuzzy context, so they survive line drift and minor content drift between engine versions."
)]
struct Args {
    /// Path to the engine source root.
    #[arg(short = 'E', long)]
    engine_root: PathBuf,

    /// Plugin name(s) to process; repeat for several.
    #[arg(short = 'P', long = "plugin", required = true)]
    plugins: Vec<String>,

    /// Regenerate patch files from the current engine tree.
    #[arg(short = 'G', long)]
    generate: bool,

    /// Strip this plugin's injections from the engine tree.
    #[arg(short = 'C', long)]
    clear: bool,

    /// Apply patch files to the engine tree (default when no job given).
    #[arg(short = 'A', long)]
    apply: bool,

    /// Variable overrides, KEY=VALUE; repeat for several.
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// Symlink new files into the engine tree instead of copying.
    #[arg(long)]
    link: bool,

    /// Answer yes to every confirmation.
    #[arg(short = 'f', long)]
    force: bool,

    /// Preview the patch/copy decisions without writing to the engine
    /// tree or the patch files.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Copy .patch files verbatim instead of interpreting them.
    #[arg(long)]
    treat_patch_as_file: bool,

    /// Regenerate from scratch, discarding version-gated history.
    #[arg(long)]
    clear_all_history: bool,

    /// Keep every history hunk that still matches, even gated ones.
    #[arg(long)]
    keep_all_history: bool,

    /// Also write .protected.patch files with capture data.
    #[arg(long)]
    protected: bool,

    /// Console detail; stack to go deeper (-v, -vv, -vvv).
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        long_help = "Console detail, stackable:\n\
            -v    per-file progress and patch decisions\n\
            -vv   per-hunk detail (merge, skip and remap reasoning)\n\
            -vvv  match tracing inside the diff engine\n\
            Quiet runs report only warnings and failed hunks."
    )]
    verbose: u8,
}

/// Terminal-backed confirmation with the ForAll/Abort vocabulary.
struct StdioPrompter;

impl Prompter for StdioPrompter {
    fn ask(&mut self, _category: PromptCategory, message: &str) -> PromptDecision {
        loop {
            print!("{message} [y/n/a(ll)/s(kip all)/q(uit)] ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return PromptDecision::No;
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return PromptDecision::Yes,
                "n" | "no" => return PromptDecision::No,
                "a" | "all" => return PromptDecision::YesForAll,
                "s" | "skip" => return PromptDecision::NoForAll,
                "q" | "quit" => return PromptDecision::Abort,
                _ => println!("Please answer y, n, a, s or q."),
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Quiet by default: only warnings and failed hunks reach the console
    // unless -v/-vv/-vvv raise the floor.
    let log_level = if args.verbose == 0 {
        LevelFilter::Warn
    } else if args.verbose == 1 {
        LevelFilter::Info
    } else if args.verbose == 2 {
        LevelFilter::Debug
    } else {
        LevelFilter::Trace
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            // Plain lines for progress; severity tags for everything else.
            let tag = match record.level() {
                Level::Info => return writeln!(buf, "{}", record.args()),
                Level::Error => "error".red().bold(),
                Level::Warn => "warning".yellow().bold(),
                Level::Debug => "debug".blue(),
                Level::Trace => "trace".dimmed(),
            };
            writeln!(buf, "{tag}: {}", record.args())
        })
        .init();

    if !args.engine_root.is_dir() {
        anyhow::bail!(
            "'{}' is not an engine checkout (expected a directory).",
            args.engine_root.display()
        );
    }

    let mut options = InjectorOptions::default();
    let mut set = |flag, on| {
        if on {
            options |= flag;
        }
    };
    set(InjectorOptions::LINK, args.link);
    set(InjectorOptions::FORCE, args.force);
    set(InjectorOptions::DRY_RUN, args.dry_run);
    set(InjectorOptions::VERBOSE, args.verbose > 0);
    set(InjectorOptions::TREAT_PATCH_AS_FILE, args.treat_patch_as_file);
    set(InjectorOptions::CLEAR_ALL_HISTORY, args.clear_all_history);
    set(InjectorOptions::KEEP_ALL_HISTORY, args.keep_all_history);
    set(InjectorOptions::PROTECTED, args.protected);

    let mut jobs = JobType::empty();
    if args.generate {
        jobs |= JobType::GENERATE;
    }
    if args.clear {
        jobs |= JobType::CLEAR;
    }
    if args.apply {
        jobs |= JobType::APPLY;
    }
    if jobs.is_empty() {
        jobs = JobType::APPLY;
    }

    let prompter: Box<dyn Prompter> = if args.force || args.dry_run {
        Box::new(AutoPrompter { answer_yes: true })
    } else {
        Box::new(StdioPrompter)
    };

    let mut injector = Injector::init(&args.engine_root, options, prompter)
        .with_context(|| format!("Failed to initialize against '{}'", args.engine_root.display()))?;
    info!("engine version {}", injector.context().version());

    let overrides = args.defines.join(";");
    for plugin in &args.plugins {
        injector
            .register(plugin, &overrides)
            .with_context(|| format!("Failed to load config for plugin '{plugin}'"))?;
    }

    match injector.process(jobs) {
        Ok(summary) => {
            println!(
                "\n{} processed, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            );
            if args.dry_run {
                println!("Dry run: the engine tree and patch files were left untouched.");
            }
            if summary.failed > 0 {
                eprintln!(
                    "Some hunks did not apply; review the HTML dumps and merge manually."
                );
                std::process::exit(1);
            }
            Ok(())
        }
        Err(CrysknifeError::Aborted) => {
            error!("aborted by user");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
