//! Source patch lifecycle management for engine plugins.
//!
//! `crysknife` keeps a plugin's edits to a large external C++ source tree
//! (canonically a game engine checkout) alive across engine versions. A
//! plugin owns new source files plus comment-guarded edits to existing
//! engine files; this crate registers, generates, serializes, applies and
//! reverts those edits, tolerating line drift and minor content drift
//! between versions.
//!
//! ## How it fits together
//!
//! - [`injection`] recognizes the guarded regions (`// <Tag>: Begin` …
//!   `// <Tag>: End`, trailing and next-line guards) and strips them
//!   reversibly, restoring commented-out stock code for deletion blocks.
//! - [`dmp`] is the character-level diff / fuzzy match / patch engine:
//!   hunks carry context that is matched with bounded tolerance instead
//!   of line numbers.
//! - [`tag`] rewrites guard comments between the canonical on-disk
//!   spelling and a team's configured dialect; [`decorator`] parses
//!   `@Crysknife(...)` per-hunk directives (context constraints, engine
//!   version gates).
//! - [`patcher`] orchestrates one file: injection-seamed diffs, the
//!   incremental merge with patch history, fuzzy apply with failure
//!   capture, and the packed patch file form.
//! - [`config`] loads the layered INI files with scoped Skip/Flatten/
//!   Remap rules, variables and the cross-plugin dependency graph;
//!   [`predicate`] evaluates the rule expressions.
//! - [`injector`] is the batch driver walking `SourcePatch/` roots.
//!
//! ## Example
//!
//! Record a guarded injection as a patch and replay it on a pristine
//! engine file:
//!
//! ```rust
//! use crysknife::config::VariableMap;
//! use crysknife::injection::{InjectionRegex, InjectionRegexGroup};
//! use crysknife::patcher::{IncrementalMode, Patcher};
//! use crysknife::tag::CommentTagFormat;
//! use crysknife::version::EngineVersion;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let format = CommentTagFormat::default();
//! let injection = InjectionRegexGroup::new(
//!     InjectionRegex::new("Plug", &format)?,
//!     Vec::new(),
//! );
//! let vars = VariableMap::new();
//! let mut patcher = Patcher::new(
//!     "Plug",
//!     &injection,
//!     &format,
//!     &vars,
//!     EngineVersion::new(5, 3, 0),
//! );
//! patcher.incremental = IncrementalMode::Disabled;
//!
//! let stock = "int a;\nint b;\n";
//! let modified = "int a;\n// Plug: Begin\ninjected();\n// Plug: End\nint b;\n";
//!
//! // The cleared form of the modified file is the stock file again.
//! assert_eq!(injection.unpatch(modified), stock);
//!
//! // Generate a bundle, serialize it, and replay it from text.
//! let bundle = patcher.generate(stock, modified, &[])?;
//! let text = patcher.serialize(&bundle, true)?;
//! let loaded = patcher.deserialize(&text)?;
//! let outcome = patcher.apply(&loaded, stock);
//! assert_eq!(outcome.text, modified);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use thiserror::Error;

pub mod config;
pub mod context;
pub mod decorator;
pub mod dmp;
pub mod injection;
pub mod injector;
pub mod patcher;
pub mod predicate;
pub mod report;
pub mod tag;
pub mod version;

pub use config::ConfigSystem;
pub use context::EngineContext;
pub use injector::{Injector, InjectorOptions, JobType};
pub use patcher::{IncrementalMode, Patcher};
pub use version::EngineVersion;

/// Errors surfaced by the patch engine and config system.
///
/// Fatal conditions (conflicting decorators, invalid patch text, multiple
/// active local configs) are explicit variants; the driver maps them to a
/// red console line and exit status 1. The interactive abort is the only
/// flow that terminates the process from within the pipeline, and even
/// that travels as [`CrysknifeError::Aborted`].
#[derive(Error, Debug)]
pub enum CrysknifeError {
    /// An I/O error with the path that failed.
    #[error("I/O error while processing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Patch text did not parse: bad header, bad escape, or a bad body
    /// line.
    #[error("invalid patch text: {detail}")]
    InvalidPatch { detail: String },
    /// An engine version string or `Version.h` did not parse.
    #[error("invalid engine version: {input}")]
    InvalidVersion { input: String },
    /// Two decorators on one hunk demanded different values.
    #[error("conflicting hunk decorators: {detail}")]
    ConflictingDecorators { detail: String },
    /// `${...}` substitution revisited a variable already being expanded.
    #[error("variable reference cycle through '{name}'")]
    VariableCycle { name: String },
    /// A config file line did not parse.
    #[error("invalid config: {detail}")]
    InvalidConfig { detail: String },
    /// A configured comment-tag pattern failed to compile.
    #[error("invalid comment tag format: {detail}")]
    InvalidTagFormat { detail: String },
    /// More than one `BaseCrysknife<Tag>Local.ini` predicate held.
    #[error("multiple active local configs: {suffixes:?}")]
    MultipleLocalConfigs { suffixes: Vec<String> },
    /// A patch target resolved outside the engine root.
    #[error("path '{path}' escapes the engine root")]
    PathEscape { path: PathBuf },
    /// The user chose to abort at a confirmation prompt.
    #[error("aborted")]
    Aborted,
}
