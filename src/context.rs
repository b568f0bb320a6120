//! Process-wide engine context.
//!
//! Everything that would otherwise be a mutable global (engine root, the
//! engine version probed from `Version.h`, the active local-config suffix)
//! lives here and is threaded through constructors explicitly. After
//! [`EngineContext::init`] the value is read-only.

use std::path::{Path, PathBuf};

use crate::version::EngineVersion;
use crate::CrysknifeError;

/// Immutable per-process context, constructed once by the driver before any
/// config system or patcher.
#[derive(Debug, Clone)]
pub struct EngineContext {
    engine_root: PathBuf,
    version: EngineVersion,
    local_suffix: Option<String>,
}

impl EngineContext {
    /// Probes the engine checkout at `engine_root` and captures its version.
    pub fn init(engine_root: impl Into<PathBuf>) -> Result<Self, CrysknifeError> {
        let engine_root = engine_root.into();
        let version = EngineVersion::probe(&engine_root)?;
        Ok(Self {
            engine_root,
            version,
            local_suffix: None,
        })
    }

    /// Builds a context with a known version, bypassing the `Version.h`
    /// probe. Used by tests and by drivers that already know the version.
    pub fn with_version(engine_root: impl Into<PathBuf>, version: EngineVersion) -> Self {
        Self {
            engine_root: engine_root.into(),
            version,
            local_suffix: None,
        }
    }

    /// Root of the engine source tree; relative targets resolve against it.
    pub fn engine_root(&self) -> &Path {
        &self.engine_root
    }

    pub fn version(&self) -> EngineVersion {
        self.version
    }

    /// Directory holding the repo-wide `BaseCrysknife.ini` family.
    pub fn base_config_dir(&self) -> PathBuf {
        self.engine_root.join("Plugins").join("Crysknife")
    }

    /// Root of a plugin checkout inside the engine tree.
    pub fn plugin_root(&self, plugin: &str) -> PathBuf {
        self.engine_root.join("Plugins").join(plugin)
    }

    /// The `SourcePatch` root for a plugin.
    pub fn source_patch_root(&self, plugin: &str) -> PathBuf {
        self.plugin_root(plugin).join("SourcePatch")
    }

    /// Suffix of the active `BaseCrysknife<Tag>Local.ini`, if any.
    pub fn local_suffix(&self) -> Option<&str> {
        self.local_suffix.as_deref()
    }

    pub(crate) fn set_local_suffix(&mut self, suffix: Option<String>) {
        self.local_suffix = suffix;
    }
}
