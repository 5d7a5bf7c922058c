//! Processing modules.
//!
//! A module turns the current source file into a new file. Modifiers
//! transform their source; generators produce audio from their parameters and
//! report the files they consumed. Modules are looked up by name in a
//! [`ModuleRegistry`] built once at startup.

pub mod mixin;
pub mod noise;
pub mod pad;
pub mod params;
pub mod ramp;
pub mod resample;
pub mod reverse;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::Result;

/// Capability of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// One source in, one file out.
    Modifier,
    /// Produces audio from parameters, possibly consuming other files. The
    /// current source is not part of its signature or its source set.
    Generator,
}

/// A `file` parameter resolved to a ready file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFile {
    /// Path of the resolved file.
    pub path: PathBuf,
    /// Literal source files it derives from.
    pub sources: Vec<PathBuf>,
}

/// Resolves a `file`-shaped parameter (path, list or query) on behalf of a
/// module, dispatching nested queries synchronously.
pub trait FileResolver {
    fn resolve_file(&self, value: &Value) -> Result<ResolvedFile>;
}

/// Everything a module receives.
pub struct ModuleInput<'a> {
    /// The current source file.
    pub source: &'a Path,
    /// Invocation parameters, without the `module` key.
    pub params: &'a Map<String, Value>,
    /// Where the module must write its output WAV file.
    pub target: &'a Path,
    /// Resolver for `file` parameters.
    pub files: &'a dyn FileResolver,
}

/// What a module reports besides the file it wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleOutput {
    /// Files the output derives from, besides the current source.
    pub consumed_sources: Vec<PathBuf>,
}

/// A pluggable transform.
pub trait Module: Send + Sync {
    /// Capability of this module.
    fn kind(&self) -> ModuleKind {
        ModuleKind::Modifier
    }

    /// Writes the result of applying this module to `input.target`.
    fn process(&self, input: &ModuleInput<'_>) -> Result<ModuleOutput>;
}

/// Name to handler table.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in modules.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("pad", Arc::new(pad::Pad));
        registry.register("ramp", Arc::new(ramp::Ramp));
        registry.register("time-reverse", Arc::new(reverse::TimeReverse));
        registry.register("mixin", Arc::new(mixin::Mixin));
        registry.register("resample", Arc::new(resample::Resample));
        registry.register("noise", Arc::new(noise::Noise));
        registry
    }

    /// Registers a module, replacing any module of the same name.
    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn Module>) {
        self.modules.insert(name.into(), module);
    }

    /// Looks up a module.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::DaemonError;

    /// Resolves plain paths only.
    pub struct PathsOnly;

    impl FileResolver for PathsOnly {
        fn resolve_file(&self, value: &Value) -> Result<ResolvedFile> {
            match value {
                Value::String(path) => Ok(ResolvedFile {
                    path: PathBuf::from(path),
                    sources: vec![PathBuf::from(path)],
                }),
                other => Err(DaemonError::invalid_request(format!("unsupported file {}", other))),
            }
        }
    }

    /// Runs `module` on `source` with JSON `params`, writing to `target`.
    pub fn run(module: &dyn Module, source: &Path, params: Value, target: &Path) -> Result<ModuleOutput> {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        module.process(&ModuleInput {
            source,
            params: &params,
            target,
            files: &PathsOnly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_registered() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec!["mixin", "noise", "pad", "ramp", "resample", "time-reverse"]
        );
        assert_eq!(registry.get("noise").unwrap().kind(), ModuleKind::Generator);
        assert_eq!(registry.get("pad").unwrap().kind(), ModuleKind::Modifier);
        assert!(registry.get("vocoder").is_none());
    }

    #[test]
    fn register_replaces() {
        let mut registry = ModuleRegistry::with_builtins();
        registry.register("pad", Arc::new(reverse::TimeReverse));
        assert_eq!(registry.names().len(), 6);
    }
}
