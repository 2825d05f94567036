//! Interface contracts for everything this core treats as an external
//! collaborator: module graph construction and sealing (`Compilation`),
//! module/dependency factories, the resolver, and the cross-build cache.
//! None of these are implemented here beyond what the driver needs to call
//! through them; `kiln-core`'s test suite ships a minimal mock of each.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_error::Result;
use serde_json::Value;

use crate::source::{AssetEntry, AssetInfo, Source};

/// One round of module graph construction and sealing. Produced fresh by
/// the driver at the start of every `compile`, consumed for emission.
#[async_trait]
pub trait Compilation: fmt::Debug + Send + Sync + 'static {
    fn get_assets(&self) -> Vec<AssetEntry>;

    fn update_asset(&mut self, name: &str, source: Arc<dyn Source>, info: AssetInfo);
    fn emit_asset(&mut self, name: String, source: Arc<dyn Source>, info: AssetInfo);

    async fn finish(&mut self) -> Result<()>;
    async fn seal(&mut self) -> Result<()>;

    fn emitted_assets(&self) -> BTreeSet<String>;
    fn emitted_assets_mut(&mut self) -> &mut BTreeSet<String>;
    fn compared_for_emit_assets_mut(&mut self) -> &mut BTreeSet<PathBuf>;

    fn build_dependencies(&self) -> Vec<PathBuf>;

    fn name(&self) -> Option<&str>;

    fn get_logger(&self, name: &str) -> crate::logger::Logger {
        crate::logger::Logger::standalone(name.to_string())
    }

    fn records(&self) -> &Value;
    fn set_records(&mut self, records: Value);

    fn start_time(&self) -> Option<u128>;
    fn set_start_time(&mut self, t: u128);
    fn end_time(&self) -> Option<u128>;
    fn set_end_time(&mut self, t: u128);

    fn entrypoints(&self) -> Vec<Entrypoint>;

    /// Whether the compilation wants another `compile` pass before assets
    /// are considered final (§4.5 additional-pass branch).
    fn need_additional_pass(&self) -> bool {
        false
    }

    /// Expands a filename template (e.g. `[name].[contenthash].js`) against
    /// `data`. Template syntax and chunk-hash computation are out of scope;
    /// the default just returns the template unexpanded.
    fn get_path(&self, template: &str, data: &PathData) -> String {
        let _ = data;
        template.to_string()
    }
}

/// Constructs a fresh `Compilation` for one `compile` pass. Kept separate
/// from `Compilation` itself so a child compiler can alias a records
/// subtree (§4.6) before the compilation starts filling it in.
pub trait NewCompilation: Compilation {
    fn new(name: Option<String>, records: Value) -> Self;
}

#[derive(Debug, Clone)]
pub struct Entrypoint {
    pub name: String,
    pub chunks: Vec<String>,
}

/// Opaque per-compile params; only their identity flows through hooks.
#[derive(Debug, Default)]
pub struct NormalModuleFactory;
#[derive(Debug, Default)]
pub struct ContextModuleFactory;
#[derive(Debug, Default)]
pub struct ResolverFactory;

#[derive(Debug, Clone)]
pub struct CompileParams {
    pub normal_module_factory: Arc<NormalModuleFactory>,
    pub context_module_factory: Arc<ContextModuleFactory>,
}

/// The cross-build cache. `begin_idle`/`end_idle` bracket the "cache is
/// quiesced between builds" state (§3 invariant 2); `store_build_dependencies`
/// and `shutdown` are fired once per completed run and once on `close`.
#[async_trait]
pub trait Cache: fmt::Debug + Send + Sync {
    fn begin_idle(&self);
    async fn end_idle(&self) -> Result<()>;
    async fn store_build_dependencies(&self, deps: Vec<PathBuf>) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// An in-memory no-op cache: `begin_idle`/`end_idle` just track a flag,
/// dependencies are kept around for inspection, shutdown always succeeds.
/// Suitable for single-process use and for the test suite.
#[derive(Debug, Default)]
pub struct NoopCache {
    idle: std::sync::atomic::AtomicBool,
    stored_dependencies: dashmap::DashMap<(), Vec<PathBuf>>,
}

#[async_trait]
impl Cache for NoopCache {
    fn begin_idle(&self) {
        self.idle.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    async fn end_idle(&self) -> Result<()> {
        self.idle.store(false, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn store_build_dependencies(&self, deps: Vec<PathBuf>) -> Result<()> {
        self.stored_dependencies.insert((), deps);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Opaque per-compilation statistics snapshot. The driver constructs one
/// once per completed compilation and otherwise never looks inside it.
#[derive(Debug, Clone)]
pub struct Stats {
    pub name: Option<String>,
    pub start_time: Option<u128>,
    pub end_time: Option<u128>,
}

impl Stats {
    pub fn new(compilation: &dyn Compilation) -> Self {
        Self {
            name: compilation.name().map(str::to_owned),
            start_time: compilation.start_time(),
            end_time: compilation.end_time(),
        }
    }
}

/// Data fed to `Compilation::get_path`'s template expansion. Out of scope
/// templating logic lives on the `Compilation` implementation; the driver
/// only needs to be able to construct this bag of inputs.
#[derive(Debug, Clone, Default)]
pub struct PathData {
    pub fields: BTreeMap<String, String>,
}
