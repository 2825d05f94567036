//! The compiler driver (§4.5): owns the hook table, the cache handle, the
//! filesystem wiring and the `(running, idle, watchMode)` state machine, and
//! implements the `run`/`watch`/`compile`/`close`/`run_as_child` lifecycle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use kiln_error::{Error, Result};
use kiln_fs::{ReadableFileSystem, WritableFileSystem};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::child::create_child_compiler;
use crate::collaborators::{Cache, CompileParams, Compilation, ContextModuleFactory, Entrypoint, NewCompilation,
    NoopCache, NormalModuleFactory, Stats};
use crate::emit::{self, EmissionState};
use crate::hooks::{CompilationHandle, CompilerContext, CompilerHooks};
use crate::logger::Logger;
use crate::options::CompilerOptions;
use crate::records::{emit_records, read_records};
use crate::watching::Watching;

pub(crate) fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis()
}

/// `Arc`-shared handle to a `Compiler`. Plain `Arc`, not `Arc<Mutex<_>>`:
/// every field that can change after construction has its own interior
/// mutability, so concurrent hook dispatch never has to hold the whole
/// compiler locked for the duration of a build.
pub type CompilerHandle<C> = Arc<Compiler<C>>;

/// Per-build record of filesystem change tracking, owned by the watch layer
/// and treated as read-only here (§5 "Shared-resource policy").
#[derive(Debug, Default)]
pub struct ChangeTracking {
    pub modified_files: DashMap<PathBuf, ()>,
    pub removed_files: DashMap<PathBuf, ()>,
    pub file_timestamps: DashMap<PathBuf, u128>,
    pub context_timestamps: DashMap<PathBuf, u128>,
}

/// Bookkeeping a child compiler needs to write its slice of `records` back
/// into its parent's tree once it finishes a build (§4.6). `serde_json::Value`
/// has no partial-borrow / aliasing story, so rather than literal pointer
/// aliasing, a child keeps enough information to write itself back.
struct RecordsSlot<C: NewCompilation> {
    parent: CompilerHandle<C>,
    rel_name: String,
    index: usize,
}

pub struct Compiler<C: NewCompilation> {
    pub context: Arc<Path>,
    root: Option<Weak<Compiler<C>>>,
    pub compiler_path: Arc<str>,
    pub options: CompilerOptions,
    pub hooks: CompilerHooks<C>,

    cache: Arc<dyn Cache>,
    input_fs: Arc<dyn ReadableFileSystem>,
    output_fs: Option<Arc<dyn WritableFileSystem>>,
    intermediate_fs: Option<Arc<dyn WritableFileSystem>>,

    emission_state: EmissionState,
    records: SyncMutex<Value>,
    records_slot: Option<RecordsSlot<C>>,

    pub change_tracking: Arc<ChangeTracking>,

    running: AtomicBool,
    idle: AtomicBool,
    watch_mode: AtomicBool,
    closed: AtomicBool,

    parent_compilation: SyncMutex<Option<CompilationHandle<C>>>,
    children: SyncMutex<Vec<CompilerHandle<C>>>,
}

impl<C: NewCompilation> std::fmt::Debug for Compiler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("compiler_path", &self.compiler_path)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("idle", &self.idle.load(Ordering::SeqCst))
            .field("watch_mode", &self.watch_mode.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<C: NewCompilation> Compiler<C> {
    pub fn new(options: CompilerOptions, input_fs: Arc<dyn ReadableFileSystem>) -> Self {
        let context: Arc<Path> = Arc::from(options.context.as_path());
        Self {
            context,
            root: None,
            compiler_path: Arc::from(""),
            options,
            hooks: CompilerHooks::new(),
            cache: Arc::new(NoopCache::default()),
            input_fs,
            output_fs: None,
            intermediate_fs: None,
            emission_state: EmissionState::new(),
            records: SyncMutex::new(Value::Object(Default::default())),
            records_slot: None,
            change_tracking: Arc::new(ChangeTracking::default()),
            running: AtomicBool::new(false),
            idle: AtomicBool::new(false),
            watch_mode: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            parent_compilation: SyncMutex::new(None),
            children: SyncMutex::new(Vec::new()),
        }
    }

    pub fn with_output_fs(mut self, fs: Arc<dyn WritableFileSystem>) -> Self {
        self.output_fs = Some(fs);
        self
    }

    pub fn with_intermediate_fs(mut self, fs: Arc<dyn WritableFileSystem>) -> Self {
        self.intermediate_fs = Some(fs);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    /// Wraps a fully configured, plugin-tapped `Compiler` in its shared
    /// handle. Hooks are only ever tapped before this point; every method
    /// below takes `&self`/`&Arc<Self>` and relies on interior mutability.
    pub fn handle(self) -> CompilerHandle<C> {
        Arc::new(self)
    }

    pub fn output_path(&self) -> &Path {
        self.options.output_path()
    }

    pub fn is_child(&self) -> bool {
        self.parent_compilation.lock().unwrap().is_some()
    }

    /// The top-level ancestor. Falls back to `self` if the weak `root`
    /// handle has nothing left to upgrade to (§9 "non-owning reference").
    pub fn root(self: &Arc<Self>) -> Arc<Self> {
        match &self.root {
            None => self.clone(),
            Some(weak) => weak.upgrade().unwrap_or_else(|| self.clone()),
        }
    }

    pub fn get_infrastructure_logger(&self, name: impl Into<Arc<str>>) -> Result<Logger> {
        Logger::new(name, Arc::new(clone_infra_hook(&self.hooks.infrastructure_log)))
    }

    fn context_handle(&self) -> CompilerContext {
        CompilerContext {
            context: self.context.clone(),
            compiler_path: self.compiler_path.clone(),
            output_path: Arc::from(self.output_path()),
        }
    }

    fn io_fs(&self) -> Option<Arc<dyn WritableFileSystem>> {
        self.intermediate_fs.clone().or_else(|| self.output_fs.clone())
    }

    // -- lifecycle -----------------------------------------------------

    /// `run` (§4.5): one full build, returning the final `Stats` or
    /// propagating the first error encountered. Mirrors invariant 7 (§8):
    /// a concurrent call while `running` fails fast without touching state.
    #[tracing::instrument(skip(self), fields(compiler = %self.compiler_path))]
    pub async fn run(self: &Arc<Self>) -> Result<Arc<Stats>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown("compiler is closed".into()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::ConcurrentBuild);
        }

        let start_time = now_millis();
        if self.idle.swap(false, Ordering::SeqCst) {
            self.cache.end_idle().await?;
        }

        let result = self.run_inner(start_time).await;
        self.finalize(result).await
    }

    async fn run_inner(self: &Arc<Self>, start_time: u128) -> Result<Arc<Stats>> {
        let ctx = self.context_handle();
        self.hooks.before_run.call_async(ctx.clone()).await?;
        self.hooks.run.call_async(ctx).await?;

        let fs = self.io_fs();
        let records = match &fs {
            Some(fs) => read_records(fs.as_ref(), self.options.records_input_path.as_deref()).await?,
            None => Value::Object(Default::default()),
        };
        *self.records.lock().unwrap() = records;

        self.compile_loop(start_time).await
    }

    /// Drives `compile` → emit → `additionalPass`, repeating while the
    /// compilation asks for another pass (§4.5 step 2, S6).
    async fn compile_loop(self: &Arc<Self>, start_time: u128) -> Result<Arc<Stats>> {
        loop {
            let compilation = self.compile_once(start_time).await?;

            let should_emit = self.hooks.should_emit.call(compilation.clone()).unwrap_or(true);
            if !should_emit {
                self.stamp_end_time(&compilation).await;
                let stats = self.snapshot_stats(&compilation).await;
                self.hooks.done.call_async(stats.clone()).await?;
                return Ok(stats);
            }

            tokio::task::yield_now().await;

            self.hooks.emit.call_async(compilation.clone()).await?;
            let output_path = self.output_path().to_path_buf();
            if let Some(fs) = self.output_fs.clone() {
                emit::emit_assets(
                    fs.as_ref(),
                    &self.emission_state,
                    &output_path,
                    self.options.output.compare_before_emit,
                    compilation.clone(),
                    &self.hooks.asset_emitted,
                )
                .await?;
            }
            self.hooks.after_emit.call_async(compilation.clone()).await?;

            let needs_additional_pass = compilation.lock().await.need_additional_pass();
            if needs_additional_pass {
                self.stamp_end_time(&compilation).await;
                let stats = self.snapshot_stats(&compilation).await;
                self.hooks.done.call_async(stats).await?;
                self.hooks.additional_pass.call_async(()).await?;
                continue;
            }

            self.sync_records_to_slot(&compilation).await;
            if let Some(fs) = self.io_fs() {
                let records = compilation.lock().await.records().clone();
                emit_records(fs.as_ref(), self.options.records_output_path.as_deref(), &records).await?;
            }

            self.stamp_end_time(&compilation).await;
            let stats = self.snapshot_stats(&compilation).await;
            self.hooks.done.call_async(stats.clone()).await?;
            self.cache
                .store_build_dependencies(compilation.lock().await.build_dependencies())
                .await?;
            return Ok(stats);
        }
    }

    async fn stamp_end_time(&self, compilation: &CompilationHandle<C>) {
        compilation.lock().await.set_end_time(now_millis());
    }

    async fn snapshot_stats(&self, compilation: &CompilationHandle<C>) -> Arc<Stats> {
        Arc::new(Stats::new(&*compilation.lock().await))
    }

    async fn sync_records_to_slot(&self, compilation: &CompilationHandle<C>) {
        if let Some(slot) = &self.records_slot {
            let child_records = compilation.lock().await.records().clone();
            let mut parent_records = slot.parent.records.lock().unwrap();
            let array = parent_records
                .as_object_mut()
                .expect("parent records root is always an object")
                .entry(slot.rel_name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = array {
                if slot.index < items.len() {
                    items[slot.index] = child_records;
                } else {
                    items.resize(slot.index, Value::Null);
                    items.push(child_records);
                }
            }
        }
    }

    /// `compile` (§4.5): the `beforeCompile → compile → thisCompilation →
    /// compilation → make → finishMake → finish → seal → afterCompile`
    /// sequence, producing one fresh `Compilation`.
    #[tracing::instrument(skip(self, start_time), fields(compiler = %self.compiler_path))]
    pub async fn compile_once(self: &Arc<Self>, start_time: u128) -> Result<CompilationHandle<C>> {
        let params = CompileParams {
            normal_module_factory: Arc::new(NormalModuleFactory),
            context_module_factory: Arc::new(ContextModuleFactory),
        };
        self.hooks.normal_module_factory.call(params.normal_module_factory.clone())?;
        self.hooks.context_module_factory.call(params.context_module_factory.clone())?;

        self.hooks.before_compile.call_async(params.clone()).await?;
        self.hooks.compile.call(params.clone())?;

        let records_snapshot = self.records.lock().unwrap().clone();
        let mut compilation = C::new(self.name(), records_snapshot);
        compilation.set_start_time(start_time);
        let handle: CompilationHandle<C> = Arc::new(AsyncMutex::new(compilation));

        self.hooks.this_compilation.call((handle.clone(), params.clone()))?;
        self.hooks.compilation.call((handle.clone(), params))?;

        self.hooks.make.call_async(handle.clone()).await?;
        self.hooks.finish_make.call_async(handle.clone()).await?;

        tokio::task::yield_now().await;

        {
            let mut guard = handle.lock().await;
            guard.finish().await?;
            guard.seal().await?;
        }

        self.hooks.after_compile.call_async(handle.clone()).await?;
        Ok(handle)
    }

    /// Convenience one-shot `compile`, used directly by `runAsChild` and by
    /// callers that only want a single pass without the full `run` pipeline.
    pub async fn compile(self: &Arc<Self>) -> Result<CompilationHandle<C>> {
        self.compile_once(now_millis()).await
    }

    fn name(&self) -> Option<String> {
        if self.compiler_path.is_empty() {
            None
        } else {
            Some(self.compiler_path.trim_end_matches('|').to_string())
        }
    }

    /// `watch` (§4.5): fails fast on `ConcurrentBuild` the same way `run`
    /// does, then hands the caller a `Watching` collaborator that owns all
    /// subsequent rebuild scheduling.
    pub fn watch(self: &Arc<Self>) -> Result<Watching<C>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown("compiler is closed".into()));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::ConcurrentBuild);
        }
        self.watch_mode.store(true, Ordering::SeqCst);
        Ok(Watching::new(self.clone()))
    }

    /// One watch-triggered rebuild. Unlike `run`, the `running` flag around
    /// this call is the caller's (`Watching`'s) responsibility — §5
    /// "`Watching` must serialise its own rebuilds; the driver does not" —
    /// so this assumes `running` is already `true` and skips the
    /// `ConcurrentBuild` check and initial flag swap.
    pub(crate) async fn watch_rebuild(self: &Arc<Self>) -> Result<Arc<Stats>> {
        let start_time = now_millis();
        if self.idle.swap(false, Ordering::SeqCst) {
            self.cache.end_idle().await?;
        }

        let ctx = self.context_handle();
        self.hooks.watch_run.call_async(ctx).await?;

        let fs = self.io_fs();
        let records = match &fs {
            Some(fs) => read_records(fs.as_ref(), self.options.records_input_path.as_deref()).await?,
            None => Value::Object(Default::default()),
        };
        *self.records.lock().unwrap() = records;

        let result = self.compile_loop(start_time).await;
        self.finalize(result).await
    }

    pub(crate) fn begin_rebuild(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Ends a watch session: resumes idle, clears `running`/`watchMode`.
    /// Distinct from `close`, which is terminal for the whole compiler.
    pub(crate) fn end_watch(&self) {
        self.cache.begin_idle();
        self.idle.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.watch_mode.store(false, Ordering::SeqCst);
    }

    /// `runAsChild` (§4.5/§4.6): one `compile`, republished into the parent.
    pub async fn run_as_child(self: &Arc<Self>) -> Result<(Vec<Entrypoint>, CompilationHandle<C>)> {
        let compilation = self.compile().await?;

        if let Some(parent_handle) = self.parent_compilation.lock().unwrap().clone() {
            let mut parent = parent_handle.lock().await;
            let mut child = compilation.lock().await;
            for asset in child.get_assets() {
                parent.emit_asset(asset.name, asset.source, asset.info);
            }
        }

        if let Some(slot) = &self.records_slot {
            slot.parent.children.lock().unwrap().push(self.clone());
        }

        let entrypoints = compilation.lock().await.entrypoints();
        Ok((entrypoints, compilation))
    }

    /// `close` (§4.5): delegates to the cache; terminal afterwards.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.cache.shutdown().await
    }

    /// `createChildCompiler` (§4.6), delegated to its own module. `compilation`
    /// is the parent's in-flight compilation at the point of creation.
    pub fn create_child(
        self: &Arc<Self>,
        compilation: CompilationHandle<C>,
        name: &str,
        index: usize,
        output_overlay: impl FnOnce(&mut crate::options::OutputOptions),
        plugins: impl FnOnce(&mut CompilerHooks<C>),
    ) -> CompilerHandle<C> {
        create_child_compiler(self, compilation, name, index, output_overlay, plugins)
    }

    fn finalize_result_collapse(arc: Arc<Error>) -> Error {
        Arc::try_unwrap(arc).unwrap_or_else(|arc| Error::Argument(arc.to_string()))
    }

    /// Finalisation (§4.5): idempotent bookkeeping that runs exactly once
    /// per `run`, regardless of whether the build succeeded.
    async fn finalize(&self, result: Result<Arc<Stats>>) -> Result<Arc<Stats>> {
        self.cache.begin_idle();
        self.idle.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        match result {
            Ok(stats) => {
                self.hooks.after_done.call(Some(stats.clone()))?;
                Ok(stats)
            }
            Err(err) => {
                let shared = Arc::new(err);
                self.hooks.failed.call(shared.clone())?;
                self.hooks.after_done.call(None)?;
                Err(Self::finalize_result_collapse(shared))
            }
        }
    }

    // Exposed for `create_child_compiler` and tests; not part of the public
    // surface plugins are expected to reach for directly.
    pub(crate) fn input_fs(&self) -> Arc<dyn ReadableFileSystem> {
        self.input_fs.clone()
    }

    pub(crate) fn cache_handle(&self) -> Arc<dyn Cache> {
        self.cache.clone()
    }

    pub(crate) fn root_weak(self: &Arc<Self>) -> Weak<Compiler<C>> {
        match &self.root {
            Some(weak) => weak.clone(),
            None => Arc::downgrade(self),
        }
    }

    pub(crate) fn records_value(&self) -> Value {
        self.records.lock().unwrap().clone()
    }

    pub(crate) fn children_snapshot(&self) -> Vec<CompilerHandle<C>> {
        self.children.lock().unwrap().clone()
    }

    /// Wires a child's records aliasing bookkeeping and seeds its initial
    /// `records` snapshot (§4.6 "records slicing").
    pub(crate) fn with_records_slot(
        mut self,
        parent: CompilerHandle<C>,
        rel_name: String,
        index: usize,
        initial_records: Value,
    ) -> Self {
        self.records_slot = Some(RecordsSlot { parent, rel_name, index });
        self.records = SyncMutex::new(initial_records);
        self
    }

    pub(crate) fn with_parent_compilation(self, parent_compilation: CompilationHandle<C>) -> Self {
        *self.parent_compilation.lock().unwrap() = Some(parent_compilation);
        self
    }

    pub(crate) fn with_root(mut self, root: Weak<Compiler<C>>) -> Self {
        self.root = Some(root);
        self
    }

    pub(crate) fn with_compiler_path(mut self, path: Arc<str>) -> Self {
        self.compiler_path = path;
        self
    }

    pub(crate) fn append_child(&self, child: CompilerHandle<C>) {
        self.children.lock().unwrap().push(child);
    }

    /// Ensures `self.records[rel_name]` is an array at least `index + 1`
    /// long, creating a fresh object at `index` if nothing is there yet,
    /// and returns a clone of that slot for a new child to start from
    /// (§4.6 "records slicing").
    pub(crate) fn ensure_records_slot(&self, rel_name: &str, index: usize) -> Value {
        let mut records = self.records.lock().unwrap();
        let root = records
            .as_object_mut()
            .expect("records root is always an object");
        let array = root.entry(rel_name.to_string()).or_insert_with(|| Value::Array(Vec::new()));
        if !array.is_array() {
            *array = Value::Array(Vec::new());
        }
        let items = array.as_array_mut().unwrap();
        while items.len() <= index {
            items.push(Value::Object(Default::default()));
        }
        items[index].clone()
    }
}

fn clone_infra_hook(
    hook: &kiln_hook::SyncBailHook<(Arc<str>, crate::logger::LogType, Arc<str>), bool>,
) -> kiln_hook::SyncBailHook<(Arc<str>, crate::logger::LogType, Arc<str>), bool> {
    let mut clone = kiln_hook::SyncBailHook::new();
    clone.inherit_from(hook);
    clone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{CompilerOptions, OutputOptions};
    use crate::source::{AssetEntry, AssetInfo, RawSource, Source};
    use async_trait::async_trait;
    use kiln_fs::MemoryFileSystem;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct MockCompilation {
        name: Option<String>,
        assets: BTreeMap<String, AssetEntry>,
        emitted: BTreeSet<String>,
        compared: BTreeSet<PathBuf>,
        records: Value,
        start_time: Option<u128>,
        end_time: Option<u128>,
        force_additional_pass: AtomicBool,
    }

    #[async_trait]
    impl Compilation for MockCompilation {
        fn get_assets(&self) -> Vec<AssetEntry> {
            self.assets.values().cloned().collect()
        }

        fn update_asset(&mut self, name: &str, source: Arc<dyn Source>, info: AssetInfo) {
            if let Some(entry) = self.assets.get_mut(name) {
                entry.source = source;
                entry.info = info;
            }
        }

        fn emit_asset(&mut self, name: String, source: Arc<dyn Source>, info: AssetInfo) {
            self.assets.insert(name.clone(), AssetEntry { name, source, info });
        }

        async fn finish(&mut self) -> Result<()> {
            Ok(())
        }

        async fn seal(&mut self) -> Result<()> {
            Ok(())
        }

        fn emitted_assets(&self) -> BTreeSet<String> {
            self.emitted.clone()
        }

        fn emitted_assets_mut(&mut self) -> &mut BTreeSet<String> {
            &mut self.emitted
        }

        fn compared_for_emit_assets_mut(&mut self) -> &mut BTreeSet<PathBuf> {
            &mut self.compared
        }

        fn build_dependencies(&self) -> Vec<PathBuf> {
            Vec::new()
        }

        fn name(&self) -> Option<&str> {
            self.name.as_deref()
        }

        fn records(&self) -> &Value {
            &self.records
        }

        fn set_records(&mut self, records: Value) {
            self.records = records;
        }

        fn start_time(&self) -> Option<u128> {
            self.start_time
        }

        fn set_start_time(&mut self, t: u128) {
            self.start_time = Some(t);
        }

        fn end_time(&self) -> Option<u128> {
            self.end_time
        }

        fn set_end_time(&mut self, t: u128) {
            self.end_time = Some(t);
        }

        fn entrypoints(&self) -> Vec<Entrypoint> {
            Vec::new()
        }

        fn need_additional_pass(&self) -> bool {
            self.force_additional_pass.swap(false, Ordering::SeqCst)
        }
    }

    impl NewCompilation for MockCompilation {
        fn new(name: Option<String>, records: Value) -> Self {
            Self {
                name,
                records,
                ..Default::default()
            }
        }
    }

    fn options(tmp_records_out: Option<&str>) -> CompilerOptions {
        CompilerOptions {
            context: PathBuf::from("/src"),
            output: OutputOptions {
                path: PathBuf::from("/out"),
                compare_before_emit: true,
                clean: false,
            },
            records_input_path: None,
            records_output_path: tmp_records_out.map(PathBuf::from),
            ..Default::default()
        }
    }

    fn raw_compiler(fs: Arc<MemoryFileSystem>, out: Option<&str>) -> Compiler<MockCompilation> {
        Compiler::<MockCompilation>::new(options(out), fs.clone())
            .with_output_fs(fs.clone())
            .with_intermediate_fs(fs)
    }

    /// Seeds each freshly constructed `Compilation` with the two assets in
    /// `assets`, synchronously, via `try_lock` — the `compilation` hook's
    /// handle has no other holder yet at the point it fires.
    fn seed_assets(compiler: &mut Compiler<MockCompilation>, assets: &'static [(&'static str, &'static str)]) {
        compiler.hooks.compilation.tap("seed-assets", move |(compilation, _params)| {
            let mut c = compilation.try_lock().expect("freshly constructed compilation is uncontended");
            for (name, content) in assets {
                c.emit_asset((*name).into(), Arc::new(RawSource::from_string(*content)), AssetInfo::default());
            }
            Ok(())
        });
    }

    #[tokio::test]
    async fn s1_fresh_emit_writes_every_asset_once() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut raw = raw_compiler(fs.clone(), None);
        seed_assets(&mut raw, &[("a.js", "A"), ("b.js", "B")]);
        let compiler = raw.handle();

        let stats = compiler.run().await.unwrap();
        assert!(stats.end_time.is_some());
        assert_eq!(fs.read_file(Path::new("/out/a.js")).await.unwrap(), b"A");
        assert_eq!(fs.read_file(Path::new("/out/b.js")).await.unwrap(), b"B");
        assert_eq!(compiler.emission_state.generation_of(Path::new("/out/a.js")), Some(1));
        assert_eq!(compiler.emission_state.generation_of(Path::new("/out/b.js")), Some(1));
    }

    #[tokio::test]
    async fn s2_rebuild_of_the_same_source_is_skipped() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut raw = raw_compiler(fs.clone(), None);
        // The same `Source` allocation is handed to every fresh compilation
        // this compiler builds, the way a cache-stable module graph would.
        let source: Arc<dyn Source> = Arc::new(RawSource::from_string("A"));
        raw.hooks.compilation.tap("seed-shared-source", move |(compilation, _params)| {
            let mut c = compilation.try_lock().expect("freshly constructed compilation is uncontended");
            c.emit_asset("a.js".into(), source.clone(), AssetInfo::default());
            Ok(())
        });
        let compiler = raw.handle();

        compiler.run().await.unwrap();
        assert_eq!(compiler.emission_state.generation_of(Path::new("/out/a.js")), Some(1));

        compiler.run().await.unwrap();
        assert_eq!(compiler.emission_state.generation_of(Path::new("/out/a.js")), Some(1));
    }

    #[tokio::test]
    async fn concurrent_run_fails_fast() {
        let fs = Arc::new(MemoryFileSystem::new());
        let compiler = raw_compiler(fs, None).handle();
        compiler.running.store(true, Ordering::SeqCst);
        let err = compiler.run().await.unwrap_err();
        assert!(matches!(err, Error::ConcurrentBuild));
        assert!(compiler.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closed_compiler_refuses_new_runs() {
        let fs = Arc::new(MemoryFileSystem::new());
        let compiler = raw_compiler(fs, None).handle();
        compiler.close().await.unwrap();
        let err = compiler.run().await.unwrap_err();
        assert!(matches!(err, Error::Shutdown(_)));
    }

    #[tokio::test]
    async fn s3_case_collision_propagates_from_a_full_run() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut raw = raw_compiler(fs.clone(), None);
        seed_assets(&mut raw, &[("Foo.js", "x"), ("foo.js", "y")]);
        let compiler = raw.handle();

        let err = compiler.run().await.unwrap_err();
        assert!(matches!(err, Error::CaseCollision { .. }));
        assert!(fs.read_file(Path::new("/out/Foo.js")).await.is_err());
    }

    #[tokio::test]
    async fn s5_records_round_trip_through_a_full_run() {
        let fs = Arc::new(MemoryFileSystem::new());
        let seed = serde_json::json!({ "z": 1, "a": { "c": 3, "b": 2 } });
        fs.write_file(Path::new("/records-in.json"), serde_json::to_vec(&seed).unwrap().as_slice())
            .await
            .unwrap();

        let opts = CompilerOptions {
            records_input_path: Some(PathBuf::from("/records-in.json")),
            ..options(Some("/out/records.json"))
        };
        let raw = Compiler::<MockCompilation>::new(opts, fs.clone())
            .with_output_fs(fs.clone())
            .with_intermediate_fs(fs.clone());
        let compiler = raw.handle();
        compiler.run().await.unwrap();

        let on_disk = fs.read_file(Path::new("/out/records.json")).await.unwrap();
        let text = String::from_utf8(on_disk).unwrap();
        assert!(text.starts_with("{\n  \"a\":"));
    }

    #[tokio::test]
    async fn s6_additional_pass_runs_done_twice_and_records_once() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut raw = raw_compiler(fs.clone(), Some("/out/records.json"));

        let passes_seen = Arc::new(AtomicUsize::new(0));
        let ps = passes_seen.clone();
        raw.hooks.compilation.tap("force-one-extra-pass", move |(compilation, _params)| {
            let pass_index = ps.fetch_add(1, Ordering::SeqCst);
            if pass_index == 0 {
                let c = compilation.try_lock().expect("freshly constructed compilation is uncontended");
                c.force_additional_pass.store(true, Ordering::SeqCst);
            }
            Ok(())
        });

        let done_count = Arc::new(AtomicUsize::new(0));
        let dc = done_count.clone();
        raw.hooks.done.tap("counter", move |_stats| {
            dc.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        });

        let compiler = raw.handle();
        compiler.run().await.unwrap();

        assert_eq!(passes_seen.load(Ordering::SeqCst), 2);
        assert_eq!(done_count.load(Ordering::SeqCst), 2);
        assert!(fs.read_file(Path::new("/out/records.json")).await.is_ok());
    }
}
