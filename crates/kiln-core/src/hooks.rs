//! The hook catalogue (§6), frozen at `Compiler` construction. Membership
//! and kind never change after `CompilerHooks::new`; only each hook's tap
//! list mutates as plugins register.

use std::path::Path;
use std::sync::Arc;

use kiln_error::Error;
use kiln_hook::{AsyncParallelHook, AsyncSeriesHook, SyncBailHook, SyncHook};
use tokio::sync::Mutex as AsyncMutex;

use crate::collaborators::{CompileParams, Compilation, ContextModuleFactory, NormalModuleFactory, Stats};
use crate::source::Source;

/// Cheap, `Clone`-able handle to a compiler's identity, passed to hooks
/// that only observe the compiler (`afterPlugins`, `afterResolvers`,
/// `beforeRun`, `run`, `watchRun`).
#[derive(Debug, Clone)]
pub struct CompilerContext {
    pub context: Arc<Path>,
    pub compiler_path: Arc<str>,
    pub output_path: Arc<Path>,
}

/// Shared, lockable handle to the in-flight `Compilation`. Hooks that may
/// run concurrently (`make`, an `AsyncParallelHook`) are handed this rather
/// than a bare `&mut`, so concurrent taps serialise through the lock instead
/// of racing on the same mutable state.
pub type CompilationHandle<C> = Arc<AsyncMutex<C>>;

pub struct AssetEmittedInfo<C: Compilation> {
    pub file: Arc<str>,
    pub content: Arc<Vec<u8>>,
    pub source: Arc<dyn Source>,
    pub output_path: Arc<Path>,
    pub compilation: CompilationHandle<C>,
    pub target_path: Arc<Path>,
}

// Every field is already `Arc`-wrapped, so cloning never needs `C: Clone`;
// `#[derive(Clone)]` would add that bound anyway since it appears in the
// struct's generic parameter list.
impl<C: Compilation> Clone for AssetEmittedInfo<C> {
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            content: self.content.clone(),
            source: self.source.clone(),
            output_path: self.output_path.clone(),
            compilation: self.compilation.clone(),
            target_path: self.target_path.clone(),
        }
    }
}

pub struct CompilerHooks<C: Compilation> {
    // Sync, no params
    pub initialize: SyncHook<()>,
    pub environment: SyncHook<()>,
    pub after_environment: SyncHook<()>,
    pub watch_close: SyncHook<()>,

    // Sync, compiler
    pub after_plugins: SyncHook<CompilerContext>,
    pub after_resolvers: SyncHook<CompilerContext>,

    // SyncBail
    pub entry_option: SyncBailHook<(Arc<Path>, Arc<str>), bool>,
    pub should_emit: SyncBailHook<CompilationHandle<C>, bool>,
    pub infrastructure_log: SyncBailHook<(Arc<str>, crate::logger::LogType, Arc<str>), bool>,

    // Sync, compilation/params
    pub this_compilation: SyncHook<(CompilationHandle<C>, CompileParams)>,
    pub compilation: SyncHook<(CompilationHandle<C>, CompileParams)>,
    pub normal_module_factory: SyncHook<Arc<NormalModuleFactory>>,
    pub context_module_factory: SyncHook<Arc<ContextModuleFactory>>,
    pub compile: SyncHook<CompileParams>,
    pub invalid: SyncHook<(Arc<str>, u128)>,
    pub failed: SyncHook<Arc<Error>>,
    /// `None` when a build failed before a `Stats` snapshot could be taken.
    pub after_done: SyncHook<Option<Arc<Stats>>>,

    // AsyncSeries
    pub before_run: AsyncSeriesHook<CompilerContext>,
    pub run: AsyncSeriesHook<CompilerContext>,
    pub watch_run: AsyncSeriesHook<CompilerContext>,
    pub before_compile: AsyncSeriesHook<CompileParams>,
    pub after_compile: AsyncSeriesHook<CompilationHandle<C>>,
    pub emit: AsyncSeriesHook<CompilationHandle<C>>,
    pub after_emit: AsyncSeriesHook<CompilationHandle<C>>,
    pub asset_emitted: AsyncSeriesHook<AssetEmittedInfo<C>>,
    pub done: AsyncSeriesHook<Arc<Stats>>,
    pub additional_pass: AsyncSeriesHook<()>,
    pub finish_make: AsyncSeriesHook<CompilationHandle<C>>,

    // AsyncParallel
    pub make: AsyncParallelHook<CompilationHandle<C>>,
}

impl<C: Compilation> std::fmt::Debug for CompilerHooks<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerHooks").finish_non_exhaustive()
    }
}

impl<C: Compilation> Default for CompilerHooks<C> {
    fn default() -> Self {
        Self {
            initialize: SyncHook::new(),
            environment: SyncHook::new(),
            after_environment: SyncHook::new(),
            watch_close: SyncHook::new(),

            after_plugins: SyncHook::new(),
            after_resolvers: SyncHook::new(),

            entry_option: SyncBailHook::new(),
            should_emit: SyncBailHook::new(),
            infrastructure_log: SyncBailHook::new(),

            this_compilation: SyncHook::new(),
            compilation: SyncHook::new(),
            normal_module_factory: SyncHook::new(),
            context_module_factory: SyncHook::new(),
            compile: SyncHook::new(),
            invalid: SyncHook::new(),
            failed: SyncHook::new(),
            after_done: SyncHook::new(),

            before_run: AsyncSeriesHook::new(),
            run: AsyncSeriesHook::new(),
            watch_run: AsyncSeriesHook::new(),
            before_compile: AsyncSeriesHook::new(),
            after_compile: AsyncSeriesHook::new(),
            emit: AsyncSeriesHook::new(),
            after_emit: AsyncSeriesHook::new(),
            asset_emitted: AsyncSeriesHook::new(),
            done: AsyncSeriesHook::new(),
            additional_pass: AsyncSeriesHook::new(),
            finish_make: AsyncSeriesHook::new(),

            make: AsyncParallelHook::new(),
        }
    }
}

impl<C: Compilation> CompilerHooks<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies every hook's taps into `child`, excluding the lifecycle and
    /// emission hooks listed in §4.6 so a child compiler never duplicates
    /// its parent's `make`/`compile`/`emit`/`afterEmit`/`invalid`/`done`/
    /// `thisCompilation` behaviour.
    pub fn inherit_into(&self, child: &mut Self) {
        child.initialize.inherit_from(&self.initialize);
        child.environment.inherit_from(&self.environment);
        child.after_environment.inherit_from(&self.after_environment);
        child.watch_close.inherit_from(&self.watch_close);
        child.after_plugins.inherit_from(&self.after_plugins);
        child.after_resolvers.inherit_from(&self.after_resolvers);
        child.entry_option.inherit_from(&self.entry_option);
        child.should_emit.inherit_from(&self.should_emit);
        child.infrastructure_log.inherit_from(&self.infrastructure_log);
        child.compilation.inherit_from(&self.compilation);
        child.normal_module_factory.inherit_from(&self.normal_module_factory);
        child.context_module_factory.inherit_from(&self.context_module_factory);
        child.failed.inherit_from(&self.failed);
        child.after_done.inherit_from(&self.after_done);
        child.before_run.inherit_from(&self.before_run);
        child.run.inherit_from(&self.run);
        child.watch_run.inherit_from(&self.watch_run);
        child.before_compile.inherit_from(&self.before_compile);
        child.after_compile.inherit_from(&self.after_compile);
        child.asset_emitted.inherit_from(&self.asset_emitted);
        child.additional_pass.inherit_from(&self.additional_pass);
        child.finish_make.inherit_from(&self.finish_make);

        // Deliberately excluded per §4.6:
        // make, compile, emit, after_emit, invalid, done, this_compilation.
    }

    /// Names excluded from inheritance, exposed for tests that want to
    /// assert against the catalogue directly rather than duplicate it.
    pub const NOT_INHERITED: &'static [&'static str] =
        &["make", "compile", "emit", "afterEmit", "invalid", "done", "thisCompilation"];
}
