//! Child compiler composition (§4.6): a derived `Compiler` sharing a
//! parent's input filesystem, cache, root and change-tracking state, with
//! its `records` aliased to a slice of the parent's and a hook table that
//! inherits every tap except the lifecycle/emission set.
//!
//! The `childCompiler` hook named in §6 lives on the `Compilation`
//! collaborator, which this core treats as an opaque, out-of-scope
//! interface (no hook bus of its own is modeled for it); only the
//! Compiler-level effects of `createChildCompiler` — hook inheritance,
//! records slicing, shared state — are implemented here.

use std::sync::Arc;

use crate::collaborators::NewCompilation;
use crate::compiler::{Compiler, CompilerHandle};
use crate::hooks::{CompilationHandle, CompilerHooks};
use crate::options::OutputOptions;

/// `createChildCompiler(compilation, name, index, outputOptions, plugins)`.
/// `compilation` is the parent's in-flight compilation at the point the
/// child is spun up; `output_overlay` applies the caller's `output`
/// overrides; `plugins` taps the child's fresh hook table before it is
/// wrapped in its handle.
pub fn create_child_compiler<C: NewCompilation>(
    parent: &CompilerHandle<C>,
    compilation: CompilationHandle<C>,
    name: &str,
    index: usize,
    output_overlay: impl FnOnce(&mut OutputOptions),
    plugins: impl FnOnce(&mut CompilerHooks<C>),
) -> CompilerHandle<C> {
    let compiler_path: Arc<str> = Arc::from(format!("{}{name}|{index}|", parent.compiler_path));
    let initial_records = parent.ensure_records_slot(name, index);

    let mut options = parent.options.clone();
    output_overlay(&mut options.output);

    let mut child = Compiler::<C>::new(options, parent.input_fs())
        .with_cache(parent.cache_handle())
        .with_root(parent.root_weak())
        .with_compiler_path(compiler_path)
        .with_records_slot(parent.clone(), name.to_string(), index, initial_records)
        .with_parent_compilation(compilation);

    // Child does not emit to disk by default: output_fs/intermediate_fs stay
    // unset, the way `Compiler::new` left them.
    child.change_tracking = parent.change_tracking.clone();

    parent.hooks.inherit_into(&mut child.hooks);
    plugins(&mut child.hooks);

    let handle = child.handle();
    parent.append_child(handle.clone());
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Compilation, Entrypoint};
    use crate::options::CompilerOptions;
    use crate::source::{AssetEntry, AssetInfo, Source};
    use async_trait::async_trait;
    use kiln_error::Result;
    use kiln_fs::MemoryFileSystem;
    use serde_json::Value;
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Debug, Default)]
    struct StubCompilation {
        assets: BTreeMap<String, AssetEntry>,
        emitted: BTreeSet<String>,
        compared: BTreeSet<PathBuf>,
        records: Value,
    }

    #[async_trait]
    impl Compilation for StubCompilation {
        fn get_assets(&self) -> Vec<AssetEntry> {
            self.assets.values().cloned().collect()
        }
        fn update_asset(&mut self, _name: &str, _source: Arc<dyn Source>, _info: AssetInfo) {}
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
            None
        }
        fn records(&self) -> &Value {
            &self.records
        }
        fn set_records(&mut self, records: Value) {
            self.records = records;
        }
        fn start_time(&self) -> Option<u128> {
            None
        }
        fn set_start_time(&mut self, _t: u128) {}
        fn end_time(&self) -> Option<u128> {
            None
        }
        fn set_end_time(&mut self, _t: u128) {}
        fn entrypoints(&self) -> Vec<Entrypoint> {
            Vec::new()
        }
    }

    impl NewCompilation for StubCompilation {
        fn new(_name: Option<String>, records: Value) -> Self {
            Self { records, ..Default::default() }
        }
    }

    fn parent_compiler(fs: Arc<MemoryFileSystem>) -> CompilerHandle<StubCompilation> {
        let options = CompilerOptions {
            context: PathBuf::from("/src"),
            ..Default::default()
        };
        Compiler::<StubCompilation>::new(options, fs).handle()
    }

    #[test]
    fn compiler_path_is_namespaced_under_the_parent() {
        let fs = Arc::new(MemoryFileSystem::new());
        let parent = parent_compiler(fs);
        let compilation: CompilationHandle<StubCompilation> = Arc::new(AsyncMutex::new(StubCompilation::default()));
        let child = create_child_compiler(&parent, compilation, "sub", 0, |_| {}, |_| {});
        assert_eq!(&*child.compiler_path, "sub|0|");
        assert!(child.is_child());
    }

    #[test]
    fn lifecycle_and_emission_taps_are_not_inherited() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut raw = Compiler::<StubCompilation>::new(
            CompilerOptions { context: PathBuf::from("/src"), ..Default::default() },
            fs,
        );
        raw.hooks.make.tap("parent-make", |_| async { Ok(()) });
        raw.hooks.after_plugins.tap("parent-after-plugins", |_| Ok(()));
        let parent = raw.handle();

        let compilation: CompilationHandle<StubCompilation> = Arc::new(AsyncMutex::new(StubCompilation::default()));
        let child = create_child_compiler(&parent, compilation, "sub", 0, |_| {}, |_| {});

        assert!(child.hooks.make.is_empty());
        assert!(!child.hooks.after_plugins.is_empty());
    }

    #[test]
    fn records_slicing_creates_an_array_keyed_by_name() {
        let fs = Arc::new(MemoryFileSystem::new());
        let parent = parent_compiler(fs);
        let compilation: CompilationHandle<StubCompilation> = Arc::new(AsyncMutex::new(StubCompilation::default()));
        let _first = create_child_compiler(&parent, compilation.clone(), "sub", 0, |_| {}, |_| {});
        let _second = create_child_compiler(&parent, compilation, "sub", 1, |_| {}, |_| {});

        let records = parent.records_value();
        let array = records.get("sub").unwrap().as_array().unwrap();
        assert_eq!(array.len(), 2);
    }
}
