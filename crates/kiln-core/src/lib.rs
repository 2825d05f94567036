//! The compilation driver core: hook bus, records store, filesystem
//! abstraction, asset emission engine, and the `Compiler`/`Watching`
//! lifecycle that ties them together. Module graph construction itself
//! (`Compilation`, resolvers, factories) is an external collaborator whose
//! interface contracts live in [`collaborators`].

pub mod child;
pub mod collaborators;
pub mod compiler;
pub mod emit;
pub mod hooks;
pub mod logger;
pub mod options;
pub mod records;
pub mod source;
pub mod watching;

pub use child::create_child_compiler;
pub use collaborators::{Cache, CompileParams, Compilation, Entrypoint, NewCompilation, NoopCache, PathData, Stats};
pub use compiler::{ChangeTracking, Compiler, CompilerHandle};
pub use emit::{emit_assets, EmissionState, EmitOutcome};
pub use hooks::{AssetEmittedInfo, CompilationHandle, CompilerContext, CompilerHooks};
pub use logger::{InfrastructureLogHook, LogType, Logger};
pub use options::{CompilerOptions, OutputOptions, WatchOptions};
pub use records::{emit_records, read_records, sort_keys};
pub use source::{extract_bytes, AssetEntry, AssetInfo, RawSource, SizeOnlySource, Source, SourceContent};
pub use watching::Watching;

pub use kiln_error::{Error, Result};
pub use kiln_fs::{join, mkdirp, Metadata, ReadableFileSystem, WritableFileSystem};
