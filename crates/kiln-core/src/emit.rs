//! The asset emission engine (§4.4): a bounded-concurrency writer with
//! write-skip, content-compare and case-collision detection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use kiln_error::{Error, Result};
use kiln_fs::{mkdirp, WritableFileSystem};
use tokio::sync::Semaphore;

use crate::collaborators::Compilation;
use crate::hooks::{AssetEmittedInfo, CompilationHandle};
use crate::source::{extract_bytes, AssetEntry, Source, SizeOnlySource};

const MAX_CONCURRENT_WRITES: usize = 15;

/// Per-compiler bookkeeping for `assetEmittingWrittenFiles` and
/// `assetEmittingSourceCache` (§3). Lives alongside the compiler for its
/// whole lifetime; a child compiler gets its own, fresh instance.
#[derive(Debug, Default)]
pub struct EmissionState {
    written_files: DashMap<PathBuf, u64>,
    source_entries: DashMap<usize, SourceCacheEntry>,
}

#[derive(Debug)]
struct SourceCacheEntry {
    source: Weak<dyn Source>,
    written_to: DashMap<PathBuf, u64>,
}

/// Identifies a `Source` by its allocation address, not its content —
/// the key the cache and the skip rules are built around.
fn source_key(source: &Arc<dyn Source>) -> usize {
    Arc::as_ptr(source) as *const u8 as usize
}

impl EmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops cache entries whose source has no strong reference left. Run
    /// once at the start of every emission (§4.4 "Source-identity cache
    /// lifetime").
    fn sweep_dead_sources(&self) {
        self.source_entries
            .retain(|_, entry| entry.source.upgrade().is_some());
    }

    #[cfg(test)]
    pub fn generation_of(&self, path: &Path) -> Option<u64> {
        self.written_files.get(path).map(|g| *g)
    }
}

/// Outcome of one emission pass, surfaced for tests and for the driver's
/// own bookkeeping (§8 S1/S2).
#[derive(Debug, Default, Clone)]
pub struct EmitOutcome {
    pub emitted: std::collections::BTreeSet<String>,
    pub compared: std::collections::BTreeSet<PathBuf>,
}

/// Runs the `emit` pipeline: mkdir the output path, resolve every asset's
/// target path while detecting case collisions, then run the write
/// protocol for each asset with at most [`MAX_CONCURRENT_WRITES`] in flight.
pub async fn emit_assets<FS, C>(
    fs: &FS,
    state: &EmissionState,
    output_path: &Path,
    compare_before_emit: bool,
    compilation: CompilationHandle<C>,
    asset_emitted: &kiln_hook::AsyncSeriesHook<AssetEmittedInfo<C>>,
) -> Result<EmitOutcome>
where
    FS: WritableFileSystem + ?Sized,
    C: Compilation,
{
    mkdirp(fs, output_path).await?;
    state.sweep_dead_sources();

    let assets = compilation.lock().await.get_assets();
    let targets = resolve_targets(output_path, &assets)?;

    let semaphore = Semaphore::new(MAX_CONCURRENT_WRITES);
    let outcome = tokio::sync::Mutex::new(EmitOutcome::default());

    let writes = targets.into_iter().map(|(asset, target_path)| {
        let semaphore = &semaphore;
        let compilation = compilation.clone();
        let outcome = &outcome;
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
            let result = write_one(
                fs,
                state,
                compare_before_emit,
                &asset,
                &target_path,
                compilation,
                asset_emitted,
            )
            .await?;
            if let Some(compared_path) = result.compared_path {
                outcome.lock().await.compared.insert(compared_path);
            }
            if result.emitted {
                outcome.lock().await.emitted.insert(asset.name.clone());
            }
            Ok(())
        }
    });

    futures::future::try_join_all(writes).await?;
    Ok(outcome.into_inner())
}

/// `targetFile`/`targetPath` resolution plus the case-collision pre-pass
/// (steps 1-4): entirely synchronous, so detection never races the
/// concurrent write pool.
fn resolve_targets(
    output_path: &Path,
    assets: &[AssetEntry],
) -> Result<Vec<(AssetEntry, PathBuf)>> {
    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut resolved = Vec::with_capacity(assets.len());
    for asset in assets {
        let target_file = asset.name.split('?').next().unwrap();
        let target_path = kiln_fs::join(output_path, target_file);
        let key = target_path.to_string_lossy().to_lowercase();
        match seen.get(&key) {
            Some(existing) => {
                return Err(Error::CaseCollision {
                    first: existing.clone(),
                    second: target_path,
                });
            }
            None => {
                seen.insert(key, target_path.clone());
            }
        }
        resolved.push((asset.clone(), target_path));
    }
    Ok(resolved)
}

struct WriteResult {
    emitted: bool,
    compared_path: Option<PathBuf>,
}

/// The per-asset write protocol (steps 2, 5-12).
async fn write_one<FS, C>(
    fs: &FS,
    state: &EmissionState,
    compare_before_emit: bool,
    asset: &AssetEntry,
    target_path: &Path,
    compilation: CompilationHandle<C>,
    asset_emitted: &kiln_hook::AsyncSeriesHook<AssetEmittedInfo<C>>,
) -> Result<WriteResult>
where
    FS: WritableFileSystem + ?Sized,
    C: Compilation,
{
    if let Some(parent) = target_path.parent() {
        if parent != Path::new("") {
            mkdirp(fs, parent).await?;
        }
    }

    let key = source_key(&asset.source);
    let entry_written_gen = {
        let entry = state
            .source_entries
            .entry(key)
            .or_insert_with(|| SourceCacheEntry {
                source: Arc::downgrade(&asset.source),
                written_to: DashMap::new(),
            });
        entry.written_to.get(target_path).map(|g| *g)
    };

    let generation = state.written_files.get(target_path).map(|g| *g);

    // Step 7: a source already known-equal to disk at this path, by this
    // compiler, is skipped outright.
    if let (Some(g), Some(wg)) = (generation, entry_written_gen) {
        if g == wg {
            install_size_only(&compilation, asset).await;
            return Ok(WriteResult {
                emitted: false,
                compared_path: None,
            });
        }
    }

    let content = extract_bytes(asset.source.as_ref());

    let mut compared_path = None;
    let mut should_write = true;

    if generation.is_none() && compare_before_emit {
        if let Ok(meta) = fs.stat(target_path).await {
            if meta.is_file && meta.len as usize == content.len() {
                let existing = fs.read_file(target_path).await?;
                if existing == content {
                    compared_path = Some(target_path.to_path_buf());
                    should_write = false;
                }
            }
        }
    }

    if should_write {
        fs.write_file(target_path, &content).await?;
    }

    let new_generation = generation.unwrap_or(0) + 1;
    state
        .written_files
        .insert(target_path.to_path_buf(), new_generation);
    state
        .source_entries
        .entry(key)
        .or_insert_with(|| SourceCacheEntry {
            source: Arc::downgrade(&asset.source),
            written_to: DashMap::new(),
        })
        .written_to
        .insert(target_path.to_path_buf(), new_generation);

    {
        let mut guard = compilation.lock().await;
        guard.emitted_assets_mut().insert(asset.name.clone());
        if let Some(path) = &compared_path {
            guard.compared_for_emit_assets_mut().insert(path.clone());
        }
    }

    if should_write {
        asset_emitted
            .call_async(AssetEmittedInfo {
                file: Arc::from(asset.name.as_str()),
                content: Arc::new(content),
                source: asset.source.clone(),
                output_path: Arc::from(target_path.parent().unwrap_or(target_path)),
                compilation: compilation.clone(),
                target_path: Arc::from(target_path),
            })
            .await?;
    }

    install_size_only(&compilation, asset).await;

    Ok(WriteResult {
        emitted: should_write,
        compared_path,
    })
}

async fn install_size_only<C: Compilation>(compilation: &CompilationHandle<C>, asset: &AssetEntry) {
    let size_only = Arc::new(SizeOnlySource::new(asset.source.size()));
    compilation
        .lock()
        .await
        .update_asset(&asset.name, size_only, asset.info.clone());
}
