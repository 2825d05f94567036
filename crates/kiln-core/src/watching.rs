//! The watch-mode collaborator (C7, §4.5/§6): takes over per-change
//! rebuild responsibility once `Compiler::watch` hands it out. Treated as
//! an external interface in the distilled scope — the actual filesystem
//! watcher that decides *when* a file changed is out of scope here; this
//! only implements what a caller driving that watcher needs to trigger and
//! end rebuilds correctly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_error::{Error, Result};
use tokio::sync::Mutex as AsyncMutex;

use crate::collaborators::{NewCompilation, Stats};
use crate::compiler::{now_millis, CompilerHandle};

/// Owns per-change rebuild serialisation for one `watch` session. `running`
/// on the underlying `Compiler` is toggled around each rebuild by this
/// type, not by the driver (§5 re-entrancy).
pub struct Watching<C: NewCompilation> {
    compiler: CompilerHandle<C>,
    rebuild_lock: AsyncMutex<()>,
    closed: AtomicBool,
}

impl<C: NewCompilation> Watching<C> {
    pub(crate) fn new(compiler: CompilerHandle<C>) -> Self {
        Self {
            compiler,
            rebuild_lock: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Triggers one rebuild as though `filename` changed just now. Fires
    /// `invalid(filename, changeTime)` first, then runs the same
    /// `compile` → emit → `additionalPass` sequence `run` does. Rebuilds
    /// triggered through the same `Watching` are serialised; a rebuild
    /// requested after `close` fails with `Shutdown`.
    pub async fn invalidate(&self, filename: impl Into<Arc<str>>) -> Result<Arc<Stats>> {
        let _guard = self.rebuild_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Shutdown("watch session is closed".into()));
        }

        self.compiler
            .hooks
            .invalid
            .call((filename.into(), now_millis()))?;

        self.compiler.begin_rebuild();
        self.compiler.watch_rebuild().await
    }

    /// Ends the watch session: fires `watchClose`, clears `watchMode`, and
    /// makes every subsequent `invalidate` fail. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.rebuild_lock.lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.compiler.hooks.watch_close.call(())?;
        self.compiler.end_watch();
        Ok(())
    }
}
