//! The hook bus: four hook kinds plugins tap into, with webpack-style
//! ordering (`stage`, `before`) and registration-order tie-breaking.
//!
//! A hook's declared parameter list becomes its `Args` type parameter; the
//! set of hooks on a `Compiler` is fixed at construction and only the tap
//! lists inside each hook ever mutate (see `kiln_core::hooks::CompilerHooks`).
//! Taps are stored behind `Arc` rather than `Box` so a hook's tap list can be
//! cheaply copied into a child compiler's corresponding hook (§4.6) without
//! re-registering plugin closures.

mod order;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use kiln_error::Result;
pub use order::TapKind;

struct TapEntry<F: ?Sized> {
    name: String,
    kind: TapKind,
    f: Arc<F>,
}

impl<F: ?Sized> Clone for TapEntry<F> {
    fn clone(&self) -> Self {
        TapEntry {
            name: self.name.clone(),
            kind: self.kind.clone(),
            f: self.f.clone(),
        }
    }
}

fn order_of<F: ?Sized>(taps: &[TapEntry<F>]) -> Vec<usize> {
    let entries: Vec<(String, TapKind)> = taps
        .iter()
        .map(|t| (t.name.clone(), t.kind.clone()))
        .collect();
    order::resolve_order(&entries)
}

macro_rules! debug_by_tap_names {
    ($ty:ident) => {
        impl<Args> fmt::Debug for $ty<Args> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("taps", &self.taps.iter().map(|t| &t.name).collect::<Vec<_>>())
                    .finish()
            }
        }
    };
}

/// Taps run in order; no return value; a tap error propagates to the caller.
pub struct SyncHook<Args> {
    taps: Vec<TapEntry<dyn Fn(Args) -> Result<()> + Send + Sync>>,
}
debug_by_tap_names!(SyncHook);

impl<Args> Default for SyncHook<Args> {
    fn default() -> Self {
        Self { taps: Vec::new() }
    }
}

impl<Args: Clone> SyncHook<Args> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(&mut self, name: impl Into<String>, f: impl Fn(Args) -> Result<()> + Send + Sync + 'static) {
        self.tap_with(name, TapKind::Normal, f);
    }

    pub fn tap_with(
        &mut self,
        name: impl Into<String>,
        kind: TapKind,
        f: impl Fn(Args) -> Result<()> + Send + Sync + 'static,
    ) {
        self.taps.push(TapEntry {
            name: name.into(),
            kind,
            f: Arc::new(f),
        });
    }

    pub fn call(&self, args: Args) -> Result<()> {
        for i in order_of(&self.taps) {
            (self.taps[i].f)(args.clone())?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    /// Appends every tap currently on `other` to `self`, preserving name and
    /// kind. Used by child-compiler hook inheritance (§4.6).
    pub fn inherit_from(&mut self, other: &Self) {
        self.taps.extend(other.taps.iter().cloned());
    }
}

/// Taps run in order; the first tap to return `Some(_)` short-circuits the
/// hook and becomes its result.
pub struct SyncBailHook<Args, Ret> {
    taps: Vec<TapEntry<dyn Fn(Args) -> Option<Ret> + Send + Sync>>,
}

impl<Args, Ret> fmt::Debug for SyncBailHook<Args, Ret> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncBailHook")
            .field("taps", &self.taps.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

impl<Args, Ret> Default for SyncBailHook<Args, Ret> {
    fn default() -> Self {
        Self { taps: Vec::new() }
    }
}

impl<Args: Clone, Ret> SyncBailHook<Args, Ret> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap(&mut self, name: impl Into<String>, f: impl Fn(Args) -> Option<Ret> + Send + Sync + 'static) {
        self.tap_with(name, TapKind::Normal, f);
    }

    pub fn tap_with(
        &mut self,
        name: impl Into<String>,
        kind: TapKind,
        f: impl Fn(Args) -> Option<Ret> + Send + Sync + 'static,
    ) {
        self.taps.push(TapEntry {
            name: name.into(),
            kind,
            f: Arc::new(f),
        });
    }

    pub fn call(&self, args: Args) -> Option<Ret> {
        for i in order_of(&self.taps) {
            if let Some(ret) = (self.taps[i].f)(args.clone()) {
                return Some(ret);
            }
        }
        None
    }

    pub fn inherit_from(&mut self, other: &Self) {
        self.taps.extend(other.taps.iter().cloned());
    }
}

/// Taps run sequentially; each may complete asynchronously; any failure
/// aborts the series.
pub struct AsyncSeriesHook<Args> {
    taps: Vec<TapEntry<dyn Fn(Args) -> BoxFuture<'static, Result<()>> + Send + Sync>>,
}
debug_by_tap_names!(AsyncSeriesHook);

impl<Args> Default for AsyncSeriesHook<Args> {
    fn default() -> Self {
        Self { taps: Vec::new() }
    }
}

impl<Args: Clone + Send + 'static> AsyncSeriesHook<Args> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tap_with(name, TapKind::Normal, f);
    }

    pub fn tap_with<F, Fut>(&mut self, name: impl Into<String>, kind: TapKind, f: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.taps.push(TapEntry {
            name: name.into(),
            kind,
            f: Arc::new(move |args| Box::pin(f(args)) as BoxFuture<'static, Result<()>>),
        });
    }

    pub async fn call_async(&self, args: Args) -> Result<()> {
        for i in order_of(&self.taps) {
            (self.taps[i].f)(args.clone()).await?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn inherit_from(&mut self, other: &Self) {
        self.taps.extend(other.taps.iter().cloned());
    }
}

/// All taps start concurrently; the hook completes once every tap has
/// completed, or as soon as any one fails.
pub struct AsyncParallelHook<Args> {
    taps: Vec<TapEntry<dyn Fn(Args) -> BoxFuture<'static, Result<()>> + Send + Sync>>,
}
debug_by_tap_names!(AsyncParallelHook);

impl<Args> Default for AsyncParallelHook<Args> {
    fn default() -> Self {
        Self { taps: Vec::new() }
    }
}

impl<Args: Clone + Send + 'static> AsyncParallelHook<Args> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tap<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tap_with(name, TapKind::Normal, f);
    }

    pub fn tap_with<F, Fut>(&mut self, name: impl Into<String>, kind: TapKind, f: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.taps.push(TapEntry {
            name: name.into(),
            kind,
            f: Arc::new(move |args| Box::pin(f(args)) as BoxFuture<'static, Result<()>>),
        });
    }

    pub async fn call_async(&self, args: Args) -> Result<()> {
        let order = order_of(&self.taps);
        let futures: Vec<_> = order
            .into_iter()
            .map(|i| (self.taps[i].f)(args.clone()))
            .collect();
        futures::future::try_join_all(futures).await?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn inherit_from(&mut self, other: &Self) {
        self.taps.extend(other.taps.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn sync_hook_runs_taps_in_order() {
        let mut hook: SyncHook<()> = SyncHook::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let log = log.clone();
            hook.tap(name, move |_| {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }
        hook.call(()).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn sync_bail_hook_short_circuits() {
        let mut hook: SyncBailHook<(), &'static str> = SyncBailHook::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        hook.tap("first", move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
            None
        });
        let c2 = calls.clone();
        hook.tap("second", move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
            Some("bailed")
        });
        let c3 = calls.clone();
        hook.tap("third", move |_| {
            c3.fetch_add(1, Ordering::SeqCst);
            Some("unreached")
        });
        assert_eq!(hook.call(()), Some("bailed"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_series_hook_aborts_on_first_failure() {
        let mut hook: AsyncSeriesHook<()> = AsyncSeriesHook::new();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let l1 = log.clone();
        hook.tap("first", move |_| {
            let l1 = l1.clone();
            async move {
                l1.lock().unwrap().push("first");
                Ok(())
            }
        });
        hook.tap("second", |_| async {
            Err(kiln_error::Error::Argument("boom".into()))
        });
        let l3 = log.clone();
        hook.tap("third", move |_| {
            let l3 = l3.clone();
            async move {
                l3.lock().unwrap().push("third");
                Ok(())
            }
        });
        let err = hook.call_async(()).await.unwrap_err();
        assert!(matches!(err, kiln_error::Error::Argument(_)));
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[tokio::test]
    async fn async_parallel_hook_waits_for_every_tap() {
        let mut hook: AsyncParallelHook<()> = AsyncParallelHook::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = done.clone();
            hook.tap("t", move |_| {
                let done = done.clone();
                async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        hook.call_async(()).await.unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn inherit_from_copies_taps_without_reregistering_closures() {
        let mut parent: SyncHook<()> = SyncHook::new();
        parent.tap("a", |_| Ok(()));
        let mut child: SyncHook<()> = SyncHook::new();
        child.inherit_from(&parent);
        assert!(!child.is_empty());
        child.call(()).unwrap();
    }
}
