use std::marker::PhantomData;
use std::sync::Arc;

use crate::cache::PixmapCache;
use crate::pixmap::Pixmap;
use crate::timer::{NullTimer, ThreadTimer, TimerSource};

/// Default cache limit, in kilobytes (10 MB).
pub(crate) const DEFAULT_LIMIT_KB: u64 = 10240;

/// Builder for configuring and constructing a [`PixmapCache`].
///
/// # Example
/// ```
/// use fresco::{CacheBuilder, Pixmap};
///
/// #[derive(Clone)]
/// struct Tile;
/// impl Pixmap for Tile {
///     fn width(&self) -> u32 { 128 }
///     fn height(&self) -> u32 { 128 }
///     fn depth(&self) -> u32 { 32 }
/// }
///
/// let cache: fresco::PixmapCache<Tile> = CacheBuilder::new()
///     .cache_limit_kb(4096)
///     .build();
/// assert_eq!(cache.cache_limit(), 4096);
/// ```
pub struct CacheBuilder<P> {
    limit_kb: u64,
    timer: Box<dyn TimerSource>,
    _pixmap: PhantomData<fn() -> P>,
}

impl<P: Pixmap> CacheBuilder<P> {
    pub fn new() -> Self {
        CacheBuilder {
            limit_kb: DEFAULT_LIMIT_KB,
            timer: Box::new(NullTimer::default()),
            _pixmap: PhantomData,
        }
    }

    /// Sets the cache limit in kilobytes (default: 10240).
    pub fn cache_limit_kb(mut self, kb: u64) -> Self {
        assert!(kb > 0, "cache limit must be greater than 0");
        self.limit_kb = kb;
        self
    }

    /// Installs a [`TimerSource`] for reclaim scheduling.
    ///
    /// The source only receives arm/disarm requests; its owner is expected
    /// to call [`PixmapCache::tick`] at the armed cadence. Without one, the
    /// default [`NullTimer`] is used and reclamation runs only when `tick`
    /// or [`PixmapCache::flush_detached`] is called explicitly.
    pub fn timer_source(mut self, timer: impl TimerSource + 'static) -> Self {
        self.timer = Box::new(timer);
        self
    }

    pub fn build(self) -> PixmapCache<P> {
        PixmapCache::from_parts(self.limit_kb, self.timer)
    }
}

impl<P> CacheBuilder<P>
where
    P: Pixmap + Send + Sync + 'static,
{
    /// Builds a shared cache with a self-contained reclaim thread.
    ///
    /// A [`ThreadTimer`] replaces any configured timer source and delivers
    /// ticks to the cache through a weak handle, so the returned `Arc` is
    /// the only thing keeping the cache (and its thread) alive.
    pub fn build_shared(self) -> Arc<PixmapCache<P>> {
        let cache = Arc::new(PixmapCache::from_parts(
            self.limit_kb,
            Box::new(NullTimer::default()),
        ));
        let weak = Arc::downgrade(&cache);
        cache.install_timer(Box::new(ThreadTimer::new(move || {
            if let Some(cache) = weak.upgrade() {
                cache.tick();
            }
        })));
        cache
    }
}

impl<P: Pixmap> Default for CacheBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
