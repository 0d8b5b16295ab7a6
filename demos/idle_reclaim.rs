//! Idle-decay walkthrough.
//!
//! Fills a cache with thumbnails, then delivers reclaim ticks by hand and
//! prints how the decay schedule drains memory: a single LRU entry per tick
//! while the cache is "busy", a quarter of it per tick once usage stops
//! changing, and a stopped timer when nothing is left to reclaim.
//!
//! Run with:
//!     cargo run --example idle_reclaim
//!
//! Set `RUST_LOG=fresco=debug` to also see the timer transitions the cache
//! reports through `tracing`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fresco::timer::{TimerId, TimerSource};
use fresco::{CacheBuilder, Pixmap, PixmapCache};

/// A 64×64 RGBA thumbnail: 16 KB of pixels, shared backing.
#[derive(Clone)]
struct Thumb(Arc<Vec<u8>>);

impl Thumb {
    fn new(seed: u8) -> Self {
        Thumb(Arc::new(vec![seed; 64 * 64 * 4]))
    }
}

impl Pixmap for Thumb {
    fn width(&self) -> u32 {
        64
    }
    fn height(&self) -> u32 {
        64
    }
    fn depth(&self) -> u32 {
        32
    }
}

/// Records what interval the cache asked for, so the demo can display it.
#[derive(Clone, Default)]
struct Observed(Arc<Mutex<Option<Duration>>>);

impl TimerSource for Observed {
    fn start(&mut self, interval: Duration) -> TimerId {
        *self.0.lock().unwrap() = Some(interval);
        1
    }

    fn stop(&mut self, _id: TimerId) {
        *self.0.lock().unwrap() = None;
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let timer = Observed::default();
    let cache: PixmapCache<Thumb> = CacheBuilder::new()
        .cache_limit_kb(4096)
        .timer_source(timer.clone())
        .build();

    println!("filling the cache with 128 thumbnails (16 KB each)...");
    for i in 0..128u8 {
        cache.insert(&format!("thumb/{i}"), Thumb::new(i));
    }
    report(&cache, &timer);

    println!("\ndelivering reclaim ticks with no other activity:");
    let mut tick = 0;
    while timer.0.lock().unwrap().is_some() {
        cache.tick();
        tick += 1;
        print!("  tick {tick:2}: ");
        report(&cache, &timer);
    }

    println!("\ntimer stopped — the cache went fully idle on its own.");
    let stats = cache.stats();
    println!(
        "reclaimed {} entries over {} ticks ({} entries still resident)",
        stats.reclaimed,
        tick,
        cache.entry_count()
    );
}

fn report(cache: &PixmapCache<Thumb>, timer: &Observed) {
    let interval = timer.0.lock().unwrap();
    println!(
        "{:3} entries resident, timer: {}",
        cache.entry_count(),
        match *interval {
            Some(d) => format!("every {}s", d.as_secs()),
            None => "stopped".into(),
        }
    );
}
