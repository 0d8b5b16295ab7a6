//! Timer delivery for the reclaim tick.
//!
//! The cache never owns a clock. It tells a [`TimerSource`] when it wants a
//! periodic callback and at what interval; the source's owner is responsible
//! for actually invoking [`PixmapCache::tick`](crate::PixmapCache::tick) at
//! that cadence. This keeps the reclaim state machine independent of how
//! ticks are produced — a GUI event loop, an async runtime, a test driving
//! ticks by hand, or the bundled [`ThreadTimer`].
//!
//! Implementations must tolerate `start`/`stop` being called from *inside*
//! the tick callback: the state machine re-arms itself at a different
//! interval mid-tick when the cache flips between busy and idle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Identifies one armed timer, as returned by [`TimerSource::start`].
pub type TimerId = u64;

/// Receives arm/disarm requests from the cache's reclaim state machine.
///
/// At most one timer is armed at a time; a `start` while armed only happens
/// after the matching `stop`.
pub trait TimerSource: Send {
    /// Arms a periodic timer. The returned id is passed back to [`stop`].
    ///
    /// [`stop`]: TimerSource::stop
    fn start(&mut self, interval: Duration) -> TimerId;

    /// Disarms the timer identified by `id`. Unknown ids are ignored.
    fn stop(&mut self, id: TimerId);
}

// ---------------------------------------------------------------------------
// NullTimer
// ---------------------------------------------------------------------------

/// A [`TimerSource`] that never fires.
///
/// The default for caches whose embedder drives [`tick`] from its own event
/// loop, and for tests that deliver ticks synthetically. Ids are still
/// unique so the state machine's bookkeeping stays observable.
///
/// [`tick`]: crate::PixmapCache::tick
#[derive(Default)]
pub struct NullTimer {
    next_id: TimerId,
}

impl TimerSource for NullTimer {
    fn start(&mut self, _interval: Duration) -> TimerId {
        self.next_id += 1;
        self.next_id
    }

    fn stop(&mut self, _id: TimerId) {}
}

// ---------------------------------------------------------------------------
// ThreadTimer
// ---------------------------------------------------------------------------

struct TimerState {
    /// Interval to fire at; `None` while disarmed.
    interval: Option<Duration>,
    /// Bumped on every `start`/`stop`. A sleeper that wakes into a different
    /// generation abandons its pending fire instead of delivering it.
    generation: u64,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cond: Condvar,
}

/// A [`TimerSource`] backed by a dedicated worker thread.
///
/// The worker sleeps on a condvar until armed, then fires the callback each
/// interval until disarmed. The callback runs with no timer locks held, so
/// it may freely re-enter `start`/`stop` (the tick path does exactly that
/// when switching intervals).
pub struct ThreadTimer {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    /// Spawns the worker. `callback` is invoked once per armed interval.
    pub fn new(callback: impl Fn() + Send + 'static) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                interval: None,
                generation: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("fresco-reclaim".into())
            .spawn(move || run_worker(worker_shared, callback))
            .ok();

        ThreadTimer { shared, worker }
    }
}

fn run_worker(shared: Arc<TimerShared>, callback: impl Fn()) {
    let mut state = shared.state.lock();
    loop {
        // Sleep until armed (or shut down).
        let (interval, generation) = loop {
            if state.shutdown {
                return;
            }
            match state.interval {
                Some(interval) => break (interval, state.generation),
                None => shared.cond.wait(&mut state),
            }
        };

        // Sleep out one interval; any start/stop bumps the generation and
        // invalidates this pending fire.
        let deadline = Instant::now() + interval;
        let mut fired_out = true;
        while state.generation == generation && !state.shutdown {
            if shared.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if state.generation != generation || state.shutdown {
            fired_out = false;
        }

        if fired_out {
            // Deliver with no locks held — the callback will usually take
            // the cache lock and may call start/stop on this timer.
            drop(state);
            callback();
            state = shared.state.lock();
        }
    }
}

impl TimerSource for ThreadTimer {
    fn start(&mut self, interval: Duration) -> TimerId {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.interval = Some(interval);
        let id = state.generation;
        drop(state);
        self.shared.cond.notify_all();
        id
    }

    fn stop(&mut self, id: TimerId) {
        let mut state = self.shared.state.lock();
        if state.generation == id {
            state.generation += 1;
            state.interval = None;
            drop(state);
            self.shared.cond.notify_all();
        }
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.cond.notify_all();
        if let Some(worker) = self.worker.take() {
            // The cache can be dropped *from the worker's own callback* (the
            // callback holds the last strong reference). Joining ourselves
            // would deadlock; detaching is safe because shutdown is already
            // flagged.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_repeatedly_while_armed() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let mut timer = ThreadTimer::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        let id = timer.start(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(120));
        timer.stop(id);
        let seen = fired.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several fires, got {seen}");

        // After stop, the count must settle.
        thread::sleep(Duration::from_millis(50));
        let settled = fired.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert!(
            fired.load(Ordering::SeqCst) <= settled + 1,
            "timer kept firing after stop"
        );
    }

    #[test]
    fn stop_with_stale_id_is_ignored() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let mut timer = ThreadTimer::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        let first = timer.start(Duration::from_millis(10));
        let _second = timer.start(Duration::from_millis(10));
        timer.stop(first); // stale — must not disarm the second
        thread::sleep(Duration::from_millis(80));
        assert!(fired.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn rearm_from_inside_the_callback() {
        // The callback restarts the timer through a shared handle, the same
        // shape the reclaim tick uses when switching intervals.
        let fired = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ThreadTimer>>> = Arc::new(Mutex::new(None));

        let fired2 = Arc::clone(&fired);
        let slot2 = Arc::clone(&slot);
        let timer = ThreadTimer::new(move || {
            let n = fired2.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                if let Some(t) = slot2.lock().as_mut() {
                    let _ = t.start(Duration::from_millis(5));
                }
            }
        });
        *slot.lock() = Some(timer);
        if let Some(t) = slot.lock().as_mut() {
            let _ = t.start(Duration::from_millis(5));
        }

        thread::sleep(Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst) >= 2);
        slot.lock().take();
    }
}
