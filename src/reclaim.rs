//! Idle-driven reclamation schedule.
//!
//! Entries whose pixels nobody outside the cache still references waste
//! memory, but the cache cannot see external ownership directly. Instead it
//! periodically applies capacity pressure: each tick briefly lowers the cost
//! limit and lets ordinary LRU eviction reclaim whatever is least valuable,
//! then sweeps the name index for bindings the eviction orphaned.
//!
//! The schedule decays with activity. While inserts keep arriving the cache
//! trims a single LRU entry every `flush` interval (30 s); once the total
//! cost stops changing between ticks it switches to the shorter `soon`
//! interval (10 s) and cuts roughly a quarter of the cache per tick. When a
//! tick reclaims nothing at all the timer stops entirely, so an idle process
//! holds no live timer.
//!
//! This type owns only the schedule — which interval is armed and what the
//! cost looked like last tick. The eviction itself runs in the engine, which
//! reports back through [`settle_tick`](ReclaimState::settle_tick).

use std::time::Duration;

use tracing::debug;

use crate::timer::{TimerId, TimerSource};

/// Tick interval while the cache looks idle (aggressive trim).
pub(crate) const SOON_INTERVAL: Duration = Duration::from_secs(10);
/// Baseline tick interval while the cache is in active use.
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) struct ReclaimState {
    /// Armed timer, `None` while idle (no watching).
    timer_id: Option<TimerId>,
    /// Total cost observed at the end of the previous tick.
    cost_at_last_tick: u64,
    /// Classification the current interval was chosen for.
    was_idle: bool,
}

impl ReclaimState {
    pub(crate) fn new() -> Self {
        ReclaimState {
            timer_id: None,
            cost_at_last_tick: 0,
            was_idle: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_watching(&self) -> bool {
        self.timer_id.is_some()
    }

    /// Arms the baseline timer if none is running. Called on every
    /// successful insertion; cheap when already watching.
    pub(crate) fn ensure_watching(&mut self, timer: &mut dyn TimerSource) {
        if self.timer_id.is_none() {
            self.timer_id = Some(timer.start(FLUSH_INTERVAL));
            self.was_idle = false;
            debug!(interval_s = FLUSH_INTERVAL.as_secs(), "reclaim timer armed");
        }
    }

    /// `true` when no cost change has been observed since the last tick.
    pub(crate) fn idle_since_last_tick(&self, total_cost: u64) -> bool {
        total_cost == self.cost_at_last_tick
    }

    /// Records the post-reclaim total for the next tick's idle test.
    pub(crate) fn record_total(&mut self, total_cost: u64) {
        self.cost_at_last_tick = total_cost;
    }

    /// Applies the tick outcome: stop when the pass changed nothing, re-arm
    /// at the other interval when the busy/idle classification flipped.
    pub(crate) fn settle_tick(
        &mut self,
        timer: &mut dyn TimerSource,
        reclaimed_any: bool,
        idle: bool,
    ) {
        if !reclaimed_any {
            self.stop(timer);
        } else if idle != self.was_idle {
            // Only re-arm an actually armed timer; a manually driven tick on
            // an idle cache must not start one.
            if let Some(id) = self.timer_id.take() {
                timer.stop(id);
                let interval = if idle { SOON_INTERVAL } else { FLUSH_INTERVAL };
                self.timer_id = Some(timer.start(interval));
                self.was_idle = idle;
                debug!(interval_s = interval.as_secs(), idle, "reclaim timer re-armed");
            }
        }
    }

    /// Unconditional transition to the idle state.
    pub(crate) fn stop(&mut self, timer: &mut dyn TimerSource) {
        if let Some(id) = self.timer_id.take() {
            timer.stop(id);
            self.was_idle = false;
            self.cost_at_last_tick = 0;
            debug!("reclaim timer stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every arm/disarm so transitions can be asserted exactly.
    #[derive(Default)]
    struct RecordingTimer {
        next_id: TimerId,
        armed: Option<(TimerId, Duration)>,
        log: Vec<String>,
    }

    impl TimerSource for RecordingTimer {
        fn start(&mut self, interval: Duration) -> TimerId {
            self.next_id += 1;
            self.armed = Some((self.next_id, interval));
            self.log.push(format!("start {}s", interval.as_secs()));
            self.next_id
        }

        fn stop(&mut self, id: TimerId) {
            if self.armed.map_or(false, |(armed, _)| armed == id) {
                self.armed = None;
            }
            self.log.push("stop".into());
        }
    }

    #[test]
    fn first_insert_arms_at_flush_interval() {
        let mut timer = RecordingTimer::default();
        let mut state = ReclaimState::new();
        assert!(!state.is_watching());

        state.ensure_watching(&mut timer);
        assert!(state.is_watching());
        assert_eq!(timer.armed.map(|(_, i)| i), Some(FLUSH_INTERVAL));

        // Idempotent while armed.
        state.ensure_watching(&mut timer);
        assert_eq!(timer.log.len(), 1);
    }

    #[test]
    fn fruitless_tick_stops_the_timer() {
        let mut timer = RecordingTimer::default();
        let mut state = ReclaimState::new();
        state.ensure_watching(&mut timer);

        state.settle_tick(&mut timer, false, true);
        assert!(!state.is_watching());
        assert!(timer.armed.is_none());
    }

    #[test]
    fn classification_flip_switches_interval() {
        let mut timer = RecordingTimer::default();
        let mut state = ReclaimState::new();
        state.ensure_watching(&mut timer); // busy, 30s

        // Busy -> idle: switch to the short interval.
        state.settle_tick(&mut timer, true, true);
        assert_eq!(timer.armed.map(|(_, i)| i), Some(SOON_INTERVAL));

        // Still idle: no re-arm churn.
        let log_len = timer.log.len();
        state.settle_tick(&mut timer, true, true);
        assert_eq!(timer.log.len(), log_len);

        // Idle -> busy: back to baseline.
        state.settle_tick(&mut timer, true, false);
        assert_eq!(timer.armed.map(|(_, i)| i), Some(FLUSH_INTERVAL));
    }

    #[test]
    fn idle_test_compares_against_recorded_total() {
        let mut state = ReclaimState::new();
        state.record_total(42);
        assert!(state.idle_since_last_tick(42));
        assert!(!state.idle_since_last_tick(41));
    }
}
