//! Render Pacing and Resolution Adaptation
//!
//! Keeps the first frame of every refinement sequence close to a render time
//! budget by moving the starting screen scale up and down the ladder, and
//! tracks render timing statistics.
//!
//! # Features
//!
//! - **Scale Ladder**: coarsest allowed level, requested level and the level
//!   of the last render
//! - **Hysteresis**: go coarser above the target, finer only well below it,
//!   or when the next finer level already met the target
//! - **Render Statistics**: bounded history with per-level averages
//!
//! # Usage
//!
//! ```no_run
//! use mipview::renderer::frame_pacing::ScaleLadder;
//! use std::time::Duration;
//!
//! let mut ladder = ScaleLadder::new(3, Duration::from_millis(16), 3.0);
//! let level = ladder.begin_render();
//! // render at `level` ...
//! ladder.adapt(Duration::from_millis(5));
//! ```

use log::debug;
use std::collections::VecDeque;
use std::time::Duration;

/// Maximum number of render times to keep
const RENDER_HISTORY_SIZE: usize = 120;

/// Adaptation state of the screen scale ladder
///
/// Index 0 is the finest level, `num_levels - 1` the coarsest.
#[derive(Debug, Clone)]
pub struct ScaleLadder {
    num_levels: usize,
    /// Coarsest level a new sequence starts from
    max_index: usize,
    /// Level the next render should use
    requested_index: usize,
    /// Level of the most recent render
    current_index: Option<usize>,
    target_render_time: Duration,
    fast_render_divisor: f64,
}

impl ScaleLadder {
    /// Creates a ladder starting at the coarsest of `num_levels` levels
    pub fn new(num_levels: usize, target_render_time: Duration, fast_render_divisor: f64) -> Self {
        let coarsest = num_levels.max(1) - 1;
        Self {
            num_levels: num_levels.max(1),
            max_index: coarsest,
            requested_index: coarsest,
            current_index: None,
            target_render_time,
            fast_render_divisor: fast_render_divisor.max(1.0),
        }
    }

    /// Number of levels
    pub fn num_levels(&self) -> usize {
        self.num_levels
    }

    /// Coarsest level a new sequence starts from
    pub fn max_index(&self) -> usize {
        self.max_index
    }

    /// Level the next render should use
    pub fn requested_index(&self) -> usize {
        self.requested_index
    }

    /// Level of the most recent render
    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Render time budget of the starting level
    pub fn target_render_time(&self) -> Duration {
        self.target_render_time
    }

    /// Whether a render at the requested level may be cancelled
    ///
    /// The starting (coarsest allowed) pass always runs to completion.
    pub fn may_cancel(&self) -> bool {
        self.requested_index < self.max_index
    }

    /// Whether the next render needs a new projector at a different level
    pub fn level_changed(&self) -> bool {
        self.current_index != Some(self.requested_index)
    }

    /// Starts a render at the requested level and clears the request
    pub fn begin_render(&mut self) -> usize {
        let level = self.requested_index;
        self.current_index = Some(level);
        self.requested_index = 0;
        level
    }

    /// Clears the request without changing the current level
    pub fn clear_request(&mut self) {
        self.requested_index = 0;
    }

    /// Requests a render at `index` (clamped); keeps any coarser pending request
    pub fn request(&mut self, index: usize) {
        let index = index.min(self.num_levels - 1);
        self.requested_index = self.requested_index.max(index);
    }

    /// Requests a new sequence from the starting level
    pub fn request_start(&mut self) {
        self.request(self.max_index);
    }

    /// Adapts the starting level to the time the current render took
    ///
    /// Moves by at most one level. Returns the new starting level if it changed.
    pub fn adapt(&mut self, render_time: Duration) -> Option<usize> {
        let current = self.current_index?;
        let fast = self.target_render_time.div_f64(self.fast_render_divisor);
        let before = self.max_index;

        if current == self.max_index {
            if render_time > self.target_render_time && self.max_index < self.num_levels - 1 {
                self.max_index += 1;
            } else if render_time < fast && self.max_index > 0 {
                self.max_index -= 1;
            }
        } else if current + 1 == self.max_index && render_time < self.target_render_time {
            self.max_index -= 1;
        }

        if self.max_index != before {
            debug!(
                "starting screen scale {} -> {} (render took {:?}, target {:?})",
                before, self.max_index, render_time, self.target_render_time
            );
            Some(self.max_index)
        } else {
            None
        }
    }
}

/// Statistics about render timing
#[derive(Debug, Clone, PartialEq)]
pub struct RenderStats {
    /// Completed renders
    pub total_renders: u64,
    /// Renders aborted by cancellation
    pub cancelled_renders: u64,
    /// Completed renders that exceeded the target time
    pub over_budget_renders: u64,
    /// Average render time over recent renders
    pub avg_render_time: Duration,
    /// Minimum render time over recent renders
    pub min_render_time: Duration,
    /// Maximum render time over recent renders
    pub max_render_time: Duration,
    /// Standard deviation of recent render times
    pub render_time_jitter: Duration,
    /// Average recent render time per screen scale, `None` if never rendered
    pub per_level_avg: Vec<Option<Duration>>,
}

impl RenderStats {
    fn new(num_levels: usize) -> Self {
        Self {
            total_renders: 0,
            cancelled_renders: 0,
            over_budget_renders: 0,
            avg_render_time: Duration::ZERO,
            min_render_time: Duration::ZERO,
            max_render_time: Duration::ZERO,
            render_time_jitter: Duration::ZERO,
            per_level_avg: vec![None; num_levels],
        }
    }
}

/// Render timing record
#[derive(Debug, Clone, Copy)]
struct RenderTiming {
    level: usize,
    duration: Duration,
}

/// Records render times and keeps [`RenderStats`] current
#[derive(Debug, Clone)]
pub struct RenderTimer {
    history: VecDeque<RenderTiming>,
    target_render_time: Duration,
    stats: RenderStats,
}

impl RenderTimer {
    /// Creates a timer for `num_levels` screen scales
    pub fn new(num_levels: usize, target_render_time: Duration) -> Self {
        Self {
            history: VecDeque::with_capacity(RENDER_HISTORY_SIZE),
            target_render_time,
            stats: RenderStats::new(num_levels),
        }
    }

    /// Records a completed render at `level`
    pub fn record(&mut self, level: usize, duration: Duration) {
        self.history.push_back(RenderTiming { level, duration });
        if self.history.len() > RENDER_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.stats.total_renders += 1;
        if duration > self.target_render_time {
            self.stats.over_budget_renders += 1;
        }
        self.update_stats();
    }

    /// Records a cancelled render
    pub fn record_cancelled(&mut self) {
        self.stats.cancelled_renders += 1;
    }

    fn update_stats(&mut self) {
        let n = self.history.len();
        if n == 0 {
            return;
        }
        let total: Duration = self.history.iter().map(|t| t.duration).sum();
        self.stats.avg_render_time = total / n as u32;
        self.stats.min_render_time = self.history.iter().map(|t| t.duration).min().unwrap_or_default();
        self.stats.max_render_time = self.history.iter().map(|t| t.duration).max().unwrap_or_default();

        let mean = self.stats.avg_render_time.as_secs_f64();
        let variance = self
            .history
            .iter()
            .map(|t| {
                let diff = t.duration.as_secs_f64() - mean;
                diff * diff
            })
            .sum::<f64>()
            / n as f64;
        self.stats.render_time_jitter = Duration::from_secs_f64(variance.sqrt());

        for (level, avg) in self.stats.per_level_avg.iter_mut().enumerate() {
            let (sum, count) = self
                .history
                .iter()
                .filter(|t| t.level == level)
                .fold((Duration::ZERO, 0u32), |(sum, count), t| (sum + t.duration, count + 1));
            *avg = (count > 0).then(|| sum / count);
        }
    }

    /// Current statistics
    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_ladder_starts_coarsest() {
        let ladder = ScaleLadder::new(4, ms(30), 3.0);
        assert_eq!(ladder.max_index(), 3);
        assert_eq!(ladder.requested_index(), 3);
        assert_eq!(ladder.current_index(), None);
        assert!(!ladder.may_cancel());
    }

    #[test]
    fn test_fast_starting_render_goes_finer() {
        let mut ladder = ScaleLadder::new(3, ms(16), 3.0);
        assert_eq!(ladder.begin_render(), 2);
        assert_eq!(ladder.adapt(ms(5)), Some(1));
    }

    #[test]
    fn test_slow_starting_render_goes_coarser() {
        let mut ladder = ScaleLadder::new(3, ms(16), 3.0);
        ladder.begin_render();
        ladder.adapt(ms(5));
        ladder.request_start();
        assert_eq!(ladder.begin_render(), 1);
        assert_eq!(ladder.adapt(ms(20)), Some(2));
    }

    #[test]
    fn test_hysteresis_band_keeps_level() {
        let mut ladder = ScaleLadder::new(3, ms(30), 3.0);
        ladder.begin_render();
        assert_eq!(ladder.adapt(ms(20)), None);
        assert_eq!(ladder.max_index(), 2);
    }

    #[test]
    fn test_next_finer_level_within_budget_promotes() {
        let mut ladder = ScaleLadder::new(3, ms(30), 3.0);
        ladder.begin_render();
        ladder.request(1);
        assert_eq!(ladder.begin_render(), 1);
        assert_eq!(ladder.adapt(ms(25)), Some(1));
        ladder.request(0);
        ladder.begin_render();
        assert_eq!(ladder.adapt(ms(40)), None);
    }

    #[test]
    fn test_two_levels_finer_than_start_never_adapts() {
        let mut ladder = ScaleLadder::new(4, ms(30), 3.0);
        ladder.begin_render();
        ladder.request(1);
        assert_eq!(ladder.begin_render(), 1);
        assert_eq!(ladder.adapt(ms(1)), None);
        assert_eq!(ladder.max_index(), 3);
    }

    #[test]
    fn test_bounds_are_respected() {
        let mut ladder = ScaleLadder::new(2, ms(10), 3.0);
        ladder.begin_render();
        assert_eq!(ladder.adapt(ms(100)), None);
        assert_eq!(ladder.max_index(), 1);

        let mut single = ScaleLadder::new(1, ms(10), 3.0);
        single.begin_render();
        assert_eq!(single.adapt(ms(0)), None);
        assert_eq!(single.adapt(ms(100)), None);
    }

    #[test]
    fn test_request_keeps_coarser_pending() {
        let mut ladder = ScaleLadder::new(3, ms(10), 3.0);
        ladder.begin_render();
        ladder.request(1);
        ladder.request(0);
        assert_eq!(ladder.requested_index(), 1);
        ladder.request(9);
        assert_eq!(ladder.requested_index(), 2);
    }

    #[test]
    fn test_may_cancel_below_start() {
        let mut ladder = ScaleLadder::new(3, ms(10), 3.0);
        ladder.begin_render();
        ladder.request(1);
        assert!(ladder.may_cancel());
        ladder.request_start();
        assert!(!ladder.may_cancel());
    }

    #[test]
    fn test_render_timer_stats() {
        let mut timer = RenderTimer::new(2, ms(10));
        timer.record(1, ms(4));
        timer.record(0, ms(12));
        timer.record(0, ms(8));
        timer.record_cancelled();

        let stats = timer.stats();
        assert_eq!(stats.total_renders, 3);
        assert_eq!(stats.cancelled_renders, 1);
        assert_eq!(stats.over_budget_renders, 1);
        assert_eq!(stats.avg_render_time, ms(8));
        assert_eq!(stats.min_render_time, ms(4));
        assert_eq!(stats.max_render_time, ms(12));
        assert_eq!(stats.per_level_avg, vec![Some(ms(10)), Some(ms(4))]);
    }

    #[test]
    fn test_render_history_is_bounded() {
        let mut timer = RenderTimer::new(1, ms(10));
        for _ in 0..(RENDER_HISTORY_SIZE + 10) {
            timer.record(0, ms(1));
        }
        assert_eq!(timer.history.len(), RENDER_HISTORY_SIZE);
        assert_eq!(timer.stats().total_renders, (RENDER_HISTORY_SIZE + 10) as u64);
    }
}
