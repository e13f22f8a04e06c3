//! Cache interaction types
//!
//! The tiled cache and its loader live outside the renderer. The renderer
//! talks to them through:
//! - [`CacheHints`] attached to each mipmap level when prefetching or rendering
//! - [`CacheControl`] to start a new frame and reset the IO time budget
//! - [`IoTimeBudget`], the per-frame allowance a cache may spend on
//!   synchronous loads before returning best-available data

use std::time::Duration;

/// How a cache should react to a request for data that is not resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingStrategy {
    /// Return invalid data immediately and enqueue the load
    Volatile,
    /// Load synchronously before returning
    Blocking,
    /// Load synchronously while the IO budget lasts, then behave as `Volatile`
    Budgeted,
    /// Never trigger a load
    DontLoad,
}

/// Loading hints for one mipmap level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHints {
    /// What to do with non-resident data
    pub loading_strategy: LoadingStrategy,
    /// Loader queue priority, 0 is the most urgent
    pub queue_priority: usize,
    /// Whether to jump ahead of requests with the same priority
    pub enqueue_to_front: bool,
}

impl CacheHints {
    /// Creates cache hints
    pub fn new(loading_strategy: LoadingStrategy, queue_priority: usize, enqueue_to_front: bool) -> Self {
        Self {
            loading_strategy,
            queue_priority,
            enqueue_to_front,
        }
    }

    /// Whether a prefetch with these hints should be issued at all
    pub fn allows_loading(&self) -> bool {
        self.loading_strategy != LoadingStrategy::DontLoad
    }
}

impl Default for CacheHints {
    fn default() -> Self {
        Self::new(LoadingStrategy::Volatile, 0, false)
    }
}

/// Frame-level control over the external cache
pub trait CacheControl: Send + Sync {
    /// Called when an explicit new frame is requested; stale queued loads from
    /// the previous view may be dropped or demoted
    fn prepare_next_frame(&self);

    /// Resets the IO time budget for the frame that is about to be rendered
    fn reset_io_budget(&self, budget: &[Duration]);
}

/// Cache control for sources without a cache
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCacheControl;

impl CacheControl for NoopCacheControl {
    fn prepare_next_frame(&self) {}

    fn reset_io_budget(&self, _budget: &[Duration]) {}
}

/// Per-priority-level time allowance for synchronous loading
///
/// Entry `i` is the time left for requests with queue priority `<= i`.
/// Budgets never increase with priority: a less urgent request can never be
/// granted more time than a more urgent one.
#[derive(Debug, Clone, Default)]
pub struct IoTimeBudget {
    budget: Vec<Duration>,
}

impl IoTimeBudget {
    /// Creates a budget with `levels` priority levels and nothing left
    pub fn new(levels: usize) -> Self {
        Self {
            budget: vec![Duration::ZERO; levels],
        }
    }

    /// Resets the budget from a partial specification
    ///
    /// Missing trailing levels repeat the last given value; every level is
    /// clamped to the level before it.
    pub fn reset(&mut self, partial: &[Duration]) {
        if partial.is_empty() {
            self.budget.iter_mut().for_each(|b| *b = Duration::ZERO);
            return;
        }
        if self.budget.len() < partial.len() {
            self.budget.resize(partial.len(), Duration::ZERO);
        }
        let mut previous = partial[0];
        for (i, slot) in self.budget.iter_mut().enumerate() {
            let wanted = partial.get(i).copied().unwrap_or(previous);
            let value = wanted.min(previous);
            *slot = value;
            previous = value;
        }
    }

    /// Time left for a request with the given priority
    pub fn time_left(&self, priority: usize) -> Duration {
        self.budget
            .get(priority)
            .or_else(|| self.budget.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Charges `time` spent by a request with the given priority
    ///
    /// The charge applies to the request's own level and to every more urgent
    /// level; less urgent levels are clamped so they stay non-increasing.
    pub fn consume(&mut self, time: Duration, priority: usize) {
        let n = self.budget.len();
        if n == 0 {
            return;
        }
        let p = priority.min(n - 1);
        for slot in &mut self.budget[..=p] {
            *slot = slot.saturating_sub(time);
        }
        for i in (p + 1)..n {
            let cap = self.budget[i - 1];
            if self.budget[i] > cap {
                self.budget[i] = cap;
            }
        }
    }

    /// Number of priority levels
    pub fn levels(&self) -> usize {
        self.budget.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_reset_extends_and_clamps() {
        let mut budget = IoTimeBudget::new(4);
        budget.reset(&[ms(100), ms(10)]);
        assert_eq!(budget.time_left(0), ms(100));
        assert_eq!(budget.time_left(1), ms(10));
        assert_eq!(budget.time_left(2), ms(10));
        assert_eq!(budget.time_left(3), ms(10));

        budget.reset(&[ms(5), ms(50)]);
        assert_eq!(budget.time_left(1), ms(5), "must not increase with priority");
    }

    #[test]
    fn test_reset_grows_levels() {
        let mut budget = IoTimeBudget::new(0);
        budget.reset(&[ms(3), ms(2), ms(1)]);
        assert_eq!(budget.levels(), 3);
        assert_eq!(budget.time_left(7), ms(1));
    }

    #[test]
    fn test_consume_charges_more_urgent_levels() {
        let mut budget = IoTimeBudget::new(3);
        budget.reset(&[ms(100), ms(10), ms(10)]);
        budget.consume(ms(8), 1);
        assert_eq!(budget.time_left(0), ms(92));
        assert_eq!(budget.time_left(1), ms(2));
        assert_eq!(budget.time_left(2), ms(2));

        budget.consume(ms(50), 2);
        assert_eq!(budget.time_left(2), Duration::ZERO);
        assert_eq!(budget.time_left(0), ms(42));
    }

    #[test]
    fn test_empty_reset_clears() {
        let mut budget = IoTimeBudget::new(2);
        budget.reset(&[ms(4)]);
        budget.reset(&[]);
        assert_eq!(budget.time_left(0), Duration::ZERO);
    }

    #[test]
    fn test_dont_load_hints() {
        assert!(CacheHints::default().allows_loading());
        assert!(!CacheHints::new(LoadingStrategy::DontLoad, 0, false).allows_loading());
    }
}
