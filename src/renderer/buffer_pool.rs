//! Output buffer rotation
//!
//! A fixed arena of buffer slots indexed by [`SlotId`]. Each slot is free,
//! in flight (being rendered into) or displayed (handed to the render
//! target). At most one slot is in flight at a time. A render that gets
//! cancelled keeps its slot in flight and the next render reuses it.
//!
//! The render target reports which slot it released when a new frame is
//! shown; that slot returns to the free queue.

use log::{debug, warn};
use std::collections::VecDeque;

/// Index of a buffer slot
pub type SlotId = usize;

/// State of one buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Available for the next render
    Free,
    /// Being rendered into
    InFlight,
    /// Handed to the render target
    Displayed,
}

/// Statistics about buffer rotation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Renders that received a slot
    pub acquisitions: u64,
    /// Acquisitions that reused a slot left in flight by a cancelled render
    pub reused_in_flight: u64,
    /// Acquisitions that had to take back a displayed slot
    pub starvations: u64,
    /// Releases naming a slot that was not displayed
    pub unknown_releases: u64,
}

/// Fixed set of rotating buffer slots
#[derive(Debug, Clone)]
pub struct BufferPool {
    states: Vec<SlotState>,
    free: VecDeque<SlotId>,
    displayed: VecDeque<SlotId>,
    stats: PoolStats,
}

impl BufferPool {
    /// Creates a pool with `count` free slots
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            states: vec![SlotState::Free; count],
            free: (0..count).collect(),
            displayed: VecDeque::new(),
            stats: PoolStats::default(),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the pool has no slots (never true)
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Whether only one slot exists, so rendering and display share it
    pub fn is_single_buffered(&self) -> bool {
        self.states.len() == 1
    }

    /// State of `slot`
    pub fn state(&self, slot: SlotId) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    /// The slot currently being rendered into
    pub fn in_flight(&self) -> Option<SlotId> {
        self.states.iter().position(|&s| s == SlotState::InFlight)
    }

    /// The most recently displayed slot
    pub fn latest_displayed(&self) -> Option<SlotId> {
        self.displayed.back().copied()
    }

    /// Returns the slot the next render should target and marks it in flight
    pub fn acquire(&mut self) -> SlotId {
        self.stats.acquisitions += 1;
        if let Some(slot) = self.in_flight() {
            self.stats.reused_in_flight += 1;
            return slot;
        }

        let slot = match self.free.pop_front() {
            Some(slot) => slot,
            None if self.is_single_buffered() => {
                self.displayed.clear();
                0
            }
            None => {
                // the target kept every slot; take back the oldest one it is
                // not showing
                self.stats.starvations += 1;
                let slot = self.displayed.pop_front().unwrap_or(0);
                warn!("⚠️ Buffer pool starved, reclaiming displayed slot {}", slot);
                slot
            }
        };
        self.states[slot] = SlotState::InFlight;
        slot
    }

    /// Records that `slot` was handed to the target, which released `released`
    pub fn complete(&mut self, slot: SlotId, released: Option<SlotId>) {
        if self.states.get(slot) != Some(&SlotState::InFlight) {
            warn!("⚠️ Completed slot {} was not in flight", slot);
        }
        if let Some(state) = self.states.get_mut(slot) {
            *state = SlotState::Displayed;
            self.displayed.retain(|&s| s != slot);
            self.displayed.push_back(slot);
        }

        let Some(released) = released else {
            return;
        };
        if released == slot {
            return;
        }
        match self.states.get(released) {
            Some(SlotState::Displayed) => {
                self.states[released] = SlotState::Free;
                self.displayed.retain(|&s| s != released);
                self.free.push_back(released);
                debug!("slot {} released", released);
            }
            _ => {
                self.stats.unknown_releases += 1;
                warn!("⚠️ Target released unknown slot {}", released);
            }
        }
    }

    /// Returns every slot to the free queue
    pub fn reset(&mut self) {
        self.states.fill(SlotState::Free);
        self.free = (0..self.states.len()).collect();
        self.displayed.clear();
    }

    /// Rotation statistics
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
