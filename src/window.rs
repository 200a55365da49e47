//! Burst detector over probe timeout timestamps.
//!
//! The window holds up to `capacity` unix timestamps in non-decreasing order.
//! Once it is full it is evaluated:
//!
//! * full and the span from oldest to newest is within `budget` seconds: the
//!   timeouts form one incident, an alert is due and the window is cleared;
//! * full but sparser than that: entries further than `budget` from the newest
//!   are evicted and the survivors kept, oldest first;
//! * not full: nothing happens.

use std::collections::VecDeque;

use thiserror::Error;

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_BUDGET_SECS: i64 = 120;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("timeout window is full ({0} entries), evaluate it first")]
pub struct WindowFull(pub usize);

/// Outcome of [`TimeoutWindow::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Window not full yet.
    Pending { count: usize },
    /// `count` timeouts between `first` and `last`; the window has been cleared.
    Burst { first: i64, last: i64, count: usize },
    /// Too spread out for one incident; stale entries dropped.
    Compacted { evicted: usize, retained: usize },
}

impl Verdict {
    pub fn is_alert(&self) -> bool {
        matches!(self, Verdict::Burst { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutWindow {
    entries: VecDeque<i64>,
    capacity: usize,
    budget_secs: i64,
}

impl Default for TimeoutWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_BUDGET_SECS)
    }
}

impl TimeoutWindow {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, budget_secs: i64) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            budget_secs,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn budget_secs(&self) -> i64 {
        self.budget_secs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().copied()
    }

    /// Appends a timeout observed at `at` (unix seconds).
    ///
    /// A timestamp earlier than the newest entry is stored as the newest entry,
    /// so a wall clock stepping backwards cannot break the ordering.
    pub fn push(&mut self, at: i64) -> Result<(), WindowFull> {
        if self.is_full() {
            return Err(WindowFull(self.capacity));
        }
        let at = match self.entries.back() {
            Some(&newest) if at < newest => newest,
            _ => at,
        };
        self.entries.push_back(at);
        Ok(())
    }

    /// Applies the burst policy. A no-op unless the window is full.
    pub fn evaluate(&mut self) -> Verdict {
        if !self.is_full() {
            return Verdict::Pending { count: self.len() };
        }
        let (first, last) = match (self.entries.front(), self.entries.back()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Verdict::Pending { count: 0 },
        };

        if last - first <= self.budget_secs {
            let count = self.drain().count();
            return Verdict::Burst { first, last, count };
        }

        let evicted = self.evict_older_than(last);
        Verdict::Compacted {
            evicted,
            retained: self.len(),
        }
    }

    /// Drops every entry more than `budget` seconds before `reference`.
    /// Returns how many were removed.
    pub fn evict_older_than(&mut self, reference: i64) -> usize {
        let before = self.entries.len();
        while let Some(&oldest) = self.entries.front() {
            if reference - oldest > self.budget_secs {
                self.entries.pop_front();
            } else {
                break;
            }
        }
        before - self.entries.len()
    }

    /// Empties the window, yielding entries oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = i64> + '_ {
        self.entries.drain(..)
    }

    /// Records a timeout and evaluates the window if that filled it.
    ///
    /// The window is never full after evaluation, so the push cannot fail when
    /// every failure goes through here.
    pub fn record(&mut self, at: i64) -> Verdict {
        if self.is_full() {
            self.evaluate();
        }
        if let Err(e) = self.push(at) {
            tracing::warn!("{}", e);
        }
        self.evaluate()
    }
}
