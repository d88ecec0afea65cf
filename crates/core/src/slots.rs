//! Capacity arithmetic for an environment's shared slot pool.
//!
//! An environment's `quantity` is ONE pool shared by every bound panel. It is
//! never multiplied by the number of panels.

use serde::Serialize;

/// Capacity snapshot for one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotSummary {
    pub total: i64,
    pub used: i64,
    pub available: i64,
}

impl SlotSummary {
    /// Build a summary from the pool size and the live usage count.
    ///
    /// `available` is floored at zero: manual additions on a panel can push
    /// usage past the configured pool.
    pub fn new(total: i64, used: i64) -> Self {
        Self {
            total,
            used,
            available: (total - used).max(0),
        }
    }

    /// Sum per-panel usage counts into a summary.
    pub fn from_panel_counts<I>(total: i64, counts: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let used = counts.into_iter().map(|c| c as i64).sum();
        Self::new(total, used)
    }

    pub fn is_full(&self) -> bool {
        self.available <= 0
    }
}

/// Count the variables named `name` in a panel's variable list.
pub fn count_named<'a, I>(names: I, name: &str) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().filter(|n| *n == name).count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
