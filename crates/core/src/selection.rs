//! Load-balancing rules for picking a panel.

use crate::types::DbId;

/// A panel together with how many copies of the target variable it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelLoad {
    pub panel_id: DbId,
    pub matching: usize,
}

/// Order panels from least to most loaded.
///
/// The sort is stable, so panels with equal load keep their encounter order
/// and the first one seen wins a tie.
pub fn rank_by_load(mut loads: Vec<PanelLoad>) -> Vec<PanelLoad> {
    loads.sort_by_key(|load| load.matching);
    loads
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
