use crate::model::{EMPTY_RESULT_SENTINEL, LedgerForm};
use crate::store::Direction;

/// History entries that carry an actual result. Blank results and the
/// `"Total: 0.0"` placeholder are skipped.
pub fn meaningful(form: &LedgerForm) -> Vec<&LedgerForm> {
    form.calculation_history
        .iter()
        .filter(|entry| !entry.result.is_empty() && entry.result != EMPTY_RESULT_SENTINEL)
        .collect()
}

/// Position in the filtered history list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCursor {
    index: usize,
}

impl HistoryCursor {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn navigate(&mut self, direction: Direction, len: usize) {
        self.index = direction.step(self.index, len);
    }
}
