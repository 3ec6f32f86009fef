use crate::action::{Action, HistoryEntry};
use serde_json::Value;

/// Trailing `keep_last` entries of `history`, oldest first.
pub fn trim<T>(history: &[T], keep_last: usize) -> &[T] {
    let start = history.len().saturating_sub(keep_last);
    &history[start..]
}

/// Append-only record of a run. The loop owns it; everything else borrows.
#[derive(Clone, Debug, Default)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn record(&mut self, action: Action) {
        self.entries.push(HistoryEntry::Executed(action));
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn window(&self, keep_last: usize) -> &[HistoryEntry] {
        trim(&self.entries, keep_last)
    }

    /// Context form of the trailing window, as sent to the model.
    pub fn context(&self, keep_last: usize) -> Vec<Value> {
        self.window(keep_last).iter().map(HistoryEntry::to_context).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries
    }
}
