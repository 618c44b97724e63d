//! # Note History Module
//!
//! Bounded, newest-first record of recent notes for a scrolling trace.
//! Unvoiced or unstable windows are stored as an explicit gap rather
//! than as a number.

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistoryEntry {
    Note(f32),
    Invalid,
}

impl HistoryEntry {
    /// Wraps a note, mapping NaN and infinities to [`HistoryEntry::Invalid`].
    pub fn from_note(note: f32) -> Self {
        if note.is_finite() {
            HistoryEntry::Note(note)
        } else {
            HistoryEntry::Invalid
        }
    }

    pub fn note(&self) -> Option<f32> {
        match self {
            HistoryEntry::Note(note) => Some(*note),
            HistoryEntry::Invalid => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NoteHistory {
    entries: VecDeque<HistoryEntry>,
    max_count: usize,
}

impl NoteHistory {
    pub fn new(max_count: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_count),
            max_count,
        }
    }

    /// Adds the newest entry, dropping the oldest ones beyond the cap.
    pub fn push(&mut self, entry: HistoryEntry) {
        let entry = match entry {
            HistoryEntry::Note(note) => HistoryEntry::from_note(note),
            HistoryEntry::Invalid => HistoryEntry::Invalid,
        };
        self.entries.push_front(entry);
        self.entries.truncate(self.max_count);
    }

    /// Sets a new cap and discards entries beyond it from the oldest end.
    pub fn trim(&mut self, max_count: usize) {
        self.max_count = max_count;
        self.entries.truncate(max_count);
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }
}

/// Number of entries a trace of `width` pixels can show when each entry
/// takes `spacing` pixels after a `left_margin` of labels, plus two so
/// the trace runs off the edge.
pub fn max_count_for_width(width: u32, left_margin: u32, spacing: u32) -> usize {
    (width.saturating_sub(left_margin) / spacing.max(1)) as usize + 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_comes_first() {
        let mut history = NoteHistory::new(10);
        history.push(HistoryEntry::Note(60.0));
        history.push(HistoryEntry::Invalid);
        history.push(HistoryEntry::Note(61.0));

        let notes: Vec<Option<f32>> = history.iter().map(|e| e.note()).collect();
        assert_eq!(notes, vec![Some(61.0), None, Some(60.0)]);
    }

    #[test]
    fn nan_is_stored_as_invalid() {
        let mut history = NoteHistory::new(4);
        history.push(HistoryEntry::Note(f32::NAN));
        history.push(HistoryEntry::from_note(f32::INFINITY));
        assert!(history.iter().all(|e| *e == HistoryEntry::Invalid));
    }

    #[test]
    fn never_exceeds_cap_across_pushes_and_resizes() {
        let mut history = NoteHistory::new(5);
        let caps = [5, 3, 8, 0, 2, 6];
        for (round, cap) in caps.iter().enumerate() {
            history.trim(*cap);
            assert!(history.len() <= *cap);
            for i in 0..(round * 4 + 3) {
                history.push(HistoryEntry::from_note(50.0 + i as f32));
                assert!(history.len() <= history.max_count());
            }
        }
        assert_eq!(history.len(), 6);
    }

    #[test]
    fn trim_drops_oldest_entries() {
        let mut history = NoteHistory::new(5);
        for i in 0..5 {
            history.push(HistoryEntry::Note(i as f32));
        }
        history.trim(2);
        let notes: Vec<f32> = history.iter().filter_map(|e| e.note()).collect();
        assert_eq!(notes, vec![4.0, 3.0]);
    }

    #[test]
    fn width_determines_cap() {
        assert_eq!(max_count_for_width(400, 40, 2), 182);
        assert_eq!(max_count_for_width(10, 40, 2), 2);
        assert_eq!(max_count_for_width(100, 0, 0), 102);
    }
}
