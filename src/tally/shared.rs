//! Single-writer tally state with wait-free readers
//!
//! The writer keeps the lines locally and republishes the packed form into an
//! `AtomicU32` after every change. Readers only ever do one atomic load, so the
//! render loop can call [`TallyReader::current_snapshot`] every frame without
//! touching a lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::trace;

use super::{Provenance, TallyLine, TallySnapshot, LINE_COUNT};

/// The authoritative tally state. Not `Clone`: there is exactly one writer.
pub struct TallyState {
    lines: [TallyLine; LINE_COUNT],
    published: Arc<AtomicU32>,
}

impl TallyState {
    /// All lines start `Unset`
    pub fn new() -> Self {
        let lines = [TallyLine::default(); LINE_COUNT];
        let published = Arc::new(AtomicU32::new(TallySnapshot::from_lines(lines).pack()));
        Self { lines, published }
    }

    /// Set one line. Returns true when value or provenance changed.
    pub fn apply(&mut self, line: usize, value: bool, provenance: Provenance) -> bool {
        let Some(slot) = self.lines.get_mut(line) else {
            return false;
        };
        let next = TallyLine::new(value, provenance);
        if *slot == next {
            return false;
        }
        *slot = next;
        self.publish();
        trace!(line, value, ?provenance, "Tally line updated");
        true
    }

    pub fn line(&self, line: usize) -> Option<TallyLine> {
        self.lines.get(line).copied()
    }

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot::from_lines(self.lines)
    }

    /// Hand out a read-only view for the renderer
    pub fn reader(&self) -> TallyReader {
        TallyReader {
            published: Arc::clone(&self.published),
        }
    }

    fn publish(&self) {
        self.published
            .store(TallySnapshot::from_lines(self.lines).pack(), Ordering::Release);
    }
}

impl Default for TallyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only, non-blocking view of the tally state
#[derive(Clone)]
pub struct TallyReader {
    published: Arc<AtomicU32>,
}

impl TallyReader {
    /// Copy of the latest published state. Never blocks.
    pub fn current_snapshot(&self) -> TallySnapshot {
        TallySnapshot::unpack(self.published.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reports_changes_only() {
        let mut state = TallyState::new();
        assert!(state.apply(1, true, Provenance::Local));
        assert!(!state.apply(1, true, Provenance::Local));
        // Same value, different source is still a change of provenance
        assert!(state.apply(1, true, Provenance::Remote));
        assert!(!state.apply(LINE_COUNT, true, Provenance::Remote));
    }

    #[test]
    fn test_reader_sees_published_state() {
        let mut state = TallyState::new();
        let reader = state.reader();
        assert_eq!(reader.current_snapshot(), TallySnapshot::default());

        state.apply(5, true, Provenance::Remote);
        let snap = reader.current_snapshot();
        assert_eq!(snap.line(5), TallyLine::new(true, Provenance::Remote));
        assert_eq!(snap, state.snapshot());
    }

    #[test]
    fn test_reader_is_usable_from_other_threads() {
        let mut state = TallyState::new();
        let reader = state.reader();
        state.apply(0, true, Provenance::Local);

        let handle = std::thread::spawn(move || reader.current_snapshot().is_on(0));
        assert!(handle.join().unwrap());
    }
}
