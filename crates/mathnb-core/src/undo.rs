//! Undo/Redo Manager
//!
//! Linear history of `{forward, inverse}` batches with a cursor. Undo and
//! redo hand out the batch to apply; the cursor only moves once the caller
//! reports that the batch was applied.

use mathnb_store::ChangeRequest;
use std::collections::VecDeque;

/// One undoable step
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    /// Batch that redoes the step
    pub forward: Vec<ChangeRequest>,
    /// Batch that undoes the step
    pub inverse: Vec<ChangeRequest>,
}

/// Per-notebook undo history
#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: VecDeque<UndoEntry>,
    top: usize,
    limit: usize,
}

impl UndoStack {
    /// Create empty history keeping at most `limit` entries
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            top: 0,
            limit,
        }
    }

    /// Record a step, discarding anything that was undone
    pub fn push(&mut self, entry: UndoEntry) {
        if self.limit == 0 {
            return;
        }
        self.entries.truncate(self.top);
        self.entries.push_back(entry);
        if self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        self.top = self.entries.len();
    }

    /// Check if there is a step to undo
    #[inline]
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.top > 0
    }

    /// Check if there is a step to redo
    #[inline]
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.top < self.entries.len()
    }

    /// Inverse batch of the step below the cursor
    #[must_use]
    pub fn next_undo(&self) -> Option<&[ChangeRequest]> {
        self.top
            .checked_sub(1)
            .map(|i| self.entries[i].inverse.as_slice())
    }

    /// Forward batch of the step at the cursor
    #[must_use]
    pub fn next_redo(&self) -> Option<&[ChangeRequest]> {
        self.entries.get(self.top).map(|e| e.forward.as_slice())
    }

    /// Move the cursor down after an undo batch was applied
    pub fn undone(&mut self) {
        self.top = self.top.saturating_sub(1);
    }

    /// Move the cursor up after a redo batch was applied
    pub fn redone(&mut self) {
        if self.can_redo() {
            self.top += 1;
        }
    }

    /// Entries below the cursor
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.top
    }

    /// All recorded entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathnb_store::NodeId;

    fn entry(n: u64) -> UndoEntry {
        UndoEntry {
            forward: vec![ChangeRequest::delete(NodeId(n))],
            inverse: vec![ChangeRequest::delete(NodeId(n + 100))],
        }
    }

    #[test]
    fn boundaries_are_no_ops() {
        let mut stack = UndoStack::default();
        assert!(!stack.can_undo());
        assert!(!stack.can_redo());
        assert!(stack.next_undo().is_none());
        assert!(stack.next_redo().is_none());
        stack.undone();
        stack.redone();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn undo_then_redo_walks_the_cursor() {
        let mut stack = UndoStack::default();
        stack.push(entry(1));
        stack.push(entry(2));

        assert_eq!(stack.next_undo(), Some(&entry(2).inverse[..]));
        stack.undone();
        assert_eq!(stack.next_undo(), Some(&entry(1).inverse[..]));
        assert_eq!(stack.next_redo(), Some(&entry(2).forward[..]));
        stack.redone();
        assert!(!stack.can_redo());
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn push_truncates_redo_history() {
        let mut stack = UndoStack::default();
        stack.push(entry(1));
        stack.push(entry(2));
        stack.undone();
        stack.push(entry(3));

        assert_eq!(stack.len(), 2);
        assert!(!stack.can_redo());
        assert_eq!(stack.next_undo(), Some(&entry(3).inverse[..]));
    }

    #[test]
    fn limit_drops_oldest() {
        let mut stack = UndoStack::new(2);
        for n in 1..=3 {
            stack.push(entry(n));
        }
        assert_eq!(stack.len(), 2);
        stack.undone();
        stack.undone();
        assert!(!stack.can_undo());
        assert_eq!(stack.next_redo(), Some(&entry(2).forward[..]));

        let mut long = UndoStack::new(3);
        for n in 1..=1000 {
            long.push(entry(n));
        }
        assert_eq!(long.len(), 3);
        assert_eq!(long.next_undo(), Some(&entry(1000).inverse[..]));
        long.undone();
        long.undone();
        assert_eq!(long.next_undo(), Some(&entry(998).inverse[..]));

        let mut disabled = UndoStack::new(0);
        disabled.push(entry(1));
        assert!(disabled.is_empty());
    }
}
