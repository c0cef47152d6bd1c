use std::collections::BTreeSet;

/// Tracks the completed prefix of a job's frontier
///
/// Items finish out of order; finished positions past the prefix are
/// buffered until the gap before them closes. The cursor never moves back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeCursor {
    /// First position not yet finished
    next: usize,

    /// Finished positions beyond `next`
    pending: BTreeSet<usize>,
}

impl ResumeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a cursor from a persisted prefix and the finished positions
    pub fn restore(next: usize, finished: impl IntoIterator<Item = usize>) -> Self {
        let mut cursor = Self {
            next,
            pending: BTreeSet::new(),
        };
        for position in finished {
            cursor.mark_finished(position);
        }
        cursor
    }

    /// The number of frontier positions finished without gaps
    pub fn position(&self) -> usize {
        self.next
    }

    /// Records a finished position
    ///
    /// # Returns
    ///
    /// `true` if the cursor advanced
    pub fn mark_finished(&mut self, position: usize) -> bool {
        if position < self.next {
            return false;
        }

        self.pending.insert(position);
        let before = self.next;
        while self.pending.remove(&self.next) {
            self.next += 1;
        }
        self.next != before
    }
}
