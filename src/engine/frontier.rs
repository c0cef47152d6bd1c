use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use tokio::time::Instant;

/// Positions of a job's items waiting to be attempted
///
/// Ready positions come out lowest first, which is submission order. A
/// retried item sits in the delayed heap until its not-before time passes.
#[derive(Debug, Default)]
pub struct Frontier {
    ready: BTreeSet<usize>,
    delayed: BinaryHeap<Reverse<(Instant, usize)>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: usize) {
        self.ready.insert(position);
    }

    /// Queues a position that must not be attempted before `not_before`
    pub fn push_delayed(&mut self, position: usize, not_before: Instant) {
        self.delayed.push(Reverse((not_before, position)));
    }

    /// Moves every delayed position whose time has come into the ready set
    pub fn promote_due(&mut self, now: Instant) {
        while let Some(Reverse((at, position))) = self.delayed.peek().copied() {
            if at > now {
                break;
            }
            self.delayed.pop();
            self.ready.insert(position);
        }
    }

    /// Takes the first ready position accepted by `pred`
    pub fn pop_where(&mut self, mut pred: impl FnMut(usize) -> bool) -> Option<usize> {
        let position = self.ready.iter().copied().find(|p| pred(*p))?;
        self.ready.remove(&position);
        Some(position)
    }

    /// When the earliest delayed position becomes ready
    pub fn next_due(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse((at, _))| *at)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.delayed.clear();
    }
}
