use std::collections::BTreeSet;
use tracing::debug;

/// User lines flagged as breakpoints (1-indexed).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BreakpointIndex {
    lines: BTreeSet<usize>,
}

impl BreakpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, line: usize) {
        self.lines.insert(line);
        debug!(line, "breakpoint set");
    }

    pub fn remove(&mut self, line: usize) {
        self.lines.remove(&line);
        debug!(line, "breakpoint removed");
    }

    /// Flip the breakpoint on `line`. Returns whether it is now set.
    pub fn toggle(&mut self, line: usize) -> bool {
        if self.lines.contains(&line) {
            self.remove(line);
            false
        } else {
            self.add(line);
            true
        }
    }

    /// Replace every breakpoint with `lines`.
    pub fn replace(&mut self, lines: impl IntoIterator<Item = usize>) {
        self.lines = lines.into_iter().collect();
        debug!(count = self.lines.len(), "breakpoints replaced");
    }

    pub fn contains(&self, line: usize) -> bool {
        self.lines.contains(&line)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines.iter().copied()
    }
}
