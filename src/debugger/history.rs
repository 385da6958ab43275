/// Which stack depths had a call expression on top since the stack was
/// last that shallow. Used to find the frame "step out" returns to.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallDepthHistory {
    seen: Vec<bool>,
    valid_depth: usize,
}

impl CallDepthHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the stack after one step. Entries deeper than `depth` are stale
    /// and dropped before the slot at `depth` is reused.
    pub fn record(&mut self, depth: usize, call_expression: bool) {
        self.seen.resize(depth + 1, false);
        if call_expression {
            self.seen[depth] = true;
        }
        self.valid_depth = depth;
    }

    pub fn seen_at(&self, depth: usize) -> bool {
        self.seen.get(depth).copied().unwrap_or(false)
    }

    /// Depth of the nearest call expression strictly shallower than the
    /// current frame, or 0 when there is none.
    pub fn step_out_target(&self) -> usize {
        (1..self.valid_depth)
            .rev()
            .find(|&depth| self.seen_at(depth))
            .unwrap_or(0)
    }

    /// Deepest depth recorded by the most recent step.
    pub fn valid_depth(&self) -> usize {
        self.valid_depth
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.valid_depth = 0;
    }
}
