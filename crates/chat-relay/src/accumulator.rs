/// Reply text delivered so far in one turn.
///
/// Owned by a single turn task. Consuming it with [`into_text`] is the only
/// way to get the text out, so a turn can persist its reply at most once.
///
/// [`into_text`]: StreamAccumulator::into_text
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    deltas: usize,
}

impl StreamAccumulator {
    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.deltas += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of deltas appended.
    pub fn deltas(&self) -> usize {
        self.deltas
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
