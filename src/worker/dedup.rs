// src/worker/dedup.rs
// Model runtimes emit either incremental deltas or growing-prefix snapshots.
// This accumulator normalizes both into the exact delta that should reach
// the client, while keeping the true accumulated text for logging/history.

#[derive(Default)]
pub struct ResponseAccumulator {
    response: String,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw chunk from the model. Returns the text delta that
    /// should be forwarded to the client sink.
    pub fn push(&mut self, chunk: &str) -> String {
        if chunk.starts_with(self.response.as_str()) {
            let delta = chunk[self.response.len()..].to_string();
            self.response = chunk.to_string();
            delta
        } else {
            self.response.push_str(chunk);
            chunk.to_string()
        }
    }

    pub fn text(&self) -> &str {
        &self.response
    }

    pub fn into_text(self) -> String {
        self.response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_concatenate_directly() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.push("Hello"), "Hello");
        assert_eq!(acc.push(", world"), ", world");
        assert_eq!(acc.text(), "Hello, world");
    }

    #[test]
    fn growing_prefixes_emit_only_the_new_suffix() {
        let mut acc = ResponseAccumulator::new();
        assert_eq!(acc.push("Hel"), "Hel");
        assert_eq!(acc.push("Hello"), "lo");
        assert_eq!(acc.push("Hello, world"), ", world");
        assert_eq!(acc.text(), "Hello, world");
    }

    #[test]
    fn mixed_shapes_still_reconstruct_correctly() {
        let mut acc = ResponseAccumulator::new();
        acc.push("The cat");
        acc.push(" sat"); // delta
        acc.push("The cat sat on the mat"); // prefix snapshot
        assert_eq!(acc.text(), "The cat sat on the mat");
    }
}
