//! Debounced buffering of streamed text deltas.

use std::time::{Duration, Instant};

use crate::config::DEFAULT_QUIESCENCE_MS;
use crate::history::{ChatEntry, HistoryStore};

/// Buffers deltas until the stream goes quiet for `quiescence`, then moves
/// them into the active streaming entry in one step.
///
/// The quiescence timer is a deadline polled by the owner's event loop, so a
/// timer flush and a forced flush run on the same timeline: whichever runs
/// first takes the buffer and the other finds it empty.
#[derive(Debug, Clone)]
pub struct ContentCoalescer {
    buffer: String,
    quiescence: Duration,
    deadline: Option<Instant>,
}

impl Default for ContentCoalescer {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_QUIESCENCE_MS))
    }
}

impl ContentCoalescer {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            buffer: String::new(),
            quiescence,
            deadline: None,
        }
    }

    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Appends `delta` and restarts the quiescence timer from `now`.
    pub fn accumulate(&mut self, delta: &str, now: Instant) {
        self.buffer.push_str(delta);
        self.deadline = Some(now + self.quiescence);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Moves the buffered text into the streaming entry of `history`.
    ///
    /// Returns the number of bytes moved; zero means nothing was pending.
    /// Buffered text with no streaming entry to receive it is appended as a
    /// finished assistant entry.
    pub fn flush(&mut self, history: &mut HistoryStore) -> usize {
        self.deadline = None;
        if self.buffer.is_empty() {
            return 0;
        }

        let text = std::mem::take(&mut self.buffer);
        let moved = text.len();
        match history.streaming_entry_mut() {
            Some(entry) => entry.content.push_str(&text),
            None => {
                tracing::warn!(bytes = moved, "flushing buffered text without a streaming entry");
                history.append(ChatEntry::assistant(text));
            }
        }

        moved
    }

    /// Flushes only when the quiescence deadline has passed.
    pub fn flush_if_due(&mut self, history: &mut HistoryStore, now: Instant) -> usize {
        if self.is_due(now) {
            self.flush(history)
        } else {
            0
        }
    }

    /// Drops buffered text without delivering it.
    pub fn discard(&mut self) -> String {
        self.deadline = None;
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_history(seed: &str) -> HistoryStore {
        let mut history = HistoryStore::default();
        history.append(ChatEntry::streaming_assistant(seed));
        history
    }

    fn streaming_text(history: &HistoryStore) -> String {
        history
            .streaming_entry()
            .map(|entry| entry.content.clone())
            .unwrap_or_default()
    }

    #[test]
    fn flush_moves_buffer_into_streaming_entry() {
        let mut history = streaming_history("Hello");
        let mut coalescer = ContentCoalescer::default();
        let now = Instant::now();

        coalescer.accumulate(", ", now);
        coalescer.accumulate("world", now);
        assert_eq!(streaming_text(&history), "Hello");

        assert_eq!(coalescer.flush(&mut history), 7);
        assert_eq!(streaming_text(&history), "Hello, world");
        assert!(coalescer.is_empty());
        assert_eq!(coalescer.deadline(), None);
    }

    #[test]
    fn second_flush_without_accumulate_is_noop() {
        let mut history = streaming_history("a");
        let mut coalescer = ContentCoalescer::default();
        coalescer.accumulate("b", Instant::now());

        assert_eq!(coalescer.flush(&mut history), 1);
        assert_eq!(coalescer.flush(&mut history), 0);
        assert_eq!(streaming_text(&history), "ab");
    }

    #[test]
    fn deadline_restarts_on_every_delta() {
        let mut history = streaming_history("");
        let mut coalescer = ContentCoalescer::new(Duration::from_millis(50));
        let start = Instant::now();

        coalescer.accumulate("x", start);
        coalescer.accumulate("y", start + Duration::from_millis(40));

        assert_eq!(
            coalescer.flush_if_due(&mut history, start + Duration::from_millis(60)),
            0
        );
        assert_eq!(
            coalescer.flush_if_due(&mut history, start + Duration::from_millis(90)),
            2
        );
        assert_eq!(streaming_text(&history), "xy");
    }

    #[test]
    fn timer_after_forced_flush_observes_empty_buffer() {
        let mut history = streaming_history("");
        let mut coalescer = ContentCoalescer::new(Duration::from_millis(50));
        let start = Instant::now();
        coalescer.accumulate("once", start);

        assert_eq!(coalescer.flush(&mut history), 4);
        assert!(!coalescer.is_due(start + Duration::from_secs(1)));
        assert_eq!(
            coalescer.flush_if_due(&mut history, start + Duration::from_secs(1)),
            0
        );
        assert_eq!(streaming_text(&history), "once");
    }

    #[test]
    fn flush_without_streaming_entry_appends_finished_entry() {
        let mut history = HistoryStore::default();
        let mut coalescer = ContentCoalescer::default();
        coalescer.accumulate("orphan", Instant::now());

        coalescer.flush(&mut history);

        let last = history.last().expect("entry appended");
        assert_eq!(last.content, "orphan");
        assert!(!last.is_streaming);
    }
}
