use std::collections::VecDeque;

use tokio_tungstenite::tungstenite::Message;

/// FIFO buffer for frames destined for the upstream leg while its dial is
/// still in flight.
///
/// Append-only until the flush: once the upstream socket is ready the whole
/// queue is drained in insertion order, and the invariant that every queued
/// frame precedes every post-ready frame in wire order is enforced by the
/// caller draining under the link's state lock.
#[derive(Debug, Default)]
pub struct PendingQueue {
    frames: VecDeque<Message>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame behind everything already buffered.
    pub fn push(&mut self, frame: Message) {
        self.frames.push_back(frame);
    }

    /// Take all buffered frames, oldest first, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.frames).into()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Message {
        Message::Text(s.into())
    }

    #[test]
    fn drains_in_insertion_order() {
        let mut queue = PendingQueue::new();
        queue.push(text("first"));
        queue.push(text("second"));
        queue.push(text("third"));

        let drained = queue.drain();
        let texts: Vec<String> = drained
            .iter()
            .map(|m| match m {
                Message::Text(t) => t.to_string(),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn drain_leaves_queue_empty() {
        let mut queue = PendingQueue::new();
        queue.push(text("only"));
        assert_eq!(queue.len(), 1);

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn push_after_drain_starts_fresh() {
        let mut queue = PendingQueue::new();
        queue.push(text("a"));
        queue.drain();
        queue.push(text("b"));

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert!(matches!(&drained[0], Message::Text(t) if t.as_str() == "b"));
    }
}
