//! Monotonic per-context id generation.
//!
//! One [`ContextIds`] is created per conversation context. Counters must
//! never be shared across contexts — each request gets its own instance.

use std::sync::atomic::{AtomicU64, Ordering};

/// Holds the four atomic chunk/message/block/thread counters for one
/// conversation context.
#[derive(Debug, Default)]
pub struct ContextIds {
    chunk: AtomicU64,
    message: AtomicU64,
    block: AtomicU64,
    thread: AtomicU64,
}

fn next(counter: &AtomicU64, prefix: char) -> String {
    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{prefix}{n}")
}

impl ContextIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_chunk_id(&self) -> String {
        next(&self.chunk, 'C')
    }

    pub fn generate_message_id(&self) -> String {
        next(&self.message, 'M')
    }

    pub fn generate_block_id(&self) -> String {
        next(&self.block, 'B')
    }

    pub fn generate_thread_id(&self) -> String {
        next(&self.thread, 'T')
    }

    /// Reset all counters to zero. Tests only.
    pub fn reset(&self) {
        self.chunk.store(0, Ordering::Relaxed);
        self.message.store(0, Ordering::Relaxed);
        self.block.store(0, Ordering::Relaxed);
        self.thread.store(0, Ordering::Relaxed);
    }
}

/// A 21-character URL-safe id, unique across contexts (e.g. for chunk dedup
/// across reconnects). Not derived from a [`ContextIds`] counter.
pub fn generate_nanoid() -> String {
    nanoid::nanoid!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn counters_are_monotonic_and_prefixed() {
        let ids = ContextIds::new();
        assert_eq!(ids.generate_chunk_id(), "C1");
        assert_eq!(ids.generate_chunk_id(), "C2");
        assert_eq!(ids.generate_message_id(), "M1");
        assert_eq!(ids.generate_block_id(), "B1");
        assert_eq!(ids.generate_thread_id(), "T1");
        assert_eq!(ids.generate_chunk_id(), "C3");
    }

    #[test]
    fn reset_restarts_counters() {
        let ids = ContextIds::new();
        ids.generate_chunk_id();
        ids.generate_chunk_id();
        ids.reset();
        assert_eq!(ids.generate_chunk_id(), "C1");
    }

    #[test]
    fn contexts_never_share_counters() {
        let a = ContextIds::new();
        let b = ContextIds::new();
        a.generate_message_id();
        a.generate_message_id();
        assert_eq!(b.generate_message_id(), "M1");
    }

    #[test]
    fn nanoid_is_21_chars_and_unique() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = generate_nanoid();
            assert_eq!(id.chars().count(), 21);
            assert!(seen.insert(id), "nanoid collision in empirical sample");
        }
    }
}
