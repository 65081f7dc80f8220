//! Rolling conversation memory.
//!
//! A bounded, time-windowed, insertion-ordered log of conversation turns.
//! Entries are append-only and eviction runs before every prompt build, so
//! the store never hands the prompt builder anything older than the time
//! window or beyond the size cap.

use std::time::Duration;

/// One conversation turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub speaker: String,
    pub text: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Insertion-ordered sequence of conversation turns.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn at the tail.
    pub fn append(&mut self, speaker: impl Into<String>, text: impl Into<String>, timestamp: i64) {
        self.entries.push(MemoryEntry {
            speaker: speaker.into(),
            text: text.into(),
            timestamp,
        });
    }

    /// Drop entries older than `now - time_limit`, then keep only the most
    /// recent `space_limit` of the remainder (oldest evicted first).
    /// Idempotent.
    pub fn evict(&mut self, now: i64, time_limit: Duration, space_limit: usize) {
        let cutoff = now - time_limit.as_millis() as i64;
        self.entries.retain(|entry| entry.timestamp >= cutoff);
        if self.entries.len() > space_limit {
            let excess = self.entries.len() - space_limit;
            self.entries.drain(..excess);
        }
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Read-only view for the prompt builder.
    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn store_with(entries: &[(&str, &str, i64)]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (speaker, text, ts) in entries {
            store.append(*speaker, *text, *ts);
        }
        store
    }

    #[test]
    fn append_preserves_order() {
        let store = store_with(&[("alice", "hi", 1), ("bob", "hey", 2)]);
        let speakers: Vec<_> = store.entries().iter().map(|e| e.speaker.as_str()).collect();
        assert_eq!(speakers, ["alice", "bob"]);
    }

    #[test]
    fn evict_drops_entries_outside_time_window() {
        let now = 10 * 60 * 1000;
        let mut store = store_with(&[("a", "old", 0), ("b", "fresh", now - 1000)]);
        store.evict(now, 5 * MINUTE, usize::MAX);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].text, "fresh");
    }

    #[test]
    fn evict_keeps_most_recent_within_space_limit() {
        let mut store = MemoryStore::new();
        for i in 0..10 {
            store.append("user", format!("msg {i}"), i);
        }
        store.evict(10, 10 * MINUTE, 3);
        let texts: Vec<_> = store.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["msg 7", "msg 8", "msg 9"]);
    }

    #[test]
    fn evict_is_idempotent() {
        let mut store = store_with(&[("a", "1", 100), ("a", "2", 200), ("a", "3", 300)]);
        store.evict(300, MINUTE, 2);
        let first: Vec<_> = store.entries().to_vec();
        store.evict(300, MINUTE, 2);
        assert_eq!(store.entries(), first.as_slice());
    }

    #[test]
    fn evict_never_exceeds_limits_for_any_sequence() {
        // Property-style check over a spread of message sequences.
        for count in 0..40usize {
            let mut store = MemoryStore::new();
            for i in 0..count {
                store.append("user", "m", (i as i64) * 1000);
            }
            let now = count as i64 * 1000;
            store.evict(now, Duration::from_secs(15), 5);
            assert!(store.len() <= 5, "space limit violated at count {count}");
            let cutoff = now - 15_000;
            assert!(
                store.entries().iter().all(|e| e.timestamp >= cutoff),
                "time limit violated at count {count}"
            );
        }
    }

    #[test]
    fn six_messages_one_second_apart_leave_five_most_recent() {
        let mut store = MemoryStore::new();
        for i in 0..6 {
            store.append("user", format!("msg {i}"), i * 1000);
        }
        store.evict(5000, 10 * MINUTE, 5);
        assert_eq!(store.len(), 5);
        assert_eq!(store.entries()[0].text, "msg 1");
        assert_eq!(store.entries()[4].text, "msg 5");
    }

    #[test]
    fn clear_empties_the_store() {
        let mut store = store_with(&[("a", "1", 1)]);
        store.clear();
        assert!(store.is_empty());
        store.clear();
        assert!(store.is_empty());
    }
}
