//! Processed-event tracking for webhook de-duplication.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Remembers which webhook events were already acted on.
///
/// Entries expire after `ttl`; once `max_entries` is reached the oldest
/// entry is evicted to make room.
pub struct ProcessedEvents {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for ProcessedEvents {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60), 10_000)
    }
}

impl ProcessedEvents {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Returns true if `key` is new (act on it), false if it was already
    /// seen within the TTL. New keys are recorded.
    pub fn check_and_record(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&recorded_at) = entries.get(key) {
            if now.duration_since(recorded_at) < self.ttl {
                return false;
            }
        }

        entries.retain(|_, recorded_at| now.duration_since(*recorded_at) < self.ttl);

        if entries.len() >= self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(key.to_string(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_key_rejected() {
        let seen = ProcessedEvents::new(Duration::from_secs(60), 100);
        assert!(seen.check_and_record("INV-001|INVOICING.INVOICE.PAID"));
        assert!(!seen.check_and_record("INV-001|INVOICING.INVOICE.PAID"));
        assert!(seen.check_and_record("INV-002|INVOICING.INVOICE.PAID"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_expired_key_accepted_again() {
        let seen = ProcessedEvents::new(Duration::from_millis(20), 100);
        assert!(seen.check_and_record("a"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(seen.check_and_record("a"));
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let seen = ProcessedEvents::new(Duration::from_secs(60), 2);
        assert!(seen.check_and_record("a"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(seen.check_and_record("b"));
        assert!(seen.check_and_record("c"));
        assert_eq!(seen.len(), 2);
        // "a" was evicted
        assert!(seen.check_and_record("a"));
    }
}
