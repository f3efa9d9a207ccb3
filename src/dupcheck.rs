use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

type Fingerprint = [u8; 32];

/// Expired entries are swept once the table grows past this many entries,
/// at most once per TTL.
const PRUNE_THRESHOLD: usize = 4096;

/// Time-bounded duplicate detector keyed by a SHA-256 of the payload bytes.
pub struct DupChecker {
    ttl: Duration,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    expiries: HashMap<Fingerprint, Instant>,
    next_sweep: Option<Instant>,
}

impl Seen {
    fn sweep_due(&self, now: Instant) -> bool {
        self.expiries.len() >= PRUNE_THRESHOLD && self.next_sweep.map_or(true, |at| now >= at)
    }
}

impl DupChecker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: Mutex::new(Seen::default()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// `true` when the same bytes were seen within the TTL. Every call
    /// refreshes the entry's expiry.
    pub fn is_duplicate(&self, bytes: &[u8]) -> bool {
        self.is_duplicate_at(bytes, Instant::now())
    }

    fn is_duplicate_at(&self, bytes: &[u8], now: Instant) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let fingerprint: Fingerprint = Sha256::digest(bytes).into();
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);

        if seen.sweep_due(now) {
            seen.expiries.retain(|_, expiry| *expiry > now);
            seen.next_sweep = Some(now + self.ttl);
        }

        let live = match seen.expiries.get(&fingerprint) {
            Some(expiry) => *expiry > now,
            None => false,
        };
        seen.expiries.insert(fingerprint, now + self.ttl);
        live
    }

    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .expiries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeats_within_ttl_are_duplicates() {
        let checker = DupChecker::new(Duration::from_secs(60));
        assert!(!checker.is_duplicate(b"{\"a\":1}"));
        assert!(checker.is_duplicate(b"{\"a\":1}"));
        assert!(!checker.is_duplicate(b"{\"a\":2}"));
    }

    #[test]
    fn expired_entries_are_not_duplicates() {
        let checker = DupChecker::new(Duration::from_millis(10));
        let start = Instant::now();
        assert!(!checker.is_duplicate_at(b"x", start));
        assert!(!checker.is_duplicate_at(b"x", start + Duration::from_millis(20)));
        assert!(checker.is_duplicate_at(b"x", start + Duration::from_millis(25)));
    }

    #[test]
    fn full_table_is_swept_at_most_once_per_ttl() {
        let ttl = Duration::from_millis(10);
        let checker = DupChecker::new(ttl);
        let start = Instant::now();
        for n in 0..PRUNE_THRESHOLD {
            checker.is_duplicate_at(n.to_string().as_bytes(), start);
        }
        assert_eq!(checker.len(), PRUNE_THRESHOLD);

        // First sweep finds nothing expired and schedules the next one.
        checker.is_duplicate_at(b"late-1", start + Duration::from_millis(5));
        assert_eq!(checker.len(), PRUNE_THRESHOLD + 1);

        // Entries have expired but the next sweep is not yet due.
        checker.is_duplicate_at(b"late-2", start + Duration::from_millis(12));
        assert_eq!(checker.len(), PRUNE_THRESHOLD + 2);

        checker.is_duplicate_at(b"late-3", start + Duration::from_millis(16));
        assert_eq!(checker.len(), 2);
        assert!(checker.is_duplicate_at(b"late-2", start + Duration::from_millis(17)));
    }

    #[test]
    fn zero_ttl_disables_checking() {
        let checker = DupChecker::disabled();
        assert!(!checker.is_duplicate(b"x"));
        assert!(!checker.is_duplicate(b"x"));
        assert!(checker.is_empty());
    }
}
