//! Cache-with-expiry wrapper.
//!
//! Keeps the TTL contract in one testable place instead of scattering
//! timestamp arithmetic through the trading loop.

use std::time::{Duration, Instant};

/// Single-slot cache whose value expires after a fixed TTL.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Option<(Instant, T)>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: None }
    }

    /// Store a value, stamping it with the current time.
    pub fn put(&mut self, value: T) {
        self.slot = Some((Instant::now(), value));
    }

    /// The cached value, if present and not expired. Expired entries are
    /// evicted on access.
    pub fn get(&mut self) -> Option<&T> {
        match &self.slot {
            Some((stamped, _)) if stamped.elapsed() <= self.ttl => {
                self.slot.as_ref().map(|(_, v)| v)
            }
            Some(_) => {
                self.slot = None;
                None
            }
            None => None,
        }
    }

    /// Drop the cached value unconditionally.
    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Age of the cached value, if any.
    pub fn age(&self) -> Option<Duration> {
        self.slot.as_ref().map(|(stamped, _)| stamped.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_value_is_returned() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());

        cache.put(42);
        assert_eq!(cache.get(), Some(&42));
        // Repeated reads within the TTL keep hitting
        assert_eq!(cache.get(), Some(&42));
    }

    #[test]
    fn test_expired_value_is_evicted() {
        let mut cache = TtlCache::new(Duration::from_millis(5));
        cache.put("signal");
        std::thread::sleep(Duration::from_millis(15));

        assert!(cache.get().is_none());
        assert!(cache.age().is_none());
    }

    #[test]
    fn test_put_refreshes_the_clock() {
        let mut cache = TtlCache::new(Duration::from_millis(30));
        cache.put(1);
        std::thread::sleep(Duration::from_millis(15));
        cache.put(2);
        std::thread::sleep(Duration::from_millis(20));

        // 35ms after the first put, but only 20ms after the second
        assert_eq!(cache.get(), Some(&2));
    }

    #[test]
    fn test_invalidate() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.put(7);
        cache.invalidate();
        assert!(cache.get().is_none());
    }
}
