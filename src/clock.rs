//! Scalar Lamport clock with a per-peer fractional tie-breaker.
//!
//! The clock is a real number: an integer logical time plus
//! `suffix_digit / 10`. Two peers with distinct id suffixes can never
//! observe the same clock value, which is what lets a seller's
//! [`crate::seller`] ordering check pick a unique winner among concurrent
//! buyers.

use parking_lot::Mutex;

#[derive(Debug)]
pub struct LamportClock {
    suffix: u8,
    time: Mutex<u64>,
}

impl LamportClock {
    pub fn new(suffix: u8) -> Self {
        LamportClock { suffix, time: Mutex::new(0) }
    }

    /// Local event: advance the clock by one tick.
    pub fn tick(&self) -> f64 {
        let mut time = self.time.lock();
        *time += 1;
        self.fractional(*time)
    }

    /// Pre-send increment, per spec §4.1.
    pub fn send(&self) -> f64 {
        self.tick()
    }

    /// Post-receive merge: `local = max(local, floor(remote)) + 1`, then the
    /// fractional part is always re-stamped with *this* peer's own suffix
    /// digit, never the sender's — otherwise two peers could converge on an
    /// identical fractional part and reintroduce the very ties the scheme
    /// exists to avoid.
    pub fn observe(&self, remote: f64) -> f64 {
        let remote_whole = remote.floor() as u64;
        let mut time = self.time.lock();
        *time = (*time).max(remote_whole) + 1;
        self.fractional(*time)
    }

    pub fn read(&self) -> f64 {
        let time = *self.time.lock();
        self.fractional(time)
    }

    fn fractional(&self, whole: u64) -> f64 {
        whole as f64 + (self.suffix as f64 / 10.0)
    }
}

/// Parses the tie-break suffix digit out of a peer id, per spec §3: "suffix
/// digit significant for clock tie-breaking". Computed once at
/// construction time (spec §9 design note), never re-parsed per operation.
pub fn suffix_digit(id: &str) -> Option<u8> {
    id.chars().rev().find_map(|c| c.to_digit(10)).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_breaks_ties_deterministically() {
        let a = LamportClock::new(3);
        let b = LamportClock::new(5);
        let ta = a.tick();
        let tb = b.tick();
        assert_eq!(ta.floor(), tb.floor());
        assert!(tb > ta, "peer with higher suffix wins ties");
    }

    #[test]
    fn observe_is_monotonic_and_strictly_increasing_on_merge() {
        let clock = LamportClock::new(1);
        let first = clock.tick();
        let merged = clock.observe(10.5);
        assert!(merged > first);
        assert!(merged.floor() as u64 >= 11);
    }

    #[test]
    fn parses_trailing_digit() {
        assert_eq!(suffix_digit("buyer7"), Some(7));
        assert_eq!(suffix_digit("trader0"), Some(0));
        assert_eq!(suffix_digit("nodigits"), None);
    }
}
