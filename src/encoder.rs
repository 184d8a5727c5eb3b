// Wheel encoder pulse counters
//
// Pulses arrive from interrupt context (the bridge reader thread or the
// simulated plant); the motion controller reads and resets them between moves.
// Both counters are plain atomics so the increment side never blocks.

use std::sync::atomic::{AtomicU32, Ordering};

/// Which wheel an encoder is mounted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Process-wide pulse counters, zero at boot and after every move
#[derive(Debug, Default)]
pub struct EncoderCounters {
    left: AtomicU32,
    right: AtomicU32,
}

impl EncoderCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, side: Side) -> &AtomicU32 {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Count one pulse. Safe to call from interrupt context.
    #[inline]
    pub fn increment(&self, side: Side) {
        self.counter(side).fetch_add(1, Ordering::Relaxed);
    }

    /// Current count of one wheel
    #[inline]
    pub fn get(&self, side: Side) -> u32 {
        self.counter(side).load(Ordering::Acquire)
    }

    /// Returns (left, right)
    pub fn snapshot(&self) -> (u32, u32) {
        (self.get(Side::Left), self.get(Side::Right))
    }

    /// Zero both counters, returning what they held.
    ///
    /// Each counter is swapped atomically, so a pulse lands either in the
    /// returned value or in the fresh count, never in both and never lost.
    pub fn take(&self) -> (u32, u32) {
        (
            self.left.swap(0, Ordering::AcqRel),
            self.right.swap(0, Ordering::AcqRel),
        )
    }

    pub fn reset(&self) {
        self.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters_start_at_zero() {
        let counters = EncoderCounters::new();
        assert_eq!(counters.snapshot(), (0, 0));
    }

    #[test]
    fn test_sides_are_independent() {
        let counters = EncoderCounters::new();
        counters.increment(Side::Left);
        counters.increment(Side::Left);
        counters.increment(Side::Right);
        assert_eq!(counters.snapshot(), (2, 1));

        counters.reset();
        assert_eq!(counters.snapshot(), (0, 0));
    }

    #[test]
    fn test_no_pulse_lost_across_concurrent_resets() {
        const PULSES_PER_THREAD: u32 = 250;
        const THREADS: u32 = 4;

        let counters = Arc::new(EncoderCounters::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..PULSES_PER_THREAD {
                        counters.increment(Side::Left);
                    }
                })
            })
            .collect();

        // Task side keeps snapshotting and resetting while pulses are landing
        let mut taken = 0;
        while !handles.iter().all(|h| h.is_finished()) {
            let (left, _) = counters.snapshot();
            assert!(left <= PULSES_PER_THREAD * THREADS);
            taken += counters.take().0;
        }
        for handle in handles {
            handle.join().unwrap();
        }
        taken += counters.take().0;

        assert_eq!(taken, PULSES_PER_THREAD * THREADS);
        assert_eq!(counters.snapshot(), (0, 0));
    }
}
