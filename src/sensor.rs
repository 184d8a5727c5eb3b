// Distance sensor collaborators
//
// The runtime only needs `sample()`; how a sensor ranges is up to the backend.
// Out-of-range is data (the sentinel distance), never an error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::{OUT_OF_RANGE_MM, OUT_OF_RANGE_STATUS};
use crate::messages::DistanceSample;

/// Sensor index of the front ranger on the bridge
pub const SENSOR_FRONT: usize = 0;
/// Sensor index of the left ranger on the bridge
pub const SENSOR_LEFT: usize = 1;

/// A distance sensor that can be sampled from task context
pub trait DistanceSensor: Send {
    fn sample(&mut self) -> DistanceSample;
}

// Empty slot: out-of-range status with no distance
const SLOT_EMPTY: u32 = (OUT_OF_RANGE_STATUS as u32) << 16;

/// Latest raw ranging result per sensor, written by the bridge reader thread.
///
/// Distance and status are packed into one atomic word so a reader never sees
/// the distance of one report paired with the status of another.
#[derive(Debug)]
pub struct RangeSlots {
    slots: [AtomicU32; 2],
}

impl Default for RangeSlots {
    fn default() -> Self {
        Self {
            slots: [AtomicU32::new(SLOT_EMPTY), AtomicU32::new(SLOT_EMPTY)],
        }
    }
}

impl RangeSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, sensor: usize, range_mm: u16, status: u8) {
        if let Some(slot) = self.slots.get(sensor) {
            slot.store(((status as u32) << 16) | range_mm as u32, Ordering::Release);
        }
    }

    /// Returns (range_mm, status). An unknown sensor reads as out of range.
    pub fn load(&self, sensor: usize) -> (u16, u8) {
        let word = self
            .slots
            .get(sensor)
            .map_or(SLOT_EMPTY, |slot| slot.load(Ordering::Acquire));
        ((word & 0xFFFF) as u16, (word >> 16) as u8)
    }
}

/// Distance sensor hanging off the serial bridge
pub struct BridgeRanger {
    slots: Arc<RangeSlots>,
    sensor: usize,
}

impl BridgeRanger {
    pub fn new(slots: Arc<RangeSlots>, sensor: usize) -> Self {
        Self { slots, sensor }
    }
}

impl DistanceSensor for BridgeRanger {
    fn sample(&mut self) -> DistanceSample {
        let (range_mm, status) = self.slots.load(self.sensor);
        let sample = DistanceSample::from_ranging(range_mm, status);
        if sample.valid {
            debug!("Sensor {} distance: {} mm", self.sensor, sample.range_mm);
        } else {
            debug!("Sensor {} out of range", self.sensor);
        }
        sample
    }
}

/// Deterministic stand-in used when no bridge is attached.
///
/// Sweeps from `min_mm` towards `max_mm` in `step_mm` increments and reports
/// out-of-range once the sweep passes `max_mm`, then starts over.
pub struct SimulatedRanger {
    min_mm: u32,
    max_mm: u32,
    step_mm: u32,
    current: u32,
}

impl SimulatedRanger {
    pub fn new(min_mm: u32, max_mm: u32, step_mm: u32) -> Self {
        Self {
            min_mm,
            max_mm: max_mm.min(OUT_OF_RANGE_MM - 1),
            step_mm: step_mm.max(1),
            current: min_mm,
        }
    }
}

impl DistanceSensor for SimulatedRanger {
    fn sample(&mut self) -> DistanceSample {
        let reading = self.current;
        self.current += self.step_mm;
        if reading > self.max_mm {
            self.current = self.min_mm;
            return DistanceSample::out_of_range();
        }
        DistanceSample {
            range_mm: reading,
            valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_reads_out_of_range() {
        let slots = Arc::new(RangeSlots::new());
        let mut ranger = BridgeRanger::new(slots, SENSOR_FRONT);
        assert_eq!(ranger.sample(), DistanceSample::out_of_range());
    }

    #[test]
    fn test_bridge_ranger_reads_latest_report() {
        let slots = Arc::new(RangeSlots::new());
        let mut front = BridgeRanger::new(Arc::clone(&slots), SENSOR_FRONT);
        let mut left = BridgeRanger::new(Arc::clone(&slots), SENSOR_LEFT);

        slots.store(SENSOR_FRONT, 842, 0);
        slots.store(SENSOR_LEFT, 8190, OUT_OF_RANGE_STATUS);

        assert_eq!(
            front.sample(),
            DistanceSample {
                range_mm: 842,
                valid: true
            }
        );
        assert_eq!(left.sample().range_mm, OUT_OF_RANGE_MM);
        assert!(!left.sample().valid);
    }

    #[test]
    fn test_store_ignores_unknown_sensor() {
        let slots = RangeSlots::new();
        slots.store(7, 100, 0);
        assert_eq!(slots.load(SENSOR_FRONT), (0, OUT_OF_RANGE_STATUS));
    }

    #[test]
    fn test_unknown_sensor_reads_out_of_range() {
        let slots = Arc::new(RangeSlots::new());
        slots.store(SENSOR_FRONT, 842, 0);
        assert_eq!(slots.load(7), (0, OUT_OF_RANGE_STATUS));

        let mut ranger = BridgeRanger::new(slots, 5);
        assert_eq!(ranger.sample(), DistanceSample::out_of_range());
    }

    #[test]
    fn test_simulated_sweep_wraps_through_sentinel() {
        let mut ranger = SimulatedRanger::new(100, 300, 100);
        let ranges: Vec<u32> = (0..5).map(|_| ranger.sample().range_mm).collect();
        assert_eq!(ranges, vec![100, 200, 300, OUT_OF_RANGE_MM, 100]);
    }
}
