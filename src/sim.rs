// Simulated plant for running without hardware
//
// Acts as the motor output backend and, from its own thread, turns applied
// duty into encoder pulses the same way the bridge reader would deliver them.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::encoder::{EncoderCounters, Side};
use crate::motor::{ActuatorCommand, MotorOutput, WheelPair};

/// Duty that produces one pulse per tick
pub const DUTY_FULL_SCALE: u32 = u8::MAX as u32;

/// Pulse-generator tick
pub const SIM_TICK: Duration = Duration::from_millis(1);

#[derive(Clone, Default)]
pub struct SimulatedPlant {
    duty: Arc<[AtomicU16; 2]>,
}

impl SimulatedPlant {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(pair: WheelPair) -> usize {
        match pair {
            WheelPair::Left => 0,
            WheelPair::Right => 1,
        }
    }

    /// Duty magnitude currently applied to a pair
    pub fn duty(&self, pair: WheelPair) -> u16 {
        self.duty[Self::slot(pair)].load(Ordering::Acquire)
    }

    /// Start the pulse generator. It stops once the counters are dropped.
    pub fn spawn_pulses(&self, counters: &Arc<EncoderCounters>, tick: Duration) -> JoinHandle<()> {
        let duty = Arc::clone(&self.duty);
        let counters: Weak<EncoderCounters> = Arc::downgrade(counters);
        thread::spawn(move || {
            let mut acc = [0u32; 2];
            loop {
                let Some(counters) = counters.upgrade() else {
                    debug!("Encoder counters gone, pulse generator exiting");
                    return;
                };
                for (i, side) in [Side::Left, Side::Right].into_iter().enumerate() {
                    acc[i] += duty[i].load(Ordering::Acquire) as u32;
                    while acc[i] >= DUTY_FULL_SCALE {
                        counters.increment(side);
                        acc[i] -= DUTY_FULL_SCALE;
                    }
                }
                drop(counters);
                thread::sleep(tick);
            }
        })
    }
}

impl MotorOutput for SimulatedPlant {
    type Error = Infallible;

    fn apply(&mut self, pair: WheelPair, cmd: ActuatorCommand) -> Result<(), Infallible> {
        self.duty[Self::slot(pair)].store(cmd.signed_duty().unsigned_abs(), Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::Sense;

    #[test]
    fn test_pulses_follow_driven_pair() {
        let counters = Arc::new(EncoderCounters::new());
        let mut plant = SimulatedPlant::new();
        let pulses = plant.spawn_pulses(&counters, SIM_TICK);

        plant
            .apply(WheelPair::Right, ActuatorCommand::driving(Sense::Reverse, 255))
            .unwrap();
        assert_eq!(plant.duty(WheelPair::Right), 255);
        thread::sleep(Duration::from_millis(30));

        let (left, right) = counters.snapshot();
        assert_eq!(left, 0);
        assert!(right > 0);

        plant.apply(WheelPair::Right, ActuatorCommand::off()).unwrap();
        thread::sleep(Duration::from_millis(5));
        let stopped = counters.get(Side::Right);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counters.get(Side::Right), stopped);

        drop(counters);
        pulses.join().unwrap();
    }
}
