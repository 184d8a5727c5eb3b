// High-level actuator driver for the differential base
//
// Turns "drive this pair forward/reverse" and "stop this pair" into per-pair
// enable + duty commands for whatever output backend is attached (serial
// bridge or simulated plant).

use std::fmt;

use tracing::{debug, warn};

use super::kinematics::{Sense, WheelPair};

/// Output state of one wheel pair.
///
/// At most one of the two duties is non-zero, and a disabled pair has both at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorCommand {
    pub enabled: bool,
    pub forward_duty: u8,
    pub reverse_duty: u8,
}

impl ActuatorCommand {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn driving(sense: Sense, duty: u8) -> Self {
        match sense {
            Sense::Forward => Self {
                enabled: true,
                forward_duty: duty,
                reverse_duty: 0,
            },
            Sense::Reverse => Self {
                enabled: true,
                forward_duty: 0,
                reverse_duty: duty,
            },
        }
    }

    /// Duty actually reaching the motor, signed by direction
    pub fn signed_duty(&self) -> i16 {
        if !self.enabled {
            return 0;
        }
        self.forward_duty as i16 - self.reverse_duty as i16
    }
}

/// Backend that puts an `ActuatorCommand` onto the hardware
pub trait MotorOutput: Send {
    type Error: fmt::Display;

    fn apply(&mut self, pair: WheelPair, cmd: ActuatorCommand) -> Result<(), Self::Error>;
}

/// Fixed-power actuator driver for the two wheel pairs
pub struct ActuatorDriver<O: MotorOutput> {
    output: O,
    duty: u8,
    state: [ActuatorCommand; 2],
}

impl<O: MotorOutput> ActuatorDriver<O> {
    /// Wrap an initialised output backend; every drive uses `duty`
    pub fn new(output: O, duty: u8) -> Self {
        Self {
            output,
            duty,
            state: [ActuatorCommand::off(); 2],
        }
    }

    fn slot(pair: WheelPair) -> usize {
        match pair {
            WheelPair::Left => 0,
            WheelPair::Right => 1,
        }
    }

    fn apply(&mut self, pair: WheelPair, cmd: ActuatorCommand) {
        self.state[Self::slot(pair)] = cmd;
        // A configured actuator is assumed present; a failed write is only logged
        if let Err(e) = self.output.apply(pair, cmd) {
            warn!("Failed to command {:?} wheel pair: {}", pair, e);
        }
    }

    /// Drive one pair at the configured power
    pub fn drive(&mut self, pair: WheelPair, sense: Sense) {
        debug!("Driving {:?} pair {:?} at duty {}", pair, sense, self.duty);
        self.apply(pair, ActuatorCommand::driving(sense, self.duty));
    }

    /// Zero the duty and disable one pair
    pub fn stop(&mut self, pair: WheelPair) {
        debug!("Stopping {:?} pair", pair);
        self.apply(pair, ActuatorCommand::off());
    }

    pub fn stop_all(&mut self) {
        for pair in WheelPair::ALL {
            self.stop(pair);
        }
    }

    /// Last command sent to a pair
    pub fn command(&self, pair: WheelPair) -> ActuatorCommand {
        self.state[Self::slot(pair)]
    }
}

impl<O: MotorOutput> Drop for ActuatorDriver<O> {
    fn drop(&mut self) {
        // Never leave a motor running when the driver goes away
        self.stop_all();
    }
}
