// Motor control for the differential base
//
// Provides:
// - Direction table (command direction -> driven wheel pairs + feedback encoder)
// - Serial bridge protocol for the PWM/encoder/ranging microcontroller
// - Fixed-power actuator driver API

pub mod bridge;
pub mod driver;
pub mod kinematics;

pub use bridge::{BridgeBus, BridgeError, BridgeOutput};
pub use driver::{ActuatorCommand, ActuatorDriver, MotorOutput};
pub use kinematics::{MovePlan, Sense, WheelPair, plan_for};
