// Drive-until-target motion controller
//
// Idle -> Driving -> Stopped(Reached | TimedOut) -> Idle
//
// Drive power is fixed; encoder feedback only decides when to stop. The wait
// is a deadline-bounded poll that yields to the scheduler on every iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::encoder::{EncoderCounters, Side};
use crate::messages::{Direction, MotionRequest};
use crate::motor::{ActuatorDriver, MotorOutput, kinematics::plan_for};

/// Why a move ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Reached,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Driving(Direction),
    Stopped(StopReason),
}

/// Result of one completed move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveReport {
    pub direction: Direction,
    pub reason: StopReason,
    /// Feedback encoder count when the motors were stopped
    pub steps: u32,
    pub elapsed: Duration,
}

pub struct MotionController<O: MotorOutput> {
    actuators: ActuatorDriver<O>,
    counters: Arc<EncoderCounters>,
    state: MotionState,
}

impl<O: MotorOutput> MotionController<O> {
    pub fn new(actuators: ActuatorDriver<O>, counters: Arc<EncoderCounters>) -> Self {
        Self {
            actuators,
            counters,
            state: MotionState::Idle,
        }
    }

    pub fn state(&self) -> MotionState {
        self.state
    }

    pub fn counters(&self) -> &Arc<EncoderCounters> {
        &self.counters
    }

    pub fn actuators(&self) -> &ActuatorDriver<O> {
        &self.actuators
    }

    /// Run one move to completion.
    ///
    /// Returns once the feedback encoder reaches `target_steps` or the timeout
    /// elapses, whichever comes first. Both encoder counters are zero afterwards.
    pub async fn execute(&mut self, request: MotionRequest) -> MoveReport {
        let plan = plan_for(request.direction);
        let started = Instant::now();

        self.state = MotionState::Driving(request.direction);
        info!(
            "Move {:?}: target {} steps, timeout {}ms",
            request.direction,
            request.target_steps,
            request.timeout.as_millis()
        );
        for &(pair, sense) in plan.driven {
            self.actuators.drive(pair, sense);
        }

        let reason = loop {
            if self.counters.get(plan.feedback) >= request.target_steps {
                break StopReason::Reached;
            }
            if started.elapsed() > request.timeout {
                break StopReason::TimedOut;
            }
            tokio::task::yield_now().await;
        };

        for &(pair, _) in plan.driven {
            self.actuators.stop(pair);
        }
        self.state = MotionState::Stopped(reason);

        // Next move starts from zero whatever happened
        let (left, right) = self.counters.take();
        let steps = match plan.feedback {
            Side::Left => left,
            Side::Right => right,
        };
        let elapsed = started.elapsed();

        match reason {
            StopReason::Reached => info!(
                "Move {:?} reached {} steps in {}ms",
                request.direction,
                steps,
                elapsed.as_millis()
            ),
            StopReason::TimedOut => info!(
                "Move {:?} timed out after {}ms at {}/{} steps",
                request.direction,
                elapsed.as_millis(),
                steps,
                request.target_steps
            ),
        }
        debug!("Encoder counts at stop: left={}, right={}", left, right);

        self.state = MotionState::Idle;
        MoveReport {
            direction: request.direction,
            reason,
            steps,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::driver::testing::RecordingOutput;
    use crate::motor::{ActuatorCommand, Sense, WheelPair};
    use crate::sim::{SIM_TICK, SimulatedPlant};

    fn request(direction: Direction, target_steps: u32, timeout_ms: u64) -> MotionRequest {
        MotionRequest {
            direction,
            target_steps,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn recording_controller() -> (MotionController<RecordingOutput>, RecordingOutput) {
        let output = RecordingOutput::default();
        let driver = ActuatorDriver::new(output.clone(), 180);
        let controller = MotionController::new(driver, Arc::new(EncoderCounters::new()));
        (controller, output)
    }

    #[tokio::test]
    async fn test_zero_target_stops_immediately() {
        let (mut controller, output) = recording_controller();
        let report = controller.execute(request(Direction::Left, 0, 1000)).await;

        assert_eq!(report.reason, StopReason::Reached);
        assert!(report.elapsed < Duration::from_millis(100));
        assert_eq!(
            output.commands(),
            vec![
                (WheelPair::Right, ActuatorCommand::driving(Sense::Forward, 180)),
                (WheelPair::Right, ActuatorCommand::off()),
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_bounds_move_and_resets_counters() {
        let (mut controller, output) = recording_controller();
        // A stray pulse on the other wheel must not satisfy an Up move
        controller.counters().increment(Side::Right);

        let report = controller.execute(request(Direction::Up, 500, 50)).await;

        assert_eq!(report.reason, StopReason::TimedOut);
        assert!(report.elapsed >= Duration::from_millis(50));
        assert!(report.elapsed < Duration::from_millis(250));
        assert_eq!(controller.counters().snapshot(), (0, 0));
        assert_eq!(controller.state(), MotionState::Idle);

        let log = output.commands();
        assert_eq!(
            &log[..2],
            &[
                (WheelPair::Left, ActuatorCommand::driving(Sense::Forward, 180)),
                (WheelPair::Right, ActuatorCommand::driving(Sense::Forward, 180)),
            ]
        );
        assert!(!controller.actuators().command(WheelPair::Left).enabled);
        assert!(!controller.actuators().command(WheelPair::Right).enabled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_up_gated_on_left_counter() {
        let (mut controller, _output) = recording_controller();
        let counters = Arc::clone(controller.counters());

        let pulses = tokio::spawn(async move {
            for _ in 0..10 {
                counters.increment(Side::Left);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let report = controller.execute(request(Direction::Up, 10, 2000)).await;
        pulses.await.unwrap();

        assert_eq!(report.reason, StopReason::Reached);
        assert_eq!(report.steps, 10);
        assert_eq!(controller.counters().snapshot(), (0, 0));
    }

    // Single-threaded runtime: the pulse task only runs if the wait loop yields
    #[tokio::test]
    async fn test_wait_loop_lets_pulse_task_run() {
        let (mut controller, _output) = recording_controller();
        let counters = Arc::clone(controller.counters());

        let pulses = tokio::spawn(async move {
            for _ in 0..10 {
                counters.increment(Side::Left);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let report = controller.execute(request(Direction::Up, 10, 2000)).await;
        pulses.await.unwrap();

        assert_eq!(report.reason, StopReason::Reached);
        assert_eq!(report.steps, 10);
    }

    #[tokio::test]
    async fn test_down_drives_both_pairs_in_reverse() {
        let (mut controller, output) = recording_controller();
        controller.execute(request(Direction::Down, 0, 100)).await;

        let log = output.commands();
        assert_eq!(
            &log[..2],
            &[
                (WheelPair::Left, ActuatorCommand::driving(Sense::Reverse, 180)),
                (WheelPair::Right, ActuatorCommand::driving(Sense::Reverse, 180)),
            ]
        );
        assert_eq!(
            &log[2..],
            &[
                (WheelPair::Left, ActuatorCommand::off()),
                (WheelPair::Right, ActuatorCommand::off()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_right_turn_on_simulated_plant() {
        let counters = Arc::new(EncoderCounters::new());
        let plant = SimulatedPlant::new();
        let _pulses = plant.spawn_pulses(&counters, SIM_TICK);
        let mut controller =
            MotionController::new(ActuatorDriver::new(plant.clone(), 255), Arc::clone(&counters));

        let report = controller.execute(request(Direction::Right, 15, 2000)).await;

        assert_eq!(report.reason, StopReason::Reached);
        assert_eq!(plant.duty(WheelPair::Left), 0);
        assert_eq!(plant.duty(WheelPair::Right), 0);
    }
}
