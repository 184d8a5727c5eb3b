// Three concurrent tasks on a multi-threaded runtime:
// - sampling: reads both distance sensors every 200 ms into a watch channel
// - dispatch: serves commands (blocking for whole moves), publishes telemetry
//   every 200 ms, reconnects the transport when it drops
// - update: polls for firmware-update events with a 10 ms idle
//
// Encoder pulses come from a separate thread (bridge reader or simulated
// plant) and only ever touch the atomic counters.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::command::Dispatcher;
use crate::config::{
    MAX_COMMANDS_PER_CYCLE, PWM_DUTY_CYCLE, PWM_FREQ_HZ, PWM_RESOLUTION_BITS, RobotConfig,
    TAG_FRONT, TAG_LEFT,
};
use crate::encoder::EncoderCounters;
use crate::link::{Link, ReconnectPolicy, Transport, TransportError, ZenohTransport};
use crate::messages::{DistanceSample, TelemetryMessage};
use crate::motion::MotionController;
use crate::motor::{ActuatorDriver, BridgeBus, BridgeError, BridgeOutput, MotorOutput};
use crate::sensor::{BridgeRanger, DistanceSensor, RangeSlots, SENSOR_FRONT, SENSOR_LEFT, SimulatedRanger};
use crate::sim::{SIM_TICK, SimulatedPlant};
use crate::update::{UpdateMonitor, UpdateSource, UpdateStatus, ZenohUpdateSource};

/// Start-up failures; the only hard failures in the runtime
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("distance sensor {0} not found")]
    SensorNotFound(usize),

    #[error("actuator bridge unavailable: {0}")]
    Actuator(#[from] BridgeError),

    #[error("transport unavailable: {0}")]
    Transport(#[from] TransportError),
}

impl InitError {
    /// Process exit status for this failure
    pub fn status_code(&self) -> i32 {
        match self {
            InitError::SensorNotFound(_) => 2,
            InitError::Actuator(_) => 3,
            InitError::Transport(_) => 4,
        }
    }
}

/// Latest sample of each sensor, in `SENSOR_TAGS` order
pub type Samples = [DistanceSample; 2];

pub const SENSOR_TAGS: [char; 2] = [TAG_FRONT, TAG_LEFT];

/// Sampling task: never touches the motion controller
pub async fn sampling_task(
    mut sensors: [Box<dyn DistanceSensor>; 2],
    latest: watch::Sender<Samples>,
    period: Duration,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let samples = [sensors[0].sample(), sensors[1].sample()];
        debug!(
            "Sampled: front={} mm, left={} mm",
            samples[0].range_mm, samples[1].range_mm
        );
        latest.send_replace(samples);
    }
}

/// Publish the latest sample of each sensor. Stops at the first failure.
async fn publish_telemetry<T: Transport>(link: &mut Link<T>, samples: &Samples) {
    for (tag, sample) in SENSOR_TAGS.iter().zip(samples) {
        let message = TelemetryMessage::new(*tag, sample);
        if link.publish(message.to_string()).await.is_err() {
            break;
        }
    }
}

/// One dispatch cycle: reconnect if needed, serve up to
/// `MAX_COMMANDS_PER_CYCLE` pending commands, then publish telemetry
pub async fn dispatch_cycle<O: MotorOutput, T: Transport>(
    dispatcher: &mut Dispatcher<O>,
    link: &mut Link<T>,
    latest: &watch::Receiver<Samples>,
) {
    if !link.is_connected() {
        link.reconnect().await;
    }

    // Leftover commands wait for the next cycle so telemetry keeps flowing
    for _ in 0..MAX_COMMANDS_PER_CYCLE {
        let Some(raw) = link.try_recv() else {
            break;
        };
        dispatcher.handle(&raw).await;
    }

    let samples = *latest.borrow();
    publish_telemetry(link, &samples).await;
}

/// Dispatch task: blocks for the full duration of any move it starts
pub async fn dispatch_task<O: MotorOutput, T: Transport>(
    mut dispatcher: Dispatcher<O>,
    mut link: Link<T>,
    latest: watch::Receiver<Samples>,
    period: Duration,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        dispatch_cycle(&mut dispatcher, &mut link, &latest).await;
    }
}

/// Update-check task: short polls, brief yield each cycle. The current
/// update status is kept in `status`.
pub async fn update_task<U: UpdateSource>(
    mut source: U,
    status: watch::Sender<UpdateStatus>,
    idle: Duration,
) {
    let mut monitor = UpdateMonitor::new();
    loop {
        while let Some(event) = source.poll() {
            monitor.handle(event);
        }
        status.send_if_modified(|current| {
            let changed = *current != monitor.status();
            *current = monitor.status();
            changed
        });
        tokio::time::sleep(idle).await;
    }
}

/// Spawn the three tasks and run until Ctrl-C or a task dies
async fn start<O, T, U>(
    config: &RobotConfig,
    output: O,
    counters: Arc<EncoderCounters>,
    sensors: [Box<dyn DistanceSensor>; 2],
    transport: T,
    updates: U,
) where
    O: MotorOutput + 'static,
    T: Transport + 'static,
    U: UpdateSource + 'static,
{
    let actuators = ActuatorDriver::new(output, PWM_DUTY_CYCLE);
    let controller = MotionController::new(actuators, counters);
    let dispatcher = Dispatcher::new(controller, config.move_timeout);
    let link = Link::new(transport, ReconnectPolicy::default());
    let (latest_tx, latest_rx) = watch::channel([DistanceSample::default(); 2]);
    let (status_tx, _) = watch::channel(UpdateStatus::Idle);

    let mut sampling = tokio::spawn(sampling_task(sensors, latest_tx, config.sample_period));
    let mut dispatch = tokio::spawn(dispatch_task(
        dispatcher,
        link,
        latest_rx,
        config.telemetry_period,
    ));
    let mut update = tokio::spawn(update_task(updates, status_tx, config.update_idle));

    info!(
        "Runtime started: sampling every {}ms, telemetry every {}ms, move timeout {}ms",
        config.sample_period.as_millis(),
        config.telemetry_period.as_millis(),
        config.move_timeout.as_millis()
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        r = &mut sampling => warn!("Sampling task ended: {:?}", r),
        r = &mut dispatch => warn!("Dispatch task ended: {:?}", r),
        r = &mut update => warn!("Update task ended: {:?}", r),
    }

    // Dropping the dispatch task drops the actuator driver, which stops the motors
    sampling.abort();
    dispatch.abort();
    update.abort();
    let _ = dispatch.await;
}

/// Bring up hardware (or the simulated plant), transport and update source,
/// then run the tasks
pub async fn run(config: RobotConfig) -> Result<(), InitError> {
    let counters = Arc::new(EncoderCounters::new());
    let transport = ZenohTransport::new(
        zenoh::Config::default(),
        &config.cmd_key,
        &config.telemetry_key,
    );
    let updates = ZenohUpdateSource::open(zenoh::Config::default(), &config.update_key).await?;

    match &config.port {
        Some(port) => {
            let mut bus = BridgeBus::open(port)?;
            bus.initialize(PWM_FREQ_HZ, PWM_RESOLUTION_BITS)?;
            for sensor in [SENSOR_FRONT, SENSOR_LEFT] {
                if !bus.probe_ranger(sensor as u8)? {
                    return Err(InitError::SensorNotFound(sensor));
                }
            }

            let ranges = Arc::new(RangeSlots::new());
            bus.spawn_reader(Arc::clone(&counters), Arc::clone(&ranges))?;
            let sensors: [Box<dyn DistanceSensor>; 2] = [
                Box::new(BridgeRanger::new(Arc::clone(&ranges), SENSOR_FRONT)),
                Box::new(BridgeRanger::new(ranges, SENSOR_LEFT)),
            ];
            start(&config, BridgeOutput::new(bus), counters, sensors, transport, updates).await;
        }
        None => {
            info!("No bridge port given, running simulated plant");
            let plant = SimulatedPlant::new();
            plant.spawn_pulses(&counters, SIM_TICK);
            let sensors: [Box<dyn DistanceSensor>; 2] = [
                Box::new(SimulatedRanger::new(150, 1800, 37)),
                Box::new(SimulatedRanger::new(80, 1200, 23)),
            ];
            start(&config, plant, counters, sensors, transport, updates).await;
        }
    }
    Ok(())
}
