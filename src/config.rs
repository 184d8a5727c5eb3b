// Timeouts, cadences, keys, motor configuration
use std::time::Duration;

// Motor drive level: 180 of 255 (~75% duty)
pub const PWM_DUTY_CYCLE: u8 = 180;
pub const PWM_FREQ_HZ: u32 = 20_000;
pub const PWM_RESOLUTION_BITS: u8 = 8;

// Default move timeout, applied to every command
pub const MOVE_TIMEOUT: Duration = Duration::from_millis(4000);

// Task cadences
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(200);
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(200);
pub const UPDATE_IDLE: Duration = Duration::from_millis(10);
pub const MAX_COMMANDS_PER_CYCLE: usize = 8; // rest wait for the next dispatch cycle

// Reconnect backoff: doubles from the base up to the cap, retries forever
pub const RECONNECT_BASE: Duration = Duration::from_millis(250);
pub const RECONNECT_CAP: Duration = Duration::from_secs(2);

// Distance sensor
pub const OUT_OF_RANGE_MM: u32 = 2000; // sentinel, larger than any valid range
pub const OUT_OF_RANGE_STATUS: u8 = 4; // ranging status reported for "no target"

// Zenoh keys
pub const KEY_CMD: &str = "livingroom/device_1"; // commands
pub const KEY_TELEMETRY: &str = "livingroom/device_2"; // distance telemetry
pub const KEY_UPDATE: &str = "livingroom/ota"; // firmware update events

// Telemetry tags for the two distance sensors
pub const TAG_FRONT: char = 'F';
pub const TAG_LEFT: char = 'L';

/// Runtime configuration. `Default` reproduces the constants above.
#[derive(Debug, Clone)]
pub struct RobotConfig {
    /// Serial bridge port; `None` runs the simulated plant
    pub port: Option<String>,
    pub cmd_key: String,
    pub telemetry_key: String,
    pub update_key: String,
    pub move_timeout: Duration,
    pub sample_period: Duration,
    pub telemetry_period: Duration,
    pub update_idle: Duration,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            port: None,
            cmd_key: KEY_CMD.to_string(),
            telemetry_key: KEY_TELEMETRY.to_string(),
            update_key: KEY_UPDATE.to_string(),
            move_timeout: MOVE_TIMEOUT,
            sample_period: SAMPLE_PERIOD,
            telemetry_period: TELEMETRY_PERIOD,
            update_idle: UPDATE_IDLE,
        }
    }
}

impl RobotConfig {
    pub fn simulated(&self) -> bool {
        self.port.is_none()
    }
}
