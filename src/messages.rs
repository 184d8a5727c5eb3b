// Define message types for the runtime

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command;
use crate::config::{OUT_OF_RANGE_MM, OUT_OF_RANGE_STATUS};

/// Movement direction selected by the first character of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Left, Self::Right];

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'u' => Some(Self::Up),
            'd' => Some(Self::Down),
            'l' => Some(Self::Left),
            'r' => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Up => 'u',
            Self::Down => 'd',
            Self::Left => 'l',
            Self::Right => 'r',
        }
    }
}

// Command from teleop/scripts -> runtime, consumed immediately by the motion controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionRequest {
    pub direction: Direction,
    pub target_steps: u32,
    pub timeout: Duration,
}

/// One distance reading. Out-of-range readings carry the sentinel distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceSample {
    pub range_mm: u32,
    pub valid: bool,
}

impl DistanceSample {
    pub fn out_of_range() -> Self {
        Self {
            range_mm: OUT_OF_RANGE_MM,
            valid: false,
        }
    }

    /// Convert a raw ranging result into a sample
    pub fn from_ranging(range_mm: u16, status: u8) -> Self {
        if status == OUT_OF_RANGE_STATUS {
            Self::out_of_range()
        } else {
            Self {
                range_mm: range_mm as u32,
                valid: true,
            }
        }
    }

    /// Value published as telemetry; the sentinel passes through unchanged
    pub fn telemetry_value(&self) -> i32 {
        self.range_mm.min(i32::MAX as u32) as i32
    }
}

impl Default for DistanceSample {
    fn default() -> Self {
        Self::out_of_range()
    }
}

/// Telemetry published to the transport: `<tag><range>` with no delimiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub sensor_tag: char,
    pub range_mm: i32,
}

impl TelemetryMessage {
    pub fn new(sensor_tag: char, sample: &DistanceSample) -> Self {
        Self {
            sensor_tag,
            range_mm: sample.telemetry_value(),
        }
    }
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&command::format(self.sensor_tag, self.range_mm))
    }
}

/// What a firmware update is writing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Firmware,
    Filesystem,
}

/// Failure reported by the update agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFailure {
    Auth,
    Begin,
    Connect,
    Receive,
    End,
}

/// Events produced by the firmware-update agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UpdateEvent {
    Start { kind: UpdateKind },
    Progress { done: u32, total: u32 },
    End,
    Error { failure: UpdateFailure },
}
