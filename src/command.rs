// Command-string protocol
//
// Inbound: `<direction-char><ASCII integer>`, e.g. "u1500".
// Outbound telemetry: `<tag><ASCII integer>`, e.g. "F842".

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::messages::{Direction, MotionRequest};
use crate::motion::{MotionController, MoveReport};
use crate::motor::MotorOutput;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown direction {0:?}")]
    UnknownDirection(char),
}

/// Leading decimal integer of `s`, 0 if there is none.
///
/// Leading whitespace and a sign are accepted; parsing stops at the first
/// non-digit. Negative values clamp to 0, oversized ones to `u32::MAX`.
fn parse_steps(s: &str) -> u32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: u64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = (value * 10 + (b - b'0') as u64).min(u32::MAX as u64);
    }

    if negative { 0 } else { value as u32 }
}

/// Parse an inbound message into a motion request
pub fn parse(raw: &[u8], timeout: Duration) -> Result<MotionRequest, ParseError> {
    let message = String::from_utf8_lossy(raw);
    let mut chars = message.chars();
    let first = chars.next().ok_or(ParseError::Empty)?;
    let direction = Direction::from_char(first).ok_or(ParseError::UnknownDirection(first))?;

    Ok(MotionRequest {
        direction,
        target_steps: parse_steps(chars.as_str()),
        timeout,
    })
}

/// Telemetry wire string: tag then decimal distance, no separator
pub fn format(tag: char, distance: i32) -> String {
    format!("{}{}", tag, distance)
}

/// Turns inbound messages into moves
pub struct Dispatcher<O: MotorOutput> {
    controller: MotionController<O>,
    timeout: Duration,
}

impl<O: MotorOutput> Dispatcher<O> {
    pub fn new(controller: MotionController<O>, timeout: Duration) -> Self {
        Self {
            controller,
            timeout,
        }
    }

    pub fn controller(&self) -> &MotionController<O> {
        &self.controller
    }

    /// Handle one inbound message.
    ///
    /// The encoder counters are reset first, recognized or not. A recognized
    /// command runs to completion before this returns.
    pub async fn handle(&mut self, raw: &[u8]) -> Option<MoveReport> {
        self.controller.counters().reset();
        debug!("Received message: {:?}", String::from_utf8_lossy(raw));

        match parse(raw, self.timeout) {
            Ok(request) => {
                info!(
                    "Command {:?} {} steps",
                    request.direction, request.target_steps
                );
                Some(self.controller.execute(request).await)
            }
            Err(e) => {
                warn!("Ignoring command: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MOVE_TIMEOUT;
    use crate::encoder::{EncoderCounters, Side};
    use crate::motion::StopReason;
    use crate::motor::driver::testing::RecordingOutput;
    use crate::motor::ActuatorDriver;
    use std::sync::Arc;

    fn req(direction: Direction, target_steps: u32) -> MotionRequest {
        MotionRequest {
            direction,
            target_steps,
            timeout: MOVE_TIMEOUT,
        }
    }

    #[test]
    fn test_parse_directions() {
        assert_eq!(parse(b"u100", MOVE_TIMEOUT), Ok(req(Direction::Up, 100)));
        assert_eq!(parse(b"d5", MOVE_TIMEOUT), Ok(req(Direction::Down, 5)));
        assert_eq!(parse(b"l", MOVE_TIMEOUT), Ok(req(Direction::Left, 0)));
        assert_eq!(parse(b"r1500", MOVE_TIMEOUT), Ok(req(Direction::Right, 1500)));
    }

    #[test]
    fn test_parse_unrecognized() {
        assert_eq!(
            parse(b"x9", MOVE_TIMEOUT),
            Err(ParseError::UnknownDirection('x'))
        );
        assert_eq!(parse(b"", MOVE_TIMEOUT), Err(ParseError::Empty));
        assert_eq!(
            parse(b"U10", MOVE_TIMEOUT),
            Err(ParseError::UnknownDirection('U'))
        );
    }

    #[test]
    fn test_parse_numeric_remainder() {
        assert_eq!(parse_steps("abc"), 0);
        assert_eq!(parse_steps("12ab"), 12);
        assert_eq!(parse_steps("  42"), 42);
        assert_eq!(parse_steps("+7"), 7);
        assert_eq!(parse_steps("-5"), 0);
        assert_eq!(parse_steps("99999999999"), u32::MAX);
    }

    #[test]
    fn test_parse_uses_given_timeout() {
        let timeout = Duration::from_millis(10);
        assert_eq!(parse(b"u1", timeout).unwrap().timeout, timeout);
    }

    #[test]
    fn test_format_telemetry() {
        assert_eq!(format('F', 842), "F842");
        assert_eq!(format('L', -1), "L-1");
        assert_eq!(format('L', 0), "L0");
        assert_eq!(format('F', 2000), "F2000");
    }

    #[tokio::test]
    async fn test_unrecognized_message_still_resets_counters() {
        let output = RecordingOutput::default();
        let counters = Arc::new(EncoderCounters::new());
        let controller =
            MotionController::new(ActuatorDriver::new(output.clone(), 180), Arc::clone(&counters));
        let mut dispatcher = Dispatcher::new(controller, MOVE_TIMEOUT);

        counters.increment(Side::Left);
        counters.increment(Side::Right);

        assert_eq!(dispatcher.handle(b"x9").await, None);
        assert_eq!(counters.snapshot(), (0, 0));
        assert!(output.commands().is_empty());
    }

    #[tokio::test]
    async fn test_recognized_message_runs_move() {
        let output = RecordingOutput::default();
        let counters = Arc::new(EncoderCounters::new());
        let controller =
            MotionController::new(ActuatorDriver::new(output.clone(), 180), Arc::clone(&counters));
        let mut dispatcher = Dispatcher::new(controller, Duration::from_millis(20));

        // Leftover pulses are cleared before the move, so it cannot finish early
        for _ in 0..50 {
            counters.increment(Side::Left);
        }

        let report = dispatcher.handle(b"u30").await.unwrap();
        assert_eq!(report.direction, Direction::Up);
        assert_eq!(report.reason, StopReason::TimedOut);
        assert_eq!(counters.snapshot(), (0, 0));
        assert_eq!(output.commands().len(), 4);
    }
}
