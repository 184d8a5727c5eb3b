// Serial bridge protocol for the motor/encoder/ranging microcontroller
//
// Packet format (both directions): [0xFF, 0xFF, ID, Length, Kind, Params..., Checksum]
// Length counts Kind + Params + Checksum. Checksum is !sum(ID..Params).
//
// Host -> bridge packets are instructions. Bridge -> host packets are either a
// reply to the last instruction, or unsolicited Pulse/Range reports that the
// reader thread feeds into the encoder counters and range slots.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::driver::{ActuatorCommand, MotorOutput};
use super::kinematics::WheelPair;
use crate::encoder::{EncoderCounters, Side};
use crate::sensor::RangeSlots;

/// Default serial configuration for the bridge
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;
/// Overall wait for a start-up reply, however many reports arrive meanwhile
pub const REPLY_DEADLINE_MS: u64 = 500;

/// Bridge device ID
pub const BRIDGE_ID: u8 = 0x01;

/// Packet header bytes
const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Instruction set (host -> bridge)
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    ConfigurePwm = 0x10,
    SetEnable = 0x11,
    SetDuty = 0x12,
    ProbeRanger = 0x13,
}

/// Report kinds (bridge -> host)
const KIND_REPLY: u8 = 0x00;
const KIND_PULSE: u8 = 0x20;
const KIND_RANGE: u8 = 0x21;

/// PWM channels on the bridge, two per wheel pair
pub const PWM_CHANNEL_R1: u8 = 0; // right forward
pub const PWM_CHANNEL_R2: u8 = 1; // right reverse
pub const PWM_CHANNEL_L1: u8 = 2; // left forward
pub const PWM_CHANNEL_L2: u8 = 3; // left reverse

/// Enable lines on the bridge
pub const ENABLE_L: u8 = 0;
pub const ENABLE_R: u8 = 1;

/// (enable line, forward channel, reverse channel) of a pair
fn pair_lines(pair: WheelPair) -> (u8, u8, u8) {
    match pair {
        WheelPair::Left => (ENABLE_L, PWM_CHANNEL_L1, PWM_CHANNEL_L2),
        WheelPair::Right => (ENABLE_R, PWM_CHANNEL_R1, PWM_CHANNEL_R2),
    }
}

/// Error types for bridge communication
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid packet from bridge: {reason}")]
    InvalidResponse { reason: String },

    #[error("Checksum mismatch from device {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Bridge returned error status: 0x{status:02X}")]
    DeviceError { status: u8 },

    #[error("Timeout waiting for response from bridge")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// A decoded bridge -> host packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Reply { status: u8, params: Vec<u8> },
    Pulse(Side),
    Range { sensor: u8, range_mm: u16, status: u8 },
}

impl Frame {
    fn from_parts(kind: u8, params: &[u8]) -> Result<Self> {
        match (kind, params) {
            (KIND_REPLY, [status, rest @ ..]) => Ok(Frame::Reply {
                status: *status,
                params: rest.to_vec(),
            }),
            (KIND_PULSE, [0]) => Ok(Frame::Pulse(Side::Left)),
            (KIND_PULSE, [1]) => Ok(Frame::Pulse(Side::Right)),
            (KIND_RANGE, [sensor, lo, hi, status]) => Ok(Frame::Range {
                sensor: *sensor,
                range_mm: u16::from_le_bytes([*lo, *hi]),
                status: *status,
            }),
            _ => Err(BridgeError::InvalidResponse {
                reason: format!("kind 0x{:02X} with params {:02X?}", kind, params),
            }),
        }
    }
}

enum DecodeState {
    Header0,
    Header1,
    Id,
    Length { id: u8 },
    Body { id: u8, len: usize },
}

/// Byte-at-a-time decoder for bridge -> host packets
pub struct FrameDecoder {
    state: DecodeState,
    body: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header0,
            body: Vec::with_capacity(8),
        }
    }

    /// Feed one byte. Returns a result once a whole packet has been seen.
    pub fn push(&mut self, byte: u8) -> Option<Result<Frame>> {
        match self.state {
            DecodeState::Header0 => {
                if byte == HEADER[0] {
                    self.state = DecodeState::Header1;
                }
            }
            DecodeState::Header1 => {
                self.state = if byte == HEADER[1] {
                    DecodeState::Id
                } else {
                    DecodeState::Header0
                };
            }
            DecodeState::Id => {
                // Tolerate a third 0xFF between packets
                if byte != HEADER[1] {
                    self.state = DecodeState::Length { id: byte };
                }
            }
            DecodeState::Length { id } => {
                if byte < 2 {
                    self.state = DecodeState::Header0;
                    return Some(Err(BridgeError::InvalidResponse {
                        reason: format!("length {} too short", byte),
                    }));
                }
                self.body.clear();
                self.state = DecodeState::Body {
                    id,
                    len: byte as usize,
                };
            }
            DecodeState::Body { id, len } => {
                self.body.push(byte);
                if self.body.len() == len {
                    self.state = DecodeState::Header0;
                    return Some(self.finish(id, len as u8));
                }
            }
        }
        None
    }

    fn finish(&self, id: u8, len: u8) -> Result<Frame> {
        let (payload, received) = self.body.split_at(self.body.len() - 1);
        let mut checksum_data = vec![id, len];
        checksum_data.extend_from_slice(payload);
        if BridgeBus::checksum(&checksum_data) != received[0] {
            return Err(BridgeError::ChecksumMismatch { id });
        }
        Frame::from_parts(payload[0], &payload[1..])
    }
}

/// Serial bridge handle - owns the write side of the port
pub struct BridgeBus {
    port: Box<dyn SerialPort>,
    decoder: FrameDecoder,
}

impl BridgeBus {
    /// Open a new connection to the bridge
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening bridge on {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            decoder: FrameDecoder::new(),
        })
    }

    /// Calculate checksum for a packet (excluding header)
    fn checksum(data: &[u8]) -> u8 {
        let sum: u16 = data.iter().map(|&b| b as u16).sum();
        (!sum & 0xFF) as u8
    }

    /// Build a packet with header and checksum
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 2) as u8; // params + instruction + checksum
        let mut packet = Vec::with_capacity(6 + params.len());

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.push(length);
        packet.push(instruction as u8);
        packet.extend_from_slice(params);

        let checksum_data = &packet[2..]; // skip header
        packet.push(Self::checksum(checksum_data));

        packet
    }

    fn send(&mut self, instruction: Instruction, params: &[u8]) -> Result<()> {
        let packet = Self::build_packet(BRIDGE_ID, instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Send an instruction and wait for its reply.
    ///
    /// Only used during start-up, before the reader thread owns the read side.
    fn request(&mut self, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
        self.send(instruction, params)?;
        let deadline = Instant::now() + Duration::from_millis(REPLY_DEADLINE_MS);
        await_reply(self.port.as_mut(), &mut self.decoder, deadline)
    }

    /// Ping the bridge to check if it's connected
    pub fn ping(&mut self) -> Result<bool> {
        match self.request(Instruction::Ping, &[]) {
            Ok(_) => Ok(true),
            Err(BridgeError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Set PWM frequency and resolution for all duty channels
    pub fn configure_pwm(&mut self, freq_hz: u32, resolution_bits: u8) -> Result<()> {
        let mut params = freq_hz.to_le_bytes().to_vec();
        params.push(resolution_bits);
        debug!("Configure PWM: {} Hz, {} bit", freq_hz, resolution_bits);
        self.request(Instruction::ConfigurePwm, &params)?;
        Ok(())
    }

    /// Ask whether a distance sensor answers on its bus
    pub fn probe_ranger(&mut self, sensor: u8) -> Result<bool> {
        let reply = self.request(Instruction::ProbeRanger, &[sensor])?;
        Ok(reply.first() == Some(&1))
    }

    /// Drive an enable line. Fire-and-forget: no reply.
    pub fn set_enable(&mut self, line: u8, on: bool) -> Result<()> {
        self.send(Instruction::SetEnable, &[line, on as u8])
    }

    /// Write a duty value to a PWM channel. Fire-and-forget: no reply.
    pub fn set_duty(&mut self, channel: u8, duty: u8) -> Result<()> {
        self.send(Instruction::SetDuty, &[channel, duty])
    }

    /// Configure PWM and disable both motors - run once before anything else
    pub fn initialize(&mut self, freq_hz: u32, resolution_bits: u8) -> Result<()> {
        if !self.ping()? {
            return Err(BridgeError::Timeout);
        }
        self.configure_pwm(freq_hz, resolution_bits)?;
        self.set_enable(ENABLE_L, false)?;
        self.set_enable(ENABLE_R, false)?;
        info!("Bridge initialized");
        Ok(())
    }

    /// Hand the read side to a reader thread that decodes unsolicited reports.
    ///
    /// Pulse reports increment the encoder counters, Range reports update the
    /// range slots. The thread runs for the life of the process.
    pub fn spawn_reader(
        &self,
        counters: Arc<EncoderCounters>,
        ranges: Arc<RangeSlots>,
    ) -> Result<JoinHandle<()>> {
        let mut port = self.port.try_clone()?;
        let handle = thread::Builder::new()
            .name("bridge-reader".into())
            .spawn(move || {
                let mut decoder = FrameDecoder::new();
                let mut buf = [0u8; 64];
                loop {
                    let n = match port.read(&mut buf) {
                        Ok(n) => n,
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!("Bridge read failed: {}", e);
                            thread::sleep(Duration::from_millis(DEFAULT_TIMEOUT_MS));
                            continue;
                        }
                    };
                    for &byte in &buf[..n] {
                        match decoder.push(byte) {
                            Some(Ok(Frame::Pulse(side))) => counters.increment(side),
                            Some(Ok(Frame::Range {
                                sensor,
                                range_mm,
                                status,
                            })) => ranges.store(sensor as usize, range_mm, status),
                            Some(Ok(Frame::Reply { status, .. })) => {
                                debug!("Unexpected reply, status 0x{:02X}", status)
                            }
                            Some(Err(e)) => debug!("Dropping bad packet: {}", e),
                            None => {}
                        }
                    }
                }
            })?;
        Ok(handle)
    }
}

/// Read reports until the reply arrives. Pulse and Range reports in between
/// are skipped, but they do not extend `deadline`.
fn await_reply<R: Read + ?Sized>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
    deadline: Instant,
) -> Result<Vec<u8>> {
    let mut byte = [0u8; 1];
    loop {
        if Instant::now() >= deadline {
            return Err(BridgeError::Timeout);
        }
        reader.read_exact(&mut byte).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BridgeError::Timeout
            } else {
                BridgeError::Io(e)
            }
        })?;

        match decoder.push(byte[0]) {
            Some(Ok(Frame::Reply { status: 0, params })) => return Ok(params),
            Some(Ok(Frame::Reply { status, .. })) => {
                return Err(BridgeError::DeviceError { status });
            }
            Some(Ok(other)) => debug!("Skipping {:?} while waiting for reply", other),
            Some(Err(e)) => return Err(e),
            None => {}
        }
    }
}

/// Motor output backend that writes enable/duty instructions to the bridge
pub struct BridgeOutput {
    bus: BridgeBus,
}

impl BridgeOutput {
    pub fn new(bus: BridgeBus) -> Self {
        Self { bus }
    }
}

impl MotorOutput for BridgeOutput {
    type Error = BridgeError;

    fn apply(&mut self, pair: WheelPair, cmd: ActuatorCommand) -> Result<()> {
        let (enable, fwd, rev) = pair_lines(pair);
        if cmd.enabled {
            self.bus.set_enable(enable, true)?;
            self.bus.set_duty(fwd, cmd.forward_duty)?;
            self.bus.set_duty(rev, cmd.reverse_duty)
        } else {
            self.bus.set_duty(fwd, 0)?;
            self.bus.set_duty(rev, 0)?;
            self.bus.set_enable(enable, false)
        }
    }
}
