// src/io/slcan/reader.rs
//
// slcan (Serial Line CAN) driver for CANable and other USB-CAN adapters
// speaking the Lawicel/slcan ASCII protocol.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::{CanDriver, FrameMessage};

use super::codec::SlcanCodec;

// ============================================================================
// Constants
// ============================================================================

/// Serial baud rate used by CANable-style adapters
pub const SLCAN_SERIAL_BAUD: u32 = 115_200;

/// Serial read timeout; bounds how long a stop request waits
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest line we buffer before assuming garbage
const MAX_LINE_LEN: usize = 64;

/// slcan bitrate commands (S0-S8)
const SLCAN_BITRATES: [(u32, &str); 9] = [
    (10_000, "S0"),     // 10 Kbit/s
    (20_000, "S1"),     // 20 Kbit/s
    (50_000, "S2"),     // 50 Kbit/s
    (100_000, "S3"),    // 100 Kbit/s
    (125_000, "S4"),    // 125 Kbit/s
    (250_000, "S5"),    // 250 Kbit/s
    (500_000, "S6"),    // 500 Kbit/s
    (750_000, "S7"),    // 750 Kbit/s
    (1_000_000, "S8"),  // 1 Mbit/s
];

// ============================================================================
// Utility Functions
// ============================================================================

/// Find the slcan bitrate command for a given bitrate
pub fn find_bitrate_command(bitrate: u32) -> Result<&'static str, IoError> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, cmd)| *cmd)
        .ok_or_else(|| {
            let valid: Vec<String> = SLCAN_BITRATES.iter().map(|(r, _)| format!("{}", r)).collect();
            IoError::configuration(format!(
                "Invalid CAN bitrate {}. Valid bitrates: {}",
                bitrate,
                valid.join(", ")
            ))
        })
}

/// Splits the serial byte stream into `\r`-terminated lines.
#[derive(Debug, Default)]
struct LineAssembler {
    line_buf: String,
}

impl LineAssembler {
    /// Feed raw bytes, returning every complete line.
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            if byte == b'\r' || byte == b'\n' {
                if !self.line_buf.is_empty() {
                    lines.push(std::mem::take(&mut self.line_buf));
                }
            } else if byte == 0x07 {
                // Bell = error reply
                self.line_buf.clear();
            } else if byte.is_ascii() && !byte.is_ascii_control() {
                self.line_buf.push(byte as char);
                if self.line_buf.len() > MAX_LINE_LEN {
                    self.line_buf.clear();
                }
            }
        }
        lines
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Open slcan channel on a serial port
pub struct SlcanDriver {
    port: Box<dyn serialport::SerialPort>,
    device: String,
    lines: LineAssembler,
    pending: VecDeque<FrameMessage>,
}

impl SlcanDriver {
    /// Open the serial port, set the bitrate and open the CAN channel.
    pub fn open(port_path: &str, bitrate: u32) -> Result<Self, IoError> {
        let device = format!("slcan({})", port_path);
        let bitrate_cmd = find_bitrate_command(bitrate)?;

        let mut port = serialport::new(port_path, SLCAN_SERIAL_BAUD)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        let _ = port.clear(serialport::ClearBuffer::All);

        // Wait for device to be ready
        std::thread::sleep(Duration::from_millis(200));

        // Close any existing channel
        let _ = port.write_all(b"C\r");
        let _ = port.flush();
        std::thread::sleep(Duration::from_millis(50));

        port.write_all(format!("{}\r", bitrate_cmd).as_bytes())
            .map_err(|e| IoError::protocol(&device, format!("set bitrate: {}", e)))?;
        let _ = port.flush();
        std::thread::sleep(Duration::from_millis(50));

        port.write_all(b"O\r")
            .map_err(|e| IoError::protocol(&device, format!("open channel: {}", e)))?;
        let _ = port.flush();

        tlog!("[slcan] Connected to {} (bitrate: {})", port_path, bitrate);

        Ok(Self {
            port,
            device,
            lines: LineAssembler::default(),
            pending: VecDeque::new(),
        })
    }
}

/// Decode data frames from complete lines. Command replies and remote frames
/// are skipped; malformed lines are logged and dropped.
fn decode_lines(lines: Vec<String>) -> Vec<FrameMessage> {
    lines
        .into_iter()
        .filter(|line| SlcanCodec::is_frame_line(line) && !SlcanCodec::is_remote_line(line))
        .filter_map(|line| match SlcanCodec::decode(&line) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tlog!("[slcan] Dropping malformed line {:?}: {}", line, e);
                None
            }
        })
        .collect()
}

impl CanDriver for SlcanDriver {
    fn read_frame(&mut self) -> Result<Option<FrameMessage>, IoError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }

        let mut read_buf = [0u8; 256];
        let n = match self.port.read(&mut read_buf) {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(IoError::protocol(&self.device, format!("read: {}", e))),
        };

        let lines = self.lines.push(&read_buf[..n]);
        self.pending.extend(decode_lines(lines));
        Ok(self.pending.pop_front())
    }

    fn write_frame(&mut self, frame: &FrameMessage) -> Result<(), IoError> {
        let data = SlcanCodec::encode(frame)?;
        self.port
            .write_all(&data)
            .and_then(|_| self.port.flush())
            .map_err(|e| IoError::protocol(&self.device, format!("write: {}", e)))
    }

    fn close(&mut self) {
        let _ = self.port.write_all(b"C\r");
        let _ = self.port.flush();
        tlog!("[slcan] Closed {}", self.device);
    }
}

// ============================================================================
// Tests
// ============================================================================
