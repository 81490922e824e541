// src/io/mod.rs
//
// CAN transport abstraction. Each transport (slcan, SocketCAN) provides a
// blocking driver that lives on its own thread; the connection manager talks
// to it through channels (see `run_driver`).

// Core modules
pub mod codec; // Frame codec trait and implementations
mod error;
pub mod types;

// Drivers
pub mod serial; // serial port enumeration for slcan adapters
pub mod slcan;
pub mod socketcan;

pub use codec::FrameCodec;
pub use error::IoError;

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc as std_mpsc, Arc,
};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use types::{SourceMessage, TransmitRequest};

// ============================================================================
// Constants
// ============================================================================

/// Maximum payload length of a classic CAN frame
pub const MAX_DLC: usize = 8;
/// Largest 11-bit identifier
pub const STANDARD_ID_MAX: u32 = 0x7FF;
/// Largest 29-bit identifier
pub const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

// ============================================================================
// Shared Types
// ============================================================================

/// Whether a frame was sent by us or read from the bus
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Tx,
    Rx,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Direction::Tx => "TX",
            Direction::Rx => "RX",
        }
    }
}

/// A classic CAN frame, either composed for transmission or read from the bus
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameMessage {
    /// 11-bit standard or 29-bit extended identifier
    pub frame_id: u32,
    /// Payload, at most `MAX_DLC` bytes
    pub bytes: Vec<u8>,
    pub is_extended: bool,
    pub is_error_frame: bool,
    pub direction: Direction,
    /// Host UNIX timestamp in microseconds, set when sent or received
    pub timestamp_us: u64,
}

impl FrameMessage {
    /// Build a TX data frame. The payload is cut to `MAX_DLC` bytes.
    pub fn new(frame_id: u32, bytes: &[u8], is_extended: bool) -> Self {
        Self {
            frame_id,
            bytes: bytes[..bytes.len().min(MAX_DLC)].to_vec(),
            is_extended,
            is_error_frame: false,
            direction: Direction::Tx,
            timestamp_us: 0,
        }
    }

    /// Build a frame as read from the bus.
    pub fn received(frame_id: u32, bytes: &[u8], is_extended: bool) -> Self {
        Self {
            direction: Direction::Rx,
            timestamp_us: now_us(),
            ..Self::new(frame_id, bytes, is_extended)
        }
    }

    /// Data length code
    pub fn dlc(&self) -> u8 {
        self.bytes.len() as u8
    }
}

/// Get current time in microseconds since UNIX epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// The two supported transports
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportKind {
    /// Serial-line CAN (Lawicel ASCII) adapter such as CANable
    #[value(name = "slcan")]
    Slcan,
    /// Linux native CAN interface
    #[value(name = "socketcan")]
    SocketCan,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Slcan => "slcan",
            TransportKind::SocketCan => "socketcan",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for opening a channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// Serial port path ("/dev/ttyACM0", "COM3") or interface name ("can0")
    pub channel: String,
    /// CAN bitrate in bits/second
    pub bitrate: u32,
    pub kind: TransportKind,
}

impl BusConfig {
    pub fn new(channel: impl Into<String>, bitrate: u32, kind: TransportKind) -> Self {
        Self {
            channel: channel.into(),
            bitrate,
            kind,
        }
    }

    /// Device label used in error messages, e.g. `slcan(/dev/ttyACM0)`
    pub fn device(&self) -> String {
        format!("{}({})", self.kind, self.channel)
    }
}

// ============================================================================
// Driver Traits
// ============================================================================

/// Blocking handle onto an open CAN channel.
///
/// A driver is moved onto a dedicated blocking thread and only ever used from
/// there, so implementations need `Send` but not `Sync`.
pub trait CanDriver: Send {
    /// Read the next frame. Returns `Ok(None)` when the driver's read timeout
    /// elapses without a frame, so the caller can check for stop requests.
    fn read_frame(&mut self) -> Result<Option<FrameMessage>, IoError>;

    /// Write one frame to the bus.
    fn write_frame(&mut self, frame: &FrameMessage) -> Result<(), IoError>;

    /// Close the channel. Called once, from the driver thread, before it exits.
    fn close(&mut self) {}
}

/// Opens drivers. The connection manager owns one of these so tests can
/// substitute an in-memory bus.
pub trait BusOpener: Send + Sync {
    fn open(&self, config: &BusConfig) -> Result<Box<dyn CanDriver>, IoError>;
}

/// Opens real hardware: slcan over a serial port or a SocketCAN interface.
#[derive(Clone, Debug, Default)]
pub struct SystemOpener {
    /// Bring the SocketCAN interface up at the requested bitrate before opening
    pub configure_socketcan: bool,
}

impl BusOpener for SystemOpener {
    fn open(&self, config: &BusConfig) -> Result<Box<dyn CanDriver>, IoError> {
        match config.kind {
            TransportKind::Slcan => {
                let driver = slcan::SlcanDriver::open(&config.channel, config.bitrate)?;
                Ok(Box::new(driver))
            }
            TransportKind::SocketCan => {
                if self.configure_socketcan {
                    socketcan::configure_interface(&config.channel, config.bitrate)?;
                }
                socketcan::open_driver(&config.channel)
            }
        }
    }
}

// ============================================================================
// Driver Loop
// ============================================================================

/// Drive an open channel until `stop_flag` is set.
///
/// Services queued transmit requests between reads and forwards every frame
/// read from the bus to `tx`. Must run on a blocking thread
/// (`tokio::task::spawn_blocking`). Closes the driver before returning.
pub fn run_driver(
    mut driver: Box<dyn CanDriver>,
    device: String,
    stop_flag: Arc<AtomicBool>,
    transmit_rx: std_mpsc::Receiver<TransmitRequest>,
    tx: mpsc::Sender<SourceMessage>,
) {
    let mut reason = "stopped".to_string();

    while !stop_flag.load(Ordering::SeqCst) {
        // Check for transmit requests (non-blocking)
        while let Ok(req) = transmit_rx.try_recv() {
            let result = driver.write_frame(&req.frame);
            let _ = req.result_tx.send(result);
        }

        match driver.read_frame() {
            Ok(Some(frame)) => {
                if tx.blocking_send(SourceMessage::Frame(frame)).is_err() {
                    reason = "relay closed".to_string();
                    break;
                }
            }
            Ok(None) => {
                // Timeout - continue
            }
            Err(e) => {
                tlog!("[io] {} read error: {}", device, e);
                let _ = tx.blocking_send(SourceMessage::Error(format!("Read error: {}", e)));
                reason = "read error".to_string();
                break;
            }
        }
    }

    driver.close();
    tlog!("[io] {} driver ended ({})", device, reason);
    let _ = tx.blocking_send(SourceMessage::Ended(reason));
}

// ============================================================================
// Channel Discovery
// ============================================================================

/// Channels found for a transport, with the one to select by default
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelList {
    pub names: Vec<String>,
    /// Index into `names` of the preferred channel, if any
    pub preferred: Option<usize>,
}

impl ChannelList {
    /// The preferred channel, falling back to the first one found
    pub fn default_channel(&self) -> Option<&str> {
        self.preferred
            .and_then(|i| self.names.get(i))
            .or_else(|| self.names.first())
            .map(String::as_str)
    }
}

/// Enumerate the channels available for a transport
pub fn list_channels(kind: TransportKind) -> Result<ChannelList, IoError> {
    match kind {
        TransportKind::Slcan => serial::list_slcan_ports(),
        TransportKind::SocketCan => Ok(ChannelList {
            names: socketcan::list_interfaces()?,
            preferred: None,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
