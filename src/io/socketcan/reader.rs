// src/io/socketcan/reader.rs
//
// SocketCAN driver for Linux native CAN interfaces.
// Used with CANable Pro (candleLight firmware) or native CAN hardware.
//
// The interface must be up before opening, either configured by the system:
//   sudo ip link set can0 up type can bitrate 500000
// or through `configure_interface` (pkexec).
//
// This module is only functional on Linux.

#[cfg(target_os = "linux")]
mod linux_impl {
    use socketcan::{
        CanDataFrame, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket,
        StandardId,
    };
    use std::time::Duration;

    use crate::io::error::IoError;
    use crate::io::{CanDriver, FrameMessage};

    /// Socket read timeout; bounds how long a stop request waits
    const READ_TIMEOUT: Duration = Duration::from_millis(50);
    /// Mask for the 29-bit identifier in `can_id`
    const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;

    // ============================================================================
    // Interface Configuration
    // ============================================================================

    /// Configure a SocketCAN interface using pkexec for privilege escalation.
    /// Brings the interface down, sets the bitrate, and brings it back up.
    pub fn configure_interface(interface: &str, bitrate: u32) -> Result<(), IoError> {
        use std::process::Command;

        tlog!(
            "[socketcan] Configuring interface {} with bitrate {} using pkexec",
            interface,
            bitrate
        );

        let script = format!(
            "ip link set {iface} down && ip link set {iface} type can bitrate {bitrate} && ip link set {iface} up",
            iface = interface,
            bitrate = bitrate
        );

        let output = Command::new("pkexec")
            .args(["sh", "-c", &script])
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    IoError::configuration(
                        "pkexec not found. Install polkit or configure the interface manually.",
                    )
                } else {
                    IoError::configuration(format!("Failed to run pkexec: {}", e))
                }
            })?;

        if output.status.success() {
            tlog!("[socketcan] Interface {} configured successfully", interface);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);

        if stderr.contains("dismissed") || stderr.contains("cancelled") {
            Err(IoError::configuration("Authentication cancelled by user"))
        } else if stderr.contains("Not authorized") {
            Err(IoError::configuration(
                "Not authorised to configure network interfaces",
            ))
        } else {
            let error_detail = if !stderr.is_empty() {
                stderr.trim().to_string()
            } else if !stdout.is_empty() {
                stdout.trim().to_string()
            } else {
                format!("Exit code: {:?}", output.status.code())
            };
            Err(IoError::configuration(format!(
                "Failed to configure interface: {}",
                error_detail
            )))
        }
    }

    // ============================================================================
    // Driver
    // ============================================================================

    /// Convert a socketcan frame to our FrameMessage format
    fn convert_frame(frame: CanFrame) -> Option<FrameMessage> {
        match frame {
            CanFrame::Data(f) => Some(FrameMessage::received(
                f.raw_id() & CAN_EFF_MASK,
                f.data(),
                f.is_extended(),
            )),
            CanFrame::Error(f) => {
                let mut msg =
                    FrameMessage::received(f.raw_id() & CAN_EFF_MASK, f.data(), false);
                msg.is_error_frame = true;
                Some(msg)
            }
            CanFrame::Remote(_) => None, // Skip remote frames
        }
    }

    /// Open SocketCAN channel (classic CAN raw socket)
    pub struct SocketCanDriver {
        socket: CanSocket,
        device: String,
    }

    impl SocketCanDriver {
        pub fn open(interface: &str) -> Result<Self, IoError> {
            let device = format!("socketcan({})", interface);
            let socket = CanSocket::open(interface)
                .map_err(|e| IoError::connection(&device, e.to_string()))?;

            socket
                .set_read_timeout(READ_TIMEOUT)
                .map_err(|e| IoError::protocol(&device, format!("set read timeout: {}", e)))?;

            tlog!("[socketcan] Connected to {}", interface);
            Ok(Self { socket, device })
        }
    }

    impl CanDriver for SocketCanDriver {
        fn read_frame(&mut self) -> Result<Option<FrameMessage>, IoError> {
            match self.socket.read_frame() {
                Ok(frame) => Ok(convert_frame(frame)),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    Ok(None)
                }
                Err(e) => Err(IoError::protocol(&self.device, format!("read: {}", e))),
            }
        }

        fn write_frame(&mut self, frame: &FrameMessage) -> Result<(), IoError> {
            let id = if frame.is_extended {
                let id = ExtendedId::new(frame.frame_id).ok_or_else(|| {
                    IoError::protocol(
                        &self.device,
                        format!("Invalid extended ID: 0x{:08X}", frame.frame_id),
                    )
                })?;
                Id::Extended(id)
            } else {
                let id = u16::try_from(frame.frame_id)
                    .ok()
                    .and_then(StandardId::new)
                    .ok_or_else(|| {
                        IoError::protocol(
                            &self.device,
                            format!("Invalid standard ID: 0x{:03X}", frame.frame_id),
                        )
                    })?;
                Id::Standard(id)
            };

            let data_frame = CanDataFrame::new(id, &frame.bytes).ok_or_else(|| {
                IoError::protocol(&self.device, "Failed to create data frame")
            })?;

            self.socket
                .write_frame(&data_frame)
                .map_err(|e| IoError::protocol(&self.device, format!("write: {}", e)))
        }

        fn close(&mut self) {
            tlog!("[socketcan] Closed {}", self.device);
        }
    }

    pub fn open_driver(interface: &str) -> Result<Box<dyn CanDriver>, IoError> {
        Ok(Box::new(SocketCanDriver::open(interface)?))
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::{configure_interface, open_driver};

// ============================================================================
// Non-Linux Stub
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub {
    use crate::io::error::IoError;
    use crate::io::CanDriver;

    pub fn configure_interface(_interface: &str, _bitrate: u32) -> Result<(), IoError> {
        Err(IoError::configuration("SocketCAN is only available on Linux"))
    }

    pub fn open_driver(_interface: &str) -> Result<Box<dyn CanDriver>, IoError> {
        Err(IoError::configuration("SocketCAN is only available on Linux"))
    }
}

#[cfg(not(target_os = "linux"))]
pub use stub::{configure_interface, open_driver};
