// src/io/serial/mod.rs
//
// Serial port enumeration for slcan adapters.

use crate::io::error::IoError;
use crate::io::ChannelList;

/// Name fragment that marks a CANable adapter in the USB descriptor
const PREFERRED_ADAPTER: &str = "CANable";

/// Information about an available serial port
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialPortInfo {
    /// True if the USB descriptor names a CANable adapter
    pub fn is_canable(&self) -> bool {
        [&self.product, &self.manufacturer]
            .into_iter()
            .flatten()
            .any(|s| s.contains(PREFERRED_ADAPTER))
    }
}

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty (terminal) devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, IoError> {
    let ports = serialport::available_ports()
        .map_err(|e| IoError::configuration(format!("Failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    ("USB".to_string(), info.manufacturer, info.product)
                }
                serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None),
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None),
                serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
            }
        })
        .collect())
}

/// Sort ports by name and mark the last CANable adapter as preferred
pub fn rank_ports(mut ports: Vec<SerialPortInfo>) -> ChannelList {
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    let preferred = ports.iter().rposition(SerialPortInfo::is_canable);
    ChannelList {
        names: ports.into_iter().map(|p| p.port_name).collect(),
        preferred,
    }
}

/// Enumerate serial ports usable as slcan channels
pub fn list_slcan_ports() -> Result<ChannelList, IoError> {
    let list = rank_ports(list_serial_ports()?);
    tlog!(
        "[serial] Found {} port(s), preferred: {:?}",
        list.names.len(),
        list.default_channel()
    );
    Ok(list)
}
