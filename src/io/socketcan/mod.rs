// src/io/socketcan/mod.rs
//
// SocketCAN driver for Linux native CAN interfaces, plus interface
// discovery through `ip link show`.

mod reader;

pub use reader::{configure_interface, open_driver};

use crate::io::error::IoError;

/// Extract CAN interface names from `ip link show` output.
///
/// Each interface is two lines; the name sits between the first two colons
/// of the line preceding a `link/can` line.
pub fn parse_ip_link_output(output: &str) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    lines
        .windows(2)
        .filter(|pair| pair[1].trim_start().starts_with("link/can"))
        .filter_map(|pair| pair[0].split(':').nth(1))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// List CAN network interfaces (can0, vcan0, ...)
pub fn list_interfaces() -> Result<Vec<String>, IoError> {
    let output = std::process::Command::new("ip")
        .args(["link", "show"])
        .output()
        .map_err(|e| IoError::configuration(format!("Failed to run ip link show: {}", e)))?;

    if !output.status.success() {
        return Err(IoError::configuration(format!(
            "ip link show failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let names = parse_ip_link_output(&String::from_utf8_lossy(&output.stdout));
    tlog!("[socketcan] Found interfaces: {:?}", names);
    Ok(names)
}
