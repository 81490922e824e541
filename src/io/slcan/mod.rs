// src/io/slcan/mod.rs
//
// slcan (Serial Line CAN) protocol driver for CANable, CANable Pro, and other
// USB-CAN adapters using the Lawicel/slcan ASCII protocol.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf

pub mod codec;
mod reader;

pub use reader::{find_bitrate_command, SlcanDriver, SLCAN_SERIAL_BAUD};
