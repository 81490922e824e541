// src/display.rs
//
// Log view: renders frames as text lines and writes coloured entries to the
// terminal. All writes go through one mutex so lines never interleave.

use std::io::Write;
use std::sync::Mutex;

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};

use crate::io::{Direction, FrameMessage};

// ============================================================================
// Colours
// ============================================================================

/// Colour of a log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogColour {
    RxStandard,
    RxExtended,
    TxStandard,
    TxExtended,
    /// Failures
    Error,
    /// Connect/disconnect notices
    Event,
    /// Everything else
    Plain,
}

impl LogColour {
    /// `#RRGGBB` value, `None` for the terminal default
    pub fn hex(self) -> Option<&'static str> {
        match self {
            LogColour::RxStandard => Some("#EC4954"),
            LogColour::RxExtended => Some("#FFA22B"),
            LogColour::TxStandard => Some("#2C4AFF"),
            LogColour::TxExtended => Some("#33C0FF"),
            LogColour::Error => Some("#FF0000"),
            LogColour::Event => Some("#00B000"),
            LogColour::Plain => None,
        }
    }

    pub fn terminal_colour(self) -> Option<Color> {
        let hex = self.hex()?;
        let rgb = u32::from_str_radix(hex.trim_start_matches('#'), 16).ok()?;
        Some(Color::Rgb {
            r: (rgb >> 16) as u8,
            g: (rgb >> 8) as u8,
            b: rgb as u8,
        })
    }
}

/// Colour for a frame entry, by direction and id format
pub fn frame_colour(frame: &FrameMessage) -> LogColour {
    match (frame.direction, frame.is_extended) {
        (Direction::Rx, false) => LogColour::RxStandard,
        (Direction::Rx, true) => LogColour::RxExtended,
        (Direction::Tx, false) => LogColour::TxStandard,
        (Direction::Tx, true) => LogColour::TxExtended,
    }
}

// ============================================================================
// Frame Formatting
// ============================================================================

/// Identifier as shown in the log: 8 hex digits for extended ids, `_____`
/// plus 3 hex digits for standard ones so both line up.
pub fn format_id(frame_id: u32, is_extended: bool) -> String {
    if is_extended {
        format!("{:08X}", frame_id)
    } else {
        format!("_____{:03X}", frame_id)
    }
}

/// Payload as space-separated upper-case hex pairs
pub fn format_data(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `MM:SS:mmm` in local time
fn format_timestamp(timestamp_us: u64) -> String {
    chrono::DateTime::from_timestamp_micros(timestamp_us as i64)
        .map(|t| t.with_timezone(&chrono::Local).format("%M:%S:%3f").to_string())
        .unwrap_or_else(|| "--:--:---".to_string())
}

/// One log line for a frame:
/// `time:MM:SS:mmm\tRX:  STDID:_____123 data:01 02`
pub fn format_frame_line(frame: &FrameMessage) -> String {
    format!(
        "time:{}\t{}:{} {}ID:{} data:{}",
        format_timestamp(frame.timestamp_us),
        frame.direction.label(),
        if frame.is_error_frame { "E" } else { " " },
        if frame.is_extended { "EXT" } else { "STD" },
        format_id(frame.frame_id, frame.is_extended),
        format_data(&frame.bytes)
    )
}

// ============================================================================
// Log Sinks
// ============================================================================

/// Destination for log entries
pub trait LogSink: Send + Sync {
    fn log(&self, text: &str, colour: LogColour);
    fn clear(&self);

    fn log_frame(&self, frame: &FrameMessage) {
        self.log(&format_frame_line(frame), frame_colour(frame));
    }
}

/// Coloured terminal output
pub struct ConsoleLog<W: Write + Send> {
    out: Mutex<W>,
    colour: bool,
}

impl ConsoleLog<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout(), true)
    }
}

impl<W: Write + Send> ConsoleLog<W> {
    pub fn new(out: W, colour: bool) -> Self {
        Self {
            out: Mutex::new(out),
            colour,
        }
    }

    fn write_entry(out: &mut W, text: &str, colour: Option<Color>) -> std::io::Result<()> {
        match colour {
            Some(c) => queue!(out, SetForegroundColor(c), Print(text), ResetColor, Print("\n"))?,
            None => queue!(out, Print(text), Print("\n"))?,
        }
        out.flush()
    }
}

impl<W: Write + Send> LogSink for ConsoleLog<W> {
    fn log(&self, text: &str, colour: LogColour) {
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let colour = if self.colour {
            colour.terminal_colour()
        } else {
            None
        };
        if let Err(e) = Self::write_entry(&mut out, text, colour) {
            tlog!("[display] Failed to write log entry: {}", e);
        }
    }

    fn clear(&self) {
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = queue!(out, Clear(ClearType::All), MoveTo(0, 0)).and_then(|_| out.flush());
        if let Err(e) = result {
            tlog!("[display] Failed to clear log: {}", e);
        }
    }
}

/// In-memory sink, used by tests
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(String, LogColour)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, LogColour)> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries().into_iter().map(|(text, _)| text).collect()
    }
}

impl LogSink for MemoryLog {
    fn log(&self, text: &str, colour: LogColour) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.push((text.to_string(), colour));
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_id() {
        assert_eq!(format_id(0x123, false), "_____123");
        assert_eq!(format_id(0x7, false), "_____007");
        assert_eq!(format_id(0x123, true), "00000123");
        assert_eq!(format_id(0x1FFF_FFFF, true), "1FFFFFFF");
    }

    #[test]
    fn test_format_frame_line_layout() {
        let mut frame = FrameMessage::new(0x123, &[1, 2], false);
        frame.timestamp_us = crate::io::now_us();
        let line = format_frame_line(&frame);

        assert!(line.starts_with("time:"));
        let (time, rest) = line.split_once('\t').unwrap();
        assert_eq!(time.len(), "time:MM:SS:mmm".len());
        assert_eq!(rest, "TX:  STDID:_____123 data:01 02");
    }

    #[test]
    fn test_format_frame_line_error_extended_rx() {
        let mut frame = FrameMessage::received(0x18DAF110, &[0xAB], true);
        frame.is_error_frame = true;
        let line = format_frame_line(&frame);
        assert!(line.ends_with("RX:E EXTID:18DAF110 data:AB"));
    }

    #[test]
    fn test_frame_colours() {
        let tx = FrameMessage::new(1, &[0], false);
        let rx_ext = FrameMessage::received(1, &[0], true);
        assert_eq!(frame_colour(&tx), LogColour::TxStandard);
        assert_eq!(frame_colour(&rx_ext), LogColour::RxExtended);
        assert_eq!(
            LogColour::RxStandard.terminal_colour(),
            Some(Color::Rgb { r: 0xEC, g: 0x49, b: 0x54 })
        );
        assert_eq!(LogColour::Plain.terminal_colour(), None);
    }

    #[test]
    fn test_console_log_plain_output() {
        let sink = ConsoleLog::new(Vec::new(), false);
        sink.log("Disconnected", LogColour::Event);
        sink.log("Id is empty.", LogColour::Error);
        let out = sink.out.lock().unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "Disconnected\nId is empty.\n");
    }

    #[test]
    fn test_memory_log_clear() {
        let sink = MemoryLog::new();
        sink.log_frame(&FrameMessage::new(0x10, &[1], false));
        assert_eq!(sink.entries()[0].1, LogColour::TxStandard);
        sink.clear();
        assert!(sink.entries().is_empty());
    }
}
