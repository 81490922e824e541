// src/io/types.rs
//
// Messages passed between the driver thread, the relay task and callers that
// want to transmit.

use std::sync::mpsc as std_mpsc;

use super::error::IoError;
use super::FrameMessage;

// ============================================================================
// Source Messages
// ============================================================================

/// Message from the driver thread to the relay task
#[derive(Debug)]
pub enum SourceMessage {
    /// A frame read from the bus (not yet stamped or filtered)
    Frame(FrameMessage),
    /// Driver read error; the driver thread exits after sending this
    Error(String),
    /// Driver thread finished (reason)
    Ended(String),
}

// ============================================================================
// Transmit Types
// ============================================================================

/// Transmit request sent to the driver thread
pub struct TransmitRequest {
    /// Frame to write, already stamped as TX
    pub frame: FrameMessage,
    /// Sync oneshot channel to send the result back
    pub result_tx: std_mpsc::SyncSender<Result<(), IoError>>,
}

/// Sender type for transmit requests (sync-safe)
pub type TransmitSender = std_mpsc::SyncSender<TransmitRequest>;
