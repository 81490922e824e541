// src/io/codec.rs
//
// Unified frame codec trait and re-exports of protocol-specific implementations.
//
// Each protocol's codec is implemented in its driver module:
// - slcan/codec.rs - slcan ASCII protocol
//
// SocketCAN frames are built with the `socketcan` crate's typed frames and
// need no codec of their own.

use crate::io::error::IoError;
use crate::io::FrameMessage;

// ============================================================================
// Frame Codec Trait
// ============================================================================

/// Trait for CAN frame codecs.
///
/// The associated types define the protocol-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (e.g., byte slice, ASCII string)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode a raw frame into a received `FrameMessage`.
    fn decode(raw: &Self::RawFrame) -> Result<FrameMessage, IoError>;

    /// Encode a frame for transmission.
    fn encode(frame: &FrameMessage) -> Result<Self::EncodedFrame, IoError>;
}

// ============================================================================
// Re-exports from driver modules
// ============================================================================

pub use super::slcan::codec::SlcanCodec;
