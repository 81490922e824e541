// src/io/error.rs
//
// Error type shared by the CAN drivers, codecs and channel discovery.

/// Errors raised by a CAN transport.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The device could not be opened (missing, busy, bad channel name).
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    /// The device answered with something we could not use, or rejected a frame.
    #[error("{device}: {message}")]
    Protocol { device: String, message: String },

    /// The requested settings are not supported by the transport.
    #[error("{0}")]
    Configuration(String),
}

impl IoError {
    pub fn connection(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn protocol(device: impl Into<String>, message: impl Into<String>) -> Self {
        IoError::Protocol {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }
}
