//! Error types for the library

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while talking to a light
#[derive(Error, Debug)]
pub enum Error {
    /// An argument is outside its documented bounds (brightness, duration).
    #[error("\"{argument}\" is {value}, allowed range is {min} to {max}")]
    Range {
        argument: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// The operation needs an open connection and there is none.
    #[error("device is not connected")]
    NotConnected,

    /// The requested mode transition would not change anything.
    #[error("device is already in {0} mode")]
    AlreadyInMode(&'static str),

    /// Connecting (or reconnecting) to the device failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A bounded wait ran out.
    #[error("Timeout after {elapsed:?}: {what}")]
    Timeout { what: &'static str, elapsed: Duration },

    /// The reply was malformed or carried an error from the device.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No network interface could join the discovery multicast group.
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// A host name could not be resolved to an address.
    #[error("could not resolve host \"{0}\"")]
    InvalidHostname(String),

    /// IO errors on an already open socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a reply could not be turned into a result.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The device answered with an `error` member.
    #[error("device returned error {code}: {message}")]
    Device { code: i64, message: String },

    /// The reply is not a valid response envelope.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Error {
    pub(crate) fn out_of_range(argument: &'static str, value: i64, min: i64, max: i64) -> Self {
        Error::Range {
            argument,
            value,
            min,
            max,
        }
    }

    /// True for errors the device itself reported, as opposed to transport or usage errors.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Device { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_message_names_argument() {
        let err = Error::out_of_range("brightness", 101, 0, 100);
        assert_eq!(
            err.to_string(),
            "\"brightness\" is 101, allowed range is 0 to 100"
        );
    }

    #[test]
    fn test_device_error_detection() {
        let err: Error = ProtocolError::Device {
            code: -1,
            message: "unsupported method".to_string(),
        }
        .into();
        assert!(err.is_device_error());
        assert!(!Error::NotConnected.is_device_error());
    }
}
