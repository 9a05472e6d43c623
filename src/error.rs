//! Typed errors shared by the script engine, the gadget layer and the
//! privileged session.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Machine-readable failure codes surfaced to callers in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    HostDisconnected,
    WaitForTimeout,
    HidWriteFailed,
    HidMouseWriteFailed,
    HidNotActive,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::HostDisconnected => "HOST_DISCONNECTED",
            ErrorCode::WaitForTimeout => "WAIT_FOR_TIMEOUT",
            ErrorCode::HidWriteFailed => "HID_WRITE_FAILED",
            ErrorCode::HidMouseWriteFailed => "HID_MOUSE_WRITE_FAILED",
            ErrorCode::HidNotActive => "HID_NOT_ACTIVE",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device-level failure carrying a [`ErrorCode`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct DeviceError {
    pub code: ErrorCode,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failures of the long-lived elevated shell.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no privileged session could be established")]
    Unavailable,
    #[error("privileged session is not alive")]
    NotAlive,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0} writer is not open")]
    WriterNotReady(&'static str),
    #[error("privileged session I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the gadget lifecycle and HID write paths.
#[derive(Debug, Error)]
pub enum GadgetError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("activation failed: {0}")]
    Activation(String),
    #[error("invalid profile: {0}")]
    InvalidProfile(String),
    #[error("operation not allowed while gadget is {0}")]
    InvalidState(String),
    #[error("{0} HID device not available")]
    NoDevice(&'static str),
}

impl GadgetError {
    pub fn not_active() -> Self {
        GadgetError::Device(DeviceError::new(ErrorCode::HidNotActive, "Gadget is not active"))
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            GadgetError::Device(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Errors that abort a script run unless intercepted by `TRY`/`CATCH`.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Gadget(#[from] GadgetError),
    #[error("maximum function call depth ({0}) exceeded")]
    CallDepthExceeded(u32),
    #[error("WAIT_FOR unsupported target: {0}")]
    UnsupportedWaitTarget(String),
}

impl ScriptError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ScriptError::Device(e) => Some(e.code),
            ScriptError::Gadget(e) => e.code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::HostDisconnected.as_str(), "HOST_DISCONNECTED");
        assert_eq!(
            serde_json::to_string(&ErrorCode::HidMouseWriteFailed).unwrap(),
            "\"HID_MOUSE_WRITE_FAILED\""
        );
    }

    #[test]
    fn test_code_through_layers() {
        let err = ScriptError::from(GadgetError::not_active());
        assert_eq!(err.code(), Some(ErrorCode::HidNotActive));
        assert_eq!(ScriptError::CallDepthExceeded(64).code(), None);
    }
}
