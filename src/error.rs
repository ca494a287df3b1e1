//! Error types for the override engine

use thiserror::Error;

/// A value outside the domain of its field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("{field} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("pd_verifed must be 0 or 1, got {0}")]
    InvalidMode(i32),

    #[error("Invalid device name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// Rejection of a control-channel batch. Nothing was committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Empty batch")]
    Empty,

    #[error("Batch too large: {0} bytes (max {max})", max = crate::control::MAX_BATCH_LEN)]
    TooLarge(usize),

    #[error("Line {line}: expected key=value")]
    MissingSeparator { line: usize },

    #[error("Line {line}: unknown key {key:?}")]
    UnknownKey { line: usize, key: String },

    #[error("Line {line}: invalid number {value:?} for {key}")]
    InvalidNumber {
        line: usize,
        key: String,
        value: String,
    },

    #[error("Line {line}: {source}")]
    Range { line: usize, source: RangeError },
}

/// Errors from a property-based device
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Property not supported: {device}/{property}")]
    NotSupported { device: String, property: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Positive errno equivalent, as an instrumented call would report it
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => libc::ENODEV,
            Self::NotSupported { .. } => libc::EOPNOTSUPP,
            Self::InvalidValue(_) => libc::EINVAL,
            Self::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Errors loading the settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(#[from] RangeError),
}
