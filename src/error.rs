//! Custom error types for the regulator core.
//!
//! This module defines the primary error type, `EomError`, for the whole crate.
//! Using the `thiserror` crate, it provides a single place to describe everything
//! that can go wrong between reading the configuration file and talking to the
//! native regulation driver.
//!
//! ## Error Hierarchy
//!
//! - **Configuration** (`ConfigNotFound`, `ConfigMalformed`, `ConfigSectionMissing`,
//!   `ConfigFieldInvalid`, `ConfigEncode`): the configuration source is absent or
//!   unusable, or a configuration cannot be written back out. Range
//!   ordering is *not* checked here, see `InvalidRange`.
//! - **Library** (`LibraryPathMissing`, `LibraryNotFound`, `LibraryLoadFailed`): the
//!   native driver library could not be located or bound.
//! - **Device** (`InvalidRange`, `DeviceCreateFailed`): the configuration was rejected
//!   before, or by, the native create call.
//! - **Lifecycle** (`ControllerClosed`): an operation was attempted after `close()`.
//! - **Driver**: a fault reported by a driver implementation while reading values.
//!
//! Construction errors are always surfaced to the caller. `stop()` and `close()`
//! never return errors; faults on those paths are logged and discarded.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, EomError>;

/// Every failure the regulator core can report.
#[derive(Error, Debug)]
pub enum EomError {
    /// The configuration file does not exist.
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but is not valid TOML.
    #[error("Config file {} is malformed: {reason}", .path.display())]
    ConfigMalformed {
        /// Offending file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The primary section is absent.
    #[error("Missing section [{section}] in {}", .path.display())]
    ConfigSectionMissing {
        /// Name of the missing section.
        section: &'static str,
        /// Offending file.
        path: PathBuf,
    },

    /// A required field is missing or does not parse as its declared type.
    #[error("Invalid config field '{field}': {reason}")]
    ConfigFieldInvalid {
        /// Field key as written in the file.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The configuration could not be rendered as TOML.
    #[error("Cannot encode config as TOML: {0}")]
    ConfigEncode(String),

    /// The configuration carries no native library path.
    #[error("dll_path is missing in [EOM_DLL] section of the config")]
    LibraryPathMissing,

    /// The native library path does not exist.
    #[error("Native library not found: {}", .0.display())]
    LibraryNotFound(PathBuf),

    /// The dynamic loader rejected the library or a required symbol is absent.
    #[error("Failed to load native library {}: {reason}", .path.display())]
    LibraryLoadFailed {
        /// Library that failed to load.
        path: PathBuf,
        /// Loader message.
        reason: String,
    },

    /// The native create call returned a null handle.
    #[error("EOM_Create returned NULL for board {board_index}")]
    DeviceCreateFailed {
        /// Board index passed to the native create call.
        board_index: i16,
    },

    /// A voltage or threshold range is inverted, non-finite or beyond hardware limits.
    #[error("Invalid {range} range [{min}, {max}]: {reason}")]
    InvalidRange {
        /// Which range was rejected (`dac`, `adc` or `threshold`).
        range: &'static str,
        /// Lower bound as configured.
        min: f64,
        /// Upper bound as configured.
        max: f64,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The controller has been closed; its handle is gone.
    #[error("EOM controller has been closed")]
    ControllerClosed,

    /// A fault reported by the driver implementation.
    #[error("Driver error: {0}")]
    Driver(String),

    /// I/O failure other than a missing config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
