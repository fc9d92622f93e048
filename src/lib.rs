//! Core library for the EOM regulator front end.
//!
//! A vendor library runs the electro-optic-modulator regulation loop. This crate
//! loads it, validates and applies the operating configuration, drives the loop's
//! start/stop lifecycle and polls live telemetry for display. The regulation
//! algorithm itself stays inside the vendor library.
//!
//! ```rust,no_run
//! use eom_regulator::DeviceController;
//!
//! let mut eom = DeviceController::from_config_path("eom.toml")?;
//! eom.start()?;
//! let reading = eom.read()?;
//! println!("PD {:.3} V, running: {}", reading.diode_voltage, reading.laser_running);
//! eom.close();
//! # Ok::<(), eom_regulator::EomError>(())
//! ```

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod monitor;

pub use config::DeviceConfig;
pub use controller::{validate, ControllerState, DeviceController, Reading};
pub use driver::{CallingConvention, DriverCall, MockDriver, NativeHandle, NativeLibrary, RegulatorDriver};
pub use error::{AppResult, EomError};
