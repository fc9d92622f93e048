//! Lifecycle controller for one native regulator instance.
//!
//! [`DeviceController`] owns the handle returned by the native create call and
//! is the only code that ever passes it back to the driver.
//!
//! # State Machine
//!
//! ```text
//!   create ──► Ready ──start──► Running
//!                ▲                 │
//!                └──────stop───────┘
//!   close (from any state) ──► Closed (terminal)
//! ```
//!
//! Construction either yields a `Ready` controller or an error, so there is no
//! observable uninitialised state. After `close()` the handle is gone and
//! `start`/`read` fail with [`EomError::ControllerClosed`].
//!
//! # Threading
//!
//! All calls are synchronous and expected on the owning thread. The handle is a
//! raw pointer, so the controller is neither `Send` nor `Sync`; a caller that
//! needs cross-thread access must move it behind a single mutex on that thread's
//! side of the program.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::driver::{CallingConvention, NativeHandle, NativeLibrary, RegulatorDriver};
use crate::error::{AppResult, EomError};

/// Absolute DAC/ADC voltage limit of the supported boards.
pub const HARDWARE_VOLTAGE_LIMIT: f64 = 10.0;

/// Snapshot returned by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Reading {
    /// Photodiode voltage in volts.
    pub diode_voltage: f64,
    /// Modulator bias voltage in volts.
    pub bias_voltage: f64,
    /// Whether the driver reports the regulation loop as running.
    pub laser_running: bool,
}

/// Lifecycle state of a [`DeviceController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Handle created, regulation loop not running.
    Ready,
    /// `start()` succeeded.
    Running,
    /// Handle destroyed. Terminal.
    Closed,
}

/// Owner of one native regulator handle.
pub struct DeviceController<D: RegulatorDriver = NativeLibrary> {
    driver: D,
    handle: Option<NativeHandle>,
    state: ControllerState,
    config: DeviceConfig,
}

impl DeviceController<NativeLibrary> {
    /// Load the native library at `library_path` and create a regulator.
    ///
    /// The calling convention follows `config.use_alternate_calling_convention`.
    pub fn create(library_path: impl AsRef<Path>, config: DeviceConfig) -> AppResult<Self> {
        let convention = CallingConvention::from_stdcall_flag(config.use_alternate_calling_convention);
        Self::create_with_convention(library_path, config, convention)
    }

    /// Like [`create`](Self::create) with an explicit calling convention.
    pub fn create_with_convention(
        library_path: impl AsRef<Path>,
        config: DeviceConfig,
        convention: CallingConvention,
    ) -> AppResult<Self> {
        validate(&config)?;
        let library = NativeLibrary::open(library_path, convention)?;
        Self::with_driver(library, config)
    }

    /// Load the config file at `config_path` and create a regulator from the
    /// library at `library_path`.
    ///
    /// `dll_path` and `use_stdcall` in the file are ignored; the caller's
    /// `library_path` and `convention` win.
    ///
    /// # Errors
    ///
    /// Any [`DeviceConfig::load`] error, then any
    /// [`create_with_convention`](Self::create_with_convention) error.
    pub fn from_config(
        library_path: impl AsRef<Path>,
        config_path: impl AsRef<Path>,
        convention: CallingConvention,
    ) -> AppResult<Self> {
        let config = DeviceConfig::load(config_path)?;
        Self::create_with_convention(library_path, config, convention)
    }

    /// Load the config file at `path` and create a regulator from the library
    /// it names in `[EOM_DLL]`.
    ///
    /// # Errors
    ///
    /// Any [`DeviceConfig::load`] error, [`EomError::LibraryPathMissing`] if
    /// `dll_path` is empty, then any [`create`](Self::create) error.
    pub fn from_config_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let config = DeviceConfig::load(path)?;
        let library_path = config.library_path.clone().ok_or(EomError::LibraryPathMissing)?;
        Self::create(library_path, config)
    }
}

impl<D: RegulatorDriver> DeviceController<D> {
    /// Create a regulator through an already bound driver.
    ///
    /// The configuration is validated before the driver sees it.
    pub fn with_driver(driver: D, config: DeviceConfig) -> AppResult<Self> {
        validate(&config)?;

        let handle = driver
            .create(&config)
            .ok_or(EomError::DeviceCreateFailed {
                board_index: config.board_index,
            })?;

        info!(board = config.board_index, ?handle, "EOM regulator created");
        Ok(Self {
            driver,
            handle: Some(handle),
            state: ControllerState::Ready,
            config,
        })
    }

    fn live_handle(&self) -> AppResult<&NativeHandle> {
        self.handle.as_ref().ok_or(EomError::ControllerClosed)
    }

    /// Start the regulation loop.
    ///
    /// Returns the driver's verdict. `false` is not an error: the controller
    /// is left `Ready`, even if it was `Running` before, and the caller decides
    /// what a refused start means.
    pub fn start(&mut self) -> AppResult<bool> {
        let handle = self.live_handle()?;
        let started = self.driver.start(handle);
        if started {
            self.state = ControllerState::Running;
            info!(board = self.config.board_index, "EOM regulation started");
        } else {
            self.state = ControllerState::Ready;
            warn!(board = self.config.board_index, "EOM_Start reported failure");
        }
        Ok(started)
    }

    /// Stop the regulation loop. Never fails.
    ///
    /// Safe before any `start`, when already stopped and after `close`
    /// (where it does nothing).
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.as_ref() else {
            return;
        };
        if let Err(e) = self.driver.stop(handle) {
            warn!(error = %e, "EOM_Stop failed; ignoring");
        }
        self.state = ControllerState::Ready;
        debug!("EOM regulation stopped");
    }

    /// Poll photodiode voltage, bias and running flag.
    ///
    /// Purely observational. Valid while stopped, in which case the driver
    /// reports `laser_running = false`.
    pub fn read(&self) -> AppResult<Reading> {
        let handle = self.live_handle()?;
        self.driver.get_value(handle)
    }

    /// Stop, destroy and forget the handle. Idempotent and never fails.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            self.state = ControllerState::Closed;
            return;
        };

        if let Err(e) = self.driver.stop(&handle) {
            warn!(error = %e, "EOM_Stop failed during close; ignoring");
        }
        if let Err(e) = self.driver.destroy(handle) {
            warn!(error = %e, "EOM_Destroy failed during close; handle discarded");
        }
        self.state = ControllerState::Closed;
        info!(board = self.config.board_index, "EOM regulator closed");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.state == ControllerState::Closed
    }

    /// Configuration the regulator was created with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The bound driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: RegulatorDriver> Drop for DeviceController<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Check range ordering and hardware limits before the native create call.
///
/// # Errors
///
/// [`EomError::InvalidRange`] if `dac_min >= dac_max`, `adc_min >= adc_max`,
/// `min_threshold > max_threshold`, a value is not finite, or a DAC/ADC bound
/// lies outside ±[`HARDWARE_VOLTAGE_LIMIT`].
pub fn validate(config: &DeviceConfig) -> AppResult<()> {
    check_voltage_range("dac", config.dac_min, config.dac_max)?;
    check_voltage_range("adc", config.adc_min, config.adc_max)?;

    let (min, max) = (config.min_threshold, config.max_threshold);
    let reject = |reason| EomError::InvalidRange {
        range: "threshold",
        min,
        max,
        reason,
    };
    if !min.is_finite() || !max.is_finite() {
        return Err(reject("bounds must be finite"));
    }
    if min > max {
        return Err(reject("min must not exceed max"));
    }
    Ok(())
}

fn check_voltage_range(range: &'static str, min: f64, max: f64) -> AppResult<()> {
    let reject = |reason| EomError::InvalidRange {
        range,
        min,
        max,
        reason,
    };
    if !min.is_finite() || !max.is_finite() {
        return Err(reject("bounds must be finite"));
    }
    if min >= max {
        return Err(reject("min must be below max"));
    }
    if min < -HARDWARE_VOLTAGE_LIMIT || max > HARDWARE_VOLTAGE_LIMIT {
        return Err(reject("outside the hardware limit of ±10 V"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverCall, MockDriver};
    use tracing_test::traced_test;

    fn config() -> DeviceConfig {
        DeviceConfig {
            board_index: 1,
            dac_min: -10.0,
            dac_max: 10.0,
            adc_min: -10.0,
            adc_max: 10.0,
            min_threshold: 0.1,
            max_threshold: 0.5,
            library_path: None,
            use_alternate_calling_convention: false,
        }
    }

    fn controller() -> (MockDriver, DeviceController<MockDriver>) {
        let driver = MockDriver::new();
        let controller = DeviceController::with_driver(driver.clone(), config()).unwrap();
        (driver, controller)
    }

    #[test]
    fn test_create_enters_ready() {
        let (driver, controller) = controller();
        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(driver.live_handles(), 1);
        assert_eq!(controller.config().board_index, 1);
    }

    #[test]
    fn test_start_stop_restart() {
        let (driver, mut controller) = controller();
        assert!(controller.start().unwrap());
        assert_eq!(controller.state(), ControllerState::Running);

        controller.stop();
        assert_eq!(controller.state(), ControllerState::Ready);
        assert!(!driver.is_running());

        assert!(controller.start().unwrap());
        assert_eq!(controller.state(), ControllerState::Running);
        assert_eq!(driver.count(&DriverCall::Start), 2);
    }

    #[test]
    fn test_refused_start_is_not_an_error() {
        let (driver, mut controller) = controller();
        driver.set_start_result(false);
        assert!(!controller.start().unwrap());
        assert_eq!(controller.state(), ControllerState::Ready);
        assert!(!controller.read().unwrap().laser_running);
    }

    #[test]
    fn test_refused_restart_returns_to_ready() {
        let (driver, mut controller) = controller();
        assert!(controller.start().unwrap());
        assert_eq!(controller.state(), ControllerState::Running);

        driver.set_start_result(false);
        assert!(!controller.start().unwrap());
        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(driver.count(&DriverCall::Start), 2);
    }

    #[test]
    fn test_stop_before_start_calls_driver_and_succeeds() {
        let (driver, mut controller) = controller();
        controller.stop();
        controller.stop();
        assert_eq!(driver.count(&DriverCall::Stop), 2);
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (driver, mut controller) = controller();
        controller.start().unwrap();
        controller.close();
        controller.close();

        assert!(controller.is_closed());
        assert_eq!(driver.count(&DriverCall::Destroy), 1);
        assert_eq!(driver.live_handles(), 0);
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Create { board_index: 1 },
                DriverCall::Start,
                DriverCall::Stop,
                DriverCall::Destroy,
            ]
        );
    }

    #[test]
    fn test_closed_controller_rejects_start_and_read() {
        let (driver, mut controller) = controller();
        controller.close();
        let calls_at_close = driver.calls().len();

        assert!(matches!(controller.start(), Err(EomError::ControllerClosed)));
        assert!(matches!(controller.read(), Err(EomError::ControllerClosed)));
        controller.stop();

        assert_eq!(driver.calls().len(), calls_at_close);
        assert_eq!(driver.stale_handle_uses(), 0);
    }

    #[test]
    fn test_drop_releases_handle() {
        let driver = MockDriver::new();
        {
            let mut controller = DeviceController::with_driver(driver.clone(), config()).unwrap();
            controller.start().unwrap();
        }
        assert_eq!(driver.live_handles(), 0);
        assert_eq!(driver.count(&DriverCall::Destroy), 1);
    }

    #[test]
    fn test_null_handle_is_create_failure() {
        let driver = MockDriver::new();
        driver.refuse_create();
        let err = DeviceController::with_driver(driver.clone(), config()).err().unwrap();
        assert!(matches!(err, EomError::DeviceCreateFailed { board_index: 1 }));
        assert_eq!(driver.count(&DriverCall::Destroy), 0);
    }

    #[traced_test]
    #[test]
    fn test_close_swallows_driver_faults() {
        let (driver, mut controller) = controller();
        driver.fail_stop(true);
        driver.fail_destroy(true);

        controller.stop();
        controller.close();

        assert!(controller.is_closed());
        assert_eq!(driver.live_handles(), 0);
        assert!(logs_contain("EOM_Stop failed"));
        assert!(logs_contain("EOM_Destroy failed during close"));
    }

    #[test]
    fn test_read_fault_is_propagated() {
        let (driver, controller) = controller();
        driver.fail_read(true);
        assert!(matches!(controller.read(), Err(EomError::Driver(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_ranges() {
        let mut cfg = config();
        cfg.dac_min = 10.0;
        assert!(matches!(validate(&cfg), Err(EomError::InvalidRange { range: "dac", .. })));

        let mut cfg = config();
        cfg.adc_max = cfg.adc_min;
        assert!(matches!(validate(&cfg), Err(EomError::InvalidRange { range: "adc", .. })));

        let mut cfg = config();
        cfg.min_threshold = 0.6;
        assert!(matches!(
            validate(&cfg),
            Err(EomError::InvalidRange { range: "threshold", .. })
        ));
    }

    #[test]
    fn test_validate_accepts_equal_thresholds() {
        let mut cfg = config();
        cfg.min_threshold = 0.3;
        cfg.max_threshold = 0.3;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_limit_and_nan() {
        let mut cfg = config();
        cfg.dac_max = 12.0;
        assert!(matches!(validate(&cfg), Err(EomError::InvalidRange { range: "dac", .. })));

        let mut cfg = config();
        cfg.adc_min = f64::NAN;
        assert!(matches!(validate(&cfg), Err(EomError::InvalidRange { range: "adc", .. })));
    }
}
