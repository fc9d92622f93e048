//! Mock regulator driver
//!
//! Scripted in-process stand-in for the vendor library. Used by the test suite
//! and by `eom_monitor --simulate`.
//!
//! The driver is cheap to clone; clones share state, so a test can hand one
//! clone to a controller and keep another to inspect what the controller did:
//!
//! ```rust
//! use eom_regulator::{DeviceConfig, DeviceController, MockDriver};
//! # let config = DeviceConfig {
//! #     board_index: 1, dac_min: -10.0, dac_max: 10.0, adc_min: -10.0, adc_max: 10.0,
//! #     min_threshold: 0.1, max_threshold: 0.5,
//! #     library_path: None, use_alternate_calling_convention: false,
//! # };
//! let driver = MockDriver::new();
//! let mut controller = DeviceController::with_driver(driver.clone(), config)?;
//! assert!(controller.start()?);
//! controller.close();
//! assert_eq!(driver.live_handles(), 0);
//! # Ok::<(), eom_regulator::EomError>(())
//! ```

use std::collections::HashSet;
use std::ffi::c_void;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{NativeHandle, RegulatorDriver};
use crate::config::DeviceConfig;
use crate::controller::Reading;
use crate::error::{AppResult, EomError};

/// One call received by the mock, in order of arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    /// `EOM_Create` with the board index it was given.
    Create {
        /// Board index argument.
        board_index: i16,
    },
    /// `EOM_Start`.
    Start,
    /// `EOM_Stop`.
    Stop,
    /// `EOM_GetValue`.
    GetValue,
    /// `EOM_Destroy`.
    Destroy,
}

#[derive(Debug)]
struct MockState {
    calls: Vec<DriverCall>,
    live: HashSet<usize>,
    next_handle: usize,
    stale_uses: usize,
    running: bool,
    polls: u64,

    refuse_create: bool,
    start_result: bool,
    diode_voltage: f64,
    bias_voltage: f64,
    ripple: f64,
    fail_stop: bool,
    fail_destroy: bool,
    fail_read: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            live: HashSet::new(),
            next_handle: 0x1000,
            stale_uses: 0,
            running: false,
            polls: 0,
            refuse_create: false,
            start_result: true,
            diode_voltage: 0.0,
            bias_voltage: 0.0,
            ripple: 0.0,
            fail_stop: false,
            fail_destroy: false,
            fail_read: false,
        }
    }
}

impl MockState {
    /// Record a call on `handle`, flagging it if the handle is not live.
    fn touch(&mut self, call: DriverCall, handle: &NativeHandle) -> bool {
        self.calls.push(call);
        let live = self.live.contains(&(handle.as_ptr() as usize));
        if !live {
            self.stale_uses += 1;
        }
        live
    }
}

/// Scripted regulator driver.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Driver that creates and starts successfully and reads 0 V.
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver for demo runs: plausible voltages with a small ripple.
    pub fn simulated() -> Self {
        let driver = Self::new();
        driver.set_signal(0.250, 1.200);
        driver.state.lock().ripple = 0.005;
        driver
    }

    /// Make `EOM_Create` return NULL.
    pub fn refuse_create(&self) {
        self.state.lock().refuse_create = true;
    }

    /// Value `EOM_Start` reports from now on.
    pub fn set_start_result(&self, ok: bool) {
        self.state.lock().start_result = ok;
    }

    /// Voltages `EOM_GetValue` reports.
    pub fn set_signal(&self, diode_voltage: f64, bias_voltage: f64) {
        let mut state = self.state.lock();
        state.diode_voltage = diode_voltage;
        state.bias_voltage = bias_voltage;
    }

    /// Simulate the laser dropping out (e.g. an interlock) while regulating.
    pub fn drop_laser(&self) {
        self.state.lock().running = false;
    }

    /// Make `EOM_Stop` report a fault.
    pub fn fail_stop(&self, fail: bool) {
        self.state.lock().fail_stop = fail;
    }

    /// Make `EOM_Destroy` report a fault.
    pub fn fail_destroy(&self, fail: bool) {
        self.state.lock().fail_destroy = fail;
    }

    /// Make `EOM_GetValue` report a fault.
    pub fn fail_read(&self, fail: bool) {
        self.state.lock().fail_read = fail;
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.clone()
    }

    /// Number of received calls matching `call`.
    pub fn count(&self, call: &DriverCall) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Number of calls made with a destroyed or unknown handle.
    pub fn stale_handle_uses(&self) -> usize {
        self.state.lock().stale_uses
    }

    /// Handles created and not yet destroyed.
    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Whether the simulated regulation loop is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

impl RegulatorDriver for MockDriver {
    fn create(&self, config: &DeviceConfig) -> Option<NativeHandle> {
        let mut state = self.state.lock();
        state.calls.push(DriverCall::Create {
            board_index: config.board_index,
        });
        if state.refuse_create {
            return None;
        }
        let id = state.next_handle;
        state.next_handle += 0x10;
        state.live.insert(id);
        NativeHandle::from_raw(id as *mut c_void)
    }

    fn start(&self, handle: &NativeHandle) -> bool {
        let mut state = self.state.lock();
        if !state.touch(DriverCall::Start, handle) {
            return false;
        }
        state.running = state.start_result;
        state.start_result
    }

    fn stop(&self, handle: &NativeHandle) -> AppResult<()> {
        let mut state = self.state.lock();
        state.touch(DriverCall::Stop, handle);
        state.running = false;
        if state.fail_stop {
            return Err(EomError::Driver("EOM_Stop: board not responding".to_string()));
        }
        Ok(())
    }

    fn get_value(&self, handle: &NativeHandle) -> AppResult<Reading> {
        let mut state = self.state.lock();
        if !state.touch(DriverCall::GetValue, handle) {
            return Err(EomError::Driver("EOM_GetValue: stale handle".to_string()));
        }
        if state.fail_read {
            return Err(EomError::Driver("EOM_GetValue: ADC read timeout".to_string()));
        }
        state.polls += 1;
        let wobble = state.ripple * (state.polls as f64 * 0.3).sin();
        Ok(Reading {
            diode_voltage: state.diode_voltage + wobble,
            bias_voltage: state.bias_voltage,
            laser_running: state.running,
        })
    }

    fn destroy(&self, handle: NativeHandle) -> AppResult<()> {
        let mut state = self.state.lock();
        state.touch(DriverCall::Destroy, &handle);
        state.live.remove(&(handle.as_ptr() as usize));
        state.running = false;
        if state.fail_destroy {
            return Err(EomError::Driver("EOM_Destroy: driver fault".to_string()));
        }
        Ok(())
    }
}
