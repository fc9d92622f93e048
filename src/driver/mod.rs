//! Native regulation driver interface.
//!
//! The regulation loop itself runs inside a vendor library exposing five C
//! entry points. [`RegulatorDriver`] is the seam between that ABI and the
//! [`DeviceController`](crate::DeviceController): [`NativeLibrary`] binds the
//! real library at runtime, [`MockDriver`] scripts it in-process.
//!
//! # Handle Ownership
//!
//! A [`NativeHandle`] is neither `Clone` nor `Copy`. Drivers borrow it for
//! `start`/`stop`/`get_value` and take it by value in `destroy`, so a destroyed
//! handle cannot be reached through safe code afterwards.

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;

use crate::config::DeviceConfig;
use crate::controller::Reading;
use crate::error::AppResult;

pub mod mock;
pub mod native;

pub use mock::{DriverCall, MockDriver};
pub use native::NativeLibrary;

/// Opaque regulator instance returned by the native create call.
///
/// Always non-null. Owned by exactly one controller.
pub struct NativeHandle(NonNull<c_void>);

impl NativeHandle {
    /// Wrap a raw handle; `None` for null.
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Raw pointer for passing back across the ABI.
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:p})", self.0)
    }
}

/// Binary calling convention used for the native entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallingConvention {
    /// `extern "C"` (cdecl).
    #[default]
    C,
    /// `extern "system"`: stdcall on 32-bit Windows, C everywhere else.
    Stdcall,
}

impl CallingConvention {
    /// Map the `use_stdcall` config flag.
    pub fn from_stdcall_flag(use_stdcall: bool) -> Self {
        if use_stdcall {
            Self::Stdcall
        } else {
            Self::C
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::C => write!(f, "cdecl"),
            Self::Stdcall => write!(f, "stdcall"),
        }
    }
}

/// The five operations of the native regulator ABI.
///
/// Implementations are called from a single thread, one call at a time; the
/// native device state is not assumed reentrant.
pub trait RegulatorDriver {
    /// `EOM_Create`: configure the board and create a regulator. `None` on failure.
    fn create(&self, config: &DeviceConfig) -> Option<NativeHandle>;

    /// `EOM_Start`: start the regulation loop. Returns the driver's own verdict.
    fn start(&self, handle: &NativeHandle) -> bool;

    /// `EOM_Stop`: stop the regulation loop.
    fn stop(&self, handle: &NativeHandle) -> AppResult<()>;

    /// `EOM_GetValue`: photodiode voltage, bias voltage and running flag.
    fn get_value(&self, handle: &NativeHandle) -> AppResult<Reading>;

    /// `EOM_Destroy`: release the regulator. Consumes the handle.
    fn destroy(&self, handle: NativeHandle) -> AppResult<()>;
}
