//! Runtime binding of the vendor regulator library via `libloading`.
//!
//! Expected exports:
//!
//! ```c
//! void* EOM_Create(short board, double dac_min, double dac_max,
//!                  double adc_min, double adc_max,
//!                  double min_threshold, double max_threshold);
//! bool  EOM_Start(void* h);
//! void  EOM_Stop(void* h);
//! void  EOM_GetValue(void* h, double* diode, double* bias, bool* running);
//! void  EOM_Destroy(void* h);
//! ```
//!
//! C `bool` results are read as a byte and compared against zero.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info};

use super::{CallingConvention, NativeHandle, RegulatorDriver};
use crate::config::DeviceConfig;
use crate::controller::Reading;
use crate::error::{AppResult, EomError};

/// Copy a function pointer out of the library.
///
/// # Safety
///
/// `T` must match the exported symbol's real signature.
unsafe fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, String> {
    let mut raw = name.as_bytes().to_vec();
    raw.push(0);
    library
        .get::<T>(&raw)
        .map(|sym| *sym)
        .map_err(|e| format!("missing symbol {name}: {e}"))
}

macro_rules! entry_points {
    ($name:ident, $abi:tt) => {
        #[derive(Clone, Copy)]
        struct $name {
            create: unsafe extern $abi fn(i16, f64, f64, f64, f64, f64, f64) -> *mut c_void,
            start: unsafe extern $abi fn(*mut c_void) -> u8,
            stop: unsafe extern $abi fn(*mut c_void),
            get_value: unsafe extern $abi fn(*mut c_void, *mut f64, *mut f64, *mut u8),
            destroy: unsafe extern $abi fn(*mut c_void),
        }

        impl $name {
            unsafe fn bind(library: &Library) -> Result<Self, String> {
                Ok(Self {
                    create: symbol(library, "EOM_Create")?,
                    start: symbol(library, "EOM_Start")?,
                    stop: symbol(library, "EOM_Stop")?,
                    get_value: symbol(library, "EOM_GetValue")?,
                    destroy: symbol(library, "EOM_Destroy")?,
                })
            }

            fn create(&self, c: &DeviceConfig) -> *mut c_void {
                unsafe {
                    (self.create)(
                        c.board_index,
                        c.dac_min,
                        c.dac_max,
                        c.adc_min,
                        c.adc_max,
                        c.min_threshold,
                        c.max_threshold,
                    )
                }
            }

            fn start(&self, h: *mut c_void) -> bool {
                unsafe { (self.start)(h) != 0 }
            }

            fn stop(&self, h: *mut c_void) {
                unsafe { (self.stop)(h) }
            }

            fn get_value(&self, h: *mut c_void) -> Reading {
                let mut diode = 0.0_f64;
                let mut bias = 0.0_f64;
                let mut running = 0_u8;
                unsafe { (self.get_value)(h, &mut diode, &mut bias, &mut running) };
                Reading {
                    diode_voltage: diode,
                    bias_voltage: bias,
                    laser_running: running != 0,
                }
            }

            fn destroy(&self, h: *mut c_void) {
                unsafe { (self.destroy)(h) }
            }
        }
    };
}

entry_points!(CdeclEntryPoints, "C");
entry_points!(SystemEntryPoints, "system");

enum EntryPoints {
    Cdecl(CdeclEntryPoints),
    System(SystemEntryPoints),
}

macro_rules! dispatch {
    ($entry:expr, $api:ident => $call:expr) => {
        match $entry {
            EntryPoints::Cdecl($api) => $call,
            EntryPoints::System($api) => $call,
        }
    };
}

/// A loaded vendor library with its five entry points bound.
pub struct NativeLibrary {
    entry: EntryPoints,
    path: PathBuf,
    convention: CallingConvention,
    // Keeps the function pointers in `entry` valid.
    _library: Library,
}

impl NativeLibrary {
    /// Load the library at `path` and bind every entry point.
    ///
    /// # Errors
    ///
    /// * [`EomError::LibraryNotFound`] if `path` does not exist
    /// * [`EomError::LibraryLoadFailed`] if the loader rejects the file or a symbol is missing
    pub fn open(path: impl AsRef<Path>, convention: CallingConvention) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EomError::LibraryNotFound(path.to_path_buf()));
        }

        let load_failed = |reason: String| EomError::LibraryLoadFailed {
            path: path.to_path_buf(),
            reason,
        };

        // SAFETY: loading runs the library's initialisers; the vendor driver is trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| load_failed(e.to_string()))?;

        // SAFETY: signatures follow the vendor header reproduced in the module docs.
        let entry = unsafe {
            match convention {
                CallingConvention::C => CdeclEntryPoints::bind(&library).map(EntryPoints::Cdecl),
                CallingConvention::Stdcall => SystemEntryPoints::bind(&library).map(EntryPoints::System),
            }
        }
        .map_err(load_failed)?;

        info!(path = %path.display(), %convention, "Loaded EOM driver library");
        Ok(Self {
            entry,
            path: path.to_path_buf(),
            convention,
            _library: library,
        })
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Convention the entry points were bound with.
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }
}

impl RegulatorDriver for NativeLibrary {
    fn create(&self, config: &DeviceConfig) -> Option<NativeHandle> {
        debug!(board = config.board_index, "EOM_Create");
        NativeHandle::from_raw(dispatch!(&self.entry, api => api.create(config)))
    }

    fn start(&self, handle: &NativeHandle) -> bool {
        debug!(?handle, "EOM_Start");
        dispatch!(&self.entry, api => api.start(handle.as_ptr()))
    }

    fn stop(&self, handle: &NativeHandle) -> AppResult<()> {
        debug!(?handle, "EOM_Stop");
        dispatch!(&self.entry, api => api.stop(handle.as_ptr()));
        Ok(())
    }

    fn get_value(&self, handle: &NativeHandle) -> AppResult<Reading> {
        Ok(dispatch!(&self.entry, api => api.get_value(handle.as_ptr())))
    }

    fn destroy(&self, handle: NativeHandle) -> AppResult<()> {
        debug!(?handle, "EOM_Destroy");
        dispatch!(&self.entry, api => api.destroy(handle.as_ptr()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_library_is_not_found() {
        let err = NativeLibrary::open("/definitely/not/here/EOM.dll", CallingConvention::C)
            .err()
            .unwrap();
        assert!(matches!(err, EomError::LibraryNotFound(_)));
    }

    #[test]
    fn test_non_library_file_fails_to_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a shared object").unwrap();

        let err = NativeLibrary::open(file.path(), CallingConvention::Stdcall)
            .err()
            .unwrap();
        match err {
            EomError::LibraryLoadFailed { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }
}
