//! Loading and saving the regulator configuration.
//!
//! The configuration lives in a TOML file with two tables. `[EOM]` carries the
//! parameters handed to the native create call and is required; `[EOM_DLL]`
//! locates the native library and is optional.
//!
//! ```toml
//! [EOM]
//! board_idx = 1
//! dac_min = -10.0
//! dac_max = 10.0
//! adc_min = -10.0
//! adc_max = 10.0
//! min_threshold = 0.1
//! max_threshold = 0.5
//!
//! [EOM_DLL]
//! dll_path = "drivers/EOM_Controller_NI.dll"
//! use_stdcall = false
//! ```
//!
//! Loading only checks presence and type of each field. Range ordering is
//! validated by the controller right before the native create call.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::{Table, Value};
use tracing::debug;

use crate::error::{AppResult, EomError};

/// Name of the required table holding the device parameters.
pub const DEVICE_SECTION: &str = "EOM";

/// Name of the optional table locating the native library.
pub const LIBRARY_SECTION: &str = "EOM_DLL";

/// Config file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "eom.toml";

/// Operating configuration for one regulator instance.
///
/// Immutable once loaded; the controller keeps its own copy.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Physical I/O board the driver binds to.
    pub board_index: i16,
    /// Lowest output voltage the device may drive.
    pub dac_min: f64,
    /// Highest output voltage the device may drive.
    pub dac_max: f64,
    /// Lower bound of the photodiode input range.
    pub adc_min: f64,
    /// Upper bound of the photodiode input range.
    pub adc_max: f64,
    /// Lower regulation threshold.
    pub min_threshold: f64,
    /// Upper regulation threshold.
    pub max_threshold: f64,
    /// Native driver library; required by [`crate::DeviceController::from_config_path`].
    pub library_path: Option<PathBuf>,
    /// Bind the library with the platform `stdcall` convention instead of C.
    pub use_alternate_calling_convention: bool,
}

impl DeviceConfig {
    /// Load a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// * [`EomError::ConfigNotFound`] if `path` does not exist
    /// * [`EomError::ConfigMalformed`] if the file is not valid TOML
    /// * [`EomError::ConfigSectionMissing`] if `[EOM]` is absent
    /// * [`EomError::ConfigFieldInvalid`] if a field is missing or mistyped
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EomError::ConfigNotFound(path.to_path_buf()));
        }

        let text = fs::read_to_string(path)?;
        let config = Self::parse(&text, path)?;
        debug!(path = %path.display(), board = config.board_index, "Loaded EOM config");
        Ok(config)
    }

    /// Parse configuration text. `origin` is only used in error messages.
    pub fn parse(text: &str, origin: &Path) -> AppResult<Self> {
        let document: Table = toml::from_str(text).map_err(|e| EomError::ConfigMalformed {
            path: origin.to_path_buf(),
            reason: e.message().to_string(),
        })?;

        let device = match document.get(DEVICE_SECTION) {
            Some(Value::Table(table)) => table,
            _ => {
                return Err(EomError::ConfigSectionMissing {
                    section: DEVICE_SECTION,
                    path: origin.to_path_buf(),
                })
            }
        };

        let (library_path, use_alternate_calling_convention) = match document.get(LIBRARY_SECTION) {
            Some(Value::Table(table)) => (path_field(table, "dll_path")?, bool_field(table, "use_stdcall")?),
            Some(_) => {
                return Err(EomError::ConfigFieldInvalid {
                    field: LIBRARY_SECTION,
                    reason: "expected a table".to_string(),
                })
            }
            None => (None, false),
        };

        Ok(Self {
            board_index: board_field(device, "board_idx")?,
            dac_min: float_field(device, "dac_min")?,
            dac_max: float_field(device, "dac_max")?,
            adc_min: float_field(device, "adc_min")?,
            adc_max: float_field(device, "adc_max")?,
            min_threshold: float_field(device, "min_threshold")?,
            max_threshold: float_field(device, "max_threshold")?,
            library_path,
            use_alternate_calling_convention,
        })
    }

    /// Write the configuration back out in the two-table layout.
    ///
    /// Floats are written in their shortest round-trip form, so loading the
    /// result yields an identical `DeviceConfig`.
    pub fn save(&self, destination: impl AsRef<Path>) -> AppResult<()> {
        let destination = destination.as_ref();
        fs::write(destination, self.to_toml_string()?)?;
        debug!(path = %destination.display(), "Saved EOM config");
        Ok(())
    }

    /// Render the configuration as TOML text.
    ///
    /// # Errors
    ///
    /// [`EomError::ConfigFieldInvalid`] for a library path that is not valid
    /// UTF-8, [`EomError::ConfigEncode`] if TOML serialization fails.
    pub fn to_toml_string(&self) -> AppResult<String> {
        let file = ConfigFile {
            device: DeviceSection {
                board_idx: self.board_index,
                dac_min: self.dac_min,
                dac_max: self.dac_max,
                adc_min: self.adc_min,
                adc_max: self.adc_max,
                min_threshold: self.min_threshold,
                max_threshold: self.max_threshold,
            },
            library: LibrarySection {
                dll_path: dll_path_text(self.library_path.as_deref())?,
                use_stdcall: self.use_alternate_calling_convention,
            },
        };
        toml::to_string_pretty(&file).map_err(encode_failed)
    }
}

fn dll_path_text(path: Option<&Path>) -> AppResult<String> {
    match path {
        None => Ok(String::new()),
        Some(p) => p
            .to_str()
            .map(str::to_owned)
            .ok_or_else(|| invalid("dll_path", format!("{} is not valid UTF-8", p.display()))),
    }
}

fn encode_failed(e: toml::ser::Error) -> EomError {
    EomError::ConfigEncode(e.to_string())
}

#[derive(Serialize)]
struct ConfigFile {
    #[serde(rename = "EOM")]
    device: DeviceSection,
    #[serde(rename = "EOM_DLL")]
    library: LibrarySection,
}

#[derive(Serialize)]
struct DeviceSection {
    board_idx: i16,
    dac_min: f64,
    dac_max: f64,
    adc_min: f64,
    adc_max: f64,
    min_threshold: f64,
    max_threshold: f64,
}

#[derive(Serialize)]
struct LibrarySection {
    dll_path: String,
    use_stdcall: bool,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EomError {
    EomError::ConfigFieldInvalid {
        field,
        reason: reason.into(),
    }
}

fn float_field(table: &Table, key: &'static str) -> AppResult<f64> {
    match table.get(key) {
        Some(Value::Float(v)) => Ok(*v),
        Some(Value::Integer(v)) => Ok(*v as f64),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(key, format!("'{s}' is not a number"))),
        Some(other) => Err(invalid(key, format!("expected a number, found {}", other.type_str()))),
        None => Err(invalid(key, "missing")),
    }
}

fn board_field(table: &Table, key: &'static str) -> AppResult<i16> {
    let raw = match table.get(key) {
        Some(Value::Integer(v)) => *v,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| invalid(key, format!("'{s}' is not an integer")))?,
        Some(other) => return Err(invalid(key, format!("expected an integer, found {}", other.type_str()))),
        None => return Err(invalid(key, "missing")),
    };
    i16::try_from(raw).map_err(|_| invalid(key, format!("{raw} does not fit a 16-bit board index")))
}

fn bool_field(table: &Table, key: &'static str) -> AppResult<bool> {
    match table.get(key) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::Integer(0)) => Ok(false),
        Some(Value::Integer(1)) => Ok(true),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Ok(true),
            "no" | "false" | "off" | "0" => Ok(false),
            _ => Err(invalid(key, format!("'{s}' is not a boolean"))),
        },
        Some(other) => Err(invalid(key, format!("expected a boolean, found {}", other.type_str()))),
        None => Ok(false),
    }
}

fn path_field(table: &Table, key: &'static str) -> AppResult<Option<PathBuf>> {
    match table.get(key) {
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(PathBuf::from(s.trim()))),
        Some(other) => Err(invalid(key, format!("expected a string, found {}", other.type_str()))),
        None => Ok(None),
    }
}
