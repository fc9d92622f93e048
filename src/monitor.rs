//! Status model and polling loop for front ends.
//!
//! Nothing here draws anything. A front end drives [`poll_until`] from its own
//! event loop and renders the [`StatusLine`]s it produces.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::controller::{DeviceController, Reading};
use crate::driver::RegulatorDriver;
use crate::error::AppResult;

/// Nominal polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest period [`poll_until`] will run at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Coarse device state for an indicator lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// Laser not running (red).
    Stopped,
    /// Start issued, no reading yet (yellow).
    Starting,
    /// Driver reports the loop running (green).
    Running,
    /// The last poll failed.
    Fault,
}

impl Indicator {
    /// Indicator for a successful poll.
    pub fn from_reading(reading: &Reading) -> Self {
        if reading.laser_running {
            Self::Running
        } else {
            Self::Stopped
        }
    }

    /// Lamp colour.
    pub fn colour(&self) -> &'static str {
        match self {
            Self::Stopped => "red",
            Self::Starting => "yellow",
            Self::Running => "green",
            Self::Fault => "grey",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.colour())
    }
}

/// One rendered status update.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    /// Lamp state.
    pub indicator: Indicator,
    /// Text next to the lamp, e.g. `PD: 0.250  B: 1.200`.
    pub text: String,
}

impl StatusLine {
    /// Status shown between `start()` and the first poll.
    pub fn starting() -> Self {
        Self {
            indicator: Indicator::Starting,
            text: format_voltages(&Reading::default()),
        }
    }

    /// Status for a poll result.
    pub fn from_result(result: &AppResult<Reading>) -> Self {
        match result {
            Ok(reading) => Self {
                indicator: Indicator::from_reading(reading),
                text: format_voltages(reading),
            },
            Err(e) => Self {
                indicator: Indicator::Fault,
                text: e.to_string(),
            },
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:<6}] {}", self.indicator.colour(), self.text)
    }
}

fn format_voltages(reading: &Reading) -> String {
    format!("PD: {:.3}  B: {:.3}", reading.diode_voltage, reading.bias_voltage)
}

/// Poll `controller` every `period` until `shutdown` resolves.
///
/// Each result goes to `sink`. Ticks missed while the sink is busy are skipped
/// rather than bunched up. Also returns once the controller is closed.
/// Periods below [`MIN_POLL_INTERVAL`] (including zero) are raised to it.
/// Returns the number of polls made.
pub async fn poll_until<D, F, S>(
    controller: &DeviceController<D>,
    period: Duration,
    shutdown: F,
    mut sink: S,
) -> u64
where
    D: RegulatorDriver,
    F: Future<Output = ()>,
    S: FnMut(AppResult<Reading>),
{
    let mut ticker = tokio::time::interval(period.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut polls = 0;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if controller.is_closed() {
                    break;
                }
                sink(controller.read());
                polls += 1;
            }
        }
    }
    polls
}
