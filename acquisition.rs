use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::bme280::Sensor;
use crate::error::DeviceError;
use crate::structs::TelemetryRecord;

/// Source of wall-clock time for stamping records.
pub trait Clock {
    fn now_secs(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        // A clock set before 1970 stamps records with 0 rather than failing the cycle.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Measuring,
    Success,
    Fault,
}

/// One read request: Idle -> Measuring -> Success | Fault.
///
/// Faults go straight back to the caller, which owns the retry policy.
#[derive(Debug)]
pub struct Acquisition {
    state: AcquisitionState,
}

impl Acquisition {
    pub fn new() -> Self {
        Acquisition {
            state: AcquisitionState::Idle,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn acquire<S: Sensor, C: Clock>(
        &mut self,
        sensor: &mut S,
        clock: &C,
    ) -> Result<TelemetryRecord, DeviceError> {
        self.state = AcquisitionState::Measuring;
        match sensor.read() {
            Ok(reading) => {
                self.state = AcquisitionState::Success;
                let record = TelemetryRecord {
                    timestamp: clock.now_secs(),
                    reading,
                };
                debug!("acquired {} at {}", reading.formatted(), record.timestamp);
                Ok(record)
            }
            Err(e) => {
                self.state = AcquisitionState::Fault;
                warn!("sensor fault: {}", e);
                Err(e)
            }
        }
    }
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::new()
    }
}
