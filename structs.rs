use std::fmt;

use serde::Serialize;

/// Factory trimming parameters, read once from the sensor NVM.
///
/// Block A (0x88..=0xA1, 26 bytes) holds T1-T3, P1-P9, an unused byte at 0xA0 and H1.
/// Block B (0xE1..=0xE7, 7 bytes) holds H2-H6, with H4/H5 sharing the nibbles of 0xE5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CalibrationCoefficients {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,
    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,
    pub dig_h1: u8,
    pub dig_h2: i16,
    pub dig_h3: u8,
    pub dig_h4: i16,
    pub dig_h5: i16,
    pub dig_h6: i8,
}

pub const CALIB_BLOCK_A_LEN: usize = 26;
pub const CALIB_BLOCK_B_LEN: usize = 7;

impl CalibrationCoefficients {
    pub fn from_bursts(a: &[u8; CALIB_BLOCK_A_LEN], b: &[u8; CALIB_BLOCK_B_LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([a[i], a[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([a[i], a[i + 1]]);

        // 0xE4 and 0xE6 carry the signed high 8 bits, 0xE5 the low nibbles.
        let e4 = b[3] as i8 as i16;
        let e6 = b[5] as i8 as i16;

        CalibrationCoefficients {
            dig_t1: u16_at(0),
            dig_t2: i16_at(2),
            dig_t3: i16_at(4),
            dig_p1: u16_at(6),
            dig_p2: i16_at(8),
            dig_p3: i16_at(10),
            dig_p4: i16_at(12),
            dig_p5: i16_at(14),
            dig_p6: i16_at(16),
            dig_p7: i16_at(18),
            dig_p8: i16_at(20),
            dig_p9: i16_at(22),
            dig_h1: a[25],
            dig_h2: i16::from_le_bytes([b[0], b[1]]),
            dig_h3: b[2],
            dig_h4: (e4 << 4) | (b[4] & 0x0F) as i16,
            dig_h5: (e6 << 4) | (b[4] >> 4) as i16,
            dig_h6: b[6] as i8,
        }
    }
}

/// Uncompensated ADC counts from one burst readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub pressure: u32,
    pub temperature: u32,
    pub humidity: u32,
}

impl RawSample {
    pub fn decode(&mut self, burst: &[u8; 8]) {
        let d = burst.map(u32::from);
        self.pressure = (d[0] << 12) | (d[1] << 4) | (d[2] >> 4);
        self.temperature = (d[3] << 12) | (d[4] << 4) | (d[5] >> 4);
        self.humidity = (d[6] << 8) | d[7];
    }

    pub fn clear(&mut self) {
        *self = RawSample::default();
    }
}

/// Fixed-point physical values.
///
/// * `temperature` - centi-degrees Celsius (2508 = 25.08 C)
/// * `pressure` - Pa in Q24.8 (25767233 / 256 = 100653.25 Pa)
/// * `humidity` - %RH in Q22.10 (47764 / 1024 = 46.64 %)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompensatedReading {
    pub temperature: i32,
    pub pressure: u32,
    pub humidity: u32,
}

impl CompensatedReading {
    pub fn formatted(&self) -> FormattedReading {
        let t = self.temperature.unsigned_abs();
        let pa = self.pressure / 256;
        let hi = self.humidity / 1024;

        FormattedReading {
            temperature_negative: self.temperature < 0,
            temperature_int: t / 100,
            temperature_frac: t % 100,
            pressure_hpa_int: pa / 100,
            pressure_hpa_frac: pa % 100,
            humidity_int: hi,
            humidity_frac: self.humidity % 1024 * 100 / 1024,
        }
    }
}

/// Display-ready integer parts of a reading; fractions are two decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormattedReading {
    pub temperature_negative: bool,
    pub temperature_int: u32,
    pub temperature_frac: u32,
    pub pressure_hpa_int: u32,
    pub pressure_hpa_frac: u32,
    pub humidity_int: u32,
    pub humidity_frac: u32,
}

impl fmt::Display for FormattedReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}.{:02}C {}.{:02}hPa {}.{:02}%",
            if self.temperature_negative { "-" } else { "" },
            self.temperature_int,
            self.temperature_frac,
            self.pressure_hpa_int,
            self.pressure_hpa_frac,
            self.humidity_int,
            self.humidity_frac,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub reading: CompensatedReading,
}

/// JSON body published to the broker. Units: C, Pa, %RH.
#[derive(Debug, Serialize)]
pub struct WirePayload {
    pub timestamp: u64,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
}

impl From<&TelemetryRecord> for WirePayload {
    fn from(record: &TelemetryRecord) -> Self {
        let r = &record.reading;
        WirePayload {
            timestamp: record.timestamp,
            temperature: f64::from(r.temperature) / 100.0,
            pressure: f64::from(r.pressure) / 256.0,
            humidity: f64::from(r.humidity) / 1024.0,
        }
    }
}
