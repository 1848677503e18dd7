//! Integer compensation formulas from the BME280 datasheet (section 4.2.3).
//!
//! Temperature is evaluated in `i64`. Pressure and humidity run in `i128`: with
//! out-of-range trimming values (a corrupted NVM, or another device answering
//! at the address) their intermediates need up to 74 bits.

use crate::structs::{CalibrationCoefficients, CompensatedReading, RawSample};

/// Upper clamp of the humidity accumulator, 100 %RH in Q22.10 before the final `>> 12`.
const HUMIDITY_MAX: i128 = 419_430_400;

/// Returns `(temperature, t_fine)`, temperature in 0.01 C.
pub fn compute_temperature(calib: &CalibrationCoefficients, adc_t: u32) -> (i32, i64) {
    let adc_t = i64::from(adc_t);
    let t1 = i64::from(calib.dig_t1);
    let t2 = i64::from(calib.dig_t2);
    let t3 = i64::from(calib.dig_t3);

    let var1 = (((adc_t >> 3) - (t1 << 1)) * t2) >> 11;
    let var2 = (((((adc_t >> 4) - t1) * ((adc_t >> 4) - t1)) >> 12) * t3) >> 14;
    let t_fine = var1 + var2;

    (((t_fine * 5 + 128) >> 8) as i32, t_fine)
}

/// Pressure in Pa as Q24.8, saturating at 0 and `u32::MAX`.
/// A zero divisor term reports 0 instead of dividing.
pub fn compute_pressure(calib: &CalibrationCoefficients, adc_p: u32, t_fine: i64) -> u32 {
    let p1 = i128::from(calib.dig_p1);
    let p2 = i128::from(calib.dig_p2);
    let p3 = i128::from(calib.dig_p3);
    let p4 = i128::from(calib.dig_p4);
    let p5 = i128::from(calib.dig_p5);
    let p6 = i128::from(calib.dig_p6);
    let p7 = i128::from(calib.dig_p7);
    let p8 = i128::from(calib.dig_p8);
    let p9 = i128::from(calib.dig_p9);

    let mut var1 = i128::from(t_fine) - 128_000;
    let mut var2 = var1 * var1 * p6;
    var2 += (var1 * p5) << 17;
    var2 += p4 << 35;
    var1 = ((var1 * var1 * p3) >> 8) + ((var1 * p2) << 12);
    var1 = (((1_i128 << 47) + var1) * p1) >> 33;
    if var1 == 0 {
        return 0;
    }

    let mut p = 1_048_576 - i128::from(adc_p);
    p = (((p << 31) - var2) * 3125) / var1;
    var1 = (p9 * (p >> 13) * (p >> 13)) >> 25;
    var2 = (p8 * p) >> 19;
    p = ((p + var1 + var2) >> 8) + (p7 << 4);
    u32::try_from(p.max(0)).unwrap_or(u32::MAX)
}

/// Relative humidity in % as Q22.10, saturating at 0 and 100 %.
pub fn compute_humidity(calib: &CalibrationCoefficients, adc_h: u32, t_fine: i64) -> u32 {
    let adc_h = i128::from(adc_h);
    let h1 = i128::from(calib.dig_h1);
    let h2 = i128::from(calib.dig_h2);
    let h3 = i128::from(calib.dig_h3);
    let h4 = i128::from(calib.dig_h4);
    let h5 = i128::from(calib.dig_h5);
    let h6 = i128::from(calib.dig_h6);

    let mut h = i128::from(t_fine) - 76_800;
    h = ((((adc_h << 14) - (h4 << 20) - (h5 * h)) + 16_384) >> 15)
        * (((((((h * h6) >> 10) * (((h * h3) >> 11) + 32_768)) >> 10) + 2_097_152) * h2
            + 8192)
            >> 14);
    h -= ((((h >> 15) * (h >> 15)) >> 7) * h1) >> 4;
    (h.clamp(0, HUMIDITY_MAX) >> 12) as u32
}

/// Compensates one raw sample. `t_fine` lives only for the duration of this call.
pub fn compensate(calib: &CalibrationCoefficients, raw: &RawSample) -> CompensatedReading {
    let (temperature, t_fine) = compute_temperature(calib, raw.temperature);
    CompensatedReading {
        temperature,
        pressure: compute_pressure(calib, raw.pressure, t_fine),
        humidity: compute_humidity(calib, raw.humidity, t_fine),
    }
}
