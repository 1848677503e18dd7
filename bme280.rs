use embedded_hal::delay::DelayNs;
use log::{debug, trace};

use crate::bus::RegisterBus;
use crate::compensation;
use crate::error::{ConfigError, DeviceError};
use crate::structs::{
    CalibrationCoefficients, CompensatedReading, RawSample, CALIB_BLOCK_A_LEN, CALIB_BLOCK_B_LEN,
};

// BME280 register addresses.
const REG_CALIB_00: u8 = 0x88;
const REG_CALIB_26: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_ADC_VALUE: u8 = 0xF7;
const REG_ADC_VALUE_LEN: usize = 8;

/// status[3]: 1 while a conversion is running, 0 once results are in the data registers.
const STATUS_MEASURING: u8 = 0x08;
const STATUS_POLL_INTERVAL_MS: u32 = 1;
pub const DEFAULT_MAX_STATUS_POLLS: u32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Sleep = 0,
    /// One conversion per write of ctrl_meas.
    Forced = 1,
    /// Free running.
    Normal = 3,
}

impl TryFrom<u8> for Mode {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Mode::Sleep),
            1 => Ok(Mode::Forced),
            3 => Ok(Mode::Normal),
            other => Err(ConfigError::InvalidMode(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Oversampling {
    X1 = 1,
    X2 = 2,
    X4 = 3,
    X8 = 4,
    X16 = 5,
}

impl Oversampling {
    fn from_code(field: &'static str, code: u8) -> Result<Self, ConfigError> {
        match code {
            1 => Ok(Oversampling::X1),
            2 => Ok(Oversampling::X2),
            3 => Ok(Oversampling::X4),
            4 => Ok(Oversampling::X8),
            5 => Ok(Oversampling::X16),
            code => Err(ConfigError::InvalidOversampling { field, code }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub mode: Mode,
    pub humidity: Oversampling,
    pub pressure: Oversampling,
    pub temperature: Oversampling,
}

impl DriverConfig {
    /// Validates raw register codes: mode, then humidity, pressure and temperature oversampling.
    pub fn from_codes(mode: u8, hos: u8, pos: u8, tos: u8) -> Result<Self, ConfigError> {
        Ok(DriverConfig {
            mode: Mode::try_from(mode)?,
            humidity: Oversampling::from_code("humidity", hos)?,
            pressure: Oversampling::from_code("pressure", pos)?,
            temperature: Oversampling::from_code("temperature", tos)?,
        })
    }

    /// ctrl_meas: osrs_t[7:5] | osrs_p[4:2] | mode[1:0]
    pub fn ctrl_meas(&self) -> u8 {
        self.mode as u8 | ((self.pressure as u8) << 2) | ((self.temperature as u8) << 5)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            mode: Mode::Forced,
            humidity: Oversampling::X1,
            pressure: Oversampling::X1,
            temperature: Oversampling::X1,
        }
    }
}

/// Something that yields one compensated reading per call.
pub trait Sensor {
    fn read(&mut self) -> Result<CompensatedReading, DeviceError>;
}

pub struct Bme280<B, D> {
    bus: B,
    delay: D,
    config: DriverConfig,
    calibration: CalibrationCoefficients,
    ctrl_meas: u8,
    max_status_polls: u32,
    status: [u8; 1],
    burst: [u8; REG_ADC_VALUE_LEN],
    raw: RawSample,
}

impl<B: RegisterBus, D: DelayNs> Bme280<B, D> {
    /// Validates the codes before touching the bus, then calls [`Bme280::new`].
    pub fn from_codes(
        bus: B,
        delay: D,
        mode: u8,
        hos: u8,
        pos: u8,
        tos: u8,
    ) -> Result<Self, crate::error::AgentError> {
        let config = DriverConfig::from_codes(mode, hos, pos, tos)?;
        Ok(Self::new(bus, delay, config)?)
    }

    /// Reads the calibration blocks and programs ctrl_hum and ctrl_meas.
    pub fn new(mut bus: B, delay: D, config: DriverConfig) -> Result<Self, DeviceError> {
        let mut block_a = [0u8; CALIB_BLOCK_A_LEN];
        let mut block_b = [0u8; CALIB_BLOCK_B_LEN];
        bus.read_block(REG_CALIB_00, &mut block_a)?;
        bus.read_block(REG_CALIB_26, &mut block_b)?;
        let calibration = CalibrationCoefficients::from_bursts(&block_a, &block_b);
        debug!("bme280 calibration: {:?}", calibration);

        // ctrl_hum only takes effect after the following ctrl_meas write.
        bus.write_byte(REG_CTRL_HUM, config.humidity as u8)?;
        let ctrl_meas = config.ctrl_meas();
        bus.write_byte(REG_CTRL_MEAS, ctrl_meas)?;
        debug!("bme280 configured: {:?}, ctrl_meas=0x{:02X}", config, ctrl_meas);

        Ok(Bme280 {
            bus,
            delay,
            config,
            calibration,
            ctrl_meas,
            max_status_polls: DEFAULT_MAX_STATUS_POLLS,
            status: [0],
            burst: [0; REG_ADC_VALUE_LEN],
            raw: RawSample::default(),
        })
    }

    pub fn with_max_status_polls(mut self, polls: u32) -> Self {
        self.max_status_polls = polls.max(1);
        self
    }

    pub fn ctrl_meas(&self) -> u8 {
        self.ctrl_meas
    }

    /// Starts (Forced) or waits for (Normal) a conversion and decodes the ADC registers
    /// into the driver's sample slot. Sleep mode leaves the bus alone and yields zeros.
    pub fn trigger_and_read(&mut self) -> Result<&RawSample, DeviceError> {
        match self.config.mode {
            Mode::Sleep => {
                self.raw.clear();
                return Ok(&self.raw);
            }
            Mode::Forced => self.bus.write_byte(REG_CTRL_MEAS, self.ctrl_meas)?,
            Mode::Normal => {}
        }
        self.wait_for_conversion()?;

        // Burst read 0xF7..=0xFE so all three values come from the same conversion.
        self.bus.read_block(REG_ADC_VALUE, &mut self.burst)?;
        self.raw.decode(&self.burst);
        trace!("bme280 raw: {:?}", self.raw);
        Ok(&self.raw)
    }

    fn wait_for_conversion(&mut self) -> Result<(), DeviceError> {
        let mut polls = 0;
        loop {
            self.bus.read_block(REG_STATUS, &mut self.status)?;
            polls += 1;
            if self.status[0] & STATUS_MEASURING == 0 {
                return Ok(());
            }
            if polls >= self.max_status_polls {
                return Err(DeviceError::ConversionTimeout { polls });
            }
            self.delay.delay_ms(STATUS_POLL_INTERVAL_MS);
        }
    }

    pub fn compensate(&self, raw: &RawSample) -> CompensatedReading {
        compensation::compensate(&self.calibration, raw)
    }
}

impl<B: RegisterBus, D: DelayNs> Sensor for Bme280<B, D> {
    fn read(&mut self) -> Result<CompensatedReading, DeviceError> {
        self.trigger_and_read()?;
        Ok(self.compensate(&self.raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::I2cRegisterBus;
    use crate::error::AgentError;
    use crate::structs::tests::{BLOCK_A, BLOCK_B};
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    const ADDR: u8 = 0x76;
    const DATA: [u8; 8] = [0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x6F, 0x54];

    fn init_transactions(hos: u8, ctrl_meas: u8) -> Vec<I2cTransaction> {
        vec![
            I2cTransaction::write_read(ADDR, vec![REG_CALIB_00], BLOCK_A.to_vec()),
            I2cTransaction::write_read(ADDR, vec![REG_CALIB_26], BLOCK_B.to_vec()),
            I2cTransaction::write(ADDR, vec![REG_CTRL_HUM, hos]),
            I2cTransaction::write(ADDR, vec![REG_CTRL_MEAS, ctrl_meas]),
        ]
    }

    fn status(value: u8) -> I2cTransaction {
        I2cTransaction::write_read(ADDR, vec![REG_STATUS], vec![value])
    }

    fn data() -> I2cTransaction {
        I2cTransaction::write_read(ADDR, vec![REG_ADC_VALUE], DATA.to_vec())
    }

    fn with(init: Vec<I2cTransaction>, rest: Vec<I2cTransaction>) -> Vec<I2cTransaction> {
        init.into_iter().chain(rest).collect()
    }

    #[test]
    fn test_every_valid_config_writes_ctrl_meas() {
        for mode in [0u8, 1, 3] {
            for hos in 1..=5u8 {
                for pos in 1..=5u8 {
                    for tos in 1..=5u8 {
                        let ctrl = mode | (pos << 2) | (tos << 5);
                        let mut i2c = I2cMock::new(&init_transactions(hos, ctrl));
                        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
                        let bme = Bme280::from_codes(bus, NoopDelay::new(), mode, hos, pos, tos)
                            .unwrap();
                        assert_eq!(bme.ctrl_meas(), ctrl);
                        i2c.done();
                    }
                }
            }
        }
    }

    fn assert_rejected_without_bus_traffic(mode: u8, hos: u8, pos: u8, tos: u8) {
        let mut i2c = I2cMock::new(&[]);
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let result = Bme280::from_codes(bus, NoopDelay::new(), mode, hos, pos, tos);
        assert!(matches!(result, Err(AgentError::Config(_))), "{mode} {hos} {pos} {tos}");
        drop(result);
        i2c.done();
    }

    #[test]
    fn test_invalid_codes_touch_no_bus() {
        for code in 0..=u8::MAX {
            if !matches!(code, 0 | 1 | 3) {
                assert_rejected_without_bus_traffic(code, 1, 1, 1);
            }
            if !(1..=5).contains(&code) {
                assert_rejected_without_bus_traffic(1, code, 1, 1);
                assert_rejected_without_bus_traffic(1, 1, code, 1);
                assert_rejected_without_bus_traffic(1, 1, 1, code);
            }
        }
    }

    #[test]
    fn test_invalid_field_is_named() {
        assert_eq!(
            DriverConfig::from_codes(1, 1, 1, 9),
            Err(ConfigError::InvalidOversampling {
                field: "temperature",
                code: 9
            })
        );
        assert_eq!(
            DriverConfig::from_codes(1, 1, 0, 1),
            Err(ConfigError::InvalidOversampling {
                field: "pressure",
                code: 0
            })
        );
        assert_eq!(DriverConfig::from_codes(2, 1, 1, 1), Err(ConfigError::InvalidMode(2)));
    }

    #[test]
    fn test_forced_read_rewrites_ctrl_meas() {
        let config = DriverConfig::default();
        let ctrl = config.ctrl_meas();
        let expectations = with(
            init_transactions(1, ctrl),
            vec![
                I2cTransaction::write(ADDR, vec![REG_CTRL_MEAS, ctrl]),
                status(0x00),
                data(),
                I2cTransaction::write(ADDR, vec![REG_CTRL_MEAS, ctrl]),
                status(0x00),
                data(),
            ],
        );
        let mut i2c = I2cMock::new(&expectations);
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let mut bme = Bme280::new(bus, NoopDelay::new(), config).unwrap();

        let reading = bme.read().unwrap();
        assert_eq!(reading.temperature, 2508);
        assert_eq!(reading.pressure, 25_767_233);
        assert_eq!(reading.humidity, 47_764);
        assert_eq!(bme.read().unwrap(), reading);
        i2c.done();
    }

    #[test]
    fn test_normal_mode_only_polls() {
        let config = DriverConfig {
            mode: Mode::Normal,
            ..DriverConfig::default()
        };
        let expectations = with(
            init_transactions(1, config.ctrl_meas()),
            vec![status(0x00), data()],
        );
        let mut i2c = I2cMock::new(&expectations);
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let mut bme = Bme280::new(bus, NoopDelay::new(), config).unwrap();

        let raw = *bme.trigger_and_read().unwrap();
        assert_eq!(
            raw,
            RawSample {
                pressure: 415_148,
                temperature: 519_888,
                humidity: 28_500
            }
        );
        i2c.done();
    }

    #[test]
    fn test_sleep_mode_is_silent() {
        let config = DriverConfig {
            mode: Mode::Sleep,
            ..DriverConfig::default()
        };
        let mut i2c = I2cMock::new(&init_transactions(1, config.ctrl_meas()));
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let mut bme = Bme280::new(bus, NoopDelay::new(), config).unwrap();

        assert_eq!(*bme.trigger_and_read().unwrap(), RawSample::default());
        i2c.done();
    }

    #[test]
    fn test_polls_until_measuring_clears() {
        for busy in [0usize, 1, 3, 10] {
            let config = DriverConfig {
                mode: Mode::Normal,
                ..DriverConfig::default()
            };
            // Other status bits (im_update) must not hold the loop.
            let mut rest = vec![status(0x08 | 0x01); busy];
            rest.push(status(0x01));
            rest.push(data());
            let expectations = with(init_transactions(1, config.ctrl_meas()), rest);

            let mut i2c = I2cMock::new(&expectations);
            let bus = I2cRegisterBus::new(&mut i2c, ADDR);
            let mut bme = Bme280::new(bus, NoopDelay::new(), config).unwrap();
            bme.trigger_and_read().unwrap();
            i2c.done();
        }
    }

    #[test]
    fn test_poll_ceiling_times_out() {
        let config = DriverConfig {
            mode: Mode::Normal,
            ..DriverConfig::default()
        };
        let expectations = with(
            init_transactions(1, config.ctrl_meas()),
            vec![status(0x08); 4],
        );
        let mut i2c = I2cMock::new(&expectations);
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let mut bme = Bme280::new(bus, NoopDelay::new(), config)
            .unwrap()
            .with_max_status_polls(4);

        assert_eq!(
            bme.trigger_and_read().unwrap_err(),
            DeviceError::ConversionTimeout { polls: 4 }
        );
        i2c.done();
    }

    #[test]
    fn test_calibration_nack() {
        let mut i2c = I2cMock::new(&[I2cTransaction::write_read(
            ADDR,
            vec![REG_CALIB_00],
            vec![0; CALIB_BLOCK_A_LEN],
        )
        .with_error(ErrorKind::NoAcknowledge(
            embedded_hal::i2c::NoAcknowledgeSource::Address,
        ))]);
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let result = Bme280::new(bus, NoopDelay::new(), DriverConfig::default());
        assert!(matches!(result, Err(DeviceError::Bus(ErrorKind::NoAcknowledge(_)))));
        i2c.done();
    }

    #[test]
    fn test_data_nack_is_device_error() {
        let config = DriverConfig::default();
        let ctrl = config.ctrl_meas();
        let expectations = with(
            init_transactions(1, ctrl),
            vec![
                I2cTransaction::write(ADDR, vec![REG_CTRL_MEAS, ctrl]),
                status(0x00),
                I2cTransaction::write_read(ADDR, vec![REG_ADC_VALUE], vec![0; 8])
                    .with_error(ErrorKind::Other),
            ],
        );
        let mut i2c = I2cMock::new(&expectations);
        let bus = I2cRegisterBus::new(&mut i2c, ADDR);
        let mut bme = Bme280::new(bus, NoopDelay::new(), config).unwrap();
        assert_eq!(bme.read(), Err(DeviceError::Bus(ErrorKind::Other)));
        i2c.done();
    }
}
