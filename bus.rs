use embedded_hal::i2c::{Error as _, I2c};

use crate::error::DeviceError;

/// Byte transport to the sensor's register file. No register semantics here.
pub trait RegisterBus {
    /// Fills `buf` from `register` onwards in a single transaction.
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), DeviceError>;

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), DeviceError>;
}

/// [`RegisterBus`] over any embedded-hal I2C controller at a fixed 7-bit address.
pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> I2cRegisterBus<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        I2cRegisterBus { i2c, address }
    }
}

impl<I2C: I2c> RegisterBus for I2cRegisterBus<I2C> {
    fn read_block(&mut self, register: u8, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.i2c
            .write_read(self.address, &[register], buf)
            .map_err(|e| DeviceError::Bus(e.kind()))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), DeviceError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|e| DeviceError::Bus(e.kind()))
    }
}
