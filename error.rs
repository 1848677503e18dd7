use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

/// Rejected configuration. Raised before any bus traffic and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unexpected mode value {0}, expected sleep (0), forced (1) or normal (3)")]
    InvalidMode(u8),
    #[error("unexpected {field} oversampling code {code}, expected 1 (x1) to 5 (x16)")]
    InvalidOversampling { field: &'static str, code: u8 },
    #[error("I2C bus unavailable: {0}")]
    Bus(String),
    #[error("GPIO unavailable: {0}")]
    Gpio(String),
    #[error("invalid value {value:?} for {key}")]
    Env { key: &'static str, value: String },
}

/// Bus transaction failure or a conversion that never completed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("I2C transaction failed: {0:?}")]
    Bus(ErrorKind),
    #[error("conversion still running after {polls} status polls")]
    ConversionTimeout { polls: u32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("broker session is not connected")]
    NotConnected,
    #[error("broker handshake failed: {0}")]
    Handshake(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("network link {0} is down")]
    LinkDown(String),
}

/// A retry budget ran out. Only the supervisor handles these, by restarting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("sensor read failed {attempts} times, last error: {last}")]
    SensorRetriesExhausted { attempts: u32, last: DeviceError },
    #[error("network link not up after {attempts} attempts")]
    NetworkRetriesExhausted { attempts: u32 },
    #[error("broker connect failed {attempts} times, last error: {last}")]
    BrokerRetriesExhausted { attempts: u32, last: NetworkError },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}
