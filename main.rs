use std::convert::Infallible;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use log::{error, info};
use rppal::hal::Delay;
use rppal::i2c::I2c;

mod acquisition;
mod bme280;
mod bus;
mod compensation;
mod config;
mod connectivity;
mod error;
mod mqtt;
mod network;
mod status_led;
mod structs;
mod telemetry;

use acquisition::SystemClock;
use bme280::Bme280;
use bus::I2cRegisterBus;
use config::{AgentConfig, RESTART_DELAY};
use connectivity::Connectivity;
use error::{AgentError, ConfigError};
use mqtt::MqttTransport;
use network::SysfsLink;
use status_led::{GpioLed, NoIndicator, Pattern, StatusIndicator};
use telemetry::{LoopSettings, TelemetryLoop};

/// Brings up every component from scratch and runs the telemetry loop.
/// Only returns on failure; the caller restarts from a clean slate.
fn run_agent(config: &AgentConfig) -> Result<Infallible, AgentError> {
    let mut indicator: Box<dyn StatusIndicator> = match config.led_pin {
        Some(pin) => Box::new(GpioLed::new(pin)?),
        None => Box::new(NoIndicator),
    };
    indicator.show(Pattern::Solid);

    let i2c = I2c::with_bus(config.i2c_bus)
        .map_err(|e| ConfigError::Bus(format!("/dev/i2c-{}: {}", config.i2c_bus, e)))?;
    let bus = I2cRegisterBus::new(i2c, config.address);
    let codes = config.sensor;
    let sensor = Bme280::from_codes(
        bus,
        Delay::new(),
        codes.mode,
        codes.humidity,
        codes.pressure,
        codes.temperature,
    )?
    .with_max_status_polls(config.max_status_polls);
    info!(
        "bme280 ready at 0x{:02X}, ctrl_meas=0x{:02X}",
        config.address,
        sensor.ctrl_meas()
    );

    let mut session = Connectivity::new(
        MqttTransport::new(config.mqtt.clone()),
        SysfsLink::new(&config.net_iface),
        Delay::new(),
        config.network_retry,
    );
    session.bootstrap_network()?;
    session.connect()?;

    let settings = LoopSettings {
        topic: config.topic.clone(),
        interval: config.interval,
        read_retry: config.sensor_retry,
    };
    let mut telemetry = TelemetryLoop::new(
        sensor,
        session,
        indicator,
        SystemClock,
        Delay::new(),
        settings,
    );
    Err(telemetry.run().into())
}

/// Re-runs `boot` after each device or fatal failure, `RESTART_DELAY` apart.
/// Returns only when configuration is rejected.
fn supervise(
    mut boot: impl FnMut() -> Result<Infallible, AgentError>,
    mut sleep: impl FnMut(Duration),
) -> ConfigError {
    loop {
        match boot() {
            Ok(never) => match never {},
            Err(AgentError::Config(e)) => return e,
            Err(e) => {
                error!("{}, restarting in {:?}", e, RESTART_DELAY);
                sleep(RESTART_DELAY);
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let e = supervise(|| run_agent(&config), thread::sleep);
    error!("configuration error: {}", e);
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceError, FatalError, NetworkError};
    use embedded_hal::i2c::ErrorKind;
    use std::collections::VecDeque;

    #[test]
    fn test_supervise_restarts_until_config_error() {
        let mut failures: VecDeque<AgentError> = vec![
            DeviceError::Bus(ErrorKind::Other).into(),
            FatalError::BrokerRetriesExhausted {
                attempts: 10,
                last: NetworkError::NotConnected,
            }
            .into(),
            ConfigError::InvalidMode(2).into(),
        ]
        .into();
        let mut boots = 0;
        let mut sleeps = Vec::new();

        let e = supervise(
            || {
                boots += 1;
                Err(failures.pop_front().unwrap())
            },
            |d| sleeps.push(d),
        );
        assert_eq!(e, ConfigError::InvalidMode(2));
        assert_eq!(boots, 3);
        assert_eq!(sleeps, [RESTART_DELAY, RESTART_DELAY]);
        assert_eq!(RESTART_DELAY, Duration::from_millis(500));
    }

    #[test]
    fn test_supervise_config_error_exits_without_delay() {
        let mut sleeps = Vec::new();
        let e = supervise(
            || Err(ConfigError::Bus("/dev/i2c-1: not found".into()).into()),
            |d| sleeps.push(d),
        );
        assert!(matches!(e, ConfigError::Bus(_)));
        assert!(sleeps.is_empty());
    }

    #[test]
    fn test_each_boot_starts_from_fresh_state() {
        // Whatever a boot builds is dropped before the next one starts.
        let mut seen = Vec::new();
        let mut boots = 0;
        let _ = supervise(
            || {
                boots += 1;
                let mut acquisition = acquisition::Acquisition::new();
                seen.push(acquisition.state());
                if boots == 3 {
                    return Err(ConfigError::InvalidMode(7).into());
                }
                let mut failing = FailingSensor;
                let e = acquisition.acquire(&mut failing, &SystemClock).unwrap_err();
                Err(e.into())
            },
            |_| {},
        );
        assert_eq!(seen, [acquisition::AcquisitionState::Idle; 3]);
    }

    struct FailingSensor;

    impl bme280::Sensor for FailingSensor {
        fn read(&mut self) -> Result<structs::CompensatedReading, DeviceError> {
            Err(DeviceError::Bus(ErrorKind::Other))
        }
    }
}
