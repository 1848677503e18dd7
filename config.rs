use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::bme280::DEFAULT_MAX_STATUS_POLLS;
use crate::connectivity::RetryPolicy;
use crate::error::ConfigError;
use crate::mqtt::MqttConfig;

// BME280 I2C default slave address.
pub const ADDR_BME280: u8 = 0x76;
pub const I2C_BUS: u8 = 1;

pub const MQTT_HOST: &str = "localhost";
pub const MQTT_PORT: u16 = 1883;
pub const MQTT_CLIENT_ID: &str = "rpbme280-agent";
pub const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(7200);
pub const MQTT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const LAST_WILL_TOPIC: &str = "fault";
pub const LAST_WILL_MESSAGE: &str = "Unexpected error";
pub const TELEMETRY_TOPIC: &str = "sensors/bme280";

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);
pub const RESTART_DELAY: Duration = Duration::from_millis(500);
pub const NET_IFACE: &str = "wlan0";

pub const SENSOR_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 5,
    base_delay: Duration::from_secs(1),
    max_delay: Duration::from_secs(30),
};

pub const NETWORK_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 10,
    base_delay: Duration::from_secs(2),
    max_delay: Duration::from_secs(60),
};

/// Raw register codes, validated when the driver is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCodes {
    pub mode: u8,
    pub humidity: u8,
    pub pressure: u8,
    pub temperature: u8,
}

// Forced mode, x1 oversampling on every channel.
pub const SENSOR_CODES: SensorCodes = SensorCodes {
    mode: 1,
    humidity: 1,
    pressure: 1,
    temperature: 1,
};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub i2c_bus: u8,
    pub address: u8,
    pub sensor: SensorCodes,
    pub max_status_polls: u32,
    pub mqtt: MqttConfig,
    pub topic: String,
    pub interval: Duration,
    pub net_iface: String,
    pub led_pin: Option<u8>,
    pub sensor_retry: RetryPolicy,
    pub network_retry: RetryPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            i2c_bus: I2C_BUS,
            address: ADDR_BME280,
            sensor: SENSOR_CODES,
            max_status_polls: DEFAULT_MAX_STATUS_POLLS,
            mqtt: MqttConfig {
                host: MQTT_HOST.into(),
                port: MQTT_PORT,
                client_id: MQTT_CLIENT_ID.into(),
                username: None,
                password: None,
                keep_alive: MQTT_KEEP_ALIVE,
                last_will_topic: LAST_WILL_TOPIC.into(),
                last_will_message: LAST_WILL_MESSAGE.into(),
                ack_timeout: MQTT_ACK_TIMEOUT,
            },
            topic: TELEMETRY_TOPIC.into(),
            interval: SAMPLE_INTERVAL,
            net_iface: NET_IFACE.into(),
            led_pin: None,
            sensor_retry: SENSOR_RETRY,
            network_retry: NETWORK_RETRY,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Built-in defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = AgentConfig::default();

        if let Some(bus) = parse(&lookup, "BME280_I2C_BUS")? {
            config.i2c_bus = bus;
        }
        if let Some(address) = lookup("BME280_ADDRESS") {
            config.address = parse_address(&address).ok_or(ConfigError::Env {
                key: "BME280_ADDRESS",
                value: address,
            })?;
        }
        if let Some(mode) = parse(&lookup, "BME280_MODE")? {
            config.sensor.mode = mode;
        }
        if let Some(code) = parse(&lookup, "BME280_OSRS_H")? {
            config.sensor.humidity = code;
        }
        if let Some(code) = parse(&lookup, "BME280_OSRS_P")? {
            config.sensor.pressure = code;
        }
        if let Some(code) = parse(&lookup, "BME280_OSRS_T")? {
            config.sensor.temperature = code;
        }
        if let Some(polls) = parse(&lookup, "BME280_MAX_STATUS_POLLS")? {
            config.max_status_polls = polls;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            config.mqtt.host = host;
        }
        if let Some(port) = parse(&lookup, "MQTT_PORT")? {
            config.mqtt.port = port;
        }
        config.mqtt.username = lookup("MQTT_USER");
        config.mqtt.password = lookup("MQTT_PASSWORD");
        if let Some(topic) = lookup("MQTT_TOPIC") {
            config.topic = topic;
        }
        if let Some(secs) = parse(&lookup, "AGENT_INTERVAL_SECS")? {
            config.interval = Duration::from_secs(secs);
        }
        if let Some(iface) = lookup("AGENT_NET_IFACE") {
            config.net_iface = iface;
        }
        config.led_pin = parse(&lookup, "AGENT_LED_PIN")?;

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { key, value }),
    }
}

/// "0x77" is hex, plain digits are decimal.
fn parse_address(value: &str) -> Option<u8> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
