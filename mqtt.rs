//! Broker transport on rumqttc's blocking client.
//!
//! The event loop is driven on the caller's thread: a handshake pumps the
//! connection until CONNACK, a publish pumps it until the matching PUBACK.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, LastWill, MqttOptions, Packet, QoS,
    RecvTimeoutError,
};

use crate::connectivity::BrokerTransport;
use crate::error::NetworkError;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub last_will_topic: String,
    pub last_will_message: String,
    /// How long to wait for CONNACK or PUBACK.
    pub ack_timeout: Duration,
}

impl MqttConfig {
    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.host, self.port);
        opts.set_keep_alive(self.keep_alive);
        // persistent session, so the broker keeps our state across drops
        opts.set_clean_session(false);
        opts.set_last_will(LastWill::new(
            &self.last_will_topic,
            self.last_will_message.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            false,
        ));
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            opts.set_credentials(user, pass);
        }
        opts
    }
}

pub struct MqttTransport {
    config: MqttConfig,
    session: Option<(Client, Connection)>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        MqttTransport {
            config,
            session: None,
        }
    }

    /// Pumps the connection until `done` accepts an event, the deadline passes, or it errors.
    fn pump(
        &mut self,
        mut done: impl FnMut(&Event) -> Result<bool, NetworkError>,
    ) -> Result<(), NetworkError> {
        let deadline = Instant::now() + self.config.ack_timeout;
        let result = match self.session.as_mut() {
            None => Err(NetworkError::NotConnected),
            Some((_, connection)) => loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break Err(NetworkError::Publish("timed out waiting for broker".into()));
                }
                match connection.recv_timeout(remaining) {
                    Ok(Ok(event)) => {
                        debug!("mqtt event: {:?}", event);
                        match done(&event) {
                            Ok(true) => break Ok(()),
                            Ok(false) => {}
                            Err(e) => break Err(e),
                        }
                    }
                    Ok(Err(e)) => break Err(NetworkError::Publish(e.to_string())),
                    Err(RecvTimeoutError::Timeout) => {
                        break Err(NetworkError::Publish("timed out waiting for broker".into()))
                    }
                    Err(RecvTimeoutError::Disconnected) => break Err(NetworkError::NotConnected),
                }
            },
        };
        if result.is_err() {
            self.session = None;
        }
        result
    }
}

impl BrokerTransport for MqttTransport {
    fn handshake(&mut self) -> Result<(), NetworkError> {
        let (client, connection) = Client::new(self.config.options(), 10);
        self.session = Some((client, connection));
        info!(
            "connecting to mqtt://{}:{} as {}",
            self.config.host, self.config.port, self.config.client_id
        );

        self.pump(|event| match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                Ok(true)
            }
            Event::Incoming(Packet::ConnAck(ack)) => {
                Err(NetworkError::Handshake(format!("{:?}", ack.code)))
            }
            _ => Ok(false),
        })
        .map_err(|e| match e {
            NetworkError::Publish(msg) => NetworkError::Handshake(msg),
            other => other,
        })
    }

    fn is_alive(&self) -> bool {
        self.session.is_some()
    }

    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetworkError> {
        let (client, _) = self.session.as_mut().ok_or(NetworkError::NotConnected)?;
        client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| NetworkError::Publish(e.to_string()))?;

        self.pump(|event| Ok(matches!(event, Event::Incoming(Packet::PubAck(_)))))
    }

    fn teardown(&mut self) {
        if let Some((client, _)) = self.session.as_mut() {
            if let Err(e) = client.disconnect() {
                warn!("mqtt disconnect: {}", e);
            }
        }
        self.session = None;
    }
}
