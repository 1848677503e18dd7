//! Broker session with bounded, doubling backoff.
//!
//! Every retry loop in the agent uses [`RetryPolicy`]: at most `max_attempts`
//! tries, waiting `base_delay * 2^(attempt - 1)` (capped at `max_delay`)
//! between them. Running out of attempts is a [`FatalError`].

use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::error::{FatalError, NetworkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Wait after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn wait<D: DelayNs>(&self, delay: &mut D, attempt: u32) {
        let ms = self.backoff(attempt).as_millis();
        delay.delay_ms(u32::try_from(ms).unwrap_or(u32::MAX));
    }
}

/// The IP link under the broker session (Wi-Fi association, or an interface on a host).
pub trait NetworkLink {
    fn is_up(&mut self) -> bool;

    /// Asks for the link to be (re)established. Completion is observed through `is_up`.
    fn associate(&mut self) -> Result<(), NetworkError>;
}

/// One broker connection: a single handshake, publish, and teardown.
pub trait BrokerTransport {
    fn handshake(&mut self) -> Result<(), NetworkError>;
    fn is_alive(&self) -> bool;
    fn send(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetworkError>;
    fn teardown(&mut self);
}

/// What the telemetry loop needs from connectivity.
pub trait Session {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetworkError>;

    /// Brings the link and the broker session back, or gives up with a [`FatalError`].
    fn recover(&mut self) -> Result<(), FatalError>;
}

pub struct Connectivity<T, L, D> {
    transport: T,
    link: L,
    delay: D,
    policy: RetryPolicy,
}

impl<T: BrokerTransport, L: NetworkLink, D: DelayNs> Connectivity<T, L, D> {
    pub fn new(transport: T, link: L, delay: D, policy: RetryPolicy) -> Self {
        Connectivity {
            transport,
            link,
            delay,
            policy,
        }
    }

    pub fn bootstrap_network(&mut self) -> Result<(), FatalError> {
        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            if self.link.is_up() {
                info!("network link up");
                return Ok(());
            }
            if let Err(e) = self.link.associate() {
                warn!("network association attempt {}/{} failed: {}", attempt, max, e);
            } else {
                info!("waiting for network link ({}/{})", attempt, max);
            }
            self.policy.wait(&mut self.delay, attempt);
        }
        if self.link.is_up() {
            return Ok(());
        }
        Err(FatalError::NetworkRetriesExhausted { attempts: max })
    }

    pub fn connect(&mut self) -> Result<(), FatalError> {
        let max = self.policy.max_attempts;
        let mut last = NetworkError::NotConnected;
        for attempt in 1..=max {
            match self.transport.handshake() {
                Ok(()) => {
                    info!("broker session established");
                    return Ok(());
                }
                Err(e) => {
                    warn!("broker connect attempt {}/{} failed: {}", attempt, max, e);
                    last = e;
                }
            }
            if attempt < max {
                self.policy.wait(&mut self.delay, attempt);
            }
        }
        Err(FatalError::BrokerRetriesExhausted {
            attempts: max,
            last,
        })
    }

    pub fn reconnect(&mut self) -> Result<(), FatalError> {
        self.transport.teardown();
        self.connect()
    }
}

impl<T: BrokerTransport, L: NetworkLink, D: DelayNs> Session for Connectivity<T, L, D> {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), NetworkError> {
        if !self.transport.is_alive() {
            return Err(NetworkError::NotConnected);
        }
        self.transport.send(topic, payload)
    }

    fn recover(&mut self) -> Result<(), FatalError> {
        if !self.link.is_up() {
            warn!("network link lost, re-running bootstrap");
            self.bootstrap_network()?;
        }
        self.reconnect()
    }
}
