use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use crate::acquisition::{Acquisition, Clock};
use crate::bme280::Sensor;
use crate::connectivity::{RetryPolicy, Session};
use crate::error::FatalError;
use crate::status_led::{Pattern, StatusIndicator};
use crate::structs::{TelemetryRecord, WirePayload};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub topic: String,
    pub interval: Duration,
    pub read_retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    /// First publish failed; the session was recovered and the retry went through.
    PublishedAfterRecovery,
    /// Record could not be delivered and was discarded.
    Dropped,
}

pub struct TelemetryLoop<S, N, I, C, D> {
    sensor: S,
    session: N,
    indicator: I,
    clock: C,
    delay: D,
    settings: LoopSettings,
    acquisition: Acquisition,
    payload: Vec<u8>,
}

impl<S, N, I, C, D> TelemetryLoop<S, N, I, C, D>
where
    S: Sensor,
    N: Session,
    I: StatusIndicator,
    C: Clock,
    D: DelayNs,
{
    pub fn new(
        sensor: S,
        session: N,
        indicator: I,
        clock: C,
        delay: D,
        settings: LoopSettings,
    ) -> Self {
        TelemetryLoop {
            sensor,
            session,
            indicator,
            clock,
            delay,
            settings,
            acquisition: Acquisition::new(),
            payload: Vec::with_capacity(128),
        }
    }

    /// Runs cycles until a retry budget is exhausted.
    pub fn run(&mut self) -> FatalError {
        loop {
            if let Err(fatal) = self.run_cycle() {
                error!("telemetry loop stopped: {}", fatal);
                return fatal;
            }
        }
    }

    pub fn run_cycle(&mut self) -> Result<CycleOutcome, FatalError> {
        let record = self.acquire_with_retry()?;
        info!("{} {}", record.timestamp, record.reading.formatted());

        let outcome = match self.encode(&record) {
            Ok(()) => self.publish_with_recovery()?,
            Err(e) => {
                error!("could not encode record: {}", e);
                CycleOutcome::Dropped
            }
        };

        self.indicator.show(Pattern::Off);
        let ms = self.settings.interval.as_millis();
        self.delay.delay_ms(u32::try_from(ms).unwrap_or(u32::MAX));
        Ok(outcome)
    }

    fn acquire_with_retry(&mut self) -> Result<TelemetryRecord, FatalError> {
        let policy = self.settings.read_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.acquisition.acquire(&mut self.sensor, &self.clock) {
                Ok(record) => return Ok(record),
                Err(last) if attempt >= policy.max_attempts => {
                    return Err(FatalError::SensorRetriesExhausted {
                        attempts: attempt,
                        last,
                    })
                }
                Err(_) => {
                    warn!(
                        "read attempt {}/{} ended in {:?}",
                        attempt,
                        policy.max_attempts,
                        self.acquisition.state()
                    );
                    self.indicator.show(Pattern::FastBlink);
                    policy.wait(&mut self.delay, attempt);
                }
            }
        }
    }

    fn encode(&mut self, record: &TelemetryRecord) -> serde_json::Result<()> {
        self.payload.clear();
        serde_json::to_writer(&mut self.payload, &WirePayload::from(record))
    }

    fn publish_with_recovery(&mut self) -> Result<CycleOutcome, FatalError> {
        let topic = self.settings.topic.as_str();
        let err = match self.session.publish(topic, &self.payload) {
            Ok(()) => return Ok(CycleOutcome::Published),
            Err(e) => e,
        };

        warn!("publish to {} failed: {}", topic, err);
        self.indicator.show(Pattern::SlowBlink);
        self.session.recover()?;

        match self.session.publish(topic, &self.payload) {
            Ok(()) => Ok(CycleOutcome::PublishedAfterRecovery),
            Err(e) => {
                warn!("publish failed again after reconnect, dropping record: {}", e);
                Ok(CycleOutcome::Dropped)
            }
        }
    }
}
