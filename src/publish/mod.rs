mod mqtt;

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use mqtt::MqttPublisher;

pub const COUNT_TOPIC: &str = "person";
pub const DURATION_TOPIC: &str = "person/duration";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
pub struct CountPayload {
    pub count: usize,
    pub total: u64,
}

#[derive(Debug, Serialize)]
pub struct DurationPayload {
    /// Seconds.
    pub duration: f64,
}

/// Sink for the two statistics topics.
pub trait Publisher {
    fn publish_counts(&mut self, count: usize, total: u64) -> Result<(), PublishError>;

    fn publish_duration(&mut self, duration: Duration) -> Result<(), PublishError>;

    fn disconnect(&mut self) -> Result<(), PublishError>;
}

pub fn count_payload(count: usize, total: u64) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(&CountPayload { count, total })?)
}

pub fn duration_payload(duration: Duration) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(&DurationPayload {
        duration: duration.as_secs_f64(),
    })?)
}
