use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rumqttc::{Client, Connection, Event, MqttOptions, QoS};

use super::{count_payload, duration_payload, Publisher, PublishError, COUNT_TOPIC, DURATION_TOPIC};
use crate::config::MqttConfig;

const REQUEST_CAPACITY: usize = 10;

pub struct MqttPublisher {
    client: Client,
    connection_handle: Option<JoinHandle<()>>,
    disconnecting: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Starts the client and drives its event loop on a background thread.
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let disconnecting = Arc::new(AtomicBool::new(false));
        let handle = spawn_event_loop(
            connection,
            format!("{}:{}", config.host, config.port),
            Arc::clone(&disconnecting),
        );

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "mqtt client started"
        );

        Self {
            client,
            connection_handle: Some(handle),
            disconnecting,
        }
    }

    /// Never blocks: a full or closed request queue is reported as an error.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.client.try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}

fn spawn_event_loop(
    mut connection: Connection,
    broker: String,
    disconnecting: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    if disconnecting.load(Ordering::Relaxed) {
                        tracing::debug!(broker = %broker, error = %e, "mqtt connection closed");
                    } else {
                        tracing::warn!(broker = %broker, error = %e, "mqtt connection error");
                    }
                    break;
                }
            }
        }
        tracing::debug!(broker = %broker, "mqtt event loop stopped");
    })
}

impl Publisher for MqttPublisher {
    fn publish_counts(&mut self, count: usize, total: u64) -> Result<(), PublishError> {
        self.publish(COUNT_TOPIC, count_payload(count, total)?)
    }

    fn publish_duration(&mut self, duration: Duration) -> Result<(), PublishError> {
        self.publish(DURATION_TOPIC, duration_payload(duration)?)
    }

    fn disconnect(&mut self) -> Result<(), PublishError> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        self.disconnecting.store(true, Ordering::Relaxed);
        let result = self.client.try_disconnect();
        if handle.join().is_err() {
            tracing::warn!("mqtt event loop thread panicked");
        }
        result?;
        tracing::info!("mqtt client disconnected");
        Ok(())
    }
}
