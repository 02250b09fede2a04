use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::config::OutputConfig;
use crate::publish::{PublishError, Publisher};
use crate::video::{VideoError, VideoSource};

use super::annotate;
use super::object::PersonDetector;
use super::presence::{PresenceTracker, PresenceUpdate};

const PUBLISH_WARN_EVERY: u64 = 100;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video error: {0}")]
    Video(#[from] VideoError),
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct PipelineSummary {
    pub frames: u64,
    pub skipped_frames: u64,
    pub total_people: u64,
}

/// Presence tracking plus the publishing it drives.
pub struct PeopleCounter<P: Publisher> {
    tracker: PresenceTracker,
    publisher: P,
    publish_failures: u64,
}

impl<P: Publisher> PeopleCounter<P> {
    pub fn new(publisher: P) -> Self {
        Self {
            tracker: PresenceTracker::new(),
            publisher,
            publish_failures: 0,
        }
    }

    /// Publishes the duration of a just-closed event before the frame counts.
    pub fn record(&mut self, people: usize, now: Instant) -> PresenceUpdate {
        let update = self.tracker.observe(people, now);

        if let Some(duration) = update.finished {
            let result = self.publisher.publish_duration(duration);
            self.check_publish(result);
        }

        let result = self.publisher.publish_counts(update.count, update.total);
        self.check_publish(result);

        tracing::debug!(
            count = self.tracker.current_count(),
            empty_streak = self.tracker.empty_streak(),
            active_frames = self.tracker.active_frames(),
            elapsed_secs = self
                .tracker
                .elapsed(now)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            "presence"
        );

        update
    }

    // Broker outages must not stall the frame stream.
    fn check_publish(&mut self, result: Result<(), PublishError>) {
        if let Err(e) = result {
            if self.publish_failures % PUBLISH_WARN_EVERY == 0 {
                tracing::warn!(error = %e, failures = self.publish_failures + 1, "publish failed");
            }
            self.publish_failures += 1;
        }
    }

    pub fn tracker(&self) -> &PresenceTracker {
        &self.tracker
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }

    pub fn finish(mut self) -> P {
        if self.tracker.event_in_progress() {
            tracing::info!(
                active_frames = self.tracker.active_frames(),
                "stream ended with a presence event still open"
            );
        }
        if let Err(e) = self.publisher.disconnect() {
            tracing::warn!(error = %e, "failed to disconnect publisher");
        }
        self.publisher
    }
}

pub struct Pipeline<P: Publisher> {
    source: VideoSource,
    detector: PersonDetector,
    counter: PeopleCounter<P>,
    output: OutputConfig,
}

impl<P: Publisher> Pipeline<P> {
    pub fn new(
        source: VideoSource,
        detector: PersonDetector,
        publisher: P,
        output: OutputConfig,
    ) -> Self {
        Self {
            source,
            detector,
            counter: PeopleCounter::new(publisher),
            output,
        }
    }

    /// Streams every frame to `writer` until the input ends or `shutdown` is set.
    pub fn run<W: Write>(
        mut self,
        writer: &mut W,
        shutdown: &AtomicBool,
    ) -> Result<PipelineSummary, PipelineError> {
        let result = self.process(writer, shutdown);

        self.source.release();
        let total_people = self.counter.tracker().total_count();
        self.counter.finish();

        let mut summary = result?;
        summary.total_people = total_people;
        Ok(summary)
    }

    fn process<W: Write>(
        &mut self,
        writer: &mut W,
        shutdown: &AtomicBool,
    ) -> Result<PipelineSummary, PipelineError> {
        let mut summary = PipelineSummary::default();
        let single_image = self.source.is_single_image();

        tracing::info!(
            input = %self.source.input(),
            width = self.source.width(),
            height = self.source.height(),
            single_image,
            "pipeline started"
        );

        while !shutdown.load(Ordering::Relaxed) {
            let Some(mut frame) = self.source.read()? else {
                tracing::info!(input = %self.source.input(), "end of stream");
                break;
            };
            summary.frames += 1;

            let detections = match self.detector.detect(&frame) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(frame = summary.frames, error = %e, "inference failed, skipping frame");
                    summary.skipped_frames += 1;
                    continue;
                }
            };

            for det in &detections {
                tracing::trace!(
                    frame = summary.frames,
                    confidence = format!("{:.2}", det.confidence),
                    x = det.x,
                    y = det.y,
                    "person detected"
                );
            }

            annotate::draw_detections(&mut frame, &detections)?;
            self.counter.record(detections.len(), Instant::now());

            let out_frame =
                annotate::resize_for_output(&frame, self.output.width, self.output.height)?;

            if single_image {
                annotate::write_image(&self.output.image_path, &out_frame)?;
            } else {
                annotate::write_raw(writer, &out_frame)?;
            }
        }

        Ok(summary)
    }
}

pub fn spawn_pipeline<P: Publisher + Send + 'static>(
    source_input: String,
    detector: PersonDetector,
    publisher: P,
    output: OutputConfig,
    shutdown: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<Result<PipelineSummary, PipelineError>> {
    tokio::task::spawn_blocking(move || {
        let source = VideoSource::open(&source_input)?;
        let pipeline = Pipeline::new(source, detector, publisher, output);
        let stdout = std::io::stdout();
        let mut writer = stdout.lock();
        pipeline.run(&mut writer, &shutdown)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Message {
        Counts(usize, u64),
        Duration(Duration),
    }

    #[derive(Default)]
    struct RecordingPublisher {
        messages: Vec<Message>,
        disconnected: bool,
        fail: bool,
    }

    impl Publisher for RecordingPublisher {
        fn publish_counts(&mut self, count: usize, total: u64) -> Result<(), PublishError> {
            if self.fail {
                return Err(serde_json::from_str::<u8>("x").unwrap_err().into());
            }
            self.messages.push(Message::Counts(count, total));
            Ok(())
        }

        fn publish_duration(&mut self, duration: Duration) -> Result<(), PublishError> {
            self.messages.push(Message::Duration(duration));
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), PublishError> {
            self.disconnected = true;
            Ok(())
        }
    }

    #[test]
    fn publishes_counts_every_frame() {
        let start = Instant::now();
        let mut counter = PeopleCounter::new(RecordingPublisher::default());

        for (i, people) in [0, 1, 2].into_iter().enumerate() {
            counter.record(people, start + Duration::from_secs(i as u64));
        }

        let publisher = counter.finish();
        assert_eq!(
            publisher.messages,
            vec![
                Message::Counts(0, 0),
                Message::Counts(1, 0),
                Message::Counts(2, 0)
            ]
        );
        assert!(publisher.disconnected);
    }

    #[test]
    fn duration_precedes_counts_when_event_closes() {
        let start = Instant::now();
        let mut counter = PeopleCounter::new(RecordingPublisher::default());

        counter.record(1, start);
        for i in 1..=10 {
            counter.record(0, start + Duration::from_secs(i));
        }

        let publisher = counter.finish();
        let tail = &publisher.messages[publisher.messages.len() - 2..];
        assert_eq!(
            tail,
            &[
                Message::Duration(Duration::from_secs(10)),
                Message::Counts(0, 1)
            ]
        );
        assert_eq!(
            publisher
                .messages
                .iter()
                .filter(|m| matches!(m, Message::Duration(_)))
                .count(),
            1
        );
    }

    #[test]
    fn publish_failures_do_not_stop_counting() {
        let start = Instant::now();
        let publisher = RecordingPublisher {
            fail: true,
            ..Default::default()
        };
        let mut counter = PeopleCounter::new(publisher);

        counter.record(1, start);
        let update = counter.record(2, start + Duration::from_secs(1));

        assert_eq!(update.count, 2);
        assert_eq!(counter.publish_failures(), 2);
        assert!(counter.tracker().event_in_progress());
    }
}
