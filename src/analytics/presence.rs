use std::time::{Duration, Instant};

/// Consecutive empty frames after which a presence event is closed.
pub const EMPTY_FRAMES_TO_END: u32 = 10;

/// Result of feeding one frame's person count into the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceUpdate {
    pub count: usize,
    pub total: u64,
    /// Set on the single frame that closes a presence event.
    pub finished: Option<Duration>,
}

/// Debounces per-frame person counts into presence events.
///
/// An event opens on the first frame with people and closes once
/// [`EMPTY_FRAMES_TO_END`] consecutive frames come back empty.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    current_count: usize,
    total_count: u64,
    empty_streak: u32,
    event_started_at: Option<Instant>,
    active_frames: u64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, people: usize, now: Instant) -> PresenceUpdate {
        let mut count = people;

        if self.event_started_at.is_none() && people > 0 {
            self.event_started_at = Some(now);
            tracing::debug!(people, "presence event started");
        }

        if people > 0 {
            self.empty_streak = 0;
            self.active_frames += 1;
        } else {
            self.empty_streak = self.empty_streak.saturating_add(1);
        }

        let mut finished = None;
        if let Some(started) = self.event_started_at {
            if self.empty_streak >= EMPTY_FRAMES_TO_END {
                let duration = now.saturating_duration_since(started);
                self.total_count += 1;
                self.event_started_at = None;
                self.active_frames = 0;
                count = 0;
                finished = Some(duration);
                tracing::debug!(
                    total = self.total_count,
                    duration_secs = format!("{:.2}", duration.as_secs_f64()),
                    "presence event ended"
                );
            }
        }

        self.current_count = count;

        PresenceUpdate {
            count,
            total: self.total_count,
            finished,
        }
    }

    pub fn current_count(&self) -> usize {
        self.current_count
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn empty_streak(&self) -> u32 {
        self.empty_streak
    }

    pub fn active_frames(&self) -> u64 {
        self.active_frames
    }

    pub fn event_in_progress(&self) -> bool {
        self.event_started_at.is_some()
    }

    /// Time elapsed in the open event, if any.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.event_started_at
            .map(|started| now.saturating_duration_since(started))
    }
}
