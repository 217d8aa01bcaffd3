//! Stage Timeline
//!
//! Records when each installation stage starts and how it ends, for the
//! summary printed at the end of a run.

use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    /// Stage did work.
    Completed,
    /// Stage found its goal state already reached.
    Satisfied,
    Failed,
}

impl EventType {
    fn label(self) -> &'static str {
        match self {
            Self::Started => "running",
            Self::Completed => "done",
            Self::Satisfied => "up to date",
            Self::Failed => "FAILED",
        }
    }
}

/// A single event in the stage timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub stage: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Ordered record of stage events for one run.
#[derive(Debug, Clone)]
pub struct StageTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl StageTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn add_event(&mut self, stage: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            stage: stage.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Stage names in the order they started.
    pub fn started_stages(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.event_type == EventType::Started)
            .map(|e| e.stage.as_str())
            .collect()
    }

    /// Final state and duration of each stage, in start order.
    pub fn outcomes(&self) -> Vec<(&str, EventType, Duration)> {
        let mut outcomes: Vec<(&str, EventType, Duration)> = Vec::new();
        let mut started: Vec<(&str, Instant)> = Vec::new();

        for event in &self.events {
            if event.event_type == EventType::Started {
                started.push((event.stage.as_str(), event.timestamp));
                continue;
            }
            if let Some((_, at)) = started.iter().find(|(stage, _)| *stage == event.stage) {
                outcomes.push((
                    event.stage.as_str(),
                    event.event_type,
                    event.timestamp.duration_since(*at),
                ));
            }
        }

        // Stages that never reported back are still running (or were interrupted).
        for (stage, at) in started {
            if !outcomes.iter().any(|(s, _, _)| *s == stage) {
                outcomes.push((stage, EventType::Started, at.elapsed()));
            }
        }
        outcomes
    }

    /// Human-readable summary table.
    pub fn summary(&self) -> String {
        let mut output = String::from("Stages:\n");
        for (stage, state, duration) in self.outcomes() {
            output.push_str(&format!(
                "  {:<22} {:<11} {:>10}\n",
                stage,
                state.label(),
                format!("{:.2?}", duration)
            ));
        }
        output.push_str(&format!("Total: {:.2?}\n", self.elapsed()));
        output
    }
}

impl Default for StageTimeline {
    fn default() -> Self {
        Self::new()
    }
}
