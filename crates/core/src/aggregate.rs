use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::decode::{
    DecodedMessage, MessageKind, FIELD_ACTIVITY_TYPE, FIELD_DISTANCE, FIELD_STEP_COUNTER,
    FIELD_TIMESTAMP, FIELD_TIMESTAMP_OFFSET,
};
use crate::model::{BaselineMode, DropCounts, DropReason, FileSummary, StepInterval};

pub const WALKING: &str = "walking";

/// Per-file accumulator. Never shared across files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningFileState {
    pub anchor: Option<DateTime<Utc>>,
    pub last_step_counter: i64,
    pub last_distance_counter: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct SampleRecord<'a> {
    activity: Option<&'a str>,
    timestamp: Option<DateTime<Utc>>,
    offset_seconds: Option<i64>,
    step_counter: Option<i64>,
    distance_meters: Option<f64>,
}

impl<'a> SampleRecord<'a> {
    fn from_message(message: &'a DecodedMessage) -> Self {
        Self {
            activity: message.text(FIELD_ACTIVITY_TYPE),
            timestamp: message.timestamp(FIELD_TIMESTAMP),
            offset_seconds: message.integer(FIELD_TIMESTAMP_OFFSET),
            step_counter: message.integer(FIELD_STEP_COUNTER),
            distance_meters: message.float(FIELD_DISTANCE),
        }
    }

    fn resolve_timestamp(&self, anchor: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if let Some(timestamp) = self.timestamp {
            return Some(timestamp);
        }
        let anchor = anchor?;
        let offset = TimeDelta::try_seconds(self.offset_seconds?)?;
        anchor.checked_add_signed(offset)
    }
}

/// Folds monitoring message streams into walking intervals keyed by time.
///
/// Files must be fed in a fixed order: when two samples resolve to the same
/// instant the one ingested last replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct StepAggregator {
    mode: BaselineMode,
    intervals: BTreeMap<DateTime<Utc>, StepInterval>,
    drops: DropCounts,
}

impl StepAggregator {
    pub fn new(mode: BaselineMode) -> Self {
        Self {
            mode,
            intervals: BTreeMap::new(),
            drops: DropCounts::default(),
        }
    }

    pub fn mode(&self) -> BaselineMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn drops(&self) -> &DropCounts {
        &self.drops
    }

    pub fn ingest_file<I>(&mut self, source: &str, messages: I) -> FileSummary
    where
        I: IntoIterator<Item = DecodedMessage>,
    {
        let mut state = RunningFileState::default();
        let mut summary = FileSummary {
            path: source.to_string(),
            messages: 0,
            anchors: 0,
            emitted: 0,
            drops: DropCounts::default(),
        };

        for message in messages {
            summary.messages += 1;
            match message.kind {
                MessageKind::MonitoringInfo => {
                    match message.timestamp(FIELD_TIMESTAMP) {
                        Some(timestamp) => {
                            state.anchor = Some(timestamp);
                            state.last_step_counter = 0;
                            summary.anchors += 1;
                        }
                        None => {
                            debug!("{source}: anchor without timestamp ignored");
                            summary.drops.record(DropReason::AnchorWithoutTimestamp);
                        }
                    }
                }
                MessageKind::Monitoring => {
                    match self.fold_sample(&mut state, &message) {
                        Ok(interval) => {
                            self.intervals.insert(interval.timestamp, interval);
                            summary.emitted += 1;
                        }
                        Err(reason) => {
                            debug!("{source}: sample dropped ({reason:?})");
                            summary.drops.record(reason);
                        }
                    }
                }
                MessageKind::Other => {}
            }
        }

        self.drops.merge(&summary.drops);
        summary
    }

    fn fold_sample(
        &self,
        state: &mut RunningFileState,
        message: &DecodedMessage,
    ) -> Result<StepInterval, DropReason> {
        let sample = SampleRecord::from_message(message);
        if sample.activity != Some(WALKING) {
            return Err(DropReason::NotWalking);
        }

        let timestamp = sample
            .resolve_timestamp(state.anchor)
            .ok_or(DropReason::UnresolvedTimestamp)?;
        let raw_steps = sample
            .step_counter
            .ok_or(DropReason::MissingStepCounter)?;

        let steps = raw_steps.saturating_sub(state.last_step_counter);
        let distance_meters = match sample.distance_meters {
            Some(raw_distance) => {
                let delta = raw_distance - state.last_distance_counter;
                state.last_distance_counter = match self.mode {
                    BaselineMode::PreviousDelta => delta,
                    BaselineMode::Cumulative => raw_distance,
                };
                delta
            }
            None => 0.0,
        };
        state.last_step_counter = match self.mode {
            BaselineMode::PreviousDelta => steps,
            BaselineMode::Cumulative => raw_steps,
        };

        Ok(StepInterval {
            timestamp,
            steps,
            distance_meters,
        })
    }

    /// Intervals in ascending time order.
    pub fn finish(self) -> Vec<StepInterval> {
        self.intervals.into_values().collect()
    }
}
