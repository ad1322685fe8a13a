use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub label: String,
    pub mount_point: PathBuf,
    pub kind: VolumeKind,
    #[serde(default)]
    pub file_system: Option<String>,
}

impl Volume {
    pub fn is_removable(&self) -> bool {
        self.kind == VolumeKind::Removable
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    #[default]
    Unknown,
    NoRoot,
    Removable,
    Fixed,
    Network,
    Optical,
    Ram,
}

impl VolumeKind {
    pub fn display_name(self) -> &'static str {
        match self {
            VolumeKind::Unknown => "Unknown",
            VolumeKind::NoRoot => "No Root Directory",
            VolumeKind::Removable => "Removable Disk",
            VolumeKind::Fixed => "Local Disk",
            VolumeKind::Network => "Network Drive",
            VolumeKind::Optical => "Compact Disc",
            VolumeKind::Ram => "RAM Disk",
        }
    }
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One walking interval reconstructed from the monitoring logs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepInterval {
    pub timestamp: DateTime<Utc>,
    pub steps: i64,
    pub distance_meters: f64,
}

impl StepInterval {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }
}

/// How the running counter baseline advances after each walking sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMode {
    /// The baseline becomes the delta just computed. Matches what the device
    /// tooling has always reported.
    #[default]
    PreviousDelta,
    /// The baseline becomes the raw cumulative counter.
    Cumulative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    NotWalking,
    UnresolvedTimestamp,
    MissingStepCounter,
    AnchorWithoutTimestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DropCounts {
    #[serde(default)]
    pub not_walking: u64,
    #[serde(default)]
    pub unresolved_timestamp: u64,
    #[serde(default)]
    pub missing_step_counter: u64,
    #[serde(default)]
    pub anchor_without_timestamp: u64,
}

impl DropCounts {
    pub fn record(&mut self, reason: DropReason) {
        let slot = match reason {
            DropReason::NotWalking => &mut self.not_walking,
            DropReason::UnresolvedTimestamp => &mut self.unresolved_timestamp,
            DropReason::MissingStepCounter => &mut self.missing_step_counter,
            DropReason::AnchorWithoutTimestamp => &mut self.anchor_without_timestamp,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn merge(&mut self, other: &DropCounts) {
        self.not_walking = self.not_walking.saturating_add(other.not_walking);
        self.unresolved_timestamp = self
            .unresolved_timestamp
            .saturating_add(other.unresolved_timestamp);
        self.missing_step_counter = self
            .missing_step_counter
            .saturating_add(other.missing_step_counter);
        self.anchor_without_timestamp = self
            .anchor_without_timestamp
            .saturating_add(other.anchor_without_timestamp);
    }

    pub fn total(&self) -> u64 {
        self.not_walking
            .saturating_add(self.unresolved_timestamp)
            .saturating_add(self.missing_step_counter)
            .saturating_add(self.anchor_without_timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSummary {
    pub path: String,
    pub messages: u64,
    pub anchors: u64,
    pub emitted: u64,
    #[serde(default)]
    pub drops: DropCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActivityTotals {
    pub intervals: u64,
    pub steps: i64,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityReport {
    pub report_version: String,
    pub generated_at: String,
    pub device_root: String,
    pub pattern: String,
    #[serde(default)]
    pub baseline_mode: BaselineMode,
    pub files: Vec<FileSummary>,
    pub intervals: Vec<StepInterval>,
    #[serde(default)]
    pub totals: ActivityTotals,
    #[serde(default)]
    pub drops: DropCounts,
    pub warnings: Vec<String>,
}
