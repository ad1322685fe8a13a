pub mod aggregate;
pub mod decode;
pub mod doctor;
pub mod error;
pub mod ingest;
pub mod model;
pub mod render;
pub mod volume;
pub mod watch;

pub use aggregate::{RunningFileState, StepAggregator};
#[cfg(feature = "fit-backend")]
pub use decode::FitDecoder;
pub use decode::{DecodedMessage, DecoderKind, FieldValue, JsonDecoder, MessageKind, RecordDecoder};
pub use doctor::{build_doctor_info, collect_doctor_info, DoctorInfo, VolumeStatus};
pub use error::WatchError;
pub use ingest::{
    aggregate_files, collect_monitoring_files, run_ingest, run_ingest_with, IngestOptions,
    IngestOutput, DEFAULT_MONITOR_PATTERN,
};
pub use model::{
    ActivityReport, ActivityTotals, BaselineMode, DropCounts, DropReason, FileSummary,
    StepInterval, Volume, VolumeKind, REPORT_VERSION,
};
pub use render::{
    format_interval_line, format_timestamp, render_markdown_summary, render_text_report,
    DisplayZone,
};
pub use volume::{classify_volume, classify_volumes, SystemVolumes, VolumeProbe, VolumeSource};
pub use watch::{
    find_target, is_target, DeviceWatcher, MarkerCheck, PollingNotifier, VolumeChangeNotifier,
    VolumeEvent, WaitOutcome, WatchOptions, DEFAULT_MARKER_PATH,
};
