use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use globset::{GlobBuilder, GlobMatcher};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::aggregate::StepAggregator;
use crate::decode::{DecoderKind, RecordDecoder};
use crate::model::{
    ActivityReport, ActivityTotals, BaselineMode, DropCounts, FileSummary, StepInterval,
    REPORT_VERSION,
};

pub const DEFAULT_MONITOR_PATTERN: &str = "GARMIN/MONITOR/*.FIT";

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub root: PathBuf,
    pub pattern: String,
    pub decoder: DecoderKind,
    pub baseline: BaselineMode,
    pub case_insensitive: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            pattern: DEFAULT_MONITOR_PATTERN.to_string(),
            decoder: DecoderKind::Auto,
            baseline: BaselineMode::PreviousDelta,
            case_insensitive: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutput {
    pub intervals: Vec<StepInterval>,
    pub files: Vec<FileSummary>,
    pub drops: DropCounts,
    pub warnings: Vec<String>,
}

/// Monitoring files under `root` matching `pattern`, in lexicographic order.
/// That order is the file-processing order used for last-write-wins.
pub fn collect_monitoring_files(
    root: &Path,
    pattern: &str,
    case_insensitive: bool,
) -> Result<Vec<PathBuf>> {
    let pattern = normalize_pattern(pattern);
    if pattern.is_empty() {
        return Err(anyhow!("monitoring file pattern must not be empty"));
    }
    if !root.is_dir() {
        return Err(anyhow!("device root not found: {}", root.display()));
    }

    let matcher = build_matcher(&pattern, case_insensitive)?;
    let mut walker = WalkDir::new(root).follow_links(false);
    if !pattern.contains("**") {
        walker = walker.max_depth(pattern.split('/').count());
    }

    let mut files = Vec::new();
    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warn!("walk error under {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if matcher.is_match(relative) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn normalize_pattern(pattern: &str) -> String {
    pattern
        .trim()
        .replace('\\', "/")
        .trim_start_matches('/')
        .to_string()
}

fn build_matcher(pattern: &str, case_insensitive: bool) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid monitoring file pattern '{pattern}'"))?;
    Ok(glob.compile_matcher())
}

/// Decodes and folds `files` in the given order. A file that fails to decode
/// is skipped with a warning.
pub fn aggregate_files<D>(files: &[PathBuf], decoder: &D, mode: BaselineMode) -> IngestOutput
where
    D: RecordDecoder + ?Sized,
{
    let mut aggregator = StepAggregator::new(mode);
    let mut summaries = Vec::new();
    let mut warnings = Vec::new();

    for path in files {
        let messages = match decoder.decode(path) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("skipping {}: {:#}", path.display(), err);
                warnings.push(format!("skipped {}: {:#}", path.display(), err));
                continue;
            }
        };
        let summary = aggregator.ingest_file(&path.to_string_lossy(), messages);
        summaries.push(summary);
    }

    let drops = aggregator.drops().clone();
    IngestOutput {
        intervals: aggregator.finish(),
        files: summaries,
        drops,
        warnings,
    }
}

pub fn run_ingest(options: &IngestOptions) -> Result<ActivityReport> {
    run_ingest_with(options, &options.decoder)
}

pub fn run_ingest_with<D>(options: &IngestOptions, decoder: &D) -> Result<ActivityReport>
where
    D: RecordDecoder + ?Sized,
{
    let files = collect_monitoring_files(&options.root, &options.pattern, options.case_insensitive)?;
    let mut warnings = Vec::new();
    if files.is_empty() {
        warnings.push(format!(
            "no monitoring files matched '{}' under {}",
            options.pattern,
            options.root.display()
        ));
    }
    info!("parsing step data from {} file(s)...", files.len());

    let output = aggregate_files(&files, decoder, options.baseline);
    warnings.extend(output.warnings);

    let totals = ActivityTotals {
        intervals: output.intervals.len() as u64,
        steps: output
            .intervals
            .iter()
            .fold(0_i64, |acc, interval| acc.saturating_add(interval.steps)),
        distance_meters: output
            .intervals
            .iter()
            .map(|interval| interval.distance_meters)
            .sum(),
    };

    Ok(ActivityReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        device_root: options.root.to_string_lossy().to_string(),
        pattern: options.pattern.clone(),
        baseline_mode: options.baseline,
        files: output.files,
        intervals: output.intervals,
        totals,
        drops: output.drops,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};

    use super::{collect_monitoring_files, normalize_pattern};

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
        fs::write(path, b"").expect("file");
    }

    #[test]
    fn glob_matches_case_insensitively_and_sorts() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "Garmin/Monitor/b.fit");
        touch(dir.path(), "Garmin/Monitor/A.FIT");
        touch(dir.path(), "Garmin/Monitor/notes.txt");
        touch(dir.path(), "Garmin/Monitor/nested/c.fit");
        touch(dir.path(), "Garmin/Activity/d.fit");

        let files = collect_monitoring_files(dir.path(), "GARMIN/MONITOR/*.FIT", true)
            .expect("collect");
        let names = files
            .iter()
            .map(|path| path.strip_prefix(dir.path()).expect("prefix").to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                PathBuf::from("Garmin/Monitor/A.FIT"),
                PathBuf::from("Garmin/Monitor/b.fit"),
            ]
        );
    }

    #[test]
    fn case_sensitive_glob_skips_other_case() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "GARMIN/MONITOR/a.fit");
        touch(dir.path(), "GARMIN/MONITOR/b.FIT");

        let files = collect_monitoring_files(dir.path(), "GARMIN/MONITOR/*.FIT", false)
            .expect("collect");
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("b.FIT"));
    }

    #[test]
    fn recursive_pattern_descends() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "logs/2024/01/a.json");
        touch(dir.path(), "logs/b.json");

        let files = collect_monitoring_files(dir.path(), "logs/**/*.json", true).expect("collect");
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gone = dir.path().join("ejected");
        assert!(collect_monitoring_files(&gone, "*.FIT", true).is_err());
        assert!(collect_monitoring_files(dir.path(), "  ", true).is_err());
    }

    #[test]
    fn pattern_normalization() {
        assert_eq!(normalize_pattern("\\GARMIN\\MONITOR\\*.FIT"), "GARMIN/MONITOR/*.FIT");
        assert_eq!(normalize_pattern(" /a/*.fit "), "a/*.fit");
    }
}
