use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use stepwatch_core::{
    collect_doctor_info, DeviceWatcher, DoctorInfo, MarkerCheck, SystemVolumes, Volume,
    VolumeSource, WaitOutcome, WatchOptions, DEFAULT_MARKER_PATH,
};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_marker_path")]
    pub marker_path: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_idle_sleep")]
    pub idle_sleep_ms: u64,
    #[serde(default = "default_event_timeout")]
    pub event_timeout_ms: u64,
}

fn default_marker_path() -> PathBuf {
    PathBuf::from(DEFAULT_MARKER_PATH)
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_idle_sleep() -> u64 {
    10
}

fn default_event_timeout() -> u64 {
    250
}

impl Default for WatchRequest {
    fn default() -> Self {
        Self {
            session_id: None,
            marker_path: default_marker_path(),
            poll_interval_ms: default_poll_interval(),
            idle_sleep_ms: default_idle_sleep(),
            event_timeout_ms: default_event_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchSessionStatus {
    Waiting,
    Found,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSessionSnapshot {
    pub session_id: String,
    pub status: WatchSessionStatus,
    pub volume: Option<Volume>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelWatchResponse {
    pub session_id: String,
    pub status: WatchSessionStatus,
}

#[derive(Debug, Clone)]
struct WatchSession {
    status: WatchSessionStatus,
    volume: Option<Volume>,
    error: Option<String>,
    cancel_flag: Arc<AtomicBool>,
}

static SESSIONS: Lazy<Mutex<HashMap<String, WatchSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Starts waiting for the device on a background thread.
pub fn start_watch(request: WatchRequest) -> Result<String> {
    start_watch_with(request, SystemVolumes)
}

pub fn start_watch_with<S>(request: WatchRequest, source: S) -> Result<String>
where
    S: VolumeSource + Clone + Send + 'static,
{
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let cancel_flag = Arc::new(AtomicBool::new(false));

    {
        let mut sessions = lock_sessions()?;
        if sessions
            .get(&session_id)
            .is_some_and(|session| session.status == WatchSessionStatus::Waiting)
        {
            return Err(anyhow!("watch session already running: {session_id}"));
        }
        sessions.insert(
            session_id.clone(),
            WatchSession {
                status: WatchSessionStatus::Waiting,
                volume: None,
                error: None,
                cancel_flag: Arc::clone(&cancel_flag),
            },
        );
    }

    let thread_session_id = session_id.clone();
    thread::spawn(move || {
        let options = WatchOptions {
            marker: MarkerCheck::new(request.marker_path),
            poll_interval_ms: request.poll_interval_ms,
            idle_sleep_ms: request.idle_sleep_ms,
            event_timeout_ms: request.event_timeout_ms,
            cancel_flag: Some(Arc::clone(&cancel_flag)),
        };
        let watcher = DeviceWatcher::new(source, options);
        let result = watcher.wait_for_target();

        let Ok(mut sessions) = lock_sessions() else {
            warn!("watch session registry unavailable for {thread_session_id}");
            return;
        };
        // The id may have been reused after a cancel; only touch our own entry.
        let Some(session) = sessions
            .get_mut(&thread_session_id)
            .filter(|session| Arc::ptr_eq(&session.cancel_flag, &cancel_flag))
        else {
            return;
        };
        match result {
            Ok(WaitOutcome::Found(volume)) => {
                if session.status == WatchSessionStatus::Waiting {
                    session.status = WatchSessionStatus::Found;
                    session.volume = Some(volume);
                }
            }
            Ok(WaitOutcome::Cancelled) => session.status = WatchSessionStatus::Cancelled,
            Err(err) => {
                session.status = WatchSessionStatus::Failed;
                session.error = Some(err.to_string());
            }
        }
    });

    Ok(session_id)
}

pub fn get_watch_session(session_id: &str) -> Result<WatchSessionSnapshot> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| anyhow!("watch session not found: {session_id}"))?;

    Ok(WatchSessionSnapshot {
        session_id: session_id.to_string(),
        status: session.status.clone(),
        volume: session.volume.clone(),
        error: session.error.clone(),
    })
}

pub fn cancel_watch(session_id: &str) -> Result<CancelWatchResponse> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(session_id)
        .ok_or_else(|| anyhow!("watch session not found: {session_id}"))?;

    session.cancel_flag.store(true, Ordering::Relaxed);
    if session.status == WatchSessionStatus::Waiting {
        session.status = WatchSessionStatus::Cancelled;
    }

    Ok(CancelWatchResponse {
        session_id: session_id.to_string(),
        status: session.status.clone(),
    })
}

/// Drops a finished session from the registry. Sessions are kept until the
/// host removes them so a final status can always be read back.
pub fn remove_watch_session(session_id: &str) -> Result<WatchSessionSnapshot> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get(session_id)
        .ok_or_else(|| anyhow!("watch session not found: {session_id}"))?;
    if session.status == WatchSessionStatus::Waiting {
        return Err(anyhow!(
            "watch session still running: {session_id}; cancel it first"
        ));
    }
    let session = sessions
        .remove(session_id)
        .ok_or_else(|| anyhow!("watch session not found: {session_id}"))?;

    Ok(WatchSessionSnapshot {
        session_id: session_id.to_string(),
        status: session.status,
        volume: session.volume,
        error: session.error,
    })
}

pub fn doctor(marker_path: Option<PathBuf>) -> Result<DoctorInfo> {
    let marker = MarkerCheck::new(marker_path.unwrap_or_else(default_marker_path));
    Ok(collect_doctor_info(&marker)?)
}

fn lock_sessions() -> Result<std::sync::MutexGuard<'static, HashMap<String, WatchSession>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("watch session registry lock poisoned"))
}
