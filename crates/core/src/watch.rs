use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::WatchError;
use crate::model::Volume;
use crate::volume::VolumeSource;

pub const DEFAULT_MARKER_PATH: &str = "GARMIN/GarminDevice.xml";

/// Identifies the tracker by a file that only exists on its storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCheck {
    relative: PathBuf,
}

impl MarkerCheck {
    pub fn new(relative: impl Into<PathBuf>) -> Self {
        Self {
            relative: relative.into(),
        }
    }

    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    /// I/O errors count as "no marker": a volume that vanishes or denies
    /// access mid-check is not the device.
    pub fn matches(&self, root: &Path) -> bool {
        let candidate = root.join(&self.relative);
        match candidate.try_exists() {
            Ok(exists) => exists,
            Err(err) => {
                debug!(
                    "marker check failed for {}: {}; treating as no match",
                    candidate.display(),
                    err
                );
                false
            }
        }
    }
}

impl Default for MarkerCheck {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_PATH)
    }
}

pub fn is_target(volume: &Volume, marker: &MarkerCheck) -> bool {
    volume.is_removable() && marker.matches(&volume.mount_point)
}

/// First matching volume in enumeration order.
pub fn find_target(volumes: &[Volume], marker: &MarkerCheck) -> Option<Volume> {
    volumes
        .iter()
        .find(|volume| is_target(volume, marker))
        .cloned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeEvent {
    Arrival,
    Removal,
}

/// Source of volume arrival/removal notifications.
pub trait VolumeChangeNotifier {
    /// Waits up to `timeout` for the next event. `Ok(None)` means nothing
    /// happened in that window.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<VolumeEvent>, WatchError>;

    fn close(&mut self);
}

/// Portable notifier that diffs volume snapshots on a fixed interval.
pub struct PollingNotifier<S> {
    source: S,
    known: BTreeSet<String>,
    pending: VecDeque<VolumeEvent>,
    poll_interval: Duration,
    last_poll: Instant,
    closed: bool,
}

impl<S: VolumeSource> PollingNotifier<S> {
    pub fn new(source: S, poll_interval: Duration) -> Result<Self, WatchError> {
        let known = snapshot_ids(&source)?;
        debug!("polling notifier started with {} known volume(s)", known.len());
        Ok(Self {
            source,
            known,
            pending: VecDeque::new(),
            poll_interval,
            last_poll: Instant::now(),
            closed: false,
        })
    }

    fn refresh(&mut self) -> Result<(), WatchError> {
        let current = snapshot_ids(&self.source)?;
        for id in current.difference(&self.known) {
            debug!("volume appeared: {id}");
            self.pending.push_back(VolumeEvent::Arrival);
        }
        for id in self.known.difference(&current) {
            debug!("volume disappeared: {id}");
            self.pending.push_back(VolumeEvent::Removal);
        }
        self.known = current;
        self.last_poll = Instant::now();
        Ok(())
    }
}

impl<S: VolumeSource> VolumeChangeNotifier for PollingNotifier<S> {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<VolumeEvent>, WatchError> {
        if self.closed {
            return Ok(None);
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let now = Instant::now();
            let next_poll = self.last_poll + self.poll_interval;
            if now >= next_poll {
                self.refresh()?;
                continue;
            }
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(next_poll.min(deadline) - now);
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

fn snapshot_ids<S: VolumeSource>(source: &S) -> Result<BTreeSet<String>, WatchError> {
    Ok(source
        .list_volumes()?
        .into_iter()
        .map(|volume| volume.id)
        .collect())
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub marker: MarkerCheck,
    pub poll_interval_ms: u64,
    pub idle_sleep_ms: u64,
    pub event_timeout_ms: u64,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            marker: MarkerCheck::default(),
            poll_interval_ms: 1_000,
            idle_sleep_ms: 10,
            event_timeout_ms: 250,
            cancel_flag: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Found(Volume),
    Cancelled,
}

pub struct DeviceWatcher<S> {
    source: S,
    options: WatchOptions,
}

impl<S: VolumeSource> DeviceWatcher<S> {
    pub fn new(source: S, options: WatchOptions) -> Self {
        Self { source, options }
    }

    pub fn options(&self) -> &WatchOptions {
        &self.options
    }

    pub fn list_volumes(&self) -> Result<Vec<Volume>, WatchError> {
        self.source.list_volumes()
    }

    pub fn find_target(&self) -> Result<Option<Volume>, WatchError> {
        let volumes = self.source.list_volumes()?;
        Ok(find_target(&volumes, &self.options.marker))
    }

    /// Blocks until the device is present, using the polling notifier.
    pub fn wait_for_target(&self) -> Result<WaitOutcome, WatchError>
    where
        S: Clone,
    {
        let poll_interval = Duration::from_millis(self.options.poll_interval_ms);
        self.wait_for_target_with(|| PollingNotifier::new(self.source.clone(), poll_interval))
    }

    /// `subscribe` is only invoked when the device is not already connected.
    pub fn wait_for_target_with<N, F>(&self, subscribe: F) -> Result<WaitOutcome, WatchError>
    where
        N: VolumeChangeNotifier,
        F: FnOnce() -> Result<N, WatchError>,
    {
        if let Some(volume) = self.find_target()? {
            log_found(&volume);
            return Ok(WaitOutcome::Found(volume));
        }
        if self.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }

        info!("waiting for device to be connected...");
        let mut notifier = subscribe()?;

        // The device may have arrived while subscribing.
        if let Some(volume) = self.find_target()? {
            notifier.close();
            log_found(&volume);
            return Ok(WaitOutcome::Found(volume));
        }

        let event_timeout = Duration::from_millis(self.options.event_timeout_ms);
        let idle_sleep = Duration::from_millis(self.options.idle_sleep_ms);
        loop {
            if self.is_cancelled() {
                info!("device wait canceled by caller");
                notifier.close();
                return Ok(WaitOutcome::Cancelled);
            }

            match notifier.next_event(event_timeout) {
                Ok(Some(VolumeEvent::Arrival)) => {
                    debug!("a device has been plugged in");
                    match self.find_target() {
                        Ok(Some(volume)) => {
                            notifier.close();
                            log_found(&volume);
                            return Ok(WaitOutcome::Found(volume));
                        }
                        Ok(None) => {}
                        Err(err) => {
                            notifier.close();
                            return Err(err);
                        }
                    }
                }
                Ok(Some(VolumeEvent::Removal)) => debug!("a device has been removed"),
                Ok(None) => {}
                Err(err) => {
                    notifier.close();
                    return Err(err);
                }
            }

            thread::sleep(idle_sleep);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

fn log_found(volume: &Volume) {
    info!(
        "device found at {} ({})",
        volume.mount_point.display(),
        volume.id
    );
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use std::time::Duration;

    use super::{
        find_target, is_target, DeviceWatcher, MarkerCheck, PollingNotifier, VolumeChangeNotifier,
        VolumeEvent, WaitOutcome, WatchOptions,
    };
    use crate::error::WatchError;
    use crate::model::{Volume, VolumeKind};
    use crate::volume::VolumeSource;

    fn volume(root: &Path, kind: VolumeKind) -> Volume {
        Volume {
            id: root.to_string_lossy().to_string(),
            label: "test".to_string(),
            mount_point: root.to_path_buf(),
            kind,
            file_system: Some("vfat".to_string()),
        }
    }

    fn with_marker(root: &Path) {
        let marker_dir = root.join("GARMIN");
        fs::create_dir_all(&marker_dir).expect("marker dir");
        fs::write(marker_dir.join("GarminDevice.xml"), "<Device/>").expect("marker file");
    }

    #[derive(Clone, Default)]
    struct SharedVolumes {
        volumes: Arc<Mutex<Vec<Volume>>>,
        calls: Arc<AtomicUsize>,
    }

    impl SharedVolumes {
        fn set(&self, volumes: Vec<Volume>) {
            *self.volumes.lock().expect("volumes lock") = volumes;
        }
    }

    impl VolumeSource for SharedVolumes {
        fn list_volumes(&self) -> Result<Vec<Volume>, WatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.volumes.lock().expect("volumes lock").clone())
        }
    }

    struct FailingVolumes;

    impl VolumeSource for FailingVolumes {
        fn list_volumes(&self) -> Result<Vec<Volume>, WatchError> {
            Err(WatchError::VolumeQuery("access denied".to_string()))
        }
    }

    /// Each step swaps in a new volume list, then delivers its event.
    struct ScriptedNotifier {
        source: SharedVolumes,
        steps: VecDeque<(Vec<Volume>, VolumeEvent)>,
        delivered: Arc<Mutex<Vec<VolumeEvent>>>,
        closed: Arc<AtomicBool>,
    }

    impl VolumeChangeNotifier for ScriptedNotifier {
        fn next_event(&mut self, _timeout: Duration) -> Result<Option<VolumeEvent>, WatchError> {
            match self.steps.pop_front() {
                Some((volumes, event)) => {
                    self.source.set(volumes);
                    self.delivered.lock().expect("delivered lock").push(event);
                    Ok(Some(event))
                }
                None => Err(WatchError::Notifier("script exhausted".to_string())),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn fast_options() -> WatchOptions {
        WatchOptions {
            poll_interval_ms: 1,
            idle_sleep_ms: 0,
            event_timeout_ms: 1,
            ..WatchOptions::default()
        }
    }

    #[test]
    fn removable_volume_with_marker_is_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        with_marker(dir.path());
        let marker = MarkerCheck::default();

        assert!(is_target(&volume(dir.path(), VolumeKind::Removable), &marker));
        assert!(!is_target(&volume(dir.path(), VolumeKind::Fixed), &marker));
    }

    #[test]
    fn missing_or_unreadable_root_is_not_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gone = dir.path().join("ejected");
        let marker = MarkerCheck::default();

        assert!(!is_target(&volume(dir.path(), VolumeKind::Removable), &marker));
        assert!(!is_target(&volume(&gone, VolumeKind::Removable), &marker));
    }

    #[test]
    fn find_target_prefers_enumeration_order() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        with_marker(first.path());
        with_marker(second.path());

        let volumes = vec![
            volume(second.path(), VolumeKind::Fixed),
            volume(first.path(), VolumeKind::Removable),
            volume(second.path(), VolumeKind::Removable),
        ];
        let found = find_target(&volumes, &MarkerCheck::default()).expect("target");
        assert_eq!(found.mount_point, first.path());
    }

    #[test]
    fn wait_returns_immediately_when_connected() {
        let dir = tempfile::tempdir().expect("tempdir");
        with_marker(dir.path());
        let source = SharedVolumes::default();
        source.set(vec![volume(dir.path(), VolumeKind::Removable)]);

        let watcher = DeviceWatcher::new(source.clone(), fast_options());
        let subscribed = AtomicBool::new(false);
        let outcome = watcher
            .wait_for_target_with(|| {
                subscribed.store(true, Ordering::SeqCst);
                Err::<ScriptedNotifier, _>(WatchError::Notifier("unused".to_string()))
            })
            .expect("wait succeeds");

        assert!(matches!(outcome, WaitOutcome::Found(found) if found.mount_point == dir.path()));
        assert!(!subscribed.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_unblocks_on_arrival_not_removal() {
        let dir = tempfile::tempdir().expect("tempdir");
        with_marker(dir.path());
        let target = volume(dir.path(), VolumeKind::Removable);
        let source = SharedVolumes::default();

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let notifier = ScriptedNotifier {
            source: source.clone(),
            steps: VecDeque::from(vec![
                (vec![target.clone()], VolumeEvent::Removal),
                (vec![target.clone()], VolumeEvent::Arrival),
            ]),
            delivered: Arc::clone(&delivered),
            closed: Arc::clone(&closed),
        };

        let watcher = DeviceWatcher::new(source, fast_options());
        let outcome = watcher
            .wait_for_target_with(|| Ok(notifier))
            .expect("wait succeeds");

        assert_eq!(outcome, WaitOutcome::Found(target));
        assert_eq!(
            *delivered.lock().expect("delivered lock"),
            vec![VolumeEvent::Removal, VolumeEvent::Arrival]
        );
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn arrival_of_other_volume_keeps_waiting() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stick = tempfile::tempdir().expect("tempdir");
        with_marker(dir.path());
        let target = volume(dir.path(), VolumeKind::Removable);
        let other = volume(stick.path(), VolumeKind::Removable);
        let source = SharedVolumes::default();

        let notifier = ScriptedNotifier {
            source: source.clone(),
            steps: VecDeque::from(vec![
                (vec![other.clone()], VolumeEvent::Arrival),
                (vec![other.clone(), target.clone()], VolumeEvent::Arrival),
            ]),
            delivered: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let watcher = DeviceWatcher::new(source, fast_options());
        let outcome = watcher
            .wait_for_target_with(|| Ok(notifier))
            .expect("wait succeeds");
        assert_eq!(outcome, WaitOutcome::Found(target));
    }

    #[test]
    fn cancel_flag_ends_wait_without_match() {
        let source = SharedVolumes::default();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let options = WatchOptions {
            cancel_flag: Some(Arc::clone(&cancel_flag)),
            ..fast_options()
        };
        let watcher = DeviceWatcher::new(source.clone(), options);

        let flag = Arc::clone(&cancel_flag);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::Relaxed);
        });

        let outcome = watcher.wait_for_target().expect("wait succeeds");
        handle.join().expect("cancel thread");
        assert_eq!(outcome, WaitOutcome::Cancelled);
        assert!(source.calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn enumeration_failure_is_surfaced() {
        let watcher = DeviceWatcher::new(FailingVolumes, fast_options());
        let result = watcher.wait_for_target_with(|| {
            Err::<ScriptedNotifier, _>(WatchError::Notifier("unused".to_string()))
        });
        assert!(matches!(result, Err(WatchError::VolumeQuery(_))));
    }

    #[test]
    fn polling_notifier_reports_arrivals_and_removals() {
        let source = SharedVolumes::default();
        let a = tempfile::tempdir().expect("tempdir");
        let b = tempfile::tempdir().expect("tempdir");
        source.set(vec![volume(a.path(), VolumeKind::Fixed)]);

        let mut notifier =
            PollingNotifier::new(source.clone(), Duration::from_millis(1)).expect("notifier");
        assert_eq!(
            notifier
                .next_event(Duration::from_millis(5))
                .expect("poll"),
            None
        );

        source.set(vec![volume(b.path(), VolumeKind::Removable)]);
        let mut events = Vec::new();
        while let Some(event) = notifier
            .next_event(Duration::from_millis(20))
            .expect("poll")
        {
            events.push(event);
        }
        assert_eq!(events, vec![VolumeEvent::Arrival, VolumeEvent::Removal]);

        notifier.close();
        source.set(Vec::new());
        assert_eq!(
            notifier
                .next_event(Duration::from_millis(5))
                .expect("poll"),
            None
        );
    }
}
