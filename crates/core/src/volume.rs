use std::path::PathBuf;

use sysinfo::Disks;

use crate::error::WatchError;
use crate::model::{Volume, VolumeKind};

/// Raw per-volume data as reported by the OS, before classification.
#[derive(Debug, Clone)]
pub struct VolumeProbe {
    pub name: String,
    pub mount_point: String,
    pub file_system: Option<String>,
    pub is_removable: bool,
}

/// Anything that can list the currently mounted volumes.
pub trait VolumeSource {
    fn list_volumes(&self) -> Result<Vec<Volume>, WatchError>;
}

impl<S: VolumeSource + ?Sized> VolumeSource for &S {
    fn list_volumes(&self) -> Result<Vec<Volume>, WatchError> {
        (**self).list_volumes()
    }
}

/// Volumes reported by `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumes;

impl VolumeSource for SystemVolumes {
    fn list_volumes(&self) -> Result<Vec<Volume>, WatchError> {
        let disks = Disks::new_with_refreshed_list();
        let probes = disks
            .list()
            .iter()
            .map(|disk| {
                let file_system = disk.file_system().to_string_lossy().to_string();
                VolumeProbe {
                    name: disk.name().to_string_lossy().to_string(),
                    mount_point: disk.mount_point().to_string_lossy().to_string(),
                    file_system: (!file_system.is_empty()).then_some(file_system),
                    is_removable: disk.is_removable(),
                }
            })
            .collect::<Vec<_>>();
        Ok(classify_volumes(probes))
    }
}

pub fn classify_volumes(probes: Vec<VolumeProbe>) -> Vec<Volume> {
    let mut volumes = probes.into_iter().map(classify_volume).collect::<Vec<_>>();
    volumes.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    volumes
}

pub fn classify_volume(probe: VolumeProbe) -> Volume {
    let kind = classify_kind(&probe);
    Volume {
        id: volume_id(&probe.mount_point),
        label: probe.name,
        mount_point: PathBuf::from(probe.mount_point),
        kind,
        file_system: probe.file_system,
    }
}

fn classify_kind(probe: &VolumeProbe) -> VolumeKind {
    let mount = probe.mount_point.trim().to_lowercase();
    let fs = probe
        .file_system
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();

    if mount.is_empty() {
        return VolumeKind::NoRoot;
    }
    if probe.is_removable {
        return VolumeKind::Removable;
    }
    if contains_any(&fs, OPTICAL_FILE_SYSTEMS) {
        return VolumeKind::Optical;
    }
    if contains_any(&fs, RAM_FILE_SYSTEMS) {
        return VolumeKind::Ram;
    }
    if looks_network_mount(&mount, &fs) {
        return VolumeKind::Network;
    }
    if fs.is_empty() {
        return VolumeKind::Unknown;
    }
    VolumeKind::Fixed
}

/// Drive-letter mounts collapse to `X:`; other mounts lose trailing separators.
pub fn volume_id(mount_point: &str) -> String {
    let trimmed = mount_point.trim();
    let bytes = trimmed.as_bytes();
    let is_drive = bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && trimmed[2..].chars().all(|ch| ch == '\\' || ch == '/');
    if is_drive {
        return format!("{}:", trimmed[..1].to_ascii_uppercase());
    }

    if trimmed == "/" {
        return "/".to_string();
    }
    trimmed.trim_end_matches(['/', '\\']).to_string()
}

fn looks_network_mount(mount: &str, fs: &str) -> bool {
    mount.starts_with("\\\\") || mount.starts_with("//") || contains_any(fs, NETWORK_FILE_SYSTEMS)
}

fn contains_any(value: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|pattern| value.contains(pattern))
}

const OPTICAL_FILE_SYSTEMS: &[&str] = &["iso9660", "udf", "cdfs"];

const RAM_FILE_SYSTEMS: &[&str] = &["tmpfs", "ramfs"];

const NETWORK_FILE_SYSTEMS: &[&str] = &[
    "nfs", "cifs", "smb", "afp", "sshfs", "davfs", "webdav", "9p",
];
