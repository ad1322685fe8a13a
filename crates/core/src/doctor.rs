use std::env;

use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::model::Volume;
use crate::volume::{SystemVolumes, VolumeSource};
use crate::watch::{find_target, is_target, MarkerCheck};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeStatus {
    #[serde(flatten)]
    pub volume: Volume,
    pub is_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub marker_path: String,
    pub volumes: Vec<VolumeStatus>,
    pub target: Option<Volume>,
    pub notes: Vec<String>,
}

pub fn collect_doctor_info(marker: &MarkerCheck) -> Result<DoctorInfo, WatchError> {
    build_doctor_info(&SystemVolumes, marker)
}

pub fn build_doctor_info<S: VolumeSource>(
    source: &S,
    marker: &MarkerCheck,
) -> Result<DoctorInfo, WatchError> {
    let current_dir = env::current_dir()
        .ok()
        .map(|path| path.to_string_lossy().to_string());

    let volumes = source.list_volumes()?;
    let target = find_target(&volumes, marker);
    let statuses = volumes
        .into_iter()
        .map(|volume| VolumeStatus {
            is_target: is_target(&volume, marker),
            volume,
        })
        .collect::<Vec<_>>();

    let mut notes = vec!["Device storage is only ever read; nothing is written to it.".to_string()];
    if statuses.is_empty() {
        notes.push("No volumes detected by sysinfo.".to_string());
    } else if !statuses.iter().any(|status| status.volume.is_removable()) {
        notes.push("No removable volumes detected; is the device connected in mass storage mode?".to_string());
    }
    if target.is_none() {
        notes.push(format!(
            "No removable volume contains the marker path {}.",
            marker.relative_path().display()
        ));
    }

    Ok(DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        current_dir,
        marker_path: marker.relative_path().to_string_lossy().to_string(),
        volumes: statuses,
        target,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::build_doctor_info;
    use crate::error::WatchError;
    use crate::model::{Volume, VolumeKind};
    use crate::volume::VolumeSource;
    use crate::watch::MarkerCheck;

    struct FixedVolumes(Vec<Volume>);

    impl VolumeSource for FixedVolumes {
        fn list_volumes(&self) -> Result<Vec<Volume>, WatchError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn reports_target_and_statuses() {
        let device = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(device.path().join("GARMIN")).expect("dir");
        fs::write(device.path().join("GARMIN/GarminDevice.xml"), "<Device/>").expect("marker");

        let volumes = vec![
            Volume {
                id: "/".to_string(),
                label: "root".to_string(),
                mount_point: "/".into(),
                kind: VolumeKind::Fixed,
                file_system: Some("ext4".to_string()),
            },
            Volume {
                id: "watch".to_string(),
                label: "GARMIN".to_string(),
                mount_point: device.path().to_path_buf(),
                kind: VolumeKind::Removable,
                file_system: Some("vfat".to_string()),
            },
        ];

        let info = build_doctor_info(&FixedVolumes(volumes), &MarkerCheck::default())
            .expect("doctor info");
        assert_eq!(info.volumes.len(), 2);
        assert!(!info.volumes[0].is_target);
        assert!(info.volumes[1].is_target);
        assert_eq!(info.target.map(|volume| volume.id), Some("watch".to_string()));
    }

    #[test]
    fn notes_missing_device() {
        let info = build_doctor_info(&FixedVolumes(Vec::new()), &MarkerCheck::default())
            .expect("doctor info");
        assert!(info.target.is_none());
        assert!(info.notes.len() >= 2);
    }
}
