use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("volume enumeration failed: {0}")]
    VolumeQuery(String),
    #[error("volume change notifier failed: {0}")]
    Notifier(String),
}
