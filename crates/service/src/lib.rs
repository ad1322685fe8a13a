pub mod service;

pub use service::{
    cancel_watch, doctor, get_watch_session, remove_watch_session, start_watch, start_watch_with,
    CancelWatchResponse, WatchRequest, WatchSessionSnapshot, WatchSessionStatus,
};
