//! Tracker configuration snapshot.
//!
//! Handlers never read settings from a global store; the tracker holds one
//! immutable [`TrackerConfig`] snapshot and replaces it wholesale when the
//! embedding signals a settings change via
//! [`crate::tracker::CallTracker::reload_config`].

use crate::constants::*;

/// Read-only settings snapshot injected into the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Log the full header map of every processed event at debug level
    pub trace_events: bool,
    /// Reject recording fetches when the channel is older than this
    pub recording_recency_secs: i64,
    /// Remote file-fetch timeout passed to the job executor
    pub fetch_timeout_secs: u64,
    /// Run the transcriber on fetched recordings
    pub transcribe_recordings: bool,
    /// Run the transcoder on fetched recordings
    pub transcode_recordings: bool,
    /// Delete the remote audio file once the recording is persisted
    pub delete_remote_recordings: bool,
    /// Retention for terminal channel records
    pub channels_keep_hours: i64,
    /// Retention for ended calls
    pub calls_keep_days: i64,
    /// Retention for recordings not flagged keep-forever
    pub recordings_keep_days: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            trace_events: false,
            recording_recency_secs: RECORDING_RECENCY_WINDOW_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            transcribe_recordings: false,
            transcode_recordings: false,
            delete_remote_recordings: false,
            channels_keep_hours: DEFAULT_CHANNELS_KEEP_HOURS,
            calls_keep_days: DEFAULT_CALLS_KEEP_DAYS,
            recordings_keep_days: DEFAULT_RECORDINGS_KEEP_DAYS,
        }
    }
}
