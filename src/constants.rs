//! Protocol constants and default configuration values

/// Hangup cause: normal clearing — the call was answered and completed.
pub const CAUSE_NORMAL_CLEARING: &str = "16";

/// Hangup cause: the called party was busy.
pub const CAUSE_USER_BUSY: &str = "17";

/// Hangup cause: no answer from the called party.
pub const CAUSE_NO_ANSWER: &str = "19";

/// Channel variable carrying the MixMonitor output file path.
pub const MIXMONITOR_FILENAME_VAR: &str = "MIXMONITOR_FILENAME";

/// Channel state description reported once a leg is answered.
pub const CHANNEL_STATE_UP: &str = "Up";

/// Caller ID values Asterisk emits when no caller ID is available.
/// These must never be passed to a directory lookup.
pub const SENTINEL_CALLER_IDS: &[&str] = &["", "unknown", "s"];

/// System name used when an event carries no `SystemName` header.
pub const DEFAULT_SYSTEM_NAME: &str = "asterisk";

/// AMI header names
pub const HEADER_EVENT: &str = "Event";
pub const HEADER_UNIQUEID: &str = "Uniqueid";
pub const HEADER_LINKEDID: &str = "Linkedid";
pub const HEADER_CHANNEL: &str = "Channel";
pub const HEADER_SYSTEM_NAME: &str = "SystemName";

/// Remote agent function names
pub const FUN_MANAGER_ACTION: &str = "asterisk.manager_action";
pub const FUN_GET_FILE: &str = "asterisk.get_file";
pub const FUN_DELETE_FILE: &str = "asterisk.delete_file";

/// A Hangup arriving long after the channel was created is assumed to
/// reference a reused Uniqueid from before a PBX restart; the recording
/// fetch is not requested past this window.
pub const RECORDING_RECENCY_WINDOW_SECS: i64 = 60;

/// Default remote file-fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default retention for terminal channel records, in hours.
pub const DEFAULT_CHANNELS_KEEP_HOURS: i64 = 24;

/// Default retention for ended calls, in days.
pub const DEFAULT_CALLS_KEEP_DAYS: i64 = 90;

/// Default retention for recordings, in days.
pub const DEFAULT_RECORDINGS_KEEP_DAYS: i64 = 90;

/// Maximum number of cached directory lookups before the cache is reset.
pub const MAX_DIRECTORY_CACHE_ENTRIES: usize = 4096;
