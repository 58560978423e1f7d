//! Error types for AMI call tracking.
//!
//! All fallible operations in this crate return [`TrackerResult<T>`].  Errors
//! are classified into two axes for caller convenience:
//!
//! - **Stale references** ([`TrackerError::is_stale`]) — the event names a
//!   channel or call this tracker does not know.  Expected under
//!   at-least-once delivery; logged at debug level, never fatal.
//! - **Executor errors** ([`ExecutorError`]) — the remote job transport
//!   failed.  Auth expiry is retried once by [`crate::executor::run_job`];
//!   connection and transport errors surface to the immediate caller.

use thiserror::Error;

/// Result type alias for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors raised while reducing AMI events into call state.
///
/// None of these ever propagate out of the event dispatch loop: the
/// tracker catches and logs them so one malformed event cannot halt the
/// stream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TrackerError {
    /// A required event header was absent
    #[error("Missing required header: {header}")]
    MissingHeader { header: String },

    /// Event names a Uniqueid with no matching channel record
    #[error("Unknown channel: {uniqueid}")]
    UnknownChannel { uniqueid: String },

    /// Event names a Linkedid with no matching call record
    #[error("Unknown call: {uniqueid}")]
    UnknownCall { uniqueid: String },

    /// A failure signal arrived after Hangup already finalized the channel
    #[error("Channel already finalized: {uniqueid}")]
    AlreadyFinalized { uniqueid: String },

    /// OriginateResponse with a `Response` other than `Failure`
    #[error("Unexpected originate response: {response}")]
    UnexpectedResponse { response: String },

    /// Event carries a SystemName this tracker does not serve
    #[error("Event from server {got}, tracker serves {expected}")]
    ServerMismatch { expected: String, got: String },

    /// JSON parsing error in a relayed event payload
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote job submission failed
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),
}

impl TrackerError {
    pub fn missing_header(header: impl Into<String>) -> Self {
        Self::MissingHeader {
            header: header.into(),
        }
    }

    pub fn unknown_channel(uniqueid: impl Into<String>) -> Self {
        Self::UnknownChannel {
            uniqueid: uniqueid.into(),
        }
    }

    /// `true` if the error is an expected artifact of at-least-once,
    /// out-of-order delivery rather than a defect.
    ///
    /// Matches: `UnknownChannel`, `UnknownCall`, `AlreadyFinalized`.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            TrackerError::UnknownChannel { .. }
                | TrackerError::UnknownCall { .. }
                | TrackerError::AlreadyFinalized { .. }
        )
    }
}

/// Errors from the remote job executor collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The agent session expired; re-authenticate and retry once
    #[error("Authentication expired")]
    AuthExpired,

    /// Connection-level failure (reset, refused, unreachable)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Transport-level failure (bad URL, malformed response)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The job did not complete within the caller-specified timeout
    #[error("Job timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The agent rejected the job
    #[error("Job rejected: {message}")]
    Rejected { message: String },
}

impl ExecutorError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// `true` if re-authenticating and resubmitting may succeed.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ExecutorError::AuthExpired)
    }

    /// `true` if the agent link is down and the operation is fatal as-is.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ExecutorError::Connection { .. } | ExecutorError::Transport { .. }
        )
    }
}

/// Failure of an optional enrichment step (transcription, transcoding).
///
/// These degrade gracefully: the recording is still persisted without the
/// enrichment that failed.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct EnrichmentError {
    pub message: String,
}

impl EnrichmentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
