//! Call recording capture and retrieval.
//!
//! Recording paths are announced mid-call by MixMonitor through a VarSet
//! event; the audio itself stays on the PBX host until the call ends
//! normally, at which point the tracker pulls it through the remote job
//! executor.  Transcoding and transcription are best effort: their failure
//! never fails the recording itself.

use crate::channel::Channel;
use crate::config::TrackerConfig;
use crate::constants::CAUSE_NORMAL_CLEARING;
use crate::error::{EnrichmentError, TrackerError, TrackerResult};
use crate::executor::{run_job, JobPayload, JobRequest, RemoteExecutor};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-channel recording lifecycle.
///
/// Moves forward only: a channel whose recording completed or was skipped
/// never returns to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    /// No recording path announced for this channel
    NoRecording,
    /// MixMonitor announced the file path, audio still remote
    PathCaptured,
    /// Fetch job submitted to the remote agent
    FetchRequested,
    /// Audio fetched and stored
    Completed,
    /// Gate rejected the fetch (wrong cause, stale channel, replay)
    Skipped,
}

/// A stored call recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// Uniqueid of the channel that carried the MixMonitor
    pub channel_uniqueid: String,
    /// Uniqueid of the owning call
    pub call_uniqueid: String,
    /// Original path on the PBX host
    pub source_path: String,
    /// File name the audio is stored under
    pub file_name: String,
    pub data: Vec<u8>,
    /// Best-effort transcript, absent when transcription is off or failed
    pub transcript: Option<String>,
    /// Exempt from retention sweeps
    pub keep_forever: bool,
    pub created: DateTime<Utc>,
}

/// Speech-to-text backend.  Failures degrade to "no transcript".
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &[u8]) -> Result<String, EnrichmentError>;
}

/// Audio format converter, e.g. wav to mp3.  Failures keep the original.
pub trait Transcoder: Send + Sync {
    /// Returns the converted audio and the new file extension.
    fn transcode(&self, audio: Vec<u8>) -> Result<(Vec<u8>, String), EnrichmentError>;
}

/// Fetch gate, checked when the primary leg hangs up.
///
/// All three must hold: the call cleared normally (cause 16), a MixMonitor
/// path was captured, and the channel is recent.  The recency bound rejects
/// replays of old hangups that would otherwise re-pull long-deleted files.
pub fn recording_wanted(
    channel: &Channel,
    cause: &str,
    now: DateTime<Utc>,
    config: &TrackerConfig,
) -> bool {
    if cause != CAUSE_NORMAL_CLEARING {
        return false;
    }
    if channel.recording != RecordingState::PathCaptured {
        return false;
    }
    let age = now - channel.created;
    if age > Duration::seconds(config.recording_recency_secs) {
        debug!(
            "Channel {} is {}s old, past the recording recency window",
            channel.uniqueid,
            age.num_seconds()
        );
        return false;
    }
    true
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Pulls announced recordings off the PBX host and enriches them.
pub struct RecordingPipeline {
    executor: Arc<dyn RemoteExecutor>,
    transcriber: Option<Arc<dyn Transcriber>>,
    transcoder: Option<Arc<dyn Transcoder>>,
}

impl RecordingPipeline {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            transcriber: None,
            transcoder: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    /// Fetch the announced audio for `channel` and build the recording.
    ///
    /// The channel must already be in `FetchRequested` state with a
    /// captured path.  Transcoding and transcription run only when both
    /// the backend is wired and the matching config toggle is on.  Remote
    /// deletion of the source file, when configured, runs after the audio
    /// is safely in hand and is itself best effort.
    pub async fn fetch(
        &self,
        channel: &Channel,
        config: &TrackerConfig,
        now: DateTime<Utc>,
    ) -> TrackerResult<Recording> {
        let path = channel
            .recording_path
            .as_deref()
            .ok_or_else(|| TrackerError::unknown_channel(&channel.uniqueid))?;
        let call_uniqueid = channel
            .call_uniqueid
            .clone()
            .unwrap_or_else(|| channel.linkedid.clone());

        let payload = run_job(
            self.executor
                .as_ref(),
            JobRequest::get_file(path),
            config.fetch_timeout_secs,
        )
        .await?;
        let data = match payload {
            JobPayload::FileData(data) => data,
            other => {
                return Err(TrackerError::UnexpectedResponse {
                    response: format!("{:?}", other),
                })
            }
        };
        info!(
            "Fetched recording for channel {}, {} bytes from {}",
            channel.uniqueid,
            data.len(),
            path
        );

        let (data, file_name) = if config.transcode_recordings {
            self.transcode(data, file_name_of(path))
        } else {
            (data, file_name_of(path).to_string())
        };
        let transcript = if config.transcribe_recordings {
            self.transcribe(&data)
        } else {
            None
        };

        if config.delete_remote_recordings {
            self.delete_remote(path, config)
                .await;
        }

        Ok(Recording {
            channel_uniqueid: channel
                .uniqueid
                .clone(),
            call_uniqueid,
            source_path: path.to_string(),
            file_name,
            data,
            transcript,
            keep_forever: false,
            created: now,
        })
    }

    fn transcode(&self, data: Vec<u8>, file_name: &str) -> (Vec<u8>, String) {
        let Some(transcoder) = &self.transcoder else {
            return (data, file_name.to_string());
        };
        match transcoder.transcode(data.clone()) {
            Ok((converted, extension)) => {
                let stem = file_name
                    .rsplit_once('.')
                    .map(|(stem, _)| stem)
                    .unwrap_or(file_name);
                (converted, format!("{}.{}", stem, extension))
            }
            Err(err) => {
                warn!("Transcoding failed, keeping original audio: {}", err);
                (data, file_name.to_string())
            }
        }
    }

    fn transcribe(&self, data: &[u8]) -> Option<String> {
        let transcriber = self
            .transcriber
            .as_ref()?;
        match transcriber.transcribe(data) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("Transcription failed: {}", err);
                None
            }
        }
    }

    async fn delete_remote(&self, path: &str, config: &TrackerConfig) {
        match run_job(
            self.executor
                .as_ref(),
            JobRequest::delete_file(path),
            config.fetch_timeout_secs,
        )
        .await
        {
            Ok(_) => debug!("Deleted remote recording {}", path),
            Err(err) => warn!("Could not delete remote recording {}: {}", path, err),
        }
    }
}
