//! Channel records: one Asterisk channel leg reconstructed from events.

use crate::constants::*;
use crate::error::TrackerResult;
use crate::event::AmiEvent;
use crate::recording::RecordingState;
use crate::resolver::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strip the Asterisk unique suffix from a channel name.
///
/// `SIP/1001-000000bd` becomes `SIP/1001`.  Names without a `-` are
/// returned unchanged.
pub fn strip_unique_suffix(name: &str) -> &str {
    match name.rfind('-') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// One channel leg.
///
/// Created on the first NewChannel (or defensive Newstate) naming an unseen
/// Uniqueid, mutated by subsequent events for the same Uniqueid, finalized
/// by Hangup.  `uniqueid` and `linkedid` are immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    /// Asterisk-assigned leg identifier, e.g. `asterisk-1631528870.0`
    pub uniqueid: String,
    /// Uniqueid of the leg that originated the overall call
    pub linkedid: String,
    /// Channel name, e.g. `SIP/1001-000000bd`
    pub name: String,
    /// Uniqueid of the owning call, set once correlation succeeds
    pub call_uniqueid: Option<String>,
    /// PBX server identity, the partition key for all lookups
    pub system_name: String,
    /// Channel state code
    pub state: String,
    /// Channel state description
    pub state_desc: String,
    pub caller_id_num: String,
    pub caller_id_name: String,
    pub connected_line_num: String,
    pub connected_line_name: String,
    pub context: String,
    pub exten: String,
    pub priority: String,
    pub account_code: String,
    pub language: String,
    /// Current dialplan application, when reported
    pub app: String,
    /// Current application data, when reported
    pub app_data: String,
    /// Hangup cause code, set exactly once
    pub cause: Option<String>,
    /// Hangup cause text
    pub cause_txt: Option<String>,
    pub created: DateTime<Utc>,
    pub hangup_at: Option<DateTime<Utc>>,
    /// MixMonitor output path captured from VarSet
    pub recording_path: Option<String>,
    /// Recording pipeline state for this leg
    pub recording: RecordingState,
    /// PBX user owning this channel, when resolved
    pub user: Option<UserId>,
}

impl Channel {
    /// Build a channel from a NewChannel event.  All keys of the NewChannel
    /// schema are required; a missing key fails the whole event.
    pub fn from_event(event: &AmiEvent, now: DateTime<Utc>) -> TrackerResult<Self> {
        Ok(Self {
            uniqueid: event
                .require(HEADER_UNIQUEID)?
                .to_string(),
            linkedid: event
                .require(HEADER_LINKEDID)?
                .to_string(),
            name: event
                .require(HEADER_CHANNEL)?
                .to_string(),
            call_uniqueid: None,
            system_name: event
                .require(HEADER_SYSTEM_NAME)?
                .to_string(),
            state: event
                .require("ChannelState")?
                .to_string(),
            state_desc: event
                .require("ChannelStateDesc")?
                .to_string(),
            caller_id_num: event
                .require("CallerIDNum")?
                .to_string(),
            caller_id_name: event
                .require("CallerIDName")?
                .to_string(),
            connected_line_num: event
                .require("ConnectedLineNum")?
                .to_string(),
            connected_line_name: event
                .require("ConnectedLineName")?
                .to_string(),
            context: event
                .require("Context")?
                .to_string(),
            exten: event
                .require("Exten")?
                .to_string(),
            priority: event
                .require("Priority")?
                .to_string(),
            account_code: event
                .require("AccountCode")?
                .to_string(),
            language: event
                .require("Language")?
                .to_string(),
            app: event
                .header_or_default("Application")
                .to_string(),
            app_data: event
                .header_or_default("ApplicationData")
                .to_string(),
            cause: None,
            cause_txt: None,
            created: now,
            hangup_at: None,
            recording_path: None,
            recording: RecordingState::NoRecording,
            user: None,
        })
    }

    /// Build a channel from a Newstate event observed before its NewChannel.
    ///
    /// Asterisk may emit Newstate first after an agent restart, so only
    /// `Uniqueid` and `Channel` are required here; `Linkedid` falls back to
    /// `Uniqueid` and the remaining fields default to empty.
    pub fn from_event_defensive(event: &AmiEvent, now: DateTime<Utc>) -> TrackerResult<Self> {
        let uniqueid = event
            .require(HEADER_UNIQUEID)?
            .to_string();
        let linkedid = event
            .linked_id()
            .unwrap_or(&uniqueid)
            .to_string();
        Ok(Self {
            linkedid,
            name: event
                .require(HEADER_CHANNEL)?
                .to_string(),
            call_uniqueid: None,
            system_name: event
                .system_name()
                .to_string(),
            state: event
                .header_or_default("ChannelState")
                .to_string(),
            state_desc: event
                .header_or_default("ChannelStateDesc")
                .to_string(),
            caller_id_num: event
                .header_or_default("CallerIDNum")
                .to_string(),
            caller_id_name: event
                .header_or_default("CallerIDName")
                .to_string(),
            connected_line_num: event
                .header_or_default("ConnectedLineNum")
                .to_string(),
            connected_line_name: event
                .header_or_default("ConnectedLineName")
                .to_string(),
            context: event
                .header_or_default("Context")
                .to_string(),
            exten: event
                .header_or_default("Exten")
                .to_string(),
            priority: event
                .header_or_default("Priority")
                .to_string(),
            account_code: event
                .header_or_default("AccountCode")
                .to_string(),
            language: event
                .header_or_default("Language")
                .to_string(),
            app: String::new(),
            app_data: String::new(),
            cause: None,
            cause_txt: None,
            created: now,
            hangup_at: None,
            recording_path: None,
            recording: RecordingState::NoRecording,
            user: None,
            uniqueid,
        })
    }

    /// Shortened name for user-channel matching: `SIP/1001-000000bd`
    /// becomes `SIP/1001`.
    pub fn short_name(&self) -> &str {
        strip_unique_suffix(&self.name)
    }

    /// `true` if this leg originated the call (`uniqueid == linkedid`).
    pub fn is_primary(&self) -> bool {
        self.uniqueid == self.linkedid
    }

    /// `true` once Hangup (or a confirmed originate failure) set the cause.
    pub fn is_finalized(&self) -> bool {
        self.cause
            .is_some()
    }

    /// Apply mutable fields from a Newstate / NewChannel replay.
    ///
    /// Finalization fields (`cause`, `cause_txt`, `hangup_at`) are never
    /// touched here.  `uniqueid` and `linkedid` are immutable.  Returns
    /// `false` without writing when the channel is already finalized, since
    /// Hangup is causally final for a Uniqueid.
    pub fn apply_state(&mut self, event: &AmiEvent) -> bool {
        if self.is_finalized() {
            return false;
        }
        let mut set = |field: &mut String, header: &str| {
            if let Some(value) = event.header(header) {
                *field = value.to_string();
            }
        };
        set(&mut self.name, HEADER_CHANNEL);
        set(&mut self.state, "ChannelState");
        set(&mut self.state_desc, "ChannelStateDesc");
        set(&mut self.caller_id_num, "CallerIDNum");
        set(&mut self.caller_id_name, "CallerIDName");
        set(&mut self.connected_line_num, "ConnectedLineNum");
        set(&mut self.connected_line_name, "ConnectedLineName");
        set(&mut self.context, "Context");
        set(&mut self.exten, "Exten");
        set(&mut self.priority, "Priority");
        set(&mut self.account_code, "AccountCode");
        set(&mut self.language, "Language");
        set(&mut self.app, "Application");
        set(&mut self.app_data, "ApplicationData");
        true
    }

    /// Record the MixMonitor output path from a VarSet event.
    pub fn capture_recording_path(&mut self, path: &str) {
        self.recording_path = Some(path.to_string());
        if self.recording == RecordingState::NoRecording {
            self.recording = RecordingState::PathCaptured;
        }
    }

    /// Set cause, cause text and hangup timestamp exactly once.
    ///
    /// Returns `false` when the channel was already finalized (duplicate or
    /// late event) — the existing values are kept.
    pub fn finalize(&mut self, cause: &str, cause_txt: &str, now: DateTime<Utc>) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.cause = Some(cause.to_string());
        self.cause_txt = Some(cause_txt.to_string());
        self.hangup_at = Some(now);
        true
    }
}
