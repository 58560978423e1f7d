//! Call records: the logical aggregate of one or more channel legs.

use crate::channel::Channel;
use crate::constants::*;
use crate::resolver::{Contact, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call direction as seen from the PBX users' side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Incoming => write!(f, "in"),
            CallDirection::Outgoing => write!(f, "out"),
        }
    }
}

/// Call status.  Starts at `Progress` and moves to exactly one terminal
/// value on the primary leg's Hangup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Progress,
    Answered,
    Busy,
    NoAnswer,
    Failed,
}

impl CallStatus {
    /// Terminal status for a primary-leg hangup cause code.
    pub fn from_hangup_cause(cause: &str) -> Self {
        match cause {
            CAUSE_NORMAL_CLEARING => CallStatus::Answered,
            CAUSE_USER_BUSY => CallStatus::Busy,
            CAUSE_NO_ANSWER => CallStatus::NoAnswer,
            _ => CallStatus::Failed,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Progress => write!(f, "progress"),
            CallStatus::Answered => write!(f, "answered"),
            CallStatus::Busy => write!(f, "busy"),
            CallStatus::NoAnswer => write!(f, "noanswer"),
            CallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Opaque pointer to a business record in an integrating module (a lead, a
/// task, an order).  The tracker never dereferences it; integrating modules
/// register a resolver per `kind` with the party resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: String,
    pub id: i64,
}

impl Reference {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

/// One line in a call's event journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Logical call aggregating all legs sharing one Linkedid.
///
/// Identified by the primary leg's Uniqueid.  `status` and `is_active`
/// move monotonically: once terminal, no later event revives the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    /// Primary leg's Uniqueid
    pub uniqueid: String,
    pub system_name: String,
    pub calling_number: String,
    pub called_number: String,
    pub started: DateTime<Utc>,
    pub answered: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    /// Resolved once by the party resolver, never reassigned
    pub direction: Option<CallDirection>,
    pub status: CallStatus,
    /// `true` from creation until the primary leg's Hangup is processed
    pub is_active: bool,
    /// Uniqueids of attached channels, in attachment order
    pub channels: Vec<String>,
    pub calling_user: Option<UserId>,
    pub called_user: Option<UserId>,
    /// Matched external contact
    pub partner: Option<Contact>,
    /// Business record this call relates to, supplied by integrating modules
    pub reference: Option<Reference>,
    /// Append-only journal of notable channel transitions
    pub events: Vec<CallEvent>,
}

impl Call {
    /// Open a call from its primary leg.
    pub fn from_channel(channel: &Channel, now: DateTime<Utc>) -> Self {
        Self {
            uniqueid: channel
                .uniqueid
                .clone(),
            system_name: channel
                .system_name
                .clone(),
            calling_number: channel
                .caller_id_num
                .clone(),
            called_number: channel
                .exten
                .clone(),
            started: now,
            answered: None,
            ended: None,
            direction: None,
            status: CallStatus::Progress,
            is_active: true,
            channels: Vec::new(),
            calling_user: None,
            called_user: None,
            partner: None,
            reference: None,
            events: Vec::new(),
        }
    }

    /// Attach a channel leg, ignoring duplicates.
    pub fn attach_channel(&mut self, uniqueid: &str) {
        if !self
            .channels
            .iter()
            .any(|id| id == uniqueid)
        {
            self.channels
                .push(uniqueid.to_string());
        }
    }

    /// Mark the call answered from the primary leg's `Up` transition.
    ///
    /// The answered timestamp is written once; replays and later secondary
    /// transitions leave it untouched.  No-op after the call went terminal.
    pub fn mark_answered(&mut self, at: DateTime<Utc>) {
        if !self.is_active || self.answered.is_some() {
            return;
        }
        self.answered = Some(at);
        self.status = CallStatus::Answered;
    }

    /// Finalize from the primary leg's hangup cause.  No-op when already
    /// terminal (duplicate Hangup).
    pub fn finalize(&mut self, cause: &str, now: DateTime<Utc>) {
        if !self.is_active {
            return;
        }
        self.status = CallStatus::from_hangup_cause(cause);
        self.is_active = false;
        self.ended = Some(now);
    }

    /// Append a journal entry.
    pub fn log_event(&mut self, at: DateTime<Utc>, text: impl Into<String>) {
        self.events
            .push(CallEvent {
                at,
                text: text.into(),
            });
    }

    /// Talk time, available once both answered and ended are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.answered, self.ended) {
            (Some(answered), Some(ended)) => Some(ended - answered),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AmiEvent, AmiEventType};

    fn primary_channel() -> Channel {
        let mut event = AmiEvent::with_type(AmiEventType::NewChannel);
        event.set_header("Uniqueid", "asterisk-1631528870.0");
        event.set_header("Linkedid", "asterisk-1631528870.0");
        event.set_header("Channel", "SIP/1001-000000bd");
        event.set_header("CallerIDNum", "1001");
        event.set_header("Exten", "1002");
        Channel::from_event_defensive(&event, Utc::now()).expect("lenient")
    }

    #[test]
    fn status_decision_table() {
        assert_eq!(CallStatus::from_hangup_cause("16"), CallStatus::Answered);
        assert_eq!(CallStatus::from_hangup_cause("17"), CallStatus::Busy);
        assert_eq!(CallStatus::from_hangup_cause("19"), CallStatus::NoAnswer);
        assert_eq!(CallStatus::from_hangup_cause("21"), CallStatus::Failed);
        assert_eq!(CallStatus::from_hangup_cause("0"), CallStatus::Failed);
    }

    #[test]
    fn from_channel_starts_in_progress() {
        let call = Call::from_channel(&primary_channel(), Utc::now());
        assert_eq!(call.status, CallStatus::Progress);
        assert!(call.is_active);
        assert_eq!(call.calling_number, "1001");
        assert_eq!(call.called_number, "1002");
        assert!(call
            .duration()
            .is_none());
    }

    #[test]
    fn attach_channel_dedupes() {
        let mut call = Call::from_channel(&primary_channel(), Utc::now());
        call.attach_channel("a");
        call.attach_channel("b");
        call.attach_channel("a");
        assert_eq!(call.channels, vec!["a", "b"]);
    }

    #[test]
    fn answered_timestamp_set_once() {
        let mut call = Call::from_channel(&primary_channel(), Utc::now());
        let first = Utc::now();
        call.mark_answered(first);
        call.mark_answered(first + Duration::seconds(5));
        assert_eq!(call.answered, Some(first));
        assert_eq!(call.status, CallStatus::Answered);
    }

    #[test]
    fn finalize_once_and_stay_terminal() {
        let mut call = Call::from_channel(&primary_channel(), Utc::now());
        let ended = Utc::now();
        call.finalize("17", ended);
        assert_eq!(call.status, CallStatus::Busy);
        assert!(!call.is_active);

        // A duplicate Hangup with a different cause must not re-finalize.
        call.finalize("16", ended + Duration::seconds(1));
        assert_eq!(call.status, CallStatus::Busy);
        assert_eq!(call.ended, Some(ended));

        // Nor may a late Up transition revive the call.
        call.mark_answered(ended + Duration::seconds(2));
        assert!(call
            .answered
            .is_none());
    }

    #[test]
    fn duration_from_answered_to_ended() {
        let mut call = Call::from_channel(&primary_channel(), Utc::now());
        let answered = Utc::now();
        call.mark_answered(answered);
        call.finalize("16", answered + Duration::seconds(42));
        assert_eq!(call.duration(), Some(Duration::seconds(42)));
    }
}
