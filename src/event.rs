//! AMI event types and structures
//!
//! Events arrive from the remote PBX agent as flat key-value maps, one per
//! AMI message.  [`AmiEvent`] keeps the raw headers and exposes typed
//! accessors for the fields the tracker consumes.

use crate::constants::*;
use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// AMI event kinds the tracker subscribes to.
///
/// Dispatch is an explicit match on this enum rather than a method name
/// derived from the event string, so unhandled kinds are visible at the
/// dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmiEventType {
    NewChannel,
    NewState,
    NewConnectedLine,
    NewCallerId,
    NewExten,
    DialBegin,
    DialEnd,
    Hangup,
    VarSet,
    OriginateResponse,
    MusicOnHoldStart,
    MusicOnHoldStop,
    Cdr,
    PeerStatus,
    FullyBooted,
}

impl fmt::Display for AmiEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AmiEventType::NewChannel => "Newchannel",
            AmiEventType::NewState => "Newstate",
            AmiEventType::NewConnectedLine => "NewConnectedLine",
            AmiEventType::NewCallerId => "NewCallerid",
            AmiEventType::NewExten => "NewExten",
            AmiEventType::DialBegin => "DialBegin",
            AmiEventType::DialEnd => "DialEnd",
            AmiEventType::Hangup => "Hangup",
            AmiEventType::VarSet => "VarSet",
            AmiEventType::OriginateResponse => "OriginateResponse",
            AmiEventType::MusicOnHoldStart => "MusicOnHoldStart",
            AmiEventType::MusicOnHoldStop => "MusicOnHoldStop",
            AmiEventType::Cdr => "Cdr",
            AmiEventType::PeerStatus => "PeerStatus",
            AmiEventType::FullyBooted => "FullyBooted",
        };
        write!(f, "{}", name)
    }
}

impl AmiEventType {
    /// Parse event type from the `Event` header value.
    ///
    /// Matching is case-insensitive: Asterisk emits `Newchannel` but older
    /// agents relay `NewChannel`.
    pub fn parse_event_type(s: &str) -> Option<Self> {
        match s
            .to_uppercase()
            .as_str()
        {
            "NEWCHANNEL" => Some(AmiEventType::NewChannel),
            "NEWSTATE" => Some(AmiEventType::NewState),
            "NEWCONNECTEDLINE" => Some(AmiEventType::NewConnectedLine),
            "NEWCALLERID" => Some(AmiEventType::NewCallerId),
            "NEWEXTEN" => Some(AmiEventType::NewExten),
            "DIALBEGIN" => Some(AmiEventType::DialBegin),
            "DIALEND" => Some(AmiEventType::DialEnd),
            "HANGUP" => Some(AmiEventType::Hangup),
            "VARSET" => Some(AmiEventType::VarSet),
            "ORIGINATERESPONSE" => Some(AmiEventType::OriginateResponse),
            "MUSICONHOLDSTART" => Some(AmiEventType::MusicOnHoldStart),
            "MUSICONHOLDSTOP" => Some(AmiEventType::MusicOnHoldStop),
            "CDR" => Some(AmiEventType::Cdr),
            "PEERSTATUS" => Some(AmiEventType::PeerStatus),
            "FULLYBOOTED" => Some(AmiEventType::FullyBooted),
            _ => None,
        }
    }
}

/// One AMI message: the event kind plus its flat header map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiEvent {
    /// Event type, `None` when the `Event` header is absent or unknown
    pub event_type: Option<AmiEventType>,
    /// Event headers as key-value pairs
    pub headers: HashMap<String, String>,
}

impl AmiEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self {
            event_type: None,
            headers: HashMap::new(),
        }
    }

    /// Create event with specified type, setting the `Event` header to match
    pub fn with_type(event_type: AmiEventType) -> Self {
        let mut event = Self {
            event_type: Some(event_type),
            headers: HashMap::new(),
        };
        event.set_header(HEADER_EVENT, &event_type.to_string());
        event
    }

    /// Parse an event from the JSON map the remote agent relays.
    ///
    /// Non-string values are stringified; the event type is derived from
    /// the `Event` key.
    pub fn from_json(raw: &str) -> TrackerResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let mut event = AmiEvent::new();

        if let Some(obj) = value.as_object() {
            for (key, value) in obj {
                let value_str = match value {
                    serde_json::Value::String(s) => s.clone(),
                    _ => value.to_string(),
                };
                event
                    .headers
                    .insert(key.clone(), value_str);
            }
            if let Some(name) = event.header(HEADER_EVENT) {
                event.event_type = AmiEventType::parse_event_type(name);
            }
        }

        Ok(event)
    }

    /// Get event type
    pub fn event_type(&self) -> Option<AmiEventType> {
        self.event_type
    }

    /// Get header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(|s| s.as_str())
    }

    /// Get header value or an empty string when absent
    pub fn header_or_default(&self, name: &str) -> &str {
        self.header(name)
            .unwrap_or("")
    }

    /// Get a required header, failing with [`TrackerError::MissingHeader`]
    pub fn require(&self, name: &str) -> TrackerResult<&str> {
        self.header(name)
            .ok_or_else(|| TrackerError::missing_header(name))
    }

    /// Set header value
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_string(), value.to_string());
    }

    /// Get the channel leg's Uniqueid
    pub fn unique_id(&self) -> Option<&str> {
        self.header(HEADER_UNIQUEID)
    }

    /// Get the Linkedid shared by all legs of the call
    pub fn linked_id(&self) -> Option<&str> {
        self.header(HEADER_LINKEDID)
    }

    /// Get the channel name, e.g. `SIP/1001-000000bd`
    pub fn channel_name(&self) -> Option<&str> {
        self.header(HEADER_CHANNEL)
    }

    /// Get the PBX server identity, defaulting to `asterisk`
    pub fn system_name(&self) -> &str {
        self.header(HEADER_SYSTEM_NAME)
            .unwrap_or(DEFAULT_SYSTEM_NAME)
    }

    /// Get caller ID number
    pub fn caller_id_num(&self) -> Option<&str> {
        self.header("CallerIDNum")
    }

    /// Get caller ID name
    pub fn caller_id_name(&self) -> Option<&str> {
        self.header("CallerIDName")
    }

    /// Get the dialed extension
    pub fn exten(&self) -> Option<&str> {
        self.header("Exten")
    }

    /// Get channel state code
    pub fn channel_state(&self) -> Option<&str> {
        self.header("ChannelState")
    }

    /// Get channel state description, e.g. `Ringing`, `Up`
    pub fn channel_state_desc(&self) -> Option<&str> {
        self.header("ChannelStateDesc")
    }

    /// Get hangup cause code (Hangup events)
    pub fn cause(&self) -> Option<&str> {
        self.header("Cause")
    }

    /// Get hangup cause text (Hangup events)
    pub fn cause_txt(&self) -> Option<&str> {
        self.header("Cause-txt")
    }

    /// Get variable name (VarSet events)
    pub fn variable(&self) -> Option<&str> {
        self.header("Variable")
    }

    /// Get variable value (VarSet events)
    pub fn value(&self) -> Option<&str> {
        self.header("Value")
    }

    /// Get response disposition (OriginateResponse events)
    pub fn response(&self) -> Option<&str> {
        self.header("Response")
    }

    /// Get failure reason code (OriginateResponse events)
    pub fn reason(&self) -> Option<&str> {
        self.header("Reason")
    }

    /// Check if this is a specific event type
    pub fn is_event_type(&self, event_type: AmiEventType) -> bool {
        self.event_type == Some(event_type)
    }
}

impl Default for AmiEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AmiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmiEvent {{")?;
        if let Some(event_type) = self.event_type {
            write!(f, " {}", event_type)?;
        }
        if let Some(uniqueid) = self.unique_id() {
            write!(f, ", Uniqueid: {}", uniqueid)?;
        }
        if let Some(channel) = self.channel_name() {
            write!(f, ", Channel: {}", channel)?;
        }
        write!(f, ", Headers: {} }}", self.headers.len())
    }
}
