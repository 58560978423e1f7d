//! # asterisk-ami-calls
//!
//! Reconstructs call and channel state from an Asterisk Manager Interface
//! (AMI) event stream relayed by a remote PBX agent.
//!
//! The core is [`CallTracker`], an idempotent reducer: feed it AMI events
//! (flat key-value maps) and it maintains channel legs, correlates them
//! into logical calls by `Linkedid`, resolves calling/called users and
//! external contacts, and drives the call-recording pipeline.  Delivery is
//! assumed at-least-once and unordered across legs.
//!
//! ## Example
//!
//! ```no_run
//! use asterisk_ami_calls::{AmiEvent, CallTracker, PartyResolver, TrackerConfig};
//! use asterisk_ami_calls::resolver::{Contact, DirectoryLookup, UserChannelLookup, UserId};
//! use std::sync::Arc;
//!
//! struct Directory;
//! impl DirectoryLookup for Directory {
//!     fn contact_by_number(&self, _number: &str) -> Option<Contact> {
//!         None
//!     }
//! }
//!
//! struct Users;
//! impl UserChannelLookup for Users {
//!     fn user_for_channel(&self, _channel: &str, _system: &str) -> Option<UserId> {
//!         None
//!     }
//! }
//!
//! let resolver = PartyResolver::new(Arc::new(Users), Arc::new(Directory));
//! let mut tracker = CallTracker::new("asterisk", TrackerConfig::default(), resolver);
//!
//! let raw = r#"{"Event": "Newchannel", "Uniqueid": "1631528870.0",
//!     "Linkedid": "1631528870.0", "Channel": "SIP/1001-000000bd",
//!     "ChannelState": "4", "ChannelStateDesc": "Ring",
//!     "CallerIDNum": "1001", "CallerIDName": "Alice",
//!     "ConnectedLineNum": "", "ConnectedLineName": "",
//!     "Context": "from-internal", "Exten": "1002", "Priority": "1",
//!     "AccountCode": "", "Language": "en", "SystemName": "asterisk"}"#;
//! let event = AmiEvent::from_json(raw).unwrap();
//! if let Some(fetch) = tracker.process(&event) {
//!     // run the recording pipeline for fetch.channel_uniqueid
//!     let _ = fetch;
//! }
//! ```

pub mod action;
pub mod call;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod executor;
pub mod recording;
pub mod resolver;
pub mod tracker;

pub use action::{ActionClient, ManagerAction};
pub use call::{Call, CallDirection, CallStatus, Reference};
pub use channel::Channel;
pub use config::TrackerConfig;
pub use error::{EnrichmentError, ExecutorError, TrackerError, TrackerResult};
pub use event::{AmiEvent, AmiEventType};
pub use executor::{JobPayload, JobRequest, Notifier, RemoteExecutor};
pub use recording::{Recording, RecordingPipeline, RecordingState, Transcoder, Transcriber};
pub use resolver::{CachedDirectory, Contact, PartyResolver, UserId};
pub use tracker::{CallTracker, RecordingFetch, VacuumStats};
