//! The call tracker: an idempotent reducer over the AMI event stream.
//!
//! One tracker owns the channel and call registries of one PBX server;
//! events carrying a different `SystemName` are rejected.  Delivery is
//! at-least-once and unordered across legs, so every handler tolerates
//! replays, duplicates and out-of-order arrival.  Handler failures never
//! escape [`CallTracker::process`]; a malformed or stale event is logged
//! and the stream continues.

use crate::call::Call;
use crate::channel::Channel;
use crate::config::TrackerConfig;
use crate::constants::*;
use crate::error::{TrackerError, TrackerResult};
use crate::event::{AmiEvent, AmiEventType};
use crate::executor::Notifier;
use crate::recording::{recording_wanted, Recording, RecordingState};
use crate::resolver::PartyResolver;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A recording fetch the reducer decided on while processing a Hangup.
///
/// The reducer itself never blocks on the remote agent; the embedding runs
/// the fetch through [`crate::recording::RecordingPipeline`] and reports
/// back with [`CallTracker::complete_recording`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingFetch {
    pub channel_uniqueid: String,
}

/// Counts of records removed by one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumStats {
    pub channels: usize,
    pub calls: usize,
    pub recordings: usize,
}

pub struct CallTracker {
    system_name: String,
    config: TrackerConfig,
    resolver: PartyResolver,
    notifier: Option<Arc<dyn Notifier>>,
    /// Channels by Uniqueid, insertion ordered
    channels: IndexMap<String, Channel>,
    /// Calls by their primary leg's Uniqueid
    calls: IndexMap<String, Call>,
    /// Completed recordings by the carrying channel's Uniqueid
    recordings: IndexMap<String, Recording>,
}

impl CallTracker {
    pub fn new(system_name: impl Into<String>, config: TrackerConfig, resolver: PartyResolver) -> Self {
        Self {
            system_name: system_name.into(),
            config,
            resolver,
            notifier: None,
            channels: IndexMap::new(),
            calls: IndexMap::new(),
            recordings: IndexMap::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replace the settings snapshot.  Takes effect for the next event.
    pub fn reload_config(&mut self, config: TrackerConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    pub fn channel(&self, uniqueid: &str) -> Option<&Channel> {
        self.channels
            .get(uniqueid)
    }

    pub fn call(&self, uniqueid: &str) -> Option<&Call> {
        self.calls
            .get(uniqueid)
    }

    /// The call a channel belongs to, when correlation has succeeded.
    pub fn call_for_channel(&self, uniqueid: &str) -> Option<&Call> {
        let call_uniqueid = self
            .channel(uniqueid)?
            .call_uniqueid
            .as_deref()?;
        self.call(call_uniqueid)
    }

    /// The parent leg of a secondary channel.  A primary leg is its own
    /// root and has no parent.
    pub fn parent_channel(&self, uniqueid: &str) -> Option<&Channel> {
        let channel = self.channel(uniqueid)?;
        if channel.is_primary() {
            return None;
        }
        self.channels
            .get(&channel.linkedid)
    }

    pub fn recording(&self, channel_uniqueid: &str) -> Option<&Recording> {
        self.recordings
            .get(channel_uniqueid)
    }

    pub fn active_calls(&self) -> impl Iterator<Item = &Call> {
        self.calls
            .values()
            .filter(|call| call.is_active)
    }

    pub fn channel_count(&self) -> usize {
        self.channels
            .len()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .len()
    }

    /// Process one event at the current wall clock.
    pub fn process(&mut self, event: &AmiEvent) -> Option<RecordingFetch> {
        self.process_at(event, Utc::now())
    }

    /// Process one event at an explicit instant.
    ///
    /// Stale references (unknown Uniqueid, already-finalized channel) are
    /// expected under at-least-once delivery and log at debug; anything
    /// else logs at warn.  Neither propagates.
    pub fn process_at(&mut self, event: &AmiEvent, now: DateTime<Utc>) -> Option<RecordingFetch> {
        if self.config.trace_events {
            debug!("Processing {:?}", event.headers);
        }
        if event.system_name() != self.system_name {
            let err = TrackerError::ServerMismatch {
                expected: self
                    .system_name
                    .clone(),
                got: event
                    .system_name()
                    .to_string(),
            };
            warn!("Dropping event: {}", err);
            return None;
        }
        let Some(event_type) = event.event_type() else {
            debug!(
                "Ignoring event without a known type: {:?}",
                event.header(HEADER_EVENT)
            );
            return None;
        };

        let result = match event_type {
            AmiEventType::NewChannel => self
                .on_new_channel(event, now)
                .map(|_| None),
            AmiEventType::NewState => self
                .on_new_state(event, now)
                .map(|_| None),
            AmiEventType::VarSet => self
                .on_var_set(event, now)
                .map(|_| None),
            AmiEventType::Hangup => self.on_hangup(event, now),
            AmiEventType::OriginateResponse => self
                .on_originate_response(event, now)
                .map(|_| None),
            other => {
                debug!("No handler for {}", other);
                Ok(None)
            }
        };

        match result {
            Ok(fetch) => fetch,
            Err(err) if err.is_stale() => {
                debug!("Skipping {} event: {}", event_type, err);
                None
            }
            Err(err) => {
                warn!("Failed to process {} event: {}", event_type, err);
                None
            }
        }
    }

    fn on_new_channel(&mut self, event: &AmiEvent, now: DateTime<Utc>) -> TrackerResult<()> {
        let uniqueid = event.require(HEADER_UNIQUEID)?;

        // Replay of a known leg: refresh mutable fields and stop.
        if self.channels.contains_key(uniqueid) {
            debug!("Replayed NewChannel for {}", uniqueid);
            let uniqueid = uniqueid.to_string();
            if let Some(channel) = self
                .channels
                .get_mut(&uniqueid)
            {
                channel.apply_state(event);
            }
            return Ok(());
        }

        let channel = Channel::from_event(event, now)?;
        info!("New channel {} ({})", channel.name, channel.uniqueid);
        self.admit_channel(channel, now);
        Ok(())
    }

    fn on_new_state(&mut self, event: &AmiEvent, now: DateTime<Utc>) -> TrackerResult<()> {
        let uniqueid = event
            .require(HEADER_UNIQUEID)?
            .to_string();

        if !self.channels.contains_key(&uniqueid) {
            // Newstate before NewChannel happens after agent restarts.
            debug!("Newstate for unseen channel {}, creating it", uniqueid);
            let channel = Channel::from_event_defensive(event, now)?;
            self.admit_channel(channel, now);
        } else if let Some(channel) = self
            .channels
            .get_mut(&uniqueid)
        {
            channel.apply_state(event);
        }
        self.correlate(&uniqueid);

        if event.channel_state_desc() == Some(CHANNEL_STATE_UP) {
            self.on_channel_up(&uniqueid, now);
        }
        self.resolve_parties(&uniqueid);
        Ok(())
    }

    fn on_var_set(&mut self, event: &AmiEvent, now: DateTime<Utc>) -> TrackerResult<()> {
        if event.variable() != Some(MIXMONITOR_FILENAME_VAR) {
            return Ok(());
        }
        let uniqueid = event.require(HEADER_UNIQUEID)?;
        let path = event
            .value()
            .unwrap_or_default()
            .to_string();
        let channel = self
            .channels
            .get_mut(uniqueid)
            .ok_or_else(|| TrackerError::unknown_channel(uniqueid))?;
        info!("Recording path for {}: {}", uniqueid, path);
        channel.capture_recording_path(&path);

        let call_uniqueid = channel
            .call_uniqueid
            .clone();
        if let Some(call) = call_uniqueid.and_then(|id| {
            self.calls
                .get_mut(&id)
        }) {
            call.log_event(now, "Recording started");
        }
        Ok(())
    }

    fn on_hangup(
        &mut self,
        event: &AmiEvent,
        now: DateTime<Utc>,
    ) -> TrackerResult<Option<RecordingFetch>> {
        let uniqueid = event
            .require(HEADER_UNIQUEID)?
            .to_string();
        let cause = event
            .cause()
            .unwrap_or("0")
            .to_string();
        let cause_txt = event
            .cause_txt()
            .unwrap_or("")
            .to_string();

        let channel = self
            .channels
            .get_mut(&uniqueid)
            .ok_or_else(|| TrackerError::unknown_channel(&uniqueid))?;
        if !channel.finalize(&cause, &cause_txt, now) {
            return Err(TrackerError::AlreadyFinalized { uniqueid });
        }
        info!(
            "Hangup {} cause {} ({})",
            channel.name, cause, cause_txt
        );

        let fetch = if recording_wanted(channel, &cause, now, &self.config) {
            channel.recording = RecordingState::FetchRequested;
            Some(RecordingFetch {
                channel_uniqueid: uniqueid.clone(),
            })
        } else {
            if channel.recording == RecordingState::PathCaptured {
                channel.recording = RecordingState::Skipped;
            }
            None
        };

        let is_primary = channel.is_primary();
        let call_uniqueid = channel
            .call_uniqueid
            .clone();
        if let Some(call) = call_uniqueid.and_then(|id| {
            self.calls
                .get_mut(&id)
        }) {
            call.log_event(
                now,
                format!("Channel hung up, cause {} {}", cause, cause_txt),
            );
            if is_primary {
                call.finalize(&cause, now);
                info!("Call {} ended with status {}", call.uniqueid, call.status);
            }
        }
        Ok(fetch)
    }

    /// OriginateResponse handler.  Only the failure branch is meaningful;
    /// a non-failure response reaching this tracker is a contract violation
    /// on the agent side and is logged, not raised.
    fn on_originate_response(&mut self, event: &AmiEvent, now: DateTime<Utc>) -> TrackerResult<()> {
        match event.response() {
            Some("Failure") => {}
            other => {
                error!(
                    "OriginateResponse with Response {:?} routed to the failure handler",
                    other
                );
                return Ok(());
            }
        }
        let uniqueid = event
            .require(HEADER_UNIQUEID)?
            .to_string();
        let channel = self
            .channels
            .get_mut(&uniqueid)
            .ok_or_else(|| TrackerError::unknown_channel(&uniqueid))?;

        // Hangup already carried the real cause; this signal is redundant.
        if channel.is_finalized() {
            debug!("Late originate failure for {} ignored", uniqueid);
            return Ok(());
        }

        let reason = event
            .reason()
            .unwrap_or("0")
            .to_string();
        let message = event
            .header("Message")
            .unwrap_or("Originate failed")
            .to_string();
        channel.finalize(&reason, &message, now);
        warn!("Originate failed for {}: {} ({})", uniqueid, message, reason);

        let is_primary = channel.is_primary();
        let call_uniqueid = channel
            .call_uniqueid
            .clone();
        if let Some(call) = call_uniqueid.and_then(|id| {
            self.calls
                .get_mut(&id)
        }) {
            call.log_event(now, format!("Originate failed: {}", message));
            if is_primary {
                call.finalize(&reason, now);
            }
            if call.reference.is_some() {
                if let (Some(notifier), Some(user)) = (&self.notifier, call.calling_user) {
                    notifier.notify_user(user, "Call failed", &message);
                }
            }
        }
        Ok(())
    }

    /// Attach a business reference to an active call, e.g. from the
    /// click-to-call button that originated it.
    pub fn set_reference(
        &mut self,
        call_uniqueid: &str,
        reference: crate::call::Reference,
    ) -> TrackerResult<()> {
        let call = self
            .calls
            .get_mut(call_uniqueid)
            .ok_or_else(|| TrackerError::UnknownCall {
                uniqueid: call_uniqueid.to_string(),
            })?;
        if call.reference.is_none() {
            call.reference = Some(reference);
        }
        Ok(())
    }

    /// Record the outcome of a recording fetch decided on Hangup.
    ///
    /// A failed fetch leaves the channel in `FetchRequested`; there is no
    /// automatic retry.
    pub fn complete_recording(
        &mut self,
        channel_uniqueid: &str,
        result: TrackerResult<Recording>,
    ) {
        match result {
            Ok(recording) => {
                if let Some(channel) = self
                    .channels
                    .get_mut(channel_uniqueid)
                {
                    channel.recording = RecordingState::Completed;
                }
                let call_uniqueid = recording
                    .call_uniqueid
                    .clone();
                if let Some(call) = self
                    .calls
                    .get_mut(&call_uniqueid)
                {
                    call.log_event(recording.created, format!("Recording saved: {}", recording.file_name));
                }
                info!(
                    "Recording for {} stored as {}",
                    channel_uniqueid, recording.file_name
                );
                self.recordings
                    .insert(channel_uniqueid.to_string(), recording);
            }
            Err(err) => {
                warn!("Recording fetch for {} failed: {}", channel_uniqueid, err);
            }
        }
    }

    /// Exempt a recording from retention sweeps, or lift the exemption.
    pub fn set_recording_kept(&mut self, channel_uniqueid: &str, keep: bool) -> TrackerResult<()> {
        let recording = self
            .recordings
            .get_mut(channel_uniqueid)
            .ok_or_else(|| TrackerError::unknown_channel(channel_uniqueid))?;
        recording.keep_forever = keep;
        Ok(())
    }

    /// Retention sweep: drop finalized channels, ended calls and recordings
    /// older than their configured windows.  Active records and recordings
    /// flagged keep-forever are never touched.
    pub fn vacuum(&mut self, now: DateTime<Utc>) -> VacuumStats {
        let channel_cutoff = now - Duration::hours(self.config.channels_keep_hours);
        let call_cutoff = now - Duration::days(self.config.calls_keep_days);
        let recording_cutoff = now - Duration::days(self.config.recordings_keep_days);
        let mut stats = VacuumStats::default();

        let before = self.channels.len();
        self.channels
            .retain(|_, channel| {
                !matches!(channel.hangup_at, Some(at) if at < channel_cutoff)
            });
        stats.channels = before - self.channels.len();

        let before = self.calls.len();
        self.calls
            .retain(|_, call| !matches!(call.ended, Some(at) if at < call_cutoff));
        stats.calls = before - self.calls.len();

        let before = self.recordings.len();
        self.recordings
            .retain(|_, recording| {
                recording.keep_forever || recording.created >= recording_cutoff
            });
        stats.recordings = before - self.recordings.len();

        if stats != VacuumStats::default() {
            info!(
                "Vacuumed {} channels, {} calls, {} recordings",
                stats.channels, stats.calls, stats.recordings
            );
        }
        stats
    }

    /// Insert a freshly created channel, wiring up call correlation.
    fn admit_channel(&mut self, channel: Channel, now: DateTime<Utc>) {
        let uniqueid = channel
            .uniqueid
            .clone();
        if channel.is_primary() {
            self.open_call_for(&channel, now);
        }
        self.channels
            .insert(uniqueid.clone(), channel);
        self.correlate(&uniqueid);
        self.resolve_parties(&uniqueid);
    }

    /// Open the call for a primary leg, idempotently, and sweep up any
    /// secondary legs that arrived before it.
    fn open_call_for(&mut self, channel: &Channel, now: DateTime<Utc>) {
        if self.calls.contains_key(&channel.uniqueid) {
            return;
        }
        let mut call = Call::from_channel(channel, now);
        call.log_event(now, format!("Call started from channel {}", channel.name));
        info!("Opened call {}", call.uniqueid);
        self.calls
            .insert(call.uniqueid.clone(), call);

        // Secondary legs seen before their primary are waiting unattached;
        // attach them and let the resolver pick up their identities.
        let orphans: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.call_uniqueid.is_none() && c.linkedid == channel.uniqueid)
            .map(|c| c.uniqueid.clone())
            .collect();
        for orphan in orphans {
            self.correlate(&orphan);
            self.resolve_parties(&orphan);
        }
    }

    /// Attach a channel to its call by Linkedid, tolerating a call that
    /// does not exist yet.
    fn correlate(&mut self, uniqueid: &str) {
        let Some(channel) = self
            .channels
            .get(uniqueid)
        else {
            return;
        };
        if channel.call_uniqueid.is_some() {
            return;
        }
        let linkedid = channel.linkedid.clone();
        if !self.calls.contains_key(&linkedid) {
            debug!(
                "No call {} yet for channel {}, leaving unattached",
                linkedid, uniqueid
            );
            return;
        }
        if let Some(channel) = self
            .channels
            .get_mut(uniqueid)
        {
            channel.call_uniqueid = Some(linkedid.clone());
        }
        if let Some(call) = self
            .calls
            .get_mut(&linkedid)
        {
            call.attach_channel(uniqueid);
        }
    }

    /// Primary leg went Up: stamp the call answered.
    fn on_channel_up(&mut self, uniqueid: &str, now: DateTime<Utc>) {
        let Some(channel) = self
            .channels
            .get(uniqueid)
        else {
            return;
        };
        if !channel.is_primary() {
            return;
        }
        let Some(call_uniqueid) = channel
            .call_uniqueid
            .clone()
        else {
            return;
        };
        if let Some(call) = self
            .calls
            .get_mut(&call_uniqueid)
        {
            let newly_answered = call
                .answered
                .is_none();
            call.mark_answered(now);
            if newly_answered && call.answered == Some(now) {
                call.log_event(now, "Call answered");
            }
        }
    }

    /// Run the party resolver against the channel's call, when attached.
    fn resolve_parties(&mut self, uniqueid: &str) {
        let Some(channel) = self
            .channels
            .get(uniqueid)
        else {
            return;
        };
        let Some(call_uniqueid) = channel
            .call_uniqueid
            .clone()
        else {
            return;
        };
        // Disjoint map entries; clone the channel to keep the borrows simple.
        let channel = channel.clone();
        if let Some(call) = self
            .calls
            .get_mut(&call_uniqueid)
        {
            self.resolver
                .resolve(call, &channel);
        }
        if let Some(user) = self
            .call(&call_uniqueid)
            .and_then(|call| {
                if channel.is_primary() {
                    call.calling_user
                } else {
                    call.called_user
                }
            })
        {
            if let Some(channel) = self
                .channels
                .get_mut(uniqueid)
            {
                if channel
                    .user
                    .is_none()
                {
                    channel.user = Some(user);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{Contact, DirectoryLookup, UserChannelLookup, UserId};

    struct NoUsers;
    impl UserChannelLookup for NoUsers {
        fn user_for_channel(&self, _channel: &str, _system_name: &str) -> Option<UserId> {
            None
        }
    }

    struct NoContacts;
    impl DirectoryLookup for NoContacts {
        fn contact_by_number(&self, _number: &str) -> Option<Contact> {
            None
        }
    }

    fn tracker() -> CallTracker {
        let resolver = PartyResolver::new(Arc::new(NoUsers), Arc::new(NoContacts));
        CallTracker::new("asterisk", TrackerConfig::default(), resolver)
    }

    fn new_channel(uniqueid: &str, linkedid: &str, name: &str) -> AmiEvent {
        let mut event = AmiEvent::with_type(AmiEventType::NewChannel);
        event.set_header("Uniqueid", uniqueid);
        event.set_header("Linkedid", linkedid);
        event.set_header("Channel", name);
        event.set_header("ChannelState", "4");
        event.set_header("ChannelStateDesc", "Ring");
        event.set_header("CallerIDNum", "1001");
        event.set_header("CallerIDName", "Alice");
        event.set_header("ConnectedLineNum", "");
        event.set_header("ConnectedLineName", "");
        event.set_header("Context", "from-internal");
        event.set_header("Exten", "1002");
        event.set_header("Priority", "1");
        event.set_header("AccountCode", "");
        event.set_header("Language", "en");
        event.set_header("SystemName", "asterisk");
        event
    }

    #[test]
    fn primary_leg_opens_call() {
        let mut t = tracker();
        t.process(&new_channel("u1", "u1", "SIP/1001-00000001"));
        assert_eq!(t.call_count(), 1);
        let call = t
            .call("u1")
            .unwrap();
        assert!(call.is_active);
        assert_eq!(call.channels, vec!["u1"]);
        assert_eq!(
            t.channel("u1")
                .unwrap()
                .call_uniqueid
                .as_deref(),
            Some("u1")
        );
    }

    #[test]
    fn secondary_before_primary_attaches_later() {
        let mut t = tracker();
        t.process(&new_channel("u2", "u1", "SIP/1002-00000002"));
        assert!(t
            .channel("u2")
            .unwrap()
            .call_uniqueid
            .is_none());
        assert_eq!(t.call_count(), 0);

        t.process(&new_channel("u1", "u1", "SIP/1001-00000001"));
        assert_eq!(
            t.channel("u2")
                .unwrap()
                .call_uniqueid
                .as_deref(),
            Some("u1")
        );
        let call = t
            .call("u1")
            .unwrap();
        assert_eq!(call.channels, vec!["u2", "u1"]);
    }

    #[test]
    fn wrong_server_events_dropped() {
        let mut t = tracker();
        let mut event = new_channel("u1", "u1", "SIP/1001-00000001");
        event.set_header("SystemName", "pbx-west");
        t.process(&event);
        assert_eq!(t.channel_count(), 0);
    }

    #[test]
    fn parent_channel_lookup() {
        let mut t = tracker();
        t.process(&new_channel("u1", "u1", "SIP/1001-00000001"));
        t.process(&new_channel("u2", "u1", "SIP/1002-00000002"));
        assert!(t
            .parent_channel("u1")
            .is_none());
        assert_eq!(
            t.parent_channel("u2")
                .unwrap()
                .uniqueid,
            "u1"
        );
    }
}
