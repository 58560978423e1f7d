//! Party resolution: deciding direction, calling/called user and matched
//! contact for a call from its channels' identities.
//!
//! Resolution is monotonic — once a value is assigned to the call it is
//! never cleared or reassigned by a later event.

use crate::call::{Call, CallDirection, Reference};
use crate::channel::Channel;
use crate::constants::{MAX_DIRECTORY_CACHE_ENTRIES, SENTINEL_CALLER_IDS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Identifier of a PBX user in the embedding system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// A matched external contact from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub display_name: String,
}

impl Contact {
    pub fn new(id: i64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// External contact directory.  Implementations own number normalization;
/// the resolver only guarantees sentinel caller IDs never reach them.
pub trait DirectoryLookup: Send + Sync {
    fn contact_by_number(&self, number: &str) -> Option<Contact>;
}

/// Mapping from "channel name prefix + system name" to the owning PBX user,
/// e.g. `("SIP/1001", "asterisk")`.
pub trait UserChannelLookup: Send + Sync {
    fn user_for_channel(&self, channel: &str, system_name: &str) -> Option<UserId>;
}

/// Resolves the contact behind a business [`Reference`] of one kind.
/// Integrating modules register one resolver per kind they own.
pub trait ReferenceResolver: Send + Sync {
    fn contact_of(&self, reference: &Reference) -> Option<Contact>;
}

/// `true` for Asterisk's "no caller ID" placeholder values.
pub fn is_sentinel_number(number: &str) -> bool {
    SENTINEL_CALLER_IDS.contains(&number)
}

/// Party resolver, run after every channel write.
pub struct PartyResolver {
    users: Arc<dyn UserChannelLookup>,
    directory: Arc<dyn DirectoryLookup>,
    reference_resolvers: HashMap<String, Arc<dyn ReferenceResolver>>,
}

impl PartyResolver {
    pub fn new(users: Arc<dyn UserChannelLookup>, directory: Arc<dyn DirectoryLookup>) -> Self {
        Self {
            users,
            directory,
            reference_resolvers: HashMap::new(),
        }
    }

    /// Register the resolver for one reference kind, replacing any previous
    /// registration for that kind.
    pub fn register_reference_kind(
        &mut self,
        kind: impl Into<String>,
        resolver: Arc<dyn ReferenceResolver>,
    ) {
        self.reference_resolvers
            .insert(kind.into(), resolver);
    }

    /// Enrich `call` from `channel`'s identity.
    ///
    /// Direction is decided by the primary leg alone: a user-channel match
    /// on it means the call is outbound and the user is the caller; no
    /// match means the call is inbound and the contact is matched by caller
    /// ID, preferring the contact behind an already-set business reference
    /// over a fresh directory search.  A matching secondary leg only
    /// contributes the called user.  Legs can arrive in any order, so the
    /// leg's own `uniqueid == linkedid` identity is what marks it primary,
    /// never its attachment position.
    pub fn resolve(&self, call: &mut Call, channel: &Channel) {
        match self
            .users
            .user_for_channel(channel.short_name(), &channel.system_name)
        {
            Some(user) => {
                if channel.is_primary() {
                    if call.calling_user.is_none() {
                        call.calling_user = Some(user);
                    }
                    if call.direction.is_none() {
                        call.direction = Some(CallDirection::Outgoing);
                    }
                    if call.partner.is_none() {
                        call.partner = self.lookup_contact(&channel.exten);
                    }
                } else if call.called_user.is_none() {
                    call.called_user = Some(user);
                }
            }
            None => {
                if !channel.is_primary() {
                    return;
                }
                if call.direction.is_none() {
                    call.direction = Some(CallDirection::Incoming);
                }
                if call.partner.is_none() {
                    call.partner = self
                        .reference_contact(call)
                        .or_else(|| self.lookup_contact(&channel.caller_id_num));
                }
            }
        }
    }

    /// Contact behind the call's business reference, when one is set and a
    /// resolver for its kind is registered.
    fn reference_contact(&self, call: &Call) -> Option<Contact> {
        let reference = call
            .reference
            .as_ref()?;
        let resolver = self
            .reference_resolvers
            .get(&reference.kind)?;
        resolver.contact_of(reference)
    }

    /// Directory lookup with the sentinel short-circuit: empty, `unknown`
    /// and `s` mean "no caller ID" and are never searched.
    fn lookup_contact(&self, number: &str) -> Option<Contact> {
        if is_sentinel_number(number) {
            debug!("Skipping directory lookup for sentinel caller ID {:?}", number);
            return None;
        }
        self.directory
            .contact_by_number(number)
    }
}

/// Generation-counter cache in front of a [`DirectoryLookup`].
///
/// Entries are valid only for the generation they were stored under;
/// [`CachedDirectory::invalidate`] bumps the generation, expiring every
/// entry at once.  The cache resets when it grows past
/// [`MAX_DIRECTORY_CACHE_ENTRIES`].
pub struct CachedDirectory {
    inner: Arc<dyn DirectoryLookup>,
    generation: AtomicU64,
    cache: Mutex<HashMap<String, (u64, Option<Contact>)>>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn DirectoryLookup>) -> Self {
        Self {
            inner,
            generation: AtomicU64::new(0),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Expire all cached lookups.  Called by the embedding when the contact
    /// directory changes.
    pub fn invalidate(&self) {
        self.generation
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Current generation counter, exposed for tests.
    pub fn generation(&self) -> u64 {
        self.generation
            .load(Ordering::SeqCst)
    }
}

impl DirectoryLookup for CachedDirectory {
    fn contact_by_number(&self, number: &str) -> Option<Contact> {
        let generation = self.generation();
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((cached_generation, contact)) = cache.get(number) {
            if *cached_generation == generation {
                return contact.clone();
            }
        }

        let contact = self
            .inner
            .contact_by_number(number);
        if cache.len() >= MAX_DIRECTORY_CACHE_ENTRIES {
            cache.clear();
        }
        cache.insert(number.to_string(), (generation, contact.clone()));
        contact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct StaticUsers(HashMap<(String, String), UserId>);

    impl UserChannelLookup for StaticUsers {
        fn user_for_channel(&self, channel: &str, system_name: &str) -> Option<UserId> {
            self.0
                .get(&(channel.to_string(), system_name.to_string()))
                .copied()
        }
    }

    struct CountingDirectory {
        calls: AtomicUsize,
        contact: Option<Contact>,
    }

    impl DirectoryLookup for CountingDirectory {
        fn contact_by_number(&self, _number: &str) -> Option<Contact> {
            self.calls
                .fetch_add(1, Ordering::SeqCst);
            self.contact
                .clone()
        }
    }

    fn users_with(channel: &str, system: &str, user: UserId) -> Arc<dyn UserChannelLookup> {
        let mut map = HashMap::new();
        map.insert((channel.to_string(), system.to_string()), user);
        Arc::new(StaticUsers(map))
    }

    fn leg(uniqueid: &str, linkedid: &str, name: &str, caller_id: &str, exten: &str) -> Channel {
        use crate::event::{AmiEvent, AmiEventType};
        let mut event = AmiEvent::with_type(AmiEventType::NewState);
        event.set_header("Uniqueid", uniqueid);
        event.set_header("Linkedid", linkedid);
        event.set_header("Channel", name);
        event.set_header("CallerIDNum", caller_id);
        event.set_header("Exten", exten);
        Channel::from_event_defensive(&event, chrono::Utc::now()).expect("lenient")
    }

    fn test_call() -> Call {
        Call::from_channel(
            &leg("u1", "u1", "SIP/1001-000000bd", "1001", "5550001"),
            chrono::Utc::now(),
        )
    }

    fn test_channel(name: &str, caller_id: &str, exten: &str) -> Channel {
        leg("u1", "u1", name, caller_id, exten)
    }

    #[test]
    fn sentinel_numbers() {
        assert!(is_sentinel_number(""));
        assert!(is_sentinel_number("unknown"));
        assert!(is_sentinel_number("s"));
        assert!(!is_sentinel_number("1001"));
    }

    #[test]
    fn primary_leg_match_means_outbound() {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: Some(Contact::new(7, "Acme Corp")),
        });
        let resolver =
            PartyResolver::new(users_with("SIP/1001", "asterisk", UserId(3)), directory);

        let mut call = test_call();
        call.attach_channel("u1");
        let channel = test_channel("SIP/1001-000000bd", "1001", "5550001");

        resolver.resolve(&mut call, &channel);
        assert_eq!(call.direction, Some(CallDirection::Outgoing));
        assert_eq!(call.calling_user, Some(UserId(3)));
        assert_eq!(
            call.partner
                .as_ref()
                .map(|c| c.id),
            Some(7)
        );
    }

    #[test]
    fn secondary_leg_match_sets_called_user() {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: None,
        });
        let resolver =
            PartyResolver::new(users_with("SIP/1002", "asterisk", UserId(9)), directory);

        let mut call = test_call();
        call.attach_channel("u2");
        let channel = leg("u2", "u1", "SIP/1002-000000be", "1002", "");

        resolver.resolve(&mut call, &channel);
        assert_eq!(call.called_user, Some(UserId(9)));
        assert!(call
            .calling_user
            .is_none());
        assert!(call
            .direction
            .is_none());
    }

    #[test]
    fn secondary_leg_without_match_decides_nothing() {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: Some(Contact::new(12, "Bob Caller")),
        });
        let resolver = PartyResolver::new(
            users_with("SIP/1001", "asterisk", UserId(3)),
            directory.clone(),
        );

        // A trunk leg attaching to the call must not pin direction before
        // the primary leg has resolved.
        let mut call = test_call();
        call.attach_channel("u2");
        let channel = leg("u2", "u1", "SIP/trunk-00000002", "5550001", "s");

        resolver.resolve(&mut call, &channel);
        assert!(call
            .direction
            .is_none());
        assert!(call
            .partner
            .is_none());
        assert_eq!(
            directory
                .calls
                .load(Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn no_match_means_inbound_with_caller_id_lookup() {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: Some(Contact::new(12, "Bob Caller")),
        });
        let resolver = PartyResolver::new(
            users_with("SIP/9999", "asterisk", UserId(1)),
            directory.clone(),
        );

        let mut call = test_call();
        call.attach_channel("u1");
        let channel = test_channel("SIP/trunk-00000001", "5559876", "1001");

        resolver.resolve(&mut call, &channel);
        assert_eq!(call.direction, Some(CallDirection::Incoming));
        assert_eq!(
            call.partner
                .as_ref()
                .map(|c| c.id),
            Some(12)
        );
        assert_eq!(
            directory
                .calls
                .load(Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn sentinel_caller_id_never_reaches_directory() {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: Some(Contact::new(12, "Bob Caller")),
        });
        let resolver = PartyResolver::new(
            users_with("SIP/9999", "asterisk", UserId(1)),
            directory.clone(),
        );

        let mut call = test_call();
        call.attach_channel("u1");
        for sentinel in ["", "unknown", "s"] {
            let channel = test_channel("SIP/trunk-00000001", sentinel, "1001");
            resolver.resolve(&mut call, &channel);
        }
        assert_eq!(
            directory
                .calls
                .load(Ordering::SeqCst),
            0
        );
        assert!(call
            .partner
            .is_none());
    }

    #[test]
    fn reference_contact_preferred_over_directory() {
        struct FixedReference;
        impl ReferenceResolver for FixedReference {
            fn contact_of(&self, reference: &Reference) -> Option<Contact> {
                assert_eq!(reference.kind, "lead");
                Some(Contact::new(42, "Lead Contact"))
            }
        }

        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: Some(Contact::new(12, "Directory Contact")),
        });
        let mut resolver = PartyResolver::new(
            users_with("SIP/9999", "asterisk", UserId(1)),
            directory.clone(),
        );
        resolver.register_reference_kind("lead", Arc::new(FixedReference));

        let mut call = test_call();
        call.attach_channel("u1");
        call.reference = Some(Reference::new("lead", 5));
        let channel = test_channel("SIP/trunk-00000001", "5559876", "1001");

        resolver.resolve(&mut call, &channel);
        assert_eq!(
            call.partner
                .as_ref()
                .map(|c| c.id),
            Some(42)
        );
        assert_eq!(
            directory
                .calls
                .load(Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn resolution_is_monotonic() {
        let directory = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: None,
        });
        let resolver =
            PartyResolver::new(users_with("SIP/1001", "asterisk", UserId(3)), directory);

        let mut call = test_call();
        call.attach_channel("u1");
        call.direction = Some(CallDirection::Incoming);
        call.calling_user = Some(UserId(99));

        let channel = test_channel("SIP/1001-000000bd", "1001", "5550001");
        resolver.resolve(&mut call, &channel);

        assert_eq!(call.direction, Some(CallDirection::Incoming));
        assert_eq!(call.calling_user, Some(UserId(99)));
    }

    #[test]
    fn cached_directory_hits_and_invalidates() {
        let inner = Arc::new(CountingDirectory {
            calls: AtomicUsize::new(0),
            contact: Some(Contact::new(1, "Cached")),
        });
        let cached = CachedDirectory::new(inner.clone());

        assert!(cached
            .contact_by_number("5550001")
            .is_some());
        assert!(cached
            .contact_by_number("5550001")
            .is_some());
        assert_eq!(
            inner
                .calls
                .load(Ordering::SeqCst),
            1
        );

        cached.invalidate();
        assert!(cached
            .contact_by_number("5550001")
            .is_some());
        assert_eq!(
            inner
                .calls
                .load(Ordering::SeqCst),
            2
        );
    }
}
