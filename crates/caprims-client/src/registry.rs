//! Per-context table of live callbacks.
//!
//! Only an opaque [`RequestKey`] crosses into the native library; the table
//! decides whether a key is still live. A completion whose key is gone (the
//! request was cancelled, the subscription cleared, the channel closed) is
//! dropped without touching anything the application registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use caprims_dbr::{decode_raw, DecodeOptions, Decoded};
use caprims_native::{AccessRights, CaOp, ChanId, Eca, EventArgs, EventId, RequestKey};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{CaError, Result};

/// Identity of a subscription created through a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A channel connected or lost its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub chid: ChanId,
    pub op: CaOp,
}

impl ConnectionEvent {
    pub fn connected(&self) -> bool {
        self.op == CaOp::ConnUp
    }
}

/// The read/write permission of a channel changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRightsEvent {
    pub chid: ChanId,
    pub rights: AccessRights,
}

pub type GetCallback = Box<dyn FnOnce(Result<Decoded>) + Send>;
pub type PutCallback = Box<dyn FnOnce(Result<()>) + Send>;
pub type MonitorCallback = Arc<dyn Fn(Result<Decoded>) + Send + Sync>;
pub type ConnectionCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;
pub type AccessRightsCallback = Arc<dyn Fn(AccessRightsEvent) + Send + Sync>;

/// A one-shot completion captured when a request is issued.
pub enum CallbackToken {
    Get {
        callback: GetCallback,
        decode: DecodeOptions,
    },
    Put(PutCallback),
}

impl std::fmt::Debug for CallbackToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackToken::Get { decode, .. } => {
                f.debug_struct("Get").field("decode", decode).finish()
            }
            CallbackToken::Put(_) => f.write_str("Put"),
        }
    }
}

/// A persistent registration invoked on every qualifying update.
#[derive(Clone)]
pub struct SubscriptionToken {
    pub callback: MonitorCallback,
    pub decode: DecodeOptions,
}

struct ChannelEntry {
    name: String,
    pending: HashMap<RequestKey, CallbackToken>,
    subscriptions: HashMap<SubscriptionId, SubscriptionEntry>,
    connection: Option<ConnectionCallback>,
    access_rights: Option<AccessRightsCallback>,
}

struct SubscriptionEntry {
    token: SubscriptionToken,
    evid: Option<EventId>,
}

#[derive(Default)]
struct RegistryState {
    channels: HashMap<ChanId, ChannelEntry>,
    // every live key (request or subscription) to the channel that owns it
    owners: HashMap<u64, ChanId>,
}

enum Delivery {
    Once(CallbackToken),
    Repeat(SubscriptionToken),
}

/// Callback table of one client context.
///
/// All mutations happen under one lock. Decoding and user callables run
/// after it is released, so a callback may freely issue new requests or
/// clear its own channel.
pub struct Registry {
    state: Mutex<RegistryState>,
    next_key: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            state: Mutex::default(),
            next_key: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Keys start at 1 so a key is never a null `usr` pointer.
    fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a channel entry.
    pub fn open(&self, chid: ChanId, name: &str, connection: Option<ConnectionCallback>) {
        self.lock().channels.insert(chid, entry(name, connection));
        debug!(%chid, name, "channel entry opened");
    }

    /// Create the native channel and its entry as one step.
    ///
    /// The lock is held while `create` runs, so a connection event raised by
    /// a preemptive native thread waits until the entry exists.
    pub fn open_with(
        &self,
        name: &str,
        connection: Option<ConnectionCallback>,
        create: impl FnOnce() -> Result<ChanId>,
    ) -> Result<ChanId> {
        let mut state = self.lock();
        let chid = create()?;
        state.channels.insert(chid, entry(name, connection));
        debug!(%chid, name, "channel entry opened");
        Ok(chid)
    }

    pub fn contains(&self, chid: ChanId) -> bool {
        self.lock().channels.contains_key(&chid)
    }

    pub fn name(&self, chid: ChanId) -> Option<String> {
        self.lock().channels.get(&chid).map(|entry| entry.name.clone())
    }

    pub fn channels(&self) -> Vec<ChanId> {
        let mut chids: Vec<ChanId> = self.lock().channels.keys().copied().collect();
        chids.sort();
        chids
    }

    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding one-shot requests on a channel.
    pub fn pending_count(&self, chid: ChanId) -> usize {
        self.lock()
            .channels
            .get(&chid)
            .map_or(0, |entry| entry.pending.len())
    }

    pub fn subscription_count(&self, chid: ChanId) -> usize {
        self.lock()
            .channels
            .get(&chid)
            .map_or(0, |entry| entry.subscriptions.len())
    }

    /// Store a one-shot token and return the key to hand to the native library.
    pub fn issue_request(&self, chid: ChanId, token: CallbackToken) -> Result<RequestKey> {
        let mut state = self.lock();
        let RegistryState { channels, owners } = &mut *state;
        let entry = channels.get_mut(&chid).ok_or(CaError::BadChannel)?;
        let key = RequestKey(self.next_key());
        entry.pending.insert(key, token);
        owners.insert(key.0, chid);
        trace!(%chid, %key, "request issued");
        Ok(key)
    }

    /// Withdraw a token without invoking it. Returns whether it was live.
    pub fn cancel(&self, key: RequestKey) -> bool {
        let mut state = self.lock();
        let Some(chid) = state.owners.get(&key.0).copied() else {
            return false;
        };
        let removed = state
            .channels
            .get_mut(&chid)
            .and_then(|entry| entry.pending.remove(&key))
            .is_some();
        if removed {
            state.owners.remove(&key.0);
        }
        removed
    }

    /// Register a persistent callback. The returned key identifies its updates.
    pub fn subscribe(
        &self,
        chid: ChanId,
        token: SubscriptionToken,
    ) -> Result<(SubscriptionId, RequestKey)> {
        let mut state = self.lock();
        let RegistryState { channels, owners } = &mut *state;
        let entry = channels.get_mut(&chid).ok_or(CaError::BadChannel)?;
        let key = self.next_key();
        let sub = SubscriptionId(key);
        entry
            .subscriptions
            .insert(sub, SubscriptionEntry { token, evid: None });
        owners.insert(key, chid);
        trace!(%chid, %sub, "subscription registered");
        Ok((sub, RequestKey(key)))
    }

    /// Remember the native identity of a subscription.
    ///
    /// Returns false when the subscription was cleared in the meantime; the
    /// caller then owns clearing the native side.
    pub fn bind_event(&self, sub: SubscriptionId, evid: EventId) -> bool {
        let mut state = self.lock();
        let Some(chid) = state.owners.get(&sub.0).copied() else {
            return false;
        };
        match state
            .channels
            .get_mut(&chid)
            .and_then(|entry| entry.subscriptions.get_mut(&sub))
        {
            Some(entry) => {
                entry.evid = Some(evid);
                true
            }
            None => false,
        }
    }

    /// Remove a subscription, returning its native identity if bound.
    pub fn unsubscribe(&self, sub: SubscriptionId) -> Result<Option<EventId>> {
        let mut state = self.lock();
        let chid = state
            .owners
            .get(&sub.0)
            .copied()
            .ok_or(CaError::BadSubscription)?;
        let removed = state
            .channels
            .get_mut(&chid)
            .and_then(|entry| entry.subscriptions.remove(&sub))
            .ok_or(CaError::BadSubscription)?;
        state.owners.remove(&sub.0);
        trace!(%chid, %sub, "subscription removed");
        Ok(removed.evid)
    }

    /// Remove a channel entry, returning the native identities of the
    /// subscriptions it still held.
    ///
    /// Subscriptions go first, then outstanding requests, then the entry.
    pub fn close(&self, chid: ChanId) -> Result<Vec<EventId>> {
        let mut state = self.lock();
        let RegistryState { channels, owners } = &mut *state;
        let entry = channels.get_mut(&chid).ok_or(CaError::BadChannel)?;

        let mut events = Vec::with_capacity(entry.subscriptions.len());
        for (sub, subscription) in entry.subscriptions.drain() {
            owners.remove(&sub.0);
            events.extend(subscription.evid);
        }
        let dropped = entry.pending.len();
        for (key, _) in entry.pending.drain() {
            owners.remove(&key.0);
        }
        channels.remove(&chid);

        debug!(%chid, subscriptions = events.len(), dropped, "channel entry closed");
        Ok(events)
    }

    pub fn connection_callback(&self, chid: ChanId) -> Option<ConnectionCallback> {
        self.lock()
            .channels
            .get(&chid)
            .and_then(|entry| entry.connection.clone())
    }

    pub fn set_connection_callback(
        &self,
        chid: ChanId,
        callback: Option<ConnectionCallback>,
    ) -> Result<()> {
        let mut state = self.lock();
        let entry = state.channels.get_mut(&chid).ok_or(CaError::BadChannel)?;
        entry.connection = callback;
        Ok(())
    }

    pub fn access_rights_callback(&self, chid: ChanId) -> Option<AccessRightsCallback> {
        self.lock()
            .channels
            .get(&chid)
            .and_then(|entry| entry.access_rights.clone())
    }

    pub fn set_access_rights_callback(
        &self,
        chid: ChanId,
        callback: Option<AccessRightsCallback>,
    ) -> Result<()> {
        let mut state = self.lock();
        let entry = state.channels.get_mut(&chid).ok_or(CaError::BadChannel)?;
        entry.access_rights = callback;
        Ok(())
    }

    /// Route a native completion to whatever is registered under its key.
    ///
    /// One-shot tokens are consumed; subscriptions stay. Returns whether a
    /// callable ran. Unknown keys are an expected race and only traced.
    pub fn complete(&self, event: &EventArgs<'_>) -> bool {
        let delivery = {
            let mut state = self.lock();
            let owner = state.owners.get(&event.key.0).copied();
            let Some(chid) = owner else {
                trace!(key = %event.key, chid = %event.chid, "completion for unknown key dropped");
                return false;
            };
            let RegistryState { channels, owners } = &mut *state;
            let Some(entry) = channels.get_mut(&chid) else {
                owners.remove(&event.key.0);
                trace!(key = %event.key, %chid, "completion for closed channel dropped");
                return false;
            };
            if let Some(token) = entry.pending.remove(&event.key) {
                owners.remove(&event.key.0);
                Delivery::Once(token)
            } else if let Some(sub) = entry.subscriptions.get(&SubscriptionId(event.key.0)) {
                Delivery::Repeat(sub.token.clone())
            } else {
                trace!(key = %event.key, %chid, "completion for retired key dropped");
                return false;
            }
        };

        match delivery {
            Delivery::Once(CallbackToken::Get { callback, decode }) => {
                callback(decode_event(event, &decode));
            }
            Delivery::Once(CallbackToken::Put(callback)) => {
                callback(crate::error::check(event.status));
            }
            Delivery::Repeat(token) => {
                let result = decode_event(event, &token.decode);
                if let Err(err) = &result {
                    if !matches!(err, CaError::Status(_)) {
                        warn!(key = %event.key, error = %err, "subscription update could not be decoded");
                    }
                }
                (token.callback)(result);
            }
        }
        true
    }
}

fn entry(name: &str, connection: Option<ConnectionCallback>) -> ChannelEntry {
    ChannelEntry {
        name: name.to_string(),
        pending: HashMap::new(),
        subscriptions: HashMap::new(),
        connection,
        access_rights: None,
    }
}

fn decode_event(event: &EventArgs<'_>, options: &DecodeOptions) -> Result<Decoded> {
    crate::error::check(event.status)?;
    let data = event.data.ok_or(CaError::Status(Eca::GETFAIL))?;
    Ok(decode_raw(event.dbr_type, event.count, data, options)?)
}
