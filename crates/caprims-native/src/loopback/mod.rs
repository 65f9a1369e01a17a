//! In-process backend serving records from memory.
//!
//! A [`LoopbackServer`] owns a record database; every context created from it
//! talks to that database through the same request/reply queues a network
//! client would use, so pend, flush and sync-group semantics hold without an
//! IOC. Records can be taken offline or made unresponsive to exercise
//! disconnects and timeouts.

mod context;
mod db;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use caprims_dbr::{DbrType, Scalar};
use tracing::debug;

pub use context::LoopbackContext;
pub use db::{demo_records, ProcessVariable};

use crate::client::{EventSink, NativeBackend, NativeClient};
use crate::mask::{AccessRights, EventMask};
use crate::status::Eca;

/// Loopback server configuration.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Reported by `host_name` for connected channels.
    pub host_name: String,
    /// How often a blocked pend call re-checks for work queued by other threads.
    pub poll_interval: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost:5064".to_string(),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Record database shared by all loopback contexts.
#[derive(Clone, Default)]
pub struct LoopbackServer {
    shared: Arc<ServerShared>,
}

#[derive(Default)]
pub(crate) struct ServerShared {
    config: LoopbackConfig,
    records: Mutex<HashMap<String, ProcessVariable>>,
    contexts: Mutex<Vec<Weak<context::ContextShared>>>,
}

/// How a record answers a request right now.
pub(crate) enum Gate<T> {
    Missing,
    Offline,
    Stalled,
    Ready(T),
}

impl LoopbackServer {
    pub fn new() -> Self {
        Self::with_config(LoopbackConfig::default())
    }

    pub fn with_config(config: LoopbackConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                records: Mutex::default(),
                contexts: Mutex::default(),
            }),
        }
    }

    /// A server holding the demo records (`catest`, `cabo`, the waveforms).
    pub fn with_demo_records() -> Self {
        let server = Self::new();
        for pv in demo_records() {
            server.add_record(pv);
        }
        server
    }

    /// Add or replace a record. Channels waiting for the name retry.
    pub fn add_record(&self, pv: ProcessVariable) {
        debug!(name = pv.name(), "loopback record added");
        self.shared
            .lock_records()
            .insert(pv.name().to_string(), pv);
        self.shared.retry_all();
    }

    pub fn record(&self, name: &str) -> Option<ProcessVariable> {
        self.shared.lock_records().get(name).cloned()
    }

    /// Current elements of a record.
    pub fn values(&self, name: &str) -> Option<Vec<Scalar>> {
        self.shared
            .lock_records()
            .get(name)
            .map(|pv| pv.values().to_vec())
    }

    /// Update a record from the server side and notify subscribers.
    pub fn post(&self, name: &str, values: Vec<Scalar>) -> Result<(), Eca> {
        let mask = {
            let mut records = self.shared.lock_records();
            let pv = records.get_mut(name).ok_or(Eca::UKNCHAN)?;
            pv.post(values)?
        };
        self.shared.notify(name, mask);
        Ok(())
    }

    /// Take a record offline (disconnecting its channels) or back online.
    pub fn set_online(&self, name: &str, online: bool) {
        if !self.shared.update(name, |pv| pv.online = online) {
            return;
        }
        debug!(name, online, "loopback record availability changed");
        for ctx in self.shared.live_contexts() {
            if online {
                ctx.reconnect(name);
            } else {
                ctx.disconnect(name);
            }
        }
        self.shared.retry_all();
    }

    /// Make a record stop (or resume) answering requests.
    pub fn set_responsive(&self, name: &str, responsive: bool) {
        if self.shared.update(name, |pv| pv.responsive = responsive) && responsive {
            self.shared.retry_all();
        }
    }

    pub fn set_access(&self, name: &str, access: AccessRights) {
        if !self.shared.update(name, |pv| pv.access = access) {
            return;
        }
        for ctx in self.shared.live_contexts() {
            ctx.access_changed(name, access);
        }
    }
}

impl NativeBackend for LoopbackServer {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn create_context(
        &self,
        preemptive: bool,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn NativeClient>, Eca> {
        let ctx = LoopbackContext::start(Arc::clone(&self.shared), preemptive, sink)?;
        Ok(Arc::new(ctx))
    }
}

impl ServerShared {
    pub(crate) fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, ProcessVariable>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_contexts(&self) -> MutexGuard<'_, Vec<Weak<context::ContextShared>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, ctx: &Arc<context::ContextShared>) {
        let mut contexts = self.lock_contexts();
        contexts.retain(|weak| weak.strong_count() > 0);
        contexts.push(Arc::downgrade(ctx));
    }

    fn live_contexts(&self) -> Vec<Arc<context::ContextShared>> {
        self.lock_contexts()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn update(&self, name: &str, apply: impl FnOnce(&mut ProcessVariable)) -> bool {
        match self.lock_records().get_mut(name) {
            Some(pv) => {
                apply(pv);
                true
            }
            None => false,
        }
    }

    fn retry_all(&self) {
        for ctx in self.live_contexts() {
            ctx.retry_stalled();
        }
    }

    fn notify(&self, name: &str, mask: EventMask) {
        for ctx in self.live_contexts() {
            ctx.record_changed(name, mask);
        }
    }

    /// Inspect a record under the database lock.
    pub(crate) fn with_record<T>(&self, name: &str, f: impl FnOnce(&ProcessVariable) -> T) -> Option<T> {
        self.lock_records().get(name).map(f)
    }

    pub(crate) fn read(&self, name: &str, dbr_type: DbrType, count: usize) -> Gate<Result<(Bytes, usize), Eca>> {
        let records = self.lock_records();
        match records.get(name) {
            None => Gate::Missing,
            Some(pv) if !pv.online => Gate::Offline,
            Some(pv) if !pv.responsive => Gate::Stalled,
            Some(pv) => Gate::Ready(pv.read(dbr_type, count)),
        }
    }

    /// Apply a write; subscribers are notified after the lock is released.
    pub(crate) fn write(&self, name: &str, dbr_type: DbrType, count: usize, data: &[u8]) -> Gate<Result<(), Eca>> {
        let outcome = {
            let mut records = self.lock_records();
            match records.get_mut(name) {
                None => return Gate::Missing,
                Some(pv) if !pv.online => return Gate::Offline,
                Some(pv) if !pv.responsive => return Gate::Stalled,
                Some(pv) => pv.write(dbr_type, count, data),
            }
        };
        Gate::Ready(outcome.map(|mask| self.notify(name, mask)))
    }

    /// Whether a record can accept a connection.
    pub(crate) fn available(&self, name: &str) -> Gate<()> {
        match self.lock_records().get(name) {
            None => Gate::Missing,
            Some(pv) if !pv.online => Gate::Offline,
            Some(_) => Gate::Ready(()),
        }
    }
}
