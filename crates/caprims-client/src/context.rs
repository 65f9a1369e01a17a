use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use caprims_dbr::{
    prepare_put, DbrType, DecodeOptions, Decoded, Family, FieldType, PreparedPut, PutRequest,
    PutTarget, PutValue,
};
use caprims_native::{
    AccessRights, ChanId, ChannelState, Eca, NativeBackend, NativeClient, SyncGroupId,
    ValueBuffer,
};
use tracing::debug;

use crate::dispatch::{Dispatcher, ExceptionEvent};
use crate::error::{check, CaError, Result};
use crate::pending::{PendingValue, Round};
use crate::registry::{
    AccessRightsCallback, CallbackToken, ConnectionCallback, Registry, SubscriptionId,
    SubscriptionToken,
};
use crate::request::{buffered_count, callback_count, ChannelOptions, GetRequest, SubscribeRequest};
use crate::sync_group::SyncGroups;
use crate::ContextConfig;

/// `pend_event` timeout used by [`Context::poll`].
const POLL_TIMEOUT: Duration = Duration::from_nanos(1);

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ATTACHED: RefCell<Option<Attachment>> = const { RefCell::new(None) };
}

/// The context a thread is attached to.
#[derive(Clone)]
pub(crate) struct Attachment {
    id: u64,
    inner: Weak<ContextInner>,
}

impl Attachment {
    fn is_live(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| !inner.destroyed.load(Ordering::Acquire))
    }
}

fn current() -> Option<Attachment> {
    ATTACHED
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
        .filter(Attachment::is_live)
}

fn replace_current(attachment: Option<Attachment>) -> Option<Attachment> {
    ATTACHED
        .try_with(|slot| slot.replace(attachment))
        .ok()
        .flatten()
}

/// Counts a callback thread as attached while it runs user code.
pub(crate) struct CallbackScope {
    previous: Option<Attachment>,
}

impl CallbackScope {
    pub(crate) fn enter(owner: &Attachment) -> Self {
        Self {
            previous: replace_current(Some(owner.clone())),
        }
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        replace_current(self.previous.take());
    }
}

struct ContextInner {
    id: u64,
    backend: &'static str,
    native: Arc<dyn NativeClient>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
    config: ContextConfig,
    destroyed: AtomicBool,
    io_round: Mutex<Round>,
    groups: Mutex<HashMap<SyncGroupId, Round>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if !*self.destroyed.get_mut() {
            self.native.destroy();
        }
    }
}

/// A client context: one native context plus the callbacks registered on it.
///
/// Clones share the context. Every request must come from a thread attached
/// to it: the creating thread, a thread that called [`Context::attach`], or a
/// thread running one of the context's callbacks.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.backend)
            .field("preemptive", &self.inner.config.preemptive)
            .field("channels", &self.inner.registry.len())
            .finish()
    }
}

impl Context {
    /// Create a context and attach the calling thread to it.
    pub fn create(backend: &dyn NativeBackend, config: ContextConfig) -> Result<Self> {
        if current().is_some() {
            return Err(CaError::IsAttached);
        }
        let registry = Arc::new(Registry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
        let native = backend.create_context(config.preemptive, dispatcher.clone())?;
        check(native.set_exception_events(true))?;

        let id = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(ContextInner {
            id,
            backend: backend.name(),
            native,
            dispatcher,
            registry,
            config,
            destroyed: AtomicBool::new(false),
            io_round: Mutex::default(),
            groups: Mutex::default(),
        });
        let context = Self { inner };
        context.inner.dispatcher.bind(context.attachment());
        replace_current(Some(context.attachment()));
        debug!(
            id,
            backend = backend.name(),
            preemptive = config.preemptive,
            "client context created"
        );
        Ok(context)
    }

    fn attachment(&self) -> Attachment {
        Attachment {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn is_preemptive(&self) -> bool {
        self.inner.config.preemptive
    }

    /// Name of the native backend serving this context.
    pub fn backend(&self) -> &'static str {
        self.inner.backend
    }

    /// The callback table, for inspection.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn is_attached(&self) -> bool {
        current().is_some_and(|attachment| attachment.id == self.inner.id)
    }

    pub(crate) fn ensure_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(CaError::NotAttached)
        }
    }

    /// Join this context from another thread.
    pub fn attach(&self) -> Result<()> {
        if current().is_some() {
            return Err(CaError::IsAttached);
        }
        if !self.inner.config.preemptive {
            return Err(CaError::NotThreaded);
        }
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(CaError::Status(Eca::NOCACTX));
        }
        check(self.inner.native.attach())?;
        replace_current(Some(self.attachment()));
        debug!(id = self.inner.id, "thread attached");
        Ok(())
    }

    pub fn detach(&self) -> Result<()> {
        self.ensure_attached()?;
        self.inner.native.detach();
        replace_current(None);
        debug!(id = self.inner.id, "thread detached");
        Ok(())
    }

    /// Clear every channel, then tear the native context down.
    ///
    /// Clones of the context fail with [`CaError::NotAttached`] afterwards.
    pub fn destroy(&self) {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return;
        }
        for chid in self.inner.registry.channels() {
            if let Err(err) = self.close_channel(chid) {
                debug!(%chid, error = %err, "channel clear during destroy failed");
            }
        }
        self.inner.native.destroy();
        self.inner.destroyed.store(true, Ordering::Release);
        self.lock_round().abandon();
        self.lock_groups().clear();

        let id = self.inner.id;
        let _ = ATTACHED.try_with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.as_ref().is_some_and(|attachment| attachment.id == id) {
                *slot = None;
            }
        });
        debug!(id, "client context destroyed");
    }

    pub fn version(&self) -> String {
        self.inner.native.version()
    }

    // channels

    pub fn create_channel(&self, name: &str, options: ChannelOptions) -> Result<ChanId> {
        self.ensure_attached()?;
        let priority = options.priority.unwrap_or(self.inner.config.priority);
        let events = options.connection.is_some();
        let native = &self.inner.native;
        let chid = self.inner.registry.open_with(name, options.connection, || {
            Ok(native.create_channel(name, priority, events)?)
        })?;
        if let Some(callback) = options.access_rights {
            self.inner
                .registry
                .set_access_rights_callback(chid, Some(callback))?;
            check(native.set_access_rights_events(chid, true))?;
        }
        Ok(chid)
    }

    /// Clear a channel: its subscriptions first, then the channel itself.
    pub fn clear_channel(&self, chid: ChanId) -> Result<()> {
        self.ensure_attached()?;
        self.close_channel(chid)
    }

    fn close_channel(&self, chid: ChanId) -> Result<()> {
        let events = self.inner.registry.close(chid)?;
        for evid in events {
            let status = self.inner.native.clear_subscription(evid);
            if !status.is_success() {
                debug!(%chid, %evid, %status, "native subscription clear failed");
            }
        }
        check(self.inner.native.clear_channel(chid))
    }

    /// Install, replace or remove (`None`) the connection callback.
    pub fn change_connection_event(
        &self,
        chid: ChanId,
        callback: Option<ConnectionCallback>,
    ) -> Result<()> {
        self.ensure_attached()?;
        let enabled = callback.is_some();
        self.inner.registry.set_connection_callback(chid, callback)?;
        check(self.inner.native.set_connection_events(chid, enabled))
    }

    /// Install, replace or remove (`None`) the access rights callback.
    pub fn replace_access_rights_event(
        &self,
        chid: ChanId,
        callback: Option<AccessRightsCallback>,
    ) -> Result<()> {
        self.ensure_attached()?;
        let enabled = callback.is_some();
        self.inner
            .registry
            .set_access_rights_callback(chid, callback)?;
        check(self.inner.native.set_access_rights_events(chid, enabled))
    }

    // data

    /// Start a buffered read; the value becomes readable after `pend_io`.
    pub fn get(&self, chid: ChanId, request: &GetRequest) -> Result<PendingValue> {
        self.ensure_attached()?;
        let (dbr_type, count) = self.buffered_shape(chid, request)?;
        let buffer = ValueBuffer::new(dbr_type, count);
        check(self.inner.native.array_get(chid, dbr_type, count, &buffer))?;
        let pending = PendingValue::new(buffer, self.decode_options(request.decode));
        self.lock_round().push(&pending);
        Ok(pending)
    }

    /// Read with a completion callback.
    pub fn get_callback(
        &self,
        chid: ChanId,
        request: &GetRequest,
        callback: impl FnOnce(Result<Decoded>) + Send + 'static,
    ) -> Result<()> {
        self.ensure_attached()?;
        self.ensure_channel(chid)?;
        let dbr_type = self.read_type(chid, request.dbr_type)?;
        let count = callback_count(request.count, self.inner.native.element_count(chid));
        let key = self.inner.registry.issue_request(
            chid,
            CallbackToken::Get {
                callback: Box::new(callback),
                decode: self.decode_options(request.decode),
            },
        )?;
        let status = self
            .inner
            .native
            .array_get_callback(chid, dbr_type, count, key);
        if !status.is_success() {
            self.inner.registry.cancel(key);
        }
        check(status)
    }

    /// Write without completion notification.
    pub fn put(
        &self,
        chid: ChanId,
        value: impl Into<PutValue>,
        request: &PutRequest,
    ) -> Result<()> {
        self.ensure_attached()?;
        let prepared = self.prepare(chid, &value.into(), request)?;
        check(self.inner.native.array_put(
            chid,
            prepared.dbr_type,
            prepared.count,
            &prepared.buffer,
        ))
    }

    /// Write and be told when the server finished processing it.
    pub fn put_callback(
        &self,
        chid: ChanId,
        value: impl Into<PutValue>,
        request: &PutRequest,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        self.ensure_attached()?;
        let prepared = self.prepare(chid, &value.into(), request)?;
        let key = self
            .inner
            .registry
            .issue_request(chid, CallbackToken::Put(Box::new(callback)))?;
        let status = self.inner.native.array_put_callback(
            chid,
            prepared.dbr_type,
            prepared.count,
            &prepared.buffer,
            key,
        );
        if !status.is_success() {
            self.inner.registry.cancel(key);
        }
        check(status)
    }

    /// A write request carrying the context's length policy.
    pub fn put_request(&self) -> PutRequest {
        PutRequest::default().with_policy(self.inner.config.put_length_policy)
    }

    pub fn create_subscription(
        &self,
        chid: ChanId,
        request: &SubscribeRequest,
        callback: impl Fn(Result<Decoded>) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.ensure_attached()?;
        self.ensure_channel(chid)?;
        let dbr_type = self.read_type(chid, request.dbr_type)?;
        let count = callback_count(request.count, self.inner.native.element_count(chid));
        let mask = request.mask.unwrap_or(self.inner.config.subscription_mask);
        let (sub, key) = self.inner.registry.subscribe(
            chid,
            SubscriptionToken {
                callback: Arc::new(callback),
                decode: self.decode_options(request.decode),
            },
        )?;
        match self
            .inner
            .native
            .create_subscription(chid, dbr_type, count, mask, key)
        {
            Ok(evid) => {
                if !self.inner.registry.bind_event(sub, evid) {
                    // cleared by a callback before the native call returned
                    let _ = self.inner.native.clear_subscription(evid);
                }
                debug!(%chid, %sub, %dbr_type, count, %mask, "subscription created");
                Ok(sub)
            }
            Err(status) => {
                let _ = self.inner.registry.unsubscribe(sub);
                Err(CaError::Status(status))
            }
        }
    }

    pub fn clear_subscription(&self, sub: SubscriptionId) -> Result<()> {
        self.ensure_attached()?;
        match self.inner.registry.unsubscribe(sub)? {
            Some(evid) => check(self.inner.native.clear_subscription(evid)),
            None => Ok(()),
        }
    }

    // io

    /// Wait for outstanding connections and buffered reads.
    ///
    /// On timeout the outstanding reads are abandoned; their values never
    /// become readable.
    pub fn pend_io(&self, timeout: Duration) -> Result<()> {
        self.ensure_attached()?;
        let status = self.inner.native.pend_io(timeout);
        let mut round = self.lock_round();
        if status == Eca::NORMAL {
            round.complete();
        } else if status == Eca::TIMEOUT {
            round.abandon();
        }
        check(status)
    }

    /// Process background activity for `timeout`.
    pub fn pend_event(&self, timeout: Duration) -> Result<()> {
        self.ensure_attached()?;
        match self.inner.native.pend_event(timeout) {
            Eca::NORMAL | Eca::TIMEOUT => Ok(()),
            status => Err(CaError::Status(status)),
        }
    }

    /// Dispatch whatever is ready without waiting.
    pub fn poll(&self) -> Result<()> {
        self.pend_event(POLL_TIMEOUT)
    }

    pub fn flush_io(&self) -> Result<()> {
        self.ensure_attached()?;
        check(self.inner.native.flush_io())
    }

    /// `ECA_IODONE` or `ECA_IOINPROGRESS`.
    pub fn test_io(&self) -> Result<Eca> {
        self.ensure_attached()?;
        let status = self.inner.native.test_io();
        check(status)?;
        Ok(status)
    }

    // queries

    pub fn field_type(&self, chid: ChanId) -> FieldType {
        self.inner.native.field_type(chid)
    }

    pub fn element_count(&self, chid: ChanId) -> usize {
        self.inner.native.element_count(chid)
    }

    pub fn name(&self, chid: ChanId) -> Option<String> {
        self.inner.registry.name(chid)
    }

    pub fn state(&self, chid: ChanId) -> ChannelState {
        self.inner.native.state(chid)
    }

    pub fn host_name(&self, chid: ChanId) -> Option<String> {
        self.inner.native.host_name(chid)
    }

    pub fn access_rights(&self, chid: ChanId) -> AccessRights {
        self.inner.native.access_rights(chid)
    }

    pub fn read_access(&self, chid: ChanId) -> bool {
        self.access_rights(chid).read
    }

    pub fn write_access(&self, chid: ChanId) -> bool {
        self.access_rights(chid).write
    }

    /// Route asynchronous exceptions to `handler` instead of the log.
    pub fn add_exception_event(&self, handler: impl Fn(&ExceptionEvent) + Send + Sync + 'static) {
        self.inner
            .dispatcher
            .set_exception_handler(Some(Arc::new(handler)));
    }

    /// Restore logging of asynchronous exceptions.
    pub fn remove_exception_event(&self) {
        self.inner.dispatcher.set_exception_handler(None);
    }

    pub fn sync_groups(&self) -> SyncGroups<'_> {
        SyncGroups::new(self)
    }

    // shared with sync groups

    pub(crate) fn native(&self) -> &dyn NativeClient {
        self.inner.native.as_ref()
    }

    pub(crate) fn lock_groups(&self) -> MutexGuard<'_, HashMap<SyncGroupId, Round>> {
        self.inner
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_round(&self) -> MutexGuard<'_, Round> {
        self.inner
            .io_round
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_channel(&self, chid: ChanId) -> Result<()> {
        if self.inner.registry.contains(chid) {
            Ok(())
        } else {
            Err(CaError::BadChannel)
        }
    }

    pub(crate) fn decode_options(&self, requested: Option<DecodeOptions>) -> DecodeOptions {
        requested.unwrap_or(self.inner.config.decode)
    }

    /// `None` means the channel's native type, which needs a connection.
    fn read_type(&self, chid: ChanId, requested: Option<DbrType>) -> Result<DbrType> {
        match requested {
            Some(dbr_type) => Ok(dbr_type),
            None => self
                .inner
                .native
                .field_type(chid)
                .promote(Family::Plain)
                .ok_or(CaError::Status(Eca::BADTYPE)),
        }
    }

    /// Type and count of a buffered read, resolved before the buffer is sized.
    pub(crate) fn buffered_shape(
        &self,
        chid: ChanId,
        request: &GetRequest,
    ) -> Result<(DbrType, usize)> {
        self.ensure_channel(chid)?;
        let dbr_type = self.read_type(chid, request.dbr_type)?;
        let count = buffered_count(request.count, self.inner.native.element_count(chid));
        Ok((dbr_type, count))
    }

    pub(crate) fn prepare(
        &self,
        chid: ChanId,
        value: &PutValue,
        request: &PutRequest,
    ) -> Result<PreparedPut> {
        self.ensure_channel(chid)?;
        let target = PutTarget {
            field_type: self.inner.native.field_type(chid),
            native_count: self.inner.native.element_count(chid),
        };
        Ok(prepare_put(target, request, value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caprims_native::LoopbackServer;

    #[test]
    fn creating_thread_is_attached() {
        let server = LoopbackServer::with_demo_records();
        let ctx = Context::create(&server, ContextConfig::default()).unwrap();
        assert!(ctx.is_attached());
        assert_eq!(ctx.backend(), "loopback");

        let err = Context::create(&server, ContextConfig::default()).unwrap_err();
        assert_eq!(err, CaError::IsAttached);

        ctx.destroy();
        assert!(!ctx.is_attached());
        let again = Context::create(&server, ContextConfig::default()).unwrap();
        assert!(again.is_attached());
        again.destroy();
    }

    #[test]
    fn attach_rules() {
        let server = LoopbackServer::with_demo_records();
        let ctx = Context::create(&server, ContextConfig::default()).unwrap();
        assert_eq!(ctx.attach(), Err(CaError::IsAttached));

        let worker = ctx.clone();
        let result = std::thread::spawn(move || {
            let create = worker.create_channel("catest", ChannelOptions::default());
            (create.unwrap_err(), worker.attach().unwrap_err())
        })
        .join()
        .unwrap();
        assert_eq!(result, (CaError::NotAttached, CaError::NotThreaded));
        assert_eq!(result.0.status(), Eca::NOCACTX);
        ctx.destroy();
    }

    #[test]
    fn dropping_last_clone_releases_native_context() {
        let server = LoopbackServer::with_demo_records();
        let ctx = Context::create(&server, ContextConfig::default()).unwrap();
        drop(ctx);
        // The thread-local entry is dead, so a new context may be created.
        let ctx = Context::create(&server, ContextConfig::default()).unwrap();
        ctx.destroy();
    }
}
