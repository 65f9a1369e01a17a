use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use caprims_dbr::{DbrType, FieldType};
use tracing::{debug, trace, warn};

use super::{Gate, ServerShared};
use crate::buffer::ValueBuffer;
use crate::client::{
    ChanId, EventArgs, EventId, EventSink, ExceptionArgs, NativeClient, RequestKey, SyncGroupId,
};
use crate::mask::{AccessRights, CaOp, ChannelState, EventMask, Priority};
use crate::status::Eca;

/// A client context of the loopback backend.
///
/// Requests queue until the context is flushed or pended; replies queue until
/// they are dispatched. A preemptive context runs both stages on a worker
/// thread; otherwise they run on the thread inside a pend call.
pub struct LoopbackContext {
    shared: Arc<ContextShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct ContextShared {
    server: Arc<ServerShared>,
    sink: Arc<dyn EventSink>,
    preemptive: bool,
    exceptions: AtomicBool,
    next_id: AtomicU64,
    state: Mutex<ContextState>,
    work: Condvar,
    progress: Condvar,
}

#[derive(Default)]
struct ContextState {
    channels: HashMap<ChanId, ChannelRec>,
    subscriptions: HashMap<EventId, SubscriptionRec>,
    groups: HashMap<SyncGroupId, HashSet<u64>>,
    io_pending: HashSet<u64>,
    requests: VecDeque<Request>,
    stalled: Vec<Request>,
    replies: VecDeque<Reply>,
    destroyed: bool,
}

struct ChannelRec {
    name: String,
    priority: Priority,
    state: ChannelState,
    connection_events: bool,
    access_events: bool,
    connect_op: Option<u64>,
}

#[derive(Clone, Copy)]
struct SubscriptionRec {
    chid: ChanId,
    dbr_type: DbrType,
    count: usize,
    mask: EventMask,
    key: RequestKey,
}

enum Completion {
    Io(u64),
    Group(SyncGroupId, u64),
    Callback(RequestKey),
    Silent,
}

struct Transfer {
    chid: ChanId,
    dbr_type: DbrType,
    count: usize,
    completion: Completion,
}

enum Request {
    Connect(ChanId),
    Get(Transfer, Option<ValueBuffer>),
    Put(Transfer, Bytes),
    Update(EventId),
}

enum Reply {
    Connection(ChanId, CaOp),
    Access(ChanId, AccessRights),
    Event {
        key: RequestKey,
        chid: ChanId,
        op: CaOp,
        dbr_type: DbrType,
        count: usize,
        status: Eca,
        data: Option<Bytes>,
    },
    Exception {
        chid: ChanId,
        op: CaOp,
        dbr_type: DbrType,
        count: usize,
        status: Eca,
    },
}

enum Route {
    Gone,
    Disconnected,
    Ready(String),
}

impl LoopbackContext {
    pub(crate) fn start(
        server: Arc<ServerShared>,
        preemptive: bool,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, Eca> {
        let shared = Arc::new(ContextShared {
            server,
            sink,
            preemptive,
            exceptions: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            state: Mutex::default(),
            work: Condvar::new(),
            progress: Condvar::new(),
        });
        shared.server.register(&shared);

        let worker = if preemptive {
            let runner = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("caprims-loopback".into())
                .spawn(move || runner.run())
                .map_err(|err| {
                    warn!(error = %err, "failed to start loopback dispatch thread");
                    Eca::INTERNAL
                })?;
            Some(handle)
        } else {
            None
        };
        debug!(preemptive, "loopback context created");

        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }
}

impl Drop for LoopbackContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl ContextShared {
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, ContextState>, Eca> {
        let state = self.lock();
        if state.destroyed {
            return Err(Eca::NOCACTX);
        }
        Ok(state)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn wake(&self) {
        self.work.notify_all();
        self.progress.notify_all();
    }

    fn enqueue(&self, state: &mut ContextState, request: Request) {
        state.requests.push_back(request);
        self.work.notify_all();
    }

    fn run(&self) {
        loop {
            {
                let mut state = self.lock();
                while state.requests.is_empty() && state.replies.is_empty() && !state.destroyed {
                    state = self
                        .work
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                if state.destroyed {
                    break;
                }
            }
            self.process_requests();
            self.deliver_replies();
            self.progress.notify_all();
        }
        trace!("loopback dispatch thread exiting");
    }

    fn pump(&self) {
        self.process_requests();
        self.deliver_replies();
    }

    /// Wait until `done` holds or `timeout` expires (zero waits without limit).
    fn wait_for(&self, timeout: Duration, done: impl Fn(&ContextState) -> bool) -> bool {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let poll = self.server.config().poll_interval;
        loop {
            if !self.preemptive {
                self.pump();
            }
            let state = self.lock();
            if state.destroyed || done(&state) {
                return true;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(poll)
                }
                None => poll,
            };
            drop(
                self.progress
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner),
            );
        }
    }

    // server side

    fn process_requests(&self) {
        loop {
            let next = self.lock().requests.pop_front();
            let Some(request) = next else {
                break;
            };
            match request {
                Request::Connect(chid) => self.connect(chid),
                Request::Get(transfer, dest) => self.get(transfer, dest),
                Request::Put(transfer, data) => self.put(transfer, data),
                Request::Update(evid) => self.update(evid),
            }
        }
        self.progress.notify_all();
    }

    fn route(&self, chid: ChanId) -> Route {
        match self.lock().channels.get(&chid) {
            None => Route::Gone,
            Some(ch) if ch.state != ChannelState::Connected => Route::Disconnected,
            Some(ch) => Route::Ready(ch.name.clone()),
        }
    }

    fn stall(&self, request: Request) {
        self.lock().stalled.push(request);
    }

    fn connect(&self, chid: ChanId) {
        let name = match self.lock().channels.get(&chid) {
            Some(ch) if ch.state != ChannelState::Connected => ch.name.clone(),
            _ => return,
        };
        if !matches!(self.server.available(&name), Gate::Ready(())) {
            self.stall(Request::Connect(chid));
            return;
        }
        let access = self
            .server
            .with_record(&name, |pv| pv.access)
            .unwrap_or_default();

        let mut state = self.lock();
        let Some(ch) = state.channels.get_mut(&chid) else {
            return;
        };
        ch.state = ChannelState::Connected;
        let connect_op = ch.connect_op.take();
        let (connection_events, access_events) = (ch.connection_events, ch.access_events);
        debug!(%chid, name = %name, priority = ch.priority.get(), "loopback channel connected");

        if let Some(op) = connect_op {
            state.io_pending.remove(&op);
        }
        if access_events {
            state.replies.push_back(Reply::Access(chid, access));
        }
        if connection_events {
            state.replies.push_back(Reply::Connection(chid, CaOp::ConnUp));
        }
        let updates: Vec<EventId> = state
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.chid == chid)
            .map(|(evid, _)| *evid)
            .collect();
        for evid in updates {
            state.requests.push_back(Request::Update(evid));
        }
    }

    fn get(&self, transfer: Transfer, dest: Option<ValueBuffer>) {
        let name = match self.route(transfer.chid) {
            Route::Gone => return,
            Route::Disconnected => return self.unreachable(Request::Get(transfer, dest)),
            Route::Ready(name) => name,
        };
        match self.server.read(&name, transfer.dbr_type, transfer.count) {
            Gate::Missing | Gate::Offline => self.unreachable(Request::Get(transfer, dest)),
            Gate::Stalled => self.stall(Request::Get(transfer, dest)),
            Gate::Ready(Ok((bytes, count))) => {
                if let Some(dest) = &dest {
                    dest.fill(&bytes);
                }
                let transfer = Transfer { count, ..transfer };
                self.finish(transfer, CaOp::Get, Ok(Some(bytes)));
            }
            Gate::Ready(Err(status)) => self.finish(transfer, CaOp::Get, Err(status)),
        }
    }

    fn put(&self, transfer: Transfer, data: Bytes) {
        let name = match self.route(transfer.chid) {
            Route::Gone => return,
            Route::Disconnected => return self.unreachable(Request::Put(transfer, data)),
            Route::Ready(name) => name,
        };
        match self
            .server
            .write(&name, transfer.dbr_type, transfer.count, &data)
        {
            Gate::Missing | Gate::Offline => self.unreachable(Request::Put(transfer, data)),
            Gate::Stalled => self.stall(Request::Put(transfer, data)),
            Gate::Ready(result) => self.finish(transfer, CaOp::Put, result.map(|()| None)),
        }
    }

    fn update(&self, evid: EventId) {
        let Some(sub) = self.lock().subscriptions.get(&evid).copied() else {
            return;
        };
        let Route::Ready(name) = self.route(sub.chid) else {
            return;
        };
        let (status, count, data) = match self.server.read(&name, sub.dbr_type, sub.count) {
            Gate::Missing | Gate::Offline => return,
            Gate::Stalled => return self.stall(Request::Update(evid)),
            Gate::Ready(Ok((bytes, count))) => (Eca::NORMAL, count, Some(bytes)),
            Gate::Ready(Err(status)) => (status, sub.count, None),
        };
        self.lock().replies.push_back(Reply::Event {
            key: sub.key,
            chid: sub.chid,
            op: CaOp::AddEvent,
            dbr_type: sub.dbr_type,
            count,
            status,
            data,
        });
    }

    // Callbacks learn about the disconnect now; buffered IO waits for the reconnect.
    fn unreachable(&self, request: Request) {
        match request {
            Request::Get(transfer, _) if matches!(transfer.completion, Completion::Callback(_)) => {
                self.finish(transfer, CaOp::Get, Err(Eca::DISCONN))
            }
            Request::Put(transfer, _) if matches!(transfer.completion, Completion::Callback(_)) => {
                self.finish(transfer, CaOp::Put, Err(Eca::DISCONN))
            }
            other => self.stall(other),
        }
    }

    fn finish(&self, transfer: Transfer, op: CaOp, result: Result<Option<Bytes>, Eca>) {
        let mut state = self.lock();
        let Transfer {
            chid,
            dbr_type,
            count,
            completion,
        } = transfer;
        match completion {
            Completion::Io(id) => {
                state.io_pending.remove(&id);
            }
            Completion::Group(gid, id) => {
                if let Some(group) = state.groups.get_mut(&gid) {
                    group.remove(&id);
                }
            }
            Completion::Callback(key) => {
                let (status, data) = match result {
                    Ok(data) => (Eca::NORMAL, data),
                    Err(status) => (status, None),
                };
                state.replies.push_back(Reply::Event {
                    key,
                    chid,
                    op,
                    dbr_type,
                    count,
                    status,
                    data,
                });
                return;
            }
            Completion::Silent => {}
        }
        if let Err(status) = result {
            state.replies.push_back(Reply::Exception {
                chid,
                op,
                dbr_type,
                count,
                status,
            });
        }
    }

    // client side

    fn deliver_replies(&self) {
        loop {
            let next = self.lock().replies.pop_front();
            let Some(reply) = next else {
                break;
            };
            self.deliver(reply);
        }
    }

    fn deliver(&self, reply: Reply) {
        match reply {
            Reply::Connection(chid, op) => self.sink.on_connection(chid, op),
            Reply::Access(chid, rights) => self.sink.on_access_rights(chid, rights),
            Reply::Event {
                key,
                chid,
                op,
                dbr_type,
                count,
                status,
                data,
            } => {
                trace!(%key, %chid, ?op, %dbr_type, count, ?status, "loopback completion");
                self.sink.on_event(EventArgs {
                    key,
                    chid,
                    op,
                    dbr_type: dbr_type.as_raw(),
                    count,
                    status,
                    data: data.as_deref(),
                });
            }
            Reply::Exception {
                chid,
                op,
                dbr_type,
                count,
                status,
            } => {
                let context = self.lock().channels.get(&chid).map(|ch| ch.name.clone());
                let context = context.unwrap_or_default();
                if !self.exceptions.load(Ordering::Acquire) {
                    warn!(%status, channel = %context, ?op, "channel access exception");
                    return;
                }
                self.sink.on_exception(ExceptionArgs {
                    chid: Some(chid),
                    op,
                    dbr_type: dbr_type.as_raw(),
                    count,
                    status,
                    context: &context,
                    file: Some(file!()),
                    line: line!(),
                });
            }
        }
    }

    // notifications from the server

    pub(crate) fn retry_stalled(&self) {
        let mut state = self.lock();
        let stalled = std::mem::take(&mut state.stalled);
        state.requests.extend(stalled);
        drop(state);
        self.wake();
    }

    pub(crate) fn record_changed(&self, name: &str, mask: EventMask) {
        let mut state = self.lock();
        let updates: Vec<EventId> = state
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.mask.intersects(mask))
            .filter(|(_, sub)| {
                state.channels.get(&sub.chid).is_some_and(|ch| {
                    ch.name == name && ch.state == ChannelState::Connected
                })
            })
            .map(|(evid, _)| *evid)
            .collect();
        if updates.is_empty() {
            return;
        }
        state
            .requests
            .extend(updates.into_iter().map(Request::Update));
        drop(state);
        self.wake();
    }

    pub(crate) fn disconnect(&self, name: &str) {
        let mut state = self.lock();
        let mut downs = Vec::new();
        for (chid, ch) in state.channels.iter_mut() {
            if ch.name == name && ch.state == ChannelState::Connected {
                ch.state = ChannelState::PreviouslyConnected;
                if ch.connection_events {
                    downs.push(*chid);
                }
            }
        }
        for chid in downs {
            state.replies.push_back(Reply::Connection(chid, CaOp::ConnDown));
        }
        drop(state);
        self.wake();
    }

    pub(crate) fn reconnect(&self, name: &str) {
        let mut state = self.lock();
        let waiting: Vec<ChanId> = state
            .channels
            .iter()
            .filter(|(_, ch)| ch.name == name && ch.state != ChannelState::Connected)
            .map(|(chid, _)| *chid)
            .collect();
        state
            .requests
            .extend(waiting.into_iter().map(Request::Connect));
        drop(state);
        self.wake();
    }

    pub(crate) fn access_changed(&self, name: &str, access: AccessRights) {
        let mut state = self.lock();
        let notify: Vec<ChanId> = state
            .channels
            .iter()
            .filter(|(_, ch)| {
                ch.name == name && ch.access_events && ch.state == ChannelState::Connected
            })
            .map(|(chid, _)| *chid)
            .collect();
        for chid in notify {
            state.replies.push_back(Reply::Access(chid, access));
        }
        drop(state);
        self.wake();
    }

    // request validation

    fn connected_name<'a>(&self, state: &'a ContextState, chid: ChanId) -> Result<&'a str, Eca> {
        let ch = state.channels.get(&chid).ok_or(Eca::BADCHID)?;
        if ch.state != ChannelState::Connected {
            return Err(Eca::DISCONN);
        }
        Ok(&ch.name)
    }

    fn check_read(
        &self,
        state: &ContextState,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
    ) -> Result<(), Eca> {
        let name = self.connected_name(state, chid)?;
        if matches!(dbr_type, DbrType::PutAckt | DbrType::PutAcks) {
            return Err(Eca::BADTYPE);
        }
        let (nelm, access) = self
            .server
            .with_record(name, |pv| (pv.element_count(), pv.access))
            .ok_or(Eca::DISCONN)?;
        if count > nelm {
            return Err(Eca::BADCOUNT);
        }
        if !access.read {
            return Err(Eca::NORDACCESS);
        }
        Ok(())
    }

    fn check_write(
        &self,
        state: &ContextState,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
    ) -> Result<(), Eca> {
        let name = self.connected_name(state, chid)?;
        if !dbr_type.is_writable() {
            return Err(Eca::BADTYPE);
        }
        let (nelm, access) = self
            .server
            .with_record(name, |pv| (pv.element_count(), pv.access))
            .ok_or(Eca::DISCONN)?;
        if count == 0 || count > nelm {
            return Err(Eca::BADCOUNT);
        }
        if !access.write {
            return Err(Eca::NOWTACCESS);
        }
        Ok(())
    }

    fn submit_get(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        dest: Option<&ValueBuffer>,
        completion: impl FnOnce(&mut ContextState, u64) -> Result<Completion, Eca>,
    ) -> Eca {
        let mut state = match self.lock_live() {
            Ok(state) => state,
            Err(status) => return status,
        };
        if let Err(status) = self.check_read(&state, chid, dbr_type, count) {
            return status;
        }
        let completion = match completion(&mut *state, self.next_id()) {
            Ok(completion) => completion,
            Err(status) => return status,
        };
        let transfer = Transfer {
            chid,
            dbr_type,
            count,
            completion,
        };
        self.enqueue(&mut state, Request::Get(transfer, dest.cloned()));
        Eca::NORMAL
    }

    fn submit_put(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
        completion: impl FnOnce(&mut ContextState, u64) -> Result<Completion, Eca>,
    ) -> Eca {
        let mut state = match self.lock_live() {
            Ok(state) => state,
            Err(status) => return status,
        };
        if let Err(status) = self.check_write(&state, chid, dbr_type, count) {
            return status;
        }
        let completion = match completion(&mut *state, self.next_id()) {
            Ok(completion) => completion,
            Err(status) => return status,
        };
        let transfer = Transfer {
            chid,
            dbr_type,
            count,
            completion,
        };
        self.enqueue(
            &mut state,
            Request::Put(transfer, Bytes::copy_from_slice(data)),
        );
        Eca::NORMAL
    }

    fn connected_record<T>(&self, chid: ChanId, f: impl FnOnce(&super::ProcessVariable) -> T) -> Option<T> {
        let state = self.lock();
        let name = self.connected_name(&state, chid).ok()?;
        self.server.with_record(name, f)
    }
}

fn group_op(gid: SyncGroupId) -> impl FnOnce(&mut ContextState, u64) -> Result<Completion, Eca> {
    move |state, id| {
        let group = state.groups.get_mut(&gid).ok_or(Eca::BADSYNCGRP)?;
        group.insert(id);
        Ok(Completion::Group(gid, id))
    }
}

impl NativeClient for LoopbackContext {
    fn is_preemptive(&self) -> bool {
        self.shared.preemptive
    }

    fn attach(&self) -> Eca {
        Eca::NORMAL
    }

    fn detach(&self) {}

    fn destroy(&self) {
        {
            let mut state = self.shared.lock();
            if state.destroyed {
                return;
            }
            *state = ContextState {
                destroyed: true,
                ..ContextState::default()
            };
        }
        self.shared.wake();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("loopback dispatch thread panicked");
            }
        }
        debug!("loopback context destroyed");
    }

    fn version(&self) -> String {
        format!("loopback {}", env!("CARGO_PKG_VERSION"))
    }

    fn create_channel(
        &self,
        name: &str,
        priority: Priority,
        connection_events: bool,
    ) -> Result<ChanId, Eca> {
        if name.is_empty() {
            return Err(Eca::EMPTYSTR);
        }
        let mut state = self.shared.lock_live()?;
        let chid = ChanId(self.shared.next_id());
        let connect_op = (!connection_events).then(|| self.shared.next_id());
        if let Some(op) = connect_op {
            state.io_pending.insert(op);
        }
        state.channels.insert(
            chid,
            ChannelRec {
                name: name.to_string(),
                priority,
                state: ChannelState::NeverConnected,
                connection_events,
                access_events: false,
                connect_op,
            },
        );
        self.shared.enqueue(&mut state, Request::Connect(chid));
        debug!(%chid, name, "loopback channel created");
        Ok(chid)
    }

    fn clear_channel(&self, chid: ChanId) -> Eca {
        let mut state = self.shared.lock();
        let Some(ch) = state.channels.remove(&chid) else {
            return Eca::BADCHID;
        };
        if let Some(op) = ch.connect_op {
            state.io_pending.remove(&op);
        }
        state.subscriptions.retain(|_, sub| sub.chid != chid);
        Eca::NORMAL
    }

    fn set_connection_events(&self, chid: ChanId, enabled: bool) -> Eca {
        let mut state = self.shared.lock();
        let mut pending = None;
        let mut cleared = None;
        {
            let Some(ch) = state.channels.get_mut(&chid) else {
                return Eca::BADCHID;
            };
            ch.connection_events = enabled;
            if enabled {
                cleared = ch.connect_op.take();
            } else if ch.state != ChannelState::Connected && ch.connect_op.is_none() {
                let op = self.shared.next_id();
                ch.connect_op = Some(op);
                pending = Some(op);
            }
        }
        if let Some(op) = cleared {
            state.io_pending.remove(&op);
        }
        if let Some(op) = pending {
            state.io_pending.insert(op);
        }
        Eca::NORMAL
    }

    fn set_access_rights_events(&self, chid: ChanId, enabled: bool) -> Eca {
        let mut state = self.shared.lock();
        let Some(ch) = state.channels.get_mut(&chid) else {
            return Eca::BADCHID;
        };
        ch.access_events = enabled;
        let connected = ch.state == ChannelState::Connected;
        let name = ch.name.clone();
        if enabled && connected {
            let access = self
                .shared
                .server
                .with_record(&name, |pv| pv.access)
                .unwrap_or_default();
            state.replies.push_back(Reply::Access(chid, access));
            drop(state);
            self.shared.wake();
        }
        Eca::NORMAL
    }

    fn array_get(&self, chid: ChanId, dbr_type: DbrType, count: usize, dest: &ValueBuffer) -> Eca {
        self.shared
            .submit_get(chid, dbr_type, count, Some(dest), |state, id| {
                state.io_pending.insert(id);
                Ok(Completion::Io(id))
            })
    }

    fn array_get_callback(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        key: RequestKey,
    ) -> Eca {
        self.shared
            .submit_get(chid, dbr_type, count, None, |_, _| Ok(Completion::Callback(key)))
    }

    fn array_put(&self, chid: ChanId, dbr_type: DbrType, count: usize, data: &[u8]) -> Eca {
        self.shared
            .submit_put(chid, dbr_type, count, data, |_, _| Ok(Completion::Silent))
    }

    fn array_put_callback(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
        key: RequestKey,
    ) -> Eca {
        self.shared
            .submit_put(chid, dbr_type, count, data, |_, _| Ok(Completion::Callback(key)))
    }

    fn create_subscription(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        mask: EventMask,
        key: RequestKey,
    ) -> Result<EventId, Eca> {
        if mask.is_empty() {
            return Err(Eca::BADMASK);
        }
        let mut state = self.shared.lock_live()?;
        let connected = match state.channels.get(&chid) {
            None => return Err(Eca::BADCHID),
            Some(ch) => ch.state == ChannelState::Connected,
        };
        if connected {
            self.shared.check_read(&state, chid, dbr_type, count)?;
        } else if matches!(dbr_type, DbrType::PutAckt | DbrType::PutAcks) {
            return Err(Eca::BADTYPE);
        }
        let evid = EventId(self.shared.next_id());
        state.subscriptions.insert(
            evid,
            SubscriptionRec {
                chid,
                dbr_type,
                count,
                mask,
                key,
            },
        );
        if connected {
            self.shared.enqueue(&mut state, Request::Update(evid));
        }
        Ok(evid)
    }

    fn clear_subscription(&self, evid: EventId) -> Eca {
        match self.shared.lock().subscriptions.remove(&evid) {
            Some(_) => Eca::NORMAL,
            None => Eca::BADMONID,
        }
    }

    fn pend_io(&self, timeout: Duration) -> Eca {
        if self
            .shared
            .wait_for(timeout, |state| state.io_pending.is_empty())
        {
            return Eca::NORMAL;
        }
        let abandoned = std::mem::take(&mut self.shared.lock().io_pending);
        debug!(outstanding = abandoned.len(), "pend_io timed out");
        Eca::TIMEOUT
    }

    fn pend_event(&self, timeout: Duration) -> Eca {
        self.shared.wait_for(timeout, |_| false);
        Eca::TIMEOUT
    }

    fn flush_io(&self) -> Eca {
        if !self.shared.preemptive {
            self.shared.process_requests();
        }
        Eca::NORMAL
    }

    fn test_io(&self) -> Eca {
        if self.shared.lock().io_pending.is_empty() {
            Eca::IODONE
        } else {
            Eca::IOINPROGRESS
        }
    }

    fn field_type(&self, chid: ChanId) -> FieldType {
        self.shared
            .connected_record(chid, |pv| pv.field_type())
            .unwrap_or(FieldType::NotConnected)
    }

    fn element_count(&self, chid: ChanId) -> usize {
        self.shared
            .connected_record(chid, |pv| pv.element_count())
            .unwrap_or(0)
    }

    fn name(&self, chid: ChanId) -> Option<String> {
        self.shared
            .lock()
            .channels
            .get(&chid)
            .map(|ch| ch.name.clone())
    }

    fn state(&self, chid: ChanId) -> ChannelState {
        self.shared
            .lock()
            .channels
            .get(&chid)
            .map_or(ChannelState::Closed, |ch| ch.state)
    }

    fn host_name(&self, chid: ChanId) -> Option<String> {
        self.shared
            .connected_record(chid, |_| ())
            .map(|()| self.shared.server.config().host_name.clone())
    }

    fn access_rights(&self, chid: ChanId) -> AccessRights {
        self.shared
            .connected_record(chid, |pv| pv.access)
            .unwrap_or(AccessRights::NONE)
    }

    fn sg_create(&self) -> Result<SyncGroupId, Eca> {
        let mut state = self.shared.lock_live()?;
        let gid = SyncGroupId(self.shared.next_id());
        state.groups.insert(gid, HashSet::new());
        Ok(gid)
    }

    fn sg_delete(&self, gid: SyncGroupId) -> Eca {
        match self.shared.lock().groups.remove(&gid) {
            Some(_) => Eca::NORMAL,
            None => Eca::BADSYNCGRP,
        }
    }

    fn sg_block(&self, gid: SyncGroupId, timeout: Duration) -> Eca {
        if !self.shared.lock().groups.contains_key(&gid) {
            return Eca::BADSYNCGRP;
        }
        let done = self.shared.wait_for(timeout, |state| {
            state.groups.get(&gid).is_none_or(HashSet::is_empty)
        });
        if done {
            Eca::NORMAL
        } else {
            Eca::TIMEOUT
        }
    }

    fn sg_test(&self, gid: SyncGroupId) -> Eca {
        match self.shared.lock().groups.get(&gid) {
            None => Eca::BADSYNCGRP,
            Some(ops) if ops.is_empty() => Eca::IODONE,
            Some(_) => Eca::IOINPROGRESS,
        }
    }

    fn sg_reset(&self, gid: SyncGroupId) -> Eca {
        match self.shared.lock().groups.get_mut(&gid) {
            None => Eca::BADSYNCGRP,
            Some(ops) => {
                ops.clear();
                Eca::NORMAL
            }
        }
    }

    fn sg_array_get(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        dest: &ValueBuffer,
    ) -> Eca {
        self.shared
            .submit_get(chid, dbr_type, count, Some(dest), group_op(gid))
    }

    fn sg_array_put(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
    ) -> Eca {
        self.shared
            .submit_put(chid, dbr_type, count, data, group_op(gid))
    }

    fn set_exception_events(&self, enabled: bool) -> Eca {
        self.shared.exceptions.store(enabled, Ordering::Release);
        Eca::NORMAL
    }
}
