//! Backend over the EPICS `libca` client library.
//!
//! Every channel carries its context's [`Anchor`] as the native user pointer,
//! and callback requests carry their [`RequestKey`] as the per-request
//! argument, so trampolines recover both without per-request allocations.

use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use caprims_dbr::{dbr_size_n, DbrType, FieldType};
use libc::{c_char, c_double, c_int, c_long, c_short, c_uint, c_ulong, c_void};
use tracing::{debug, error};

use crate::buffer::ValueBuffer;
use crate::client::{
    ChanId, EventArgs, EventId, EventSink, ExceptionArgs, NativeBackend, NativeClient, RequestKey,
    SyncGroupId,
};
use crate::mask::{AccessRights, CaOp, ChannelState, EventMask, Priority};
use crate::status::Eca;

#[allow(non_camel_case_types, non_snake_case, dead_code)]
mod ffi {
    use super::*;

    pub type chid = *mut c_void;
    pub type evid = *mut c_void;
    pub type chtype = c_long;
    pub type CA_SYNC_GID = c_uint;

    #[repr(C)]
    pub struct event_handler_args {
        pub usr: *mut c_void,
        pub chid: chid,
        pub type_: c_long,
        pub count: c_long,
        pub dbr: *const c_void,
        pub status: c_int,
    }

    #[repr(C)]
    pub struct connection_handler_args {
        pub chid: chid,
        pub op: c_long,
    }

    #[repr(C)]
    pub struct access_rights_handler_args {
        pub chid: chid,
        /// `caar` bitfield: bit 0 read, bit 1 write.
        pub ar: c_uint,
    }

    #[repr(C)]
    pub struct exception_handler_args {
        pub usr: *mut c_void,
        pub chid: chid,
        pub type_: c_long,
        pub count: c_long,
        pub addr: *mut c_void,
        pub stat: c_long,
        pub op: c_long,
        pub ctx: *const c_char,
        pub pFile: *const c_char,
        pub lineNo: c_uint,
    }

    pub type caCh = extern "C" fn(connection_handler_args);
    pub type caArh = extern "C" fn(access_rights_handler_args);
    pub type caEventCallBackFunc = extern "C" fn(event_handler_args);
    pub type caExceptionHandler = extern "C" fn(exception_handler_args);

    #[link(name = "ca")]
    extern "C" {
        pub fn ca_context_create(preemptive: c_int) -> c_int;
        pub fn ca_current_context() -> *mut c_void;
        pub fn ca_attach_context(context: *mut c_void) -> c_int;
        pub fn ca_detach_context();
        pub fn ca_context_destroy();
        pub fn ca_version() -> *const c_char;

        pub fn ca_create_channel(
            name: *const c_char,
            conn: Option<caCh>,
            puser: *mut c_void,
            priority: c_uint,
            pchid: *mut chid,
        ) -> c_int;
        pub fn ca_clear_channel(chan: chid) -> c_int;
        pub fn ca_change_connection_event(chan: chid, conn: Option<caCh>) -> c_int;
        pub fn ca_replace_access_rights_event(chan: chid, arh: Option<caArh>) -> c_int;
        pub fn ca_add_exception_event(handler: Option<caExceptionHandler>, arg: *mut c_void)
            -> c_int;

        pub fn ca_array_get(type_: chtype, count: c_ulong, chan: chid, pvalue: *mut c_void)
            -> c_int;
        pub fn ca_array_get_callback(
            type_: chtype,
            count: c_ulong,
            chan: chid,
            pfunc: caEventCallBackFunc,
            arg: *mut c_void,
        ) -> c_int;
        pub fn ca_array_put(
            type_: chtype,
            count: c_ulong,
            chan: chid,
            pvalue: *const c_void,
        ) -> c_int;
        pub fn ca_array_put_callback(
            type_: chtype,
            count: c_ulong,
            chan: chid,
            pvalue: *const c_void,
            pfunc: caEventCallBackFunc,
            arg: *mut c_void,
        ) -> c_int;
        pub fn ca_create_subscription(
            type_: chtype,
            count: c_ulong,
            chan: chid,
            mask: c_long,
            pfunc: caEventCallBackFunc,
            arg: *mut c_void,
            pevid: *mut evid,
        ) -> c_int;
        pub fn ca_clear_subscription(event: evid) -> c_int;

        pub fn ca_pend_io(timeout: c_double) -> c_int;
        pub fn ca_pend_event(timeout: c_double) -> c_int;
        pub fn ca_flush_io() -> c_int;
        pub fn ca_test_io() -> c_int;

        pub fn ca_field_type(chan: chid) -> c_short;
        pub fn ca_element_count(chan: chid) -> c_ulong;
        pub fn ca_name(chan: chid) -> *const c_char;
        pub fn ca_state(chan: chid) -> c_int;
        pub fn ca_host_name(chan: chid) -> *const c_char;
        pub fn ca_read_access(chan: chid) -> c_uint;
        pub fn ca_write_access(chan: chid) -> c_uint;
        pub fn ca_puser(chan: chid) -> *mut c_void;

        pub fn ca_sg_create(pgid: *mut CA_SYNC_GID) -> c_int;
        pub fn ca_sg_delete(gid: CA_SYNC_GID) -> c_int;
        pub fn ca_sg_block(gid: CA_SYNC_GID, timeout: c_double) -> c_int;
        pub fn ca_sg_test(gid: CA_SYNC_GID) -> c_int;
        pub fn ca_sg_reset(gid: CA_SYNC_GID) -> c_int;
        pub fn ca_sg_array_get(
            gid: CA_SYNC_GID,
            type_: chtype,
            count: c_ulong,
            chan: chid,
            pvalue: *mut c_void,
        ) -> c_int;
        pub fn ca_sg_array_put(
            gid: CA_SYNC_GID,
            type_: chtype,
            count: c_ulong,
            chan: chid,
            pvalue: *const c_void,
        ) -> c_int;
    }
}

/// Backend creating `libca` contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Libca;

/// Per-context state reachable from trampolines.
struct Anchor {
    sink: Arc<dyn EventSink>,
}

/// Native context handle.
struct RawContext(*mut c_void);

// SAFETY: a ca_client_context is designed to be shared; threads join it with
// ca_attach_context before use, which the owner enforces.
unsafe impl Send for RawContext {}
// SAFETY: see above; the handle itself is never dereferenced on this side.
unsafe impl Sync for RawContext {}

#[derive(Default)]
struct Tracked {
    channels: HashSet<u64>,
    subscriptions: HashSet<u64>,
    io: Vec<ValueBuffer>,
    groups: HashMap<u64, Vec<ValueBuffer>>,
}

/// A `libca` client context.
pub struct LibcaContext {
    context: RawContext,
    anchor: Box<Anchor>,
    preemptive: bool,
    tracked: Mutex<Tracked>,
    destroyed: AtomicBool,
}

fn callback_boundary(what: &'static str, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(callback = what, "panic inside channel access callback suppressed");
    }
}

fn status(code: c_int) -> Eca {
    Eca::from_raw(code)
}

fn chan_id(chan: ffi::chid) -> ChanId {
    ChanId(chan as usize as u64)
}

fn raw_chan(chid: ChanId) -> ffi::chid {
    chid.0 as usize as ffi::chid
}

fn timeout_secs(timeout: Duration) -> c_double {
    timeout.as_secs_f64()
}

fn lossy(text: *const c_char) -> Option<String> {
    if text.is_null() {
        return None;
    }
    // SAFETY: libca hands out NUL-terminated strings that outlive the call.
    Some(unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned())
}

/// Recover the anchor stored as a channel's user pointer.
///
/// # Safety
/// `chan` must be a channel created by [`LibcaContext::create_channel`]
/// whose context has not been destroyed.
unsafe fn anchor_of<'a>(chan: ffi::chid) -> Option<&'a Anchor> {
    if chan.is_null() {
        return None;
    }
    (ffi::ca_puser(chan) as *const Anchor).as_ref()
}

fn deliver_event(args: ffi::event_handler_args, op: CaOp) {
    // SAFETY: libca only calls back for channels created by this module.
    let Some(anchor) = (unsafe { anchor_of(args.chid) }) else {
        return;
    };
    let code = status(args.status);
    let count = usize::try_from(args.count).unwrap_or(0);
    let data = if code.is_success() && !args.dbr.is_null() {
        let len = dbr_size_n(args.type_ as i64, count as i64).unwrap_or(0);
        // SAFETY: on success dbr points at a record of type/count that stays
        // valid for the duration of the callback.
        Some(unsafe { std::slice::from_raw_parts(args.dbr.cast::<u8>(), len) })
    } else {
        None
    };
    anchor.sink.on_event(EventArgs {
        key: RequestKey(args.usr as usize as u64),
        chid: chan_id(args.chid),
        op,
        dbr_type: args.type_ as i64,
        count,
        status: code,
        data,
    });
}

extern "C" fn on_get(args: ffi::event_handler_args) {
    callback_boundary("get", || deliver_event(args, CaOp::Get));
}

extern "C" fn on_put(args: ffi::event_handler_args) {
    callback_boundary("put", || deliver_event(args, CaOp::Put));
}

extern "C" fn on_monitor(args: ffi::event_handler_args) {
    callback_boundary("monitor", || deliver_event(args, CaOp::AddEvent));
}

extern "C" fn on_connection(args: ffi::connection_handler_args) {
    callback_boundary("connection", || {
        // SAFETY: connection handlers are only installed on our channels.
        if let Some(anchor) = unsafe { anchor_of(args.chid) } {
            anchor
                .sink
                .on_connection(chan_id(args.chid), CaOp::from_raw(args.op as i64));
        }
    });
}

extern "C" fn on_access_rights(args: ffi::access_rights_handler_args) {
    callback_boundary("access_rights", || {
        // SAFETY: access-rights handlers are only installed on our channels.
        if let Some(anchor) = unsafe { anchor_of(args.chid) } {
            anchor
                .sink
                .on_access_rights(chan_id(args.chid), AccessRights::from_bits(args.ar));
        }
    });
}

extern "C" fn on_exception(args: ffi::exception_handler_args) {
    callback_boundary("exception", || {
        // SAFETY: the handler argument is the anchor passed to ca_add_exception_event.
        let Some(anchor) = (unsafe { (args.usr as *const Anchor).as_ref() }) else {
            return;
        };
        let context = lossy(args.ctx).unwrap_or_default();
        let file = lossy(args.pFile);
        anchor.sink.on_exception(ExceptionArgs {
            chid: (!args.chid.is_null()).then(|| chan_id(args.chid)),
            op: CaOp::from_raw(args.op as i64),
            dbr_type: args.type_ as i64,
            count: usize::try_from(args.count).unwrap_or(0),
            status: Eca::from_raw(args.stat as i32),
            context: &context,
            file: file.as_deref(),
            line: args.lineNo,
        });
    });
}

impl NativeBackend for Libca {
    fn name(&self) -> &'static str {
        "libca"
    }

    fn create_context(
        &self,
        preemptive: bool,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn NativeClient>, Eca> {
        // SAFETY: querying the calling thread's context has no preconditions.
        if !unsafe { ffi::ca_current_context() }.is_null() {
            return Err(Eca::ISATTACHED);
        }
        // SAFETY: creates and attaches a context to the calling thread.
        let code = status(unsafe { ffi::ca_context_create(c_int::from(preemptive)) });
        if !code.is_success() {
            return Err(code);
        }
        // SAFETY: the context created above is now current.
        let context = unsafe { ffi::ca_current_context() };
        debug!(preemptive, "libca context created");
        Ok(Arc::new(LibcaContext {
            context: RawContext(context),
            anchor: Box::new(Anchor { sink }),
            preemptive,
            tracked: Mutex::default(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

impl LibcaContext {
    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn anchor_ptr(&self) -> *mut c_void {
        let anchor: &Anchor = &self.anchor;
        anchor as *const Anchor as *mut c_void
    }

    fn known_channel(&self, chid: ChanId) -> Result<ffi::chid, Eca> {
        if self.tracked().channels.contains(&chid.0) {
            Ok(raw_chan(chid))
        } else {
            Err(Eca::BADCHID)
        }
    }

    fn finish_io(&self, code: Eca) {
        let buffers = std::mem::take(&mut self.tracked().io);
        if code == Eca::NORMAL {
            buffers.iter().for_each(ValueBuffer::mark_filled);
        }
    }
}

macro_rules! chan_or_return {
    ($self:ident, $chid:expr) => {
        match $self.known_channel($chid) {
            Ok(chan) => chan,
            Err(code) => return code,
        }
    };
}

impl NativeClient for LibcaContext {
    fn is_preemptive(&self) -> bool {
        self.preemptive
    }

    fn attach(&self) -> Eca {
        // SAFETY: the handle came from ca_current_context and is not destroyed.
        status(unsafe { ffi::ca_attach_context(self.context.0) })
    }

    fn detach(&self) {
        // SAFETY: detaching an unattached thread is a no-op in libca.
        unsafe { ffi::ca_detach_context() }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: context destruction acts on the current thread's context,
        // so attach first; ISATTACHED means it already is current.
        unsafe {
            if ffi::ca_current_context() != self.context.0 {
                ffi::ca_attach_context(self.context.0);
            }
            ffi::ca_context_destroy();
        }
        *self.tracked() = Tracked::default();
        debug!("libca context destroyed");
    }

    fn version(&self) -> String {
        // SAFETY: ca_version returns a static string.
        lossy(unsafe { ffi::ca_version() }).unwrap_or_default()
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
        let cname = CString::new(name).map_err(|_| Eca::BADSTR)?;
        let handler: Option<ffi::caCh> = connection_events.then_some(on_connection as ffi::caCh);
        let mut chan: ffi::chid = std::ptr::null_mut();
        // SAFETY: cname outlives the call; the anchor outlives every channel.
        let code = status(unsafe {
            ffi::ca_create_channel(
                cname.as_ptr(),
                handler,
                self.anchor_ptr(),
                priority.get(),
                &mut chan,
            )
        });
        if !code.is_success() {
            return Err(code);
        }
        let chid = chan_id(chan);
        self.tracked().channels.insert(chid.0);
        Ok(chid)
    }

    fn clear_channel(&self, chid: ChanId) -> Eca {
        if !self.tracked().channels.remove(&chid.0) {
            return Eca::BADCHID;
        }
        // SAFETY: chid was created by this context and is cleared once.
        status(unsafe { ffi::ca_clear_channel(raw_chan(chid)) })
    }

    fn set_connection_events(&self, chid: ChanId, enabled: bool) -> Eca {
        let chan = chan_or_return!(self, chid);
        let handler: Option<ffi::caCh> = enabled.then_some(on_connection as ffi::caCh);
        // SAFETY: chan is a live channel of this context.
        status(unsafe { ffi::ca_change_connection_event(chan, handler) })
    }

    fn set_access_rights_events(&self, chid: ChanId, enabled: bool) -> Eca {
        let chan = chan_or_return!(self, chid);
        let handler: Option<ffi::caArh> = enabled.then_some(on_access_rights as ffi::caArh);
        // SAFETY: chan is a live channel of this context.
        status(unsafe { ffi::ca_replace_access_rights_event(chan, handler) })
    }

    fn array_get(&self, chid: ChanId, dbr_type: DbrType, count: usize, dest: &ValueBuffer) -> Eca {
        let chan = chan_or_return!(self, chid);
        // SAFETY: dest is sized for type/count and kept alive in `tracked.io`
        // until the next pend_io returns.
        let code = status(unsafe {
            ffi::ca_array_get(
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                dest.as_mut_ptr().cast(),
            )
        });
        if code.is_success() {
            self.tracked().io.push(dest.clone());
        }
        code
    }

    fn array_get_callback(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        key: RequestKey,
    ) -> Eca {
        let chan = chan_or_return!(self, chid);
        // SAFETY: chan is live; the key travels as an opaque integer.
        status(unsafe {
            ffi::ca_array_get_callback(
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                on_get,
                key.0 as usize as *mut c_void,
            )
        })
    }

    fn array_put(&self, chid: ChanId, dbr_type: DbrType, count: usize, data: &[u8]) -> Eca {
        let chan = chan_or_return!(self, chid);
        // SAFETY: libca copies the value before returning.
        status(unsafe {
            ffi::ca_array_put(
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                data.as_ptr().cast(),
            )
        })
    }

    fn array_put_callback(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
        key: RequestKey,
    ) -> Eca {
        let chan = chan_or_return!(self, chid);
        // SAFETY: libca copies the value before returning.
        status(unsafe {
            ffi::ca_array_put_callback(
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                data.as_ptr().cast(),
                on_put,
                key.0 as usize as *mut c_void,
            )
        })
    }

    fn create_subscription(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        mask: EventMask,
        key: RequestKey,
    ) -> Result<EventId, Eca> {
        let chan = self.known_channel(chid)?;
        let mut event: ffi::evid = std::ptr::null_mut();
        // SAFETY: chan is live; libca writes the subscription handle into `event`.
        let code = status(unsafe {
            ffi::ca_create_subscription(
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                mask.bits() as c_long,
                on_monitor,
                key.0 as usize as *mut c_void,
                &mut event,
            )
        });
        if !code.is_success() {
            return Err(code);
        }
        let evid = EventId(event as usize as u64);
        self.tracked().subscriptions.insert(evid.0);
        Ok(evid)
    }

    fn clear_subscription(&self, evid: EventId) -> Eca {
        if !self.tracked().subscriptions.remove(&evid.0) {
            return Eca::BADMONID;
        }
        // SAFETY: evid was returned by ca_create_subscription and is cleared once.
        status(unsafe { ffi::ca_clear_subscription(evid.0 as usize as ffi::evid) })
    }

    fn pend_io(&self, timeout: Duration) -> Eca {
        // SAFETY: plain call on the current thread's context.
        let code = status(unsafe { ffi::ca_pend_io(timeout_secs(timeout)) });
        self.finish_io(code);
        code
    }

    fn pend_event(&self, timeout: Duration) -> Eca {
        // SAFETY: plain call on the current thread's context.
        status(unsafe { ffi::ca_pend_event(timeout_secs(timeout)) })
    }

    fn flush_io(&self) -> Eca {
        // SAFETY: plain call on the current thread's context.
        status(unsafe { ffi::ca_flush_io() })
    }

    fn test_io(&self) -> Eca {
        // SAFETY: plain call on the current thread's context.
        status(unsafe { ffi::ca_test_io() })
    }

    fn field_type(&self, chid: ChanId) -> FieldType {
        match self.known_channel(chid) {
            // SAFETY: chan is a live channel of this context.
            Ok(chan) => FieldType::from_raw(i64::from(unsafe { ffi::ca_field_type(chan) })),
            Err(_) => FieldType::NotConnected,
        }
    }

    fn element_count(&self, chid: ChanId) -> usize {
        match self.known_channel(chid) {
            // SAFETY: chan is a live channel of this context.
            Ok(chan) => unsafe { ffi::ca_element_count(chan) } as usize,
            Err(_) => 0,
        }
    }

    fn name(&self, chid: ChanId) -> Option<String> {
        let chan = self.known_channel(chid).ok()?;
        // SAFETY: the name buffer lives as long as the channel.
        lossy(unsafe { ffi::ca_name(chan) })
    }

    fn state(&self, chid: ChanId) -> ChannelState {
        match self.known_channel(chid) {
            // SAFETY: chan is a live channel of this context.
            Ok(chan) => ChannelState::from_raw(i64::from(unsafe { ffi::ca_state(chan) })),
            Err(_) => ChannelState::Closed,
        }
    }

    fn host_name(&self, chid: ChanId) -> Option<String> {
        let chan = self.known_channel(chid).ok()?;
        // SAFETY: the host name buffer lives as long as the channel.
        lossy(unsafe { ffi::ca_host_name(chan) })
    }

    fn access_rights(&self, chid: ChanId) -> AccessRights {
        let Ok(chan) = self.known_channel(chid) else {
            return AccessRights::NONE;
        };
        // SAFETY: chan is a live channel of this context.
        unsafe {
            AccessRights {
                read: ffi::ca_read_access(chan) != 0,
                write: ffi::ca_write_access(chan) != 0,
            }
        }
    }

    fn sg_create(&self) -> Result<SyncGroupId, Eca> {
        let mut gid: ffi::CA_SYNC_GID = 0;
        // SAFETY: libca writes the new group id into `gid`.
        let code = status(unsafe { ffi::ca_sg_create(&mut gid) });
        if !code.is_success() {
            return Err(code);
        }
        self.tracked().groups.insert(u64::from(gid), Vec::new());
        Ok(SyncGroupId(u64::from(gid)))
    }

    fn sg_delete(&self, gid: SyncGroupId) -> Eca {
        // SAFETY: libca validates group ids itself.
        let code = status(unsafe { ffi::ca_sg_delete(gid.0 as ffi::CA_SYNC_GID) });
        self.tracked().groups.remove(&gid.0);
        code
    }

    fn sg_block(&self, gid: SyncGroupId, timeout: Duration) -> Eca {
        // SAFETY: libca validates group ids itself.
        let code = status(unsafe { ffi::ca_sg_block(gid.0 as ffi::CA_SYNC_GID, timeout_secs(timeout)) });
        if code == Eca::NORMAL {
            if let Some(buffers) = self.tracked().groups.get_mut(&gid.0) {
                buffers.drain(..).for_each(|buf| buf.mark_filled());
            }
        }
        code
    }

    fn sg_test(&self, gid: SyncGroupId) -> Eca {
        // SAFETY: libca validates group ids itself.
        status(unsafe { ffi::ca_sg_test(gid.0 as ffi::CA_SYNC_GID) })
    }

    fn sg_reset(&self, gid: SyncGroupId) -> Eca {
        // SAFETY: libca validates group ids itself.
        let code = status(unsafe { ffi::ca_sg_reset(gid.0 as ffi::CA_SYNC_GID) });
        if let Some(buffers) = self.tracked().groups.get_mut(&gid.0) {
            buffers.clear();
        }
        code
    }

    fn sg_array_get(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        dest: &ValueBuffer,
    ) -> Eca {
        let chan = chan_or_return!(self, chid);
        // SAFETY: dest is kept alive in the group's list until the group
        // blocks successfully, is reset or is deleted.
        let code = status(unsafe {
            ffi::ca_sg_array_get(
                gid.0 as ffi::CA_SYNC_GID,
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                dest.as_mut_ptr().cast(),
            )
        });
        if code.is_success() {
            self.tracked()
                .groups
                .entry(gid.0)
                .or_default()
                .push(dest.clone());
        }
        code
    }

    fn sg_array_put(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
    ) -> Eca {
        let chan = chan_or_return!(self, chid);
        // SAFETY: libca copies the value before returning.
        status(unsafe {
            ffi::ca_sg_array_put(
                gid.0 as ffi::CA_SYNC_GID,
                dbr_type.as_raw() as c_long,
                count as c_ulong,
                chan,
                data.as_ptr().cast(),
            )
        })
    }

    fn set_exception_events(&self, enabled: bool) -> Eca {
        let (handler, arg): (Option<ffi::caExceptionHandler>, *mut c_void) = if enabled {
            (Some(on_exception), self.anchor_ptr())
        } else {
            (None, std::ptr::null_mut())
        };
        // SAFETY: the anchor outlives the context that may call the handler.
        status(unsafe { ffi::ca_add_exception_event(handler, arg) })
    }
}

impl Drop for LibcaContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
