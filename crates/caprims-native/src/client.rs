use std::sync::Arc;
use std::time::Duration;

use caprims_dbr::{DbrType, FieldType};

use crate::buffer::ValueBuffer;
use crate::mask::{AccessRights, CaOp, ChannelState, EventMask, Priority};
use crate::status::Eca;

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

native_id!(
    /// Native channel identity.
    ChanId
);
native_id!(
    /// Native subscription identity.
    EventId
);
native_id!(
    /// Native synchronous group identity.
    SyncGroupId
);
native_id!(
    /// Opaque key passed back with every callback completion.
    RequestKey
);

/// A read, write or subscription completion.
#[derive(Debug, Clone, Copy)]
pub struct EventArgs<'a> {
    pub key: RequestKey,
    pub chid: ChanId,
    pub op: CaOp,
    /// Raw request type; kept raw so a bad value reaches the bridge intact.
    pub dbr_type: i64,
    pub count: usize,
    pub status: Eca,
    /// Record bytes of a successful read or subscription update.
    pub data: Option<&'a [u8]>,
}

/// An asynchronous error the native library could not report synchronously.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionArgs<'a> {
    pub chid: Option<ChanId>,
    pub op: CaOp,
    pub dbr_type: i64,
    pub count: usize,
    pub status: Eca,
    pub context: &'a str,
    pub file: Option<&'a str>,
    pub line: u32,
}

/// Receiver of everything a native context reports asynchronously.
///
/// Implementations are invoked on whichever thread the native library
/// dispatches from and must not block on the context that calls them.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: EventArgs<'_>);

    /// `op` is [`CaOp::ConnUp`] or [`CaOp::ConnDown`].
    fn on_connection(&self, chid: ChanId, op: CaOp);

    fn on_access_rights(&self, chid: ChanId, rights: AccessRights);

    fn on_exception(&self, exception: ExceptionArgs<'_>);
}

/// Factory of native client contexts.
pub trait NativeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create a context that reports to `sink`.
    ///
    /// A preemptive context dispatches callbacks from its own threads; a
    /// non-preemptive one only while the owner is inside a pend call.
    fn create_context(
        &self,
        preemptive: bool,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn NativeClient>, Eca>;
}

/// One native client context.
///
/// Mirrors the native library's operation set. Timeouts of zero wait without
/// limit. Every call returns the native status; lookups on an unknown
/// identifier return their neutral value.
pub trait NativeClient: Send + Sync {
    fn is_preemptive(&self) -> bool;

    /// Bind the calling thread to this context.
    fn attach(&self) -> Eca;

    /// Unbind the calling thread.
    fn detach(&self);

    /// Tear the context down. Further calls fail.
    fn destroy(&self);

    fn version(&self) -> String;

    // channels

    /// Start connecting a channel. Without connection events, the connection
    /// counts as outstanding IO for `pend_io`.
    fn create_channel(
        &self,
        name: &str,
        priority: Priority,
        connection_events: bool,
    ) -> Result<ChanId, Eca>;

    fn clear_channel(&self, chid: ChanId) -> Eca;

    fn set_connection_events(&self, chid: ChanId, enabled: bool) -> Eca;

    fn set_access_rights_events(&self, chid: ChanId, enabled: bool) -> Eca;

    // data

    fn array_get(&self, chid: ChanId, dbr_type: DbrType, count: usize, dest: &ValueBuffer)
        -> Eca;

    fn array_get_callback(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        key: RequestKey,
    ) -> Eca;

    fn array_put(&self, chid: ChanId, dbr_type: DbrType, count: usize, data: &[u8]) -> Eca;

    fn array_put_callback(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
        key: RequestKey,
    ) -> Eca;

    fn create_subscription(
        &self,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        mask: EventMask,
        key: RequestKey,
    ) -> Result<EventId, Eca>;

    fn clear_subscription(&self, evid: EventId) -> Eca;

    // io

    fn pend_io(&self, timeout: Duration) -> Eca;

    /// Process background activity for `timeout`; reports `ECA_TIMEOUT`.
    fn pend_event(&self, timeout: Duration) -> Eca;

    fn flush_io(&self) -> Eca;

    /// `ECA_IODONE` or `ECA_IOINPROGRESS`.
    fn test_io(&self) -> Eca;

    // queries

    fn field_type(&self, chid: ChanId) -> FieldType;

    fn element_count(&self, chid: ChanId) -> usize;

    fn name(&self, chid: ChanId) -> Option<String>;

    fn state(&self, chid: ChanId) -> ChannelState;

    fn host_name(&self, chid: ChanId) -> Option<String>;

    fn access_rights(&self, chid: ChanId) -> AccessRights;

    // synchronous groups

    fn sg_create(&self) -> Result<SyncGroupId, Eca>;

    fn sg_delete(&self, gid: SyncGroupId) -> Eca;

    fn sg_block(&self, gid: SyncGroupId, timeout: Duration) -> Eca;

    fn sg_test(&self, gid: SyncGroupId) -> Eca;

    fn sg_reset(&self, gid: SyncGroupId) -> Eca;

    fn sg_array_get(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        dest: &ValueBuffer,
    ) -> Eca;

    fn sg_array_put(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        dbr_type: DbrType,
        count: usize,
        data: &[u8],
    ) -> Eca;

    // exceptions

    /// Route exceptions to the sink, or restore the native default reporter.
    fn set_exception_events(&self, enabled: bool) -> Eca;
}
