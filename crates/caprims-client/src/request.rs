use std::sync::Arc;

use caprims_dbr::{DbrType, DecodeOptions};
use caprims_native::{EventMask, Priority};

use crate::registry::{AccessRightsCallback, AccessRightsEvent, ConnectionCallback, ConnectionEvent};

/// Options for a new channel.
#[derive(Clone, Default)]
pub struct ChannelOptions {
    /// `None` uses the context's default priority.
    pub priority: Option<Priority>,
    /// Without a connection callback the connection is outstanding IO for
    /// `pend_io`.
    pub connection: Option<ConnectionCallback>,
    pub access_rights: Option<AccessRightsCallback>,
}

impl ChannelOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn on_connection(
        mut self,
        callback: impl Fn(ConnectionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.connection = Some(Arc::new(callback));
        self
    }

    pub fn on_access_rights(
        mut self,
        callback: impl Fn(AccessRightsEvent) + Send + Sync + 'static,
    ) -> Self {
        self.access_rights = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("priority", &self.priority)
            .field("connection", &self.connection.is_some())
            .field("access_rights", &self.access_rights.is_some())
            .finish()
    }
}

/// Shape of a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetRequest {
    /// `None` reads the channel's native field type.
    pub dbr_type: Option<DbrType>,
    /// Element count. Out-of-range values fall back to the native count;
    /// zero asks a callback read for the server's current count.
    pub count: Option<i64>,
    /// `None` uses the context's decode options.
    pub decode: Option<DecodeOptions>,
}

impl GetRequest {
    pub fn with_type(mut self, dbr_type: DbrType) -> Self {
        self.dbr_type = Some(dbr_type);
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = Some(decode);
        self
    }
}

/// Shape of a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub dbr_type: Option<DbrType>,
    /// Same rules as a callback read: zero follows the server's count.
    pub count: Option<i64>,
    /// `None` uses the context's default mask.
    pub mask: Option<EventMask>,
    pub decode: Option<DecodeOptions>,
}

impl SubscribeRequest {
    pub fn with_type(mut self, dbr_type: DbrType) -> Self {
        self.dbr_type = Some(dbr_type);
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_mask(mut self, mask: EventMask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_decode(mut self, decode: DecodeOptions) -> Self {
        self.decode = Some(decode);
        self
    }
}

/// Element count of a buffered read: anything outside `1..=native` is native.
pub(crate) fn buffered_count(requested: Option<i64>, native: usize) -> usize {
    let native = native.max(1);
    match requested {
        Some(count) if count > 0 && (count as usize) <= native => count as usize,
        _ => native,
    }
}

/// Element count of a callback read or subscription: zero passes through.
pub(crate) fn callback_count(requested: Option<i64>, native: usize) -> usize {
    match requested {
        Some(count) if count >= 0 && (count as usize) <= native => count as usize,
        _ => native,
    }
}
