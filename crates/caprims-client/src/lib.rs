//! Channel Access client context.
//!
//! A [`Context`] wraps one native client context and owns everything the
//! native library may call back into:
//! - [`Registry`]: per-request tokens and per-channel subscriptions, keyed by
//!   an opaque integer that is the only thing handed to native code
//! - [`SyncGroups`]: batches of buffered reads and writes awaited as one
//! - [`facade`]: blocking search, get and put helpers
//!
//! Completions run outside the registry lock, on the pending thread for a
//! non-preemptive context or on a native thread for a preemptive one.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod facade;
pub mod pending;
pub mod registry;
pub mod request;
pub mod sync_group;

pub use config::ContextConfig;
pub use context::Context;
pub use dispatch::{ExceptionEvent, ExceptionHandler};
pub use error::{CaError, Result};
pub use facade::{get_and_wait, put_and_wait, search_and_wait};
pub use pending::PendingValue;
pub use registry::{
    AccessRightsCallback, AccessRightsEvent, CallbackToken, ConnectionCallback, ConnectionEvent,
    Registry, SubscriptionId, SubscriptionToken,
};
pub use request::{ChannelOptions, GetRequest, SubscribeRequest};
pub use sync_group::SyncGroups;
