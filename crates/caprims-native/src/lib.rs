//! Native Channel Access client seam.
//!
//! The bridge above talks to the native client library only through the
//! [`NativeBackend`] and [`NativeClient`] traits and receives its callbacks
//! through an [`EventSink`]. Two backends implement them:
//! - [`loopback`]: an in-process record server, always available
//! - `libca`: the EPICS client library (feature `libca`)

pub mod buffer;
pub mod client;
pub mod loopback;
pub mod mask;
pub mod status;

#[cfg(feature = "libca")]
pub mod libca;

pub use buffer::ValueBuffer;
pub use client::{
    ChanId, EventArgs, EventId, EventSink, ExceptionArgs, NativeBackend, NativeClient, RequestKey,
    SyncGroupId,
};
#[cfg(feature = "libca")]
pub use libca::{Libca, LibcaContext};
pub use loopback::{LoopbackConfig, LoopbackContext, LoopbackServer, ProcessVariable};
pub use mask::{AccessRights, CaOp, ChannelState, EventMask, Priority};
pub use status::{CaSeverity, Eca};
