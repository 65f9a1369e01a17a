//! EPICS Channel Access primitives.
//!
//! caprims bridges application code to a Channel Access client library:
//! typed DBR records, a per-context callback registry, synchronous groups and
//! blocking helpers on top of a swappable native backend.
//!
//! # Crate Structure
//!
//! - [`dbr`]: DBR type catalog and value codec
//! - [`native`]: native client seam, status codes and the loopback backend
//! - [`client`]: client context, handle registry, sync groups and facade
//!
//! The EPICS client library itself is linked only with the `libca` feature.

/// Re-export DBR codec types.
pub mod dbr {
    pub use caprims_dbr::*;
}

/// Re-export native seam types.
pub mod native {
    pub use caprims_native::*;
}

/// Re-export client context types.
pub mod client {
    pub use caprims_client::*;
}
