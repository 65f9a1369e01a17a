//! Blocking helpers composed from the asynchronous primitives.
//!
//! A `None` timeout uses [`ContextConfig::pend_timeout`](crate::ContextConfig);
//! a zero timeout waits without limit, as the native pend calls do.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use caprims_dbr::{Decoded, PutRequest, PutValue};
use caprims_native::{ChanId, Eca};
use tracing::debug;

use crate::context::Context;
use crate::error::{CaError, Result};
use crate::request::{ChannelOptions, GetRequest};

/// Slice of `pend_event` between checks for a put completion.
const PUT_POLL: Duration = Duration::from_millis(10);

fn resolve(ctx: &Context, timeout: Option<Duration>) -> Duration {
    timeout.unwrap_or(ctx.config().pend_timeout)
}

/// Create a channel and wait for it to connect.
///
/// A channel that does not connect in time is cleared again.
pub fn search_and_wait(ctx: &Context, name: &str, timeout: Option<Duration>) -> Result<ChanId> {
    let chid = ctx.create_channel(name, ChannelOptions::default())?;
    ctx.flush_io()?;
    match ctx.pend_io(resolve(ctx, timeout)) {
        Ok(()) => Ok(chid),
        Err(err) => {
            debug!(name, error = %err, "channel did not connect");
            let _ = ctx.clear_channel(chid);
            Err(err)
        }
    }
}

/// Read a channel and wait for the value.
pub fn get_and_wait(
    ctx: &Context,
    chid: ChanId,
    request: &GetRequest,
    timeout: Option<Duration>,
) -> Result<Decoded> {
    let pending = ctx.get(chid, request)?;
    ctx.flush_io()?;
    ctx.pend_io(resolve(ctx, timeout))?;
    pending.value()
}

/// Write a channel and wait until the server finished processing it.
pub fn put_and_wait(
    ctx: &Context,
    chid: ChanId,
    value: impl Into<PutValue>,
    request: &PutRequest,
    timeout: Option<Duration>,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    ctx.put_callback(chid, value, request, move |result| {
        let _ = tx.send(result);
    })?;
    ctx.flush_io()?;

    let wait = resolve(ctx, timeout);
    let deadline = (!wait.is_zero()).then(|| Instant::now() + wait);
    loop {
        match rx.try_recv() {
            Ok(result) => return result,
            // token dropped unrun: the channel was cleared
            Err(mpsc::TryRecvError::Disconnected) => {
                return Err(CaError::Status(Eca::CHANDESTROY))
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CaError::Status(Eca::TIMEOUT));
                }
                (deadline - now).min(PUT_POLL)
            }
            None => PUT_POLL,
        };
        ctx.pend_event(slice)?;
    }
}
