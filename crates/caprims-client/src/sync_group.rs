//! Synchronous groups: batches of buffered reads and writes awaited as one.

use std::time::Duration;

use caprims_dbr::{PutRequest, PutValue};
use caprims_native::{ChanId, Eca, SyncGroupId, ValueBuffer};
use tracing::debug;

use crate::context::Context;
use crate::error::{check, CaError, Result};
use crate::pending::{PendingValue, Round};
use crate::request::GetRequest;

/// Sync group operations of one context.
///
/// The native library keeps the outstanding count; this side remembers which
/// buffers belong to the current round of each group. Unknown groups fail
/// with [`CaError::BadSyncGroup`] before any native call.
#[derive(Debug, Clone, Copy)]
pub struct SyncGroups<'a> {
    ctx: &'a Context,
}

impl<'a> SyncGroups<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub fn create(&self) -> Result<SyncGroupId> {
        self.ctx.ensure_attached()?;
        let gid = self.ctx.native().sg_create()?;
        self.ctx.lock_groups().insert(gid, Round::default());
        debug!(%gid, "sync group created");
        Ok(gid)
    }

    fn ensure_group(&self, gid: SyncGroupId) -> Result<()> {
        self.ctx.ensure_attached()?;
        if self.ctx.lock_groups().contains_key(&gid) {
            Ok(())
        } else {
            Err(CaError::BadSyncGroup)
        }
    }

    /// Add a buffered read to the group's current round.
    ///
    /// The value is unreadable until [`SyncGroups::block`] succeeds.
    pub fn attach_get(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        request: &GetRequest,
    ) -> Result<PendingValue> {
        self.ensure_group(gid)?;
        let (dbr_type, count) = self.ctx.buffered_shape(chid, request)?;
        let buffer = ValueBuffer::new(dbr_type, count);
        check(
            self.ctx
                .native()
                .sg_array_get(gid, chid, dbr_type, count, &buffer),
        )?;
        let pending = PendingValue::new(buffer, self.ctx.decode_options(request.decode));
        match self.ctx.lock_groups().get_mut(&gid) {
            Some(round) => round.push(&pending),
            None => return Err(CaError::BadSyncGroup),
        }
        Ok(pending)
    }

    /// Add a write to the group's current round.
    pub fn attach_put(
        &self,
        gid: SyncGroupId,
        chid: ChanId,
        value: impl Into<PutValue>,
        request: &PutRequest,
    ) -> Result<()> {
        self.ensure_group(gid)?;
        let prepared = self.ctx.prepare(chid, &value.into(), request)?;
        check(self.ctx.native().sg_array_put(
            gid,
            chid,
            prepared.dbr_type,
            prepared.count,
            &prepared.buffer,
        ))
    }

    /// Wait until every operation of the round completed.
    ///
    /// A timeout leaves the round in place: a later successful block still
    /// releases its values, or [`SyncGroups::reset`] abandons it.
    pub fn block(&self, gid: SyncGroupId, timeout: Duration) -> Result<()> {
        self.ensure_group(gid)?;
        let status = self.ctx.native().sg_block(gid, timeout);
        if status == Eca::NORMAL {
            if let Some(round) = self.ctx.lock_groups().get_mut(&gid) {
                round.complete();
            }
            return Ok(());
        }
        debug!(%gid, %status, "sync group block did not complete");
        Err(CaError::Status(status))
    }

    /// `ECA_IODONE` or `ECA_IOINPROGRESS`.
    pub fn test(&self, gid: SyncGroupId) -> Result<Eca> {
        self.ensure_group(gid)?;
        let status = self.ctx.native().sg_test(gid);
        check(status)?;
        Ok(status)
    }

    /// Abandon operations that will never complete so a fresh round can start.
    pub fn reset(&self, gid: SyncGroupId) -> Result<()> {
        self.ensure_group(gid)?;
        check(self.ctx.native().sg_reset(gid))?;
        if let Some(round) = self.ctx.lock_groups().get_mut(&gid) {
            let abandoned = round.len();
            round.abandon();
            debug!(%gid, abandoned, "sync group reset");
        }
        Ok(())
    }

    pub fn delete(&self, gid: SyncGroupId) -> Result<()> {
        self.ensure_group(gid)?;
        self.ctx.lock_groups().remove(&gid);
        check(self.ctx.native().sg_delete(gid))
    }
}
