use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use caprims_dbr::{DbrType, DecodeOptions, Decoded};
use caprims_native::ValueBuffer;

use crate::error::{CaError, Result};

/// The destination of a buffered read.
///
/// The bytes belong to the native library until the round the read was
/// issued in completes (`pend_io`, or `block` on its sync group). Before that
/// every accessor reports [`CaError::NotReady`].
#[derive(Debug, Clone)]
pub struct PendingValue {
    buffer: ValueBuffer,
    ready: Arc<AtomicBool>,
    decode: DecodeOptions,
}

impl PendingValue {
    pub(crate) fn new(buffer: ValueBuffer, decode: DecodeOptions) -> Self {
        Self {
            buffer,
            ready: Arc::new(AtomicBool::new(false)),
            decode,
        }
    }

    pub fn dbr_type(&self) -> DbrType {
        self.buffer.dbr_type()
    }

    pub fn count(&self) -> usize {
        self.buffer.count()
    }

    /// Whether the round completed and the native side wrote the buffer.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.buffer.is_filled()
    }

    pub fn value(&self) -> Result<Decoded> {
        if !self.is_ready() {
            return Err(CaError::NotReady);
        }
        Ok(self.buffer.decode(&self.decode)?)
    }

    /// Copy of the raw record bytes.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        if !self.is_ready() {
            return Err(CaError::NotReady);
        }
        Ok(self.buffer.snapshot())
    }
}

/// Buffered reads issued since the last successful wait.
#[derive(Debug, Default)]
pub(crate) struct Round {
    flags: Vec<Arc<AtomicBool>>,
}

impl Round {
    pub(crate) fn push(&mut self, pending: &PendingValue) {
        self.flags.push(Arc::clone(&pending.ready));
    }

    pub(crate) fn len(&self) -> usize {
        self.flags.len()
    }

    /// The wait succeeded: every buffer of the round may be read.
    pub(crate) fn complete(&mut self) {
        for flag in self.flags.drain(..) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Forget the round; its values stay unreadable.
    pub(crate) fn abandon(&mut self) {
        self.flags.clear();
    }
}
