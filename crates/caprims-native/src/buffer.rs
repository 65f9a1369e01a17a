use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use caprims_dbr::{decode, DbrType, DecodeOptions, Decoded};

/// Destination of a buffered read.
///
/// The native side fills the bytes when the read completes; the owner decodes
/// them once `pend_io` or a sync-group block reports success. Clones share the
/// same storage.
#[derive(Debug, Clone)]
pub struct ValueBuffer {
    inner: Arc<BufferInner>,
}

#[derive(Debug)]
struct BufferInner {
    dbr_type: DbrType,
    count: usize,
    bytes: Mutex<Vec<u8>>,
    filled: AtomicBool,
}

impl ValueBuffer {
    /// Zeroed storage sized for `count` elements of `dbr_type`.
    pub fn new(dbr_type: DbrType, count: usize) -> Self {
        let len = dbr_type.descriptor().size_for(count as i64);
        Self {
            inner: Arc::new(BufferInner {
                dbr_type,
                count,
                bytes: Mutex::new(vec![0; len]),
                filled: AtomicBool::new(false),
            }),
        }
    }

    pub fn dbr_type(&self) -> DbrType {
        self.inner.dbr_type
    }

    pub fn count(&self) -> usize {
        self.inner.count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy a completed read into the buffer. Extra source bytes are ignored.
    pub fn fill(&self, src: &[u8]) {
        let mut bytes = self.lock();
        let len = bytes.len().min(src.len());
        bytes[..len].copy_from_slice(&src[..len]);
        self.inner.filled.store(true, Ordering::Release);
    }

    /// Whether the native side has written the buffer.
    pub fn is_filled(&self) -> bool {
        self.inner.filled.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn decode(&self, opts: &DecodeOptions) -> caprims_dbr::Result<Decoded> {
        decode(self.inner.dbr_type, self.inner.count, &self.lock(), opts)
    }

    /// Raw storage address for a native library that writes asynchronously.
    ///
    /// The storage is never reallocated, so the address stays valid as long
    /// as a clone of this buffer is alive.
    #[cfg(feature = "libca")]
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.lock().as_mut_ptr()
    }

    /// Record completion of a write made through [`Self::as_mut_ptr`].
    #[cfg(feature = "libca")]
    pub(crate) fn mark_filled(&self) {
        self.inner.filled.store(true, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caprims_dbr::{encode_elements, Scalar};

    #[test]
    fn buffer_is_sized_for_type_and_count() {
        let buf = ValueBuffer::new(DbrType::TimeDouble, 3);
        assert_eq!(buf.len(), 16 + 3 * 8);
        assert!(!buf.is_filled());
    }

    #[test]
    fn clones_share_storage() {
        let buf = ValueBuffer::new(DbrType::Double, 1);
        let writer = buf.clone();
        let bytes = encode_elements(DbrType::Double, &[Scalar::Double(12.3)], 1).unwrap();
        writer.fill(&bytes);
        assert!(buf.is_filled());
        let decoded = buf.decode(&DecodeOptions::default()).unwrap();
        assert_eq!(decoded.value().as_f64(), Some(12.3));
    }
}
