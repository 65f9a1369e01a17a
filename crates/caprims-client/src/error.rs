use caprims_dbr::DbrError;
use caprims_native::Eca;

/// Errors that can occur in client context operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaError {
    /// Status reported by the native library, unchanged.
    #[error("{0}")]
    Status(Eca),

    /// The value could not be encoded or decoded.
    #[error("dbr error: {0}")]
    Dbr(#[from] DbrError),

    /// The channel is unknown or already cleared.
    #[error("invalid channel identifier")]
    BadChannel,

    /// The subscription is unknown or already cleared.
    #[error("invalid subscription identifier")]
    BadSubscription,

    /// The synchronous group is unknown or already deleted.
    #[error("invalid synchronous group identifier")]
    BadSyncGroup,

    /// The calling thread is not attached to this context.
    #[error("thread is not attached to this context")]
    NotAttached,

    /// The calling thread is already attached to a context.
    #[error("thread is already attached to a client context")]
    IsAttached,

    /// Other threads may only join a preemptive context.
    #[error("context is not preemptive; additional threads may not join")]
    NotThreaded,

    /// A buffered read was inspected before its round completed.
    #[error("value not available until pend_io or sg_block succeeds")]
    NotReady,
}

impl CaError {
    /// The status code a native caller would have seen for this error.
    pub fn status(&self) -> Eca {
        match self {
            CaError::Status(status) => *status,
            CaError::Dbr(err) => dbr_status(err),
            CaError::BadChannel => Eca::BADCHID,
            CaError::BadSubscription => Eca::BADMONID,
            CaError::BadSyncGroup => Eca::BADSYNCGRP,
            CaError::NotAttached => Eca::NOCACTX,
            CaError::IsAttached => Eca::ISATTACHED,
            CaError::NotThreaded => Eca::NOTTHREADED,
            CaError::NotReady => Eca::IOINPROGRESS,
        }
    }

    /// Whether this is a wait that expired rather than a failed request.
    pub fn is_timeout(&self) -> bool {
        self.status() == Eca::TIMEOUT
    }
}

impl From<Eca> for CaError {
    fn from(status: Eca) -> Self {
        CaError::Status(status)
    }
}

fn dbr_status(err: &DbrError) -> Eca {
    match err {
        DbrError::InvalidType(_) | DbrError::UnknownName(_) | DbrError::NotWritable(_) => {
            Eca::BADTYPE
        }
        DbrError::TypeMismatch { .. } | DbrError::OutOfRange { .. } => Eca::NOCONVERT,
        DbrError::BufferTooShort { .. } | DbrError::TooManyElements { .. } | DbrError::Empty => {
            Eca::BADCOUNT
        }
    }
}

/// Turn a native status into a `Result`, keeping failures verbatim.
pub(crate) fn check(status: Eca) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CaError::Status(status))
    }
}

pub type Result<T> = std::result::Result<T, CaError>;
