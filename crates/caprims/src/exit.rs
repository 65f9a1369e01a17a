use std::fmt;

use caprims_client::CaError;
use caprims_dbr::DbrError;
use caprims_native::Eca;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Exit code for a native status.
pub fn status_code(status: Eca) -> i32 {
    match status {
        Eca::TIMEOUT | Eca::UNRESPTMO | Eca::CONNSEQTMO => TIMEOUT,
        Eca::NORDACCESS | Eca::NOWTACCESS => PERMISSION_DENIED,
        Eca::BADTYPE | Eca::BADCOUNT | Eca::NOCONVERT | Eca::BADSTR | Eca::STRTOBIG
        | Eca::BADMASK | Eca::TOLARGE | Eca::EMPTYSTR => DATA_INVALID,
        Eca::DISCONN | Eca::DISCONNCHID | Eca::UKNCHAN | Eca::UKNHOST | Eca::CONN
        | Eca::SOCK | Eca::NOSEARCHADDR => TRANSPORT_ERROR,
        Eca::GETFAIL | Eca::PUTFAIL | Eca::CHANDESTROY => FAILURE,
        _ => INTERNAL,
    }
}

pub fn ca_error(context: &str, err: CaError) -> CliError {
    let code = match &err {
        CaError::Status(status) => status_code(*status),
        CaError::Dbr(_) => DATA_INVALID,
        CaError::NotReady => TIMEOUT,
        CaError::BadChannel | CaError::BadSubscription | CaError::BadSyncGroup => FAILURE,
        CaError::NotAttached | CaError::IsAttached | CaError::NotThreaded => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn dbr_error(context: &str, err: DbrError) -> CliError {
    let code = match err {
        DbrError::InvalidType(_) | DbrError::UnknownName(_) => USAGE,
        _ => DATA_INVALID,
    };
    CliError::new(code, format!("{context}: {err}"))
}
