//! Channel Access DBR type catalog and value codec.
//!
//! Every value exchanged with the native client library travels in one of a
//! closed set of C record layouts ("DBR types"). This crate describes those
//! layouts and converts between them and Rust values:
//! - [`catalog`]: one [`TypeDescriptor`] per identifier (family, kind, sizes)
//! - [`encode`]: application values into host-order write buffers
//! - [`decode`]: native buffers into bare values or [`DbrRecord`]s
//!
//! Buffers use host byte order; network order is the native library's concern.

pub mod alarm;
pub mod catalog;
pub mod decode;
pub mod encode;
pub mod error;
pub mod record;
pub mod value;

pub use alarm::{AlarmCondition, AlarmSeverity};
pub use catalog::{
    dbr_size_n, descriptor, DbrType, Family, FieldType, ScalarKind, TypeDescriptor, CATALOG,
    LAST_BUFFER_TYPE, LAST_TYPE, MAX_ENUM_STATES, MAX_ENUM_STRING_SIZE, MAX_STRING_SIZE,
    MAX_UNITS_SIZE, TYPENOTCONN,
};
pub use decode::{decode, decode_raw, DecodeOptions};
pub use encode::{
    encode_elements, encode_record, prepare_put, PreparedPut, PutLengthPolicy, PutRequest,
    PutTarget,
};
pub use error::{DbrError, Result};
pub use record::{
    AckState, ControlLimits, DbrRecord, Decoded, GraphicLimits, TimeStamp,
    POSIX_TIME_AT_EPICS_EPOCH,
};
pub use value::{NumericArray, PutValue, Scalar, Value};
