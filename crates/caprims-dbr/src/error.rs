use crate::catalog::{DbrType, ScalarKind};

/// Errors that can occur while sizing, encoding or decoding DBR buffers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbrError {
    /// The identifier is outside the closed DBR catalog.
    #[error("invalid DBR type {0}")]
    InvalidType(i64),

    /// The text does not name a DBR type.
    #[error("unknown DBR type name {0:?}")]
    UnknownName(String),

    /// The value cannot be represented as the requested scalar kind.
    #[error("cannot convert {value:?} to {target:?}")]
    TypeMismatch { value: String, target: ScalarKind },

    /// A numeric value does not fit the requested scalar kind.
    #[error("value {value} out of range for {target:?}")]
    OutOfRange { value: f64, target: ScalarKind },

    /// The input buffer ends before the last element.
    #[error("buffer too short for {dbr_type} x {count} ({len} bytes, need {need})")]
    BufferTooShort {
        dbr_type: DbrType,
        count: usize,
        len: usize,
        need: usize,
    },

    /// More elements were supplied than the write may carry.
    #[error("{supplied} elements supplied, at most {allowed} allowed")]
    TooManyElements { supplied: usize, allowed: usize },

    /// A write carried no elements.
    #[error("no elements to write")]
    Empty,

    /// The DBR type is a read-only record layout.
    #[error("{0} cannot be written")]
    NotWritable(DbrType),
}

pub type Result<T> = std::result::Result<T, DbrError>;
