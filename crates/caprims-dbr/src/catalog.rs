use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{DbrError, Result};

/// Width of a fixed string slot, terminator included.
pub const MAX_STRING_SIZE: usize = 40;
/// Width of the engineering-units slot.
pub const MAX_UNITS_SIZE: usize = 8;
/// Width of one enumerated state string.
pub const MAX_ENUM_STRING_SIZE: usize = 26;
/// Number of state-string slots in an enum graphic/control record.
pub const MAX_ENUM_STATES: usize = 16;

/// Highest plain field type (`DBF_DOUBLE`).
pub const LAST_TYPE: i64 = 6;
/// Highest DBR buffer type (`DBR_CLASS_NAME`).
pub const LAST_BUFFER_TYPE: i64 = 38;
/// Field type reported for a channel that is not connected.
pub const TYPENOTCONN: i64 = -1;

/// Scalar kind carried by the trailing value of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Short,
    Float,
    Enum,
    Char,
    Long,
    Double,
}

impl ScalarKind {
    /// Kinds in field-type order.
    pub const ALL: [ScalarKind; 7] = [
        ScalarKind::String,
        ScalarKind::Short,
        ScalarKind::Float,
        ScalarKind::Enum,
        ScalarKind::Char,
        ScalarKind::Long,
        ScalarKind::Double,
    ];

    /// Bytes per element.
    pub const fn element_size(self) -> usize {
        match self {
            ScalarKind::String => MAX_STRING_SIZE,
            ScalarKind::Short | ScalarKind::Enum => 2,
            ScalarKind::Char => 1,
            ScalarKind::Float | ScalarKind::Long => 4,
            ScalarKind::Double => 8,
        }
    }

    pub const fn is_numeric(self) -> bool {
        !matches!(self, ScalarKind::String)
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::Short | ScalarKind::Enum | ScalarKind::Char | ScalarKind::Long
        )
    }

    pub const fn is_floating(self) -> bool {
        matches!(self, ScalarKind::Float | ScalarKind::Double)
    }
}

/// Structural family of a record: which metadata precedes the value.
///
/// Families nest: `Time` and `Graphic` carry the `Status` fields, and
/// `Control` carries the `Graphic` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Plain,
    Status,
    Time,
    Graphic,
    Control,
    /// `DBR_STSACK_STRING`: status plus alarm acknowledgement fields.
    StatusAck,
}

impl Family {
    /// Families a field type can be promoted to, in identifier order.
    pub const PROMOTABLE: [Family; 5] = [
        Family::Plain,
        Family::Status,
        Family::Time,
        Family::Graphic,
        Family::Control,
    ];

    pub const fn has_status(self) -> bool {
        !matches!(self, Family::Plain)
    }

    pub const fn has_time(self) -> bool {
        matches!(self, Family::Time)
    }

    pub const fn has_graphic(self) -> bool {
        matches!(self, Family::Graphic | Family::Control)
    }

    pub const fn has_control(self) -> bool {
        matches!(self, Family::Control)
    }

    pub const fn has_ack(self) -> bool {
        matches!(self, Family::StatusAck)
    }

    fn promotion_index(self) -> Option<i64> {
        match self {
            Family::Plain => Some(0),
            Family::Status => Some(1),
            Family::Time => Some(2),
            Family::Graphic => Some(3),
            Family::Control => Some(4),
            Family::StatusAck => None,
        }
    }
}

/// DBR request/buffer type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i16)]
pub enum DbrType {
    String = 0,
    Short = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
    StsString = 7,
    StsShort = 8,
    StsFloat = 9,
    StsEnum = 10,
    StsChar = 11,
    StsLong = 12,
    StsDouble = 13,
    TimeString = 14,
    TimeShort = 15,
    TimeFloat = 16,
    TimeEnum = 17,
    TimeChar = 18,
    TimeLong = 19,
    TimeDouble = 20,
    GrString = 21,
    GrShort = 22,
    GrFloat = 23,
    GrEnum = 24,
    GrChar = 25,
    GrLong = 26,
    GrDouble = 27,
    CtrlString = 28,
    CtrlShort = 29,
    CtrlFloat = 30,
    CtrlEnum = 31,
    CtrlChar = 32,
    CtrlLong = 33,
    CtrlDouble = 34,
    PutAckt = 35,
    PutAcks = 36,
    StsackString = 37,
    ClassName = 38,
}

impl DbrType {
    /// Every identifier, indexed by its raw value.
    pub const ALL: [DbrType; 39] = [
        DbrType::String,
        DbrType::Short,
        DbrType::Float,
        DbrType::Enum,
        DbrType::Char,
        DbrType::Long,
        DbrType::Double,
        DbrType::StsString,
        DbrType::StsShort,
        DbrType::StsFloat,
        DbrType::StsEnum,
        DbrType::StsChar,
        DbrType::StsLong,
        DbrType::StsDouble,
        DbrType::TimeString,
        DbrType::TimeShort,
        DbrType::TimeFloat,
        DbrType::TimeEnum,
        DbrType::TimeChar,
        DbrType::TimeLong,
        DbrType::TimeDouble,
        DbrType::GrString,
        DbrType::GrShort,
        DbrType::GrFloat,
        DbrType::GrEnum,
        DbrType::GrChar,
        DbrType::GrLong,
        DbrType::GrDouble,
        DbrType::CtrlString,
        DbrType::CtrlShort,
        DbrType::CtrlFloat,
        DbrType::CtrlEnum,
        DbrType::CtrlChar,
        DbrType::CtrlLong,
        DbrType::CtrlDouble,
        DbrType::PutAckt,
        DbrType::PutAcks,
        DbrType::StsackString,
        DbrType::ClassName,
    ];

    /// Look up an identifier. Anything outside `0..=LAST_BUFFER_TYPE` is invalid.
    pub fn from_raw(raw: i64) -> Result<Self> {
        usize::try_from(raw)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or(DbrError::InvalidType(raw))
    }

    pub const fn as_raw(self) -> i64 {
        self as i16 as i64
    }

    pub fn descriptor(self) -> &'static TypeDescriptor {
        &CATALOG[self as usize]
    }

    pub fn family(self) -> Family {
        self.descriptor().family
    }

    pub fn kind(self) -> ScalarKind {
        self.descriptor().kind
    }

    /// Whether a put request may carry this type.
    pub fn is_writable(self) -> bool {
        matches!(self.family(), Family::Plain) && !matches!(self, DbrType::ClassName)
    }

    /// The plain identifier with the same scalar kind.
    pub fn plain(self) -> DbrType {
        match self {
            DbrType::PutAckt | DbrType::PutAcks | DbrType::ClassName => self,
            DbrType::StsackString => DbrType::String,
            other => DbrType::ALL[(other as usize) % (LAST_TYPE as usize + 1)],
        }
    }

    pub fn name(self) -> &'static str {
        TYPE_NAMES[self as usize]
    }
}

impl fmt::Display for DbrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DbrType {
    type Err = DbrError;

    /// Accepts `DBR_TIME_DOUBLE`, `time_double`, the `INT` alias of `SHORT`,
    /// or a decimal identifier.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(raw) = trimmed.parse::<i64>() {
            return Self::from_raw(raw);
        }
        let upper = trimmed.to_ascii_uppercase();
        let bare = upper.strip_prefix("DBR_").unwrap_or(&upper);
        let canonical = match bare.strip_suffix("INT") {
            Some(prefix) => format!("{prefix}SHORT"),
            None => bare.to_string(),
        };
        Self::ALL
            .iter()
            .copied()
            .find(|t| &t.name()[4..] == canonical)
            .ok_or_else(|| DbrError::UnknownName(s.to_string()))
    }
}

impl Serialize for DbrType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

const TYPE_NAMES: [&str; 39] = [
    "DBR_STRING",
    "DBR_SHORT",
    "DBR_FLOAT",
    "DBR_ENUM",
    "DBR_CHAR",
    "DBR_LONG",
    "DBR_DOUBLE",
    "DBR_STS_STRING",
    "DBR_STS_SHORT",
    "DBR_STS_FLOAT",
    "DBR_STS_ENUM",
    "DBR_STS_CHAR",
    "DBR_STS_LONG",
    "DBR_STS_DOUBLE",
    "DBR_TIME_STRING",
    "DBR_TIME_SHORT",
    "DBR_TIME_FLOAT",
    "DBR_TIME_ENUM",
    "DBR_TIME_CHAR",
    "DBR_TIME_LONG",
    "DBR_TIME_DOUBLE",
    "DBR_GR_STRING",
    "DBR_GR_SHORT",
    "DBR_GR_FLOAT",
    "DBR_GR_ENUM",
    "DBR_GR_CHAR",
    "DBR_GR_LONG",
    "DBR_GR_DOUBLE",
    "DBR_CTRL_STRING",
    "DBR_CTRL_SHORT",
    "DBR_CTRL_FLOAT",
    "DBR_CTRL_ENUM",
    "DBR_CTRL_CHAR",
    "DBR_CTRL_LONG",
    "DBR_CTRL_DOUBLE",
    "DBR_PUT_ACKT",
    "DBR_PUT_ACKS",
    "DBR_STSACK_STRING",
    "DBR_CLASS_NAME",
];

/// Static description of one DBR record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TypeDescriptor {
    pub dbr_type: DbrType,
    pub family: Family,
    pub kind: ScalarKind,
    /// Size of the record holding exactly one element.
    pub header_size: usize,
    pub element_size: usize,
    /// Byte offset of the first value element.
    pub value_offset: usize,
}

impl TypeDescriptor {
    /// Buffer size for `count` elements. A count of zero or less sizes one element.
    pub const fn size_for(&self, count: i64) -> usize {
        let extra = if count > 1 { (count - 1) as usize } else { 0 };
        self.header_size + extra * self.element_size
    }

    /// Bytes a decoder may touch for exactly `count` elements.
    pub const fn span_for(&self, count: usize) -> usize {
        self.value_offset + count * self.element_size
    }
}

const fn entry(
    dbr_type: DbrType,
    family: Family,
    kind: ScalarKind,
    value_offset: usize,
) -> TypeDescriptor {
    TypeDescriptor {
        dbr_type,
        family,
        kind,
        header_size: value_offset + kind.element_size(),
        element_size: kind.element_size(),
        value_offset,
    }
}

use Family::{Control, Graphic, Plain, Status, StatusAck, Time};
use ScalarKind as K;

/// The closed catalog, indexed by raw identifier.
///
/// Offsets follow the natural-alignment C layouts: padding sits between the
/// metadata and the value so that doubles land on 8-byte boundaries.
pub static CATALOG: [TypeDescriptor; 39] = [
    entry(DbrType::String, Plain, K::String, 0),
    entry(DbrType::Short, Plain, K::Short, 0),
    entry(DbrType::Float, Plain, K::Float, 0),
    entry(DbrType::Enum, Plain, K::Enum, 0),
    entry(DbrType::Char, Plain, K::Char, 0),
    entry(DbrType::Long, Plain, K::Long, 0),
    entry(DbrType::Double, Plain, K::Double, 0),
    entry(DbrType::StsString, Status, K::String, 4),
    entry(DbrType::StsShort, Status, K::Short, 4),
    entry(DbrType::StsFloat, Status, K::Float, 4),
    entry(DbrType::StsEnum, Status, K::Enum, 4),
    entry(DbrType::StsChar, Status, K::Char, 5),
    entry(DbrType::StsLong, Status, K::Long, 4),
    entry(DbrType::StsDouble, Status, K::Double, 8),
    entry(DbrType::TimeString, Time, K::String, 12),
    entry(DbrType::TimeShort, Time, K::Short, 14),
    entry(DbrType::TimeFloat, Time, K::Float, 12),
    entry(DbrType::TimeEnum, Time, K::Enum, 14),
    entry(DbrType::TimeChar, Time, K::Char, 15),
    entry(DbrType::TimeLong, Time, K::Long, 12),
    entry(DbrType::TimeDouble, Time, K::Double, 16),
    entry(DbrType::GrString, Graphic, K::String, 4),
    entry(DbrType::GrShort, Graphic, K::Short, 24),
    entry(DbrType::GrFloat, Graphic, K::Float, 40),
    entry(DbrType::GrEnum, Graphic, K::Enum, 422),
    entry(DbrType::GrChar, Graphic, K::Char, 19),
    entry(DbrType::GrLong, Graphic, K::Long, 36),
    entry(DbrType::GrDouble, Graphic, K::Double, 64),
    entry(DbrType::CtrlString, Control, K::String, 4),
    entry(DbrType::CtrlShort, Control, K::Short, 28),
    entry(DbrType::CtrlFloat, Control, K::Float, 48),
    entry(DbrType::CtrlEnum, Control, K::Enum, 422),
    entry(DbrType::CtrlChar, Control, K::Char, 21),
    entry(DbrType::CtrlLong, Control, K::Long, 44),
    entry(DbrType::CtrlDouble, Control, K::Double, 80),
    entry(DbrType::PutAckt, Plain, K::Enum, 0),
    entry(DbrType::PutAcks, Plain, K::Enum, 0),
    entry(DbrType::StsackString, StatusAck, K::String, 8),
    entry(DbrType::ClassName, Plain, K::String, 0),
];

/// Descriptor for a raw identifier.
pub fn descriptor(raw: i64) -> Result<&'static TypeDescriptor> {
    DbrType::from_raw(raw).map(DbrType::descriptor)
}

/// Buffer size for `count` elements of a raw identifier.
pub fn dbr_size_n(raw: i64, count: i64) -> Result<usize> {
    descriptor(raw).map(|d| d.size_for(count))
}

/// Native field type of a channel (`DBF_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum FieldType {
    NotConnected = -1,
    String = 0,
    Short = 1,
    Float = 2,
    Enum = 3,
    Char = 4,
    Long = 5,
    Double = 6,
    NoAccess = 7,
}

impl FieldType {
    /// Map a raw field type. Values outside the known set read as not connected.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => FieldType::String,
            1 => FieldType::Short,
            2 => FieldType::Float,
            3 => FieldType::Enum,
            4 => FieldType::Char,
            5 => FieldType::Long,
            6 => FieldType::Double,
            7 => FieldType::NoAccess,
            _ => FieldType::NotConnected,
        }
    }

    pub const fn as_raw(self) -> i64 {
        self as i16 as i64
    }

    /// Scalar kind of a readable field.
    pub fn kind(self) -> Option<ScalarKind> {
        let idx = usize::try_from(self.as_raw()).ok()?;
        ScalarKind::ALL.get(idx).copied()
    }

    /// The DBR type carrying this field with the given family's metadata.
    pub fn promote(self, family: Family) -> Option<DbrType> {
        let base = self.kind()?;
        let index = family.promotion_index()?;
        let raw = index * (LAST_TYPE + 1) + base as i64;
        DbrType::from_raw(raw).ok()
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::NotConnected => "TYPENOTCONN",
            FieldType::String => "DBF_STRING",
            FieldType::Short => "DBF_SHORT",
            FieldType::Float => "DBF_FLOAT",
            FieldType::Enum => "DBF_ENUM",
            FieldType::Char => "DBF_CHAR",
            FieldType::Long => "DBF_LONG",
            FieldType::Double => "DBF_DOUBLE",
            FieldType::NoAccess => "DBF_NO_ACCESS",
        }
    }
}

impl From<ScalarKind> for FieldType {
    fn from(kind: ScalarKind) -> Self {
        FieldType::from_raw(kind as i64)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
