use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::alarm::{AlarmCondition, AlarmSeverity};
use crate::catalog::DbrType;
use crate::value::{Scalar, Value};

/// Seconds between the POSIX epoch and the EPICS epoch (1990-01-01 UTC).
pub const POSIX_TIME_AT_EPICS_EPOCH: u64 = 631_152_000;

/// Time stamp of a `DBR_TIME_*` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimeStamp {
    pub sec_past_epoch: u32,
    pub nsec: u32,
}

impl TimeStamp {
    /// Convert a wall-clock time. Times before 1990 clamp to the epoch.
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_posix = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = since_posix
            .as_secs()
            .saturating_sub(POSIX_TIME_AT_EPICS_EPOCH);
        Self {
            sec_past_epoch: u32::try_from(secs).unwrap_or(u32::MAX),
            nsec: since_posix.subsec_nanos(),
        }
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH
            + Duration::from_secs(u64::from(self.sec_past_epoch) + POSIX_TIME_AT_EPICS_EPOCH)
            + Duration::from_nanos(u64::from(self.nsec))
    }

    /// POSIX seconds with fractional part.
    pub fn unix_seconds(self) -> f64 {
        (u64::from(self.sec_past_epoch) + POSIX_TIME_AT_EPICS_EPOCH) as f64
            + f64::from(self.nsec) / 1e9
    }
}

/// Alarm acknowledgement state (`DBR_STSACK_STRING`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AckState {
    /// Whether transient alarms require acknowledgement.
    pub ackt: u16,
    /// Highest unacknowledged severity.
    pub acks: u16,
}

/// Display, alarm and warning limits in the record's scalar kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphicLimits {
    pub upper_disp_limit: Scalar,
    pub lower_disp_limit: Scalar,
    pub upper_alarm_limit: Scalar,
    pub upper_warning_limit: Scalar,
    pub lower_warning_limit: Scalar,
    pub lower_alarm_limit: Scalar,
}

/// Control limits of a `DBR_CTRL_*` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlLimits {
    pub upper_ctrl_limit: Scalar,
    pub lower_ctrl_limit: Scalar,
}

/// A decoded record of any family above `Plain`.
///
/// Only the fields the family defines are `Some`; absent fields are not
/// serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbrRecord {
    #[serde(skip)]
    pub dbr_type: DbrType,
    pub status: u16,
    pub severity: u16,
    #[serde(flatten)]
    pub ack: Option<AckState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stamp: Option<TimeStamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(flatten)]
    pub limits: Option<GraphicLimits>,
    #[serde(flatten)]
    pub control: Option<ControlLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_strings: Option<Vec<String>>,
    pub value: Value,
}

impl DbrRecord {
    /// A record with the given type and value and no metadata set.
    pub fn new(dbr_type: DbrType, value: Value) -> Self {
        Self {
            dbr_type,
            status: 0,
            severity: 0,
            ack: None,
            stamp: None,
            precision: None,
            units: None,
            limits: None,
            control: None,
            enum_strings: None,
            value,
        }
    }

    pub fn alarm_condition(&self) -> Option<AlarmCondition> {
        AlarmCondition::from_raw(self.status)
    }

    pub fn alarm_severity(&self) -> Option<AlarmSeverity> {
        AlarmSeverity::from_raw(self.severity)
    }

    /// Names of the fields present in this record, in layout order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = vec!["status", "severity"];
        if self.ack.is_some() {
            names.extend(["ackt", "acks"]);
        }
        if self.stamp.is_some() {
            names.push("stamp");
        }
        if self.precision.is_some() {
            names.push("precision");
        }
        if self.units.is_some() {
            names.push("units");
        }
        if self.limits.is_some() {
            names.extend([
                "upper_disp_limit",
                "lower_disp_limit",
                "upper_alarm_limit",
                "upper_warning_limit",
                "lower_warning_limit",
                "lower_alarm_limit",
            ]);
        }
        if self.control.is_some() {
            names.extend(["upper_ctrl_limit", "lower_ctrl_limit"]);
        }
        if self.enum_strings.is_some() {
            names.push("enum_strings");
        }
        names.push("value");
        names
    }
}

/// Result of decoding a buffer: a bare value for plain types, a record otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Decoded {
    Plain(Value),
    Record(DbrRecord),
}

impl Decoded {
    pub fn value(&self) -> &Value {
        match self {
            Decoded::Plain(value) => value,
            Decoded::Record(record) => &record.value,
        }
    }

    pub fn record(&self) -> Option<&DbrRecord> {
        match self {
            Decoded::Plain(_) => None,
            Decoded::Record(record) => Some(record),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Decoded::Plain(value) => value,
            Decoded::Record(record) => record.value,
        }
    }
}
