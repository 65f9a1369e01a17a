use std::fmt;

use serde::Serialize;

/// Alarm severity carried in the `severity` field of status records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum AlarmSeverity {
    NoAlarm = 0,
    Minor = 1,
    Major = 2,
    Invalid = 3,
}

impl AlarmSeverity {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(AlarmSeverity::NoAlarm),
            1 => Some(AlarmSeverity::Minor),
            2 => Some(AlarmSeverity::Major),
            3 => Some(AlarmSeverity::Invalid),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AlarmSeverity::NoAlarm => "NO_ALARM",
            AlarmSeverity::Minor => "MINOR",
            AlarmSeverity::Major => "MAJOR",
            AlarmSeverity::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Alarm condition carried in the `status` field of status records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u16)]
pub enum AlarmCondition {
    NoAlarm = 0,
    Read = 1,
    Write = 2,
    Hihi = 3,
    High = 4,
    Lolo = 5,
    Low = 6,
    State = 7,
    Cos = 8,
    Comm = 9,
    Timeout = 10,
    HwLimit = 11,
    Calc = 12,
    Scan = 13,
    Link = 14,
    Soft = 15,
    BadSub = 16,
    Udf = 17,
    Disable = 18,
    Simm = 19,
    ReadAccess = 20,
    WriteAccess = 21,
}

impl AlarmCondition {
    const ALL: [AlarmCondition; 22] = [
        AlarmCondition::NoAlarm,
        AlarmCondition::Read,
        AlarmCondition::Write,
        AlarmCondition::Hihi,
        AlarmCondition::High,
        AlarmCondition::Lolo,
        AlarmCondition::Low,
        AlarmCondition::State,
        AlarmCondition::Cos,
        AlarmCondition::Comm,
        AlarmCondition::Timeout,
        AlarmCondition::HwLimit,
        AlarmCondition::Calc,
        AlarmCondition::Scan,
        AlarmCondition::Link,
        AlarmCondition::Soft,
        AlarmCondition::BadSub,
        AlarmCondition::Udf,
        AlarmCondition::Disable,
        AlarmCondition::Simm,
        AlarmCondition::ReadAccess,
        AlarmCondition::WriteAccess,
    ];

    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            AlarmCondition::NoAlarm => "NO_ALARM",
            AlarmCondition::Read => "READ",
            AlarmCondition::Write => "WRITE",
            AlarmCondition::Hihi => "HIHI",
            AlarmCondition::High => "HIGH",
            AlarmCondition::Lolo => "LOLO",
            AlarmCondition::Low => "LOW",
            AlarmCondition::State => "STATE",
            AlarmCondition::Cos => "COS",
            AlarmCondition::Comm => "COMM",
            AlarmCondition::Timeout => "TIMEOUT",
            AlarmCondition::HwLimit => "HWLIMIT",
            AlarmCondition::Calc => "CALC",
            AlarmCondition::Scan => "SCAN",
            AlarmCondition::Link => "LINK",
            AlarmCondition::Soft => "SOFT",
            AlarmCondition::BadSub => "BAD_SUB",
            AlarmCondition::Udf => "UDF",
            AlarmCondition::Disable => "DISABLE",
            AlarmCondition::Simm => "SIMM",
            AlarmCondition::ReadAccess => "READ_ACCESS",
            AlarmCondition::WriteAccess => "WRITE_ACCESS",
        }
    }
}

impl fmt::Display for AlarmCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
