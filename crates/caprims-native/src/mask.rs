use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use serde::Serialize;

use crate::status::Eca;

/// Subscription trigger mask (`DBE_*`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const VALUE: EventMask = EventMask(1);
    pub const LOG: EventMask = EventMask(2);
    pub const ARCHIVE: EventMask = EventMask::LOG;
    pub const ALARM: EventMask = EventMask(4);
    pub const PROPERTY: EventMask = EventMask(8);

    const ALL_BITS: u32 = 0xF;

    /// Accept only the defined bits.
    pub fn from_bits(bits: u32) -> Result<Self, Eca> {
        if bits & !Self::ALL_BITS != 0 {
            return Err(Eca::BADMASK);
        }
        Ok(EventMask(bits))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for EventMask {
    /// Value and alarm changes.
    fn default() -> Self {
        EventMask::VALUE | EventMask::ALARM
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;

    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

const MASK_NAMES: [(EventMask, &str); 4] = [
    (EventMask::VALUE, "value"),
    (EventMask::LOG, "log"),
    (EventMask::ALARM, "alarm"),
    (EventMask::PROPERTY, "property"),
];

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMask({self})")
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = MASK_NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

impl FromStr for EventMask {
    type Err = Eca;

    /// Parse `value,alarm` or `value|alarm`; `archive` is an alias of `log`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = EventMask::NONE;
        for part in s.split([',', '|']).map(str::trim).filter(|p| !p.is_empty()) {
            mask |= match part.to_ascii_lowercase().as_str() {
                "value" => EventMask::VALUE,
                "log" | "archive" => EventMask::LOG,
                "alarm" => EventMask::ALARM,
                "property" => EventMask::PROPERTY,
                _ => return Err(Eca::BADMASK),
            };
        }
        if mask.is_empty() {
            return Err(Eca::BADMASK);
        }
        Ok(mask)
    }
}

impl Serialize for EventMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Operation code carried by exception and connection notifications (`CA_OP_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum CaOp {
    Get = 0,
    Put = 1,
    CreateChannel = 2,
    AddEvent = 3,
    ClearEvent = 4,
    Other = 5,
    ConnUp = 6,
    ConnDown = 7,
}

impl CaOp {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            0 => CaOp::Get,
            1 => CaOp::Put,
            2 => CaOp::CreateChannel,
            3 => CaOp::AddEvent,
            4 => CaOp::ClearEvent,
            6 => CaOp::ConnUp,
            7 => CaOp::ConnDown,
            _ => CaOp::Other,
        }
    }
}

/// Connection state of a channel (`cs_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum ChannelState {
    NeverConnected = 0,
    PreviouslyConnected = 1,
    Connected = 2,
    Closed = 3,
}

impl ChannelState {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => ChannelState::PreviouslyConnected,
            2 => ChannelState::Connected,
            3 => ChannelState::Closed,
            _ => ChannelState::NeverConnected,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelState::NeverConnected => "never_conn",
            ChannelState::PreviouslyConnected => "prev_conn",
            ChannelState::Connected => "conn",
            ChannelState::Closed => "closed",
        }
    }
}

/// Read/write permission of a connected channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessRights {
    pub read: bool,
    pub write: bool,
}

impl AccessRights {
    pub const NONE: AccessRights = AccessRights {
        read: false,
        write: false,
    };
    pub const READ_ONLY: AccessRights = AccessRights {
        read: true,
        write: false,
    };
    pub const READ_WRITE: AccessRights = AccessRights {
        read: true,
        write: true,
    };

    pub fn from_bits(bits: u32) -> Self {
        Self {
            read: bits & 0x1 != 0,
            write: bits & 0x2 != 0,
        }
    }

    pub fn bits(self) -> u32 {
        u32::from(self.read) | (u32::from(self.write) << 1)
    }
}

/// Channel dispatch priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const MAX: Priority = Priority(99);
    pub const DEFAULT: Priority = Priority::MIN;
    pub const DB_LINKS: Priority = Priority(80);
    pub const ARCHIVE: Priority = Priority(20);
    pub const OPI: Priority = Priority::MIN;

    pub fn new(value: u32) -> Result<Self, Eca> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX.0)
            .map(Priority)
            .ok_or(Eca::BADPRIORITY)
    }

    pub const fn get(self) -> u32 {
        self.0 as u32
    }
}
