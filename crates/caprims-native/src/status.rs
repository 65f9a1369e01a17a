use std::fmt;

use serde::Serialize;

/// Mask of the severity bits of a status code.
pub const CA_M_SEVERITY: i32 = 0x0007;
/// Mask of the message-number bits of a status code.
pub const CA_M_MSG_NO: i32 = 0xFFF8;
/// Shift of the message number.
pub const CA_V_MSG_NO: i32 = 3;
/// Success bit.
pub const CA_M_SUCCESS: i32 = 0x0001;

/// Severity class encoded in the low bits of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaSeverity {
    Warning,
    Success,
    Error,
    Info,
    Severe,
    Fatal,
    Unknown,
}

/// Status code returned by every native operation.
///
/// The raw code is kept verbatim, so codes this crate does not know about
/// survive a round trip through it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eca(i32);

macro_rules! eca_codes {
    ($( $msg_no:literal $konst:ident = $code:literal, $name:literal, $text:literal; )*) => {
        impl Eca {
            $( pub const $konst: Eca = Eca($code); )*
        }

        const TABLE: &[(i32, &str, &str)] = &[
            $( ($code, $name, $text), )*
        ];

        #[cfg(test)]
        const MSG_NUMBERS: &[(i32, i32)] = &[
            $( ($code, $msg_no), )*
        ];
    };
}

eca_codes! {
    0 NORMAL = 1, "ECA_NORMAL", "Normal successful completion";
    1 MAXIOC = 10, "ECA_MAXIOC", "Maximum simultaneous IOC connections exceeded";
    2 UKNHOST = 18, "ECA_UKNHOST", "Unknown internet host";
    3 UKNSERV = 26, "ECA_UKNSERV", "Unknown internet service";
    4 SOCK = 34, "ECA_SOCK", "Unable to allocate a new socket";
    5 CONN = 40, "ECA_CONN", "Unable to connect to internet host or service";
    6 ALLOCMEM = 48, "ECA_ALLOCMEM", "Unable to allocate additional dynamic memory";
    7 UKNCHAN = 56, "ECA_UKNCHAN", "Unknown IO channel";
    8 UKNFIELD = 64, "ECA_UKNFIELD", "Record field specified inappropriate for channel specified";
    9 TOLARGE = 72, "ECA_TOLARGE", "The requested transfer is greater than available memory or EPICS_CA_MAX_ARRAY_BYTES";
    10 TIMEOUT = 80, "ECA_TIMEOUT", "User specified timeout on IO operation expired";
    11 NOSUPPORT = 88, "ECA_NOSUPPORT", "Sorry, that feature is planned but not supported at this time";
    12 STRTOBIG = 96, "ECA_STRTOBIG", "The supplied string is unusually large";
    13 DISCONNCHID = 106, "ECA_DISCONNCHID", "The request was ignored because the specified channel is disconnected";
    14 BADTYPE = 114, "ECA_BADTYPE", "The data type specifed is invalid";
    15 CHIDNOTFND = 123, "ECA_CHIDNOTFND", "Remote Channel not found";
    16 CHIDRETRY = 131, "ECA_CHIDRETRY", "Unable to locate all user specified channels";
    17 INTERNAL = 142, "ECA_INTERNAL", "Channel Access Internal Failure";
    18 DBLCLFAIL = 144, "ECA_DBLCLFAIL", "The requested local DB operation failed";
    19 GETFAIL = 152, "ECA_GETFAIL", "Channel read request failed";
    20 PUTFAIL = 160, "ECA_PUTFAIL", "Channel write request failed";
    21 ADDFAIL = 168, "ECA_ADDFAIL", "Channel subscription request failed";
    22 BADCOUNT = 176, "ECA_BADCOUNT", "Invalid element count requested";
    23 BADSTR = 186, "ECA_BADSTR", "Invalid string";
    24 DISCONN = 192, "ECA_DISCONN", "Virtual circuit disconnect";
    25 DBLCHNL = 200, "ECA_DBLCHNL", "Identical process variable names on multiple servers";
    26 EVDISALLOW = 210, "ECA_EVDISALLOW", "Request inappropriate within subscription (monitor) update callback";
    27 BUILDGET = 216, "ECA_BUILDGET", "Database value get for that channel failed during channel search";
    28 NEEDSFP = 224, "ECA_NEEDSFP", "Unable to initialize without the vxWorks VX_FP_TASK task option set";
    29 OVEVFAIL = 232, "ECA_OVEVFAIL", "Event queue overflow has prevented first pass event after event add";
    30 BADMONID = 242, "ECA_BADMONID", "Bad event subscription (monitor) identifier";
    31 NEWADDR = 248, "ECA_NEWADDR", "Remote channel has new network address";
    32 NEWCONN = 259, "ECA_NEWCONN", "New or resumed network connection";
    33 NOCACTX = 264, "ECA_NOCACTX", "Specified task isnt a member of a CA context";
    34 DEFUNCT = 278, "ECA_DEFUNCT", "Attempt to use defunct CA feature failed";
    35 EMPTYSTR = 280, "ECA_EMPTYSTR", "The supplied string is empty";
    36 NOREPEATER = 288, "ECA_NOREPEATER", "Unable to spawn the CA repeater thread- auto reconnect will fail";
    37 NOCHANMSG = 296, "ECA_NOCHANMSG", "No channel id match for search reply- search reply ignored";
    38 DLCKREST = 304, "ECA_DLCKREST", "Reseting dead connection- will try to reconnect";
    39 SERVBEHIND = 312, "ECA_SERVBEHIND", "Server (IOC) has fallen behind or is not responding- still waiting";
    40 NOCAST = 320, "ECA_NOCAST", "No internet interface with broadcast available";
    41 BADMASK = 330, "ECA_BADMASK", "Invalid event selection mask";
    42 IODONE = 339, "ECA_IODONE", "IO operations have completed";
    43 IOINPROGRESS = 347, "ECA_IOINPROGRESS", "IO operations are in progress";
    44 BADSYNCGRP = 354, "ECA_BADSYNCGRP", "Invalid synchronous group identifier";
    45 PUTCBINPROG = 362, "ECA_PUTCBINPROG", "Put callback timed out";
    46 NORDACCESS = 368, "ECA_NORDACCESS", "Read access denied";
    47 NOWTACCESS = 376, "ECA_NOWTACCESS", "Write access denied";
    48 ANACHRONISM = 386, "ECA_ANACHRONISM", "Requested feature is no longer supported";
    49 NOSEARCHADDR = 392, "ECA_NOSEARCHADDR", "Empty PV search address list";
    50 NOCONVERT = 400, "ECA_NOCONVERT", "No reasonable data conversion between client and server types";
    51 BADCHID = 410, "ECA_BADCHID", "Invalid channel identifier";
    52 BADFUNCPTR = 418, "ECA_BADFUNCPTR", "Invalid function pointer";
    53 ISATTACHED = 424, "ECA_ISATTACHED", "Thread is already attached to a client context";
    54 UNAVAILINSERV = 432, "ECA_UNAVAILINSERV", "Not supported by attached service";
    55 CHANDESTROY = 440, "ECA_CHANDESTROY", "User destroyed channel";
    56 BADPRIORITY = 450, "ECA_BADPRIORITY", "Invalid channel priority";
    57 NOTTHREADED = 458, "ECA_NOTTHREADED", "Preemptive callback not enabled - additional threads may not join context";
    58 ARRAY_16K_CLIENT = 464, "ECA_16KARRAYCLIENT", "Client's protocol revision does not support transfers exceeding 16k bytes";
    59 CONNSEQTMO = 472, "ECA_CONNSEQTMO", "Virtual circuit connection sequence aborted";
    60 UNRESPTMO = 480, "ECA_UNRESPTMO", "Virtual circuit unresponsive";
}

impl Eca {
    pub const fn from_raw(code: i32) -> Self {
        Eca(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    pub const fn msg_no(self) -> i32 {
        (self.0 & CA_M_MSG_NO) >> CA_V_MSG_NO
    }

    pub const fn is_success(self) -> bool {
        self.0 & CA_M_SUCCESS != 0
    }

    pub fn severity(self) -> CaSeverity {
        match self.0 & CA_M_SEVERITY {
            0 => CaSeverity::Warning,
            1 => CaSeverity::Success,
            2 => CaSeverity::Error,
            3 => CaSeverity::Info,
            4 => CaSeverity::Severe,
            6 => CaSeverity::Fatal,
            _ => CaSeverity::Unknown,
        }
    }

    fn entry(self) -> Option<&'static (i32, &'static str, &'static str)> {
        usize::try_from(self.msg_no())
            .ok()
            .and_then(|idx| TABLE.get(idx))
            .filter(|(code, _, _)| *code == self.0)
    }

    /// Symbolic name, e.g. `ECA_TIMEOUT`.
    pub fn name(self) -> &'static str {
        self.entry().map(|(_, name, _)| *name).unwrap_or("ECA_UNKNOWN")
    }

    /// Message text of the native library's message table.
    pub fn message(self) -> &'static str {
        self.entry()
            .map(|(_, _, text)| *text)
            .unwrap_or("Unknown status code")
    }
}

impl fmt::Debug for Eca {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl fmt::Display for Eca {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

impl Serialize for Eca {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.0)
    }
}

impl From<i32> for Eca {
    fn from(code: i32) -> Self {
        Eca(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_numbers_index_the_table() {
        for (idx, (code, msg_no)) in MSG_NUMBERS.iter().enumerate() {
            assert_eq!(Eca::from_raw(*code).msg_no(), *msg_no);
            assert_eq!(*msg_no as usize, idx);
        }
    }

    #[test]
    fn severity_bits_classify_codes() {
        assert!(Eca::NORMAL.is_success());
        assert!(Eca::IODONE.is_success());
        assert!(!Eca::TIMEOUT.is_success());
        assert_eq!(Eca::TIMEOUT.severity(), CaSeverity::Warning);
        assert_eq!(Eca::BADTYPE.severity(), CaSeverity::Error);
        assert_eq!(Eca::IOINPROGRESS.severity(), CaSeverity::Info);
        assert_eq!(Eca::INTERNAL.severity(), CaSeverity::Fatal);
    }

    #[test]
    fn unknown_codes_survive_verbatim() {
        let odd = Eca::from_raw(1234);
        assert_eq!(odd.code(), 1234);
        assert_eq!(odd.name(), "ECA_UNKNOWN");
        assert_eq!(Eca::from_raw(Eca::DISCONN.code()), Eca::DISCONN);
    }

    #[test]
    fn display_includes_name_and_text() {
        assert_eq!(
            Eca::BADSYNCGRP.to_string(),
            "ECA_BADSYNCGRP: Invalid synchronous group identifier"
        );
        assert_eq!(format!("{:?}", Eca::TIMEOUT), "ECA_TIMEOUT(80)");
    }
}
