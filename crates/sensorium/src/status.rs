//! Status codes
//!
//! Every fallible operation returns `Result<T, Status>`. A status is a 32-bit
//! value: the high word is the error group, the low word a sequential code
//! within that group. `Ok(())` stands for the OK code, `0`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = Status> = std::result::Result<T, E>;

/// The OK code as it appears on the wire
pub const STATUS_OK: u32 = 0;

/// Error group in the high word of a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum StatusGroup {
    Ni = 1,
    Os = 2,
    PrimeSense = 3,
}

impl StatusGroup {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(StatusGroup::Ni),
            2 => Some(StatusGroup::Os),
            3 => Some(StatusGroup::PrimeSense),
            _ => None,
        }
    }
}

const fn make_code(group: StatusGroup, code: u16) -> u32 {
    ((group as u32) << 16) | code as u32
}

macro_rules! ni_statuses {
    ($($variant:ident = $code:literal => $message:tt,)*) => {
        /// A non-OK status
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
        pub enum Status {
            $(
                #[error($message)]
                $variant,
            )*
            /// A code outside the registered NI table (OS or vendor groups)
            #[error("Unknown status {0:#010x}")]
            Unknown(u32),
        }

        impl Status {
            /// The 32-bit code, `(group << 16) | code`
            pub fn code(self) -> u32 {
                match self {
                    $(Status::$variant => make_code(StatusGroup::Ni, $code),)*
                    Status::Unknown(raw) => raw,
                }
            }

            /// Short symbolic name
            pub fn name(self) -> &'static str {
                match self {
                    $(Status::$variant => stringify!($variant),)*
                    Status::Unknown(_) => "Unknown",
                }
            }

            /// Map a raw code back to a status. `0` is OK and yields `None`.
            pub fn from_code(raw: u32) -> Option<Status> {
                if raw == STATUS_OK {
                    return None;
                }
                $(
                    if raw == make_code(StatusGroup::Ni, $code) {
                        return Some(Status::$variant);
                    }
                )*
                Some(Status::Unknown(raw))
            }
        }
    };
}

ni_statuses! {
    Error = 1 => "Error!",
    NotInit = 2 => "Module was not initialized!",
    AlreadyInit = 3 => "Module was already initialized!",
    NullInputPtr = 4 => "Input pointer is null!",
    NullOutputPtr = 5 => "Output pointer is null!",
    InputBufferOverflow = 6 => "Input buffer overflow!",
    OutputBufferOverflow = 7 => "Output buffer overflow!",
    InternalBufferTooSmall = 8 => "Internal buffer is too small!",
    InvalidBufferSize = 9 => "The buffer is of wrong size!",
    NoMatch = 10 => "No match found",
    IsEmpty = 11 => "No items in data structure",
    IsNotEmpty = 12 => "Items in data structure",
    IllegalPosition = 13 => "Can't perform operation at this position in the data structure",
    NotImplemented = 14 => "Function was not implemented!",
    NoModulesFound = 15 => "Can't find any module!",
    InvalidGenerator = 16 => "Module generator is not valid!",
    UnknownGeneratorType = 17 => "Generator type is unknown!",
    InvalidOperation = 18 => "This operation is invalid!",
    MissingNeededTree = 19 => "A needed production node is missing!",
    CorruptFile = 20 => "The file is corrupted!",
    BadParam = 21 => "The value is invalid!",
    NodeIsLocked = 22 => "The node is locked for changes!",
    WaitDataTimeout = 23 => "A timeout has occurred when waiting for new data!",
    BadType = 24 => "The operation requires an object of a different type!",
    UnsupportedVersion = 25 => "Unsupported version",
    PropertyNotSet = 26 => "The property is not set",
    BadFileExt = 27 => "Bad file extension",
    NodeNotLoaded = 28 => "No node with the requested description is loaded",
    NoNodePresent = 29 => "Can't create any node of the requested type!",
    BadNodeName = 30 => "No node by the specified name exists",
    UnsupportedCodec = 31 => "Failed to find a matching codec",
    Eof = 32 => "End of file reached",
    MultipleNodesError = 33 => "More than one node is in error state!",
    DeviceNotConnected = 34 => "The device is not connected!",
    NoLicense = 35 => "No license to use this module!",
    NoSuchProperty = 36 => "There is no such property",
    NodeAlreadyRecorded = 37 => "This node is already recorded!",
    ProtoBadInterface = 38 => "Bad protocol interface",
    ProtoBadMsgType = 39 => "Bad protocol message type",
    ProtoBadCid = 40 => "Bad protocol CID",
    ProtoBadNodeId = 41 => "Bad protocol node ID",
    ProtoBadMsgSize = 42 => "Bad protocol message size",
    NoSuchUser = 43 => "User could not be found",
    UserIsNotBeingTracked = 44 => "User is not being tracked",
    JointIsNotActive = 45 => "Joint is not active",
}

impl Status {
    /// Group encoded in the high word, if it is a known one
    pub fn group(self) -> Option<StatusGroup> {
        StatusGroup::from_raw((self.code() >> 16) as u16)
    }
}

/// Raw code of a result: `0` for `Ok`, the status code otherwise.
pub fn status_code<T>(result: &Result<T>) -> u32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(status) => status.code(),
    }
}
