use serde::{Deserialize, Serialize};

/// Status codes shared by all status kinds
pub mod codes {
    pub const SUCCESS: i64 = 0;
    pub const NOT_INITIALISED: i64 = 1;
    pub const BUSY: i64 = 2;
    pub const UNKNOWN_ERROR: i64 = 99;
    pub const INVALID_CONFIGURATION: i64 = 100;
    pub const REMOTE_READ_OK: i64 = 200;
    pub const REMOTE_INTERNAL_ERROR: i64 = 500;
}

/// The operation a status item reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    Capturing,
    Processor,
    ProtocolRead,
    RemoteRead,
    StaticValue,
}

impl StatusKind {
    /// Human-readable operation name, used as the key in the wire format
    pub fn operation(&self) -> &'static str {
        match self {
            StatusKind::Capturing => "Frame capturing",
            StatusKind::Processor => "Processor",
            StatusKind::ProtocolRead => "Reading process value over OPC UA",
            StatusKind::RemoteRead => "Reading data over Rest API",
            StatusKind::StaticValue => "Providing static value",
        }
    }

    /// Operation kind tag as it appears in the wire format
    pub fn type_name(&self) -> &'static str {
        match self {
            StatusKind::Capturing => "image_capturing",
            StatusKind::Processor => "processor",
            StatusKind::ProtocolRead => "opcua_poll",
            StatusKind::RemoteRead => "restapi_read",
            StatusKind::StaticValue => "static_value",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "image_capturing" => Some(StatusKind::Capturing),
            "processor" => Some(StatusKind::Processor),
            "opcua_poll" => Some(StatusKind::ProtocolRead),
            "restapi_read" => Some(StatusKind::RemoteRead),
            "static_value" => Some(StatusKind::StaticValue),
            _ => None,
        }
    }

    /// Fixed message for a code of this kind
    pub fn message_for(&self, code: i64) -> &'static str {
        if code == codes::INVALID_CONFIGURATION {
            return "Invalid configuration";
        }
        match (self, code) {
            (StatusKind::Capturing, codes::SUCCESS) => "Frame captured",
            (StatusKind::Capturing, codes::NOT_INITIALISED) => {
                "Frame NOT captured: capturing device is NOT initialised yet"
            }
            (StatusKind::Capturing, codes::BUSY) => "Frame NOT captured: capturing device is busy",
            (StatusKind::Capturing, codes::UNKNOWN_ERROR) => "Frame NOT captured: unknown error",
            (StatusKind::Processor, codes::SUCCESS) => "Processing value successful",
            (StatusKind::Processor, codes::UNKNOWN_ERROR) => "Value NOT processed: unknown error",
            (StatusKind::ProtocolRead, codes::SUCCESS) => "Process value read",
            (StatusKind::ProtocolRead, codes::NOT_INITIALISED) => {
                "Process value NOT read: client is NOT initialised"
            }
            (StatusKind::ProtocolRead, 2) => "Process value NOT read: error 2",
            (StatusKind::ProtocolRead, codes::UNKNOWN_ERROR) => {
                "Process value NOT read: unknown error"
            }
            (StatusKind::RemoteRead, codes::REMOTE_READ_OK) => "Data read",
            (StatusKind::RemoteRead, codes::REMOTE_INTERNAL_ERROR) => {
                "Data NOT read: endpoint returned internal error"
            }
            (StatusKind::RemoteRead, codes::UNKNOWN_ERROR) => "Data NOT read: unknown error",
            (StatusKind::StaticValue, codes::SUCCESS) => "Static value provided",
            _ => "Unknown state",
        }
    }
}

/// Outcome of one operation on a data chunk.
///
/// Fields are kept as plain strings so that status items received from a
/// remote pipeline survive a round trip even if their kind is unknown here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusItem {
    pub operation: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub code: i64,
    pub message: String,
}

impl StatusItem {
    pub fn new(kind: StatusKind, code: i64) -> Self {
        Self {
            operation: kind.operation().to_string(),
            kind: kind.type_name().to_string(),
            code,
            message: kind.message_for(code).to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::SUCCESS || self.code == codes::REMOTE_READ_OK
    }
}
