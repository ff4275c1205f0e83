//! Error taxonomy
//!
//! `ProtocolError` is what the engine hands back to callers. Every variant that a responder
//! can report on the wire maps onto a `ReturnCode`.

use thiserror::Error;

use crate::data::DataType;
use crate::transport::TransportError;
use crate::ydt_shared::ReturnCode;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                          Protocol Error
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Bad SOI/EOI, bad version, short frame or oversized info
    #[error("Format error: {0}")]
    Format(String),

    #[error("Checksum error: received {received:#06X}, calculated {calculated:#06X}")]
    Checksum { received: u16, calculated: u16 },

    /// LCHKSUM nibble mismatch, or LENID disagrees with the info actually present
    #[error("Length checksum error: {0}")]
    LengthChecksum(String),

    #[error("Invalid id: cid1 = {id1:#04X}, cid2 = {id2:#04X}")]
    InvalidId { id1: u8, id2: u8 },

    #[error("Invalid data: {0}")]
    InvalidData(#[from] CodecError),

    /// Request resolved to a command, but its params did not decode
    #[error("Invalid params for cid1 = {id1:#04X}, cid2 = {id2:#04X}: {source}")]
    InvalidParams {
        id1:    u8,
        id2:    u8,
        #[source]
        source: CodecError,
    },

    /// The device answered with a non-ok return code
    #[error("Device returned {0:?}")]
    Device(ReturnCode),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Return code a responder sends back for this failure
    pub fn return_code(&self) -> Option<ReturnCode> {
        match self {
            Self::Format(_) => Some(ReturnCode::FormatError),
            Self::Checksum { .. } => Some(ReturnCode::ChecksumError),
            Self::LengthChecksum(_) => Some(ReturnCode::LengthChecksumError),
            Self::InvalidId { .. } => Some(ReturnCode::InvalidId),
            Self::InvalidData(_) | Self::InvalidParams { .. } => Some(ReturnCode::InvalidData),
            Self::Device(_) | Self::Transport(_) => None,
        }
    }

    /// CID1 of the request that failed, when the frame got far enough to carry one
    pub fn request_id1(&self) -> Option<u8> {
        match self {
            Self::InvalidId { id1, .. } | Self::InvalidParams { id1, .. } => Some(*id1),
            _ => None,
        }
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Codec Error
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Scalar and record level encode/decode failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("{data_type} expects {expected} bytes, got {actual}")]
    Width {
        data_type: DataType,
        expected:  usize,
        actual:    usize,
    },

    #[error("{data_type} cannot hold {value}")]
    TypeMismatch { data_type: DataType, value: String },

    #[error("{value} is out of range for {data_type}")]
    OutOfRange { data_type: DataType, value: String },

    #[error("byte {0:#04X} is not in the enum table")]
    UnknownEnumByte(u8),

    #[error("'{0}' is not in the enum table")]
    UnknownEnumName(String),

    #[error("string is not ASCII")]
    NotAscii,

    #[error("string of {len} bytes exceeds field width {width}")]
    TooLong { len: usize, width: usize },

    #[error("invalid datetime {0}")]
    InvalidDateTime(String),

    #[error("invalid version string '{0}'")]
    InvalidVersion(String),

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{key}': {reason}")]
    Shape { key: String, reason: String },

    #[error("field '{key}' needs {needed} bytes, {remaining} left")]
    Truncated {
        key:       String,
        needed:    usize,
        remaining: usize,
    },
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Schema Error
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Rejected command schema, raised once at load time
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("command '{key}': invalid id '{value}'")]
    InvalidId { key: String, value: String },

    #[error("duplicate id pair cid1 = {id1:#04X}, cid2 = {id2:#04X} ('{first}' and '{second}')")]
    DuplicateId {
        id1:    u8,
        id2:    u8,
        first:  String,
        second: String,
    },

    #[error("duplicate command key '{0}'")]
    DuplicateKey(String),

    #[error("command '{command}': duplicate field '{field}'")]
    DuplicateField { command: String, field: String },

    #[error("command '{command}', field '{field}': {reason}")]
    InvalidField {
        command: String,
        field:   String,
        reason:  String,
    },

    #[error("command '{command}', field '{field}': quantity '{reference}' does not name an earlier count field")]
    UnresolvedQuantity {
        command:   String,
        field:     String,
        reference: String,
    },
}
