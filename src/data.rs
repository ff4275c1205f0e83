// Data format and handling

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Values
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// A single decoded scalar
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    UInt(u32),
    Float(f32),
    /// Enum names, ASCII strings and "major.minor" versions
    Text(String),
    DateTime(NaiveDateTime),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
        }
    }
}

/// Scalar or repeated field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(Value),
    Array(Vec<Value>),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<Vec<Value>> for FieldValue {
    fn from(values: Vec<Value>) -> Self {
        Self::Array(values)
    }
}

/// Field key -> value map for one request or response body
pub type Record = BTreeMap<String, FieldValue>;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                            Data Types
// —————————————————————————————————————————————————————————————————————————————————————————————————

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATETIME_LEN: usize = 7;

/// Wire type tag declared by the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum DataType {
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "enum")]
    Enum,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "version")]
    Version,
}

impl DataType {
    /// Width on the wire. `None` for strings, whose width comes from the descriptor
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::UInt8 | Self::Enum => Some(1),
            Self::UInt16 | Self::Version => Some(2),
            Self::Float => Some(4),
            Self::DateTime => Some(DATETIME_LEN),
            Self::String => None,
        }
    }

    pub fn is_count(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::Float => "float",
            Self::Enum => "enum",
            Self::String => "string",
            Self::DateTime => "datetime",
            Self::Version => "version",
        };
        f.write_str(name)
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Scalar Codec
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Name <-> byte table of an enumerated field
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumTable {
    by_name: BTreeMap<String, u8>,
}

impl EnumTable {
    pub fn new(by_name: BTreeMap<String, u8>) -> Self {
        Self { by_name }
    }

    pub fn byte_of(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, byte: u8) -> Option<&str> {
        self.by_name
            .iter()
            .find(|&(_, &b)| b == byte)
            .map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// One of the fixed wire codecs, chosen from the descriptor's `DataType` when the schema
/// is loaded
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarCodec {
    UInt8,
    UInt16,
    Float32,
    Enum(EnumTable),
    Ascii(usize),
    DateTime,
    Version,
}

impl ScalarCodec {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::UInt8 => DataType::UInt8,
            Self::UInt16 => DataType::UInt16,
            Self::Float32 => DataType::Float,
            Self::Enum(_) => DataType::Enum,
            Self::Ascii(_) => DataType::String,
            Self::DateTime => DataType::DateTime,
            Self::Version => DataType::Version,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::Ascii(width) => *width,
            other => other.data_type().fixed_width().unwrap_or(0),
        }
    }

    // ——————————————————————————————————————————— Encode ————————————————————————————————————————————

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let data_type = self.data_type();

        match (self, value) {
            (Self::UInt8, Value::UInt(v)) => {
                let byte = u8::try_from(*v).map_err(|_| out_of_range(data_type, value))?;
                Ok(vec![byte])
            }
            (Self::UInt16, Value::UInt(v)) => {
                let word = u16::try_from(*v).map_err(|_| out_of_range(data_type, value))?;
                Ok(word.to_be_bytes().to_vec())
            }
            (Self::Float32, Value::Float(v)) => Ok(v.to_be_bytes().to_vec()),
            (Self::Float32, Value::UInt(v)) => Ok((*v as f32).to_be_bytes().to_vec()),
            (Self::Enum(table), Value::Text(name)) => table
                .byte_of(name)
                .map(|b| vec![b])
                .ok_or_else(|| CodecError::UnknownEnumName(name.clone())),
            (Self::Ascii(width), Value::Text(text)) => encode_ascii(text, *width),
            (Self::DateTime, Value::DateTime(dt)) => encode_datetime(dt),
            (Self::Version, Value::Text(text)) => encode_version(text),
            _ => Err(CodecError::TypeMismatch {
                data_type,
                value: value.to_string(),
            }),
        }
    }

    // ——————————————————————————————————————————— Decode ————————————————————————————————————————————

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let expected = self.width();
        if bytes.len() != expected {
            return Err(CodecError::Width {
                data_type: self.data_type(),
                expected,
                actual: bytes.len(),
            });
        }

        let value = match self {
            Self::UInt8 => Value::UInt(u32::from(bytes[0])),
            Self::UInt16 => Value::UInt(u32::from(u16::from_be_bytes([bytes[0], bytes[1]]))),
            Self::Float32 => Value::Float(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Self::Enum(table) => {
                let name = table
                    .name_of(bytes[0])
                    .ok_or(CodecError::UnknownEnumByte(bytes[0]))?;
                Value::Text(name.to_string())
            }
            Self::Ascii(_) => decode_ascii(bytes)?,
            Self::DateTime => decode_datetime(bytes)?,
            Self::Version => Value::Text(format!("{}.{}", bytes[0], bytes[1])),
        };

        Ok(value)
    }

    // ———————————————————————————————————————————— JSON —————————————————————————————————————————————

    /// Converts a loosely typed JSON value into the `Value` this codec encodes
    pub fn value_from_json(&self, json: &serde_json::Value) -> Result<Value, CodecError> {
        let data_type = self.data_type();
        let mismatch = || CodecError::TypeMismatch {
            data_type,
            value: json.to_string(),
        };

        match self {
            Self::UInt8 | Self::UInt16 => {
                let n = json.as_u64().ok_or_else(mismatch)?;
                let n = u32::try_from(n).map_err(|_| CodecError::OutOfRange {
                    data_type,
                    value: n.to_string(),
                })?;
                Ok(Value::UInt(n))
            }
            Self::Float32 => json.as_f64().map(|f| Value::Float(f as f32)).ok_or_else(mismatch),
            Self::Enum(_) | Self::Ascii(_) | Self::Version => {
                json.as_str().map(|s| Value::Text(s.to_string())).ok_or_else(mismatch)
            }
            Self::DateTime => {
                let text = json.as_str().ok_or_else(mismatch)?;
                parse_datetime(text).map(Value::DateTime)
            }
        }
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                             Helpers
// —————————————————————————————————————————————————————————————————————————————————————————————————

fn out_of_range(data_type: DataType, value: &Value) -> CodecError {
    CodecError::OutOfRange {
        data_type,
        value: value.to_string(),
    }
}

fn encode_ascii(text: &str, width: usize) -> Result<Vec<u8>, CodecError> {
    if !text.is_ascii() {
        return Err(CodecError::NotAscii);
    }
    if text.len() > width {
        return Err(CodecError::TooLong {
            len: text.len(),
            width,
        });
    }

    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(width, 0);
    Ok(bytes)
}

fn decode_ascii(bytes: &[u8]) -> Result<Value, CodecError> {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    let trimmed = &bytes[..end];

    if !trimmed.is_ascii() {
        return Err(CodecError::NotAscii);
    }
    Ok(Value::Text(String::from_utf8_lossy(trimmed).into_owned()))
}

fn encode_datetime(dt: &NaiveDateTime) -> Result<Vec<u8>, CodecError> {
    let year = u16::try_from(dt.year()).map_err(|_| CodecError::OutOfRange {
        data_type: DataType::DateTime,
        value:     dt.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(DATETIME_LEN);
    bytes.extend_from_slice(&year.to_be_bytes());
    bytes.extend_from_slice(&[
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    ]);
    Ok(bytes)
}

fn decode_datetime(bytes: &[u8]) -> Result<Value, CodecError> {
    let year = u16::from_be_bytes([bytes[0], bytes[1]]);
    let [month, day, hour, minute, second] = [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6]];

    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|d| d.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)))
        .map(Value::DateTime)
        .ok_or_else(|| {
            CodecError::InvalidDateTime(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })
}

/// Accepts `2024-05-01 12:30:00` and `2024-05-01T12:30:00`
pub fn parse_datetime(text: &str) -> Result<NaiveDateTime, CodecError> {
    NaiveDateTime::parse_from_str(text, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|_| CodecError::InvalidDateTime(text.to_string()))
}

fn encode_version(text: &str) -> Result<Vec<u8>, CodecError> {
    let invalid = || CodecError::InvalidVersion(text.to_string());

    let (major, minor) = text.split_once('.').ok_or_else(invalid)?;
    let major = major.trim().parse::<u8>().map_err(|_| invalid())?;
    let minor = minor.trim().parse::<u8>().map_err(|_| invalid())?;

    Ok(vec![major, minor])
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
