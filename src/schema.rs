//! Command schema
//!
//! The JSON document is deserialized into loose `*Entry` structs and then validated once into
//! `Command` / `FieldDescriptor`. Nothing is looked up by name or type at decode time that
//! was not checked here.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Deserialize;

use crate::data::{DataType, EnumTable, Record, ScalarCodec};
use crate::error::{CodecError, SchemaError};
use crate::ydt_shared::MAX_INFO_LEN;

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Descriptors
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Repeat count of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quantity {
    Scalar,
    Fixed(usize),
    /// Count is the decoded value of an earlier field
    Ref(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub key:      String,
    pub name:     String,
    pub start:    usize,
    pub codec:    ScalarCodec,
    pub quantity: Quantity,
}

impl FieldDescriptor {
    pub fn data_type(&self) -> DataType {
        self.codec.data_type()
    }

    pub fn width(&self) -> usize {
        self.codec.width()
    }

    /// JSON scalar or array -> `FieldValue`, following this field's codec and quantity
    pub fn value_from_json(
        &self,
        json: &serde_json::Value,
    ) -> Result<crate::data::FieldValue, CodecError> {
        match (&self.quantity, json) {
            (Quantity::Scalar, _) => Ok(self.codec.value_from_json(json)?.into()),
            (_, serde_json::Value::Array(items)) => {
                let values = items
                    .iter()
                    .map(|item| self.codec.value_from_json(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(values.into())
            }
            _ => Err(CodecError::Shape {
                key:    self.key.clone(),
                reason: "expected a JSON array".into(),
            }),
        }
    }
}

/// Which of the four schema sections a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandGroup {
    Attributes,
    Timeseries,
    Alarms,
    ServerSideRpc,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Attributes => "attributes",
            Self::Timeseries => "timeseries",
            Self::Alarms => "alarms",
            Self::ServerSideRpc => "serverSideRpc",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id1:    u8,
    pub id2:    u8,
    pub key:    String,
    pub name:   String,
    pub group:  CommandGroup,
    pub params: Vec<FieldDescriptor>,
    pub values: Vec<FieldDescriptor>,
}

impl Command {
    /// No reply is awaited for commands without value fields
    pub fn is_unidirectional(&self) -> bool {
        self.values.is_empty()
    }

    /// Builds a request record from a JSON object, keyed by param fields
    pub fn params_from_json(&self, json: &serde_json::Value) -> Result<Record, CodecError> {
        record_from_json(&self.params, json)
    }

    /// Builds a response record from a JSON object, keyed by value fields
    pub fn values_from_json(&self, json: &serde_json::Value) -> Result<Record, CodecError> {
        record_from_json(&self.values, json)
    }
}

fn record_from_json(fields: &[FieldDescriptor], json: &serde_json::Value) -> Result<Record, CodecError> {
    let mut record = Record::new();
    let Some(object) = json.as_object()
    else {
        if json.is_null() {
            return Ok(record);
        }
        return Err(CodecError::Shape {
            key:    String::new(),
            reason: "expected a JSON object".into(),
        });
    };

    for field in fields {
        if let Some(value) = object.get(&field.key) {
            record.insert(field.key.clone(), field.value_from_json(value)?);
        }
    }
    Ok(record)
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                          Schema Document
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSchema {
    #[serde(default)]
    pub attributes:      Vec<CommandEntry>,
    #[serde(default)]
    pub timeseries:      Vec<CommandEntry>,
    #[serde(default)]
    pub alarms:          Vec<CommandEntry>,
    #[serde(default)]
    pub server_side_rpc: Vec<CommandEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandEntry {
    pub cid1:   IdEntry,
    pub cid2:   IdEntry,
    pub key:    String,
    #[serde(default)]
    pub name:   String,
    #[serde(default)]
    pub params: Vec<FieldEntry>,
    #[serde(default)]
    pub values: Vec<FieldEntry>,
}

/// `64` or `"0x40"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdEntry {
    Number(u8),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEntry {
    pub key:        String,
    #[serde(default)]
    pub name:       String,
    pub data_type:  DataType,
    #[serde(default)]
    pub start:      Option<usize>,
    #[serde(default)]
    pub length:     Option<usize>,
    #[serde(default, rename = "enum")]
    pub enum_table: Option<BTreeMap<String, u8>>,
    #[serde(default)]
    pub quantity:   Option<QuantityEntry>,
}

/// `3` or `"${other_key}"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QuantityEntry {
    Count(usize),
    Reference(String),
}

impl CommandSchema {
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validates every entry, in group order
    pub fn into_commands(self) -> Result<Vec<Command>, SchemaError> {
        let groups = [
            (CommandGroup::Attributes, self.attributes),
            (CommandGroup::Timeseries, self.timeseries),
            (CommandGroup::Alarms, self.alarms),
            (CommandGroup::ServerSideRpc, self.server_side_rpc),
        ];

        let mut commands = Vec::new();
        for (group, entries) in groups {
            for entry in entries {
                commands.push(entry.into_command(group)?);
            }
        }
        Ok(commands)
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                            Validation
// —————————————————————————————————————————————————————————————————————————————————————————————————

impl CommandEntry {
    pub fn into_command(self, group: CommandGroup) -> Result<Command, SchemaError> {
        let id1 = parse_id(&self.key, &self.cid1)?;
        let id2 = parse_id(&self.key, &self.cid2)?;
        let params = build_fields(&self.key, self.params)?;
        let values = build_fields(&self.key, self.values)?;

        Ok(Command {
            id1,
            id2,
            name: if self.name.is_empty() { self.key.clone() } else { self.name },
            key: self.key,
            group,
            params,
            values,
        })
    }
}

fn parse_id(key: &str, id: &IdEntry) -> Result<u8, SchemaError> {
    match id {
        IdEntry::Number(n) => Ok(*n),
        IdEntry::Text(text) => {
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            u8::from_str_radix(digits, 16).map_err(|_| SchemaError::InvalidId {
                key:   key.to_string(),
                value: text.clone(),
            })
        }
    }
}

/// Validates one param or value list.
///
/// Offsets are tracked while every field so far has a known width; once a field's count
/// depends on decoded data, declared starts are taken as given.
fn build_fields(command: &str, entries: Vec<FieldEntry>) -> Result<Vec<FieldDescriptor>, SchemaError> {
    let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    let mut offset = Some(0usize);

    for entry in entries {
        let invalid = |reason: String| SchemaError::InvalidField {
            command: command.to_string(),
            field:   entry.key.clone(),
            reason,
        };

        if !seen.insert(entry.key.clone()) {
            return Err(SchemaError::DuplicateField {
                command: command.to_string(),
                field:   entry.key,
            });
        }

        let codec = build_codec(&entry).map_err(&invalid)?;
        let quantity = match &entry.quantity {
            None | Some(QuantityEntry::Count(1)) => Quantity::Scalar,
            Some(QuantityEntry::Count(n)) => Quantity::Fixed(*n),
            Some(QuantityEntry::Reference(text)) => {
                let reference = parse_reference(text)
                    .ok_or_else(|| invalid(format!("quantity '{text}' is not of the form ${{key}}")))?;

                // Only backward references to an unsigned scalar resolve
                let resolves = fields.iter().any(|f| {
                    f.key == reference && f.quantity == Quantity::Scalar && f.data_type().is_count()
                });
                if !resolves {
                    return Err(SchemaError::UnresolvedQuantity {
                        command:   command.to_string(),
                        field:     entry.key,
                        reference: text.clone(),
                    });
                }
                Quantity::Ref(reference.to_string())
            }
        };

        let start = match (offset, entry.start) {
            (Some(expected), Some(start)) if start != expected => {
                return Err(invalid(format!("start {start} does not follow previous fields (expected {expected})")));
            }
            (Some(expected), _) => expected,
            (None, start) => start.unwrap_or_default(),
        };

        // Bytes this field always takes, `None` when the count comes from decoded data
        let fixed_len = match &quantity {
            Quantity::Scalar => Some(codec.width()),
            Quantity::Fixed(n) => n.checked_mul(codec.width()),
            Quantity::Ref(_) => None,
        };
        if !matches!(quantity, Quantity::Ref(_)) && fixed_len.is_none_or(|len| len > MAX_INFO_LEN) {
            return Err(invalid(format!("field cannot fit in an info of {MAX_INFO_LEN} bytes")));
        }

        offset = match (fixed_len, offset) {
            (Some(len), Some(o)) if o + len > MAX_INFO_LEN => {
                return Err(invalid(format!("field ends at byte {}, past the {MAX_INFO_LEN} byte info", o + len)));
            }
            (Some(len), Some(o)) => Some(o + len),
            _ => None,
        };

        fields.push(FieldDescriptor {
            name: if entry.name.is_empty() { entry.key.clone() } else { entry.name },
            key: entry.key,
            start,
            codec,
            quantity,
        });
    }

    Ok(fields)
}

fn build_codec(entry: &FieldEntry) -> Result<ScalarCodec, String> {
    if let (Some(width), Some(length)) = (entry.data_type.fixed_width(), entry.length) {
        if width != length {
            return Err(format!("{} is {width} bytes wide, length says {length}", entry.data_type));
        }
    }

    let codec = match entry.data_type {
        DataType::UInt8 => ScalarCodec::UInt8,
        DataType::UInt16 => ScalarCodec::UInt16,
        DataType::Float => ScalarCodec::Float32,
        DataType::DateTime => ScalarCodec::DateTime,
        DataType::Version => ScalarCodec::Version,
        DataType::Enum => {
            let table = entry
                .enum_table
                .clone()
                .map(EnumTable::new)
                .filter(|t| !t.is_empty())
                .ok_or("enum field without an enum table")?;
            ScalarCodec::Enum(table)
        }
        DataType::String => match entry.length {
            Some(width) if width > 0 => ScalarCodec::Ascii(width),
            _ => return Err("string field needs a non-zero length".into()),
        },
    };

    Ok(codec)
}

fn parse_reference(text: &str) -> Option<&str> {
    text.strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: serde_json::Value) -> CommandEntry {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn parses_hex_and_numeric_ids() {
        let command = entry(serde_json::json!({ "cid1": "0x40", "cid2": 65, "key": "acAnalog" }))
            .into_command(CommandGroup::Timeseries)
            .unwrap();

        assert_eq!((command.id1, command.id2), (0x40, 0x41));
        assert_eq!(command.name, "acAnalog");
        assert!(command.is_unidirectional());
    }

    #[test]
    fn symbolic_quantity_resolves_to_earlier_field() {
        let command = entry(serde_json::json!({
            "cid1": "0x42", "cid2": "0x41", "key": "dcAnalog",
            "values": [
                { "key": "n",     "dataType": "uint8",  "start": 0, "length": 1 },
                { "key": "items", "dataType": "uint16", "start": 1, "length": 2, "quantity": "${n}" },
                { "key": "tail",  "dataType": "float",  "start": 99 }
            ]
        }))
        .into_command(CommandGroup::Timeseries)
        .unwrap();

        assert_eq!(command.values[1].quantity, Quantity::Ref("n".into()));
        // Starts after a variable-length field are taken as declared
        assert_eq!(command.values[2].start, 99);
    }

    #[test]
    fn forward_reference_is_rejected() {
        let err = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "bad",
            "values": [
                { "key": "items", "dataType": "uint16", "quantity": "${n}" },
                { "key": "n",     "dataType": "uint8" }
            ]
        }))
        .into_command(CommandGroup::Alarms)
        .unwrap_err();

        assert!(matches!(err, SchemaError::UnresolvedQuantity { .. }));
    }

    #[test]
    fn reference_to_non_count_field_is_rejected() {
        let err = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "bad",
            "values": [
                { "key": "n",     "dataType": "float" },
                { "key": "items", "dataType": "uint16", "quantity": "${n}" }
            ]
        }))
        .into_command(CommandGroup::Alarms)
        .unwrap_err();

        assert!(matches!(err, SchemaError::UnresolvedQuantity { .. }));
    }

    #[test]
    fn misplaced_start_is_rejected() {
        let err = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "bad",
            "values": [
                { "key": "a", "dataType": "float", "start": 0 },
                { "key": "b", "dataType": "float", "start": 2 }
            ]
        }))
        .into_command(CommandGroup::Attributes)
        .unwrap_err();

        assert!(matches!(err, SchemaError::InvalidField { ref field, .. } if field == "b"));
    }

    #[test]
    fn enum_needs_a_table_and_string_needs_a_length() {
        for field in [
            serde_json::json!({ "key": "state", "dataType": "enum" }),
            serde_json::json!({ "key": "label", "dataType": "string" }),
            serde_json::json!({ "key": "volts", "dataType": "float", "length": 2 }),
        ] {
            let result = entry(serde_json::json!({ "cid1": 1, "cid2": 2, "key": "k", "values": [field] }))
                .into_command(CommandGroup::Attributes);
            assert!(matches!(result, Err(SchemaError::InvalidField { .. })));
        }
    }

    #[test]
    fn fixed_array_must_fit_in_a_frame() {
        for quantity in [serde_json::json!(usize::MAX), serde_json::json!(5000)] {
            let err = entry(serde_json::json!({
                "cid1": 1, "cid2": 2, "key": "huge",
                "values": [ { "key": "volts", "dataType": "float", "quantity": quantity } ]
            }))
            .into_command(CommandGroup::Timeseries)
            .unwrap_err();

            assert!(matches!(err, SchemaError::InvalidField { ref field, .. } if field == "volts"));
        }
    }

    #[test]
    fn fields_past_the_info_limit_are_rejected() {
        let err = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "long",
            "values": [
                { "key": "head", "dataType": "uint16", "quantity": 2000 },
                { "key": "tail", "dataType": "float",  "quantity": 24 }
            ]
        }))
        .into_command(CommandGroup::Timeseries)
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidField { ref field, .. } if field == "tail"));

        let fits = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "full",
            "values": [ { "key": "bytes", "dataType": "uint8", "quantity": MAX_INFO_LEN } ]
        }))
        .into_command(CommandGroup::Timeseries);
        assert!(fits.is_ok());
    }

    #[test]
    fn quantity_one_is_scalar() {
        let command = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "k",
            "params": [{ "key": "a", "dataType": "uint8", "quantity": 1 }, { "key": "b", "dataType": "uint8", "quantity": 4 }]
        }))
        .into_command(CommandGroup::ServerSideRpc)
        .unwrap();

        assert_eq!(command.params[0].quantity, Quantity::Scalar);
        assert_eq!(command.params[1].quantity, Quantity::Fixed(4));
    }

    #[test]
    fn json_record_follows_descriptors() {
        let command = entry(serde_json::json!({
            "cid1": 1, "cid2": 2, "key": "k",
            "params": [
                { "key": "n",     "dataType": "uint8" },
                { "key": "items", "dataType": "uint16", "quantity": "${n}" }
            ]
        }))
        .into_command(CommandGroup::ServerSideRpc)
        .unwrap();

        let record = command
            .params_from_json(&serde_json::json!({ "n": 2, "items": [1, 2], "ignored": true }))
            .unwrap();

        assert_eq!(record.len(), 2);
        assert!(command.params_from_json(&serde_json::json!({ "items": 3 })).is_err());
    }
}
