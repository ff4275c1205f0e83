//! Protocol engine
//!
//! Turns command keys into frames on the wire and frames back into records. One request is
//! in flight at a time; nothing is buffered between calls. A short read fails the call and
//! the next call starts reading wherever the stream happens to be.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data::{FieldValue, Record, Value};
use crate::error::{CodecError, ProtocolError};
use crate::registry::CommandRegistry;
use crate::schema::{Command, CommandGroup, FieldDescriptor, Quantity};
use crate::transport::{Transport, TransportError};
use crate::ydt_decoder::YdtDecoder;
use crate::ydt_encoder::YdtEncoder;
use crate::ydt_shared::{
    CHKSUM_LEN, EOI, EOI_LEN, HEADER_LEN, LENGTH_LEN, MIN_FRAME_SIZE, ReturnCode, SOI, SOI_LEN,
    decode_length,
};

/// Result of `Session::send_command`
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// No command with that key; nothing was sent
    CommandNotFound,
    /// Params could not be encoded; nothing was sent
    FrameNotBuilt,
    /// Unidirectional command sent, no reply awaited
    Sent,
    Reply(Record),
}

impl SendOutcome {
    pub fn into_reply(self) -> Option<Record> {
        match self {
            Self::Reply(record) => Some(record),
            _ => None,
        }
    }
}

/// Replies of one polling pass, merged per group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollReport {
    pub attributes: Record,
    pub telemetry:  Record,
}

/// Whether encoding skips fields the caller did not supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingFields {
    Reject,
    Omit,
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Engine
// —————————————————————————————————————————————————————————————————————————————————————————————————

pub struct ProtocolEngine<T: Transport> {
    registry:  Arc<CommandRegistry>,
    transport: T,
    address:   u8,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(registry: Arc<CommandRegistry>, transport: T, address: u8) -> Self {
        Self {
            registry,
            transport,
            address,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Opens the transport. It is closed again when the returned session drops, on every
    /// exit path.
    pub fn connect(&mut self) -> Result<Session<'_, T>, ProtocolError> {
        self.transport.open()?;
        debug!("Session opened, device address {:#04X}", self.address);
        Ok(Session { engine: self })
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Session
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// An open connection. All protocol operations live here.
pub struct Session<'a, T: Transport> {
    engine: &'a mut ProtocolEngine<T>,
}

impl<T: Transport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        match self.engine.transport.close() {
            Ok(()) => debug!("Session closed"),
            Err(e) => warn!("Closing transport failed: {e}"),
        }
    }
}

impl<T: Transport> Session<'_, T> {
    pub fn registry(&self) -> &CommandRegistry {
        &self.engine.registry
    }

    // ——————————————————————————————————————————— Client ————————————————————————————————————————————

    /// Sends the command registered under `key` with `data` as its params.
    ///
    /// A missing key or an unencodable param yields an outcome, not an error, and nothing is
    /// written. Commands with value fields read exactly one reply frame.
    pub fn send_command(&mut self, key: &str, data: &Record) -> Result<SendOutcome, ProtocolError> {
        debug!("Sending command: {key}, data: {data:?}");

        let Some(command) = self.engine.registry.get_by_key(key).cloned()
        else {
            warn!("Command '{key}' not found in configuration");
            return Ok(SendOutcome::CommandNotFound);
        };

        let frame = encode_fields(&command.params, data, MissingFields::Reject).and_then(|info| {
            YdtEncoder::encode_frame(command.id1, command.id2, &info, self.engine.address)
                .map_err(|e| CodecError::Shape {
                    key:    command.key.clone(),
                    reason: e.to_string(),
                })
        });
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to build frame for '{key}': {e}");
                return Ok(SendOutcome::FrameNotBuilt);
            }
        };

        self.send_frame(&frame)?;

        if command.is_unidirectional() {
            debug!("'{key}' is unidirectional, not awaiting a reply");
            return Ok(SendOutcome::Sent);
        }

        let response = self.receive_frame()?;
        let decoded = YdtDecoder::decode_frame(&response)?;

        let code = ReturnCode::from(decoded.id2);
        if !code.is_ok() {
            warn!("'{key}' rejected by device: {code:?}");
            return Err(ProtocolError::Device(code));
        }

        let values = decode_fields(&command.values, decoded.info)?;
        debug!("Decoded response data: {values:?}");
        Ok(SendOutcome::Reply(values))
    }

    /// Sends every attributes and timeseries command without params and merges the replies.
    ///
    /// A command that fails is logged and left out of the report. Only a transport that stops
    /// working ends the pass early; a reply timeout does not.
    pub fn poll_cycle(&mut self) -> Result<PollReport, ProtocolError> {
        let registry = Arc::clone(&self.engine.registry);
        let mut report = PollReport::default();

        for (group, merged) in [
            (CommandGroup::Attributes, &mut report.attributes),
            (CommandGroup::Timeseries, &mut report.telemetry),
        ] {
            for command in registry.group(group) {
                match self.send_command(&command.key, &Record::new()) {
                    Ok(SendOutcome::Reply(values)) => merged.extend(values),
                    Ok(outcome) => debug!("Polling '{}' gave no reply: {outcome:?}", command.key),
                    Err(
                        e @ ProtocolError::Transport(
                            TransportError::NotOpen | TransportError::Serial(_) | TransportError::Io(_),
                        ),
                    ) => return Err(e),
                    Err(e) => warn!("Polling '{}' failed: {e}", command.key),
                }
            }
        }

        Ok(report)
    }

    // ——————————————————————————————————————————— Device ————————————————————————————————————————————

    /// Reads one request frame and decodes its params
    pub fn receive_command(&mut self) -> Result<(Arc<Command>, Record), ProtocolError> {
        let soi = self.engine.transport.read(SOI_LEN)?;
        let frame = self.receive_frame_after(&soi)?;
        self.resolve_request(&frame)
    }

    /// Like `receive_command`, but `None` when no frame starts within one read timeout.
    ///
    /// Once the start byte arrived, a timeout is an error like any other.
    pub fn try_receive_command(&mut self) -> Result<Option<(Arc<Command>, Record)>, ProtocolError> {
        let soi = match self.engine.transport.read(SOI_LEN) {
            Ok(soi) => soi,
            Err(TransportError::ShortRead { received: 0, .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let frame = self.receive_frame_after(&soi)?;
        self.resolve_request(&frame).map(Some)
    }

    fn resolve_request(&self, frame: &[u8]) -> Result<(Arc<Command>, Record), ProtocolError> {
        let decoded = YdtDecoder::decode_frame(frame)?;
        let (id1, id2) = (decoded.id1, decoded.id2);

        let command = self
            .engine
            .registry
            .get_by_id(id1, id2)
            .cloned()
            .ok_or(ProtocolError::InvalidId { id1, id2 })?;

        let data = decode_fields(&command.params, decoded.info)
            .map_err(|source| ProtocolError::InvalidParams { id1, id2, source })?;
        info!("Received command '{}': {data:?}", command.key);
        Ok((command, data))
    }

    /// Replies to `ref_command` with `return_code` in the CID2 position.
    ///
    /// Value fields absent from `data` are left out of the info.
    pub fn send_response(
        &mut self,
        ref_command: &Command,
        return_code: ReturnCode,
        data: &Record,
    ) -> Result<(), ProtocolError> {
        debug!("Sending response for '{}': {return_code:?}, data: {data:?}", ref_command.key);

        let info = encode_fields(&ref_command.values, data, MissingFields::Omit)
            .map_err(|e| ProtocolError::Format(e.to_string()))?;
        let frame = YdtEncoder::encode_frame(ref_command.id1, return_code.into(), &info, self.engine.address)?;

        self.send_frame(&frame)
    }

    /// Replies with an empty info, for requests that could not be matched to a command
    pub fn send_return_code(&mut self, id1: u8, return_code: ReturnCode) -> Result<(), ProtocolError> {
        let frame = YdtEncoder::encode_frame(id1, return_code.into(), &[], self.engine.address)?;
        self.send_frame(&frame)
    }

    // ———————————————————————————————————————————— Wire —————————————————————————————————————————————

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        debug!("Sending frame: {}", hex(frame));

        let transport = &mut self.engine.transport;
        transport.write(frame)?;
        transport.flush()?;
        Ok(())
    }

    /// Reads one frame field by field: SOI, header, LENGTH, INFO, CHKSUM, EOI
    fn receive_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let soi = self.engine.transport.read(SOI_LEN)?;
        self.receive_frame_after(&soi)
    }

    /// Rest of a frame whose SOI byte has already been read
    fn receive_frame_after(&mut self, soi: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let transport = &mut self.engine.transport;

        if soi[0] != SOI {
            return Err(ProtocolError::Format(format!("invalid SOI {:#04X}", soi[0])));
        }

        let header = transport.read(HEADER_LEN)?;

        let length = transport.read(LENGTH_LEN)?;
        let info_len = decode_length([length[0], length[1]])?;

        let info = transport.read(info_len)?;
        let chksum = transport.read(CHKSUM_LEN)?;

        let eoi = transport.read(EOI_LEN)?;
        if eoi[0] != EOI {
            return Err(ProtocolError::Format(format!("invalid EOI {:#04X}", eoi[0])));
        }

        let mut frame = Vec::with_capacity(MIN_FRAME_SIZE + info_len);
        frame.extend_from_slice(soi);
        for part in [&header, &length, &info, &chksum, &eoi] {
            frame.extend_from_slice(part);
        }

        debug!("Received frame: {}", hex(&frame));
        Ok(frame)
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Field Passes
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// Decodes `info` against `descriptors` in one left-to-right pass.
///
/// A `Quantity::Ref` reads its count from a field already decoded into the same record.
pub fn decode_fields(descriptors: &[FieldDescriptor], info: &[u8]) -> Result<Record, CodecError> {
    let mut record = Record::new();
    let mut cursor = 0usize;

    for descriptor in descriptors {
        let value = match count_of(descriptor, &record)? {
            None => FieldValue::Scalar(take_value(descriptor, info, &mut cursor)?),
            Some(count) => {
                let items = (0..count)
                    .map(|_| take_value(descriptor, info, &mut cursor))
                    .collect::<Result<Vec<_>, _>>()?;
                FieldValue::Array(items)
            }
        };
        record.insert(descriptor.key.clone(), value);
    }

    if cursor < info.len() {
        debug!("{} trailing info bytes ignored", info.len() - cursor);
    }
    Ok(record)
}

/// Encodes `data` in descriptor order
fn encode_fields(
    descriptors: &[FieldDescriptor],
    data: &Record,
    missing: MissingFields,
) -> Result<Vec<u8>, CodecError> {
    let mut info = Vec::new();

    for descriptor in descriptors {
        let Some(field) = data.get(&descriptor.key)
        else {
            match missing {
                MissingFields::Reject => return Err(CodecError::MissingField(descriptor.key.clone())),
                MissingFields::Omit => continue,
            }
        };

        match (&descriptor.quantity, field) {
            (Quantity::Scalar, FieldValue::Scalar(value)) => {
                info.extend(descriptor.codec.encode(value)?);
            }
            (Quantity::Fixed(_) | Quantity::Ref(_), FieldValue::Array(items)) => {
                if let Some(expected) = count_of(descriptor, data).ok().flatten() {
                    if items.len() != expected {
                        return Err(shape_error(
                            descriptor,
                            format!("expected {expected} items, got {}", items.len()),
                        ));
                    }
                }
                for item in items {
                    info.extend(descriptor.codec.encode(item)?);
                }
            }
            (Quantity::Scalar, FieldValue::Array(_)) => {
                return Err(shape_error(descriptor, "expected a scalar, got an array".into()));
            }
            (_, FieldValue::Scalar(_)) => {
                return Err(shape_error(descriptor, "expected an array, got a scalar".into()));
            }
        }
    }

    Ok(info)
}

/// `None` for scalars, otherwise the repeat count
fn count_of(descriptor: &FieldDescriptor, record: &Record) -> Result<Option<usize>, CodecError> {
    match &descriptor.quantity {
        Quantity::Scalar => Ok(None),
        Quantity::Fixed(n) => Ok(Some(*n)),
        Quantity::Ref(reference) => match record.get(reference) {
            Some(FieldValue::Scalar(Value::UInt(n))) => Ok(Some(*n as usize)),
            _ => Err(shape_error(descriptor, format!("count field '{reference}' has no unsigned value"))),
        },
    }
}

fn take_value(descriptor: &FieldDescriptor, info: &[u8], cursor: &mut usize) -> Result<Value, CodecError> {
    let width = descriptor.width();
    let remaining = info.len().saturating_sub(*cursor);

    if width > remaining {
        return Err(CodecError::Truncated {
            key: descriptor.key.clone(),
            needed: width,
            remaining,
        });
    }

    let value = descriptor.codec.decode(&info[*cursor..*cursor + width])?;
    *cursor += width;
    Ok(value)
}

fn shape_error(descriptor: &FieldDescriptor, reason: String) -> CodecError {
    CodecError::Shape {
        key: descriptor.key.clone(),
        reason,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ScalarCodec;

    fn field(key: &str, codec: ScalarCodec, quantity: Quantity) -> FieldDescriptor {
        FieldDescriptor {
            key: key.into(),
            name: key.into(),
            start: 0,
            codec,
            quantity,
        }
    }

    fn counted() -> Vec<FieldDescriptor> {
        vec![
            field("n", ScalarCodec::UInt8, Quantity::Scalar),
            field("items", ScalarCodec::UInt16, Quantity::Ref("n".into())),
        ]
    }

    #[test]
    fn symbolic_quantity_drives_array_length() {
        let record = decode_fields(&counted(), &[0x02, 0x00, 0x01, 0x00, 0x02]).unwrap();

        assert_eq!(record["n"], FieldValue::Scalar(Value::UInt(2)));
        assert_eq!(record["items"], FieldValue::Array(vec![Value::UInt(1), Value::UInt(2)]));
    }

    #[test]
    fn referenced_count_of_three_gives_three_items() {
        let info = [0x03, 0x00, 0x0A, 0x00, 0x0B, 0x00, 0x0C];
        let record = decode_fields(&counted(), &info).unwrap();

        match &record["items"] {
            FieldValue::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn zero_count_gives_empty_array() {
        let record = decode_fields(&counted(), &[0x00]).unwrap();
        assert_eq!(record["items"], FieldValue::Array(vec![]));
    }

    #[test]
    fn truncated_info_fails_decode() {
        let err = decode_fields(&counted(), &[0x02, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { ref key, needed: 2, remaining: 0 } if key == "items"));
    }

    #[test]
    fn fixed_quantity_reads_literal_count() {
        let descriptors = vec![field("flags", ScalarCodec::UInt8, Quantity::Fixed(3))];
        let record = decode_fields(&descriptors, &[1, 2, 3]).unwrap();

        assert_eq!(
            record["flags"],
            FieldValue::Array(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)])
        );
    }

    #[test]
    fn encode_rejects_missing_param() {
        let data = Record::from([("n".to_string(), Value::UInt(1).into())]);
        let err = encode_fields(&counted(), &data, MissingFields::Reject).unwrap_err();

        assert_eq!(err, CodecError::MissingField("items".into()));
    }

    #[test]
    fn encode_omits_missing_value_when_asked() {
        let data = Record::from([("n".to_string(), Value::UInt(0).into())]);
        let info = encode_fields(&counted(), &data, MissingFields::Omit).unwrap();

        assert_eq!(info, vec![0x00]);
    }

    #[test]
    fn encode_checks_array_against_count() {
        let data = Record::from([
            ("n".to_string(), Value::UInt(3).into()),
            ("items".to_string(), vec![Value::UInt(1)].into()),
        ]);

        let err = encode_fields(&counted(), &data, MissingFields::Reject).unwrap_err();
        assert!(matches!(err, CodecError::Shape { ref key, .. } if key == "items"));
    }

    #[test]
    fn encode_then_decode_counted_record() {
        let data = Record::from([
            ("n".to_string(), Value::UInt(2).into()),
            ("items".to_string(), vec![Value::UInt(7), Value::UInt(0x0102)].into()),
        ]);

        let info = encode_fields(&counted(), &data, MissingFields::Reject).unwrap();
        assert_eq!(info, vec![0x02, 0x00, 0x07, 0x01, 0x02]);
        assert_eq!(decode_fields(&counted(), &info).unwrap(), data);
    }
}
