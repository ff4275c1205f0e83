mod common;

use chrono::NaiveDate;

use common::{MockTransport, registry};
use ydt_serial_link::ydt_shared::{EOI, PROTOCOL_VERSION, SOI};
use ydt_serial_link::{
    FieldValue, PollReport, ProtocolEngine, ProtocolError, Record, ReturnCode, SendOutcome, TransportError,
    Value, YdtEncoder,
};

const ADDRESS: u8 = 0x01;

fn engine(inbound: &[u8]) -> ProtocolEngine<MockTransport> {
    ProtocolEngine::new(registry(), MockTransport::with_inbound(inbound), ADDRESS)
}

fn frame(id1: u8, id2: u8, info: &[u8]) -> Vec<u8> {
    YdtEncoder::encode_frame(id1, id2, info, ADDRESS).unwrap()
}

fn record(fields: &[(&str, FieldValue)]) -> Record {
    fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Frames
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[test]
fn empty_info_frame_layout() {
    let bytes = frame(0x40, 0x81, &[]);

    assert_eq!(&bytes[..5], &[SOI, PROTOCOL_VERSION, 0x01, 0x40, 0x81]);
    assert_eq!(&bytes[5..7], &[0x00, 0x00]);
    assert_eq!(&bytes[7..9], &[0xFF, 0x3E]);
    assert_eq!(bytes[9], EOI);
    assert_eq!(bytes.len(), 10);
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Client
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[test]
fn unidirectional_command_does_not_read() {
    let mut engine = engine(&[]);
    {
        let mut session = engine.connect().unwrap();
        let outcome = session.send_command("ping", &Record::new()).unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
    }

    let transport = engine.into_transport();
    assert_eq!(transport.written, frame(0x40, 0x81, &[]));
    assert_eq!(transport.reads, 0);
    assert_eq!(transport.flushes, 1);
}

#[test]
fn unknown_key_sends_nothing() {
    let mut engine = engine(&[]);
    {
        let mut session = engine.connect().unwrap();
        let outcome = session.send_command("noSuchCommand", &Record::new()).unwrap();
        assert_eq!(outcome, SendOutcome::CommandNotFound);
    }

    assert!(engine.transport().written.is_empty());
}

#[test]
fn missing_param_builds_no_frame() {
    let mut engine = engine(&[]);
    {
        let mut session = engine.connect().unwrap();
        let outcome = session.send_command("rectAnalog", &Record::new()).unwrap();
        assert_eq!(outcome, SendOutcome::FrameNotBuilt);
    }

    let transport = engine.into_transport();
    assert!(transport.written.is_empty());
    assert_eq!(transport.reads, 0);
}

#[test]
fn unknown_enum_name_builds_no_frame() {
    let mut engine = engine(&[]);
    let mut session = engine.connect().unwrap();

    let data = record(&[("command", Value::Text("reboot".into()).into())]);
    assert_eq!(session.send_command("rectControl", &data).unwrap(), SendOutcome::FrameNotBuilt);
}

#[test]
fn reply_with_counted_array_is_decoded() {
    let mut info = 53.5f32.to_be_bytes().to_vec();
    info.extend_from_slice(&[0x02, 0x00, 0x0A, 0x00, 0x14]);
    let mut engine = engine(&frame(0x40, 0x00, &info));

    let reply = {
        let mut session = engine.connect().unwrap();
        let data = record(&[("group", Value::UInt(1).into())]);
        session.send_command("rectAnalog", &data).unwrap().into_reply().unwrap()
    };

    assert_eq!(reply["voltage"], FieldValue::Scalar(Value::Float(53.5)));
    assert_eq!(reply["n"], FieldValue::Scalar(Value::UInt(2)));
    assert_eq!(reply["currents"], FieldValue::Array(vec![Value::UInt(10), Value::UInt(20)]));

    assert_eq!(engine.transport().written, frame(0x40, 0x41, &[0x01]));
}

#[test]
fn reply_with_enum_and_padded_string() {
    let mut engine = engine(&frame(0x40, 0x00, &[0x01, b'R', b'4', b'8', 0, 0, 0]));
    let mut session = engine.connect().unwrap();

    let reply = session.send_command("rectStatus", &Record::new()).unwrap();

    assert_eq!(
        reply,
        SendOutcome::Reply(record(&[
            ("state", Value::Text("off".into()).into()),
            ("model", Value::Text("R48".into()).into()),
        ]))
    );
}

#[test]
fn reply_with_datetime() {
    let mut engine = engine(&frame(0x42, 0x00, &[0x07, 0xE8, 5, 1, 12, 30, 0]));
    let mut session = engine.connect().unwrap();

    let reply = session.send_command("getTime", &Record::new()).unwrap().into_reply().unwrap();
    let expected = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(12, 30, 0).unwrap();

    assert_eq!(reply["time"], FieldValue::Scalar(Value::DateTime(expected)));
}

#[test]
fn non_ok_return_code_is_a_device_error() {
    let mut engine = engine(&frame(0x40, 0x04, &[]));
    let mut session = engine.connect().unwrap();

    let err = session.send_command("rectStatus", &Record::new()).unwrap_err();
    assert!(matches!(err, ProtocolError::Device(ReturnCode::InvalidId)));
}

#[test]
fn device_defined_return_code_is_kept() {
    let mut engine = engine(&frame(0x40, 0x85, &[]));
    let mut session = engine.connect().unwrap();

    let err = session.send_command("rectStatus", &Record::new()).unwrap_err();
    assert!(matches!(err, ProtocolError::Device(ReturnCode::Device(0x85))));
}

#[test]
fn corrupted_reply_is_a_checksum_error() {
    let mut reply = frame(0x40, 0x00, &[0x00, b'A', 0, 0, 0, 0, 0]);
    reply[8] ^= 0x01;
    let mut engine = engine(&reply);
    let mut session = engine.connect().unwrap();

    let err = session.send_command("rectStatus", &Record::new()).unwrap_err();
    assert!(matches!(err, ProtocolError::Checksum { .. }));
}

#[test]
fn truncated_reply_is_a_short_read() {
    let reply = frame(0x40, 0x00, &[0x00, b'A', 0, 0, 0, 0, 0]);
    let mut engine = engine(&reply[..reply.len() - 2]);
    let mut session = engine.connect().unwrap();

    let err = session.send_command("rectStatus", &Record::new()).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Transport(TransportError::ShortRead { expected: 2, received: 1 })
    ));
}

#[test]
fn reply_with_too_little_info_is_invalid_data() {
    let mut engine = engine(&frame(0x40, 0x00, &[0x00]));
    let mut session = engine.connect().unwrap();

    let err = session.send_command("rectStatus", &Record::new()).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidData(_)));
    assert_eq!(err.return_code(), Some(ReturnCode::InvalidData));
}

#[test]
fn garbage_before_frame_is_a_format_error() {
    let mut engine = engine(&[0x00, 0x7E]);
    let mut session = engine.connect().unwrap();

    let err = session.send_command("rectStatus", &Record::new()).unwrap_err();
    assert!(matches!(err, ProtocolError::Format(_)));
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Device
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[test]
fn receive_command_decodes_params() {
    let mut engine = engine(&frame(0x40, 0x45, &[0x2F]));
    let mut session = engine.connect().unwrap();

    let (command, data) = session.receive_command().unwrap();

    assert_eq!(command.key, "rectControl");
    assert_eq!(data["command"], FieldValue::Scalar(Value::Text("off".into())));
}

#[test]
fn receive_command_with_unknown_ids_is_invalid_id() {
    let mut engine = engine(&frame(0x99, 0x01, &[]));
    let mut session = engine.connect().unwrap();

    let err = session.receive_command().unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidId { id1: 0x99, id2: 0x01 }));
}

#[test]
fn unknown_ids_do_not_disturb_the_next_request() {
    let mut inbound = frame(0x99, 0x01, &[0x10, 0x20, 0x30]);
    inbound.extend(frame(0x40, 0x45, &[0x20]));
    let mut engine = engine(&inbound);
    let mut session = engine.connect().unwrap();

    let err = session.receive_command().unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidId { id1: 0x99, id2: 0x01 }));

    let (command, data) = session.receive_command().unwrap();
    assert_eq!(command.key, "rectControl");
    assert_eq!(data["command"], FieldValue::Scalar(Value::Text("on".into())));
}

#[test]
fn undecodable_params_keep_the_request_ids() {
    let mut engine = engine(&frame(0x40, 0x45, &[0x77]));
    let mut session = engine.connect().unwrap();

    let err = session.receive_command().unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParams { id1: 0x40, id2: 0x45, .. }));
    assert_eq!(err.return_code(), Some(ReturnCode::InvalidData));
    assert_eq!(err.request_id1(), Some(0x40));
}

#[test]
fn try_receive_on_idle_line_is_none() {
    let mut engine = engine(&[]);
    let mut session = engine.connect().unwrap();

    assert!(session.try_receive_command().unwrap().is_none());
}

#[test]
fn try_receive_reports_a_stalled_frame() {
    let request = frame(0x40, 0x45, &[0x20]);
    let mut engine = engine(&request[..7]);
    let mut session = engine.connect().unwrap();

    let err = session.try_receive_command().unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Transport(TransportError::ShortRead { expected: 1, received: 0 })
    ));
}

#[test]
fn try_receive_decodes_a_waiting_request() {
    let mut engine = engine(&frame(0x40, 0x45, &[0x2F]));
    let mut session = engine.connect().unwrap();

    let (command, _) = session.try_receive_command().unwrap().unwrap();
    assert_eq!(command.key, "rectControl");
}

#[test]
fn receive_command_on_idle_line_is_an_empty_short_read() {
    let mut engine = engine(&[]);
    let mut session = engine.connect().unwrap();

    let err = session.receive_command().unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::Transport(TransportError::ShortRead { received: 0, .. })
    ));
}

#[test]
fn send_response_omits_absent_values() {
    let mut engine = engine(&[]);
    {
        let mut session = engine.connect().unwrap();
        let command = session.registry().get_by_key("rectStatus").cloned().unwrap();
        let data = record(&[("state", Value::Text("off".into()).into())]);

        session.send_response(&command, ReturnCode::Ok, &data).unwrap();
    }

    assert_eq!(engine.transport().written, frame(0x40, 0x00, &[0x01]));
}

#[test]
fn send_return_code_carries_code_in_cid2() {
    let mut engine = engine(&[]);
    {
        let mut session = engine.connect().unwrap();
        session.send_return_code(0x99, ReturnCode::InvalidId).unwrap();
    }

    assert_eq!(engine.transport().written, frame(0x99, 0x04, &[]));
}

#[test]
fn client_request_is_understood_by_device() {
    let mut client = engine(&[]);
    let data = record(&[("command", Value::Text("on".into()).into())]);
    {
        let mut session = client.connect().unwrap();
        assert_eq!(session.send_command("rectControl", &data).unwrap(), SendOutcome::Sent);
    }

    let written = client.into_transport().written;
    let mut device = engine(&written);
    let mut session = device.connect().unwrap();
    let (command, received) = session.receive_command().unwrap();

    assert_eq!(command.key, "rectControl");
    assert_eq!(received, data);
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Polling
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[test]
fn poll_cycle_merges_attributes_and_telemetry() {
    let mut inbound = frame(0x40, 0x00, b"ACME");
    inbound.extend(frame(0x40, 0x00, &[0x00, b'R', b'4', b'8', 0, 0, 0]));
    let mut engine = engine(&inbound);

    let report = {
        let mut session = engine.connect().unwrap();
        session.poll_cycle().unwrap()
    };

    assert_eq!(
        report,
        PollReport {
            attributes: record(&[("vendor", Value::Text("ACME".into()).into())]),
            telemetry:  record(&[
                ("state", Value::Text("on".into()).into()),
                ("model", Value::Text("R48".into()).into()),
            ]),
        }
    );

    // rectAnalog needs params, so only two requests went out
    let mut expected = frame(0x40, 0x51, &[]);
    expected.extend(frame(0x40, 0x44, &[]));
    assert_eq!(engine.transport().written, expected);
}

#[test]
fn poll_cycle_skips_a_silent_command() {
    let mut engine = engine(&frame(0x40, 0x00, b"ACME"));
    let mut session = engine.connect().unwrap();

    let report = session.poll_cycle().unwrap();

    assert_eq!(report.attributes["vendor"], FieldValue::Scalar(Value::Text("ACME".into())));
    assert!(report.telemetry.is_empty());
}

#[test]
fn poll_report_serializes_as_two_maps() {
    let report = PollReport {
        attributes: record(&[("vendor", Value::Text("ACME".into()).into())]),
        telemetry:  record(&[("n", Value::UInt(2).into())]),
    };

    assert_eq!(
        serde_json::to_string(&report).unwrap(),
        r#"{"attributes":{"vendor":"ACME"},"telemetry":{"n":2}}"#
    );
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                             Lifecycle
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[test]
fn dropping_the_session_closes_the_transport() {
    let mut engine = engine(&[]);
    {
        let mut session = engine.connect().unwrap();
        // Failing call, session still released
        assert!(session.receive_command().is_err());
    }

    assert!(engine.transport().closed);
    assert!(!engine.transport().open);
}
