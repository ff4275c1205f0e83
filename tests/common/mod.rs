use std::collections::VecDeque;
use std::sync::Arc;

use ydt_serial_link::{CommandRegistry, Transport, TransportError};

/// In-memory transport: reads are served from a scripted byte queue, writes are captured
#[derive(Debug, Default)]
pub struct MockTransport {
    pub inbound: VecDeque<u8>,
    pub written: Vec<u8>,
    pub reads:   usize,
    pub flushes: usize,
    pub open:    bool,
    pub closed:  bool,
}

impl MockTransport {
    pub fn with_inbound(bytes: &[u8]) -> Self {
        Self {
            inbound: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.open = true;
        self.closed = false;
        Ok(())
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.reads += 1;

        if self.inbound.len() < n {
            let received = self.inbound.len();
            self.inbound.clear();
            return Err(TransportError::ShortRead { expected: n, received });
        }
        Ok(self.inbound.drain(..n).collect())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.flushes += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.closed = true;
        Ok(())
    }
}

pub const SCHEMA: &str = r#"{
    "attributes": [
        {
            "cid1": "0x40", "cid2": "0x51", "key": "mfrInfo",
            "values": [
                { "key": "vendor", "dataType": "string", "length": 4 }
            ]
        }
    ],
    "timeseries": [
        {
            "cid1": "0x40", "cid2": "0x41", "key": "rectAnalog", "name": "Rectifier analog",
            "params": [
                { "key": "group", "dataType": "uint8", "start": 0, "length": 1 }
            ],
            "values": [
                { "key": "voltage", "dataType": "float", "start": 0, "length": 4 },
                { "key": "n", "dataType": "uint8", "start": 4, "length": 1 },
                { "key": "currents", "dataType": "uint16", "start": 5, "quantity": "${n}" }
            ]
        },
        {
            "cid1": "0x40", "cid2": "0x44", "key": "rectStatus",
            "values": [
                { "key": "state", "dataType": "enum", "enum": { "on": 0, "off": 1 } },
                { "key": "model", "dataType": "string", "length": 6 }
            ]
        }
    ],
    "serverSideRpc": [
        {
            "cid1": "0x40", "cid2": "0x45", "key": "rectControl",
            "params": [
                { "key": "command", "dataType": "enum", "enum": { "on": 32, "off": 47 } }
            ]
        },
        {
            "cid1": "0x40", "cid2": "0x81", "key": "ping"
        },
        {
            "cid1": "0x42", "cid2": "0x4D", "key": "getTime",
            "values": [
                { "key": "time", "dataType": "datetime" }
            ]
        }
    ]
}"#;

pub fn registry() -> Arc<CommandRegistry> {
    Arc::new(CommandRegistry::from_json_str(SCHEMA).unwrap())
}
