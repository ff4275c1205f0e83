//! YD/T 1363 serial link
//!
//! Request/response protocol engine for power-system monitoring units (rectifiers, DC buses,
//! battery and environment sensors) on a half-duplex serial line.
//!
//! - `ydt_encoder` / `ydt_decoder`: frame build, split and validation
//! - `data`: fixed-width scalar codec
//! - `schema` / `registry`: command definitions, indexed by id pair and key
//! - `engine`: send / receive / respond over a `transport::Transport`

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod registry;
pub mod schema;
pub mod stdio_helper;
pub mod transport;
pub mod ydt_decoder;
pub mod ydt_encoder;
pub mod ydt_shared;

pub use config::{ConfigError, LinkConfig, SerialConfig};
pub use data::{DataType, FieldValue, Record, ScalarCodec, Value};
pub use engine::{PollReport, ProtocolEngine, SendOutcome, Session};
pub use error::{CodecError, ProtocolError, SchemaError};
pub use registry::CommandRegistry;
pub use schema::{Command, CommandGroup, CommandSchema, FieldDescriptor, Quantity};
pub use transport::{SerialTransport, Transport, TransportError};
pub use ydt_decoder::{YdtDecoder, YdtFrame};
pub use ydt_encoder::YdtEncoder;
pub use ydt_shared::ReturnCode;
