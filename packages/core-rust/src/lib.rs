//! `Tessera` Core: service descriptions, typed values, wire messages and logical time.

pub mod description;
pub mod messages;
pub mod result;
pub mod time;
pub mod types;

pub use description::{Operation, RegisterId, ServiceDescription};
pub use messages::{CodecError, Message, MessageId, Request, Response};
pub use result::RemoteResult;
pub use types::{FromValue, Value, ValueError, ValueKind};
