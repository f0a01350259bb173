//! Wire-compatible message schemas for service-to-service calls.
//!
//! Messages travel as JSON text; the transport only ever sees strings.

pub mod envelope;

pub use envelope::{CodecError, Message, MessageId, Request, Response};
