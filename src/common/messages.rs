//! # Envelopes
//!
//! The transport moves opaque JSON values ([`Envelope`]). It enforces no shape
//! on them; request/response pairing is purely "one write, one read" on the same
//! connection.
//!
//! A few envelopes are reserved by convention:
//!
//! - `{"ping": token}` / `{"pong": token}`: client liveness probes. Servers do
//!   not treat them specially; the peer application decides whether to answer.
//! - `{"status": "OK"}`: the acknowledgement a relay hub sends back to the
//!   sender of a broadcast.

use serde_json::{json, Value};
use uuid::Uuid;

/// One message on the wire.
pub type Envelope = Value;

pub const PING_KEY: &str = "ping";
pub const PONG_KEY: &str = "pong";
pub const STATUS_KEY: &str = "status";
pub const STATUS_OK: &str = "OK";

/// Fresh opaque token for a liveness probe.
pub fn new_ping_token() -> String {
    Uuid::new_v4().to_string()
}

pub fn ping_probe(token: &str) -> Envelope {
    json!({ PING_KEY: token })
}

pub fn pong_reply(token: &str) -> Envelope {
    json!({ PONG_KEY: token })
}

/// Token of a `{"ping": token}` envelope, if `envelope` is one.
pub fn ping_token(envelope: &Envelope) -> Option<&str> {
    reserved_token(envelope, PING_KEY)
}

/// Token of a `{"pong": token}` envelope, if `envelope` is one.
pub fn pong_token(envelope: &Envelope) -> Option<&str> {
    reserved_token(envelope, PONG_KEY)
}

/// Acknowledgement sent to the author of a relayed message.
pub fn relay_ack() -> Envelope {
    json!({ STATUS_KEY: STATUS_OK })
}

pub fn is_relay_ack(envelope: &Envelope) -> bool {
    envelope.get(STATUS_KEY).and_then(Value::as_str) == Some(STATUS_OK)
}

// Reserved envelopes carry exactly one field.
fn reserved_token<'a>(envelope: &'a Envelope, key: &str) -> Option<&'a str> {
    let fields = envelope.as_object()?;
    if fields.len() != 1 {
        return None;
    }
    fields.get(key)?.as_str()
}
