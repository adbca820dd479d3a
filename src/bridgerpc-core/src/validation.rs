//! Structural recognition of bridge traffic.
//!
//! The predicates only look at `type` and `channel`; everything else passes
//! through as opaque data. They are the gate between bridge messages and
//! foreign traffic sharing the same transport.

use crate::error::ProtocolViolation;
use crate::message::{REQUEST_TYPE, RESPONSE_TYPES, Request, Response, SUB_REQUEST_TYPE};
use serde_json::Value;

fn has_type_on_channel(x: &Value, channel: &str, accept: impl Fn(&str) -> bool) -> bool {
    let Some(obj) = x.as_object() else {
        return false;
    };
    let type_matches = obj.get("type").and_then(Value::as_str).is_some_and(accept);
    let channel_matches = obj.get("channel").and_then(Value::as_str) == Some(channel);
    type_matches && channel_matches
}

pub fn is_init_request(x: &Value, channel: &str) -> bool {
    has_type_on_channel(x, channel, |t| t == REQUEST_TYPE)
}

pub fn is_sub_request(x: &Value, channel: &str) -> bool {
    has_type_on_channel(x, channel, |t| t == SUB_REQUEST_TYPE)
}

pub fn is_request(x: &Value, channel: &str) -> bool {
    is_init_request(x, channel) || is_sub_request(x, channel)
}

pub fn is_response(x: &Value, channel: &str) -> bool {
    has_type_on_channel(x, channel, |t| RESPONSE_TYPES.contains(&t))
}

/// Narrows a decoded value into a [`Request`].
///
/// `Ok(None)` means the value is not a request on `channel`. A value that
/// claims to be one but does not fit the shape is a protocol violation.
pub fn request_from_value(x: Value, channel: &str) -> Result<Option<Request>, ProtocolViolation> {
    if !is_request(&x, channel) {
        return Ok(None);
    }
    serde_json::from_value(x)
        .map(Some)
        .map_err(ProtocolViolation::malformed)
}

/// Narrows a decoded value into a [`Response`]. See [`request_from_value`].
pub fn response_from_value(x: Value, channel: &str) -> Result<Option<Response>, ProtocolViolation> {
    if !is_response(&x, channel) {
        return Ok(None);
    }
    serde_json::from_value(x)
        .map(Some)
        .map_err(ProtocolViolation::malformed)
}
