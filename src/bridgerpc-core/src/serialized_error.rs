use crate::error::ProtocolViolation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::backtrace::BacktraceStatus;
use std::fmt;

/// Name given to faults that do not carry one of their own.
pub const DEFAULT_ERROR_NAME: &str = "Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Brand {
    SerializedError,
}

/// Wire-safe form of a fault.
///
/// Only name, message and stack text survive the trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    brand: Brand,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(remote) = err.downcast_ref::<RemoteError>() {
            // Context added while relaying stays in front of the remote message.
            let mut message: Vec<String> = err
                .chain()
                .take_while(|cause| !cause.is::<RemoteError>())
                .map(ToString::to_string)
                .collect();
            message.push(remote.message.clone());
            return Self {
                brand: Brand::SerializedError,
                message: message.join(": "),
                name: remote.name.clone(),
                stack: remote.stack.clone(),
            };
        }

        let message = err.to_string();
        let stack = stack_of(err, &message);
        Self {
            brand: Brand::SerializedError,
            message,
            name: Some(DEFAULT_ERROR_NAME.to_string()),
            stack,
        }
    }

    /// For faults that are not errors, e.g. a panic payload.
    pub fn from_display(fault: impl fmt::Display) -> Self {
        Self {
            brand: Brand::SerializedError,
            message: fault.to_string(),
            name: None,
            stack: None,
        }
    }

    pub fn from_value(value: Value) -> Result<RemoteError, ProtocolViolation> {
        serde_json::from_value::<SerializedError>(value)
            .map(RemoteError::from)
            .map_err(|e| ProtocolViolation::MalformedFault {
                reason: e.to_string(),
            })
    }
}

fn stack_of(err: &anyhow::Error, message: &str) -> Option<String> {
    let mut lines: Vec<String> = err
        .chain()
        .skip(1)
        .map(|cause| format!("    caused by: {cause}"))
        .collect();

    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        lines.push(backtrace.to_string());
    }

    if lines.is_empty() {
        return None;
    }
    Some(format!("{DEFAULT_ERROR_NAME}: {message}\n{}", lines.join("\n")))
}

impl From<SerializedError> for Value {
    fn from(err: SerializedError) -> Self {
        let mut map = Map::new();
        map.insert("brand".into(), Value::from("SerializedError"));
        map.insert("message".into(), Value::from(err.message));
        if let Some(name) = err.name {
            map.insert("name".into(), Value::from(name));
        }
        if let Some(stack) = err.stack {
            map.insert("stack".into(), Value::from(stack));
        }
        Value::Object(map)
    }
}

/// A fault raised on the other side of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub name: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<SerializedError> for RemoteError {
    fn from(err: SerializedError) -> Self {
        Self {
            name: err.name,
            message: err.message,
            stack: err.stack,
        }
    }
}
