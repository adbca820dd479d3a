use crate::iter::Step;
use crate::serialized_error::SerializedError;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Channel used when none is configured.
pub const DEFAULT_CHANNEL: &str = "default";

/// `type` discriminator of an init request.
pub const REQUEST_TYPE: &str = "request";

/// `type` discriminator of a sub-request.
pub const SUB_REQUEST_TYPE: &str = "sub-request";

/// Every `type` discriminator a response may carry.
pub const RESPONSE_TYPES: [&str; 6] = [
    "response",
    "response-function",
    "response-function-return",
    "response-iterator",
    "response-iterator-next",
    "error",
];

/// Anything that crosses the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::Request(req) => req.id(),
            Message::Response(res) => &res.id,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Message::Request(req) => req.channel(),
            Message::Response(res) => &res.channel,
        }
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    #[serde(rename = "request")]
    Init(InitRequest),
    SubRequest(SubRequest),
}

impl Request {
    pub fn id(&self) -> &str {
        match self {
            Request::Init(req) => &req.id,
            Request::SubRequest(req) => &req.id,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Request::Init(req) => &req.channel,
            Request::SubRequest(req) => &req.channel,
        }
    }
}

/// A call of the method at `path` with `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    pub channel: String,
    pub id: String,
    pub path: Vec<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl InitRequest {
    pub fn new(channel: &str, path: Vec<String>, args: Vec<Value>) -> Self {
        Self {
            channel: channel.to_string(),
            id: nanoid!(),
            path,
            args,
        }
    }

    /// Dotted form of the path, used in logs and fault messages.
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// Continuation of an exchange opened by an earlier [`InitRequest`] with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRequest {
    pub channel: String,
    pub id: String,
    #[serde(flatten)]
    pub kind: SubRequestKind,
}

impl SubRequest {
    pub fn iterator_next(channel: &str, id: &str) -> Self {
        Self {
            channel: channel.to_string(),
            id: id.to_string(),
            kind: SubRequestKind::AsyncIteratorNext,
        }
    }

    pub fn function_call(channel: &str, id: &str, args: Vec<Value>) -> Self {
        Self {
            channel: channel.to_string(),
            id: id.to_string(),
            kind: SubRequestKind::FunctionCall { args },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subRequest", rename_all = "kebab-case")]
pub enum SubRequestKind {
    AsyncIteratorNext,
    FunctionCall {
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl fmt::Display for SubRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubRequestKind::AsyncIteratorNext => write!(f, "async-iterator-next"),
            SubRequestKind::FunctionCall { .. } => write!(f, "function-call"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub channel: String,
    pub id: String,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn new(channel: &str, id: &str, body: ResponseBody) -> Self {
        Self {
            channel: channel.to_string(),
            id: id.to_string(),
            body,
        }
    }

    pub fn error(channel: &str, id: &str, error: SerializedError) -> Self {
        Self::new(channel, id, ResponseBody::Error { error: error.into() })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResponseBody {
    /// Plain value.
    Response {
        #[serde(default)]
        result: Value,
    },
    /// The result is a remote stream, pulled with `async-iterator-next`.
    ResponseIterator,
    /// One element of a remote stream.
    ResponseIteratorNext { result: Step<Value> },
    /// The result is a remote single-use callback, invoked with `function-call`.
    ResponseFunction,
    /// Return value of a remote callback.
    ResponseFunctionReturn {
        #[serde(default)]
        result: Value,
    },
    /// The error travels as raw JSON and is validated when it is unmarshaled.
    Error { error: Value },
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseBody::Response { .. } => "response",
            ResponseBody::ResponseIterator => "response-iterator",
            ResponseBody::ResponseIteratorNext { .. } => "response-iterator-next",
            ResponseBody::ResponseFunction => "response-function",
            ResponseBody::ResponseFunctionReturn { .. } => "response-function-return",
            ResponseBody::Error { .. } => "error",
        };
        write!(f, "{name}")
    }
}
