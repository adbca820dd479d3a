mod client;
pub mod codec;
mod deferred;
mod endpoint;
mod error;
mod iter;
mod message;
mod schema;
mod serialized_error;
pub mod server;
pub mod transport;
pub mod validation;

pub use transport::websocket::{
    client::ClientTransport as WebsocketClientTransport, client::connect as websocket_connect,
    server::ServerSessionTransport as WebsocketServerTransport, server::listen as websocket_listen,
};

pub use client::{
    CallArgs, ClientOptions, ClientProxy, MessageSink, ProxyPath, RemoteFunction, RemoteIterator,
    RemoteStream, Settled, encode_args, split_path,
};
pub use deferred::{Closed, Deferred, Settle, deferred};
pub use endpoint::{BridgeEndpoint, EndpointConfig};
pub use error::{CallError, ProtocolViolation};
pub use iter::{PullNext, Step, StreamSource, iterate};
pub use message::*;
pub use schema::{BridgeSchema, MethodSchema, ReplyShape};
pub use serialized_error::{RemoteError, SerializedError};
pub use server::{
    HandlerFault, MethodRegistry, Reply, ResponseOptions, ResponseServer, ServerOptions,
    SessionTag,
};
pub use validation::{is_init_request, is_request, is_response, is_sub_request};
