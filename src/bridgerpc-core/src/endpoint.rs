use crate::client::{ClientOptions, ClientProxy};
use crate::codec::Codec;
use crate::message::{DEFAULT_CHANNEL, Message, Response};
use crate::serialized_error::SerializedError;
use crate::server::{ResponseOptions, ResponseServer, SessionTag};
use crate::transport::Transport;
use crate::validation::{is_request, is_response, request_from_value, response_from_value};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, trace};

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub channel: String,
    /// Applied to every call made through [`BridgeEndpoint::client`].
    pub call_timeout: Option<Duration>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            call_timeout: None,
        }
    }
}

/// Both bridge roles attached to one transport.
///
/// Inbound requests go to the [`ResponseServer`] (if any), inbound responses
/// to the endpoint's [`ClientProxy`]. Everything else on the transport is
/// ignored.
///
/// The endpoint shuts down when the transport ends, a send fails or
/// [`BridgeEndpoint::close`] is called. Shutdown stops both loops, aborts
/// requests still being served, fails pending calls and releases the
/// continuations opened by the peer.
pub struct BridgeEndpoint<T: Transport> {
    transport: Arc<T>,
    client: ClientProxy,
    session: SessionTag,
    stop: Arc<watch::Sender<bool>>,
    closed: watch::Receiver<bool>,
}

impl<T: Transport> BridgeEndpoint<T> {
    /// Starts the receive and write loops over `transport`.
    pub fn open<C: Codec>(
        transport: T,
        codec: C,
        server: Option<Arc<ResponseServer>>,
        config: EndpointConfig,
    ) -> Arc<Self> {
        let transport = Arc::new(transport);
        let (outbound, outbound_rx) = unbounded_channel::<Message>();
        let (closed_tx, closed) = watch::channel(false);
        let stop = Arc::new(watch::channel(false).0);

        let client = ClientProxy::new(
            ClientOptions {
                channel: config.channel.clone(),
                call_timeout: config.call_timeout,
            },
            outbound.clone(),
        );

        let endpoint = Arc::new(Self {
            transport: transport.clone(),
            client: client.clone(),
            session: SessionTag::generate(),
            stop: stop.clone(),
            closed,
        });

        let writer = tokio::spawn(write_loop(
            transport.clone(),
            codec.clone(),
            outbound_rx,
            stop.clone(),
        ));

        let mut inbound = Inbound {
            channel: config.channel,
            client,
            server,
            session: endpoint.session.clone(),
            outbound,
            requests: JoinSet::new(),
        };
        tokio::spawn(async move {
            inbound.run(transport.as_ref(), &codec, &stop).await;
            stop.send_replace(true);
            inbound.shutdown(transport.as_ref(), writer).await;
            closed_tx.send_replace(true);
        });

        endpoint
    }

    /// Proxy for calling into the peer's server.
    pub fn client(&self) -> &ClientProxy {
        &self.client
    }

    /// Tag continuations opened by this endpoint's peer are bound to.
    pub fn session_tag(&self) -> &SessionTag {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the transport has ended and the endpoint has cleaned up.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Closes the transport and starts shutting the endpoint down.
    ///
    /// Await [`BridgeEndpoint::closed`] to wait for the cleanup.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.stop.send_replace(true);
        self.transport.close().await
    }
}

async fn write_loop<T, C>(
    transport: Arc<T>,
    codec: C,
    mut outbound: UnboundedReceiver<Message>,
    stop: Arc<watch::Sender<bool>>,
) where
    T: Transport,
    C: Codec,
{
    let mut stopped = stop.subscribe();
    loop {
        let message = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = stopped.wait_for(|stop| *stop) => break,
        };
        let frame = match codec.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                error!(id = %message.id(), "Failed to encode bridge message: {err}");
                continue;
            }
        };
        if let Err(err) = transport.send(&frame).await {
            error!("Transport send error: {err}");
            break;
        }
    }

    // Later sends fail fast instead of waiting for a reply that cannot come.
    outbound.close();
    stop.send_replace(true);
}

struct Inbound {
    channel: String,
    client: ClientProxy,
    server: Option<Arc<ResponseServer>>,
    session: SessionTag,
    outbound: UnboundedSender<Message>,
    requests: JoinSet<()>,
}

impl Inbound {
    async fn run<T: Transport, C: Codec>(&mut self, transport: &T, codec: &C, stop: &watch::Sender<bool>) {
        let mut stopped = stop.subscribe();
        loop {
            let received = tokio::select! {
                received = transport.receive() => received,
                _ = stopped.wait_for(|stop| *stop) => {
                    debug!("Bridge endpoint stopped");
                    break;
                }
            };
            let frame = match received {
                Ok(frame) => frame,
                Err(err) => {
                    debug!("Bridge transport ended: {err}");
                    break;
                }
            };

            let raw: Value = match codec.decode(&frame) {
                Ok(raw) => raw,
                Err(err) => {
                    error!("Decode error: {err}");
                    continue;
                }
            };

            if is_response(&raw, &self.channel) {
                self.on_response(raw);
            } else if is_request(&raw, &self.channel) {
                self.on_request(raw);
            } else {
                trace!("Ignoring foreign message");
            }
        }
    }

    fn on_response(&self, raw: Value) {
        let outcome = response_from_value(raw, &self.channel)
            .and_then(|response| match response {
                Some(response) => self.client.handle_response(response),
                None => Ok(()),
            });
        if let Err(violation) = outcome {
            error!("Rejected bridge response: {violation}");
        }
    }

    fn on_request(&mut self, raw: Value) {
        let id = raw.get("id").and_then(Value::as_str).map(str::to_string);
        let request = match request_from_value(raw, &self.channel) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(violation) => {
                error!("Rejected bridge request: {violation}");
                if let Some(id) = id {
                    self.reply(Response::error(
                        &self.channel,
                        &id,
                        SerializedError::from_display(&violation),
                    ));
                }
                return;
            }
        };

        let Some(server) = self.server.clone() else {
            debug!(id = %request.id(), "No bridge server on this endpoint");
            self.reply(Response::error(
                request.channel(),
                request.id(),
                SerializedError::from_display("No bridge server on this endpoint"),
            ));
            return;
        };

        // Reap finished request tasks so the set only holds in-flight ones.
        while self.requests.try_join_next().is_some() {}

        let outbound = self.outbound.clone();
        let options = ResponseOptions::with_session(self.session.clone());
        self.requests.spawn(async move {
            let (channel, id) = (request.channel().to_string(), request.id().to_string());
            let response = match server.create_response(request, options).await {
                Ok(response) => response,
                Err(violation) => {
                    error!(%id, "Rejected bridge request: {violation}");
                    Response::error(&channel, &id, SerializedError::from_display(&violation))
                }
            };
            let _ = outbound.send(response.into());
        });
    }

    fn reply(&self, response: Response) {
        let _ = self.outbound.send(response.into());
    }

    async fn shutdown<T: Transport>(&mut self, transport: &T, writer: JoinHandle<()>) {
        // Nothing served after this point may open a continuation.
        let aborted = self.requests.len();
        self.requests.shutdown().await;
        if aborted > 0 {
            debug!("Aborted {aborted} in-flight bridge requests");
        }
        let _ = writer.await;

        self.client.close();
        if let Some(server) = &self.server {
            let released = server.release_session(&self.session);
            if released > 0 {
                debug!("Released {released} continuations of a closed bridge endpoint");
            }
        }
        if let Err(err) = transport.close().await {
            debug!("Bridge transport close: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallError, ProtocolViolation};
    use crate::message::{InitRequest, Request};
    use crate::server::{MethodRegistry, Reply};
    use crate::transport::TransportMessage;
    use crate::codec::json::JsonCodec;
    use crate::transport::channel::{ChannelTransport, channel_transport_pair};
    use futures::{StreamExt, stream};
    use serde_json::json;

    fn server() -> Arc<ResponseServer> {
        let mut methods = MethodRegistry::new();
        methods
            .register_method("ping", |_: ()| async move { Ok("pong") })
            .register_stream("count", |(n,): (u32,)| async move {
                Ok(stream::iter((0..n).map(Ok::<_, anyhow::Error>)))
            })
            .register_reply("greeter", |_: ()| async move {
                Ok(Reply::callback(|(name,): (String,)| async move { Ok(format!("hello {name}")) }))
            });
        Arc::new(ResponseServer::new(methods))
    }

    type Endpoint = Arc<BridgeEndpoint<ChannelTransport>>;

    fn pair() -> (Endpoint, Endpoint, Arc<ResponseServer>) {
        let (a, b) = channel_transport_pair(16);
        let server = server();
        let caller = BridgeEndpoint::open(a, JsonCodec::new(), None, EndpointConfig::default());
        let callee = BridgeEndpoint::open(b, JsonCodec::new(), Some(server.clone()), EndpointConfig::default());
        (caller, callee, server)
    }

    #[tokio::test]
    async fn request_response_over_channel_transport() {
        let (caller, _callee, _) = pair();
        let pong: String = caller.client().path("ping").value(()).await.unwrap();
        assert_eq!(pong, "pong");
    }

    #[tokio::test]
    async fn streams_and_callbacks_over_channel_transport() {
        let (caller, callee, server) = pair();

        let numbers: Vec<u32> = caller
            .client()
            .path("count")
            .stream((3,))
            .await
            .unwrap()
            .into_typed::<u32>()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(numbers, vec![0, 1, 2]);

        let greet = caller.client().path("greeter").function(()).await.unwrap();
        assert!(server.has_continuation(greet.id()));
        let reply: String = greet.invoke(("ada",)).await.unwrap();
        assert_eq!(reply, "hello ada");

        // The second call is answered with an error instead of hanging.
        let err = greet.invoke::<_, String>(("bob",)).await.unwrap_err();
        let violation = ProtocolViolation::ContinuationConsumed {
            id: greet.id().to_string(),
        };
        assert_eq!(err.remote().unwrap().message, violation.to_string());
        assert_eq!(server.continuation_count(), 0);
        assert!(!callee.is_closed());
    }

    #[tokio::test]
    async fn requests_without_a_server_are_answered() {
        let (_caller, callee, _) = pair();
        let err = callee.client().path("ping").value::<_, String>(()).await.unwrap_err();
        assert!(matches!(err, CallError::Remote(_)));
    }

    #[tokio::test]
    async fn foreign_traffic_is_ignored() {
        let codec = JsonCodec::new();
        let (a, b) = channel_transport_pair(16);
        let _callee = BridgeEndpoint::open(b, codec.clone(), Some(server()), EndpointConfig::default());

        a.send(&TransportMessage::Text(br#"{"hello":"world"}"#.to_vec())).await.unwrap();
        a.send(&TransportMessage::Text(b"garbage".to_vec())).await.unwrap();
        let elsewhere = InitRequest::new("other", vec!["ping".into()], vec![]);
        a.send(&codec.encode(&Message::Request(Request::Init(elsewhere))).unwrap())
            .await
            .unwrap();

        let request = InitRequest::new(DEFAULT_CHANNEL, vec!["ping".into()], vec![]);
        let id = request.id.clone();
        a.send(&codec.encode(&Message::Request(Request::Init(request))).unwrap())
            .await
            .unwrap();

        // Only the request on the bridge channel is answered.
        let reply = codec.decode(&a.receive().await.unwrap()).unwrap();
        assert_eq!(reply["id"], json!(id));
        assert_eq!(reply["result"], json!("pong"));
    }

    #[tokio::test]
    async fn malformed_request_gets_an_error_response() {
        let (a, b) = channel_transport_pair(16);
        let _callee = BridgeEndpoint::open(b, JsonCodec::new(), Some(server()), EndpointConfig::default());

        let bad = json!({ "type": "request", "channel": "default", "id": "bad", "path": "ping" });
        a.send(&TransportMessage::Text(serde_json::to_vec(&bad).unwrap())).await.unwrap();

        let reply = JsonCodec::new().decode(&a.receive().await.unwrap()).unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["id"], "bad");
    }

    #[tokio::test]
    async fn closing_releases_session_and_pending_calls() {
        let (caller, callee, server) = pair();

        let _greet = caller.client().path("greeter").function(()).await.unwrap();
        assert_eq!(server.continuation_count(), 1);

        caller.close().await.unwrap();
        callee.closed().await;
        assert!(callee.is_closed());
        assert_eq!(server.continuation_count(), 0);
    }

    #[tokio::test]
    async fn calls_after_close_fail_instead_of_hanging() {
        let (caller, callee, _) = pair();

        caller.close().await.unwrap();
        caller.closed().await;
        callee.closed().await;
        assert!(caller.is_closed());

        let err = caller.client().path("ping").value::<_, String>(()).await.unwrap_err();
        assert!(matches!(err, CallError::Closed), "{err:?}");
        assert_eq!(caller.client().pending_count(), 0);

        // The side whose peer went away refuses calls as well.
        let err = callee.client().path("ping").value::<_, String>(()).await.unwrap_err();
        assert!(matches!(err, CallError::Closed), "{err:?}");
    }

    #[tokio::test]
    async fn requests_in_flight_at_close_leave_no_continuations() {
        let mut methods = MethodRegistry::new();
        methods.register_reply("slow", |_: ()| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Reply::callback(|_: ()| async move { Ok("late") }))
        });
        let server = Arc::new(ResponseServer::new(methods));

        let codec = JsonCodec::new();
        let (a, b) = channel_transport_pair(16);
        let callee = BridgeEndpoint::open(b, codec.clone(), Some(server.clone()), EndpointConfig::default());

        let request = InitRequest::new(DEFAULT_CHANNEL, vec!["slow".into()], vec![]);
        a.send(&codec.encode(&Message::Request(Request::Init(request))).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        a.close().await.unwrap();
        callee.closed().await;
        assert_eq!(server.continuation_count(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.continuation_count(), 0);
    }
}
