use crate::deferred::{Closed, Settle, deferred};
use crate::error::{CallError, ProtocolViolation};
use crate::iter::{PullNext, Step, iterate};
use crate::message::{DEFAULT_CHANNEL, InitRequest, Message, Request, Response, ResponseBody, SubRequest};
use crate::serialized_error::SerializedError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time;
use tracing::{debug, trace, warn};

/// Outbound half of a transport.
///
/// `send` only hands the message over; it fails once nothing will ever
/// deliver it.
pub trait MessageSink: Send + Sync + 'static {
    fn send(&self, message: Message) -> Result<(), Closed>;
}

impl<F> MessageSink for F
where
    F: Fn(Message) -> Result<(), Closed> + Send + Sync + 'static,
{
    fn send(&self, message: Message) -> Result<(), Closed> {
        self(message)
    }
}

impl MessageSink for UnboundedSender<Message> {
    fn send(&self, message: Message) -> Result<(), Closed> {
        UnboundedSender::send(self, message).map_err(|_| Closed)
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub channel: String,
    /// Fails a call whose response has not arrived in time and forgets it.
    pub call_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            call_timeout: None,
        }
    }
}

/// Stream of items pulled from a remote stream.
pub type RemoteStream<T> = BoxStream<'static, Result<T, CallError>>;

/// What a settled call produced.
#[derive(Debug)]
pub enum Settled {
    Value(Value),
    Step(Step<Value>),
    Stream(RemoteIterator),
    Function(RemoteFunction),
}

impl Settled {
    fn shape_name(&self) -> &'static str {
        match self {
            Settled::Value(_) => "value",
            Settled::Step(_) => "stream step",
            Settled::Stream(_) => "stream",
            Settled::Function(_) => "function",
        }
    }
}

type Pending = Settle<Result<Settled, CallError>>;

struct Inner {
    channel: String,
    call_timeout: Option<Duration>,
    sink: Box<dyn MessageSink>,
    pending: DashMap<String, Pending>,
}

impl Inner {
    /// Registers a pending call under `id`, emits `request` and waits for the settlement.
    async fn exchange(&self, id: String, request: Request) -> Result<Settled, CallError> {
        let (settled, settle) = deferred();
        if self.pending.insert(id.clone(), settle).is_some() {
            warn!(%id, "Replaced a pending call that had not settled yet");
        }
        if self.sink.send(request.into()).is_err() {
            self.pending.remove(&id);
            debug!(%id, "Outbound bridge sink is closed, failing the call");
            return Err(CallError::Closed);
        }

        let outcome = match self.call_timeout {
            Some(limit) => match time::timeout(limit, settled).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.remove(&id);
                    return Err(CallError::Timeout(limit));
                }
            },
            None => settled.await,
        };
        outcome?
    }
}

/// Client role of the bridge.
///
/// Calls are emitted through the [`MessageSink`]; inbound responses must be
/// fed back through [`ClientProxy::handle_response`].
#[derive(Clone)]
pub struct ClientProxy {
    inner: Arc<Inner>,
}

impl ClientProxy {
    pub fn new(options: ClientOptions, sink: impl MessageSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel: options.channel,
                call_timeout: options.call_timeout,
                sink: Box::new(sink),
                pending: DashMap::new(),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Starts a call path, e.g. `proxy.path("math").path("add")`.
    pub fn path(&self, segment: &str) -> ProxyPath {
        ProxyPath {
            client: self.clone(),
            segments: vec![segment.to_string()],
        }
    }

    pub async fn call(&self, path: Vec<String>, args: Vec<Value>) -> Result<Settled, CallError> {
        let request = InitRequest::new(&self.inner.channel, path, args);
        debug!(id = %request.id, path = %request.dotted_path(), "Calling bridge method");
        let id = request.id.clone();
        self.inner.exchange(id, Request::Init(request)).await
    }

    pub async fn call_value<R: DeserializeOwned>(
        &self,
        path: Vec<String>,
        args: Vec<Value>,
    ) -> Result<R, CallError> {
        match self.call(path, args).await? {
            Settled::Value(value) => Ok(serde_json::from_value(value)?),
            other => Err(unexpected("value", &other)),
        }
    }

    pub async fn call_stream(
        &self,
        path: Vec<String>,
        args: Vec<Value>,
    ) -> Result<RemoteIterator, CallError> {
        match self.call(path, args).await? {
            Settled::Stream(iterator) => Ok(iterator),
            other => Err(unexpected("stream", &other)),
        }
    }

    pub async fn call_function(
        &self,
        path: Vec<String>,
        args: Vec<Value>,
    ) -> Result<RemoteFunction, CallError> {
        match self.call(path, args).await? {
            Settled::Function(function) => Ok(function),
            other => Err(unexpected("function", &other)),
        }
    }

    /// Settles the pending call `response` answers.
    pub fn handle_response(&self, response: Response) -> Result<(), ProtocolViolation> {
        let Some((_, pending)) = self.inner.pending.remove(&response.id) else {
            return Err(ProtocolViolation::UnknownResponse { id: response.id });
        };

        let Response { id, body, .. } = response;
        debug!(%id, %body, "Dispatching bridge response");

        let delivered = match body {
            ResponseBody::Response { result } | ResponseBody::ResponseFunctionReturn { result } => {
                pending.resolve(Settled::Value(result))
            }
            ResponseBody::ResponseIteratorNext { result } => pending.resolve(Settled::Step(result)),
            ResponseBody::Error { error } => match SerializedError::from_value(error) {
                Ok(remote) => pending.reject(CallError::Remote(remote)),
                Err(violation) => {
                    pending.reject(CallError::Protocol(violation.clone()));
                    return Err(violation);
                }
            },
            ResponseBody::ResponseIterator => pending.resolve(Settled::Stream(RemoteIterator {
                client: self.inner.clone(),
                id,
                finished: false,
            })),
            ResponseBody::ResponseFunction => pending.resolve(Settled::Function(RemoteFunction {
                client: self.inner.clone(),
                id,
            })),
        };

        if !delivered {
            trace!("Response arrived after its caller went away");
        }
        Ok(())
    }

    /// Fails every pending call with [`CallError::Closed`].
    pub fn close(&self) {
        let abandoned = self.inner.pending.len();
        self.inner.pending.clear();
        if abandoned > 0 {
            debug!("Closed bridge client with {abandoned} pending calls");
        }
    }
}

fn unexpected(expected: &'static str, got: &Settled) -> CallError {
    CallError::UnexpectedShape {
        expected,
        got: got.shape_name(),
    }
}

/// Splits a dotted method name into call path segments.
pub fn split_path(dotted: &str) -> Vec<String> {
    dotted.split('.').map(str::to_string).collect()
}

mod sealed {
    pub trait Sealed {}
}

/// Positional call arguments: `()` or a tuple of serializable values.
///
/// Each tuple element is one argument, whatever it serializes to, so
/// `(None::<i32>,)` is a single `null` and `(vec![1, 2],)` a single array.
pub trait CallArgs: sealed::Sealed {
    fn into_args(self) -> Result<Vec<Value>, CallError>;
}

impl sealed::Sealed for () {}

impl CallArgs for () {
    fn into_args(self) -> Result<Vec<Value>, CallError> {
        Ok(Vec::new())
    }
}

macro_rules! tuple_args {
    ($( $name:ident ),+) => {
        impl<$( $name: Serialize ),+> sealed::Sealed for ($( $name, )+) {}

        impl<$( $name: Serialize ),+> CallArgs for ($( $name, )+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Vec<Value>, CallError> {
                let ($( $name, )+) = self;
                Ok(vec![$( serde_json::to_value($name)? ),+])
            }
        }
    };
}

tuple_args!(A);
tuple_args!(A, B);
tuple_args!(A, B, C);
tuple_args!(A, B, C, D);
tuple_args!(A, B, C, D, E);
tuple_args!(A, B, C, D, E, F);
tuple_args!(A, B, C, D, E, F, G);
tuple_args!(A, B, C, D, E, F, G, H);

/// Encodes a tuple of arguments into positional call arguments.
pub fn encode_args<A: CallArgs>(args: A) -> Result<Vec<Value>, CallError> {
    args.into_args()
}

/// A call path built segment by segment.
#[derive(Clone)]
pub struct ProxyPath {
    client: ClientProxy,
    segments: Vec<String>,
}

impl ProxyPath {
    pub fn path(&self, segment: &str) -> ProxyPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        ProxyPath {
            client: self.client.clone(),
            segments,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub async fn invoke(&self, args: Vec<Value>) -> Result<Settled, CallError> {
        self.client.call(self.segments.clone(), args).await
    }

    pub async fn value<A: CallArgs, R: DeserializeOwned>(&self, args: A) -> Result<R, CallError> {
        self.client
            .call_value(self.segments.clone(), encode_args(args)?)
            .await
    }

    pub async fn stream<A: CallArgs>(&self, args: A) -> Result<RemoteIterator, CallError> {
        self.client
            .call_stream(self.segments.clone(), encode_args(args)?)
            .await
    }

    pub async fn function<A: CallArgs>(&self, args: A) -> Result<RemoteFunction, CallError> {
        self.client
            .call_function(self.segments.clone(), encode_args(args)?)
            .await
    }
}

/// Local stand-in for a stream living on the server.
///
/// Each pull is one `async-iterator-next` exchange under the id of the call
/// that opened the stream.
pub struct RemoteIterator {
    client: Arc<Inner>,
    id: String,
    finished: bool,
}

impl RemoteIterator {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_stream(self) -> RemoteStream<Value> {
        iterate(self)
    }

    pub fn into_typed<T>(self) -> RemoteStream<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.into_stream()
            .map(|item| item.and_then(|value| Ok(serde_json::from_value(value)?)))
            .boxed()
    }
}

impl fmt::Debug for RemoteIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteIterator")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

#[async_trait]
impl PullNext for RemoteIterator {
    type Item = Value;
    type Error = CallError;

    async fn pull_next(&mut self) -> Result<Option<Value>, CallError> {
        if self.finished {
            return Ok(None);
        }

        let request = SubRequest::iterator_next(&self.client.channel, &self.id);
        let settled = self
            .client
            .exchange(self.id.clone(), Request::SubRequest(request))
            .await;

        match settled {
            Ok(Settled::Step(step)) if step.done => {
                self.finished = true;
                Ok(None)
            }
            Ok(Settled::Step(step)) => Ok(Some(step.value.unwrap_or(Value::Null))),
            Ok(other) => {
                self.finished = true;
                Err(unexpected("stream step", &other))
            }
            Err(err) => {
                self.finished = true;
                Err(err)
            }
        }
    }
}

/// Local stand-in for a single-use callback living on the server.
///
/// Every invocation is sent, but the server honours only the first one.
#[derive(Clone)]
pub struct RemoteFunction {
    client: Arc<Inner>,
    id: String,
}

impl RemoteFunction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn call(&self, args: Vec<Value>) -> Result<Value, CallError> {
        let request = SubRequest::function_call(&self.client.channel, &self.id, args);
        match self
            .client
            .exchange(self.id.clone(), Request::SubRequest(request))
            .await?
        {
            Settled::Value(value) => Ok(value),
            other => Err(unexpected("value", &other)),
        }
    }

    pub async fn invoke<A: CallArgs, R: DeserializeOwned>(&self, args: A) -> Result<R, CallError> {
        let value = self.call(encode_args(args)?).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunction").field("id", &self.id).finish()
    }
}

/// Declares a typed client stub over a [`ClientProxy`].
///
/// ```ignore
/// bridge_client! {
///     pub struct MathClient {
///         value fn add(a: i64, b: i64) -> i64 = "math.add";
///         stream fn count(n: u32) -> u32 = "count";
///         function fn greeter(greeting: String) = "greeter";
///     }
/// }
/// ```
#[macro_export]
macro_rules! bridge_client {
    (@method value $method:ident ( $( $arg:ident : $arg_ty:ty ),* ) -> $ret:ty = $path:literal) => {
        pub async fn $method(&self, $( $arg : $arg_ty ),*) -> ::std::result::Result<$ret, $crate::CallError> {
            self.client
                .call_value($crate::split_path($path), $crate::encode_args(( $( $arg, )* ))?)
                .await
        }
    };

    (@method stream $method:ident ( $( $arg:ident : $arg_ty:ty ),* ) -> $ret:ty = $path:literal) => {
        pub async fn $method(
            &self,
            $( $arg : $arg_ty ),*
        ) -> ::std::result::Result<$crate::RemoteStream<$ret>, $crate::CallError> {
            let iterator = self
                .client
                .call_stream($crate::split_path($path), $crate::encode_args(( $( $arg, )* ))?)
                .await?;
            Ok(iterator.into_typed::<$ret>())
        }
    };

    (@method function $method:ident ( $( $arg:ident : $arg_ty:ty ),* ) = $path:literal) => {
        pub async fn $method(
            &self,
            $( $arg : $arg_ty ),*
        ) -> ::std::result::Result<$crate::RemoteFunction, $crate::CallError> {
            self.client
                .call_function($crate::split_path($path), $crate::encode_args(( $( $arg, )* ))?)
                .await
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $kind:ident fn $method:ident ( $( $arg:ident : $arg_ty:ty ),* $(,)? ) $( -> $ret:ty )? = $path:literal;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone)]
        $vis struct $name {
            client: $crate::ClientProxy,
        }

        impl $name {
            pub fn new(client: $crate::ClientProxy) -> Self {
                Self { client }
            }

            pub fn client(&self) -> &$crate::ClientProxy {
                &self.client
            }

            $(
                $crate::bridge_client!(@method $kind $method ( $( $arg : $arg_ty ),* ) $( -> $ret )? = $path);
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{MethodRegistry, Reply, ResponseOptions, ResponseServer};
    use crate::validation::request_from_value;
    use anyhow::anyhow;
    use futures::stream;
    use serde_json::json;
    use tokio::sync::{Mutex, mpsc};

    struct Harness {
        client: ClientProxy,
        server: Arc<ResponseServer>,
        wire: Arc<Mutex<Vec<Message>>>,
        violations: Arc<Mutex<Vec<ProtocolViolation>>>,
    }

    fn methods() -> MethodRegistry {
        let mut methods = MethodRegistry::new();
        methods
            .register_method("add", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .register_method("math.mul", |(a, b): (i64, i64)| async move { Ok(a * b) })
            .register_method("fail", |_: ()| async move { Err::<(), _>(anyhow!("boom")) })
            .register_stream("one", |_: ()| async move {
                Ok(stream::iter(vec![Ok::<_, anyhow::Error>(1)]))
            })
            .register_reply("greeter", |(greeting,): (String,)| async move {
                Ok(Reply::callback(move |(name,): (String,)| async move {
                    Ok(format!("{greeting}, {name}"))
                }))
            });
        methods
    }

    /// Wires a client to a server through an in-process queue, the way a host would.
    fn harness(options: ClientOptions) -> Harness {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let client = ClientProxy::new(options, tx);
        let server = Arc::new(ResponseServer::new(methods()));
        let wire = Arc::new(Mutex::new(Vec::new()));
        let violations = Arc::new(Mutex::new(Vec::new()));

        let (pump_client, pump_server) = (client.clone(), server.clone());
        let (pump_wire, pump_violations) = (wire.clone(), violations.clone());
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                pump_wire.lock().await.push(msg.clone());
                let raw = serde_json::to_value(&msg).unwrap();
                let Some(request) = request_from_value(raw, pump_client.channel()).unwrap() else {
                    continue;
                };

                let (client, server) = (pump_client.clone(), pump_server.clone());
                let (wire, violations) = (pump_wire.clone(), pump_violations.clone());
                tokio::spawn(async move {
                    match server.create_response(request, ResponseOptions::default()).await {
                        Ok(response) => {
                            wire.lock().await.push(response.clone().into());
                            client.handle_response(response).unwrap();
                        }
                        Err(violation) => violations.lock().await.push(violation),
                    }
                });
            }
        });

        Harness {
            client,
            server,
            wire,
            violations,
        }
    }

    #[tokio::test]
    async fn plain_value_round_trip() {
        let h = harness(ClientOptions::default());

        let sum: i64 = h.client.path("add").value((1, 4)).await.unwrap();
        assert_eq!(sum, 5);

        let wire = h.wire.lock().await;
        let Message::Request(Request::Init(req)) = &wire[0] else {
            panic!("expected an init request, got {:?}", wire[0]);
        };
        assert_eq!(req.path, vec!["add"]);
        assert_eq!(req.args, vec![json!(1), json!(4)]);
        let Message::Response(res) = &wire[1] else {
            panic!("expected a response, got {:?}", wire[1]);
        };
        assert_eq!(res.id, req.id);
        assert_eq!(h.client.pending_count(), 0);
    }

    #[tokio::test]
    async fn nested_paths_are_called() {
        let h = harness(ClientOptions::default());
        let product: i64 = h.client.path("math").path("mul").value((6, 7)).await.unwrap();
        assert_eq!(product, 42);
    }

    #[tokio::test]
    async fn stream_round_trip() {
        let h = harness(ClientOptions::default());

        let iterator = h.client.path("one").stream(()).await.unwrap();
        let id = iterator.id().to_string();
        assert!(h.server.has_continuation(&id));

        let items: Vec<Value> = iterator
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![json!(1)]);
        assert!(!h.server.has_continuation(&id));
    }

    #[tokio::test]
    async fn finished_iterator_stops_pulling() {
        let h = harness(ClientOptions::default());
        let mut iterator = h.client.path("one").stream(()).await.unwrap();

        assert_eq!(iterator.pull_next().await.unwrap(), Some(json!(1)));
        assert_eq!(iterator.pull_next().await.unwrap(), None);
        let sent = h.wire.lock().await.len();
        assert_eq!(iterator.pull_next().await.unwrap(), None);
        assert_eq!(h.wire.lock().await.len(), sent);
    }

    #[tokio::test]
    async fn callback_round_trip_is_single_shot() {
        let h = harness(ClientOptions {
            call_timeout: Some(Duration::from_millis(200)),
            ..ClientOptions::default()
        });

        let greet = h.client.path("greeter").function(("hello",)).await.unwrap();
        let first: String = greet.invoke(("ada",)).await.unwrap();
        assert_eq!(first, "hello, ada");

        let second = greet.invoke::<_, String>(("bob",)).await;
        assert!(matches!(second, Err(CallError::Timeout(_))), "{second:?}");
        assert_eq!(
            h.violations.lock().await.as_slice(),
            &[ProtocolViolation::ContinuationConsumed {
                id: greet.id().to_string()
            }]
        );
        assert_eq!(h.client.pending_count(), 0);
    }

    #[tokio::test]
    async fn remote_fault_rejects_the_call() {
        let h = harness(ClientOptions::default());
        let err = h.client.path("fail").value::<_, ()>(()).await.unwrap_err();
        let remote = err.remote().expect("a remote error");
        assert_eq!(remote.message, "boom");
        assert_eq!(remote.name.as_deref(), Some("Error"));
    }

    #[tokio::test]
    async fn wrong_shape_is_reported() {
        let h = harness(ClientOptions::default());
        let err = h.client.path("add").stream((1, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::UnexpectedShape {
                expected: "stream",
                got: "value"
            }
        ));
    }

    #[tokio::test]
    async fn unknown_response_is_a_violation() {
        let client = ClientProxy::new(ClientOptions::default(), |_: Message| Ok(()));
        let response = Response::new(DEFAULT_CHANNEL, "ghost", ResponseBody::Response { result: json!(1) });
        assert_eq!(
            client.handle_response(response),
            Err(ProtocolViolation::UnknownResponse { id: "ghost".into() })
        );
    }

    #[tokio::test]
    async fn malformed_error_rejects_and_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let client = ClientProxy::new(ClientOptions::default(), tx);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call(split_path("x"), vec![]).await });
        let id = rx.recv().await.unwrap().id().to_string();

        let response = Response::new(DEFAULT_CHANNEL, &id, ResponseBody::Error { error: json!("nope") });
        assert!(matches!(
            client.handle_response(response),
            Err(ProtocolViolation::MalformedFault { .. })
        ));
        assert!(matches!(
            call.await.unwrap(),
            Err(CallError::Protocol(ProtocolViolation::MalformedFault { .. }))
        ));
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let client = ClientProxy::new(ClientOptions::default(), tx);

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call(split_path("slow"), vec![]).await });
        rx.recv().await.unwrap();

        client.close();
        assert!(matches!(call.await.unwrap(), Err(CallError::Closed)));
    }

    #[tokio::test]
    async fn closed_sink_fails_the_call() {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        drop(rx);
        let client = ClientProxy::new(ClientOptions::default(), tx);

        let err = client.call(split_path("ping"), vec![]).await.unwrap_err();
        assert!(matches!(err, CallError::Closed), "{err:?}");
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn arguments_are_positional() {
        assert_eq!(encode_args(()).unwrap(), Vec::<Value>::new());
        assert_eq!(encode_args(("a",)).unwrap(), vec![json!("a")]);
        assert_eq!(encode_args((1, true)).unwrap(), vec![json!(1), json!(true)]);
        assert_eq!(encode_args((None::<i32>,)).unwrap(), vec![Value::Null]);
        assert_eq!(encode_args((vec![1, 2],)).unwrap(), vec![json!([1, 2])]);
        assert_eq!(encode_args(((),)).unwrap(), vec![Value::Null]);
        assert_eq!(split_path("math.add"), vec!["math", "add"]);
    }

    crate::bridge_client! {
        /// Typed view of the test bridge.
        struct TestBridge {
            value fn add(a: i64, b: i64) -> i64 = "add";
            value fn mul(a: i64, b: i64) -> i64 = "math.mul";
            stream fn one() -> u32 = "one";
            function fn greeter(greeting: String) = "greeter";
        }
    }

    #[tokio::test]
    async fn generated_stub_calls_through() {
        let h = harness(ClientOptions::default());
        let bridge = TestBridge::new(h.client.clone());

        assert_eq!(bridge.add(2, 3).await.unwrap(), 5);
        assert_eq!(bridge.mul(2, 3).await.unwrap(), 6);

        let items: Vec<u32> = bridge
            .one()
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![1]);

        let greet = bridge.greeter("hi".to_string()).await.unwrap();
        let reply: String = greet.invoke(("eve",)).await.unwrap();
        assert_eq!(reply, "hi, eve");
        assert_eq!(bridge.client().pending_count(), 0);
    }
}
