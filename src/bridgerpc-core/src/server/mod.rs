mod continuations;
mod methods;

pub use continuations::{ContinuationKind, SessionTag};
pub use methods::{BoxedSource, Callback, MethodRegistry, Reply, decode_args};

use crate::error::ProtocolViolation;
use crate::message::{InitRequest, Request, Response, ResponseBody, SubRequest, SubRequestKind};
use crate::schema::BridgeSchema;
use crate::serialized_error::SerializedError;
use continuations::ContinuationRegistry;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A fault raised by handler code while serving a request.
#[derive(Debug)]
pub enum HandlerFault {
    Error(anyhow::Error),
    Panic(String),
}

impl HandlerFault {
    pub fn serialize(&self) -> SerializedError {
        match self {
            HandlerFault::Error(err) => SerializedError::from_error(err),
            HandlerFault::Panic(message) => SerializedError::from_display(message),
        }
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerFault::Error(err) => write!(f, "{err:#}"),
            HandlerFault::Panic(message) => write!(f, "handler panicked: {message}"),
        }
    }
}

/// Observes handler faults without changing the reply.
pub type RejectHook = Arc<dyn Fn(&HandlerFault) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Used when a call to [`ResponseServer::create_response`] brings no hook.
    pub on_reject: Option<RejectHook>,
    /// Continuations older than this are dropped when the next call arrives.
    pub continuation_ttl: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct ResponseOptions {
    pub on_reject: Option<RejectHook>,
    /// Attributes new continuations to a connection; sub-requests must carry
    /// the same tag.
    pub session: Option<SessionTag>,
}

impl ResponseOptions {
    pub fn with_session(session: SessionTag) -> Self {
        Self {
            on_reject: None,
            session: Some(session),
        }
    }
}

/// Server role of the bridge: resolves calls and owns the continuations they open.
pub struct ResponseServer {
    methods: MethodRegistry,
    continuations: ContinuationRegistry,
    options: ServerOptions,
}

impl ResponseServer {
    pub fn new(methods: MethodRegistry) -> Self {
        Self::with_options(methods, ServerOptions::default())
    }

    pub fn with_options(methods: MethodRegistry, options: ServerOptions) -> Self {
        Self {
            methods,
            continuations: ContinuationRegistry::default(),
            options,
        }
    }

    /// A fresh tag for a new physical connection.
    pub fn session_tag(&self) -> SessionTag {
        SessionTag::generate()
    }

    pub fn schema(&self) -> BridgeSchema {
        self.methods.schema()
    }

    /// Whether an open (not yet completed or consumed) continuation exists for `id`.
    pub fn has_continuation(&self, id: &str) -> bool {
        self.continuations.is_live(id)
    }

    pub fn continuation_count(&self) -> usize {
        self.continuations.live_count()
    }

    pub fn evict_expired(&self, max_age: Duration) -> usize {
        self.continuations.evict_older_than(max_age)
    }

    /// Drops every continuation opened under `session`, e.g. when its connection closes.
    pub fn release_session(&self, session: &SessionTag) -> usize {
        self.continuations.release_session(session)
    }

    /// Produces the response to `request`.
    ///
    /// Handler faults become `error` responses; only protocol violations are
    /// returned as `Err`.
    pub async fn create_response(
        &self,
        request: Request,
        options: ResponseOptions,
    ) -> Result<Response, ProtocolViolation> {
        let ResponseOptions { on_reject, session } = options;
        let on_reject = on_reject.or_else(|| self.options.on_reject.clone());

        match request {
            Request::Init(req) => Ok(self.create_init_response(req, on_reject, session).await),
            Request::SubRequest(req) => {
                self.create_sub_response(req, on_reject, session.as_ref())
                    .await
            }
        }
    }

    async fn create_init_response(
        &self,
        req: InitRequest,
        on_reject: Option<RejectHook>,
        session: Option<SessionTag>,
    ) -> Response {
        if let Some(ttl) = self.options.continuation_ttl {
            let evicted = self.continuations.evict_older_than(ttl);
            if evicted > 0 {
                warn!("Evicted {evicted} expired continuations");
            }
        }

        let dotted = req.dotted_path();
        let InitRequest {
            channel,
            id,
            path,
            args,
        } = req;
        debug!(%id, path = %dotted, "Resolving bridge request");

        let reply = match self.methods.resolve(&path) {
            Ok(method) => guarded(method.call(args)).await,
            Err(err) => Err(HandlerFault::Error(err)),
        };

        match reply {
            Ok(Reply::Value(result)) => Response::new(&channel, &id, ResponseBody::Response { result }),
            Ok(Reply::Stream(source)) => {
                self.continuations.insert_iterator(&id, source, session);
                Response::new(&channel, &id, ResponseBody::ResponseIterator)
            }
            Ok(Reply::Function(callback)) => {
                self.continuations.insert_function(&id, callback, session);
                Response::new(&channel, &id, ResponseBody::ResponseFunction)
            }
            Err(fault) => reject(&channel, &id, fault, on_reject.as_ref()),
        }
    }

    async fn create_sub_response(
        &self,
        req: SubRequest,
        on_reject: Option<RejectHook>,
        session: Option<&SessionTag>,
    ) -> Result<Response, ProtocolViolation> {
        let SubRequest { channel, id, kind } = req;
        debug!(%id, %kind, "Continuing bridge request");

        match kind {
            SubRequestKind::AsyncIteratorNext => {
                let source = self.continuations.iterator(&id, session)?;
                let pulled = {
                    let mut source = source.lock().await;
                    guarded(source.pull_next()).await
                };

                match pulled {
                    Ok(next) => {
                        if next.is_none() {
                            self.continuations.remove(&id);
                        }
                        Ok(Response::new(
                            &channel,
                            &id,
                            ResponseBody::ResponseIteratorNext {
                                result: next.into(),
                            },
                        ))
                    }
                    Err(fault) => {
                        self.continuations.remove(&id);
                        Ok(reject(&channel, &id, fault, on_reject.as_ref()))
                    }
                }
            }
            SubRequestKind::FunctionCall { args } => {
                let callback = self.continuations.consume_function(&id, session)?;
                match guarded(callback(args)).await {
                    Ok(result) => Ok(Response::new(
                        &channel,
                        &id,
                        ResponseBody::ResponseFunctionReturn { result },
                    )),
                    Err(fault) => Ok(reject(&channel, &id, fault, on_reject.as_ref())),
                }
            }
        }
    }
}

fn reject(channel: &str, id: &str, fault: HandlerFault, on_reject: Option<&RejectHook>) -> Response {
    warn!(%id, "Bridge handler failed: {fault}");
    if let Some(hook) = on_reject {
        hook(&fault);
    }
    Response::error(channel, id, fault.serialize())
}

/// Runs handler code, turning both errors and panics into a [`HandlerFault`].
async fn guarded<T>(fut: impl Future<Output = anyhow::Result<T>>) -> Result<T, HandlerFault> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(HandlerFault::Error(err)),
        Err(payload) => Err(HandlerFault::Panic(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
