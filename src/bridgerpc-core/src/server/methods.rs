use crate::iter::{PullNext, StreamSource};
use crate::schema::{BridgeSchema, MethodSchema, ReplyShape};
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use schemars::{JsonSchema, schema_for};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

/// Server-side handle of a remote stream.
pub type BoxedSource = Box<dyn PullNext<Item = Value, Error = anyhow::Error>>;

/// Server-side handle of a remote single-use callback.
pub type Callback =
    Box<dyn FnOnce(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// What a bridge method hands back.
pub enum Reply {
    Value(Value),
    Stream(BoxedSource),
    Function(Callback),
}

impl Reply {
    pub fn value<T: Serialize>(value: T) -> anyhow::Result<Self> {
        Ok(Reply::Value(serde_json::to_value(value)?))
    }

    /// Replies with a remote stream of serialized items.
    pub fn stream<S, T>(items: S) -> Self
    where
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
        T: Serialize + 'static,
    {
        let items = items.map(|item| item.and_then(|v| Ok(serde_json::to_value(v)?)));
        Reply::Stream(Box::new(StreamSource::new(items)))
    }

    pub fn source<P>(source: P) -> Self
    where
        P: PullNext<Item = Value, Error = anyhow::Error> + 'static,
    {
        Reply::Stream(Box::new(source))
    }

    /// Replies with a callback the caller may invoke once.
    pub fn callback<A, R, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: FnOnce(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Reply::Function(Box::new(move |args| {
            async move {
                let input: A = decode_args(args)?;
                let output = f(input).await?;
                Ok(serde_json::to_value(output)?)
            }
            .boxed()
        }))
    }

    pub(crate) fn shape_name(&self) -> &'static str {
        match self {
            Reply::Value(_) => "value",
            Reply::Stream(_) => "stream",
            Reply::Function(_) => "function",
        }
    }
}

/// Decodes positional arguments into a tuple (or any sequence type).
///
/// An empty argument list also decodes into `()`.
pub fn decode_args<A: DeserializeOwned>(args: Vec<Value>) -> anyhow::Result<A> {
    let empty = args.is_empty();
    match serde_json::from_value(Value::Array(args)) {
        Ok(input) => Ok(input),
        Err(_) if empty => serde_json::from_value(Value::Null).context("Invalid arguments"),
        Err(e) => Err(anyhow::Error::new(e).context("Invalid arguments")),
    }
}

#[async_trait]
pub(crate) trait BridgeMethod: Send + Sync {
    fn schema(&self) -> MethodSchema;
    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Reply>;
}

/// Declared method table a [`crate::ResponseServer`] resolves paths against.
///
/// Methods are registered under dotted names; every prefix of a name becomes a
/// namespace, so `math.add` makes `["math", "add"]` callable.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn BridgeMethod>>,
    namespaces: HashSet<String>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, method: Arc<dyn BridgeMethod>) {
        let segments: Vec<&str> = name.split('.').collect();
        for end in 1..segments.len() {
            self.namespaces.insert(segments[..end].join("."));
        }
        self.methods.insert(name.to_string(), method);
    }

    /// Registers a method returning a plain value.
    pub fn register_method<Args, Res, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        Args: DeserializeOwned + JsonSchema + Send + 'static,
        Res: Serialize + JsonSchema + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        self.insert(
            name,
            Arc::new(ValueMethod {
                f,
                _phantom: PhantomData,
            }),
        );
        self
    }

    /// Registers a method returning a stream the caller pulls remotely.
    pub fn register_stream<Args, Item, S, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        Args: DeserializeOwned + JsonSchema + Send + 'static,
        Item: Serialize + JsonSchema + Send + 'static,
        S: Stream<Item = anyhow::Result<Item>> + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
    {
        self.insert(
            name,
            Arc::new(StreamMethod {
                f,
                _phantom: PhantomData,
            }),
        );
        self
    }

    /// Registers a method that builds its [`Reply`] itself, e.g. a callback.
    pub fn register_reply<Args, F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        Args: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.insert(
            name,
            Arc::new(ReplyMethod {
                f,
                _phantom: PhantomData,
            }),
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub(crate) fn resolve(&self, path: &[String]) -> anyhow::Result<Arc<dyn BridgeMethod>> {
        if path.is_empty() {
            bail!("Invalid bridge request with an empty path");
        }

        let dotted = path.join(".");
        for end in 1..path.len() {
            let prefix = path[..end].join(".");
            if !self.namespaces.contains(&prefix) && !self.methods.contains_key(&prefix) {
                bail!("Invalid bridge request with path: {dotted}");
            }
        }

        self.methods
            .get(&dotted)
            .cloned()
            .ok_or_else(|| anyhow!("Path {dotted} is not a function"))
    }

    pub(crate) fn schema(&self) -> BridgeSchema {
        let methods: BTreeMap<_, _> = self
            .methods
            .iter()
            .map(|(name, method)| (name.clone(), method.schema()))
            .collect();
        BridgeSchema { methods }
    }
}

struct ValueMethod<Args, Res, F> {
    f: F,
    _phantom: PhantomData<fn(Args) -> Res>,
}

struct StreamMethod<Args, Item, S, F> {
    f: F,
    _phantom: PhantomData<fn(Args) -> (Item, S)>,
}

struct ReplyMethod<Args, F> {
    f: F,
    _phantom: PhantomData<fn(Args)>,
}

#[async_trait]
impl<Args, Res, F, Fut> BridgeMethod for ValueMethod<Args, Res, F>
where
    Args: DeserializeOwned + JsonSchema + Send + 'static,
    Res: Serialize + JsonSchema + Send + 'static,
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
{
    fn schema(&self) -> MethodSchema {
        MethodSchema {
            shape: ReplyShape::Value,
            params: schema_for!(Args),
            result: Some(schema_for!(Res)),
        }
    }

    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Reply> {
        let input: Args = decode_args(args)?;
        let output = (self.f)(input).await?;
        Reply::value(output)
    }
}

#[async_trait]
impl<Args, Item, S, F, Fut> BridgeMethod for StreamMethod<Args, Item, S, F>
where
    Args: DeserializeOwned + JsonSchema + Send + 'static,
    Item: Serialize + JsonSchema + Send + 'static,
    S: Stream<Item = anyhow::Result<Item>> + Send + 'static,
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<S>> + Send + 'static,
{
    fn schema(&self) -> MethodSchema {
        MethodSchema {
            shape: ReplyShape::Stream,
            params: schema_for!(Args),
            result: Some(schema_for!(Item)),
        }
    }

    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Reply> {
        let input: Args = decode_args(args)?;
        let items = (self.f)(input).await?;
        Ok(Reply::stream(items))
    }
}

#[async_trait]
impl<Args, F, Fut> BridgeMethod for ReplyMethod<Args, F>
where
    Args: DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
{
    fn schema(&self) -> MethodSchema {
        MethodSchema {
            shape: ReplyShape::Dynamic,
            params: schema_for!(Args),
            result: None,
        }
    }

    async fn call(&self, args: Vec<Value>) -> anyhow::Result<Reply> {
        let input: Args = decode_args(args)?;
        (self.f)(input).await
    }
}
