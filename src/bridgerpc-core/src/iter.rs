use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Wire shape of one stream element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    pub done: bool,
}

impl<T> Step<T> {
    pub fn item(value: T) -> Self {
        Self {
            value: Some(value),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            value: None,
            done: true,
        }
    }
}

impl<T> From<Option<T>> for Step<T> {
    fn from(next: Option<T>) -> Self {
        match next {
            Some(value) => Step::item(value),
            None => Step::done(),
        }
    }
}

/// A source with a single asynchronous "pull next" operation.
///
/// `Ok(None)` reports completion.
#[async_trait]
pub trait PullNext: Send {
    type Item: Send;
    type Error: Send;

    async fn pull_next(&mut self) -> Result<Option<Self::Item>, Self::Error>;
}

/// Turns a pull source into a stream.
///
/// The source is moved in, so it can be walked exactly once. The stream ends
/// after completion or after the first error.
pub fn iterate<P>(source: P) -> BoxStream<'static, Result<P::Item, P::Error>>
where
    P: PullNext + 'static,
    P::Item: 'static,
    P::Error: 'static,
{
    stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        match source.pull_next().await {
            Ok(Some(item)) => Some((Ok(item), Some(source))),
            Ok(None) => None,
            Err(err) => Some((Err(err), None)),
        }
    })
    .boxed()
}

/// Pull source backed by a fallible stream.
pub struct StreamSource<T, E> {
    inner: BoxStream<'static, Result<T, E>>,
}

impl<T, E> StreamSource<T, E> {
    pub fn new<S>(inner: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self {
            inner: inner.boxed(),
        }
    }
}

#[async_trait]
impl<T, E> PullNext for StreamSource<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Item = T;
    type Error = E;

    async fn pull_next(&mut self) -> Result<Option<T>, E> {
        self.inner.next().await.transpose()
    }
}
