use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// The settle half of a [`Deferred`] was dropped without settling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deferred value was dropped before it settled")]
pub struct Closed;

/// A future settled from the outside through its [`Settle`] half.
#[derive(Debug)]
pub struct Deferred<T> {
    rx: oneshot::Receiver<T>,
}

#[derive(Debug)]
pub struct Settle<T> {
    tx: oneshot::Sender<T>,
}

pub fn deferred<T>() -> (Deferred<T>, Settle<T>) {
    let (tx, rx) = oneshot::channel();
    (Deferred { rx }, Settle { tx })
}

impl<T> Settle<T> {
    /// Returns `false` when the waiting side is already gone.
    pub fn settle(self, value: T) -> bool {
        self.tx.send(value).is_ok()
    }

    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<V, E> Settle<Result<V, E>> {
    pub fn resolve(self, value: V) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(self, error: E) -> bool {
        self.settle(Err(error))
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, Closed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map_err(|_| Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_from_outside() {
        let (value, settle) = deferred::<Result<u32, String>>();
        tokio::spawn(async move {
            settle.resolve(7);
        });
        assert_eq!(value.await, Ok(Ok(7)));
    }

    #[tokio::test]
    async fn reject_carries_error() {
        let (value, settle) = deferred::<Result<u32, String>>();
        assert!(settle.reject("nope".to_string()));
        assert_eq!(value.await, Ok(Err("nope".to_string())));
    }

    #[tokio::test]
    async fn dropped_settle_closes() {
        let (value, settle) = deferred::<u32>();
        drop(settle);
        assert_eq!(value.await, Err(Closed));
    }

    #[test]
    fn settle_after_waiter_dropped() {
        let (value, settle) = deferred::<u32>();
        drop(value);
        assert!(settle.is_abandoned());
        assert!(!settle.settle(1));
    }
}
