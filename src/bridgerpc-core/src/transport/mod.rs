use async_trait::async_trait;
use std::fmt::Debug;

pub mod channel;
pub mod websocket;

#[derive(Clone, Eq, PartialEq)]
pub enum TransportMessage {
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

impl TransportMessage {
    pub fn payload(&self) -> &[u8] {
        match self {
            TransportMessage::Text(bytes) | TransportMessage::Binary(bytes) => bytes,
        }
    }
}

impl Debug for TransportMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportMessage::Text(bytes) => write!(
                f,
                "TransportMessage::Text({:?})",
                String::from_utf8_lossy(bytes)
            ),
            TransportMessage::Binary(bytes) => {
                write!(f, "TransportMessage::Binary(len={:?})", bytes.len())
            }
        }
    }
}

/// A bidirectional frame pipe a [`crate::BridgeEndpoint`] runs over.
///
/// `receive` failing ends the endpoint; it is how a transport reports that
/// the connection is gone.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, msg: &TransportMessage) -> anyhow::Result<()>;
    async fn receive(&self) -> anyhow::Result<TransportMessage>;
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
