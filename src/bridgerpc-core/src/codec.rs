use crate::message::Message;
use crate::transport::TransportMessage;
use serde_json::Value;

/// Turns bridge messages into transport frames and back.
///
/// Decoding stops at an opaque [`Value`]; classifying it is left to the
/// endpoint so foreign traffic on the same transport survives decoding.
pub trait Codec: Clone + Sync + Send + 'static {
    fn encode(&self, message: &Message) -> anyhow::Result<TransportMessage>;
    fn decode(&self, frame: &TransportMessage) -> anyhow::Result<Value>;
}

pub mod json {
    use crate::codec::Codec;
    use crate::message::Message;
    use crate::transport::TransportMessage;
    use serde_json::Value;

    /// JSON text frames.
    #[derive(Clone, Default)]
    pub struct JsonCodec;

    impl JsonCodec {
        pub fn new() -> Self {
            Self {}
        }
    }

    impl Codec for JsonCodec {
        fn encode(&self, message: &Message) -> anyhow::Result<TransportMessage> {
            let json = serde_json::to_vec(message)?;
            Ok(TransportMessage::Text(json))
        }

        fn decode(&self, frame: &TransportMessage) -> anyhow::Result<Value> {
            let val = serde_json::from_slice(frame.payload())?;
            Ok(val)
        }
    }

}
