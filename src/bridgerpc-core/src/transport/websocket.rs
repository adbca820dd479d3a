pub mod client {
    use crate::codec::Codec;
    use crate::endpoint::{BridgeEndpoint, EndpointConfig};
    use crate::server::ResponseServer;
    use crate::transport::{Transport, TransportMessage};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use ezsockets::{Bytes, Client, Error, Utf8Bytes};
    use std::sync::Arc;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
    use tokio::sync::{Mutex, oneshot};

    pub struct ClientHandler {
        tx: UnboundedSender<TransportMessage>,
        on_connected: Option<oneshot::Sender<()>>,
    }

    pub struct ClientTransport {
        rx: Mutex<UnboundedReceiver<TransportMessage>>,
        handle: Client<ClientHandler>,
    }

    #[async_trait]
    impl ezsockets::ClientExt for ClientHandler {
        type Call = ();

        async fn on_text(&mut self, text: Utf8Bytes) -> Result<(), Error> {
            self.tx.send(TransportMessage::Text(text.as_bytes().to_vec()))?;
            Ok(())
        }

        async fn on_binary(&mut self, bytes: Bytes) -> Result<(), Error> {
            self.tx.send(TransportMessage::Binary(bytes.to_vec()))?;
            Ok(())
        }

        async fn on_call(&mut self, _call: Self::Call) -> Result<(), Error> {
            Ok(())
        }

        async fn on_connect(&mut self) -> Result<(), ezsockets::Error> {
            if let Some(on_connected) = self.on_connected.take() {
                on_connected.send(()).ok();
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for ClientTransport {
        async fn send(&self, msg: &TransportMessage) -> anyhow::Result<()> {
            match msg {
                TransportMessage::Text(bytes) => {
                    let _ = self.handle.text(Utf8Bytes::try_from(bytes.clone())?)?;
                }
                TransportMessage::Binary(bytes) => {
                    let _ = self.handle.binary(Bytes::from(bytes.clone()))?;
                }
            }
            Ok(())
        }

        async fn receive(&self) -> anyhow::Result<TransportMessage> {
            let mut rx = self.rx.lock().await;
            rx.recv().await.ok_or(anyhow!("socket closed"))
        }

        async fn close(&self) -> anyhow::Result<()> {
            let _ = self
                .handle
                .close(None)
                .map_err(|_| anyhow!("socket already closed"))?;
            Ok(())
        }
    }

    pub async fn connect_transport(
        config: ezsockets::ClientConfig,
    ) -> anyhow::Result<ClientTransport> {
        let (tx_from_socket, rx_from_socket) = unbounded_channel();
        let (tx_connected, rx_connected) = oneshot::channel::<()>();

        let (handle, _) = ezsockets::connect(
            move |_handle| ClientHandler {
                tx: tx_from_socket.clone(),
                on_connected: Some(tx_connected),
            },
            config,
        )
        .await;

        // wait until connected
        rx_connected.await?;

        let transport = ClientTransport {
            handle,
            rx: Mutex::new(rx_from_socket),
        };

        Ok(transport)
    }

    /// Connects to a bridge over websocket.
    ///
    /// `server` answers calls the remote side makes back into this process.
    pub async fn connect<C>(
        config: ezsockets::ClientConfig,
        codec: C,
        server: Option<Arc<ResponseServer>>,
        endpoint: EndpointConfig,
    ) -> anyhow::Result<Arc<BridgeEndpoint<ClientTransport>>>
    where
        C: Codec,
    {
        let transport = connect_transport(config).await?;
        Ok(BridgeEndpoint::open(transport, codec, server, endpoint))
    }
}

pub mod server {
    use crate::codec::Codec;
    use crate::endpoint::{BridgeEndpoint, EndpointConfig};
    use crate::server::ResponseServer;
    use crate::transport::{Transport, TransportMessage};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use ezsockets::{
        Bytes, CloseFrame, Error, Request, Server, ServerExt, SessionExt, Socket, Utf8Bytes,
    };
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
    use tracing::{debug, error, warn};

    type SessionID = u16;
    type Session = ezsockets::Session<SessionID, ()>;

    struct ServerHandler {
        tx_accept: UnboundedSender<ServerSessionTransport>,
    }

    struct ServerSession {
        id: SessionID,
        tx: UnboundedSender<TransportMessage>,
        rx: Option<UnboundedReceiver<TransportMessage>>,
        tx_accept: UnboundedSender<ServerSessionTransport>,
        handle: Session,
    }

    #[async_trait]
    impl SessionExt for ServerSession {
        type ID = SessionID;
        type Call = ();

        fn id(&self) -> &Self::ID {
            &self.id
        }

        async fn on_text(&mut self, text: Utf8Bytes) -> Result<(), Error> {
            self.tx.send(TransportMessage::Text(text.as_bytes().to_vec()))?;
            Ok(())
        }

        async fn on_binary(&mut self, bytes: Bytes) -> Result<(), Error> {
            self.tx.send(TransportMessage::Binary(bytes.to_vec()))?;
            Ok(())
        }

        /// Hands the session's inbound queue to the accept loop, once.
        async fn on_call(&mut self, _call: Self::Call) -> Result<(), Error> {
            let Some(rx) = self.rx.take() else {
                return Ok(());
            };
            let t = ServerSessionTransport {
                rx: Mutex::new(rx),
                handle: self.handle.clone(),
            };

            if self.tx_accept.send(t).is_err() {
                warn!(session = self.id, "Bridge listener is gone, dropping connection");
            }

            Ok(())
        }
    }

    #[async_trait]
    impl ServerExt for ServerHandler {
        type Session = ServerSession;
        type Call = ();

        async fn on_connect(
            &mut self,
            socket: Socket,
            _request: Request,
            address: SocketAddr,
        ) -> Result<Session, Option<CloseFrame>> {
            let (tx, rx) = unbounded_channel();

            let id = address.port();
            let session = Session::create(
                |handle| ServerSession {
                    tx,
                    id,
                    rx: Some(rx),
                    tx_accept: self.tx_accept.clone(),
                    handle,
                },
                id,
                socket,
            );

            if let Err(err) = session.call(()) {
                error!(session = id, "Failed to attach bridge session: {err}");
                return Err(None);
            }

            Ok(session)
        }

        async fn on_disconnect(
            &mut self,
            id: SessionID,
            _reason: Result<Option<CloseFrame>, Error>,
        ) -> Result<(), Error> {
            debug!(session = id, "Bridge websocket disconnected");
            Ok(())
        }

        async fn on_call(&mut self, _call: Self::Call) -> Result<(), Error> {
            Ok(())
        }
    }

    pub struct ServerSessionTransport {
        handle: Session,
        rx: Mutex<UnboundedReceiver<TransportMessage>>,
    }

    #[async_trait]
    impl Transport for ServerSessionTransport {
        async fn send(&self, msg: &TransportMessage) -> anyhow::Result<()> {
            match msg {
                TransportMessage::Text(bytes) => {
                    let _ = self.handle.text(Utf8Bytes::try_from(bytes.clone())?)?;
                }
                TransportMessage::Binary(bytes) => {
                    let _ = self.handle.binary(Bytes::from(bytes.clone()))?;
                }
            }
            Ok(())
        }

        async fn receive(&self) -> anyhow::Result<TransportMessage> {
            let mut rx = self.rx.lock().await;
            rx.recv().await.ok_or(anyhow!("socket closed"))
        }
    }

    /// Serves `server` to every websocket client connecting on `addr`.
    ///
    /// Each connection gets its own [`BridgeEndpoint`], so continuations are
    /// bound to the connection that opened them. The returned receiver yields
    /// those endpoints for hosts that want to call back into their clients.
    pub async fn listen<C>(
        addr: SocketAddr,
        codec: C,
        server: Arc<ResponseServer>,
        endpoint: EndpointConfig,
    ) -> anyhow::Result<UnboundedReceiver<Arc<BridgeEndpoint<ServerSessionTransport>>>>
    where
        C: Codec,
    {
        let (tx_accept, mut rx_accept) = unbounded_channel();
        let (tx_endpoint, rx_endpoint) = unbounded_channel();

        tokio::spawn(async move {
            let (ws_server, _) = Server::create(|_server| ServerHandler { tx_accept });
            if let Err(err) = ezsockets::tungstenite::run(ws_server, addr).await {
                error!(%addr, "Bridge websocket server stopped: {err}");
            }
        });

        // one endpoint per accepted client
        tokio::spawn(async move {
            while let Some(transport) = rx_accept.recv().await {
                let opened = BridgeEndpoint::open(
                    transport,
                    codec.clone(),
                    Some(server.clone()),
                    endpoint.clone(),
                );
                let _ = tx_endpoint.send(opened);
            }
        });

        Ok(rx_endpoint)
    }
}
