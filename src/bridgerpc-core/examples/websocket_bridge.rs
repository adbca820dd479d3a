use bridgerpc_core::codec::json::JsonCodec;
use bridgerpc_core::{
    EndpointConfig, HandlerFault, MethodRegistry, Reply, ResponseServer, ServerOptions, bridge_client,
    websocket_connect, websocket_listen,
};
use ezsockets::ClientConfig;
use futures::{StreamExt, stream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

bridge_client! {
    /// What the demo server exposes.
    pub struct DemoBridge {
        value fn ping() -> String = "ping";
        value fn add(a: i64, b: i64) -> i64 = "math.add";
        stream fn countdown(from: u32) -> u32 = "countdown";
        function fn greeter(greeting: String) = "greeter";
    }
}

fn methods() -> MethodRegistry {
    let mut methods = MethodRegistry::new();
    methods
        .register_method("ping", |_: ()| async move { Ok("pong".to_string()) })
        .register_method("math.add", |(a, b): (i64, i64)| async move { Ok(a + b) })
        .register_stream("countdown", |(from,): (u32,)| async move {
            Ok(stream::iter((0..=from).rev().map(Ok::<_, anyhow::Error>)))
        })
        .register_reply("greeter", |(greeting,): (String,)| async move {
            Ok(Reply::callback(move |(name,): (String,)| async move {
                Ok(format!("{greeting}, {name}!"))
            }))
        });
    methods
}

async fn start_server(addr: SocketAddr) -> anyhow::Result<()> {
    let server = ResponseServer::with_options(
        methods(),
        ServerOptions {
            on_reject: Some(Arc::new(|fault: &HandlerFault| tracing::warn!("handler fault: {fault}"))),
            continuation_ttl: Some(Duration::from_secs(60)),
        },
    );
    info!(
        "serving schema: {}",
        serde_json::to_string(&server.schema())?
    );

    let mut accepted =
        websocket_listen(addr, JsonCodec::new(), Arc::new(server), EndpointConfig::default()).await?;
    tokio::spawn(async move {
        while let Some(endpoint) = accepted.recv().await {
            info!(session = %endpoint.session_tag().id, "client connected");
        }
    });
    Ok(())
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let addr: SocketAddr = "127.0.0.1:8080".parse()?;

    // 1. start server
    start_server(addr).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 2. start client
    let client_url = Url::parse(format!("ws://{}", addr).as_str())?;
    let endpoint = websocket_connect(
        ClientConfig::new(client_url),
        JsonCodec::new(),
        None,
        EndpointConfig {
            call_timeout: Some(Duration::from_secs(5)),
            ..EndpointConfig::default()
        },
    )
    .await?;
    let bridge = DemoBridge::new(endpoint.client().clone());

    info!("ping -> {}", bridge.ping().await?);
    info!("1 + 4 = {}", bridge.add(1, 4).await?);

    let mut countdown = bridge.countdown(3).await?;
    while let Some(n) = countdown.next().await {
        info!("countdown: {}", n?);
    }

    let greet = bridge.greeter("Hello".to_string()).await?;
    let greeting: String = greet.invoke(("bridge",)).await?;
    info!("{greeting}");
    if let Err(err) = greet.invoke::<_, String>(("again",)).await {
        info!("second greeting refused: {err}");
    }

    Ok(())
}
