//! End-to-end tests: a real supervisor driven by a tokio-tungstenite client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing_subscriber::EnvFilter;

use wsrelay::{
    Echo, Error, FrameKind, ListenerRegistry, RelayOptions, Session, Supervisor, handler_fn,
};

// ============================================================================
// Helpers
// ============================================================================

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("wsrelay=debug"))
        .with_target(false)
        .with_test_writer()
        .try_init();
}

async fn connect(supervisor: &Supervisor) -> Result<Client> {
    let (client, _response) = timeout(WAIT, connect_async(supervisor.ws_url()))
        .await
        .context("connect timed out")??;
    Ok(client)
}

/// Next message that is not a ping or pong, or `None` at end of stream.
async fn next_message(client: &mut Client) -> Result<Option<Message>> {
    loop {
        let next = timeout(WAIT, client.next()).await.context("read timed out")?;
        match next {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(message)) => return Ok(Some(message)),
            // the server may drop the socket right after its close frame
            Some(Err(_)) | None => return Ok(None),
        }
    }
}

async fn wait_for_connections(supervisor: &Supervisor, expected: usize) -> Result<()> {
    timeout(WAIT, async {
        while supervisor.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("connection count never reached {expected}"))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_ping_pong() -> Result<()> {
    init_tracing();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::builder()
        .address("127.0.0.1:0")
        .handler(handler_fn(move |mut session: Session| {
            let seen_tx = seen_tx.clone();
            async move {
                if let Some(chunk) = session.recv().await {
                    let _ = seen_tx.send(chunk.to_vec());
                    session.send(b"pong").await?;
                }
                Ok::<_, Error>(())
            }
        }))
        .start()
        .await?;

    let mut client = connect(&supervisor).await?;
    client.send(Message::Text("ping".into())).await?;

    let seen = timeout(WAIT, seen_rx.recv()).await?.context("handler saw nothing")?;
    assert_eq!(seen, b"ping");

    match next_message(&mut client).await? {
        Some(Message::Text(text)) => assert_eq!(text.as_str(), "pong"),
        other => bail!("expected text pong, got {other:?}"),
    }

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_oversize_frame_closes_connection() -> Result<()> {
    init_tracing();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let supervisor = Supervisor::builder()
        .address("127.0.0.1:0")
        .options(
            RelayOptions::new()
                .with_max_payload_size(64)
                .with_outbound_kind(FrameKind::Binary),
        )
        .handler(handler_fn(move |mut session: Session| {
            let seen_tx = seen_tx.clone();
            async move {
                while let Some(chunk) = session.recv().await {
                    let _ = seen_tx.send(chunk.to_vec());
                }
                Ok::<_, Error>(())
            }
        }))
        .start()
        .await?;

    let mut client = connect(&supervisor).await?;
    wait_for_connections(&supervisor, 1).await?;

    client.send(Message::Binary(vec![0x42; 65].into())).await?;

    // nothing but a close (or the end of the stream) comes back
    match next_message(&mut client).await? {
        None | Some(Message::Close(_)) => {}
        Some(other) => bail!("unexpected message {other:?}"),
    }

    wait_for_connections(&supervisor, 0).await?;
    assert!(seen_rx.try_recv().is_err(), "oversize payload was forwarded");

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_peer_close_tears_down() -> Result<()> {
    init_tracing();

    let supervisor = Supervisor::listen("127.0.0.1:0").await?;
    let mut client = connect(&supervisor).await?;
    wait_for_connections(&supervisor, 1).await?;

    client.close(None).await?;

    // drain until the server's close reply and end of stream
    while let Some(message) = next_message(&mut client).await? {
        assert!(matches!(message, Message::Close(_)), "unexpected {message:?}");
    }

    wait_for_connections(&supervisor, 0).await?;
    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_client_ping_ends_connection() -> Result<()> {
    init_tracing();

    let supervisor = Supervisor::listen("127.0.0.1:0").await?;
    let mut client = connect(&supervisor).await?;
    wait_for_connections(&supervisor, 1).await?;

    client.send(Message::Ping(vec![1, 2, 3].into())).await?;

    match next_message(&mut client).await? {
        None | Some(Message::Close(_)) => {}
        Some(other) => bail!("unexpected message {other:?}"),
    }

    wait_for_connections(&supervisor, 0).await?;
    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_echo_preserves_order() -> Result<()> {
    init_tracing();

    let supervisor = Supervisor::builder()
        .address("127.0.0.1:0")
        .handler(Echo)
        .start()
        .await?;
    let mut client = connect(&supervisor).await?;

    for i in 0..50 {
        client.send(Message::Text(format!("message {i}").into())).await?;
    }

    for i in 0..50 {
        match next_message(&mut client).await? {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), format!("message {i}")),
            other => bail!("expected echo {i}, got {other:?}"),
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_handshake_does_not_affect_others() -> Result<()> {
    init_tracing();

    let supervisor = Supervisor::listen("127.0.0.1:0").await?;

    let mut raw = TcpStream::connect(supervisor.local_addr()).await?;
    raw.write_all(b"GET / HTTP/1.1\r\nHost: nowhere\r\n\r\n").await?;
    let mut discard = Vec::new();
    let _ = timeout(WAIT, raw.read_to_end(&mut discard)).await;
    assert_eq!(supervisor.connection_count(), 0);

    let mut client = connect(&supervisor).await?;
    client.send(Message::Text("still alive".into())).await?;
    match next_message(&mut client).await? {
        Some(Message::Text(text)) => assert_eq!(text.as_str(), "still alive"),
        other => bail!("expected echo, got {other:?}"),
    }

    supervisor.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_duplicate_listener_rejected() -> Result<()> {
    init_tracing();

    let registry = Arc::new(ListenerRegistry::new());
    let first = Supervisor::builder()
        .address("127.0.0.1:0")
        .registry(Arc::clone(&registry))
        .start()
        .await?;

    let second = Supervisor::builder()
        .address(first.local_addr().to_string())
        .registry(Arc::clone(&registry))
        .start()
        .await;

    match second {
        Err(Error::ListenerExists { addr }) => assert_eq!(addr, first.local_addr()),
        Err(e) => bail!("unexpected error {e}"),
        Ok(_) => bail!("duplicate listener started"),
    }

    first.shutdown().await;
    assert!(registry.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_shutdown_sends_close_frame() -> Result<()> {
    init_tracing();

    let supervisor = Supervisor::listen("127.0.0.1:0").await?;
    let mut client = connect(&supervisor).await?;
    wait_for_connections(&supervisor, 1).await?;

    supervisor.shutdown().await;

    match next_message(&mut client).await? {
        Some(Message::Close(Some(frame))) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason.as_str(), "connection closing");
        }
        other => bail!("expected close frame, got {other:?}"),
    }

    wait_for_connections(&supervisor, 0).await?;
    Ok(())
}

#[tokio::test]
async fn test_pool_reuses_buffers_across_messages() -> Result<()> {
    init_tracing();

    let supervisor = Supervisor::listen("127.0.0.1:0").await?;
    let mut client = connect(&supervisor).await?;

    for _ in 0..20 {
        client.send(Message::Text("reuse".into())).await?;
        next_message(&mut client).await?.context("echo missing")?;
    }

    let stats = supervisor.pool_stats();
    assert!(stats.reused > 0, "no buffer was reused: {stats:?}");

    supervisor.shutdown().await;
    Ok(())
}
