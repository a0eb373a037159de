// WebSocket server: accepts clients and feeds their messages to sessions.

use anyhow::Context;
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::engine::DraftEngine;
use crate::protocol::ServerMessage;
use crate::session::Session;

/// Messages queued per connection before its event forwarders block.
const OUTBOX_CAPACITY: usize = 256;

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Accept connections forever, serving each on its own task.
pub async fn run(listener: TcpListener, engine: DraftEngine) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr = addr.to_string();
        info!("Accepted TCP connection from {addr}");
        let engine = engine.clone();
        tokio::spawn(async move {
            handle_connection(stream, &addr, engine).await;
        });
    }
}

/// Perform the handshake, then run a session until the client goes away.
pub async fn handle_connection<S>(stream: S, addr: &str, engine: DraftEngine)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    info!("Client {addr} connected");

    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOX_CAPACITY);

    let peer = addr.to_string();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {} for {peer}: {e}", msg.event.name());
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                warn!("WebSocket write to {peer} failed: {e}");
                break;
            }
        }
        let _ = write.close().await;
    });

    let mut session = Session::new(engine, addr, out_tx);
    let _ = process_message_stream(read, &mut session, addr).await;
    drop(session);

    if let Err(e) = writer.await {
        warn!("Writer task for {addr} failed: {e}");
    }
    info!("Client {addr} disconnected");
}

/// Feed text frames from any [`Stream`] of WebSocket messages to `session`
/// until the client closes, errors, or the outgoing queue is gone
/// (`Err(())`). Generic so it can be tested with in-memory streams.
pub async fn process_message_stream<St>(
    mut stream: St,
    session: &mut Session,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                session.handle_text(text.as_str()).await?;
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}
