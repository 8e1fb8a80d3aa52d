// WebSocket gateway for presence and message delivery.
//
// Clients connect with their auth token in the query string
// (`ws://host:port/?token=...`). After a successful handshake the connection
// is registered in the presence roster, the full online-user list is
// broadcast, and the socket receives `GatewayEvent`s as JSON text frames.
// Inbound frames are drained and ignored; all writes go through the REST API.

use std::sync::Arc;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auth;
use crate::presence::GatewayEvent;
use crate::state::AppState;

/// Run the gateway on the given listener, accepting connections until the
/// task is cancelled or the process exits.
pub async fn run(state: Arc<AppState>, listener: TcpListener) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket gateway listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("accepted TCP connection from {addr}");
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, stream).await {
                warn!("connection from {addr} failed: {e}");
            }
        });
    }
}

/// Handshake one connection, authenticate it, and pump events until it
/// closes.
async fn handle_connection(state: Arc<AppState>, stream: TcpStream) -> anyhow::Result<()> {
    // Capture the request query during the handshake; tungstenite does not
    // expose the URI afterwards.
    let mut query: Option<String> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            query = request.uri().query().map(str::to_string);
            Ok(response)
        },
    )
    .await?;

    let secret = match state.jwt_secret() {
        Ok(secret) => secret,
        Err(_) => {
            warn!("rejecting gateway connection: no signing secret configured");
            return Ok(());
        }
    };
    let user_id = match token_from_query(query.as_deref())
        .and_then(|token| auth::verify_token(&token, secret).ok())
    {
        Some(id) => id,
        None => {
            // Unauthenticated sockets are closed right after the handshake.
            debug!("closing gateway connection without a valid token");
            let (mut write, _read) = ws_stream.split();
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }
    };

    let (mut write, read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let conn_id = state.presence.register(user_id, tx);
    info!(user_id, conn_id, "gateway client connected");
    state.presence.broadcast(&GatewayEvent::OnlineUsers {
        users: state.presence.online_users(),
    });

    // Writer: serialize queued events onto the socket. Ends when the
    // registry drops the sender or the socket write fails.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize gateway event: {e}");
                    continue;
                }
            };
            if write.send(Message::text(json)).await.is_err() {
                break;
            }
        }
    });

    drain_client_frames(read, user_id).await;

    let went_offline = state.presence.deregister(user_id, conn_id);
    info!(user_id, conn_id, went_offline, "gateway client disconnected");
    if went_offline {
        state.presence.broadcast(&GatewayEvent::OnlineUsers {
            users: state.presence.online_users(),
        });
    }
    writer.abort();
    Ok(())
}

/// Read frames from a client until it closes or errors. Text and binary
/// payloads are ignored; the gateway is push-only.
///
/// Generic over the stream type so it can be tested with in-memory streams
/// without opening TCP ports.
pub async fn drain_client_frames<St>(mut stream: St, user_id: i64)
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Close(_)) => {
                debug!(user_id, "client sent close frame");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(user_id, len = text.len(), "ignoring inbound text frame");
            }
            Err(e) => {
                warn!(user_id, "WebSocket error: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
}

/// Extract the `token` parameter from a request query string.
pub fn token_from_query(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == "token" && !v.is_empty()).then(|| v.to_string())
    })
}
