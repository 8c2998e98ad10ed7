//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::SessionInput;
use crate::http::middleware::verify_jwt;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler. The auth layer's token must verify before
/// any session event is processed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match verify_jwt(&query.token, &state.config.auth_jwt_secret) {
        Ok(claims) => {
            info!(player_id = %claims.sub, "WebSocket upgrade for authenticated pilot");
            ws.on_upgrade(move |socket| handle_socket(socket, claims.sub, state))
        }
        Err(e) => {
            error!(error = %e, "WebSocket auth failed");
            Response::builder()
                .status(401)
                .body("Unauthorized".into())
                .unwrap()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, state: AppState) {
    info!(player_id = %player_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    // Resolve the pilot's callsign from the persistence service
    let callsign = match state.profiles.ensure_profile(
        player_id,
        &format!("Pilot_{}", &player_id.to_string()[..8]),
    )
    .await
    {
        Ok(profile) => profile
            .callsign
            .unwrap_or_else(|| format!("Pilot_{}", &player_id.to_string()[..8])),
        Err(e) => {
            error!(player_id = %player_id, error = %e, "Failed to fetch profile");
            format!("Pilot_{}", &player_id.to_string()[..8])
        }
    };

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        return;
    }

    // Register with the director to get routing channels
    let (input_tx, events_rx) = state
        .director
        .register_player(player_id, callsign.clone());

    run_connection(player_id, callsign, ws_sink, ws_stream, input_tx, events_rx).await;

    // Cleanup on disconnect: timers cancelled, session notified
    state.director.unregister_player(player_id).await;

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Run the connection with split read/write halves
async fn run_connection(
    player_id: Uuid,
    callsign: String,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    input_tx: mpsc::Sender<SessionInput>,
    mut events_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: session events -> WebSocket, dropping messages
    // addressed to other recipients
    let writer_id = player_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(msg) => {
                    if let Some(recipient) = msg.recipient() {
                        if recipient != writer_id {
                            continue;
                        }
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(player_id = %writer_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        player_id = %writer_id,
                        lagged_count = n,
                        "Client lagged, skipping {} messages", n
                    );
                    // Deltas are redundant under a later full snapshot;
                    // don't disconnect for lag
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(player_id = %writer_id, "Event channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> director/session
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        let input = SessionInput {
                            player_id,
                            callsign: callsign.clone(),
                            msg: client_msg,
                            received_at: unix_millis(),
                        };

                        if input_tx.send(input).await.is_err() {
                            debug!(player_id = %player_id, "Input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task; unregister handles the session-side leave
    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
