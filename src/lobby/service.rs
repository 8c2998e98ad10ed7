//! Session director: routes connections to sessions, manages lobbies,
//! and spawns session tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::lobby::{Lobby, LobbyMember};
use crate::game::{GameSession, SessionInput, SessionRegistry, SessionServices};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg, SessionSettings};

/// Player connection handle for routing messages
#[derive(Clone)]
pub struct PlayerConnection {
    pub player_id: Uuid,
    pub callsign: String,
    /// Personal channel carrying messages back to this connection
    pub events_tx: broadcast::Sender<ServerMsg>,
}

/// Routes player connections to lobbies and running sessions
pub struct SessionDirector {
    registry: Arc<SessionRegistry>,
    services: SessionServices,
    /// Connected players
    connections: Arc<DashMap<Uuid, PlayerConnection>>,
    /// Player -> current session
    player_sessions: Arc<DashMap<Uuid, Uuid>>,
    /// Player -> current lobby
    player_lobbies: DashMap<Uuid, Uuid>,
    lobbies: Mutex<HashMap<Uuid, Lobby>>,
}

impl SessionDirector {
    pub fn new(registry: Arc<SessionRegistry>, services: SessionServices) -> Self {
        Self {
            registry,
            services,
            connections: Arc::new(DashMap::new()),
            player_sessions: Arc::new(DashMap::new()),
            player_lobbies: DashMap::new(),
            lobbies: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection. Returns the input sender the socket feeds
    /// and the personal event stream the socket writes out.
    pub fn register_player(
        self: &Arc<Self>,
        player_id: Uuid,
        callsign: String,
    ) -> (mpsc::Sender<SessionInput>, broadcast::Receiver<ServerMsg>) {
        let (input_tx, mut input_rx) = mpsc::channel::<SessionInput>(64);
        let (events_tx, events_rx) = broadcast::channel::<ServerMsg>(128);

        self.connections.insert(
            player_id,
            PlayerConnection {
                player_id,
                callsign,
                events_tx: events_tx.clone(),
            },
        );

        // Input router: director-level messages are handled here, the
        // rest forwards to the player's current session
        let director = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                director.route_input(input).await;
            }
            director.connections.remove(&player_id);
        });

        // Session event forwarder: follows the player across sessions
        let director = Arc::clone(self);
        let forward_tx = events_tx;
        tokio::spawn(async move {
            let mut current_id: Option<Uuid> = None;
            let mut current_rx: Option<broadcast::Receiver<ServerMsg>> = None;

            loop {
                if !director.connections.contains_key(&player_id) {
                    break;
                }

                let mapped = director.player_sessions.get(&player_id).map(|r| *r);
                if mapped != current_id {
                    current_id = mapped;
                    current_rx = mapped
                        .and_then(|sid| director.registry.get(&sid))
                        .map(|h| h.events_tx.subscribe());
                }

                if let Some(rx) = &mut current_rx {
                    match rx.recv().await {
                        Ok(msg) => {
                            let _ = forward_tx.send(msg);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(player_id = %player_id, lagged = n, "Event receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            director.player_sessions.remove(&player_id);
                            current_id = None;
                            current_rx = None;
                        }
                    }
                } else {
                    // Not in a session yet
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        });

        (input_tx, events_rx)
    }

    /// Unregister on disconnect: detach from lobby, signal the session,
    /// clear routing state.
    pub async fn unregister_player(&self, player_id: Uuid) {
        self.leave_lobby(player_id).await;

        if let Some((_, session_id)) = self.player_sessions.remove(&player_id) {
            if let Some(handle) = self.registry.get(&session_id) {
                let _ = handle
                    .input_tx
                    .send(SessionInput {
                        player_id,
                        callsign: String::new(),
                        msg: ClientMsg::Leave,
                        received_at: unix_millis(),
                    })
                    .await;
            }
        }

        self.connections.remove(&player_id);
        info!(player_id = %player_id, "Player unregistered");
    }

    async fn route_input(&self, input: SessionInput) {
        match &input.msg {
            ClientMsg::LobbyJoin {
                lobby_id,
                aircraft,
                loadout,
            } => {
                let member = LobbyMember::new(
                    input.player_id,
                    input.callsign.clone(),
                    *aircraft,
                    loadout.clone(),
                );
                self.join_lobby(member, *lobby_id, None).await;
            }
            ClientMsg::LobbyStart => self.start_lobby(input.player_id).await,
            ClientMsg::JoinSession {
                session_id,
                settings,
                ..
            } => {
                let target = self
                    .resolve_session(input.player_id, *session_id, settings.clone())
                    .await;
                match target {
                    Some(handle) => {
                        self.player_sessions.insert(input.player_id, handle.id);
                        if handle.input_tx.send(input).await.is_err() {
                            warn!("Join input dropped, session gone");
                        }
                    }
                    None => self.send_to_player(
                        input.player_id,
                        ServerMsg::Error {
                            code: "unknown_session".to_string(),
                            message: "No such session".to_string(),
                        },
                    ),
                }
            }
            ClientMsg::Leave => {
                self.leave_lobby(input.player_id).await;
                if let Some((_, session_id)) = self.player_sessions.remove(&input.player_id) {
                    if let Some(handle) = self.registry.get(&session_id) {
                        let _ = handle.input_tx.send(input).await;
                    }
                }
            }
            _ => {
                // Simulation-bound input
                let session = self
                    .player_sessions
                    .get(&input.player_id)
                    .and_then(|sid| self.registry.get(&sid));
                match session {
                    Some(handle) => {
                        if handle.input_tx.send(input).await.is_err() {
                            debug!("Input dropped, session closed");
                        }
                    }
                    None => {
                        debug!(player_id = %input.player_id, "Input without a session dropped");
                    }
                }
            }
        }
    }

    /// Join (or create) a lobby and notify its roster
    pub async fn join_lobby(
        &self,
        member: LobbyMember,
        lobby_id: Option<Uuid>,
        settings: Option<SessionSettings>,
    ) -> Option<Uuid> {
        let player_id = member.player_id;
        let mut lobbies = self.lobbies.lock().await;

        let id = match lobby_id {
            Some(id) if lobbies.contains_key(&id) => id,
            requested => {
                if let Some(id) = requested {
                    debug!(lobby_id = %id, "Unknown lobby requested, creating fresh");
                }
                let lobby = Lobby::new(settings.unwrap_or_default());
                let id = lobby.id;
                lobbies.insert(id, lobby);
                id
            }
        };
        let Some(lobby) = lobbies.get_mut(&id) else {
            return None;
        };

        if !lobby.add(member) {
            self.send_to_player(
                player_id,
                ServerMsg::Error {
                    code: "lobby_full".to_string(),
                    message: "Lobby is full".to_string(),
                },
            );
            return None;
        }

        let id = lobby.id;
        let roster = ServerMsg::LobbyJoined {
            lobby_id: id,
            members: lobby.member_infos(),
        };
        let member_ids: Vec<Uuid> = lobby.members().iter().map(|m| m.player_id).collect();
        drop(lobbies);

        self.player_lobbies.insert(player_id, id);
        for pid in member_ids {
            self.send_to_player(pid, roster.clone());
        }

        info!(player_id = %player_id, lobby_id = %id, "Player joined lobby");
        Some(id)
    }

    /// Start the caller's lobby: convert it into a countdown session and
    /// move every member across. The lobby is discarded.
    pub async fn start_lobby(&self, player_id: Uuid) {
        let Some(lobby_id) = self.player_lobbies.get(&player_id).map(|r| *r) else {
            self.send_to_player(
                player_id,
                ServerMsg::Error {
                    code: "no_lobby".to_string(),
                    message: "Not in a lobby".to_string(),
                },
            );
            return;
        };

        let (settings, members, waited_secs) = {
            let mut lobbies = self.lobbies.lock().await;
            let Some(lobby) = lobbies.get_mut(&lobby_id) else {
                return;
            };
            let settings = lobby.settings.clone();
            let members = lobby.take_members();
            let waited_secs = lobby.created_at.elapsed().as_secs();
            lobbies.remove(&lobby_id);
            (settings, members, waited_secs)
        };

        let handle = self.spawn_session(settings, true);

        for member in members {
            self.player_lobbies.remove(&member.player_id);
            self.player_sessions.insert(member.player_id, handle.id);

            let join = SessionInput {
                player_id: member.player_id,
                callsign: member.callsign.clone(),
                msg: ClientMsg::JoinSession {
                    session_id: Some(handle.id),
                    settings: None,
                    aircraft: member.aircraft,
                    loadout: member.loadout.clone(),
                },
                received_at: unix_millis(),
            };
            if handle.input_tx.send(join).await.is_err() {
                error!(player_id = %member.player_id, "Failed to move lobby member into session");
            }
        }

        info!(
            lobby_id = %lobby_id,
            session_id = %handle.id,
            waited_secs,
            "Lobby started game"
        );
    }

    pub async fn leave_lobby(&self, player_id: Uuid) {
        let Some((_, lobby_id)) = self.player_lobbies.remove(&player_id) else {
            return;
        };
        let mut lobbies = self.lobbies.lock().await;
        if let Some(lobby) = lobbies.get_mut(&lobby_id) {
            lobby.remove(player_id);
            if lobby.is_empty() {
                lobbies.remove(&lobby_id);
            }
        }
    }

    /// Resolve the target session for an ad hoc join: explicit id, any
    /// joinable session, or a freshly spawned one.
    async fn resolve_session(
        &self,
        player_id: Uuid,
        session_id: Option<Uuid>,
        settings: Option<SessionSettings>,
    ) -> Option<crate::game::SessionHandle> {
        if let Some(id) = session_id {
            let found = self.registry.get(&id);
            if found.is_none() {
                warn!(player_id = %player_id, session_id = %id, "Join for unknown session");
            }
            return found;
        }

        let settings = settings.unwrap_or_default();
        if let Some(handle) = self.registry.find_joinable(settings.max_players) {
            return Some(handle);
        }

        Some(self.spawn_session(settings, false))
    }

    /// Create a session task and register its handle
    fn spawn_session(&self, settings: SessionSettings, from_lobby: bool) -> crate::game::SessionHandle {
        let session_id = Uuid::new_v4();
        let seed = rand::random::<u64>();
        let (session, handle) = GameSession::new(
            session_id,
            settings,
            seed,
            from_lobby,
            Some(self.services.clone()),
        );

        self.registry.insert(handle.clone());

        let registry = self.registry.clone();
        let player_sessions = self.player_sessions.clone();
        tokio::spawn(async move {
            session.run().await;

            registry.remove(&session_id);
            player_sessions.retain(|_, sid| *sid != session_id);
            info!(session_id = %session_id, "Session removed from registry");
        });

        info!(session_id = %session_id, from_lobby, "Created session");
        handle
    }

    fn send_to_player(&self, player_id: Uuid, msg: ServerMsg) {
        if let Some(conn) = self.connections.get(&player_id) {
            let _ = conn.events_tx.send(msg);
        }
    }

    /// Current lobby count (health endpoint)
    pub async fn lobby_count(&self) -> usize {
        self.lobbies.lock().await.len()
    }

    /// Whether a player is currently mapped to a session
    pub fn session_of(&self, player_id: &Uuid) -> Option<Uuid> {
        self.player_sessions.get(player_id).map(|r| *r)
    }
}
