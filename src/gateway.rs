use crate::game::room::{now_millis, Room, RoomError};
use crate::game::types::GameMode;
use crate::protocol::{
    self, ClientEvent, ErrorPayload, FeatureFlagsPayload, GameStateErrorPayload,
    InputRejectedPayload, MessagePayload, PublicRoomInfo, PublicRoomsUpdatedPayload, ServerEvent,
    SessionHistoryPayload,
};
use crate::registry::{SessionRegistry, SESSION_HISTORY_LIMIT};
use crate::shared::codes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags {
    pub chat: bool,
    pub powerups: bool,
    pub accessibility: bool,
}

#[derive(Debug)]
pub struct ConnectionEntry {
    pub tx: mpsc::UnboundedSender<String>,
    pub room_code: Option<String>,
}

/// Process-wide state: the room table, the connection registry, the public
/// room index, and the session registry. Rooms keep a handle to this so they
/// can deregister themselves and fan out index updates.
#[derive(Debug)]
pub struct Shared {
    pub rooms: DashMap<String, Arc<Room>>,
    pub connections: DashMap<String, ConnectionEntry>,
    pub public_rooms: RwLock<HashMap<String, PublicRoomInfo>>,
    pub registry: SessionRegistry,
    pub features: FeatureFlags,
}

impl Shared {
    pub fn new(features: FeatureFlags) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            public_rooms: RwLock::new(HashMap::new()),
            registry: SessionRegistry::new(),
            features,
        })
    }

    /// Registers a fresh connection and greets it with the feature flags.
    pub fn register_connection(&self, conn_id: &str, tx: mpsc::UnboundedSender<String>) {
        let greeting = ServerEvent::FeatureFlags(FeatureFlagsPayload {
            chat: self.features.chat,
            powerups: self.features.powerups,
            accessibility: self.features.accessibility,
        });
        let _ = tx.send(protocol::encode_server_event(&greeting));
        self.connections.insert(
            conn_id.to_string(),
            ConnectionEntry {
                tx,
                room_code: None,
            },
        );
    }

    pub fn unregister_connection(&self, conn_id: &str) {
        self.connections.remove(conn_id);
    }

    pub fn set_room_binding(&self, conn_id: &str, room_code: &str) {
        if let Some(mut entry) = self.connections.get_mut(conn_id) {
            entry.room_code = Some(room_code.to_string());
        }
    }

    pub fn clear_room_binding(&self, conn_id: &str) {
        if let Some(mut entry) = self.connections.get_mut(conn_id) {
            entry.room_code = None;
        }
    }

    pub fn room_binding(&self, conn_id: &str) -> Option<String> {
        self.connections
            .get(conn_id)
            .and_then(|entry| entry.room_code.clone())
    }

    pub fn send_to_conn(&self, conn_id: &str, event: &ServerEvent) {
        if let Some(entry) = self.connections.get(conn_id) {
            let _ = entry.tx.send(protocol::encode_server_event(event));
        }
    }

    pub fn room(&self, code: &str) -> Option<Arc<Room>> {
        self.rooms.get(code).map(|room| Arc::clone(&room))
    }

    /// Rebroadcasts the current public room listing to every connection.
    pub fn broadcast_public_rooms(&self) {
        let rooms: Vec<PublicRoomInfo> = {
            let index = self.public_rooms.read().expect("public room index lock");
            index.values().cloned().collect()
        };
        let frame = protocol::encode_server_event(&ServerEvent::PublicRoomsUpdated(
            PublicRoomsUpdatedPayload { rooms },
        ));
        for entry in self.connections.iter() {
            let _ = entry.tx.send(frame.clone());
        }
    }
}

fn error_reason(error: &RoomError) -> &'static str {
    match error {
        RoomError::Validation(_) => "validation",
        RoomError::State(_) => "state",
        RoomError::Authorization(_) => "authorization",
        RoomError::PauseBudgetExceeded => "pause_budget",
        RoomError::RoomNotFound => "room_not_found",
        RoomError::NotInRoom => "not_in_room",
        RoomError::Internal(_) => "internal",
    }
}

fn send_error(shared: &Shared, conn_id: &str, error: &RoomError) {
    shared.send_to_conn(
        conn_id,
        &ServerEvent::Error(ErrorPayload {
            message: error.to_string(),
            reason: Some(error_reason(error).to_string()),
        }),
    );
}

fn conn_tx(shared: &Shared, conn_id: &str) -> Option<mpsc::UnboundedSender<String>> {
    shared.connections.get(conn_id).map(|entry| entry.tx.clone())
}

/// Translates one inbound frame into component calls. The gateway validates
/// shape and routing only; all game logic lives behind the room actor.
pub async fn handle_frame(shared: &Arc<Shared>, conn_id: &str, text: &str) {
    let Some(event) = protocol::decode_client_event(text) else {
        return;
    };
    match event {
        ClientEvent::JoinRoom(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            if code.is_empty() {
                shared.send_to_conn(
                    conn_id,
                    &ServerEvent::JoinError(MessagePayload {
                        message: "Room code is required".to_string(),
                    }),
                );
                return;
            }
            // SP-prefixed codes belong to generated solo/single rooms, which
            // are never joinable through the multi path.
            if codes::is_single_player_code(&code) {
                shared.send_to_conn(
                    conn_id,
                    &ServerEvent::JoinError(MessagePayload {
                        message: "Single-player rooms cannot be joined".to_string(),
                    }),
                );
                return;
            }
            let Some(tx) = conn_tx(shared, conn_id) else {
                return;
            };
            let created = !shared.rooms.contains_key(&code);
            let room = shared
                .rooms
                .entry(code.clone())
                .or_insert_with(|| Room::new(code.clone(), GameMode::Multi, Arc::clone(shared)))
                .clone();
            match room.join_multi(conn_id, tx, &payload).await {
                Ok(()) => shared.set_room_binding(conn_id, &code),
                Err(error) => {
                    shared.send_to_conn(
                        conn_id,
                        &ServerEvent::JoinError(MessagePayload {
                            message: error.to_string(),
                        }),
                    );
                    if created && room.participant_count().await == 0 {
                        shared.rooms.remove(&code);
                    }
                }
            }
        }
        ClientEvent::StartGame(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room.start_game(conn_id).await {
                        send_error(shared, conn_id, &error);
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::StartSinglePlayer(payload) => {
            let Some(tx) = conn_tx(shared, conn_id) else {
                return;
            };
            let code = {
                let mut rng = rand::thread_rng();
                loop {
                    let candidate = codes::generate_single_player_code(&mut rng);
                    if !shared.rooms.contains_key(&candidate) {
                        break candidate;
                    }
                }
            };
            let room = Room::new(code.clone(), GameMode::Solo, Arc::clone(shared));
            shared.rooms.insert(code.clone(), Arc::clone(&room));
            match room.setup_single_player(conn_id, tx, &payload).await {
                Ok(()) => shared.set_room_binding(conn_id, &code),
                Err(error) => {
                    shared.send_to_conn(
                        conn_id,
                        &ServerEvent::JoinError(MessagePayload {
                            message: error.to_string(),
                        }),
                    );
                    shared.rooms.remove(&code);
                }
            }
        }
        ClientEvent::PlayerReady(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room
                        .player_ready(conn_id, payload.current_player_id.as_deref())
                        .await
                    {
                        send_error(shared, conn_id, &error);
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::RequestGameState(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    let Some(tx) = conn_tx(shared, conn_id) else {
                        return;
                    };
                    room.request_game_state(conn_id, tx, payload.player_token.as_deref())
                        .await;
                    shared.set_room_binding(conn_id, &code);
                }
                None => {
                    shared.send_to_conn(
                        conn_id,
                        &ServerEvent::GameStateError(GameStateErrorPayload {
                            message: "Room not found".to_string(),
                            room_code: code,
                        }),
                    );
                }
            }
        }
        ClientEvent::PlayerInput(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            let Some(room) = shared.room(&code) else {
                shared.send_to_conn(
                    conn_id,
                    &ServerEvent::InputRejected(InputRejectedPayload {
                        reason: "room_not_found".to_string(),
                    }),
                );
                return;
            };
            if let Err(error) = room.player_input(conn_id, &payload.direction).await {
                let reason = match &error {
                    RoomError::Validation(reason) | RoomError::State(reason) => reason.clone(),
                    other => error_reason(other).to_string(),
                };
                shared.send_to_conn(
                    conn_id,
                    &ServerEvent::InputRejected(InputRejectedPayload { reason }),
                );
            }
        }
        ClientEvent::PauseGame(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room.pause(conn_id).await {
                        shared.send_to_conn(
                            conn_id,
                            &ServerEvent::PauseError(MessagePayload {
                                message: error.to_string(),
                            }),
                        );
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::ResumeGame(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room.resume(conn_id).await {
                        shared.send_to_conn(
                            conn_id,
                            &ServerEvent::ResumeError(MessagePayload {
                                message: error.to_string(),
                            }),
                        );
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::QuitGame(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    let leave_type = payload.leave_type.as_deref().unwrap_or("alone");
                    if let Err(error) = room.quit(conn_id, leave_type).await {
                        send_error(shared, conn_id, &error);
                    }
                    shared.clear_room_binding(conn_id);
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::ChatMessage(payload) => {
            if !shared.features.chat {
                send_error(
                    shared,
                    conn_id,
                    &RoomError::State("Chat is disabled on this server".to_string()),
                );
                return;
            }
            if payload.message.chars().count() > protocol::MAX_CHAT_LENGTH * 4 {
                send_error(
                    shared,
                    conn_id,
                    &RoomError::Validation("Message too long".to_string()),
                );
                return;
            }
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room.chat(conn_id, &payload.message).await {
                        send_error(shared, conn_id, &error);
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::TogglePublicRoom(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => room.toggle_public(conn_id, &payload).await,
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::RequestPublicRooms => {
            let rooms: Vec<PublicRoomInfo> = {
                let index = shared.public_rooms.read().expect("public room index lock");
                index.values().cloned().collect()
            };
            shared.send_to_conn(
                conn_id,
                &ServerEvent::PublicRoomsUpdated(PublicRoomsUpdatedPayload { rooms }),
            );
        }
        ClientEvent::RequestSessionHistory => {
            let now = now_millis();
            let sessions = shared.registry.recent(SESSION_HISTORY_LIMIT, now, |code| {
                shared
                    .rooms
                    .get(code)
                    .map(|room| room.ticker_is_running())
                    .unwrap_or(false)
            });
            shared.send_to_conn(
                conn_id,
                &ServerEvent::SessionHistory(SessionHistoryPayload { sessions }),
            );
        }
        ClientEvent::UpdateGameOptions(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room.update_options(conn_id, &payload).await {
                        send_error(shared, conn_id, &error);
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
        ClientEvent::RequestGameOptions(payload) => {
            let code = codes::normalize_room_code(&payload.room_code);
            match shared.room(&code) {
                Some(room) => {
                    if let Err(error) = room.request_options(conn_id).await {
                        send_error(shared, conn_id, &error);
                    }
                }
                None => send_error(shared, conn_id, &RoomError::RoomNotFound),
            }
        }
    }
}

/// Socket-close path: route the drop into the room the connection was bound
/// to, if any.
pub async fn handle_disconnect(shared: &Arc<Shared>, conn_id: &str) {
    if let Some(code) = shared.room_binding(conn_id) {
        if let Some(room) = shared.room(&code) {
            room.handle_disconnect(conn_id).await;
        }
    }
}
