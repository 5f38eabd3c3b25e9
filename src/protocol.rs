use crate::game::grid::Direction;
use crate::game::npc::NpcConfig;
use crate::game::types::{GameMode, GameOptions, GameStateSnapshot, PowerupKind, Winner};
use crate::registry::SessionSummary;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

pub const MAX_CHAT_LENGTH: usize = 200;
pub const MAX_NPC_COUNT: u32 = 3;

/// Allowed `timeLimit` values (minutes) for `updateGameOptions`.
pub const TIME_LIMIT_CHOICES: [u32; 4] = [3, 5, 10, 15];

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinRoomPayload {
    pub player_name: String,
    pub room_code: String,
    pub control_scheme: Option<String>,
    pub player_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartGamePayload {
    pub room_code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartSinglePlayerPayload {
    pub player_name: String,
    pub npc_count: Option<u32>,
    pub game_mode: Option<String>,
    pub player_token: Option<String>,
    pub control_scheme: Option<String>,
    pub game_options: Option<GameOptionsUpdate>,
    pub npc_configs: Option<Vec<NpcConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerReadyPayload {
    pub room_code: String,
    pub current_player_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestGameStatePayload {
    pub room_code: String,
    pub player_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerInputPayload {
    pub room_code: String,
    pub direction: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomCodePayload {
    pub room_code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuitGamePayload {
    pub room_code: String,
    pub leave_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessagePayload {
    pub room_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TogglePublicRoomPayload {
    pub room_code: String,
    pub is_public: Option<bool>,
}

/// Partial options patch; `time_limit` distinguishes "absent" from an
/// explicit null that clears the limit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameOptionsUpdate {
    pub wall_mode: Option<bool>,
    pub strict_mode: Option<bool>,
    #[serde(deserialize_with = "double_option")]
    pub time_limit: Option<Option<u32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateGameOptionsPayload {
    pub room_code: String,
    pub game_options: GameOptionsUpdate,
}

#[derive(Debug)]
pub enum ClientEvent {
    JoinRoom(JoinRoomPayload),
    StartGame(StartGamePayload),
    StartSinglePlayer(StartSinglePlayerPayload),
    PlayerReady(PlayerReadyPayload),
    RequestGameState(RequestGameStatePayload),
    PlayerInput(PlayerInputPayload),
    PauseGame(RoomCodePayload),
    ResumeGame(RoomCodePayload),
    QuitGame(QuitGamePayload),
    ChatMessage(ChatMessagePayload),
    TogglePublicRoom(TogglePublicRoomPayload),
    RequestPublicRooms,
    RequestSessionHistory,
    UpdateGameOptions(UpdateGameOptionsPayload),
    RequestGameOptions(RoomCodePayload),
}

/// Decodes one inbound frame. Unknown events and malformed JSON yield `None`
/// and are dropped by the gateway.
pub fn decode_client_event(text: &str) -> Option<ClientEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    let event = value.get("event")?.as_str()?;
    let payload = value.get("payload").cloned().unwrap_or_else(|| json!({}));
    match event {
        "joinRoom" => serde_json::from_value(payload).ok().map(ClientEvent::JoinRoom),
        "startGame" => serde_json::from_value(payload).ok().map(ClientEvent::StartGame),
        "startSinglePlayer" => serde_json::from_value(payload)
            .ok()
            .map(ClientEvent::StartSinglePlayer),
        "playerReady" => serde_json::from_value(payload).ok().map(ClientEvent::PlayerReady),
        "requestGameState" => serde_json::from_value(payload)
            .ok()
            .map(ClientEvent::RequestGameState),
        "playerInput" => serde_json::from_value(payload).ok().map(ClientEvent::PlayerInput),
        "pauseGame" => serde_json::from_value(payload).ok().map(ClientEvent::PauseGame),
        "resumeGame" => serde_json::from_value(payload).ok().map(ClientEvent::ResumeGame),
        "quitGame" => serde_json::from_value(payload).ok().map(ClientEvent::QuitGame),
        "chatMessage" => serde_json::from_value(payload).ok().map(ClientEvent::ChatMessage),
        "togglePublicRoom" => serde_json::from_value(payload)
            .ok()
            .map(ClientEvent::TogglePublicRoom),
        "requestPublicRooms" => Some(ClientEvent::RequestPublicRooms),
        "requestSessionHistory" => Some(ClientEvent::RequestSessionHistory),
        "updateGameOptions" => serde_json::from_value(payload)
            .ok()
            .map(ClientEvent::UpdateGameOptions),
        "requestGameOptions" => serde_json::from_value(payload)
            .ok()
            .map(ClientEvent::RequestGameOptions),
        _ => None,
    }
}

pub fn parse_direction(raw: &str) -> Option<Direction> {
    match raw {
        "up" => Some(Direction::Up),
        "down" => Some(Direction::Down),
        "left" => Some(Direction::Left),
        "right" => Some(Direction::Right),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagsPayload {
    pub chat: bool,
    pub powerups: bool,
    pub accessibility: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoomPayload {
    pub player_id: String,
    pub is_host: bool,
    pub room_code: String,
    pub game_mode: GameMode,
    pub game_options: GameOptions,
    pub player_token: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub player_id: String,
    pub player_name: String,
    pub is_host: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedPayload {
    pub player_id: String,
    pub player_name: String,
    pub is_host: bool,
    pub players: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedPayload {
    pub game_state: GameStateSnapshot,
    pub room_code: String,
    pub player_id: String,
    pub game_mode: GameMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerReadyStatusPayload {
    pub ready_players: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCountdownPayload {
    pub countdown: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeCountdownPayload {
    pub countdown: u32,
    pub resumed_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateUpdatePayload {
    pub game_state: GameStateSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePausedPayload {
    pub paused_by: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUpCollectedPayload {
    pub player_id: String,
    pub player_name: String,
    #[serde(rename = "type")]
    pub kind: PowerupKind,
    pub sound: String,
}

pub fn powerup_sound(kind: PowerupKind) -> &'static str {
    match kind {
        PowerupKind::SpeedBoost => "speed-boost",
        PowerupKind::Shield => "shield",
        PowerupKind::Shrink => "shrink",
        PowerupKind::SlowOthers => "slow-others",
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCollidedPayload {
    pub player_name: String,
    pub collision_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLeftPayload {
    pub player_name: String,
    pub reason: String,
    pub was_host: bool,
    pub players: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameQuitPayload {
    pub quit_by: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostChangedPayload {
    pub new_host_id: String,
    pub new_host_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InactivityWarningPayload {
    pub message: String,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerKickedPayload {
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
    pub game_state: GameStateSnapshot,
    pub game_mode: GameMode,
    pub alive_players: Vec<String>,
    pub dead_players: Vec<String>,
    pub room_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistoryPayload {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomInfo {
    pub room_code: String,
    pub player_count: usize,
    pub max_players: usize,
    pub host_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomsUpdatedPayload {
    pub rooms: Vec<PublicRoomInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicRoomStatusPayload {
    pub room_code: String,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptionsUpdatedPayload {
    pub game_options: GameOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateErrorPayload {
    pub message: String,
    pub room_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRejectedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcastPayload {
    pub player_name: String,
    pub message: String,
    pub epoch_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    FeatureFlags(FeatureFlagsPayload),
    JoinedRoom(JoinedRoomPayload),
    JoinError(MessagePayload),
    Error(ErrorPayload),
    InputRejected(InputRejectedPayload),
    PlayerJoined(PlayerJoinedPayload),
    GameStarted(GameStartedPayload),
    PlayerReadyStatus(PlayerReadyStatusPayload),
    AllPlayersReady {},
    GameCountdown(GameCountdownPayload),
    ResumeCountdown(ResumeCountdownPayload),
    GameStateUpdate(GameStateUpdatePayload),
    GamePaused(GamePausedPayload),
    GameResumed {},
    PauseError(MessagePayload),
    ResumeError(MessagePayload),
    PowerUpCollected(PowerUpCollectedPayload),
    PlayerCollided(PlayerCollidedPayload),
    PlayerLeft(PlayerLeftPayload),
    PlayerQuit(PlayerLeftPayload),
    GameQuit(GameQuitPayload),
    HostChanged(HostChangedPayload),
    InactivityWarning(InactivityWarningPayload),
    PlayerKicked(PlayerKickedPayload),
    GameEnded(GameEndedPayload),
    SessionHistory(SessionHistoryPayload),
    PublicRoomsUpdated(PublicRoomsUpdatedPayload),
    PublicRoomStatus(PublicRoomStatusPayload),
    GameOptionsUpdated(GameOptionsUpdatedPayload),
    ChatMessage(ChatBroadcastPayload),
    GameStateError(GameStateErrorPayload),
}

pub fn encode_server_event(event: &ServerEvent) -> String {
    match serde_json::to_string(event) {
        Ok(text) => text,
        Err(error) => {
            tracing::error!(?error, "server event serialization failed");
            String::new()
        }
    }
}
