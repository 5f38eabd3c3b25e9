use super::grid;
use super::npc::{self, NpcState};
use super::powerups::PowerupService;
use super::simulation;
use super::types::{
    snapshot, GameMode, GameOptions, GameState, PlayerKind, MAX_ROOM_PLAYERS, PAUSE_BUDGET_MS,
};
use super::watchdog::{self, WatchdogAction};
use crate::gateway::Shared;
use crate::protocol::{
    self, GameCountdownPayload, GameEndedPayload, GamePausedPayload, GameStartedPayload,
    GameStateErrorPayload, GameStateUpdatePayload, HostChangedPayload, InactivityWarningPayload,
    JoinRoomPayload, JoinedRoomPayload, PlayerJoinedPayload, PlayerKickedPayload,
    PlayerLeftPayload, PlayerReadyStatusPayload, PowerUpCollectedPayload, PublicRoomInfo,
    ResumeCountdownPayload, RosterEntry, ServerEvent, StartSinglePlayerPayload,
    TogglePublicRoomPayload, UpdateGameOptionsPayload,
};
use crate::registry::EndReason;
use crate::shared::names::sanitize_player_name;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[cfg(test)]
mod tests;

pub const COUNTDOWN_START: u32 = 5;
pub const READY_TO_COUNTDOWN_DELAY_MS: u64 = 300;
pub const COUNTDOWN_STEP_MS: u64 = 1_000;
pub const LOBBY_DISCONNECT_GRACE_MS: u64 = 30_000;
pub const SOLO_DISCONNECT_GRACE_MS: u64 = 30_000;
pub const ROOM_CLEANUP_MS: u64 = 10_000;
pub const CHAT_RATE_MS: i64 = 800;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    State(String),
    #[error("{0}")]
    Authorization(String),
    #[error("Pause budget exhausted")]
    PauseBudgetExceeded,
    #[error("Room not found")]
    RoomNotFound,
    #[error("You are not in this room")]
    NotInRoom,
    #[error("{0}")]
    Internal(String),
}

/// Room-view of one member. NPCs are members too; they just never have a
/// connection or a usable token.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub conn_id: Option<String>,
    pub token: String,
    pub kind: PlayerKind,
    pub is_host: bool,
    pub control_scheme: String,
    pub disconnected: bool,
    pub disconnected_at_ms: Option<i64>,
}

#[derive(Debug)]
pub(crate) struct RoomState {
    pub(crate) mode: GameMode,
    pub(crate) participants: HashMap<String, Participant>,
    pub(crate) join_order: Vec<String>,
    pub(crate) tokens: HashMap<String, String>,
    pub(crate) conn_to_player: HashMap<String, String>,
    pub(crate) conns: HashMap<String, mpsc::UnboundedSender<String>>,
    pub(crate) ready: HashSet<String>,
    pub(crate) game: Option<GameState>,
    pub(crate) npcs: HashMap<String, NpcState>,
    pub(crate) options: GameOptions,
    pub(crate) is_public: bool,
    pub(crate) started: bool,
    pub(crate) countdown_task: Option<JoinHandle<()>>,
    pub(crate) resume_countdown_task: Option<JoinHandle<()>>,
    pub(crate) cleanup_task: Option<JoinHandle<()>>,
    pub(crate) disconnect_tasks: HashMap<String, JoinHandle<()>>,
    pub(crate) session_uid: Option<String>,
    pub(crate) game_over_sent: bool,
    pub(crate) ticker_stop: bool,
    pub(crate) disposed: bool,
    pub(crate) powerups: PowerupService,
    pub(crate) last_chat_at_ms: HashMap<String, i64>,
}

/// One match room. All state lives behind the mutex; gateway dispatch, the
/// ticker, and the countdown and cleanup tasks all serialize through it,
/// which is what makes the room a single logical actor.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    shared: Arc<Shared>,
    state: Mutex<RoomState>,
    ticker_running: AtomicBool,
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl Room {
    pub fn new(code: String, mode: GameMode, shared: Arc<Shared>) -> Arc<Self> {
        let powerups = PowerupService::new(shared.features.powerups);
        Arc::new(Self {
            code,
            shared,
            state: Mutex::new(RoomState {
                mode,
                participants: HashMap::new(),
                join_order: Vec::new(),
                tokens: HashMap::new(),
                conn_to_player: HashMap::new(),
                conns: HashMap::new(),
                ready: HashSet::new(),
                game: None,
                npcs: HashMap::new(),
                options: GameOptions::default(),
                is_public: false,
                started: false,
                countdown_task: None,
                resume_countdown_task: None,
                cleanup_task: None,
                disconnect_tasks: HashMap::new(),
                session_uid: None,
                game_over_sent: false,
                ticker_stop: false,
                disposed: false,
                powerups,
                last_chat_at_ms: HashMap::new(),
            }),
            ticker_running: AtomicBool::new(false),
        })
    }

    pub fn ticker_is_running(&self) -> bool {
        self.ticker_running.load(Ordering::SeqCst)
    }

    pub async fn participant_count(&self) -> usize {
        self.state.lock().await.participants.len()
    }

    // ---- join / start -------------------------------------------------

    pub async fn join_multi(
        self: &Arc<Self>,
        conn_id: &str,
        tx: mpsc::UnboundedSender<String>,
        payload: &JoinRoomPayload,
    ) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        if state.disposed {
            return Err(RoomError::RoomNotFound);
        }

        // Token match before the countdown starts is a Ready-phase reconnect.
        if let Some(token) = payload.player_token.as_deref() {
            if let Some(player_id) = state.tokens.get(token).cloned() {
                let game_running = state
                    .game
                    .as_ref()
                    .map(|game| game.started())
                    .unwrap_or(false);
                if state.countdown_task.is_none() && !game_running {
                    return self.reattach(&mut state, conn_id, tx, &player_id);
                }
                return Err(RoomError::State(
                    "Game already in progress".to_string(),
                ));
            }
        }

        let name = sanitize_player_name(&payload.player_name, "");
        if name.is_empty() {
            return Err(RoomError::Validation("Player name is required".to_string()));
        }
        let duplicate = state
            .participants
            .values()
            .any(|member| member.name.eq_ignore_ascii_case(&name));
        if duplicate {
            return Err(RoomError::Validation(format!(
                "Name \"{name}\" is already taken in this room"
            )));
        }
        if state.participants.len() >= MAX_ROOM_PLAYERS {
            return Err(RoomError::Validation("Room is full".to_string()));
        }
        if state.countdown_task.is_some() {
            return Err(RoomError::State("Game is starting".to_string()));
        }
        if state.started {
            return Err(RoomError::State("Game already started".to_string()));
        }

        let player_id = Uuid::new_v4().to_string();
        let token = Uuid::new_v4().to_string();
        let is_host = state.participants.is_empty();
        let control_scheme = payload
            .control_scheme
            .clone()
            .unwrap_or_else(|| "arrows".to_string());
        let participant = Participant {
            id: player_id.clone(),
            name: name.clone(),
            conn_id: Some(conn_id.to_string()),
            token: token.clone(),
            kind: PlayerKind::Human,
            is_host,
            control_scheme,
            disconnected: false,
            disconnected_at_ms: None,
        };
        state.join_order.push(player_id.clone());
        state.tokens.insert(token.clone(), player_id.clone());
        state.conn_to_player.insert(conn_id.to_string(), player_id.clone());
        state.conns.insert(conn_id.to_string(), tx);
        state.participants.insert(player_id.clone(), participant);

        tracing::info!(room_code = %self.code, player_id = %player_id, %name, is_host, "player_joined_room");

        state.send_to_conn(
            conn_id,
            &ServerEvent::JoinedRoom(JoinedRoomPayload {
                player_id: player_id.clone(),
                is_host,
                room_code: self.code.clone(),
                game_mode: state.mode,
                game_options: state.options,
                player_token: token,
                is_public: state.is_public,
            }),
        );
        let roster = state.roster();
        state.broadcast(&ServerEvent::PlayerJoined(PlayerJoinedPayload {
            player_id,
            player_name: name,
            is_host,
            players: roster,
        }));
        self.publish_public_rooms(&state);
        Ok(())
    }

    fn reattach(
        self: &Arc<Self>,
        state: &mut RoomState,
        conn_id: &str,
        tx: mpsc::UnboundedSender<String>,
        player_id: &str,
    ) -> Result<(), RoomError> {
        let Some(participant) = state.participants.get_mut(player_id) else {
            return Err(RoomError::NotInRoom);
        };
        if let Some(old_conn) = participant.conn_id.take() {
            state.conn_to_player.remove(&old_conn);
            state.conns.remove(&old_conn);
        }
        participant.conn_id = Some(conn_id.to_string());
        participant.disconnected = false;
        participant.disconnected_at_ms = None;
        let is_host = participant.is_host;
        let token = participant.token.clone();
        state.conn_to_player.insert(conn_id.to_string(), player_id.to_string());
        state.conns.insert(conn_id.to_string(), tx);
        if let Some(task) = state.disconnect_tasks.remove(player_id) {
            task.abort();
        }
        if let Some(task) = state.cleanup_task.take() {
            task.abort();
        }

        tracing::info!(room_code = %self.code, player_id, "player_reconnected");
        state.send_to_conn(
            conn_id,
            &ServerEvent::JoinedRoom(JoinedRoomPayload {
                player_id: player_id.to_string(),
                is_host,
                room_code: self.code.clone(),
                game_mode: state.mode,
                game_options: state.options,
                player_token: token,
                is_public: state.is_public,
            }),
        );
        if let Some(game) = state.game.as_ref() {
            let payload = GameStartedPayload {
                game_state: snapshot(game),
                room_code: self.code.clone(),
                player_id: player_id.to_string(),
                game_mode: state.mode,
                is_host: Some(is_host),
            };
            state.send_to_conn(conn_id, &ServerEvent::GameStarted(payload));
        }
        Ok(())
    }

    /// Host-only multi start: build the game from the roster and enter Ready.
    pub async fn start_game(self: &Arc<Self>, conn_id: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let requester = state
            .participants
            .get(&player_id)
            .ok_or(RoomError::NotInRoom)?;
        if !requester.is_host {
            return Err(RoomError::Authorization(
                "Only the host can start the game".to_string(),
            ));
        }
        if state.started || state.game.is_some() {
            return Err(RoomError::State("Game already started".to_string()));
        }
        let humans = state.join_order.len();
        if !(2..=MAX_ROOM_PLAYERS).contains(&humans) {
            return Err(RoomError::Validation(
                "Need 2-4 players to start".to_string(),
            ));
        }

        let now = now_millis();
        let mut game = GameState::new(state.mode, state.options);
        for (index, id) in state.join_order.clone().iter().enumerate() {
            let Some(member) = state.participants.get(id) else {
                continue;
            };
            game.add_player(simulation::spawn_player(
                member.id.clone(),
                member.name.clone(),
                member.kind,
                index,
                member.is_host,
                member.control_scheme.clone(),
                now,
            ));
        }
        let mut rng = rand::thread_rng();
        simulation::spawn_food(&mut game, &mut rng);
        state.game = Some(game);
        state.started = true;
        state.ready.clear();

        tracing::info!(room_code = %self.code, players = humans, "game_starting");
        let game_snapshot = snapshot(state.game.as_ref().expect("game just built"));
        for (id, member) in state.participants.clone() {
            let Some(conn) = member.conn_id.as_deref() else {
                continue;
            };
            state.send_to_conn(
                conn,
                &ServerEvent::GameStarted(GameStartedPayload {
                    game_state: game_snapshot.clone(),
                    room_code: self.code.clone(),
                    player_id: id,
                    game_mode: state.mode,
                    is_host: Some(member.is_host),
                }),
            );
        }
        self.publish_public_rooms(&state);
        Ok(())
    }

    /// Creates the sole human plus the configured NPC roster and enters Ready.
    pub async fn setup_single_player(
        self: &Arc<Self>,
        conn_id: &str,
        tx: mpsc::UnboundedSender<String>,
        payload: &StartSinglePlayerPayload,
    ) -> Result<(), RoomError> {
        let name = sanitize_player_name(&payload.player_name, "");
        if name.is_empty() {
            return Err(RoomError::Validation("Player name is required".to_string()));
        }
        let npc_count = payload.npc_count.unwrap_or(0);
        if npc_count > protocol::MAX_NPC_COUNT {
            return Err(RoomError::Validation(format!(
                "npcCount must be between 0 and {}",
                protocol::MAX_NPC_COUNT
            )));
        }

        let mut state = self.state.lock().await;
        if state.disposed || state.started {
            return Err(RoomError::State("Room is not joinable".to_string()));
        }

        let mode = if npc_count == 0 || payload.game_mode.as_deref() == Some("solo") {
            GameMode::Solo
        } else {
            GameMode::Single
        };
        state.mode = mode;
        if let Some(patch) = payload.game_options.as_ref() {
            if let Some(wall_mode) = patch.wall_mode {
                state.options.wall_mode = wall_mode;
            }
        }

        let now = now_millis();
        let player_id = Uuid::new_v4().to_string();
        let token = payload
            .player_token
            .clone()
            .filter(|token| !token.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let control_scheme = payload
            .control_scheme
            .clone()
            .unwrap_or_else(|| "arrows".to_string());
        state.join_order.push(player_id.clone());
        state.tokens.insert(token.clone(), player_id.clone());
        state.conn_to_player.insert(conn_id.to_string(), player_id.clone());
        state.conns.insert(conn_id.to_string(), tx);
        state.participants.insert(
            player_id.clone(),
            Participant {
                id: player_id.clone(),
                name: name.clone(),
                conn_id: Some(conn_id.to_string()),
                token: token.clone(),
                kind: PlayerKind::Human,
                is_host: true,
                control_scheme: control_scheme.clone(),
                disconnected: false,
                disconnected_at_ms: None,
            },
        );

        let mut game = GameState::new(mode, state.options);
        game.add_player(simulation::spawn_player(
            player_id.clone(),
            name,
            PlayerKind::Human,
            0,
            true,
            control_scheme,
            now,
        ));

        for index in 0..npc_count as usize {
            let npc_id = Uuid::new_v4().to_string();
            let config = payload
                .npc_configs
                .as_ref()
                .and_then(|configs| configs.get(index));
            let npc = NpcState::from_config(npc_id.clone(), index, config);
            state.join_order.push(npc_id.clone());
            state.participants.insert(
                npc_id.clone(),
                Participant {
                    id: npc_id.clone(),
                    name: npc.name.clone(),
                    conn_id: None,
                    token: Uuid::new_v4().to_string(),
                    kind: PlayerKind::Npc,
                    is_host: false,
                    control_scheme: String::new(),
                    disconnected: false,
                    disconnected_at_ms: None,
                },
            );
            game.add_player(simulation::spawn_player(
                npc_id.clone(),
                npc.name.clone(),
                PlayerKind::Npc,
                index + 1,
                false,
                String::new(),
                now,
            ));
            state.npcs.insert(npc_id, npc);
        }

        let mut rng = rand::thread_rng();
        simulation::spawn_food(&mut game, &mut rng);
        state.game = Some(game);
        state.started = true;

        tracing::info!(room_code = %self.code, mode = mode.as_str(), npc_count, "single_player_room_started");
        state.send_to_conn(
            conn_id,
            &ServerEvent::JoinedRoom(JoinedRoomPayload {
                player_id: player_id.clone(),
                is_host: true,
                room_code: self.code.clone(),
                game_mode: mode,
                game_options: state.options,
                player_token: token,
                is_public: false,
            }),
        );
        let payload = GameStartedPayload {
            game_state: snapshot(state.game.as_ref().expect("game just built")),
            room_code: self.code.clone(),
            player_id,
            game_mode: mode,
            is_host: Some(true),
        };
        state.send_to_conn(conn_id, &ServerEvent::GameStarted(payload));
        Ok(())
    }

    // ---- ready / countdown --------------------------------------------

    pub async fn player_ready(
        self: &Arc<Self>,
        conn_id: &str,
        current_player_id: Option<&str>,
    ) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        // The connection binding is authoritative; the id the client sent is
        // only a fallback for a socket that re-bound mid-ready.
        let player_id = match state.player_for_conn(conn_id) {
            Some(id) => id,
            None => current_player_id
                .filter(|id| state.participants.contains_key(*id))
                .map(|id| id.to_string())
                .ok_or(RoomError::NotInRoom)?,
        };
        if !state.started || state.game.is_none() {
            return Err(RoomError::State("Game has not been set up".to_string()));
        }
        let already_running = state
            .game
            .as_ref()
            .map(|game| game.started())
            .unwrap_or(false);
        if already_running {
            return Err(RoomError::State("Game already running".to_string()));
        }
        state.ready.insert(player_id);
        let ready_players: Vec<String> = state.ready.iter().cloned().collect();
        state.broadcast(&ServerEvent::PlayerReadyStatus(PlayerReadyStatusPayload {
            ready_players,
        }));

        let humans: HashSet<String> = state
            .participants
            .values()
            .filter(|member| member.kind == PlayerKind::Human)
            .map(|member| member.id.clone())
            .collect();
        let all_ready = humans.iter().all(|id| state.ready.contains(id));
        if all_ready && state.countdown_task.is_none() {
            state.broadcast(&ServerEvent::AllPlayersReady {});
            let room = Arc::clone(self);
            state.countdown_task = Some(tokio::spawn(async move {
                room.run_start_countdown().await;
            }));
        }
        Ok(())
    }

    async fn run_start_countdown(self: Arc<Self>) {
        tokio::time::sleep(Duration::from_millis(READY_TO_COUNTDOWN_DELAY_MS)).await;
        for value in (0..=COUNTDOWN_START).rev() {
            let mut state = self.state.lock().await;
            if state.disposed || state.game.is_none() {
                state.countdown_task = None;
                return;
            }
            state.broadcast(&ServerEvent::GameCountdown(GameCountdownPayload {
                countdown: value,
            }));
            if value == 0 {
                let now = now_millis();
                let mode = state.mode;
                if let Some(game) = state.game.as_mut() {
                    game.start_epoch_ms = now;
                    game.timer_seconds = 0;
                    for (id, player) in game.players.iter_mut() {
                        player.survival_start_ms = now;
                        if player.is_human() {
                            game.last_input_at_ms.insert(id.clone(), now);
                        }
                    }
                }
                state.session_uid =
                    Some(self.shared.registry.open(&self.code, mode, now));
                state.countdown_task = None;
                let update = state.game.as_ref().map(snapshot);
                if let Some(game_state) = update {
                    state.broadcast(&ServerEvent::GameStateUpdate(GameStateUpdatePayload {
                        game_state,
                    }));
                }
                drop(state);
                self.ensure_ticker();
                return;
            }
            drop(state);
            tokio::time::sleep(Duration::from_millis(COUNTDOWN_STEP_MS)).await;
        }
    }

    // ---- ticker --------------------------------------------------------

    pub(crate) fn ensure_ticker(self: &Arc<Self>) {
        if self
            .ticker_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let room = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let period = {
                    let mut state = room.state.lock().await;
                    if state.disposed || state.ticker_stop {
                        state.ticker_stop = false;
                        break;
                    }
                    let Some(game) = state.game.as_ref() else {
                        break;
                    };
                    simulation::tick_period_ms(game.level, game.mode)
                };
                tokio::time::sleep(Duration::from_millis(period)).await;
                let mut state = room.state.lock().await;
                if state.disposed || state.ticker_stop {
                    state.ticker_stop = false;
                    break;
                }
                if let Err(error) = room.run_tick(&mut state) {
                    tracing::error!(room_code = %room.code, %error, "tick_failed");
                    room.force_crash_end(&mut state);
                    break;
                }
                if state.ticker_stop {
                    state.ticker_stop = false;
                    break;
                }
            }
            room.ticker_running.store(false, Ordering::SeqCst);
        });
    }

    fn run_tick(self: &Arc<Self>, state: &mut RoomState) -> Result<(), RoomError> {
        let now = now_millis();
        let gated = {
            let Some(game) = state.game.as_ref() else {
                return Ok(());
            };
            game.paused || state.countdown_task.is_some() || !game.started()
        };
        if gated {
            // Frozen timer still goes out so clients observe the pause.
            state.broadcast_game_state();
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        let powerups = state.powerups;
        let begin = {
            let game = state.game.as_mut().ok_or_else(|| {
                RoomError::Internal("game disappeared mid-tick".to_string())
            })?;
            simulation::begin_tick(game, &powerups, now, &mut rng)
        };
        for collection in &begin.collections {
            let player_name = state
                .game
                .as_ref()
                .and_then(|game| game.players.get(&collection.player_id))
                .map(|player| player.name.clone())
                .unwrap_or_default();
            state.broadcast(&ServerEvent::PowerUpCollected(PowerUpCollectedPayload {
                player_id: collection.player_id.clone(),
                player_name,
                kind: collection.kind,
                sound: protocol::powerup_sound(collection.kind).to_string(),
            }));
        }
        if begin.timed_out {
            state.broadcast_game_state();
            self.end_game(state, EndReason::Timeout, now);
            return Ok(());
        }

        let actions = state
            .game
            .as_mut()
            .map(|game| watchdog::scan(game, now))
            .unwrap_or_default();
        for action in actions {
            self.apply_watchdog_action(state, action, now);
            if state.game_over_sent {
                return Ok(());
            }
        }

        // NPC decisions land in the same queued-direction slot inputs use, so
        // the reversal rule can never be bypassed.
        let npc_ids: Vec<String> = state.npcs.keys().cloned().collect();
        for npc_id in npc_ids {
            let Some(game) = state.game.as_mut() else { break };
            let alive = game
                .players
                .get(&npc_id)
                .map(|player| player.alive)
                .unwrap_or(false);
            if !alive {
                continue;
            }
            let Some(npc) = state.npcs.get_mut(&npc_id) else {
                continue;
            };
            let previous_heading = npc.last_direction;
            if let Some(direction) = npc::decide_direction(npc, game, &mut rng) {
                if previous_heading != Some(direction) {
                    tracing::trace!(room_code = %self.code, npc = %npc.name, ?direction, "npc_heading_changed");
                }
                if let Some(player) = game.players.get_mut(&npc_id) {
                    if grid::is_turn_allowed(player.queued_direction, direction)
                        && grid::is_turn_allowed(player.direction, direction)
                    {
                        player.queued_direction = direction;
                    }
                }
            }
        }

        let finish = {
            let game = state.game.as_mut().ok_or_else(|| {
                RoomError::Internal("game disappeared mid-tick".to_string())
            })?;
            simulation::finish_tick(game, now, &mut rng)
        };
        for death in &finish.deaths {
            tracing::debug!(room_code = %self.code, player_id = %death.player_id, player = %death.player_name, kind = death.kind.as_str(), "player_collided");
            state.broadcast(&ServerEvent::PlayerCollided(
                protocol::PlayerCollidedPayload {
                    player_name: death.player_name.clone(),
                    collision_type: death.kind.as_str().to_string(),
                },
            ));
        }
        if let Some(npc_id) = finish.respawned_npc.as_deref() {
            if let Some(npc) = state.npcs.get_mut(npc_id) {
                npc.decision_delay_ticks = 0;
                npc.target_food = None;
            }
        }

        state.broadcast_game_state();
        let winner_set = state
            .game
            .as_ref()
            .map(|game| game.winner.is_some())
            .unwrap_or(false);
        if winner_set {
            self.end_game(state, EndReason::WinnerDeclared, now);
        }
        Ok(())
    }

    fn apply_watchdog_action(self: &Arc<Self>, state: &mut RoomState, action: WatchdogAction, now: i64) {
        match action {
            WatchdogAction::Warn {
                player_id,
                remaining_seconds,
            } => {
                state.send_to_player(
                    &player_id,
                    &ServerEvent::InactivityWarning(InactivityWarningPayload {
                        message: format!(
                            "You will be removed in {remaining_seconds} seconds without input"
                        ),
                        remaining_seconds,
                    }),
                );
            }
            WatchdogAction::Kick { player_id } => {
                tracing::info!(room_code = %self.code, player_id = %player_id, "player_kicked_inactive");
                if let Some(game) = state.game.as_mut() {
                    simulation::kill_player(game, &player_id, now);
                }
                state.send_to_player(
                    &player_id,
                    &ServerEvent::PlayerKicked(PlayerKickedPayload {
                        reason: "inactive".to_string(),
                        message: "Removed for inactivity".to_string(),
                    }),
                );
                let was_host = state
                    .participants
                    .get(&player_id)
                    .map(|member| member.is_host)
                    .unwrap_or(false);
                let name = state.remove_membership(&player_id);
                let roster = state.roster();
                state.broadcast(&ServerEvent::PlayerLeft(PlayerLeftPayload {
                    player_name: name,
                    reason: "inactive".to_string(),
                    was_host,
                    players: roster,
                }));
                if was_host {
                    self.elect_new_host(state);
                }
                state.broadcast_game_state();
                self.publish_public_rooms(state);
            }
            WatchdogAction::EndGame { player_id } => {
                let disconnected = state
                    .participants
                    .get(&player_id)
                    .map(|member| member.disconnected)
                    .unwrap_or(true);
                if let Some(game) = state.game.as_mut() {
                    simulation::kill_player(game, &player_id, now);
                    simulation::check_win_condition(game, false, now);
                }
                let reason = if disconnected {
                    EndReason::PlayerInactiveDisconnected
                } else {
                    EndReason::PlayerInactive
                };
                self.end_game(state, reason, now);
            }
        }
    }

    // ---- input ---------------------------------------------------------

    pub async fn player_input(
        self: &Arc<Self>,
        conn_id: &str,
        direction_raw: &str,
    ) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let direction = protocol::parse_direction(direction_raw)
            .ok_or_else(|| RoomError::Validation("unknown_direction".to_string()))?;
        let game = state
            .game
            .as_mut()
            .ok_or_else(|| RoomError::State("not_running".to_string()))?;
        if !game.started() || game.paused {
            return Err(RoomError::State("not_running".to_string()));
        }
        simulation::handle_input(game, &player_id, direction, now_millis())
            .map_err(|reject| RoomError::Validation(reject.reason().to_string()))
    }

    // ---- pause / resume -------------------------------------------------

    pub async fn pause(self: &Arc<Self>, conn_id: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let paused_by = state
            .participants
            .get(&player_id)
            .map(|member| member.name.clone())
            .ok_or(RoomError::NotInRoom)?;
        let mode = state.mode;
        let countdown_active = state.countdown_task.is_some();
        let game = state
            .game
            .as_mut()
            .ok_or_else(|| RoomError::State("No game to pause".to_string()))?;
        if game.paused {
            return Err(RoomError::State("Game is already paused".to_string()));
        }
        if !game.started() && !countdown_active {
            return Err(RoomError::State("Game has not started".to_string()));
        }
        if mode == GameMode::Multi && game.total_pause_ms >= PAUSE_BUDGET_MS {
            return Err(RoomError::PauseBudgetExceeded);
        }
        let now = now_millis();
        game.paused = true;
        game.pause_started_at_ms = now;
        tracing::info!(room_code = %self.code, %paused_by, "game_paused");
        state.broadcast(&ServerEvent::GamePaused(GamePausedPayload { paused_by }));
        Ok(())
    }

    pub async fn resume(self: &Arc<Self>, conn_id: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let resumed_by = state
            .participants
            .get(&player_id)
            .map(|member| member.name.clone())
            .ok_or(RoomError::NotInRoom)?;
        let paused = state
            .game
            .as_ref()
            .map(|game| game.paused)
            .unwrap_or(false);
        if !paused {
            return Err(RoomError::State("Game is not paused".to_string()));
        }
        if state.resume_countdown_task.is_some() {
            return Err(RoomError::State("Resume already in progress".to_string()));
        }
        let room = Arc::clone(self);
        state.resume_countdown_task = Some(tokio::spawn(async move {
            room.run_resume_countdown(resumed_by).await;
        }));
        Ok(())
    }

    async fn run_resume_countdown(self: Arc<Self>, resumed_by: String) {
        for value in (0..=COUNTDOWN_START).rev() {
            let mut state = self.state.lock().await;
            if state.disposed || state.game.is_none() {
                state.resume_countdown_task = None;
                return;
            }
            state.broadcast(&ServerEvent::ResumeCountdown(ResumeCountdownPayload {
                countdown: value,
                resumed_by: resumed_by.clone(),
            }));
            if value == 0 {
                let now = now_millis();
                let mode = state.mode;
                let mut budget_exhausted = false;
                if let Some(game) = state.game.as_mut() {
                    let pause_duration = now - game.pause_started_at_ms;
                    game.total_pause_ms += pause_duration;
                    // Paused time must not count toward inactivity.
                    for last_input in game.last_input_at_ms.values_mut() {
                        *last_input += pause_duration;
                    }
                    game.paused = false;
                    game.pause_started_at_ms = 0;
                    budget_exhausted =
                        mode == GameMode::Multi && game.total_pause_ms >= PAUSE_BUDGET_MS;
                }
                state.resume_countdown_task = None;
                state.broadcast(&ServerEvent::GameResumed {});
                if budget_exhausted {
                    if let Some(game) = state.game.as_mut() {
                        simulation::check_win_condition(game, true, now);
                    }
                    self.end_game(&mut state, EndReason::GameEnded, now);
                    return;
                }
                drop(state);
                self.ensure_ticker();
                return;
            }
            drop(state);
            tokio::time::sleep(Duration::from_millis(COUNTDOWN_STEP_MS)).await;
        }
    }

    // ---- quit / disconnect ----------------------------------------------

    pub async fn quit(self: &Arc<Self>, conn_id: &str, leave_type: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let now = now_millis();
        let (name, was_host) = state
            .participants
            .get(&player_id)
            .map(|member| (member.name.clone(), member.is_host))
            .ok_or(RoomError::NotInRoom)?;

        match state.mode {
            GameMode::Solo | GameMode::Single => {
                if let Some(game) = state.game.as_mut() {
                    simulation::kill_player(game, &player_id, now);
                    simulation::check_win_condition(game, false, now);
                }
                self.end_game(&mut state, EndReason::GameEnded, now);
                Ok(())
            }
            GameMode::Multi => {
                if let Some(game) = state.game.as_mut() {
                    simulation::kill_player(game, &player_id, now);
                }
                if was_host && leave_type == "withParty" && state.started {
                    tracing::info!(room_code = %self.code, quit_by = %name, "host_quit_with_party");
                    state.broadcast(&ServerEvent::GameQuit(protocol::GameQuitPayload {
                        quit_by: name,
                        reason: "host_left_with_party".to_string(),
                    }));
                    if let Some(game) = state.game.as_mut() {
                        simulation::check_win_condition(game, false, now);
                    }
                    self.end_game(&mut state, EndReason::GameEnded, now);
                    self.dispose(&mut state, EndReason::GameEnded);
                    return Ok(());
                }

                state.remove_membership(&player_id);
                let roster = state.roster();
                state.broadcast(&ServerEvent::PlayerQuit(PlayerLeftPayload {
                    player_name: name,
                    reason: "quit".to_string(),
                    was_host,
                    players: roster,
                }));
                if state.participants.is_empty() {
                    let reason = if was_host {
                        EndReason::HostQuitNoPlayers
                    } else {
                        EndReason::AllPlayersQuit
                    };
                    self.dispose(&mut state, reason);
                    return Ok(());
                }
                if was_host {
                    self.elect_new_host(&mut state);
                }
                if state.started {
                    let connected = state.connected_human_count();
                    if connected <= 1 {
                        if let Some(game) = state.game.as_mut() {
                            simulation::check_win_condition(game, false, now);
                        }
                        self.end_game(&mut state, EndReason::AllPlayersQuit, now);
                        return Ok(());
                    }
                    state.broadcast_game_state();
                }
                self.publish_public_rooms(&state);
                Ok(())
            }
        }
    }

    pub async fn handle_disconnect(self: &Arc<Self>, conn_id: &str) {
        let mut state = self.state.lock().await;
        let Some(player_id) = state.conn_to_player.remove(conn_id) else {
            state.conns.remove(conn_id);
            return;
        };
        state.conns.remove(conn_id);
        let now = now_millis();
        let Some(participant) = state.participants.get_mut(&player_id) else {
            return;
        };
        participant.conn_id = None;
        participant.disconnected = true;
        participant.disconnected_at_ms = Some(now);
        let was_host = participant.is_host;
        let name = participant.name.clone();
        tracing::info!(room_code = %self.code, player_id = %player_id, %name, "player_disconnected");

        let game_running = state
            .game
            .as_ref()
            .map(|game| game.started())
            .unwrap_or(false);

        match state.mode {
            GameMode::Multi if game_running => {
                // Mid-game tokens die with the connection: no rejoining a
                // running multi match.
                state.tokens.retain(|_, id| id != &player_id);
                if let Some(game) = state.game.as_mut() {
                    simulation::kill_player(game, &player_id, now);
                }
                let roster = state.roster();
                state.broadcast(&ServerEvent::PlayerLeft(PlayerLeftPayload {
                    player_name: name,
                    reason: "disconnected".to_string(),
                    was_host,
                    players: roster,
                }));
                if was_host {
                    self.elect_new_host(&mut state);
                }
                state.broadcast_game_state();
                if state.connected_human_count() <= 1 {
                    if let Some(game) = state.game.as_mut() {
                        simulation::check_win_condition(game, false, now);
                    }
                    self.end_game(&mut state, EndReason::AllPlayersDisconnected, now);
                }
            }
            GameMode::Solo | GameMode::Single if game_running => {
                // Pause and park the ticker; the token stays valid for the
                // reconnect grace window.
                if let Some(game) = state.game.as_mut() {
                    if !game.paused {
                        game.paused = true;
                        game.pause_started_at_ms = now;
                    }
                }
                state.ticker_stop = true;
                let room = Arc::clone(self);
                let task_player = player_id.clone();
                state.disconnect_tasks.insert(
                    player_id.clone(),
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(SOLO_DISCONNECT_GRACE_MS)).await;
                        room.expire_solo_disconnect(&task_player).await;
                    }),
                );
            }
            _ => {
                // Lobby/Ready: membership and token survive the grace window.
                let room = Arc::clone(self);
                let task_player = player_id.clone();
                state.disconnect_tasks.insert(
                    player_id.clone(),
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(LOBBY_DISCONNECT_GRACE_MS)).await;
                        room.expire_lobby_disconnect(&task_player).await;
                    }),
                );
            }
        }
    }

    async fn expire_lobby_disconnect(self: Arc<Self>, player_id: &str) {
        let mut state = self.state.lock().await;
        state.disconnect_tasks.remove(player_id);
        let still_disconnected = state
            .participants
            .get(player_id)
            .map(|member| member.disconnected)
            .unwrap_or(false);
        if !still_disconnected || state.disposed {
            return;
        }
        let was_host = state
            .participants
            .get(player_id)
            .map(|member| member.is_host)
            .unwrap_or(false);
        let gone_since_ms = state
            .participants
            .get(player_id)
            .and_then(|member| member.disconnected_at_ms)
            .unwrap_or(0);
        let name = state.remove_membership(player_id);
        tracing::info!(room_code = %self.code, player = %name, gone_since_ms, "lobby_disconnect_expired");
        let roster = state.roster();
        state.broadcast(&ServerEvent::PlayerLeft(PlayerLeftPayload {
            player_name: name,
            reason: "disconnected".to_string(),
            was_host,
            players: roster,
        }));
        let only_npcs_left = state
            .participants
            .values()
            .all(|member| member.kind == PlayerKind::Npc);
        if state.participants.is_empty() || only_npcs_left {
            self.dispose(&mut state, EndReason::AllPlayersDisconnected);
            return;
        }
        if was_host {
            self.elect_new_host(&mut state);
        }
        self.publish_public_rooms(&state);
    }

    async fn expire_solo_disconnect(self: Arc<Self>, player_id: &str) {
        let mut state = self.state.lock().await;
        state.disconnect_tasks.remove(player_id);
        let still_disconnected = state
            .participants
            .get(player_id)
            .map(|member| member.disconnected)
            .unwrap_or(false);
        if !still_disconnected || state.disposed || state.game_over_sent {
            return;
        }
        let now = now_millis();
        if let Some(game) = state.game.as_mut() {
            simulation::kill_player(game, player_id, now);
            simulation::check_win_condition(game, false, now);
        }
        self.end_game(&mut state, EndReason::AllPlayersDisconnected, now);
    }

    /// Solo/single reconnection path, and the generic state refresh.
    pub async fn request_game_state(
        self: &Arc<Self>,
        conn_id: &str,
        tx: mpsc::UnboundedSender<String>,
        player_token: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(token) = player_token {
            if let Some(player_id) = state.tokens.get(token).cloned() {
                let _ = self.reattach(&mut state, conn_id, tx, &player_id);
                state.broadcast_game_state();
                return;
            }
        }
        if state.player_for_conn(conn_id).is_some() {
            if state.game.is_some() {
                state.broadcast_game_state();
            } else {
                state.send_to_conn(
                    conn_id,
                    &ServerEvent::GameStateError(GameStateErrorPayload {
                        message: "No active game in this room".to_string(),
                        room_code: self.code.clone(),
                    }),
                );
            }
            return;
        }
        state.send_to_conn(
            conn_id,
            &ServerEvent::GameStateError(GameStateErrorPayload {
                message: "Unable to restore session".to_string(),
                room_code: self.code.clone(),
            }),
        );
    }

    // ---- chat -----------------------------------------------------------

    pub async fn chat(self: &Arc<Self>, conn_id: &str, message: &str) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let name = state
            .participants
            .get(&player_id)
            .map(|member| member.name.clone())
            .ok_or(RoomError::NotInRoom)?;
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(RoomError::Validation("Message is empty".to_string()));
        }
        let now = now_millis();
        if let Some(last) = state.last_chat_at_ms.get(&player_id) {
            if now - last < CHAT_RATE_MS {
                // Rate-limited sends are dropped without an error reply.
                return Ok(());
            }
        }
        state.last_chat_at_ms.insert(player_id, now);
        let capped: String = trimmed.chars().take(protocol::MAX_CHAT_LENGTH).collect();
        state.broadcast(&ServerEvent::ChatMessage(protocol::ChatBroadcastPayload {
            player_name: name,
            message: capped,
            epoch_ms: now,
        }));
        Ok(())
    }

    // ---- options / visibility -------------------------------------------

    pub async fn toggle_public(self: &Arc<Self>, conn_id: &str, payload: &TogglePublicRoomPayload) {
        let mut state = self.state.lock().await;
        let requester = state
            .player_for_conn(conn_id)
            .and_then(|id| state.participants.get(&id).cloned());
        let Some(requester) = requester else {
            state.send_public_status(conn_id, &self.code, false, Some("You are not in this room"));
            return;
        };
        if !requester.is_host {
            let is_public = state.is_public;
            state.send_public_status(
                conn_id,
                &self.code,
                is_public,
                Some("Only the host can change room visibility"),
            );
            return;
        }
        if state.mode != GameMode::Multi || state.started {
            let is_public = state.is_public;
            state.send_public_status(
                conn_id,
                &self.code,
                is_public,
                Some("Room visibility can only change in the lobby"),
            );
            return;
        }
        state.is_public = payload.is_public.unwrap_or(!state.is_public);
        let is_public = state.is_public;
        tracing::info!(room_code = %self.code, is_public, "room_visibility_changed");
        state.send_public_status(conn_id, &self.code, is_public, None);
        self.publish_public_rooms(&state);
    }

    pub async fn update_options(
        self: &Arc<Self>,
        conn_id: &str,
        payload: &UpdateGameOptionsPayload,
    ) -> Result<(), RoomError> {
        let mut state = self.state.lock().await;
        let player_id = state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        let is_host = state
            .participants
            .get(&player_id)
            .map(|member| member.is_host)
            .unwrap_or(false);
        if !is_host {
            return Err(RoomError::Authorization(
                "Only the host can change game options".to_string(),
            ));
        }
        if state.started {
            return Err(RoomError::State(
                "Options are locked once the game starts".to_string(),
            ));
        }
        let patch = &payload.game_options;
        if let Some(Some(minutes)) = patch.time_limit {
            if !protocol::TIME_LIMIT_CHOICES.contains(&minutes) {
                return Err(RoomError::Validation(format!(
                    "timeLimit must be one of {:?} minutes",
                    protocol::TIME_LIMIT_CHOICES
                )));
            }
        }
        if let Some(wall_mode) = patch.wall_mode {
            state.options.wall_mode = wall_mode;
        }
        if let Some(strict_mode) = patch.strict_mode {
            state.options.strict_mode = strict_mode;
        }
        if let Some(time_limit) = patch.time_limit {
            state.options.time_limit = time_limit;
        }
        let game_options = state.options;
        state.broadcast(&ServerEvent::GameOptionsUpdated(
            protocol::GameOptionsUpdatedPayload { game_options },
        ));
        Ok(())
    }

    pub async fn request_options(self: &Arc<Self>, conn_id: &str) -> Result<(), RoomError> {
        let state = self.state.lock().await;
        state.player_for_conn(conn_id).ok_or(RoomError::NotInRoom)?;
        state.send_to_conn(
            conn_id,
            &ServerEvent::GameOptionsUpdated(protocol::GameOptionsUpdatedPayload {
                game_options: state.options,
            }),
        );
        Ok(())
    }

    // ---- end / cleanup ---------------------------------------------------

    fn end_game(self: &Arc<Self>, state: &mut RoomState, reason: EndReason, now: i64) {
        if state.game_over_sent {
            return;
        }
        let Some(game) = state.game.as_ref() else {
            return;
        };
        let winner = game.winner.clone();
        let alive_players: Vec<String> = game
            .players
            .values()
            .filter(|player| player.alive)
            .map(|player| player.name.clone())
            .collect();
        let dead_players: Vec<String> = game
            .players
            .values()
            .filter(|player| !player.alive)
            .map(|player| player.name.clone())
            .collect();
        let payload = GameEndedPayload {
            winner: winner.clone(),
            game_state: snapshot(game),
            game_mode: state.mode,
            alive_players,
            dead_players,
            room_code: self.code.clone(),
        };
        state.game_over_sent = true;
        state.ticker_stop = true;
        tracing::info!(
            room_code = %self.code,
            reason = reason.as_str(),
            winner = winner.as_ref().map(|w| w.name.as_str()).unwrap_or("-"),
            "game_ended"
        );
        state.broadcast(&ServerEvent::GameEnded(payload));

        if let Some(uid) = state.session_uid.clone() {
            let session_reason = if reason == EndReason::WinnerDeclared && winner.is_none() {
                EndReason::GameEnded
            } else {
                reason
            };
            self.shared.registry.close(
                &uid,
                session_reason,
                now,
                winner.map(|w| (w.name, w.score)),
            );
        }

        match state.mode {
            GameMode::Multi => {
                // Leave the room up briefly so clients can show the game-over
                // screen, then tear it down.
                let room = Arc::clone(self);
                if let Some(previous) = state.cleanup_task.take() {
                    previous.abort();
                }
                state.cleanup_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ROOM_CLEANUP_MS)).await;
                    let mut state = room.state.lock().await;
                    state.cleanup_task = None;
                    room.dispose(&mut state, EndReason::RoomDeleted);
                }));
            }
            GameMode::Solo | GameMode::Single => {
                self.dispose(state, reason);
            }
        }
    }

    fn force_crash_end(self: &Arc<Self>, state: &mut RoomState) {
        let now = now_millis();
        if let Some(game) = state.game.as_mut() {
            simulation::check_win_condition(game, false, now);
        }
        self.end_game(state, EndReason::Crashed, now);
        self.dispose(state, EndReason::Crashed);
    }

    pub(crate) fn dispose(self: &Arc<Self>, state: &mut RoomState, reason: EndReason) {
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.ticker_stop = true;
        if let Some(task) = state.countdown_task.take() {
            task.abort();
        }
        if let Some(task) = state.resume_countdown_task.take() {
            task.abort();
        }
        if let Some(task) = state.cleanup_task.take() {
            task.abort();
        }
        for (_, task) in state.disconnect_tasks.drain() {
            task.abort();
        }
        if let Some(uid) = state.session_uid.clone() {
            self.shared.registry.close(&uid, reason, now_millis(), None);
        }
        tracing::info!(room_code = %self.code, reason = reason.as_str(), "room_disposed");

        self.shared.rooms.remove(&self.code);
        for conn_id in state.conns.keys() {
            self.shared.clear_room_binding(conn_id);
        }
        {
            let mut index = self
                .shared
                .public_rooms
                .write()
                .expect("public room index lock");
            index.remove(&self.code);
        }
        self.shared.broadcast_public_rooms();
    }

    // ---- helpers ---------------------------------------------------------

    fn elect_new_host(self: &Arc<Self>, state: &mut RoomState) {
        let candidates: Vec<String> = state
            .join_order
            .iter()
            .filter(|id| {
                state
                    .participants
                    .get(*id)
                    .map(|member| member.kind == PlayerKind::Human)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            return;
        }
        let chosen = if state.started {
            let mut rng = rand::thread_rng();
            candidates[rng.gen_range(0..candidates.len())].clone()
        } else {
            candidates[0].clone()
        };
        for member in state.participants.values_mut() {
            member.is_host = member.id == chosen;
        }
        if let Some(game) = state.game.as_mut() {
            for player in game.players.values_mut() {
                player.is_host = player.id == chosen;
            }
        }
        let new_host_name = state
            .participants
            .get(&chosen)
            .map(|member| member.name.clone())
            .unwrap_or_default();
        tracing::info!(room_code = %self.code, new_host = %new_host_name, "host_changed");
        state.broadcast(&ServerEvent::HostChanged(HostChangedPayload {
            new_host_id: chosen,
            new_host_name,
        }));
    }

    fn publish_public_rooms(self: &Arc<Self>, state: &RoomState) {
        let eligible = state.mode == GameMode::Multi
            && state.is_public
            && !state.started
            && state.countdown_task.is_none()
            && (1..=MAX_ROOM_PLAYERS - 1).contains(&state.participants.len());
        {
            let mut index = self
                .shared
                .public_rooms
                .write()
                .expect("public room index lock");
            if eligible {
                let host_name = state
                    .participants
                    .values()
                    .find(|member| member.is_host)
                    .map(|member| member.name.clone())
                    .unwrap_or_default();
                index.insert(
                    self.code.clone(),
                    PublicRoomInfo {
                        room_code: self.code.clone(),
                        player_count: state.participants.len(),
                        max_players: MAX_ROOM_PLAYERS,
                        host_name,
                    },
                );
            } else {
                index.remove(&self.code);
            }
        }
        self.shared.broadcast_public_rooms();
    }
}

impl RoomState {
    pub(crate) fn player_for_conn(&self, conn_id: &str) -> Option<String> {
        self.conn_to_player.get(conn_id).cloned()
    }

    pub(crate) fn connected_human_count(&self) -> usize {
        self.participants
            .values()
            .filter(|member| member.kind == PlayerKind::Human && !member.disconnected)
            .count()
    }

    pub(crate) fn roster(&self) -> Vec<RosterEntry> {
        self.join_order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .map(|member| RosterEntry {
                player_id: member.id.clone(),
                player_name: member.name.clone(),
                is_host: member.is_host,
            })
            .collect()
    }

    /// Removes a player from the room entirely: membership, token, ready
    /// mark, and the connection's room binding. Returns the display name.
    pub(crate) fn remove_membership(&mut self, player_id: &str) -> String {
        self.ready.remove(player_id);
        self.tokens.retain(|_, id| id != player_id);
        self.join_order.retain(|id| id != player_id);
        self.last_chat_at_ms.remove(player_id);
        if let Some(task) = self.disconnect_tasks.remove(player_id) {
            task.abort();
        }
        let Some(member) = self.participants.remove(player_id) else {
            return String::new();
        };
        if let Some(conn_id) = member.conn_id.as_deref() {
            self.conn_to_player.remove(conn_id);
            self.conns.remove(conn_id);
        }
        member.name
    }

    pub(crate) fn send_to_conn(&self, conn_id: &str, event: &ServerEvent) {
        if let Some(tx) = self.conns.get(conn_id) {
            let _ = tx.send(protocol::encode_server_event(event));
        }
    }

    pub(crate) fn send_to_player(&self, player_id: &str, event: &ServerEvent) {
        let conn = self
            .participants
            .get(player_id)
            .and_then(|member| member.conn_id.as_deref());
        if let Some(conn_id) = conn {
            self.send_to_conn(conn_id, event);
        }
    }

    pub(crate) fn broadcast(&self, event: &ServerEvent) {
        let frame = protocol::encode_server_event(event);
        for tx in self.conns.values() {
            let _ = tx.send(frame.clone());
        }
    }

    pub(crate) fn broadcast_game_state(&self) {
        if let Some(game) = self.game.as_ref() {
            self.broadcast(&ServerEvent::GameStateUpdate(GameStateUpdatePayload {
                game_state: snapshot(game),
            }));
        }
    }

    fn send_public_status(
        &self,
        conn_id: &str,
        room_code: &str,
        is_public: bool,
        error: Option<&str>,
    ) {
        self.send_to_conn(
            conn_id,
            &ServerEvent::PublicRoomStatus(protocol::PublicRoomStatusPayload {
                room_code: room_code.to_string(),
                is_public,
                error: error.map(|message| message.to_string()),
            }),
        );
    }
}
