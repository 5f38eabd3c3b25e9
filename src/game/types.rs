use super::grid::{Direction, Position};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MAX_ROOM_PLAYERS: usize = 4;
pub const FOOD_SCORE: i64 = 10;
pub const SURVIVAL_BONUS: i64 = 50;
pub const LAST_SURVIVOR_HOLD_MS: i64 = 5_000;
pub const PAUSE_BUDGET_MS: i64 = 15 * 60 * 1000;

/// Fixed palette assigned by join order.
pub const COLOR_PALETTE: [&str; 4] = ["#ff6b6b", "#ffd166", "#06d6a0", "#4dabf7"];

/// Corner anchors assigned by join order mod 4, paired with a starting
/// direction that points away from the nearest wall.
pub fn start_anchor(index: usize) -> (Position, Direction) {
    use super::grid::{GRID_HEIGHT as H, GRID_WIDTH as W};
    match index % 4 {
        0 => (Position::new(5, 5), Direction::Right),
        1 => (Position::new(W - 6, H - 6), Direction::Left),
        2 => (Position::new(5, H - 6), Direction::Right),
        _ => (Position::new(W - 6, 5), Direction::Left),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Multi,
    Single,
    Solo,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Multi => "multi",
            GameMode::Single => "single",
            GameMode::Solo => "solo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerKind {
    Human,
    Npc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerupKind {
    SpeedBoost,
    Shield,
    Shrink,
    SlowOthers,
}

pub const ALL_POWERUP_KINDS: [PowerupKind; 4] = [
    PowerupKind::SpeedBoost,
    PowerupKind::Shield,
    PowerupKind::Shrink,
    PowerupKind::SlowOthers,
];

/// Effect keys stored on players. `Slowed` is applied to victims of
/// `slowOthers`; the rest mirror the collected power-up kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectKind {
    SpeedBoost,
    Shield,
    Shrink,
    Slowed,
}

impl PowerupKind {
    pub fn effect(self) -> EffectKind {
        match self {
            PowerupKind::SpeedBoost => EffectKind::SpeedBoost,
            PowerupKind::Shield => EffectKind::Shield,
            PowerupKind::Shrink => EffectKind::Shrink,
            PowerupKind::SlowOthers => EffectKind::Slowed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerupItem {
    pub id: String,
    pub position: Position,
    #[serde(rename = "type")]
    pub kind: PowerupKind,
    pub spawned_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    pub wall_mode: bool,
    pub strict_mode: bool,
    /// Minutes, one of 3/5/10/15; `None` means untimed.
    pub time_limit: Option<u32>,
}

impl Default for GameOptions {
    fn default() -> Self {
        Self {
            wall_mode: false,
            strict_mode: false,
            time_limit: None,
        }
    }
}

impl GameOptions {
    pub fn time_limit_ms(&self) -> Option<i64> {
        self.time_limit.map(|minutes| i64::from(minutes) * 60_000)
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub kind: PlayerKind,
    pub color: String,
    pub snake: Vec<Position>,
    pub direction: Direction,
    pub queued_direction: Direction,
    pub score: i64,
    pub alive: bool,
    pub is_host: bool,
    pub control_scheme: String,
    pub survival_start_ms: i64,
    pub survival_duration_ms: i64,
    pub speed_accumulator: f64,
    pub active_powerups: HashMap<EffectKind, i64>,
    pub inactivity_warned: bool,
}

impl Player {
    pub fn head(&self) -> Position {
        self.snake[0]
    }

    pub fn is_human(&self) -> bool {
        self.kind == PlayerKind::Human
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub id: String,
    pub name: String,
    pub score: i64,
    pub is_loser: bool,
}

#[derive(Debug, Clone)]
pub struct GameState {
    pub players: HashMap<String, Player>,
    /// Join order of player ids; drives color/anchor assignment and stable
    /// snapshot ordering.
    pub player_order: Vec<String>,
    pub food: Vec<Position>,
    pub powerups: Vec<PowerupItem>,
    pub tick: u64,
    pub start_epoch_ms: i64,
    pub timer_seconds: i64,
    pub paused: bool,
    pub pause_started_at_ms: i64,
    pub total_pause_ms: i64,
    pub last_input_at_ms: HashMap<String, i64>,
    pub last_input_tick: HashMap<String, u64>,
    pub level: u32,
    pub total_food_eaten: u32,
    pub options: GameOptions,
    pub mode: GameMode,
    pub winner: Option<Winner>,
    pub last_survivor_since_ms: Option<i64>,
    /// Power-up spawner bookkeeping; 0 until the first spawner pass.
    pub last_powerup_spawn_ms: i64,
    pub next_powerup_delay_ms: i64,
}

impl GameState {
    pub fn new(mode: GameMode, options: GameOptions) -> Self {
        Self {
            players: HashMap::new(),
            player_order: Vec::new(),
            food: Vec::new(),
            powerups: Vec::new(),
            tick: 0,
            start_epoch_ms: 0,
            timer_seconds: 0,
            paused: false,
            pause_started_at_ms: 0,
            total_pause_ms: 0,
            last_input_at_ms: HashMap::new(),
            last_input_tick: HashMap::new(),
            level: 1,
            total_food_eaten: 0,
            options,
            mode,
            winner: None,
            last_survivor_since_ms: None,
            last_powerup_spawn_ms: 0,
            next_powerup_delay_ms: 0,
        }
    }

    pub fn add_player(&mut self, player: Player) {
        self.player_order.push(player.id.clone());
        self.players.insert(player.id.clone(), player);
    }

    /// Players in join order, skipping ids that have since been removed.
    pub fn ordered_players(&self) -> impl Iterator<Item = &Player> {
        self.player_order
            .iter()
            .filter_map(|id| self.players.get(id))
    }

    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|player| player.alive).count()
    }

    pub fn human_count(&self) -> usize {
        self.players
            .values()
            .filter(|player| player.is_human())
            .count()
    }

    pub fn started(&self) -> bool {
        self.start_epoch_ms > 0
    }

    /// True when the cell is free of alive snakes, food, and power-ups.
    pub fn cell_is_free(&self, pos: Position) -> bool {
        if self.food.contains(&pos) {
            return false;
        }
        if self.powerups.iter().any(|item| item.position == pos) {
            return false;
        }
        !self
            .players
            .values()
            .filter(|player| player.alive)
            .any(|player| player.snake.contains(&pos))
    }
}

/// Per-player wire snapshot, camelCase per the client contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: String,
    pub name: String,
    pub kind: PlayerKind,
    pub color: String,
    pub control_scheme: String,
    pub snake: Vec<Position>,
    pub direction: Direction,
    pub score: i64,
    pub alive: bool,
    pub is_host: bool,
    pub active_powerups: HashMap<EffectKind, i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub food: Vec<Position>,
    pub powerups: Vec<PowerupItem>,
    pub tick: u64,
    pub timer_seconds: i64,
    pub level: u32,
    pub total_food_eaten: u32,
    pub paused: bool,
    pub started: bool,
    pub game_options: GameOptions,
    pub winner: Option<Winner>,
}

pub fn snapshot(state: &GameState) -> GameStateSnapshot {
    GameStateSnapshot {
        players: state
            .ordered_players()
            .map(|player| PlayerSnapshot {
                id: player.id.clone(),
                name: player.name.clone(),
                kind: player.kind,
                color: player.color.clone(),
                control_scheme: player.control_scheme.clone(),
                snake: player.snake.clone(),
                direction: player.direction,
                score: player.score,
                alive: player.alive,
                is_host: player.is_host,
                active_powerups: player.active_powerups.clone(),
            })
            .collect(),
        food: state.food.clone(),
        powerups: state.powerups.clone(),
        tick: state.tick,
        timer_seconds: state.timer_seconds,
        level: state.level,
        total_food_eaten: state.total_food_eaten,
        paused: state.paused,
        started: state.started(),
        game_options: state.options,
        winner: state.winner.clone(),
    }
}
