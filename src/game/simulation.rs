use super::grid::{self, Position, GRID_HEIGHT, GRID_WIDTH};
use super::powerups::{self, Collection, PowerupService};
use super::types::{
    start_anchor, GameMode, GameState, Player, PlayerKind, Winner, EffectKind, FOOD_SCORE,
    LAST_SURVIVOR_HOLD_MS, SURVIVAL_BONUS,
};
use rand::Rng;
use std::collections::HashMap;

pub const MAX_TICK_RATE: f64 = 16.0;
pub const FOODS_PER_LEVEL: u32 = 5;

const FOOD_SPAWN_ATTEMPTS: usize = 64;

pub fn level_for(total_food_eaten: u32) -> u32 {
    total_food_eaten / FOODS_PER_LEVEL + 1
}

/// Ticks per second for a level. Solo runs a hair faster so the single snake
/// keeps pressure without opponents.
pub fn tick_rate(level: u32, mode: GameMode) -> f64 {
    let base = 5.0 + 2.0 * f64::from(level.saturating_sub(1));
    match mode {
        GameMode::Solo => (base * 1.015).min(MAX_TICK_RATE),
        GameMode::Multi | GameMode::Single => base.min(MAX_TICK_RATE),
    }
}

pub fn tick_period_ms(level: u32, mode: GameMode) -> u64 {
    (1000.0 / tick_rate(level, mode)).round().max(1.0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    Wall,
    SelfHit,
    HeadToHead,
    HeadToBody,
}

impl CollisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollisionKind::Wall => "wall",
            CollisionKind::SelfHit => "self",
            CollisionKind::HeadToHead => "head-to-head",
            CollisionKind::HeadToBody => "head-to-body",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Death {
    pub player_id: String,
    pub player_name: String,
    pub kind: CollisionKind,
}

/// Combined outcome of a whole test-driven tick; production code composes
/// `begin_tick`/`finish_tick` itself to interleave the watchdog and NPC
/// phases.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub collections: Vec<Collection>,
    pub deaths: Vec<Death>,
    pub timeout_reached: bool,
    pub respawned_npc: Option<String>,
}

#[derive(Debug, Default)]
pub struct BeginOutcome {
    pub collections: Vec<Collection>,
    pub timed_out: bool,
}

#[derive(Debug, Default)]
pub struct FinishOutcome {
    pub deaths: Vec<Death>,
    pub respawned_npc: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputReject {
    UnknownPlayer,
    PlayerDead,
    AlreadyThisTick,
    Reversal,
}

impl InputReject {
    pub fn reason(self) -> &'static str {
        match self {
            InputReject::UnknownPlayer => "unknown_player",
            InputReject::PlayerDead => "player_dead",
            InputReject::AlreadyThisTick => "one_input_per_tick",
            InputReject::Reversal => "reverse_direction",
        }
    }
}

/// Queues a direction change, enforcing the one-input-per-tick gate and the
/// no-reversal rule against the currently queued heading.
pub fn handle_input(
    state: &mut GameState,
    player_id: &str,
    direction: grid::Direction,
    now: i64,
) -> Result<(), InputReject> {
    let current_tick = state.tick;
    let Some(player) = state.players.get_mut(player_id) else {
        return Err(InputReject::UnknownPlayer);
    };
    if !player.alive {
        return Err(InputReject::PlayerDead);
    }
    if state.last_input_tick.get(player_id) == Some(&current_tick) {
        return Err(InputReject::AlreadyThisTick);
    }
    if !grid::is_turn_allowed(player.queued_direction, direction)
        || !grid::is_turn_allowed(player.direction, direction)
    {
        return Err(InputReject::Reversal);
    }
    player.queued_direction = direction;
    player.inactivity_warned = false;
    state.last_input_at_ms.insert(player_id.to_string(), now);
    state.last_input_tick.insert(player_id.to_string(), current_tick);
    Ok(())
}

/// Marks a player dead outside of movement (quit, kick, disconnect).
pub fn kill_player(state: &mut GameState, player_id: &str, now: i64) {
    if let Some(player) = state.players.get_mut(player_id) {
        if player.alive {
            player.alive = false;
            player.survival_duration_ms = now - player.survival_start_ms;
        }
        player.active_powerups.clear();
    }
}

pub fn spawn_player(
    id: String,
    name: String,
    kind: PlayerKind,
    index: usize,
    is_host: bool,
    control_scheme: String,
    now: i64,
) -> Player {
    use super::types::COLOR_PALETTE;
    let (anchor, direction) = start_anchor(index);
    Player {
        id,
        name,
        kind,
        color: COLOR_PALETTE[index % COLOR_PALETTE.len()].to_string(),
        snake: vec![anchor],
        direction,
        queued_direction: direction,
        score: 0,
        alive: true,
        is_host,
        control_scheme,
        survival_start_ms: now,
        survival_duration_ms: 0,
        speed_accumulator: 0.0,
        active_powerups: HashMap::new(),
        inactivity_warned: false,
    }
}

pub fn spawn_food(state: &mut GameState, rng: &mut impl Rng) {
    for _ in 0..FOOD_SPAWN_ATTEMPTS {
        let candidate = Position::new(rng.gen_range(0..GRID_WIDTH), rng.gen_range(0..GRID_HEIGHT));
        if state.cell_is_free(candidate) {
            state.food.push(candidate);
            return;
        }
    }
    // Dense board: fall back to a scan so a food target always exists.
    let free: Vec<Position> = (0..GRID_WIDTH)
        .flat_map(|x| (0..GRID_HEIGHT).map(move |y| Position::new(x, y)))
        .filter(|pos| state.cell_is_free(*pos))
        .collect();
    if free.is_empty() {
        return;
    }
    let pos = free[rng.gen_range(0..free.len())];
    state.food.push(pos);
}

/// Opening phase of a tick: advance the counter and timer, check the time
/// limit, and run the power-up module. The room actor runs the inactivity
/// watchdog and NPC decisions between this and `finish_tick`.
pub fn begin_tick(
    state: &mut GameState,
    powerup_service: &PowerupService,
    now: i64,
    rng: &mut impl Rng,
) -> BeginOutcome {
    let mut outcome = BeginOutcome::default();
    state.tick += 1;

    let elapsed = now - state.start_epoch_ms - state.total_pause_ms;
    state.timer_seconds = elapsed / 1000;
    if let Some(limit) = state.options.time_limit_ms() {
        if elapsed >= limit {
            outcome.timed_out = true;
            check_win_condition(state, true, now);
            return outcome;
        }
    }

    powerup_service.maybe_spawn(state, now, rng);
    outcome.collections = powerup_service.check_collect(state, now);
    powerup_service.tick(state, now);
    outcome
}

/// Movement, collisions, win check, and (single mode) NPC respawn.
pub fn finish_tick(state: &mut GameState, now: i64, rng: &mut impl Rng) -> FinishOutcome {
    let mut outcome = FinishOutcome::default();
    run_movement(state, now, rng, &mut outcome.deaths);

    if state.winner.is_none() {
        check_win_condition(state, false, now);
    }

    if state.winner.is_none() && state.mode == GameMode::Single {
        outcome.respawned_npc = maybe_respawn_npc(state, now, rng);
    }

    outcome
}

/// One full tick of an unpaused, started game, without the watchdog and NPC
/// phases the room actor inserts between the halves. Test helper only.
#[cfg(test)]
pub fn advance_tick(
    state: &mut GameState,
    powerup_service: &PowerupService,
    now: i64,
    rng: &mut impl Rng,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();
    let begin = begin_tick(state, powerup_service, now, rng);
    outcome.collections = begin.collections;
    if begin.timed_out {
        outcome.timeout_reached = true;
        return outcome;
    }
    let finish = finish_tick(state, now, rng);
    outcome.deaths = finish.deaths;
    outcome.respawned_npc = finish.respawned_npc;
    outcome
}

fn run_movement(state: &mut GameState, now: i64, rng: &mut impl Rng, deaths: &mut Vec<Death>) {
    let alive_ids: Vec<String> = state
        .players
        .values()
        .filter(|player| player.alive)
        .map(|player| player.id.clone())
        .collect();
    if alive_ids.is_empty() {
        return;
    }

    let mut max_steps = 0u32;
    for id in &alive_ids {
        let factor = powerups::speed_factor(&state.players[id], now);
        let player = state.players.get_mut(id).expect("alive id");
        player.speed_accumulator += factor;
        max_steps = max_steps.max(player.speed_accumulator.floor() as u32);
    }

    for _ in 0..max_steps {
        let movers: Vec<String> = alive_ids
            .iter()
            .filter(|id| {
                state
                    .players
                    .get(*id)
                    .map(|player| player.alive && player.speed_accumulator >= 1.0)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        if movers.is_empty() {
            break;
        }
        for id in &movers {
            if let Some(player) = state.players.get_mut(id) {
                player.speed_accumulator -= 1.0;
            }
        }
        movement_substep(state, &movers, now, rng, deaths);

        check_win_condition(state, false, now);
        if state.winner.is_some() {
            break;
        }
    }
}

/// All movers of one sub-step advance together: directions commit, head-to-head
/// groups are arbitrated, then each surviving head is checked against the
/// pre-move board.
fn movement_substep(
    state: &mut GameState,
    movers: &[String],
    now: i64,
    rng: &mut impl Rng,
    deaths: &mut Vec<Death>,
) {
    let wall_mode = state.options.wall_mode;
    let strict_mode = state.options.strict_mode;
    let mode = state.mode;
    let pass_through = mode == GameMode::Multi && !wall_mode && !strict_mode;

    let mut new_heads: HashMap<String, Position> = HashMap::with_capacity(movers.len());
    for id in movers {
        let Some(player) = state.players.get_mut(id) else {
            continue;
        };
        player.direction = player.queued_direction;
        new_heads.insert(id.clone(), grid::step(player.head(), player.direction, wall_mode));
    }

    let mut dead: HashMap<String, CollisionKind> = HashMap::new();

    // Head-to-head arbitration.
    let mut groups: HashMap<Position, Vec<String>> = HashMap::new();
    for (id, head) in &new_heads {
        groups.entry(*head).or_default().push(id.clone());
    }
    for group in groups.values() {
        if group.len() < 2 {
            continue;
        }
        if mode == GameMode::Single && is_mixed_kind_group(state, group) {
            continue;
        }
        if pass_through {
            continue;
        }
        let all_shielded = group.iter().all(|id| {
            state
                .players
                .get(id)
                .map(|player| powerups::is_active(player, EffectKind::Shield, now))
                .unwrap_or(false)
        });
        if all_shielded {
            continue;
        }
        for id in group {
            dead.insert(id.clone(), CollisionKind::HeadToHead);
        }
    }

    // Wall, self, and body collisions against the pre-move board.
    for id in movers {
        if dead.contains_key(id) {
            continue;
        }
        let Some(new_head) = new_heads.get(id).copied() else {
            continue;
        };
        let Some(player) = state.players.get(id) else {
            continue;
        };
        let shielded = powerups::is_active(player, EffectKind::Shield, now);

        let collision = check_other_collisions(state, player, new_head);
        if let Some(kind) = collision {
            if !shielded {
                dead.insert(id.clone(), kind);
            }
        }
    }

    for (id, kind) in &dead {
        kill_player(state, id, now);
        let name = state
            .players
            .get(id)
            .map(|player| player.name.clone())
            .unwrap_or_default();
        deaths.push(Death {
            player_id: id.clone(),
            player_name: name,
            kind: *kind,
        });
    }

    // Survivors move; food consumption retains the tail and respawns one food.
    for id in movers {
        if dead.contains_key(id) {
            continue;
        }
        let Some(new_head) = new_heads.get(id).copied() else {
            continue;
        };
        let ate = if let Some(index) = state.food.iter().position(|food| *food == new_head) {
            state.food.swap_remove(index);
            true
        } else {
            false
        };
        let Some(player) = state.players.get_mut(id) else {
            continue;
        };
        player.snake.insert(0, new_head);
        if ate {
            player.score += FOOD_SCORE;
            state.total_food_eaten += 1;
            state.level = level_for(state.total_food_eaten);
            spawn_food(state, rng);
        } else {
            player.snake.pop();
        }
    }
}

fn is_mixed_kind_group(state: &GameState, group: &[String]) -> bool {
    let mut has_human = false;
    let mut has_npc = false;
    for id in group {
        match state.players.get(id).map(|player| player.kind) {
            Some(PlayerKind::Human) => has_human = true,
            Some(PlayerKind::Npc) => has_npc = true,
            None => {}
        }
    }
    has_human && has_npc
}

fn check_other_collisions(
    state: &GameState,
    player: &Player,
    new_head: Position,
) -> Option<CollisionKind> {
    let wall_mode = state.options.wall_mode;
    let strict_mode = state.options.strict_mode;
    let mode = state.mode;

    if wall_mode && !new_head.in_bounds() {
        return Some(CollisionKind::Wall);
    }
    if player.snake.len() > 1 && player.snake[1..].contains(&new_head) {
        return Some(CollisionKind::SelfHit);
    }
    if mode == GameMode::Multi && !wall_mode && !strict_mode {
        return None;
    }
    for other in state.players.values() {
        if !other.alive || other.id == player.id {
            continue;
        }
        if mode == GameMode::Single && other.kind != player.kind {
            continue;
        }
        let hit = if strict_mode {
            other.snake.contains(&new_head)
        } else {
            other.snake[0] == new_head
        };
        if hit {
            return Some(CollisionKind::HeadToBody);
        }
    }
    None
}

fn effective_survival_ms(player: &Player, now: i64) -> i64 {
    if player.alive {
        now - player.survival_start_ms
    } else {
        player.survival_duration_ms
    }
}

fn sorted_standings(state: &GameState, now: i64) -> Vec<&Player> {
    let mut standings: Vec<&Player> = state.players.values().collect();
    standings.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.alive.cmp(&a.alive))
            .then(effective_survival_ms(b, now).cmp(&effective_survival_ms(a, now)))
    });
    standings
}

fn winner_from(player: &Player, is_loser: bool) -> Winner {
    Winner {
        id: player.id.clone(),
        name: player.name.clone(),
        score: player.score,
        is_loser,
    }
}

/// Resolves the end-of-game state. Returns true when a winner was set.
pub fn check_win_condition(state: &mut GameState, timeout_reached: bool, now: i64) -> bool {
    if state.winner.is_some() {
        return true;
    }
    if timeout_reached {
        for player in state.players.values_mut() {
            if player.alive {
                player.score += SURVIVAL_BONUS;
            }
        }
    }

    let humans = state.human_count();
    let total = state.players.len();
    let alive = state.alive_count();

    match state.mode {
        GameMode::Solo => {
            let Some(player) = state.players.values().next().cloned() else {
                return false;
            };
            if !player.alive {
                state.winner = Some(winner_from(&player, true));
            } else if timeout_reached {
                state.winner = Some(winner_from(&player, false));
            }
        }
        GameMode::Single if humans == 1 && total > 1 => {
            let human = state
                .players
                .values()
                .find(|player| player.is_human())
                .cloned();
            if let Some(human) = human {
                if !human.alive {
                    state.winner = Some(winner_from(&human, true));
                } else if timeout_reached {
                    state.winner = Some(winner_from(&human, false));
                }
            }
        }
        _ => {
            if timeout_reached {
                let winner = sorted_standings(state, now)
                    .first()
                    .map(|top| winner_from(top, false));
                state.winner = winner;
            } else if alive == 0 {
                let winner = sorted_standings(state, now)
                    .first()
                    .filter(|top| top.score >= 0)
                    .map(|top| winner_from(top, false));
                state.winner = winner;
            } else if alive == 1 && total > 1 {
                let total_score: i64 = state.players.values().map(|player| player.score).sum();
                if total_score == 0 {
                    // Everyone still at zero right after the start: hold the
                    // call for a few seconds so a spawn-instant death of the
                    // other snakes does not end the match immediately.
                    let since = *state.last_survivor_since_ms.get_or_insert(now);
                    if now - since < LAST_SURVIVOR_HOLD_MS {
                        return false;
                    }
                }
                if let Some(survivor_id) = state
                    .players
                    .values()
                    .find(|player| player.alive)
                    .map(|player| player.id.clone())
                {
                    if let Some(survivor) = state.players.get_mut(&survivor_id) {
                        survivor.score += SURVIVAL_BONUS;
                    }
                }
                let winner = sorted_standings(state, now)
                    .first()
                    .map(|top| winner_from(top, false));
                state.winner = winner;
            } else {
                state.last_survivor_since_ms = None;
            }
        }
    }
    state.winner.is_some()
}

/// Single mode keeps exactly one NPC on the board while the human lives.
fn maybe_respawn_npc(state: &mut GameState, now: i64, rng: &mut impl Rng) -> Option<String> {
    let human_alive = state
        .players
        .values()
        .any(|player| player.is_human() && player.alive);
    if !human_alive {
        return None;
    }
    let any_npc_alive = state
        .players
        .values()
        .any(|player| player.kind == PlayerKind::Npc && player.alive);
    if any_npc_alive {
        return None;
    }

    let npc_id = state
        .player_order
        .iter()
        .find(|id| {
            state
                .players
                .get(*id)
                .map(|player| player.kind == PlayerKind::Npc)
                .unwrap_or(false)
        })
        .cloned()?;

    let spawn = free_corner_anchor(state).or_else(|| random_free_spawn(state, rng));
    let (position, direction) = spawn?;

    let player = state.players.get_mut(&npc_id)?;
    player.snake = vec![position];
    player.direction = direction;
    player.queued_direction = direction;
    player.score = 0;
    player.alive = true;
    player.speed_accumulator = 0.0;
    player.active_powerups.clear();
    player.survival_start_ms = now;
    player.survival_duration_ms = 0;
    Some(npc_id)
}

fn free_corner_anchor(state: &GameState) -> Option<(Position, grid::Direction)> {
    (0..4)
        .map(start_anchor)
        .find(|(pos, _)| state.cell_is_free(*pos))
}

fn random_free_spawn(
    state: &GameState,
    rng: &mut impl Rng,
) -> Option<(Position, grid::Direction)> {
    for _ in 0..FOOD_SPAWN_ATTEMPTS {
        let candidate = Position::new(rng.gen_range(0..GRID_WIDTH), rng.gen_range(0..GRID_HEIGHT));
        if state.cell_is_free(candidate) {
            let direction = if candidate.x < GRID_WIDTH / 2 {
                grid::Direction::Right
            } else {
                grid::Direction::Left
            };
            return Some((candidate, direction));
        }
    }
    None
}
