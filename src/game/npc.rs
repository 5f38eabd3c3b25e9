use super::grid::{
    self, board_center, manhattan_distance, wall_distance, Direction, Position, ALL_DIRECTIONS,
};
use super::types::{GameState, Player};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NPC_NAMES: [&str; 3] = ["Bot-Alpha", "Bot-Beta", "Bot-Gamma"];
pub const DEFAULT_NPC_DIFFICULTIES: [Difficulty; 3] =
    [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

/// Ticks are 1000/tickRate ms but the reaction delay is quantized against a
/// fixed 50 ms step so difficulty feels the same across levels.
const DECISION_TICK_MS: f64 = 50.0;
/// Candidates within this margin of the best score count as near-best for the
/// randomness pick.
const NEAR_BEST_MARGIN: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Balanced,
    Hunter,
    Survivor,
    Forager,
}

/// Slider triple, each in 1..=5 with 3 as the neutral midpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NpcTuning {
    pub speed: u8,
    pub skill: u8,
    pub boldness: u8,
}

impl Default for NpcTuning {
    fn default() -> Self {
        Self {
            speed: 3,
            skill: 3,
            boldness: 3,
        }
    }
}

impl NpcTuning {
    fn clamped(self) -> Self {
        Self {
            speed: self.speed.clamp(1, 5),
            skill: self.skill.clamp(1, 5),
            boldness: self.boldness.clamp(1, 5),
        }
    }
}

/// Wire-side NPC configuration accepted from `startSinglePlayer`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NpcConfig {
    pub name: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub profile: Option<Profile>,
    pub tuning: Option<NpcTuning>,
}

impl Default for NpcConfig {
    fn default() -> Self {
        Self {
            name: None,
            difficulty: None,
            profile: None,
            tuning: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NpcState {
    pub id: String,
    pub name: String,
    pub difficulty: Difficulty,
    pub profile: Profile,
    pub tuning: NpcTuning,
    pub target_food: Option<Position>,
    pub last_direction: Option<Direction>,
    pub decision_delay_ticks: u32,
}

impl NpcState {
    pub fn new(
        id: String,
        name: String,
        difficulty: Difficulty,
        profile: Profile,
        tuning: NpcTuning,
    ) -> Self {
        Self {
            id,
            name,
            difficulty,
            profile,
            tuning: tuning.clamped(),
            target_food: None,
            last_direction: None,
            decision_delay_ticks: 0,
        }
    }

    /// Builds the NPC for slot `index` (0..3) from an optional wire config,
    /// falling back to the stock roster.
    pub fn from_config(id: String, index: usize, config: Option<&NpcConfig>) -> Self {
        let slot = index.min(DEFAULT_NPC_NAMES.len() - 1);
        let name = config
            .and_then(|c| c.name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_NPC_NAMES[slot].to_string());
        let difficulty = config
            .and_then(|c| c.difficulty)
            .unwrap_or(DEFAULT_NPC_DIFFICULTIES[slot]);
        let profile = config.and_then(|c| c.profile).unwrap_or(Profile::Balanced);
        let tuning = config.and_then(|c| c.tuning).unwrap_or_default();
        Self::new(id, name, difficulty, profile, tuning)
    }

    pub fn settings(&self) -> NpcSettings {
        NpcSettings::derive(self.difficulty, self.profile, self.tuning)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetBias {
    pub food: f64,
    pub hunt: f64,
    pub survival: f64,
}

/// Settings derived from difficulty, profile, and the three sliders.
#[derive(Debug, Clone, Copy)]
pub struct NpcSettings {
    pub reaction_ms: f64,
    pub success_rate: f64,
    pub look_ahead: i32,
    pub aggression: f64,
    pub caution: f64,
    pub randomness: f64,
    pub bias: TargetBias,
}

impl NpcSettings {
    pub fn derive(difficulty: Difficulty, profile: Profile, tuning: NpcTuning) -> Self {
        let tuning = tuning.clamped();
        let (base_reaction, base_success, base_look, base_aggression, base_caution) =
            match difficulty {
                Difficulty::Easy => (400.0, 0.55, 2, 0.30, 0.35),
                Difficulty::Medium => (250.0, 0.75, 4, 0.55, 0.55),
                Difficulty::Hard => (120.0, 0.92, 6, 0.80, 0.75),
            };
        let bias = match profile {
            Profile::Balanced => TargetBias {
                food: 1.0,
                hunt: 1.0,
                survival: 1.0,
            },
            Profile::Hunter => TargetBias {
                food: 0.7,
                hunt: 1.6,
                survival: 0.8,
            },
            Profile::Survivor => TargetBias {
                food: 0.8,
                hunt: 0.5,
                survival: 1.7,
            },
            Profile::Forager => TargetBias {
                food: 1.7,
                hunt: 0.5,
                survival: 0.9,
            },
        };

        let speed = f64::from(tuning.speed);
        let skill = f64::from(tuning.skill);
        let boldness = f64::from(tuning.boldness);

        let reaction_ms = base_reaction * (6.0 - speed) / 3.0;
        let success_rate = (base_success + 0.04 * (skill - 3.0)).clamp(0.4, 0.99);
        let look_ahead = (base_look + tuning.skill as i32 - 3).clamp(2, 8);
        let aggression = (base_aggression + 0.12 * (boldness - 3.0)).clamp(0.0, 1.0);
        let caution = (base_caution - 0.10 * (boldness - 3.0)).clamp(0.0, 1.0);
        let randomness = (1.0 - success_rate).clamp(0.05, 0.4);

        Self {
            reaction_ms,
            success_rate,
            look_ahead,
            aggression,
            caution,
            randomness,
            bias,
        }
    }

    pub fn decision_delay_ticks(&self) -> u32 {
        (self.reaction_ms / DECISION_TICK_MS).floor() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetChoice {
    Food,
    Hunt,
    Survive,
}

/// One decision pass for an alive NPC. Returns the direction to queue, or
/// `None` while the reaction delay is still counting down.
pub fn decide_direction(
    npc: &mut NpcState,
    state: &GameState,
    rng: &mut impl Rng,
) -> Option<Direction> {
    if npc.decision_delay_ticks > 0 {
        npc.decision_delay_ticks -= 1;
        if npc.decision_delay_ticks > 0 {
            return None;
        }
    }
    let settings = npc.settings();
    npc.decision_delay_ticks = settings.decision_delay_ticks();

    let player = state.players.get(&npc.id)?;
    if !player.alive {
        return None;
    }
    let current = player.queued_direction;
    let wall_mode = state.options.wall_mode;

    // Mistake roll: a failed check keeps the snake on its current heading,
    // only dodging immediate death.
    if rng.gen_bool(1.0 - settings.success_rate) {
        let chosen = safe_move(player, current, state);
        npc.last_direction = Some(chosen);
        return Some(chosen);
    }

    let head = player.head();
    // Keep chasing the same food while it is still on the board; reacquire
    // the nearest one otherwise.
    let best_food = npc
        .target_food
        .filter(|pos| state.food.contains(pos))
        .or_else(|| nearest_food(state, head, wall_mode));
    let best_opponent = nearest_opponent_head(state, player, wall_mode);
    npc.target_food = best_food;

    let target = match pick_target_category(settings, best_food, best_opponent, rng) {
        (TargetChoice::Food, Some(pos)) => pos,
        (TargetChoice::Hunt, Some(pos)) => pos,
        _ => board_center(),
    };

    let preferred = preferred_direction(head, target, current, wall_mode);
    let chosen = avoid_collisions(player, state, preferred, current, &settings, rng);
    npc.last_direction = Some(chosen);
    Some(chosen)
}

fn nearest_food(state: &GameState, head: Position, wall_mode: bool) -> Option<Position> {
    state
        .food
        .iter()
        .copied()
        .min_by_key(|pos| manhattan_distance(head, *pos, wall_mode))
}

fn nearest_opponent_head(state: &GameState, me: &Player, wall_mode: bool) -> Option<Position> {
    state
        .players
        .values()
        .filter(|other| other.alive && other.id != me.id)
        .map(|other| other.head())
        .min_by_key(|pos| manhattan_distance(me.head(), *pos, wall_mode))
}

fn pick_target_category(
    settings: NpcSettings,
    best_food: Option<Position>,
    best_opponent: Option<Position>,
    rng: &mut impl Rng,
) -> (TargetChoice, Option<Position>) {
    let w_food = if best_food.is_some() {
        settings.bias.food * (1.0 + 0.3 * (1.0 - settings.aggression))
    } else {
        0.0
    };
    let w_hunt = if best_opponent.is_some() {
        settings.bias.hunt * (0.6 + 0.8 * settings.aggression)
    } else {
        0.0
    };
    let w_survive = settings.bias.survival * (0.6 + 0.8 * settings.caution);

    let total = w_food + w_hunt + w_survive;
    if total <= 0.0 {
        return (TargetChoice::Survive, None);
    }
    let roll = rng.gen::<f64>() * total;
    if roll < w_food {
        (TargetChoice::Food, best_food)
    } else if roll < w_food + w_hunt {
        (TargetChoice::Hunt, best_opponent)
    } else {
        (TargetChoice::Survive, None)
    }
}

/// Axis with the larger delta wins; ties go to the axis that does not reverse.
fn preferred_direction(
    head: Position,
    target: Position,
    current: Direction,
    wall_mode: bool,
) -> Direction {
    let (dx, dy) = grid::axis_deltas(head, target, wall_mode);
    let horizontal = if dx >= 0 {
        Direction::Right
    } else {
        Direction::Left
    };
    let vertical = if dy >= 0 {
        Direction::Down
    } else {
        Direction::Up
    };
    if dx.abs() > dy.abs() {
        horizontal
    } else if dy.abs() > dx.abs() {
        vertical
    } else if grid::is_turn_allowed(current, horizontal) {
        horizontal
    } else {
        vertical
    }
}

fn occupied_by_snake(state: &GameState, pos: Position) -> bool {
    state
        .players
        .values()
        .filter(|player| player.alive)
        .any(|player| player.snake.contains(&pos))
}

/// One-step prediction of every other snake's head using its queued direction.
fn predicted_other_heads(state: &GameState, me: &Player) -> Vec<Position> {
    state
        .players
        .values()
        .filter(|other| other.alive && other.id != me.id)
        .map(|other| grid::step(other.head(), other.queued_direction, state.options.wall_mode))
        .collect()
}

fn legal_directions(current: Direction, head: Position, wall_mode: bool) -> Vec<Direction> {
    ALL_DIRECTIONS
        .iter()
        .copied()
        .filter(|direction| grid::is_turn_allowed(current, *direction))
        .filter(|direction| !wall_mode || grid::step_unbounded(head, *direction).in_bounds())
        .collect()
}

/// Minimal evasive pick used after a failed mistake roll: hold course unless
/// the current heading dies immediately.
fn safe_move(player: &Player, current: Direction, state: &GameState) -> Direction {
    let wall_mode = state.options.wall_mode;
    let head = player.head();
    let mut candidates = vec![current];
    candidates.extend(
        legal_directions(current, head, wall_mode)
            .into_iter()
            .filter(|direction| *direction != current),
    );
    for direction in &candidates {
        if wall_mode && !grid::step_unbounded(head, *direction).in_bounds() {
            continue;
        }
        let next = grid::step(head, *direction, wall_mode);
        if !occupied_by_snake(state, next) {
            return *direction;
        }
    }
    current
}

#[derive(Debug, Clone, Copy)]
struct ScoredMove {
    direction: Direction,
    score: f64,
}

fn avoid_collisions(
    player: &Player,
    state: &GameState,
    preferred: Direction,
    current: Direction,
    settings: &NpcSettings,
    rng: &mut impl Rng,
) -> Direction {
    let wall_mode = state.options.wall_mode;
    let head = player.head();
    let predicted_heads = predicted_other_heads(state, player);

    let mut scored: Vec<ScoredMove> = Vec::with_capacity(4);
    for direction in legal_directions(current, head, wall_mode) {
        let candidate = grid::step(head, direction, wall_mode);
        if occupied_by_snake(state, candidate) {
            continue;
        }
        if predicted_heads.contains(&candidate) {
            continue;
        }

        let mut score = 100.0;
        if direction == preferred {
            score += 50.0;
        }
        if wall_mode {
            let distance = f64::from(wall_distance(candidate));
            score += distance * (2.0 + 3.0 * settings.caution);
            if distance < 2.0 {
                score -= 30.0 * settings.caution;
            }
            if would_lead_to_dead_end(state, candidate, direction, settings.look_ahead) {
                score -= 120.0 * settings.caution;
            }
        }
        let branches = f64::from(future_branch_count(state, candidate, direction, wall_mode));
        score += branches * (8.0 + 8.0 * settings.caution);

        scored.push(ScoredMove { direction, score });
    }

    if scored.is_empty() {
        let legal = legal_directions(current, head, wall_mode);
        if legal.contains(&preferred) {
            return preferred;
        }
        return legal.first().copied().unwrap_or(current);
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let best = scored[0];
    if best.score <= 0.0 {
        let legal = legal_directions(current, head, wall_mode);
        if legal.contains(&preferred) {
            return preferred;
        }
        return legal.first().copied().unwrap_or(current);
    }

    let near_best: Vec<ScoredMove> = scored
        .iter()
        .copied()
        .filter(|candidate| best.score - candidate.score <= NEAR_BEST_MARGIN)
        .collect();
    if near_best.len() > 1 && rng.gen_bool(settings.randomness) {
        return near_best[rng.gen_range(0..near_best.len())].direction;
    }
    best.direction
}

/// Number of safe onward options from `pos` when facing `facing`.
fn future_branch_count(state: &GameState, pos: Position, facing: Direction, wall_mode: bool) -> u32 {
    legal_directions(facing, pos, wall_mode)
        .into_iter()
        .filter(|direction| {
            let next = grid::step(pos, *direction, wall_mode);
            !occupied_by_snake(state, next)
        })
        .count() as u32
}

/// Wall-mode lookahead: walking onward from `start`, a step with no safe exit,
/// or a one-exit corridor before the final step, counts as a dead end.
fn would_lead_to_dead_end(
    state: &GameState,
    start: Position,
    direction: Direction,
    look_ahead: i32,
) -> bool {
    let mut pos = start;
    let mut facing = direction;
    for step_index in 0..look_ahead {
        let options: Vec<Direction> = legal_directions(facing, pos, true)
            .into_iter()
            .filter(|candidate| {
                let next = grid::step_unbounded(pos, *candidate);
                next.in_bounds() && !occupied_by_snake(state, next)
            })
            .collect();
        if options.is_empty() {
            return true;
        }
        if options.len() == 1 && step_index < look_ahead - 1 {
            return true;
        }
        facing = if options.contains(&facing) {
            facing
        } else {
            options[0]
        };
        pos = grid::step_unbounded(pos, facing);
    }
    false
}
