use super::grid::{Position, GRID_HEIGHT, GRID_WIDTH};
use super::types::{EffectKind, GameState, PowerupItem, PowerupKind, ALL_POWERUP_KINDS};
use rand::Rng;
use uuid::Uuid;

pub const MAX_ACTIVE: usize = 2;
pub const ITEM_TTL_MS: i64 = 30_000;
pub const EFFECT_MS: i64 = 7_000;
pub const SPAWN_INTERVAL_MIN_MS: i64 = 12_000;
pub const SPAWN_INTERVAL_MAX_MS: i64 = 20_000;
pub const SHRINK_SEGMENTS: usize = 3;

const SPAWN_ATTEMPTS: usize = 64;

/// A collected power-up, reported upstream for notification.
#[derive(Debug, Clone)]
pub struct Collection {
    pub player_id: String,
    pub kind: PowerupKind,
}

/// Power-up module seam. Constructed once per room from the feature flag;
/// the simulation calls it unconditionally and every method is a no-op when
/// disabled.
#[derive(Debug, Clone, Copy)]
pub struct PowerupService {
    enabled: bool,
}

impl PowerupService {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Called once per tick. The first call only arms the spawn timer; after
    /// that a new item appears whenever the resampled uniform interval has
    /// elapsed and fewer than `MAX_ACTIVE` items are on the board.
    pub fn maybe_spawn(&self, state: &mut GameState, now: i64, rng: &mut impl Rng) {
        if !self.enabled {
            return;
        }
        if state.last_powerup_spawn_ms == 0 {
            state.last_powerup_spawn_ms = now;
            state.next_powerup_delay_ms = sample_spawn_delay(rng);
            return;
        }
        if state.powerups.len() >= MAX_ACTIVE {
            return;
        }
        if now - state.last_powerup_spawn_ms < state.next_powerup_delay_ms {
            return;
        }
        let Some(position) = random_free_cell(state, rng) else {
            return;
        };
        let kind = ALL_POWERUP_KINDS[rng.gen_range(0..ALL_POWERUP_KINDS.len())];
        state.powerups.push(PowerupItem {
            id: Uuid::new_v4().to_string(),
            position,
            kind,
            spawned_at_ms: now,
        });
        state.last_powerup_spawn_ms = now;
        state.next_powerup_delay_ms = sample_spawn_delay(rng);
    }

    /// Collects items whose cell an alive head occupies, applying each effect.
    pub fn check_collect(&self, state: &mut GameState, now: i64) -> Vec<Collection> {
        if !self.enabled {
            return Vec::new();
        }
        let mut collections = Vec::new();
        let mut index = 0;
        while index < state.powerups.len() {
            let position = state.powerups[index].position;
            let collector = state
                .players
                .values()
                .find(|player| player.alive && player.head() == position)
                .map(|player| player.id.clone());
            let Some(player_id) = collector else {
                index += 1;
                continue;
            };
            let item = state.powerups.remove(index);
            apply(state, &player_id, item.kind, now);
            collections.push(Collection {
                player_id,
                kind: item.kind,
            });
        }
        collections
    }

    /// Expires uncollected items and stale effects.
    pub fn tick(&self, state: &mut GameState, now: i64) {
        if !self.enabled {
            return;
        }
        state
            .powerups
            .retain(|item| now - item.spawned_at_ms < ITEM_TTL_MS);
        for player in state.players.values_mut() {
            player.active_powerups.retain(|_, expiry| *expiry > now);
        }
    }
}

fn sample_spawn_delay(rng: &mut impl Rng) -> i64 {
    rng.gen_range(SPAWN_INTERVAL_MIN_MS..=SPAWN_INTERVAL_MAX_MS)
}

fn random_free_cell(state: &GameState, rng: &mut impl Rng) -> Option<Position> {
    for _ in 0..SPAWN_ATTEMPTS {
        let candidate = Position::new(rng.gen_range(0..GRID_WIDTH), rng.gen_range(0..GRID_HEIGHT));
        if state.cell_is_free(candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Applies a collected power-up. A non-`slowed` pickup replaces the
/// collector's other non-`slowed` effects; `slowOthers` leaves the collector
/// untouched and marks everyone else.
pub fn apply(state: &mut GameState, collector_id: &str, kind: PowerupKind, now: i64) {
    let expiry = now + EFFECT_MS;
    match kind {
        PowerupKind::SlowOthers => {
            for player in state.players.values_mut() {
                if player.id != collector_id && player.alive {
                    player.active_powerups.insert(EffectKind::Slowed, expiry);
                }
            }
        }
        PowerupKind::SpeedBoost | PowerupKind::Shield | PowerupKind::Shrink => {
            let Some(player) = state.players.get_mut(collector_id) else {
                return;
            };
            player
                .active_powerups
                .retain(|effect, _| *effect == EffectKind::Slowed);
            player.active_powerups.insert(kind.effect(), expiry);
            if kind == PowerupKind::Shrink {
                let keep = player.snake.len().saturating_sub(SHRINK_SEGMENTS).max(1);
                player.snake.truncate(keep);
            }
        }
    }
}

pub fn is_active(player: &super::types::Player, effect: EffectKind, now: i64) -> bool {
    player
        .active_powerups
        .get(&effect)
        .is_some_and(|expiry| now < *expiry)
}

/// Movement speed multiplier: slowed halves, speed boost doubles, both cancel.
pub fn speed_factor(player: &super::types::Player, now: i64) -> f64 {
    let slowed = is_active(player, EffectKind::Slowed, now);
    let boosted = is_active(player, EffectKind::SpeedBoost, now);
    match (boosted, slowed) {
        (true, true) => 1.0,
        (true, false) => 2.0,
        (false, true) => 0.5,
        (false, false) => 1.0,
    }
}
