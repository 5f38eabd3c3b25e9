use super::types::{GameMode, GameState};

pub const WARN_MS: i64 = 45_000;
pub const KICK_MS: i64 = 60_000;

/// What the room actor must do for an idle player. Membership, tokens, and
/// broadcasts are room concerns, so the scan only reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogAction {
    Warn {
        player_id: String,
        remaining_seconds: i64,
    },
    /// Multi mode: remove the player from the match.
    Kick { player_id: String },
    /// Solo/single mode: the whole game ends.
    EndGame { player_id: String },
}

/// Scans every alive human's input age. Runs once per tick after the game has
/// started and only while unpaused; paused time is excluded by the resume
/// handler shifting `last_input_at_ms`.
pub fn scan(state: &mut GameState, now: i64) -> Vec<WatchdogAction> {
    if !state.started() || state.paused || state.winner.is_some() {
        return Vec::new();
    }
    let mode = state.mode;
    let mut actions = Vec::new();
    let ids: Vec<String> = state
        .players
        .values()
        .filter(|player| player.is_human() && player.alive)
        .map(|player| player.id.clone())
        .collect();

    for id in ids {
        let last_input = state
            .last_input_at_ms
            .get(&id)
            .copied()
            .unwrap_or(state.start_epoch_ms);
        let idle = now - last_input;
        match mode {
            GameMode::Multi => {
                if idle >= KICK_MS {
                    actions.push(WatchdogAction::Kick { player_id: id });
                } else if idle >= WARN_MS {
                    let player = state.players.get_mut(&id).expect("scanned id");
                    if !player.inactivity_warned {
                        player.inactivity_warned = true;
                        actions.push(WatchdogAction::Warn {
                            player_id: id,
                            remaining_seconds: (KICK_MS - idle) / 1000,
                        });
                    }
                }
            }
            GameMode::Solo | GameMode::Single => {
                if idle >= KICK_MS {
                    actions.push(WatchdogAction::EndGame { player_id: id });
                }
            }
        }
    }
    actions
}
