use crate::game::types::GameMode;
use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::sync::RwLock;
use uuid::Uuid;

pub const SESSION_SWEEP_SECS: u64 = 30;
pub const SESSION_STALE_MS: i64 = 24 * 60 * 60 * 1000;
pub const SESSION_HISTORY_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    WinnerDeclared,
    Timeout,
    PlayerInactive,
    PlayerInactiveDisconnected,
    AllPlayersDisconnected,
    HostQuitNoPlayers,
    AllPlayersQuit,
    RoomDeleted,
    RoomNotFound,
    GameEnded,
    Crashed,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::WinnerDeclared => "winner_declared",
            EndReason::Timeout => "timeout",
            EndReason::PlayerInactive => "player_inactive",
            EndReason::PlayerInactiveDisconnected => "player_inactive_disconnected",
            EndReason::AllPlayersDisconnected => "all_players_disconnected",
            EndReason::HostQuitNoPlayers => "host_quit_no_players",
            EndReason::AllPlayersQuit => "all_players_quit",
            EndReason::RoomDeleted => "room_deleted",
            EndReason::RoomNotFound => "room_not_found",
            EndReason::GameEnded => "game_ended",
            EndReason::Crashed => "crashed",
        }
    }
}

/// Human-facing session id, `DDMMYY/HH:MM` of the start instant.
pub fn format_session_id(start_epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(start_epoch_ms).single() {
        Some(at) => at.format("%d%m%y/%H:%M").to_string(),
        None => "000000/00:00".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub uid: String,
    pub session_id: String,
    pub room_code: String,
    pub mode: GameMode,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub end_reason: Option<EndReason>,
    pub winner_name: Option<String>,
    pub winner_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub room_code: String,
    pub game_mode: GameMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_score: Option<i64>,
    pub duration_seconds: i64,
    pub is_active: bool,
}

/// In-memory session log. Write-rare, read-often; a plain rw-lock around the
/// record vector is enough.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    records: RwLock<Vec<SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a record for a starting game and returns its internal uid. The
    /// formatted session id is not unique by construction (two rooms can
    /// start the same minute), so the uid is the key.
    pub fn open(&self, room_code: &str, mode: GameMode, now: i64) -> String {
        let uid = Uuid::new_v4().to_string();
        let record = SessionRecord {
            uid: uid.clone(),
            session_id: format_session_id(now),
            room_code: room_code.to_string(),
            mode,
            started_at_ms: now,
            ended_at_ms: None,
            end_reason: None,
            winner_name: None,
            winner_score: None,
        };
        let mut records = self.records.write().expect("session registry lock");
        records.push(record);
        uid
    }

    /// Closes a session. Idempotent: the first terminal reason wins.
    pub fn close(
        &self,
        uid: &str,
        reason: EndReason,
        now: i64,
        winner: Option<(String, i64)>,
    ) {
        let mut records = self.records.write().expect("session registry lock");
        let Some(record) = records.iter_mut().find(|record| record.uid == uid) else {
            return;
        };
        if record.end_reason.is_some() {
            return;
        }
        record.ended_at_ms = Some(now);
        record.end_reason = Some(reason);
        if let Some((name, score)) = winner {
            record.winner_name = Some(name);
            record.winner_score = Some(score);
        }
        tracing::info!(
            session_id = %record.session_id,
            room_code = %record.room_code,
            reason = reason.as_str(),
            "session_closed"
        );
    }

    /// Periodic sweep: sessions whose room vanished get `room_deleted`, and
    /// anything unterminated after 24 h is closed as `timeout`.
    pub fn sweep(&self, now: i64, room_exists: impl Fn(&str) -> bool) {
        let mut records = self.records.write().expect("session registry lock");
        for record in records.iter_mut() {
            if record.ended_at_ms.is_some() {
                continue;
            }
            if !room_exists(&record.room_code) {
                record.ended_at_ms = Some(now);
                record.end_reason = Some(EndReason::RoomDeleted);
            } else if now - record.started_at_ms > SESSION_STALE_MS {
                record.ended_at_ms = Some(now);
                record.end_reason = Some(EndReason::Timeout);
            }
        }
    }

    /// The most recently started sessions, newest first.
    pub fn recent(
        &self,
        limit: usize,
        now: i64,
        is_active: impl Fn(&str) -> bool,
    ) -> Vec<SessionSummary> {
        let records = self.records.read().expect("session registry lock");
        let mut sorted: Vec<&SessionRecord> = records.iter().collect();
        sorted.sort_by_key(|record| std::cmp::Reverse(record.started_at_ms));
        sorted
            .into_iter()
            .take(limit)
            .map(|record| SessionSummary {
                session_id: record.session_id.clone(),
                room_code: record.room_code.clone(),
                game_mode: record.mode,
                winner_name: record.winner_name.clone(),
                winner_score: record.winner_score,
                duration_seconds: (record.ended_at_ms.unwrap_or(now) - record.started_at_ms)
                    / 1000,
                is_active: record.ended_at_ms.is_none() && is_active(&record.room_code),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_format() {
        // 2026-08-02 14:05 UTC
        let at = Utc
            .with_ymd_and_hms(2026, 8, 2, 14, 5, 0)
            .single()
            .unwrap()
            .timestamp_millis();
        assert_eq!(format_session_id(at), "020826/14:05");
    }

    #[test]
    fn close_is_idempotent_and_first_reason_wins() {
        let registry = SessionRegistry::new();
        let uid = registry.open("ROOM", GameMode::Multi, 1_000);
        registry.close(&uid, EndReason::WinnerDeclared, 5_000, Some(("Ada".to_string(), 70)));
        registry.close(&uid, EndReason::RoomDeleted, 9_000, None);

        let sessions = registry.recent(5, 10_000, |_| true);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].winner_name.as_deref(), Some("Ada"));
        assert_eq!(sessions[0].duration_seconds, 4);
        assert!(!sessions[0].is_active);
    }

    #[test]
    fn sweep_closes_orphans_and_stale_sessions() {
        let registry = SessionRegistry::new();
        let orphan = registry.open("GONE", GameMode::Multi, 1_000);
        let stale = registry.open("OLD", GameMode::Solo, 1_000);
        let live = registry.open("LIVE", GameMode::Multi, SESSION_STALE_MS);

        registry.sweep(SESSION_STALE_MS + 2_000, |code| code != "GONE");

        let sessions = registry.recent(5, SESSION_STALE_MS + 3_000, |code| code == "LIVE");
        let by_code = |code: &str| {
            sessions
                .iter()
                .find(|session| session.room_code == code)
                .unwrap()
                .clone()
        };
        assert!(!by_code("GONE").is_active);
        assert!(!by_code("OLD").is_active);
        assert!(by_code("LIVE").is_active);
        let _ = (orphan, stale, live);
    }

    #[test]
    fn recent_returns_newest_first_with_limit() {
        let registry = SessionRegistry::new();
        for index in 0..8i64 {
            registry.open(&format!("R{index}"), GameMode::Multi, index * 1_000);
        }
        let sessions = registry.recent(SESSION_HISTORY_LIMIT, 100_000, |_| false);
        assert_eq!(sessions.len(), SESSION_HISTORY_LIMIT);
        assert_eq!(sessions[0].room_code, "R7");
        assert_eq!(sessions[4].room_code, "R3");
    }
}
