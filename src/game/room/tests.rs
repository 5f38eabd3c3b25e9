use super::*;
use crate::game::grid::{Direction, Position, GRID_WIDTH};
use crate::game::powerups::PowerupService;
use crate::game::simulation::{
    advance_tick, check_win_condition, handle_input, tick_rate, InputReject,
};
use crate::game::types::{EffectKind, Player, SURVIVAL_BONUS};
use crate::gateway::FeatureFlags;
use crate::protocol::JoinRoomPayload;
use rand::Rng as _;
use serde_json::Value;

fn make_player(id: &str, kind: PlayerKind, snake: Vec<Position>, direction: Direction) -> Player {
    Player {
        id: id.to_string(),
        name: id.to_string(),
        kind,
        color: "#ffffff".to_string(),
        snake,
        direction,
        queued_direction: direction,
        score: 0,
        alive: true,
        is_host: false,
        control_scheme: "arrows".to_string(),
        survival_start_ms: 1_000,
        survival_duration_ms: 0,
        speed_accumulator: 0.0,
        active_powerups: HashMap::new(),
        inactivity_warned: false,
    }
}

fn started_game(mode: GameMode, options: GameOptions) -> GameState {
    let mut game = GameState::new(mode, options);
    game.start_epoch_ms = 1_000;
    game
}

fn test_shared() -> Arc<crate::gateway::Shared> {
    crate::gateway::Shared::new(FeatureFlags {
        chat: true,
        powerups: false,
        accessibility: true,
    })
}

fn open_conn() -> (String, mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Uuid::new_v4().to_string(), tx, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        events.push(serde_json::from_str(&frame).expect("valid frame"));
    }
    events
}

fn events_named<'a>(events: &'a [Value], name: &str) -> Vec<&'a Value> {
    events
        .iter()
        .filter(|event| event["event"] == name)
        .collect()
}

fn join_payload(name: &str, code: &str) -> JoinRoomPayload {
    JoinRoomPayload {
        player_name: name.to_string(),
        room_code: code.to_string(),
        control_scheme: Some("arrows".to_string()),
        player_token: None,
    }
}

// ---- simulation scenarios ------------------------------------------------

#[test]
fn solo_snake_eats_food_and_grows() {
    let mut game = started_game(GameMode::Solo, GameOptions::default());
    game.add_player(make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    ));
    game.food.push(Position::new(6, 5));

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);

    assert!(outcome.deaths.is_empty());
    let player = &game.players["p1"];
    assert_eq!(player.snake, vec![Position::new(6, 5), Position::new(5, 5)]);
    assert_eq!(player.score, 10);
    assert_eq!(game.total_food_eaten, 1);
    assert_eq!(game.level, 1);
    assert!(player.alive);
    assert!(game.winner.is_none());
    // A replacement food spawned off the snake.
    assert_eq!(game.food.len(), 1);
    assert!(!player.snake.contains(&game.food[0]));
}

#[test]
fn level_curve_and_solo_speedup() {
    assert_eq!(crate::game::simulation::level_for(0), 1);
    assert_eq!(crate::game::simulation::level_for(4), 1);
    assert_eq!(crate::game::simulation::level_for(5), 2);
    assert!((tick_rate(2, GameMode::Solo) - 7.105).abs() < 1e-9);
    assert_eq!(tick_rate(1, GameMode::Multi), 5.0);
    // Monotone and capped.
    let mut previous = 0.0;
    for level in 1..20 {
        let rate = tick_rate(level, GameMode::Multi);
        assert!(rate >= previous);
        assert!(rate <= 16.0);
        previous = rate;
    }
    assert_eq!(tick_rate(10, GameMode::Multi), 16.0);
}

#[test]
fn multi_non_strict_wall_less_is_pass_through() {
    let mut game = started_game(GameMode::Multi, GameOptions::default());
    game.add_player(make_player(
        "a",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    ));
    game.add_player(make_player(
        "b",
        PlayerKind::Human,
        vec![Position::new(6, 5)],
        Direction::Left,
    ));

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);

    assert!(outcome.deaths.is_empty());
    assert!(game.players["a"].alive);
    assert!(game.players["b"].alive);
    assert_eq!(game.players["a"].head(), Position::new(6, 5));
    assert_eq!(game.players["b"].head(), Position::new(5, 5));
}

#[test]
fn head_into_stationary_body_dies_in_strict_mode() {
    for strict in [true, false] {
        // Wall mode keeps the multi pass-through rule out of the picture.
        let options = GameOptions {
            strict_mode: strict,
            wall_mode: true,
            ..GameOptions::default()
        };
        let mut game = started_game(GameMode::Multi, options);
        game.add_player(make_player(
            "a",
            PlayerKind::Human,
            vec![Position::new(5, 5), Position::new(4, 5)],
            Direction::Right,
        ));
        let mut blocker = make_player(
            "b",
            PlayerKind::Human,
            vec![Position::new(6, 5), Position::new(7, 5), Position::new(8, 5)],
            Direction::Right,
        );
        // Keep the blocker in place this tick.
        blocker.speed_accumulator = -1.0;
        game.add_player(blocker);

        let service = PowerupService::new(false);
        let mut rng = rand::thread_rng();
        let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);

        // (6,5) is the blocker's head cell, so both modes kill.
        assert_eq!(outcome.deaths.len(), 1, "strict={strict}");
        assert_eq!(outcome.deaths[0].player_id, "a");
        assert!(!game.players["a"].alive);
        assert!(game.players["b"].alive);
    }
}

#[test]
fn strict_mode_decides_tail_collisions() {
    for (strict, expect_death) in [(true, true), (false, false)] {
        let options = GameOptions {
            strict_mode: strict,
            wall_mode: true,
            ..GameOptions::default()
        };
        let mut game = started_game(GameMode::Multi, options);
        game.add_player(make_player(
            "a",
            PlayerKind::Human,
            vec![Position::new(5, 5), Position::new(4, 5)],
            Direction::Right,
        ));
        let mut blocker = make_player(
            "b",
            PlayerKind::Human,
            // Tail segment sits at (6,5); head far away at (8,5).
            vec![Position::new(8, 5), Position::new(7, 5), Position::new(6, 5)],
            Direction::Right,
        );
        blocker.speed_accumulator = -1.0;
        game.add_player(blocker);

        let service = PowerupService::new(false);
        let mut rng = rand::thread_rng();
        let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);
        assert_eq!(!game.players["a"].alive, expect_death, "strict={strict}");
        assert_eq!(outcome.deaths.len(), usize::from(expect_death));
    }
}

#[test]
fn head_to_head_kills_all_unless_everyone_is_shielded() {
    for shielded in [false, true] {
        let options = GameOptions {
            strict_mode: true,
            ..GameOptions::default()
        };
        let mut game = started_game(GameMode::Multi, options);
        let mut a = make_player(
            "a",
            PlayerKind::Human,
            vec![Position::new(5, 5)],
            Direction::Right,
        );
        let mut b = make_player(
            "b",
            PlayerKind::Human,
            vec![Position::new(7, 5)],
            Direction::Left,
        );
        if shielded {
            a.active_powerups.insert(EffectKind::Shield, 10_000);
            b.active_powerups.insert(EffectKind::Shield, 10_000);
        }
        game.add_player(a);
        game.add_player(b);

        let service = PowerupService::new(false);
        let mut rng = rand::thread_rng();
        let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);

        if shielded {
            assert!(outcome.deaths.is_empty());
            assert!(game.players["a"].alive && game.players["b"].alive);
        } else {
            assert_eq!(outcome.deaths.len(), 2);
            assert!(!game.players["a"].alive && !game.players["b"].alive);
        }
    }
}

#[test]
fn wrap_mode_wraps_and_wall_mode_kills() {
    // Wrap: from x=0 heading left lands on the far column.
    let mut game = started_game(GameMode::Solo, GameOptions::default());
    game.add_player(make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(0, 7)],
        Direction::Left,
    ));
    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    advance_tick(&mut game, &service, 2_000, &mut rng);
    assert_eq!(game.players["p1"].head(), Position::new(GRID_WIDTH - 1, 7));

    // Wall: the same move is fatal, and a solo death names a losing winner.
    let options = GameOptions {
        wall_mode: true,
        ..GameOptions::default()
    };
    let mut game = started_game(GameMode::Solo, options);
    game.add_player(make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(0, 7)],
        Direction::Left,
    ));
    let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);
    assert_eq!(outcome.deaths.len(), 1);
    assert_eq!(outcome.deaths[0].kind.as_str(), "wall");
    let winner = game.winner.expect("solo death declares the loser");
    assert_eq!(winner.id, "p1");
    assert!(winner.is_loser);
}

#[test]
fn shield_suppresses_wall_death_while_active() {
    let options = GameOptions {
        wall_mode: true,
        ..GameOptions::default()
    };
    let mut game = started_game(GameMode::Solo, options);
    let mut player = make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(0, 7)],
        Direction::Left,
    );
    player.active_powerups.insert(EffectKind::Shield, 10_000);
    game.add_player(player);

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);
    assert!(outcome.deaths.is_empty());
    assert!(game.players["p1"].alive);
}

#[test]
fn speed_boost_moves_twice_per_tick() {
    let mut game = started_game(GameMode::Solo, GameOptions::default());
    let mut player = make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    );
    player.active_powerups.insert(EffectKind::SpeedBoost, 10_000);
    game.add_player(player);

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    advance_tick(&mut game, &service, 2_000, &mut rng);
    assert_eq!(game.players["p1"].head(), Position::new(7, 5));

    // Slowed halves: only every other tick moves.
    let mut game = started_game(GameMode::Solo, GameOptions::default());
    let mut player = make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    );
    player.active_powerups.insert(EffectKind::Slowed, 10_000);
    game.add_player(player);
    advance_tick(&mut game, &service, 2_000, &mut rng);
    assert_eq!(game.players["p1"].head(), Position::new(5, 5));
    advance_tick(&mut game, &service, 2_100, &mut rng);
    assert_eq!(game.players["p1"].head(), Position::new(6, 5));
}

#[test]
fn input_gate_rejects_reversals_and_double_inputs() {
    let mut game = started_game(GameMode::Multi, GameOptions::default());
    game.add_player(make_player(
        "p1",
        PlayerKind::Human,
        vec![Position::new(5, 5), Position::new(4, 5)],
        Direction::Right,
    ));
    game.tick = 3;

    assert_eq!(
        handle_input(&mut game, "p1", Direction::Left, 2_000),
        Err(InputReject::Reversal)
    );
    assert_eq!(handle_input(&mut game, "p1", Direction::Up, 2_000), Ok(()));
    assert_eq!(
        handle_input(&mut game, "p1", Direction::Down, 2_001),
        Err(InputReject::AlreadyThisTick)
    );
    // Next tick the gate reopens, but reversing the still-committed heading
    // stays illegal.
    game.tick = 4;
    assert_eq!(
        handle_input(&mut game, "p1", Direction::Left, 2_002),
        Err(InputReject::Reversal)
    );
    assert_eq!(
        handle_input(&mut game, "ghost", Direction::Up, 2_003),
        Err(InputReject::UnknownPlayer)
    );

    game.players.get_mut("p1").unwrap().alive = false;
    game.tick = 5;
    assert_eq!(
        handle_input(&mut game, "p1", Direction::Up, 2_004),
        Err(InputReject::PlayerDead)
    );
}

#[test]
fn last_survivor_at_zero_score_waits_five_seconds() {
    let mut game = started_game(GameMode::Multi, GameOptions::default());
    game.add_player(make_player(
        "a",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    ));
    let mut dead = make_player(
        "b",
        PlayerKind::Human,
        vec![Position::new(20, 20)],
        Direction::Left,
    );
    dead.alive = false;
    game.add_player(dead);

    assert!(!check_win_condition(&mut game, false, 10_000));
    assert!(game.winner.is_none());
    assert_eq!(game.last_survivor_since_ms, Some(10_000));

    // Still inside the hold window.
    assert!(!check_win_condition(&mut game, false, 14_000));

    assert!(check_win_condition(&mut game, false, 15_000));
    let winner = game.winner.clone().expect("survivor declared");
    assert_eq!(winner.id, "a");
    assert_eq!(winner.score, SURVIVAL_BONUS);
}

#[test]
fn timeout_awards_survival_bonus_and_picks_top_score() {
    let options = GameOptions {
        time_limit: Some(3),
        ..GameOptions::default()
    };
    let mut game = started_game(GameMode::Multi, options);
    let mut leader = make_player(
        "a",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    );
    leader.score = 30;
    game.add_player(leader);
    let mut runner_up = make_player(
        "b",
        PlayerKind::Human,
        vec![Position::new(20, 20)],
        Direction::Left,
    );
    runner_up.score = 20;
    game.add_player(runner_up);

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    let after_limit = 1_000 + 3 * 60_000;
    let outcome = advance_tick(&mut game, &service, after_limit, &mut rng);
    assert!(outcome.timeout_reached);
    let winner = game.winner.clone().expect("timeout declares a winner");
    assert_eq!(winner.id, "a");
    assert_eq!(winner.score, 30 + SURVIVAL_BONUS);
    assert_eq!(game.players["b"].score, 20 + SURVIVAL_BONUS);
}

#[test]
fn single_mode_revives_one_npc_while_human_lives() {
    let mut game = started_game(GameMode::Single, GameOptions::default());
    game.add_player(make_player(
        "human",
        PlayerKind::Human,
        vec![Position::new(15, 15)],
        Direction::Right,
    ));
    let mut npc = make_player(
        "bot",
        PlayerKind::Npc,
        vec![Position::new(20, 20)],
        Direction::Left,
    );
    npc.alive = false;
    npc.score = 40;
    game.add_player(npc);

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);

    assert_eq!(outcome.respawned_npc.as_deref(), Some("bot"));
    let npc = &game.players["bot"];
    assert!(npc.alive);
    assert_eq!(npc.snake.len(), 1);
    assert_eq!(npc.score, 0);
    let anchors: Vec<Position> = (0..4).map(|i| crate::game::types::start_anchor(i).0).collect();
    assert!(anchors.contains(&npc.head()));
    assert!(game.winner.is_none());
}

#[test]
fn single_mode_human_and_npc_never_collide() {
    let options = GameOptions {
        strict_mode: true,
        ..GameOptions::default()
    };
    let mut game = started_game(GameMode::Single, options);
    game.add_player(make_player(
        "human",
        PlayerKind::Human,
        vec![Position::new(5, 5)],
        Direction::Right,
    ));
    game.add_player(make_player(
        "bot",
        PlayerKind::Npc,
        vec![Position::new(7, 5)],
        Direction::Left,
    ));

    let service = PowerupService::new(false);
    let mut rng = rand::thread_rng();
    let outcome = advance_tick(&mut game, &service, 2_000, &mut rng);
    assert!(outcome.deaths.is_empty());
    assert!(game.players["human"].alive);
    assert!(game.players["bot"].alive);
}

#[test]
fn snake_invariants_hold_over_random_play() {
    let mut rng = rand::thread_rng();
    let service = PowerupService::new(true);
    for round in 0..20 {
        let options = GameOptions {
            wall_mode: round % 2 == 0,
            strict_mode: round % 3 == 0,
            ..GameOptions::default()
        };
        let mut game = started_game(GameMode::Multi, options);
        for (index, id) in ["a", "b", "c", "d"].iter().enumerate() {
            let (anchor, direction) = crate::game::types::start_anchor(index);
            game.add_player(make_player(id, PlayerKind::Human, vec![anchor], direction));
        }
        game.food.push(Position::new(15, 15));

        let mut now = 2_000;
        for tick in 0..120 {
            // Random inputs through the real gate.
            for id in ["a", "b", "c", "d"] {
                if rng.gen_bool(0.4) {
                    let direction = crate::game::grid::ALL_DIRECTIONS
                        [rng.gen_range(0..crate::game::grid::ALL_DIRECTIONS.len())];
                    let _ = handle_input(&mut game, id, direction, now);
                }
            }
            advance_tick(&mut game, &service, now, &mut rng);
            now += 150;

            for player in game.players.values() {
                assert!(player.score >= 0);
                assert!(!player.snake.is_empty());
                if player.alive {
                    let mut seen = HashSet::new();
                    for segment in &player.snake {
                        assert!(seen.insert(*segment), "self-overlap at tick {tick}");
                    }
                    for food in &game.food {
                        assert!(!player.snake.contains(food), "food under a snake");
                    }
                }
            }
            let mut food_cells = HashSet::new();
            for food in &game.food {
                assert!(food_cells.insert(*food), "duplicate food cell");
            }
            if game.winner.is_some() {
                break;
            }
        }
    }
}

// ---- room lifecycle ------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn solo_room_runs_countdown_ticks_and_ends_on_quit() {
    let shared = test_shared();
    let room = Room::new("SPTEST1".to_string(), GameMode::Solo, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_id, tx, mut rx) = open_conn();

    let payload = crate::protocol::StartSinglePlayerPayload {
        player_name: "Solo".to_string(),
        npc_count: Some(0),
        ..Default::default()
    };
    room.setup_single_player(&conn_id, tx, &payload)
        .await
        .expect("setup");
    let events = drain(&mut rx);
    assert_eq!(events_named(&events, "joinedRoom").len(), 1);
    assert_eq!(events_named(&events, "gameStarted").len(), 1);

    room.player_ready(&conn_id, None).await.expect("ready");
    // Ready delay + 5..0 countdown + a few ticks.
    tokio::time::sleep(Duration::from_millis(8_000)).await;
    let events = drain(&mut rx);
    let countdowns = events_named(&events, "gameCountdown");
    assert_eq!(countdowns.len(), 6);
    assert_eq!(countdowns[0]["payload"]["countdown"], 5);
    assert_eq!(countdowns[5]["payload"]["countdown"], 0);
    assert!(!events_named(&events, "gameStateUpdate").is_empty());
    assert!(room.ticker_is_running());

    // Countdown zero must precede the first running-state update.
    let countdown_zero_index = events
        .iter()
        .position(|event| event["event"] == "gameCountdown" && event["payload"]["countdown"] == 0)
        .unwrap();
    let first_update_index = events
        .iter()
        .position(|event| event["event"] == "gameStateUpdate")
        .unwrap();
    assert!(countdown_zero_index < first_update_index);

    room.quit(&conn_id, "alone").await.expect("quit");
    let events = drain(&mut rx);
    let ended = events_named(&events, "gameEnded");
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0]["payload"]["winner"]["isLoser"], true);
    assert!(shared.rooms.get("SPTEST1").is_none());

    let sessions = shared.registry.recent(5, now_millis(), |_| false);
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].is_active);
}

#[tokio::test(start_paused = true)]
async fn multi_room_full_match_and_cleanup() {
    let shared = test_shared();
    let room = Room::new("DUEL".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, mut rx_a) = open_conn();
    let (conn_b, tx_b, mut rx_b) = open_conn();

    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "DUEL"))
        .await
        .expect("join a");
    room.join_multi(&conn_b, tx_b, &join_payload("Grace", "DUEL"))
        .await
        .expect("join b");

    let events = drain(&mut rx_a);
    assert_eq!(events_named(&events, "joinedRoom").len(), 1);
    assert_eq!(events_named(&events, "playerJoined").len(), 2);

    // Non-host start is rejected.
    let denied = room.start_game(&conn_b).await;
    assert!(matches!(denied, Err(RoomError::Authorization(_))));

    room.start_game(&conn_a).await.expect("host start");
    let events = drain(&mut rx_b);
    assert_eq!(events_named(&events, "gameStarted").len(), 1);

    room.player_ready(&conn_a, None).await.expect("ready a");
    room.player_ready(&conn_b, None).await.expect("ready b");
    tokio::time::sleep(Duration::from_millis(7_000)).await;
    let events = drain(&mut rx_a);
    assert!(!events_named(&events, "allPlayersReady").is_empty());
    assert_eq!(events_named(&events, "gameCountdown").len(), 6);
    assert!(room.ticker_is_running());

    // The quitter drops the room to one connected player: the game ends.
    room.quit(&conn_b, "alone").await.expect("quit b");
    let events = drain(&mut rx_a);
    assert_eq!(events_named(&events, "playerQuit").len(), 1);
    assert_eq!(events_named(&events, "gameEnded").len(), 1);

    // Multi rooms linger for the game-over screen, then disappear.
    assert!(shared.rooms.get("DUEL").is_some());
    tokio::time::sleep(Duration::from_millis(ROOM_CLEANUP_MS + 1_000)).await;
    assert!(shared.rooms.get("DUEL").is_none());
}

#[tokio::test(start_paused = true)]
async fn join_validation_rejects_duplicates_and_overflow() {
    let shared = test_shared();
    let room = Room::new("FULL".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));

    let (conn_a, tx_a, _rx_a) = open_conn();
    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "FULL"))
        .await
        .expect("first join");

    let (conn_dup, tx_dup, _rx) = open_conn();
    let duplicate = room
        .join_multi(&conn_dup, tx_dup, &join_payload("ada", "FULL"))
        .await;
    assert!(matches!(duplicate, Err(RoomError::Validation(_))));

    let (conn_empty, tx_empty, _rx) = open_conn();
    let empty = room
        .join_multi(&conn_empty, tx_empty, &join_payload("   ", "FULL"))
        .await;
    assert!(matches!(empty, Err(RoomError::Validation(_))));

    for name in ["Grace", "Edsger", "Barbara"] {
        let (conn, tx, _rx) = open_conn();
        room.join_multi(&conn, tx, &join_payload(name, "FULL"))
            .await
            .expect("join");
    }
    let (conn_over, tx_over, _rx) = open_conn();
    let overflow = room
        .join_multi(&conn_over, tx_over, &join_payload("Fifth", "FULL"))
        .await;
    assert!(matches!(overflow, Err(RoomError::Validation(_))));
}

#[tokio::test(start_paused = true)]
async fn lobby_host_quit_promotes_first_joined() {
    let shared = test_shared();
    let room = Room::new("ELECT".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, _rx_a) = open_conn();
    let (conn_b, tx_b, mut rx_b) = open_conn();

    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "ELECT"))
        .await
        .expect("join a");
    room.join_multi(&conn_b, tx_b, &join_payload("Grace", "ELECT"))
        .await
        .expect("join b");
    room.quit(&conn_a, "alone").await.expect("host quits");

    let events = drain(&mut rx_b);
    let changed = events_named(&events, "hostChanged");
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0]["payload"]["newHostName"], "Grace");

    let state = room.state.lock().await;
    let grace = state
        .participants
        .values()
        .find(|member| member.name == "Grace")
        .unwrap();
    assert!(grace.is_host);
}

#[tokio::test(start_paused = true)]
async fn ready_phase_reconnect_keeps_identity_and_roster() {
    let shared = test_shared();
    let room = Room::new("RECON".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, mut rx_a) = open_conn();
    let (conn_b, tx_b, mut rx_b) = open_conn();

    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "RECON"))
        .await
        .expect("join a");
    room.join_multi(&conn_b, tx_b, &join_payload("Grace", "RECON"))
        .await
        .expect("join b");
    let events = drain(&mut rx_b);
    let joined = events_named(&events, "joinedRoom")[0];
    let original_id = joined["payload"]["playerId"].as_str().unwrap().to_string();
    let token = joined["payload"]["playerToken"].as_str().unwrap().to_string();

    room.start_game(&conn_a).await.expect("start");
    drain(&mut rx_a);
    drain(&mut rx_b);

    // Grace drops during Ready and rejoins with her token.
    room.handle_disconnect(&conn_b).await;
    let (conn_b2, tx_b2, mut rx_b2) = open_conn();
    let mut payload = join_payload("Grace", "RECON");
    payload.player_token = Some(token);
    room.join_multi(&conn_b2, tx_b2, &payload)
        .await
        .expect("reconnect");

    let events = drain(&mut rx_b2);
    let rejoined = events_named(&events, "joinedRoom")[0];
    assert_eq!(rejoined["payload"]["playerId"], original_id.as_str());
    assert_eq!(events_named(&events, "gameStarted").len(), 1);
    assert_eq!(room.participant_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn pause_resume_shifts_inactivity_clock() {
    let shared = test_shared();
    let room = Room::new("SPPAUSE".to_string(), GameMode::Solo, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_id, tx, mut rx) = open_conn();
    let payload = crate::protocol::StartSinglePlayerPayload {
        player_name: "Solo".to_string(),
        npc_count: Some(1),
        ..Default::default()
    };
    room.setup_single_player(&conn_id, tx, &payload)
        .await
        .expect("setup");
    room.player_ready(&conn_id, None).await.expect("ready");
    tokio::time::sleep(Duration::from_millis(7_000)).await;
    drain(&mut rx);

    let before = {
        let state = room.state.lock().await;
        let game = state.game.as_ref().unwrap();
        assert!(game.started());
        game.last_input_at_ms.values().copied().collect::<Vec<_>>()
    };

    room.pause(&conn_id).await.expect("pause");
    // The paused tokio clock does not move SystemTime, so backdate the pause
    // start to simulate four seconds of wall-clock pause.
    {
        let mut state = room.state.lock().await;
        let game = state.game.as_mut().unwrap();
        game.pause_started_at_ms = now_millis() - 4_000;
    }
    room.resume(&conn_id).await.expect("resume");
    tokio::time::sleep(Duration::from_millis(7_000)).await;

    let events = drain(&mut rx);
    assert_eq!(events_named(&events, "gamePaused").len(), 1);
    assert_eq!(events_named(&events, "resumeCountdown").len(), 6);
    assert_eq!(events_named(&events, "gameResumed").len(), 1);

    let state = room.state.lock().await;
    let game = state.game.as_ref().unwrap();
    assert!(!game.paused);
    assert!(game.total_pause_ms >= 4_000);
    let after: Vec<i64> = game.last_input_at_ms.values().copied().collect();
    // Every entry moved forward by exactly the pause duration.
    assert_eq!(before.len(), after.len());
    for (before, after) in before.iter().zip(after.iter()) {
        assert_eq!(after - before, game.total_pause_ms);
    }
}

#[tokio::test(start_paused = true)]
async fn watchdog_kicks_idle_multi_player() {
    let shared = test_shared();
    let room = Room::new("IDLE".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, mut rx_a) = open_conn();
    let (conn_b, tx_b, mut rx_b) = open_conn();
    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "IDLE"))
        .await
        .expect("join a");
    room.join_multi(&conn_b, tx_b, &join_payload("Grace", "IDLE"))
        .await
        .expect("join b");
    room.start_game(&conn_a).await.expect("start");
    room.player_ready(&conn_a, None).await.expect("ready a");
    room.player_ready(&conn_b, None).await.expect("ready b");
    tokio::time::sleep(Duration::from_millis(7_000)).await;
    drain(&mut rx_a);
    drain(&mut rx_b);

    // Make Grace idle past the kick threshold, then run one tick directly.
    let grace_id = {
        let mut state = room.state.lock().await;
        let grace_id = state
            .participants
            .values()
            .find(|member| member.name == "Grace")
            .map(|member| member.id.clone())
            .unwrap();
        let now = now_millis();
        let game = state.game.as_mut().unwrap();
        game.last_input_at_ms
            .insert(grace_id.clone(), now - watchdog::KICK_MS - 1_000);
        grace_id
    };
    {
        let mut state = room.state.lock().await;
        room.run_tick(&mut state).expect("tick");
    }

    let events_b = drain(&mut rx_b);
    assert_eq!(events_named(&events_b, "playerKicked").len(), 1);
    let events_a = drain(&mut rx_a);
    let left = events_named(&events_a, "playerLeft");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["payload"]["reason"], "inactive");

    let state = room.state.lock().await;
    assert!(!state.participants.contains_key(&grace_id));
    assert!(!state.tokens.values().any(|id| id == &grace_id));
}

#[tokio::test(start_paused = true)]
async fn public_room_index_tracks_lifecycle() {
    let shared = test_shared();
    let room = Room::new("OPEN".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, mut rx_a) = open_conn();
    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "OPEN"))
        .await
        .expect("join");

    room.toggle_public(
        &conn_a,
        &crate::protocol::TogglePublicRoomPayload {
            room_code: "OPEN".to_string(),
            is_public: Some(true),
        },
    )
    .await;
    let events = drain(&mut rx_a);
    let status = events_named(&events, "publicRoomStatus");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["payload"]["isPublic"], true);
    {
        let index = shared.public_rooms.read().unwrap();
        assert!(index.contains_key("OPEN"));
    }

    // A second player keeps it listed; starting the game delists it.
    let (conn_b, tx_b, _rx_b) = open_conn();
    room.join_multi(&conn_b, tx_b, &join_payload("Grace", "OPEN"))
        .await
        .expect("join b");
    {
        let index = shared.public_rooms.read().unwrap();
        assert_eq!(index.get("OPEN").unwrap().player_count, 2);
    }
    room.start_game(&conn_a).await.expect("start");
    {
        let index = shared.public_rooms.read().unwrap();
        assert!(!index.contains_key("OPEN"));
    }
}

#[tokio::test(start_paused = true)]
async fn chat_is_rate_limited_per_player() {
    let shared = test_shared();
    let room = Room::new("CHATTY".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, mut rx_a) = open_conn();
    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "CHATTY"))
        .await
        .expect("join");
    drain(&mut rx_a);

    room.chat(&conn_a, "hello").await.expect("chat");
    room.chat(&conn_a, "too fast").await.expect("rate limited silently");
    let events = drain(&mut rx_a);
    let chats = events_named(&events, "chatMessage");
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["payload"]["message"], "hello");

    tokio::time::sleep(Duration::from_millis(CHAT_RATE_MS as u64 + 100)).await;
    let long = "x".repeat(500);
    room.chat(&conn_a, &long).await.expect("capped chat");
    let events = drain(&mut rx_a);
    let chats = events_named(&events, "chatMessage");
    assert_eq!(chats.len(), 1);
    assert_eq!(
        chats[0]["payload"]["message"].as_str().unwrap().len(),
        crate::protocol::MAX_CHAT_LENGTH
    );
}

#[tokio::test(start_paused = true)]
async fn options_are_host_only_and_locked_after_start() {
    let shared = test_shared();
    let room = Room::new("OPTS".to_string(), GameMode::Multi, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_a, tx_a, mut rx_a) = open_conn();
    let (conn_b, tx_b, _rx_b) = open_conn();
    room.join_multi(&conn_a, tx_a, &join_payload("Ada", "OPTS"))
        .await
        .expect("join a");
    room.join_multi(&conn_b, tx_b, &join_payload("Grace", "OPTS"))
        .await
        .expect("join b");
    drain(&mut rx_a);

    let patch = crate::protocol::UpdateGameOptionsPayload {
        room_code: "OPTS".to_string(),
        game_options: crate::protocol::GameOptionsUpdate {
            wall_mode: Some(true),
            strict_mode: Some(true),
            time_limit: Some(Some(5)),
        },
    };
    let denied = room.update_options(&conn_b, &patch).await;
    assert!(matches!(denied, Err(RoomError::Authorization(_))));

    room.update_options(&conn_a, &patch).await.expect("host update");
    let events = drain(&mut rx_a);
    let updated = events_named(&events, "gameOptionsUpdated");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["payload"]["gameOptions"]["wallMode"], true);
    assert_eq!(updated[0]["payload"]["gameOptions"]["timeLimit"], 5);

    let bad_limit = crate::protocol::UpdateGameOptionsPayload {
        room_code: "OPTS".to_string(),
        game_options: crate::protocol::GameOptionsUpdate {
            time_limit: Some(Some(7)),
            ..Default::default()
        },
    };
    assert!(matches!(
        room.update_options(&conn_a, &bad_limit).await,
        Err(RoomError::Validation(_))
    ));

    room.start_game(&conn_a).await.expect("start");
    assert!(matches!(
        room.update_options(&conn_a, &patch).await,
        Err(RoomError::State(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn solo_disconnect_pauses_then_expires_the_room() {
    let shared = test_shared();
    let room = Room::new("SPGONE".to_string(), GameMode::Solo, Arc::clone(&shared));
    shared.rooms.insert(room.code.clone(), Arc::clone(&room));
    let (conn_id, tx, mut rx) = open_conn();
    let payload = crate::protocol::StartSinglePlayerPayload {
        player_name: "Solo".to_string(),
        npc_count: Some(0),
        ..Default::default()
    };
    room.setup_single_player(&conn_id, tx, &payload)
        .await
        .expect("setup");
    room.player_ready(&conn_id, None).await.expect("ready");
    tokio::time::sleep(Duration::from_millis(7_000)).await;
    drain(&mut rx);

    room.handle_disconnect(&conn_id).await;
    {
        let state = room.state.lock().await;
        assert!(state.game.as_ref().unwrap().paused);
    }

    // Grace window passes with no reconnect: game over, room gone.
    tokio::time::sleep(Duration::from_millis(SOLO_DISCONNECT_GRACE_MS + 1_000)).await;
    assert!(shared.rooms.get("SPGONE").is_none());
    let sessions = shared.registry.recent(5, now_millis(), |_| false);
    assert_eq!(sessions.len(), 1);
}
