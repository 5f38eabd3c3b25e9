pub mod grid;
pub mod npc;
pub mod powerups;
pub mod room;
pub mod simulation;
pub mod types;
pub mod watchdog;
