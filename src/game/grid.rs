use serde::{Deserialize, Serialize};

pub const GRID_WIDTH: i32 = 30;
pub const GRID_HEIGHT: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn in_bounds(&self) -> bool {
        (0..GRID_WIDTH).contains(&self.x) && (0..GRID_HEIGHT).contains(&self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

pub const ALL_DIRECTIONS: [Direction; 4] = [
    Direction::Up,
    Direction::Down,
    Direction::Left,
    Direction::Right,
];

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// A change from `current` to `next` is admissible unless it reverses.
pub fn is_turn_allowed(current: Direction, next: Direction) -> bool {
    next != current.opposite()
}

/// Head position after one step with toroidal wrapping.
pub fn step_wrapped(pos: Position, direction: Direction) -> Position {
    let (dx, dy) = direction.delta();
    Position {
        x: (pos.x + dx).rem_euclid(GRID_WIDTH),
        y: (pos.y + dy).rem_euclid(GRID_HEIGHT),
    }
}

/// Head position after one step without wrapping. The result may lie outside
/// the board; in wall mode that is a wall collision.
pub fn step_unbounded(pos: Position, direction: Direction) -> Position {
    let (dx, dy) = direction.delta();
    Position {
        x: pos.x + dx,
        y: pos.y + dy,
    }
}

pub fn step(pos: Position, direction: Direction, wall_mode: bool) -> Position {
    if wall_mode {
        step_unbounded(pos, direction)
    } else {
        step_wrapped(pos, direction)
    }
}

/// Signed per-axis deltas from `from` to `to`. Without walls each axis takes
/// the shorter way around the torus.
pub fn axis_deltas(from: Position, to: Position, wall_mode: bool) -> (i32, i32) {
    let mut dx = to.x - from.x;
    let mut dy = to.y - from.y;
    if !wall_mode {
        if dx.abs() > GRID_WIDTH / 2 {
            dx -= GRID_WIDTH * dx.signum();
        }
        if dy.abs() > GRID_HEIGHT / 2 {
            dy -= GRID_HEIGHT * dy.signum();
        }
    }
    (dx, dy)
}

pub fn manhattan_distance(from: Position, to: Position, wall_mode: bool) -> i32 {
    let (dx, dy) = axis_deltas(from, to, wall_mode);
    dx.abs() + dy.abs()
}

/// Distance to the nearest board edge, in cells. Only meaningful in wall mode.
pub fn wall_distance(pos: Position) -> i32 {
    let dx = pos.x.min(GRID_WIDTH - 1 - pos.x);
    let dy = pos.y.min(GRID_HEIGHT - 1 - pos.y);
    dx.min(dy)
}

pub fn board_center() -> Position {
    Position::new(GRID_WIDTH / 2, GRID_HEIGHT / 2)
}
