use crate::Coords;
use Direction::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right
}

/// The snake's body, tail first. The last segment is the head, so the
/// body is never empty.
pub struct Snake {
    body: Vec<Coords>,
    direction: Direction,
    score: u32,
}

impl Snake {
    pub fn new(pos: Coords) -> Self {
        Snake { body: vec![pos], direction: Left, score: 0 }
    }

    pub fn body(&self) -> &[Coords] {
        &self.body
    }

    pub fn head(&self) -> Coords {
        self.body[self.body.len() - 1]
    }

    pub fn set_direction(&mut self, new_direction: Direction) {
        match (&new_direction, &self.direction) {
            (Up, Down) | (Down, Up) | (Right, Left) | (Left, Right) => {},
            _ => self.direction = new_direction,
        };
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn score(&self) -> u32 {
        self.score
    }
}
