use crate::{Coords, TermInt};

pub const EMPTY_CELL: u8 = b'.';
pub const SNAKE_CELL: u8 = b'S';
pub const APPLE_CELL: u8 = b'@';

/// Screen-sized character buffer, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: TermInt,
    height: TermInt,
    cells: Vec<u8>,
}

impl Grid {
    pub fn new(width: TermInt, height: TermInt) -> Self {
        let len = width as usize * height as usize;
        Grid { width, height, cells: vec![EMPTY_CELL; len] }
    }

    /// Maps a cell to its offset in the buffer, `None` when off the grid.
    pub fn index(&self, pos: Coords) -> Option<usize> {
        let (x, y) = pos;
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(x as usize + y as usize * self.width as usize)
    }

    pub fn get(&self, pos: Coords) -> Option<u8> {
        self.index(pos).map(|i| self.cells[i])
    }

    /// Overwrites a cell. Positions off the grid are ignored.
    pub fn set(&mut self, pos: Coords, ch: u8) {
        if let Some(i) = self.index(pos) {
            self.cells[i] = ch;
        }
    }

    /// Rows from top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let width = self.width as usize;
        (0..self.height as usize).map(move |y| &self.cells[y * width..(y + 1) * width])
    }

    pub fn empty_cells(&self) -> Vec<Coords> {
        let width = self.width as usize;
        self.cells
            .iter()
            .enumerate()
            .filter(|&(_, &ch)| ch == EMPTY_CELL)
            .map(|(i, _)| ((i % width) as TermInt, (i / width) as TermInt))
            .collect()
    }
}
