use std::io::{Read, Write};

use crate::grid::{Grid, APPLE_CELL, SNAKE_CELL};
use crate::input::{ctrl, Key, KeyReader};
use crate::snake::{Direction::*, Snake};
use crate::term::{Terminal, WindowSize};
use crate::Coords;

use anyhow::{Context, Result};
use rand::seq::SliceRandom;

const QUIT_KEY: u8 = ctrl(b'q');

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Everything a running game touches: the terminal on both ends, the screen
/// buffer, the snake and the cursor.
pub struct SnakeGame<R, W: Write> {
    keys: KeyReader<R>,
    term: Terminal<W>,
    size: WindowSize,
    grid: Grid,
    snake: Snake,
    cursor: Coords,
}

impl<R: Read, W: Write> SnakeGame<R, W> {
    pub fn new(input: R, mut term: Terminal<W>) -> Result<Self> {
        let mut keys = KeyReader::new(input);
        let size = term.window_size(&mut keys)?;
        Ok(Self::with_size(keys, term, size))
    }

    pub fn with_size(keys: KeyReader<R>, term: Terminal<W>, size: WindowSize) -> Self {
        let center = (size.cols / 2, size.rows / 2);

        let mut game = SnakeGame {
            keys,
            term,
            size,
            grid: Grid::new(size.cols, size.rows),
            snake: Snake::new(center),
            cursor: (0, 0),
        };
        // The buffer is all empty cells apart from this one apple.
        game.spawn_apple();
        game
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            self.update_game_logic();
            self.refresh_screen()?;

            if self.process_key_press()? == Flow::Quit {
                return Ok(());
            }
        }
    }

    pub fn update_game_logic(&mut self) {
        let head = self.snake.head();
        self.grid.set(head, SNAKE_CELL);

        log::debug!(
            "Snake posXY: {} , {}, Index: {:?}, Heading: {:?}, Score: {}",
            head.0,
            head.1,
            self.grid.index(head),
            self.snake.direction(),
            self.snake.score()
        );
    }

    pub fn refresh_screen(&mut self) -> Result<()> {
        self.term.render(&self.grid).context("write")
    }

    pub fn process_key_press(&mut self) -> Result<Flow> {
        let key = self.keys.read_key().context("read")?;

        match key {
            Key::Char(QUIT_KEY) => {
                self.term.close()?;
                return Ok(Flow::Quit);
            }
            Key::ArrowUp | Key::ArrowDown | Key::ArrowLeft | Key::ArrowRight => {
                self.move_cursor(key)
            }
            _ => {}
        }

        Ok(Flow::Continue)
    }

    /// Moves the cursor one cell, stopping at the edges of the grid. Arrow
    /// keys also turn the snake.
    ///
    /// Moving right only checks the row cursor against the last column, so
    /// the column cursor can run past the right edge.
    pub fn move_cursor(&mut self, key: Key) {
        let (x, y) = &mut self.cursor;
        let (max_x, max_y) = (self.size.cols - 1, self.size.rows - 1);

        let dir = match key {
            Key::ArrowLeft => {
                if *x != 0 {
                    *x -= 1;
                }
                Left
            }
            Key::ArrowUp => {
                if *y != 0 {
                    *y -= 1;
                }
                Up
            }
            Key::ArrowDown => {
                if *y != max_y {
                    *y += 1;
                }
                Down
            }
            Key::ArrowRight => {
                if *y != max_x {
                    *x = x.saturating_add(1);
                }
                Right
            }
            _ => return,
        };

        self.snake.set_direction(dir);
    }

    /// Drops a single apple marker on a random free cell. Nothing eats it
    /// yet, so it only changes what the first frame shows.
    fn spawn_apple(&mut self) -> Option<Coords> {
        let choices: Vec<Coords> = self
            .grid
            .empty_cells()
            .into_iter()
            .filter(|pos| !self.snake.body().contains(pos))
            .collect();
        let res = choices.choose(&mut rand::thread_rng()).copied();

        res.map(|apple| {
            self.grid.set(apple, APPLE_CELL);
            apple
        })
    }

    #[cfg(test)]
    fn terminal(&self) -> &Terminal<W> {
        &self.term
    }
}
