mod game;
mod grid;
mod input;
mod logging;
mod snake;
mod term;

use std::io::{stdin, stdout};
use std::process::exit;

use anyhow::{Context, Result};

use crate::term::{RawMode, Terminal};

pub type TermInt = u16;
pub type Coords = (u16, u16);

const LOG_FILE_PATH: &str = "logs.txt";

fn main() {
    // Everything owned by `run` is dropped before we get here, so the
    // terminal is already back in canonical mode when the error prints.
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        exit(1);
    }
}

fn run() -> Result<()> {
    logging::init(LOG_FILE_PATH)?;

    let mode = RawMode::enable(stdin())?;
    let term = Terminal::new(stdout(), mode);

    let mut game = game::SnakeGame::new(stdin(), term).context("get window size")?;
    game.run()
}
