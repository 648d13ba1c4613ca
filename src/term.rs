use crate::grid::Grid;
use crate::input::KeyReader;
use crate::TermInt;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;

use anyhow::{anyhow, ensure, Context, Result};
use crossterm::terminal::{self, ClearType};
use crossterm::{cursor, queue};
use nix::sys::termios::{
    self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
    Termios,
};

/// Read timeout in tenths of a second while in raw mode.
const READ_TIMEOUT_DECISECONDS: u8 = 1;

/// The cursor position report fits in this many bytes, terminator included.
const PROBE_BUFFER_LEN: usize = 32;

/// Large enough to push the cursor into the bottom right corner of any
/// real terminal; the terminal clamps it.
const PROBE_OFFSET: u16 = 999;

const CURSOR_POSITION_REQUEST: &[u8] = b"\x1b[6n";

/// Terminal state that can be put back the way it was found.
pub trait Restore {
    fn restore(&mut self) -> io::Result<()>;
}

/// Saved terminal attributes for a descriptor that has been put into raw
/// mode. The snapshot is handed back at most once, either through
/// [`Restore::restore`] or on drop.
pub struct RawMode<F: AsFd> {
    fd: F,
    original: Option<Termios>,
}

impl<F: AsFd> RawMode<F> {
    pub fn enable(fd: F) -> Result<Self> {
        let original = termios::tcgetattr(&fd).context("tcgetattr")?;

        let mut raw = original.clone();
        raw.local_flags
            .remove(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG | LocalFlags::IEXTEN);
        raw.input_flags.remove(
            InputFlags::BRKINT
                | InputFlags::ISTRIP
                | InputFlags::INPCK
                | InputFlags::IXON
                | InputFlags::ICRNL,
        );
        raw.output_flags.remove(OutputFlags::OPOST);
        raw.control_flags.insert(ControlFlags::CS8);
        // Reads return after the timeout even when nothing was typed.
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = READ_TIMEOUT_DECISECONDS;

        termios::tcsetattr(&fd, SetArg::TCSAFLUSH, &raw).context("tcsetattr")?;

        Ok(RawMode { fd, original: Some(original) })
    }
}

impl<F: AsFd> Restore for RawMode<F> {
    fn restore(&mut self) -> io::Result<()> {
        if let Some(original) = self.original.take() {
            termios::tcsetattr(&self.fd, SetArg::TCSAFLUSH, &original)?;
        }
        Ok(())
    }
}

impl<F: AsFd> Drop for RawMode<F> {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: TermInt,
    pub cols: TermInt,
}

/// Owns the output side of the terminal session.
///
/// Dropping it (or calling [`Terminal::close`]) clears the screen, shows the
/// cursor again, restores the saved terminal mode and flushes the log. This
/// happens exactly once no matter how many exit paths reach it.
pub struct Terminal<W: Write> {
    out: W,
    mode: Option<Box<dyn Restore>>,
}

impl<W: Write> Terminal<W> {
    pub fn new(out: W, mode: impl Restore + 'static) -> Self {
        Terminal { out, mode: Some(Box::new(mode)) }
    }

    pub fn window_size<R: Read>(&mut self, input: &mut KeyReader<R>) -> Result<WindowSize> {
        resolve_window_size(terminal::size().ok(), input, &mut self.out)
    }

    /// Full clear-and-redraw of the grid, one CRLF terminated line per row.
    pub fn render(&mut self, grid: &Grid) -> io::Result<()> {
        queue!(self.out, cursor::Hide, terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;

        for row in grid.rows() {
            self.out.write_all(row)?;
            self.out.write_all(b"\r\n")?;
        }

        self.out.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        let mut mode = match self.mode.take() {
            Some(mode) => mode,
            None => return Ok(()),
        };

        let cleared = queue!(
            self.out,
            terminal::Clear(ClearType::All),
            cursor::MoveTo(0, 0),
            cursor::Show
        )
        .and_then(|()| self.out.flush())
        .context("write");
        let restored = mode.restore().context("tcsetattr");
        log::logger().flush();

        cleared.and(restored)
    }

    #[cfg(test)]
    pub fn out(&self) -> &W {
        &self.out
    }
}

impl<W: Write> Drop for Terminal<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Picks the direct size query result (`(cols, rows)`) when it is usable,
/// otherwise asks the terminal where the cursor ends up after being pushed
/// into the bottom right corner.
pub fn resolve_window_size<R: Read, W: Write>(
    direct: Option<(TermInt, TermInt)>,
    input: &mut KeyReader<R>,
    out: &mut W,
) -> Result<WindowSize> {
    let size = match direct {
        Some((cols, rows)) if cols != 0 => WindowSize { rows, cols },
        _ => {
            log::warn!("Window size query failed, probing cursor position");
            queue!(out, cursor::MoveRight(PROBE_OFFSET), cursor::MoveDown(PROBE_OFFSET))
                .context("write")?;
            probe_cursor_position(input, out)?
        }
    };

    ensure!(size.rows > 0 && size.cols > 0, "terminal reports an empty window");
    log::info!("Cols: {}, Rows: {}", size.cols, size.rows);
    Ok(size)
}

/// Sends a cursor position request and reads back the report.
pub fn probe_cursor_position<R: Read, W: Write>(
    input: &mut KeyReader<R>,
    out: &mut W,
) -> Result<WindowSize> {
    out.write_all(CURSOR_POSITION_REQUEST)
        .and_then(|()| out.flush())
        .context("write")?;

    let mut reply = Vec::with_capacity(PROBE_BUFFER_LEN);
    while reply.len() < PROBE_BUFFER_LEN - 1 {
        match input.read_byte() {
            Ok(Some(byte)) => {
                reply.push(byte);
                if byte == b'R' {
                    break;
                }
            }
            _ => break,
        }
    }

    parse_position_report(&reply)
}

/// Parses `ESC [ rows ; cols R`. The trailing `R` is optional.
pub fn parse_position_report(reply: &[u8]) -> Result<WindowSize> {
    let body = reply
        .strip_prefix(b"\x1b[")
        .ok_or_else(|| anyhow!("cursor position report is missing ESC ["))?;
    let body = body.strip_suffix(b"R").unwrap_or(body);

    let text = std::str::from_utf8(body).context("cursor position report is not text")?;
    let (rows, cols) = text
        .split_once(';')
        .ok_or_else(|| anyhow!("malformed cursor position report {:?}", text))?;

    Ok(WindowSize {
        rows: rows.parse().with_context(|| format!("bad row count {:?}", rows))?,
        cols: cols.parse().with_context(|| format!("bad column count {:?}", cols))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use nix::pty::openpty;
    use std::io::Cursor;
    use std::rc::Rc;

    struct CountingMode(Rc<Cell<usize>>);

    impl Restore for CountingMode {
        fn restore(&mut self) -> io::Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    fn keys(bytes: &[u8]) -> KeyReader<Cursor<Vec<u8>>> {
        KeyReader::new(Cursor::new(bytes.to_vec()))
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn parses_position_report() {
        assert_eq!(
            parse_position_report(b"\x1b[40;120R").unwrap(),
            WindowSize { rows: 40, cols: 120 }
        );
        assert_eq!(
            parse_position_report(b"\x1b[24;80").unwrap(),
            WindowSize { rows: 24, cols: 80 }
        );
    }

    #[test]
    fn rejects_malformed_reports() {
        assert!(parse_position_report(b"[40;120R").is_err());
        assert!(parse_position_report(b"\x1bO40;120R").is_err());
        assert!(parse_position_report(b"\x1b[forty;120R").is_err());
        assert!(parse_position_report(b"\x1b[40,120R").is_err());
        assert!(parse_position_report(b"\x1b[40;R").is_err());
        assert!(parse_position_report(b"").is_err());
    }

    #[test]
    fn direct_size_is_used_when_columns_are_known() {
        let mut out = Vec::new();
        let size = resolve_window_size(Some((80, 24)), &mut keys(b""), &mut out).unwrap();

        assert_eq!(size, WindowSize { rows: 24, cols: 80 });
        assert!(out.is_empty());
    }

    #[test]
    fn zero_columns_falls_back_to_probe() {
        let mut out = Vec::new();
        let mut input = keys(b"\x1b[40;120R");
        let size = resolve_window_size(Some((0, 24)), &mut input, &mut out).unwrap();

        assert_eq!(size, WindowSize { rows: 40, cols: 120 });
        assert_eq!(out, b"\x1b[999C\x1b[999B\x1b[6n".to_vec());
    }

    #[test]
    fn failed_query_falls_back_to_probe() {
        let mut out = Vec::new();
        let size = resolve_window_size(None, &mut keys(b"\x1b[5;9R"), &mut out).unwrap();
        assert_eq!(size, WindowSize { rows: 5, cols: 9 });
    }

    #[test]
    fn probe_stops_at_terminator() {
        let mut input = keys(b"\x1b[3;4Rq");
        probe_cursor_position(&mut input, &mut Vec::new()).unwrap();
        assert_eq!(input.read_byte().unwrap(), Some(b'q'));
    }

    #[test]
    fn probe_without_reply_fails() {
        assert!(resolve_window_size(None, &mut keys(b""), &mut Vec::new()).is_err());
        assert!(resolve_window_size(None, &mut keys(b"garbage"), &mut Vec::new()).is_err());
    }

    #[test]
    fn probe_reply_is_capped() {
        let mut reply = b"\x1b[1;".to_vec();
        reply.extend(std::iter::repeat(b'1').take(64));
        reply.push(b'R');
        assert!(probe_cursor_position(&mut keys(&reply), &mut Vec::new()).is_err());
    }

    #[test]
    fn empty_window_is_rejected() {
        assert!(resolve_window_size(Some((80, 0)), &mut keys(b""), &mut Vec::new()).is_err());
        assert!(resolve_window_size(None, &mut keys(b"\x1b[0;0R"), &mut Vec::new()).is_err());
    }

    #[test]
    fn render_redraws_every_row() {
        let mut grid = Grid::new(3, 2);
        grid.set((1, 1), b'S');
        let mut term = Terminal::new(Vec::new(), CountingMode(Rc::new(Cell::new(0))));

        term.render(&grid).unwrap();

        let mut expected = b"\x1b[?25l\x1b[2J\x1b[1;1H".to_vec();
        expected.extend_from_slice(b"...\r\n.S.\r\n");
        assert_eq!(term.out(), &expected);
    }

    #[test]
    fn close_restores_once() {
        let restored = Rc::new(Cell::new(0));
        let mut term = Terminal::new(Vec::new(), CountingMode(restored.clone()));

        term.close().unwrap();
        term.close().unwrap();
        assert_eq!(restored.get(), 1);
        assert!(contains(term.out(), b"\x1b[2J"));
        assert!(contains(term.out(), b"\x1b[?25h"));

        drop(term);
        assert_eq!(restored.get(), 1);
    }

    #[test]
    fn drop_restores() {
        let restored = Rc::new(Cell::new(0));
        drop(Terminal::new(Vec::new(), CountingMode(restored.clone())));
        assert_eq!(restored.get(), 1);
    }

    #[test]
    fn raw_mode_needs_a_terminal() {
        let file = tempfile::tempfile().unwrap();
        let err = RawMode::enable(&file).err().unwrap();
        assert!(format!("{:#}", err).starts_with("tcgetattr"));
    }

    #[test]
    fn raw_mode_on_a_pty() {
        let pty = openpty(None, None).unwrap();
        let before = termios::tcgetattr(&pty.slave).unwrap();

        let mut mode = RawMode::enable(&pty.slave).unwrap();
        let raw = termios::tcgetattr(&pty.slave).unwrap();

        assert!(!raw.local_flags.intersects(
            LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG | LocalFlags::IEXTEN
        ));
        assert!(!raw.input_flags.intersects(InputFlags::IXON | InputFlags::ICRNL));
        assert!(!raw.output_flags.contains(OutputFlags::OPOST));
        assert!(raw.control_flags.contains(ControlFlags::CS8));
        assert_eq!(raw.control_chars[SpecialCharacterIndices::VMIN as usize], 0);
        assert_eq!(raw.control_chars[SpecialCharacterIndices::VTIME as usize], 1);

        mode.restore().unwrap();
        mode.restore().unwrap();
        drop(mode);

        let after = termios::tcgetattr(&pty.slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.input_flags, before.input_flags);
        assert_eq!(after.control_chars, before.control_chars);
    }

    #[test]
    fn raw_mode_restores_on_drop() {
        let pty = openpty(None, None).unwrap();
        let before = termios::tcgetattr(&pty.slave).unwrap();

        drop(RawMode::enable(&pty.slave).unwrap());

        let after = termios::tcgetattr(&pty.slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.control_chars, before.control_chars);
    }
}
