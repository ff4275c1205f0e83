//! Stdio Helper
//!
//! Terminal init and de-init for the interactive console
//! Line editing with history for `key {json}` command input
//! Ctrl+C hook that asks the input loop to quit
//! Persistent bottom input bar showing the link status

#![allow(unused_must_use)]

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::Stylize;
use crossterm::{ExecutableCommand, QueueableCommand, cursor, terminal};

#[cfg(target_os = "linux")]
use termios::{ECHO, ICANON, TCSADRAIN, Termios};

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                             Globals
// —————————————————————————————————————————————————————————————————————————————————————————————————

pub const TERM_PADDED_LINES: u16 = 2;
pub const HISTORY_LEN: usize = 64;

/// Set from the Ctrl+C handler, consumed by `ConsoleInput::poll`
static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                             Macros
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[macro_export]
macro_rules! terminal_start {
    () => {
        $crate::stdio_helper::stdout_init()
    };
}

/// Restores the terminal. The caller returns normally afterwards so open handles drop.
#[macro_export]
macro_rules! terminal_end {
    () => {{
        $crate::stdio_helper::stdout_de_init();
        println!("Exiting...\n");
    }};
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Console Input
// —————————————————————————————————————————————————————————————————————————————————————————————————

/// What a poll of the keyboard produced
#[derive(Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// Nothing complete yet
    Pending,
    /// Enter pressed, carries the finished line
    Line(String),
    /// Ctrl+C or Ctrl+D
    Quit,
}

/// Raw stdin line editor with history.
///
/// Example:
/// ```no_run
/// use ydt_serial_link::stdio_helper::{ConsoleInput, InputEvent};
///
/// let mut input = ConsoleInput::default();
/// loop {
///     match input.poll().unwrap() {
///         InputEvent::Line(line) => println!("{line}"),
///         InputEvent::Quit => break,
///         InputEvent::Pending => {}
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct ConsoleInput {
    line:       String,
    history:    VecDeque<String>,
    scroll_pos: usize,
}

impl ConsoleInput {
    /// Line being edited
    pub fn current(&self) -> &str {
        &self.line
    }

    /// Drains pending key events without blocking
    pub fn poll(&mut self) -> io::Result<InputEvent> {
        if QUIT_REQUESTED.swap(false, Ordering::SeqCst) {
            return Ok(InputEvent::Quit);
        }

        while event::poll(Duration::from_millis(0))? {
            let Event::Key(key_event) = event::read()?
            else {
                continue;
            };
            if key_event.kind != KeyEventKind::Press {
                continue;
            }

            if let Some(done) = self.apply(key_event.code, key_event.modifiers) {
                return Ok(done);
            }
        }

        Ok(InputEvent::Pending)
    }

    fn apply(&mut self, code: KeyCode, modifiers: KeyModifiers) -> Option<InputEvent> {
        const CTRL: KeyModifiers = KeyModifiers::CONTROL;

        match (code, modifiers) {
            // Ctrl-C / Ctrl-D
            (KeyCode::Char('c'), CTRL) | (KeyCode::Char('d'), CTRL) => return Some(InputEvent::Quit),
            // Enter
            (KeyCode::Enter, _) | (KeyCode::Char('j'), CTRL) => {
                let line = std::mem::take(&mut self.line);
                self.scroll_pos = 0;
                if line.trim().is_empty() {
                    return None;
                }
                if self.history.front() != Some(&line) {
                    self.history.push_front(line.clone());
                    self.history.truncate(HISTORY_LEN);
                }
                return Some(InputEvent::Line(line));
            }
            (KeyCode::Backspace, _) => {
                self.line.pop();
            }
            // Ctrl + u - Clear
            (KeyCode::Char('u'), CTRL) | (KeyCode::Esc, _) => {
                self.line.clear();
                self.scroll_pos = 0;
            }
            (KeyCode::Up, _) => {
                if let Some(item) = self.history.get(self.scroll_pos) {
                    self.line = item.clone();
                    self.scroll_pos += 1;
                }
            }
            (KeyCode::Down, _) => {
                if self.scroll_pos <= 1 {
                    self.line.clear();
                    self.scroll_pos = 0;
                }
                else if let Some(item) = self.history.get(self.scroll_pos - 2) {
                    self.line = item.clone();
                    self.scroll_pos -= 1;
                }
            }
            (KeyCode::Char(c), _) => self.line.push(c),
            _ => {}
        }

        None
    }
}

// —————————————————————————————————————————— Input Bar ————————————————————————————————————————————

/// Redraws the bottom bar: link status on the left, the line being edited after the prompt
pub fn print_input_bar(status: &str, input: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    let (_cols, rows) = terminal::size()?;

    stdout.queue(cursor::SavePosition)?;
    stdout.queue(cursor::MoveTo(0, rows))?;
    stdout.queue(terminal::Clear(terminal::ClearType::CurrentLine))?;

    write!(stdout, "{} {} {}", status.red(), ">>:".green(), input.blue())?;

    stdout.queue(cursor::MoveUp(TERM_PADDED_LINES))?;
    stdout.execute(cursor::RestorePosition)?;
    Ok(())
}

// ———————————————————————————————————————————— Init ———————————————————————————————————————————————

/// Init Terminal
pub fn stdout_init() -> io::Result<()> {
    ctrlc::set_handler(|| QUIT_REQUESTED.store(true, Ordering::SeqCst)).map_err(io::Error::other)?;

    // On Linux we disable canonical mode (instead of raw mode) to gain access to non buffered input
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;

        let fd = io::stdin().as_raw_fd();
        let mut termios = Termios::from_fd(fd)?;

        // Keep the other terminal modes, only drop line buffering and echo
        termios.c_lflag &= !(ICANON | ECHO);
        termios.c_cc[termios::VMIN] = 1;
        termios.c_cc[termios::VTIME] = 0;

        termios::tcsetattr(fd, TCSADRAIN, &termios)?;
    }

    let mut stdout = io::stdout();
    let (_cols, rows) = terminal::size()?;

    stdout.queue(cursor::Hide)?;
    stdout.queue(cursor::SavePosition)?;

    print!("\x1b[0m"); // Reset Style
    print!("{}", "\n".repeat(TERM_PADDED_LINES as usize + 1)); // PAD previous output
    print!("\x1b[r"); // Reset scrollable region
    print!("\x1b[{};{}r", 0, rows.saturating_sub(TERM_PADDED_LINES)); // Set scrollable region

    stdout.queue(cursor::RestorePosition)?;
    stdout.execute(cursor::MoveToRow(rows.saturating_sub(TERM_PADDED_LINES + 1)))?;
    Ok(())
}

// ——————————————————————————————————————————— De-Init —————————————————————————————————————————————

/// De-init Terminal. Best effort, runs from the Ctrl+C handler too.
pub fn stdout_de_init() {
    let mut stdout = io::stdout();
    let rows = terminal::size().map(|(_, rows)| rows).unwrap_or(0);

    crossterm::terminal::disable_raw_mode(); // Takes care of restoring termios canonical mode

    print!("\x1b[r"); // Reset scrollable region
    print!("\x1b[0m"); // Reset Style

    stdout.queue(cursor::MoveTo(0, rows));
    stdout.queue(terminal::Clear(terminal::ClearType::CurrentLine));
    stdout.execute(cursor::Show);
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
