//! Progress and status output.
//!
//! Status lines are prefixed with `[i]`, errors with `[!]`. Per-item progress
//! rewrites the current line with a carriage return until the next status line.

use std::fmt::Display;
use std::io::{self, Write};

pub struct Console<W: Write> {
    out: W,
    in_progress: bool,
}

impl Console<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            in_progress: false,
        }
    }

    pub fn info(&mut self, message: impl Display) -> io::Result<()> {
        self.end_progress()?;
        writeln!(self.out, "[i] {message}")
    }

    pub fn error(&mut self, message: impl Display) -> io::Result<()> {
        self.end_progress()?;
        writeln!(self.out, "[!] {message}")
    }

    /// Show `[i] <verb> <current> of <total>` in place of the previous progress line.
    pub fn progress(&mut self, verb: &str, current: usize, total: usize) -> io::Result<()> {
        write!(self.out, "\r[i] {verb} {current} of {total}")?;
        self.in_progress = true;
        self.out.flush()
    }

    /// Terminate a pending progress line so the next output starts clean.
    pub fn end_progress(&mut self) -> io::Result<()> {
        if self.in_progress {
            self.in_progress = false;
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
