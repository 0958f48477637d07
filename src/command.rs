//! Command lines and the phases they run in.

use crate::error::{Error, Result};
use std::fmt;

/// Lifecycle phase a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Optional command run before main
    PreStart,
    /// Mandatory main command
    Main,
    /// Optional command run after main, whatever its outcome
    PostStop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreStart => write!(f, "Pre-start"),
            Phase::Main => write!(f, "Main"),
            Phase::PostStop => write!(f, "Post-stop"),
        }
    }
}

/// A program and its arguments.
///
/// Built from a single command line split on runs of whitespace. There is no
/// quoting or escaping: `sh -c "echo hi"` yields the arguments `-c`, `"echo`
/// and `hi"`. Callers needing an argument with embedded spaces should wrap
/// the command in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Tokenize a command line.
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next().ok_or(Error::EmptyCommand)?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Tokenize an optional command line, treating a blank line as absent.
    pub fn parse_optional(line: &str) -> Option<Self> {
        Self::parse(line).ok()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
