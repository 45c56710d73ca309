//! Convenience builder for backend command arguments.
//!
//! This module provides a lightweight helper for assembling the argument
//! vector of a backend command from required and optional values, and for
//! rendering it in logs.

use std::fmt::Display;

/// Builder for assembling command arguments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandArgs {
    args: Vec<String>,
}

impl CommandArgs {
    /// Create a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Start a builder with a subcommand (`show`, `chown`, ...).
    #[must_use]
    pub fn subcommand(name: &str) -> Self {
        Self {
            args: vec![name.to_string()],
        }
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg<T>(mut self, value: T) -> Self
    where
        T: Display,
    {
        self.args.push(value.to_string());
        self
    }

    /// Append a flag with no value.
    #[must_use]
    pub fn flag(mut self, flag: &'static str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    /// Append a `--key value` pair.
    #[must_use]
    pub fn option<T>(mut self, key: &'static str, value: T) -> Self
    where
        T: Display,
    {
        self.args.push(key.to_string());
        self.args.push(value.to_string());
        self
    }

    /// Append a `--key value` pair when the value is present.
    #[must_use]
    pub fn option_opt<T>(self, key: &'static str, value: Option<T>) -> Self
    where
        T: Display,
    {
        match value {
            Some(value) => self.option(key, value),
            None => self,
        }
    }

    /// Request JSON output.
    #[must_use]
    pub fn json(self) -> Self {
        self.flag("--json")
    }

    /// Return the collected arguments.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.args
    }

    /// Borrow the collected arguments.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    /// Returns true if no arguments have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Renders a program and its arguments as a single shell-like line for logs
/// and error messages. Arguments containing whitespace are quoted.
#[must_use]
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push('\'');
            line.push_str(arg);
            line.push('\'');
        } else {
            line.push_str(arg);
        }
    }
    line
}
