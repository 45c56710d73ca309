//! Testing utilities for the installer workspace.
//!
//! [`FakeOne`] answers the `one*` commands from memory and simulates the
//! asynchronous state changes of a real front-end; [`ScriptedPrompter`]
//! replays canned operator answers.

#![allow(missing_docs)]

mod fake_one;
mod prompter;

pub use fake_one::{CatalogApp, FakeOne};
pub use prompter::ScriptedPrompter;
