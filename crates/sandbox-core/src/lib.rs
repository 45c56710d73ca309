//! # sandbox-core
//!
//! Core types and seams shared by every crate of the 6G-SANDBOX installer.
//!
//! The installer drives an OpenNebula front-end through its command line tools.
//! This crate defines the vocabulary the rest of the workspace speaks: typed
//! entity ids, entity kinds and their state codes, the error taxonomy, the
//! installer configuration, polling policies, and the two seams the core calls
//! through (the command executor and the operator prompt).
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and exit-code mapping
//! - [`ids`] - Strongly-typed numeric ids for backend entities
//! - [`types`] - Entity kinds, appliance kinds and state codes
//! - [`config`] - Installer configuration (YAML, validated)
//! - [`wait`] - Polling policy and the generic poll loop
//! - [`args`] - Command argument builder
//! - [`backend`] - Command executor seam and credentials
//! - [`prompt`] - Operator prompt seam

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod args;
pub mod backend;
pub mod config;
pub mod error;
pub mod ids;
pub mod prompt;
pub mod types;
pub mod wait;

// Re-export commonly used types
pub use error::{Error, Result};
