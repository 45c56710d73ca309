//! Client for the Trial Network Lifecycle Manager (TNLCM).
//!
//! The installer registers a trial network on the TNLCM instance deployed by
//! the toolkit service, and the maintenance subcommands destroy and purge
//! trial networks through the same client.

#![deny(missing_docs)]

pub mod client;
pub mod models;

pub use client::{TnlcmClient, TnlcmClientBuilder, TNLCM_DEFAULT_TIMEOUT};
pub use models::{LibraryReference, Message, Tokens, TrialNetworkCreated, TrialNetworkRequest};

/// Convenient result alias using the shared installer error type.
pub type Result<T> = sandbox_core::Result<T>;
