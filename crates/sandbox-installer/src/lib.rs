//! # sandbox-installer
//!
//! Phase driver and command line front end of the 6G-SANDBOX installer.
//!
//! An install runs a fixed sequence of phases against an OpenNebula
//! front-end:
//!
//! 1. `environment` - required tools, front-end and flow service, datastore
//! 2. `tenant` - user, group and ACL rules
//! 3. `marketplace` - 6G-SANDBOX marketplace registration
//! 4. `appliances` - infrastructure and toolkit appliance import
//! 5. `toolkit` - toolkit service instantiation and its outputs
//! 6. `ownership` - hand the toolkit service over to the tenant
//! 7. `site` - site configuration repository
//! 8. `tnlcm` - trial network registration
//!
//! Every phase is idempotent, so an interrupted install can be resumed with
//! `--from-phase`; state an earlier phase would have produced is looked up
//! again when needed.

#![deny(missing_docs)]

pub mod cli;
pub mod context;
pub mod environment;
pub mod phases;
pub mod prompt;
pub mod report;
pub mod toolkit;
pub mod trial_network;

pub use cli::{Cli, Commands, InstallArgs, TrialNetworkArgs};
pub use context::InstallContext;
pub use phases::{run_install, InstallSummary, Phase};
pub use prompt::InquirePrompter;
pub use report::report;

/// Convenient result alias using the shared installer error type.
pub type Result<T> = sandbox_core::Result<T>;
