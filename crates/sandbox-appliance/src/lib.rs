//! Marketplace registration and appliance import.
//!
//! The registrar makes sure the 6G-SANDBOX marketplace is known to the
//! front-end and its catalog has been indexed. The importer exports
//! appliances from a marketplace into local storage exactly once, waits for
//! their images and hands every artifact over to the tenant.

#![deny(missing_docs)]

pub mod importer;
pub mod marketplace;

pub use importer::{ApplianceArtifacts, ApplianceImporter};
pub use marketplace::{
    Frontend, MarketplaceRegistrar, MarketplaceSpec, MonitorTimings, OnedConf, Registration,
};

/// Convenient result alias using the shared installer error type.
pub type Result<T> = sandbox_core::Result<T>;
