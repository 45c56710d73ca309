//! OpenNebula command line client for the 6G-SANDBOX installer.
//!
//! Wraps the `one*` command line tools behind a [`CommandExecutor`], decodes
//! their JSON documents into typed models, and provides the name/id resolver,
//! the ownership transferrer and tenant setup built on top of them.
//!
//! [`CommandExecutor`]: sandbox_core::backend::CommandExecutor

#![deny(missing_docs)]

pub mod client;
pub mod executor;
pub mod models;
pub mod ownership;
pub mod resolver;
pub mod tenant;

pub use client::{parse_export_output, parse_id_line, OneClient};
pub use executor::ProcessExecutor;
pub use models::{
    ArtifactIds, Datastore, Group, Image, MarketApp, Marketplace, OneEntity, Service,
    ServiceRole, ServiceTemplate, Template, User, VirtualNetwork, Vm,
};
pub use ownership::{Owner, OwnershipTransferrer};
pub use resolver::{EntityResolver, Lookup};
pub use tenant::{Tenant, TenantSetup};

/// Convenient result alias using the shared installer error type.
pub type Result<T> = sandbox_core::Result<T>;
