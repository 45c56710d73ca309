//! Service template instantiation.
//!
//! A service template declares custom attributes as compact specification
//! strings and network slots to bind to virtual networks. This crate parses
//! those declarations, resolves a value for every attribute (derived from
//! installer state, taken from a secret, or asked), submits the
//! instantiation and waits for every role to run.

#![deny(missing_docs)]

pub mod attributes;
pub mod instantiate;
pub mod providers;

pub use attributes::{AttributeSpec, InputType, NetworkSlot, Requirement};
pub use instantiate::{role_outputs, RoleOutputs, ServiceInstantiator, ServiceRequest, VmOutput};
pub use providers::{AttributeResolver, ValueProvider};

/// Convenient result alias using the shared installer error type.
pub type Result<T> = sandbox_core::Result<T>;
