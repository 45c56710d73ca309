//! Site configuration pipeline.
//!
//! A 6G-SANDBOX deployment keeps its site description in a shared sites
//! repository, one directory and one branch per site. The pipeline clones
//! that repository, seeds the site's `core.yaml` from the template the
//! repository ships, fills it from installer state and operator answers,
//! encrypts it with `ansible-vault` and pushes the branch back.
//!
//! ## Modules
//!
//! - [`repo`] - Version control seam and its `git2` implementation
//! - [`walk`] - Dotted-path overrides and the interactive document walk
//! - [`vault`] - Token-derived vault key and file encryption
//! - [`pipeline`] - The end-to-end site configuration run

#![deny(missing_docs)]

pub mod pipeline;
pub mod repo;
pub mod vault;
pub mod walk;

pub use pipeline::{SiteOutcome, SitePipeline, SiteRequest};
pub use repo::{GitRepository, VersionControl};
pub use vault::{vault_secret, Vault};
pub use walk::{apply_overrides, walk_document, Overrides};

#[cfg(any(test, feature = "mock"))]
pub use repo::MockVersionControl;

/// Convenient result alias using the shared installer error type.
pub type Result<T> = sandbox_core::Result<T>;
