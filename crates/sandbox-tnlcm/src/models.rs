//! TNLCM request and response models.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use secrecy::SecretString;
use serde::Deserialize;

use crate::Result;

/// Tokens returned by a successful login.
#[derive(Debug, Clone, Deserialize)]
pub struct Tokens {
    /// Bearer token for every other endpoint
    pub access_token: SecretString,
    /// Token used to obtain a new access token
    pub refresh_token: SecretString,
}

/// Response of a trial network creation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrialNetworkCreated {
    /// Identifier assigned to the trial network
    pub tn_id: String,
}

/// Informational response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Message {
    /// Human readable message, empty when the server sent none
    #[serde(default)]
    pub message: String,
}

/// Which revision of the component library a trial network uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryReference {
    /// `branch`, `tag` or `commit`
    pub kind: String,
    /// Branch name, tag or commit hash
    pub value: String,
}

impl LibraryReference {
    /// Reference to a branch.
    #[must_use]
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            kind: "branch".to_string(),
            value: name.into(),
        }
    }
}

/// Trial network registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialNetworkRequest {
    /// Descriptor file uploaded as `descriptor`
    pub descriptor: PathBuf,
    /// Identifier to request; the server picks one when absent
    pub tn_id: Option<String>,
    /// Site the trial network deploys to
    pub deployment_site: String,
    /// Component library revision
    pub library: LibraryReference,
    /// Branch of the sites repository holding the site configuration
    pub sites_branch: String,
}

impl TrialNetworkRequest {
    /// Registration of `descriptor` on `site`, using the site branch of the
    /// sites repository.
    #[must_use]
    pub fn new(descriptor: impl AsRef<Path>, site: impl Into<String>) -> Self {
        let site = site.into();
        Self {
            descriptor: descriptor.as_ref().to_path_buf(),
            tn_id: None,
            sites_branch: site.clone(),
            deployment_site: site,
            library: LibraryReference::branch("main"),
        }
    }

    /// Request a specific trial network id.
    #[must_use]
    pub fn with_tn_id(mut self, tn_id: impl Into<String>) -> Self {
        self.tn_id = Some(tn_id.into());
        self
    }

    /// Use another library revision.
    #[must_use]
    pub fn with_library(mut self, library: LibraryReference) -> Self {
        self.library = library;
        self
    }

    /// Build the multipart form, reading the descriptor from disk.
    ///
    /// # Errors
    ///
    /// Returns [`sandbox_core::Error::IoError`] when the descriptor cannot
    /// be read.
    pub async fn to_form(&self) -> Result<Form> {
        let bytes = tokio::fs::read(&self.descriptor).await?;
        let file_name = self
            .descriptor
            .file_name()
            .map_or_else(|| "descriptor.yaml".to_string(), |n| n.to_string_lossy().into_owned());
        let descriptor = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/x-yaml")?;

        let mut form = Form::new()
            .part("descriptor", descriptor)
            .text("deployment_site", self.deployment_site.clone())
            .text("library_reference_type", self.library.kind.clone())
            .text("library_reference_value", self.library.value.clone())
            .text("sites_branch", self.sites_branch.clone());
        if let Some(tn_id) = &self.tn_id {
            form = form.text("tn_id", tn_id.clone());
        }
        Ok(form)
    }
}
