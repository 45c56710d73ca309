//! State shared by the install phases.

use std::sync::Arc;

use sandbox_appliance::ApplianceArtifacts;
use sandbox_core::backend::CommandExecutor;
use sandbox_core::config::InstallerConfig;
use sandbox_core::ids::DatastoreId;
use sandbox_core::prompt::Prompter;
use sandbox_core::Error;
use sandbox_flow::ServiceInstantiator;
use sandbox_one::{Datastore, EntityResolver, Lookup, OneClient, Service, Tenant, TenantSetup};
use sandbox_site::{GitRepository, VersionControl};
use secrecy::SecretString;
use tracing::debug;

use crate::toolkit::{toolkit_outputs, ToolkitOutputs};
use crate::Result;

/// Configuration, seams and the state accumulated by earlier phases.
///
/// Accessors for state an earlier phase produces look it up again when the
/// install was resumed past that phase.
pub struct InstallContext<'a> {
    config: &'a InstallerConfig,
    client: OneClient,
    prompter: &'a dyn Prompter,
    vcs: Option<Arc<dyn VersionControl>>,
    datastore: Option<DatastoreId>,
    tenant: Option<Tenant>,
    toolkit: Option<(Service, ToolkitOutputs)>,
    site_name: Option<String>,
    site_token: Option<SecretString>,
    imported: Vec<(String, ApplianceArtifacts)>,
}

impl<'a> InstallContext<'a> {
    /// Create a context running backend commands through `executor`.
    #[must_use]
    pub fn new(
        config: &'a InstallerConfig,
        executor: Arc<dyn CommandExecutor>,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            config,
            client: OneClient::new(executor),
            prompter,
            vcs: None,
            datastore: None,
            tenant: None,
            toolkit: None,
            site_name: config.site.name.clone(),
            site_token: config.site.token.clone(),
            imported: Vec::new(),
        }
    }

    /// Use `vcs` for the sites repository instead of `git2`.
    #[must_use]
    pub fn with_version_control(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// Installer configuration.
    #[must_use]
    pub const fn config(&self) -> &'a InstallerConfig {
        self.config
    }

    /// Backend client.
    #[must_use]
    pub const fn client(&self) -> &OneClient {
        &self.client
    }

    /// Operator prompt.
    #[must_use]
    pub fn prompter(&self) -> &'a dyn Prompter {
        self.prompter
    }

    /// Version control for the sites repository, authenticated with `token`.
    #[must_use]
    pub fn version_control(&self, token: &SecretString) -> Arc<dyn VersionControl> {
        self.vcs.clone().unwrap_or_else(|| {
            Arc::new(
                GitRepository::new(&self.config.site.author_name, &self.config.site.author_email)
                    .with_token(token.clone()),
            )
        })
    }

    /// Record the datastore found by environment validation.
    pub fn set_datastore(&mut self, id: DatastoreId) {
        self.datastore = Some(id);
    }

    /// Id of the configured datastore.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the datastore does not exist.
    pub async fn datastore(&mut self) -> Result<DatastoreId> {
        if let Some(id) = self.datastore {
            return Ok(id);
        }
        let datastore: Datastore = EntityResolver::new(self.client.clone())
            .require(&Lookup::name(&self.config.datastore))
            .await?;
        self.datastore = Some(datastore.id);
        Ok(datastore.id)
    }

    /// The tenant, created or confirmed on first use.
    ///
    /// # Errors
    ///
    /// Fails on backend or password file errors.
    pub async fn tenant(&mut self) -> Result<Tenant> {
        if let Some(tenant) = &self.tenant {
            return Ok(tenant.clone());
        }
        let tenant_config = &self.config.tenant;
        let tenant = TenantSetup::new(self.client.clone())
            .setup(
                &tenant_config.username,
                &tenant_config.group,
                &self.config.password_file(),
                &tenant_config.acl_rules,
            )
            .await?;
        self.tenant = Some(tenant.clone());
        Ok(tenant)
    }

    /// Record the running toolkit service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the service lacks its outputs.
    pub fn set_toolkit(&mut self, service: Service) -> Result<ToolkitOutputs> {
        let outputs = toolkit_outputs(&service, &self.config.toolkit)?;
        self.toolkit = Some((service, outputs.clone()));
        Ok(outputs)
    }

    /// The running toolkit service and its outputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the service was never instantiated,
    /// and fails like [`ServiceInstantiator::wait_running`] otherwise.
    pub async fn toolkit(&mut self) -> Result<(Service, ToolkitOutputs)> {
        if let Some(toolkit) = &self.toolkit {
            return Ok(toolkit.clone());
        }
        let name = &self.config.toolkit.service_name;
        let service = ServiceInstantiator::new(self.client.clone(), self.config.wait_policy())
            .find_running(name)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("toolkit service `{name}`, run the toolkit phase first"))
            })?;
        let outputs = self.set_toolkit(service.clone())?;
        Ok((service, outputs))
    }

    /// Base URL of the lifecycle manager: configured, or published by the
    /// toolkit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when neither source has one.
    pub async fn tnlcm_url(&mut self) -> Result<String> {
        if let Some(url) = &self.config.tnlcm.url {
            return Ok(url.clone());
        }
        let (_, outputs) = self.toolkit().await?;
        outputs.tnlcm_url.ok_or_else(|| {
            Error::NotFound(format!(
                "address of role `{}`; set tnlcm.url",
                self.config.toolkit.tnlcm_role
            ))
        })
    }

    /// Site name, asked once when not configured.
    ///
    /// # Errors
    ///
    /// Propagates prompt failures.
    pub fn site_name(&mut self) -> Result<String> {
        if let Some(name) = &self.site_name {
            return Ok(name.clone());
        }
        let name = self.prompter.text("Site name", None)?.trim().to_string();
        self.site_name = Some(name.clone());
        Ok(name)
    }

    /// Sites repository token, asked once when not configured.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] for an empty answer and propagates
    /// prompt failures.
    pub fn site_token(&mut self) -> Result<SecretString> {
        if let Some(token) = &self.site_token {
            return Ok(token.clone());
        }
        let token = self
            .prompter
            .password("Access token for the sites repository")?;
        if token.trim().is_empty() {
            return Err(Error::ValidationError(
                "the sites repository token is required".to_string(),
            ));
        }
        let token = SecretString::from(token.trim().to_string());
        self.site_token = Some(token.clone());
        Ok(token)
    }

    /// Record an imported appliance.
    pub fn record_import(&mut self, name: &str, artifacts: ApplianceArtifacts) {
        debug!(appliance = name, images = artifacts.image_ids.len(), "import recorded");
        self.imported.push((name.to_string(), artifacts));
    }

    /// Appliances imported during this run, in import order.
    #[must_use]
    pub fn imported(&self) -> &[(String, ApplianceArtifacts)] {
        &self.imported
    }
}

impl std::fmt::Debug for InstallContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallContext")
            .field("datastore", &self.datastore)
            .field("tenant", &self.tenant.as_ref().map(|t| t.user))
            .field("site_name", &self.site_name)
            .field("imported", &self.imported.len())
            .finish_non_exhaustive()
    }
}
