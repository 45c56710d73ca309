//! Install phases and the driver running them in order.

use std::fmt;
use std::fs;
use std::str::FromStr;

use sandbox_appliance::{
    ApplianceImporter, Frontend, MarketplaceRegistrar, MarketplaceSpec, MonitorTimings,
};
use sandbox_core::config::MonitorPolicy;
use sandbox_core::ids::ServiceId;
use sandbox_core::types::EntityKind;
use sandbox_core::Error;
use sandbox_flow::ServiceInstantiator;
use sandbox_one::{OwnershipTransferrer, TenantSetup};
use sandbox_site::{SiteOutcome, SitePipeline, SiteRequest, Vault};
use tracing::{info, warn};

use crate::context::InstallContext;
use crate::environment;
use crate::toolkit::toolkit_attributes;
use crate::trial_network;
use crate::Result;

/// One step of an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Validate tools, front-end and datastore
    Environment,
    /// Create the tenant user, group and ACL rules
    Tenant,
    /// Register the 6G-SANDBOX marketplace
    Marketplace,
    /// Import the configured appliances and the toolkit appliance
    Appliances,
    /// Instantiate the toolkit service
    Toolkit,
    /// Hand the toolkit service over to the tenant
    Ownership,
    /// Configure the site repository
    Site,
    /// Register the trial network
    Tnlcm,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Self; 8] = [
        Self::Environment,
        Self::Tenant,
        Self::Marketplace,
        Self::Appliances,
        Self::Toolkit,
        Self::Ownership,
        Self::Site,
        Self::Tnlcm,
    ];

    /// Returns the phase as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::Tenant => "tenant",
            Self::Marketplace => "marketplace",
            Self::Appliances => "appliances",
            Self::Toolkit => "toolkit",
            Self::Ownership => "ownership",
            Self::Site => "site",
            Self::Tnlcm => "tnlcm",
        }
    }

    /// This phase and every phase after it.
    #[must_use]
    pub fn sequence_from(self) -> &'static [Self] {
        let start = Self::ALL.iter().position(|p| *p == self).unwrap_or(0);
        &Self::ALL[start..]
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(Self::as_str).collect();
                Error::InvalidRequest(format!(
                    "Unknown phase `{s}` (expected one of {})",
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an install did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallSummary {
    /// Phases run, in order
    pub phases: Vec<Phase>,
    /// Tenant user name
    pub tenant: Option<String>,
    /// Toolkit service id
    pub toolkit_service: Option<ServiceId>,
    /// Site configuration result
    pub site: Option<SiteOutcome>,
    /// Registered trial network id
    pub trial_network: Option<String>,
}

/// Run every phase from `from` to the end.
///
/// # Errors
///
/// Stops at the first failing phase and returns its error.
pub async fn run_install(ctx: &mut InstallContext<'_>, from: Phase) -> Result<InstallSummary> {
    let mut summary = InstallSummary::default();
    if from != Phase::Environment {
        info!(phase = %from, "resuming install");
    }
    for &phase in from.sequence_from() {
        info!(%phase, "phase started");
        run_phase(ctx, phase, &mut summary).await?;
        summary.phases.push(phase);
        info!(%phase, "phase completed");
    }
    Ok(summary)
}

async fn run_phase(
    ctx: &mut InstallContext<'_>,
    phase: Phase,
    summary: &mut InstallSummary,
) -> Result<()> {
    match phase {
        Phase::Environment => environment_phase(ctx).await,
        Phase::Tenant => {
            summary.tenant = Some(ctx.tenant().await?.credentials.username);
            Ok(())
        }
        Phase::Marketplace => marketplace_phase(ctx).await,
        Phase::Appliances => appliances_phase(ctx).await,
        Phase::Toolkit => {
            summary.toolkit_service = Some(toolkit_phase(ctx).await?);
            Ok(())
        }
        Phase::Ownership => ownership_phase(ctx).await,
        Phase::Site => {
            summary.site = Some(site_phase(ctx).await?);
            Ok(())
        }
        Phase::Tnlcm => {
            summary.trial_network = trial_network::register(ctx).await?;
            Ok(())
        }
    }
}

async fn environment_phase(ctx: &mut InstallContext<'_>) -> Result<()> {
    let report = environment::validate(ctx.client(), ctx.config()).await?;
    ctx.set_datastore(report.datastore.id);
    fs::create_dir_all(&ctx.config().work_dir)?;
    Ok(())
}

async fn marketplace_phase(ctx: &mut InstallContext<'_>) -> Result<()> {
    let config = ctx.config();
    let policy = match config.marketplace.monitor {
        Some(policy) => policy,
        None => ask_monitor_policy(ctx)?,
    };

    let client = ctx.client().clone();
    let registrar = MarketplaceRegistrar::new(
        client.clone(),
        Frontend::from_config(client, &config.opennebula),
        MonitorTimings::from_config(&config.marketplace),
    );
    registrar
        .ensure_marketplace(&MarketplaceSpec::from_config(&config.marketplace), policy)
        .await?;

    let apps = registrar.list_appliances(&config.marketplace.name).await?;
    if apps.is_empty() {
        warn!(marketplace = %config.marketplace.name, "marketplace lists no appliances yet");
    } else {
        info!(marketplace = %config.marketplace.name, appliances = apps.len(), "marketplace indexed");
    }
    Ok(())
}

fn ask_monitor_policy(ctx: &InstallContext<'_>) -> Result<MonitorPolicy> {
    let options = [MonitorPolicy::FastForward, MonitorPolicy::Wait]
        .iter()
        .map(ToString::to_string)
        .collect();
    ctx.prompter()
        .select(
            "Shorten the marketplace monitoring interval (restarts the front-end) or wait for it?",
            options,
        )?
        .parse()
}

async fn appliances_phase(ctx: &mut InstallContext<'_>) -> Result<()> {
    let config = ctx.config();
    let owner = ctx.tenant().await?.owner();
    let datastore = ctx.datastore().await?;
    let importer = ApplianceImporter::new(ctx.client().clone(), owner, config.wait_policy())
        .with_export_grace(config.polling.export_grace());

    let toolkit = (&config.toolkit.appliance, &config.toolkit.marketplace);
    let wanted = config
        .appliances
        .iter()
        .map(|a| (&a.name, &a.marketplace))
        .chain(std::iter::once(toolkit));
    for (name, marketplace) in wanted {
        let artifacts = importer
            .import_appliance(name, marketplace, datastore)
            .await?;
        ctx.record_import(name, artifacts);
    }
    Ok(())
}

async fn toolkit_phase(ctx: &mut InstallContext<'_>) -> Result<ServiceId> {
    let config = ctx.config();
    let tenant = ctx.tenant().await?;
    let token = ctx.site_token()?;
    let instantiator = ServiceInstantiator::new(ctx.client().clone(), config.wait_policy());

    let service = match instantiator.find_running(&config.toolkit.service_name).await? {
        Some(service) => service,
        None => {
            let attributes = toolkit_attributes(config, &tenant.credentials, &token);
            let request = instantiator
                .prepare(
                    &config.toolkit.appliance,
                    &config.toolkit.service_name,
                    &attributes,
                    &config.toolkit.network_bindings,
                    ctx.prompter(),
                )
                .await?;
            instantiator.instantiate(&request).await?
        }
    };

    let id = service.id;
    let outputs = ctx.set_toolkit(service)?;
    TenantSetup::new(ctx.client().clone())
        .append_ssh_key(tenant.user, &outputs.ssh_public_key)
        .await?;
    info!(
        service = id.get(),
        tnlcm = outputs.tnlcm_url.as_deref().unwrap_or("unknown"),
        "toolkit running"
    );
    Ok(id)
}

async fn ownership_phase(ctx: &mut InstallContext<'_>) -> Result<()> {
    let owner = ctx.tenant().await?.owner();
    let (service, _) = ctx.toolkit().await?;
    let transferrer = OwnershipTransferrer::new(ctx.client().clone());

    let vms: Vec<u64> = service.vm_ids().iter().map(|id| id.get()).collect();
    transferrer
        .chown(EntityKind::Service, &[service.id.get()], owner)
        .await?;
    transferrer.chown(EntityKind::Vm, &vms, owner).await?;

    let targets = std::iter::once((EntityKind::Service, service.id.get()))
        .chain(vms.iter().map(|id| (EntityKind::Vm, *id)));
    for (kind, id) in targets {
        if !transferrer.verify(kind, id, owner).await? {
            return Err(Error::ChownFailed {
                kind,
                id,
                message: format!("still not owned by user {}", owner.user),
            });
        }
    }
    info!(service = service.id.get(), vms = vms.len(), "toolkit handed over to the tenant");
    Ok(())
}

async fn site_phase(ctx: &mut InstallContext<'_>) -> Result<SiteOutcome> {
    let config = ctx.config();
    let site = ctx.site_name()?;
    let token = ctx.site_token()?;
    let request = SiteRequest::new(
        &config.site.repository,
        site,
        token.clone(),
        &config.site.template_path,
    )?
    .with_overrides(config.site.values.clone());

    let pipeline = SitePipeline::new(
        ctx.version_control(&token),
        Vault::new(ctx.client().executor().clone()),
        config.site_checkout_dir(),
    );
    let outcome = pipeline.run(&request, ctx.prompter()).await?;
    info!(
        site = %request.site,
        commit = outcome.commit.as_deref().unwrap_or("unchanged"),
        pushed = outcome.pushed,
        "site configured"
    );
    Ok(outcome)
}
