//! Trial network registration and maintenance on the lifecycle manager.

use sandbox_core::backend::Credentials;
use sandbox_tnlcm::{LibraryReference, TnlcmClient, TnlcmClientBuilder, TrialNetworkRequest};
use secrecy::ExposeSecret;
use tracing::info;

use crate::context::InstallContext;
use crate::Result;

/// Log in to the lifecycle manager.
///
/// The password comes from `tnlcm.password` and is asked otherwise. The
/// request timeout and certificate checks follow the `tnlcm` section.
///
/// # Errors
///
/// Returns [`sandbox_core::Error::NotFound`] when no address is known and
/// propagates login failures.
pub async fn connect(ctx: &mut InstallContext<'_>) -> Result<TnlcmClient> {
    let url = ctx.tnlcm_url().await?;
    let config = &ctx.config().tnlcm;
    let password = match &config.password {
        Some(password) => password.expose_secret().to_string(),
        None => ctx
            .prompter()
            .password(&format!("TNLCM password for `{}`", config.username))?,
    };
    let credentials = Credentials::new(&config.username, password);
    TnlcmClientBuilder::new(&url)?
        .with_timeout(config.timeout())
        .with_insecure(config.insecure)
        .build()?
        .authenticate(&credentials)
        .await
}

/// Register and deploy the configured trial network.
///
/// Returns `None` when no descriptor is configured.
///
/// # Errors
///
/// Propagates login, registration and deployment failures.
pub async fn register(ctx: &mut InstallContext<'_>) -> Result<Option<String>> {
    let config = &ctx.config().tnlcm;
    let Some(descriptor) = &config.descriptor else {
        info!("no trial network descriptor configured, skipping registration");
        return Ok(None);
    };

    let site = ctx.site_name()?;
    let request = TrialNetworkRequest::new(descriptor, site).with_library(LibraryReference {
        kind: config.library_reference_type.clone(),
        value: config.library_reference_value.clone(),
    });

    let client = connect(ctx).await?;
    let created = client.create_trial_network(&request).await?;
    client.deploy_trial_network(&created.tn_id).await?;
    Ok(Some(created.tn_id))
}

/// Destroy the resources of a trial network.
///
/// # Errors
///
/// Propagates login failures and the server's refusal.
pub async fn destroy(ctx: &mut InstallContext<'_>, tn_id: &str) -> Result<String> {
    let client = connect(ctx).await?;
    Ok(client.destroy_trial_network(tn_id).await?.message)
}

/// Purge a destroyed trial network.
///
/// # Errors
///
/// Propagates login failures and the server's refusal.
pub async fn purge(ctx: &mut InstallContext<'_>, tn_id: &str) -> Result<String> {
    let client = connect(ctx).await?;
    Ok(client.purge_trial_network(tn_id).await?.message)
}
