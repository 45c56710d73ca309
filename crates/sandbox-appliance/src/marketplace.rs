//! Marketplace registration.
//!
//! A freshly registered marketplace is empty until the front-end's
//! marketplace monitor has run once. The monitor interval defaults to ten
//! minutes; the operator either waits it out or lets the installer shorten
//! it temporarily in `oned.conf` and restart the front-end.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sandbox_core::args::CommandArgs;
use sandbox_core::config::{MarketplaceConfig, MonitorPolicy, OpenNebulaConfig};
use sandbox_core::ids::MarketplaceId;
use sandbox_core::types::EntityKind;
use sandbox_core::wait::settle;
use sandbox_core::Error;
use sandbox_one::client::render_template;
use sandbox_one::{EntityResolver, Lookup, MarketApp, Marketplace, OneClient};
use tokio::fs;
use tracing::{info, warn};

use crate::Result;

const MARKET_INTERVAL_KEY: &str = "MONITORING_INTERVAL_MARKET";

/// Outcome of [`MarketplaceRegistrar::ensure_marketplace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The marketplace was created by this call
    Created(MarketplaceId),
    /// A marketplace with the same name was already registered
    AlreadyExists(MarketplaceId),
}

impl Registration {
    /// Id of the marketplace.
    #[must_use]
    pub const fn id(&self) -> MarketplaceId {
        match self {
            Self::Created(id) | Self::AlreadyExists(id) => *id,
        }
    }

    /// Check if the marketplace was created by this call.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Marketplace to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceSpec {
    /// Marketplace name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Catalog endpoint
    pub endpoint: String,
}

impl MarketplaceSpec {
    /// Build the spec from the marketplace configuration section.
    #[must_use]
    pub fn from_config(config: &MarketplaceConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            endpoint: config.endpoint.clone(),
        }
    }

    fn template(&self) -> String {
        render_template(&[
            ("NAME", self.name.as_str()),
            ("DESCRIPTION", self.description.as_str()),
            ("MARKET_MAD", "one"),
            ("ENDPOINT", self.endpoint.as_str()),
        ])
    }
}

/// Durations involved in waiting for the marketplace monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    /// The front-end's normal monitoring interval
    pub default_interval: Duration,
    /// Interval written while fast-forwarding
    pub fast_interval: Duration,
    /// Slack added to the shortened interval
    pub epsilon: Duration,
}

impl MonitorTimings {
    /// Timings from the marketplace configuration section.
    #[must_use]
    pub const fn from_config(config: &MarketplaceConfig) -> Self {
        Self {
            default_interval: Duration::from_secs(config.default_interval_secs),
            fast_interval: Duration::from_secs(config.fast_interval_secs),
            epsilon: Duration::from_secs(config.epsilon_secs),
        }
    }
}

/// Line-wise editor for the front-end daemon configuration.
#[derive(Debug, Clone)]
pub struct OnedConf {
    path: PathBuf,
}

impl OnedConf {
    /// Editor for the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current marketplace monitoring interval, if set.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read.
    pub async fn market_interval(&self) -> Result<Option<String>> {
        let contents = self.read().await?;
        Ok(contents.lines().find_map(interval_value).map(str::to_string))
    }

    /// Set the marketplace monitoring interval and return the previous value.
    ///
    /// Only the first active assignment is rewritten; commented lines are left
    /// alone. The key is appended when absent.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or written.
    pub async fn set_market_interval(&self, value: &str) -> Result<Option<String>> {
        let contents = self.read().await?;
        let (rewritten, previous) = rewrite_interval(&contents, value);
        fs::write(&self.path, rewritten)
            .await
            .map_err(|e| Error::IoError(format!("Cannot write {}: {e}", self.path.display())))?;
        Ok(previous)
    }

    async fn read(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::IoError(format!("Cannot read {}: {e}", self.path.display())))
    }
}

fn interval_value(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed
        .strip_prefix(MARKET_INTERVAL_KEY)?
        .trim_start()
        .strip_prefix('=')
        .map(str::trim)
}

fn rewrite_interval(contents: &str, value: &str) -> (String, Option<String>) {
    let mut previous = None;
    let mut lines: Vec<String> = Vec::new();
    for line in contents.lines() {
        match interval_value(line) {
            Some(current) if previous.is_none() => {
                previous = Some(current.to_string());
                lines.push(format!("{MARKET_INTERVAL_KEY} = {value}"));
            }
            _ => lines.push(line.to_string()),
        }
    }
    if previous.is_none() {
        lines.push(format!("{MARKET_INTERVAL_KEY} = {value}"));
    }
    let mut rewritten = lines.join("\n");
    rewritten.push('\n');
    (rewritten, previous)
}

/// Restart and health check of the front-end services.
#[derive(Debug, Clone)]
pub struct Frontend {
    client: OneClient,
    conf: OnedConf,
    restart_command: Vec<String>,
    health_check_command: Vec<String>,
}

impl Frontend {
    /// Front-end controller built from the `opennebula` configuration section.
    #[must_use]
    pub fn from_config(client: OneClient, config: &OpenNebulaConfig) -> Self {
        Self {
            client,
            conf: OnedConf::new(&config.oned_conf),
            restart_command: config.restart_command.clone(),
            health_check_command: config.health_check_command.clone(),
        }
    }

    /// The daemon configuration file.
    #[must_use]
    pub const fn conf(&self) -> &OnedConf {
        &self.conf
    }

    /// Restart the front-end services.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] if the restart command fails.
    pub async fn restart(&self) -> Result<()> {
        let (program, args) = split_command(&self.restart_command)?;
        info!(command = %self.restart_command.join(" "), "restarting front-end");
        self.client.run(program, args).await.map(|_| ())
    }

    /// Check that the front-end answers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceUnavailable`] when the health check fails.
    pub async fn health_check(&self) -> Result<()> {
        let (program, args) = split_command(&self.health_check_command)?;
        let output = self.client.run_raw(program, args).await?;
        if output.is_success() {
            info!("front-end is answering");
            Ok(())
        } else {
            Err(Error::ServiceUnavailable(format!(
                "front-end health check `{}` failed: {}",
                self.health_check_command.join(" "),
                output.stderr.trim()
            )))
        }
    }
}

fn split_command(command: &[String]) -> Result<(&str, CommandArgs)> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| Error::ConfigError("Empty front-end command".to_string()))?;
    let args = rest
        .iter()
        .fold(CommandArgs::new(), |args, arg| args.arg(arg));
    Ok((program.as_str(), args))
}

/// Registers the installer's marketplace.
#[derive(Debug, Clone)]
pub struct MarketplaceRegistrar {
    client: OneClient,
    resolver: EntityResolver,
    frontend: Frontend,
    timings: MonitorTimings,
}

impl MarketplaceRegistrar {
    /// Create a registrar.
    #[must_use]
    pub fn new(client: OneClient, frontend: Frontend, timings: MonitorTimings) -> Self {
        Self {
            resolver: EntityResolver::new(client.clone()),
            client,
            frontend,
            timings,
        }
    }

    /// Register the marketplace unless one with the same name exists.
    ///
    /// A newly created marketplace is waited on according to `policy`;
    /// an existing one is returned immediately.
    ///
    /// # Errors
    ///
    /// Fails on backend errors, on `oned.conf` I/O errors and when the
    /// front-end does not come back after a restart.
    pub async fn ensure_marketplace(
        &self,
        spec: &MarketplaceSpec,
        policy: MonitorPolicy,
    ) -> Result<Registration> {
        if let Some(existing) = self
            .resolver
            .resolve::<Marketplace>(&Lookup::name(&spec.name))
            .await?
        {
            info!(marketplace = %spec.name, id = %existing.id, "marketplace already registered");
            return Ok(Registration::AlreadyExists(existing.id));
        }

        let id = self
            .client
            .create_from_template(EntityKind::Marketplace, &spec.template(), CommandArgs::new())
            .await?;
        let id = MarketplaceId::new(id);
        info!(marketplace = %spec.name, id = %id, endpoint = %spec.endpoint, "marketplace created");

        self.await_indexing(policy).await?;
        Ok(Registration::Created(id))
    }

    /// Appliances currently visible in `marketplace`.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    pub async fn list_appliances(&self, marketplace: &str) -> Result<Vec<MarketApp>> {
        Ok(self
            .resolver
            .list::<MarketApp>()
            .await?
            .into_iter()
            .filter(|app| app.marketplace == marketplace)
            .collect())
    }

    async fn await_indexing(&self, policy: MonitorPolicy) -> Result<()> {
        match policy {
            MonitorPolicy::Wait => {
                info!(
                    secs = self.timings.default_interval.as_secs(),
                    "waiting for the marketplace monitor"
                );
                settle(self.timings.default_interval).await;
                Ok(())
            }
            MonitorPolicy::FastForward => self.fast_forward().await,
        }
    }

    async fn fast_forward(&self) -> Result<()> {
        let conf = self.frontend.conf();
        let fast = self.timings.fast_interval.as_secs().to_string();
        let previous = conf.set_market_interval(&fast).await?;
        info!(
            interval = %fast,
            previous = previous.as_deref().unwrap_or("unset"),
            "marketplace monitoring interval shortened"
        );

        let shortened = async {
            self.frontend.restart().await?;
            settle(self.timings.fast_interval + self.timings.epsilon).await;
            self.frontend.health_check().await
        }
        .await;

        let original = previous
            .unwrap_or_else(|| self.timings.default_interval.as_secs().to_string());
        conf.set_market_interval(&original).await?;
        info!(interval = %original, "marketplace monitoring interval restored");

        if let Err(e) = shortened {
            warn!(error = %e, "front-end unhealthy with the shortened interval");
            return Err(e);
        }

        self.frontend.restart().await?;
        self.frontend.health_check().await
    }
}
