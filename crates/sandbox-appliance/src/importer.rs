//! Appliance import.
//!
//! Exporting an appliance materializes it as local artifacts: an image and a
//! template for an IMAGE appliance, a template with one image per disk for a
//! VM appliance, and a service template with one template per role for a
//! SERVICE appliance. Artifacts are named after the appliance so a later run
//! finds them and skips the export.

use std::time::Duration;

use sandbox_core::ids::{DatastoreId, ImageId, ServiceTemplateId, TemplateId};
use sandbox_core::types::{ApplianceKind, EntityKind};
use sandbox_core::wait::{poll_until, settle, Progress, WaitPolicy};
use sandbox_core::Error;
use sandbox_one::{
    ArtifactIds, EntityResolver, Image, Lookup, MarketApp, OneClient, Owner,
    OwnershipTransferrer, ServiceTemplate, Template,
};
use tracing::{debug, info};

use crate::Result;

/// Local artifacts of an imported appliance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceArtifacts {
    /// Appliance kind
    pub kind: ApplianceKind,
    /// Every image, in disk order
    pub image_ids: Vec<ImageId>,
    /// Every VM template
    pub template_ids: Vec<TemplateId>,
    /// Service template (SERVICE appliances only)
    pub service_template_id: Option<ServiceTemplateId>,
    /// Whether this call performed the export
    pub exported: bool,
}

impl ApplianceArtifacts {
    fn empty(kind: ApplianceKind, exported: bool) -> Self {
        Self {
            kind,
            image_ids: Vec::new(),
            template_ids: Vec::new(),
            service_template_id: None,
            exported,
        }
    }

    /// Artifact ids in the shape the ownership transferrer expects.
    #[must_use]
    pub fn to_artifact_ids(&self) -> ArtifactIds {
        ArtifactIds {
            images: self.image_ids.clone(),
            templates: self.template_ids.clone(),
            service_templates: self.service_template_id.into_iter().collect(),
        }
    }
}

/// Imports marketplace appliances for a fixed owner.
#[derive(Debug, Clone)]
pub struct ApplianceImporter {
    client: OneClient,
    resolver: EntityResolver,
    ownership: OwnershipTransferrer,
    owner: Owner,
    policy: WaitPolicy,
    export_grace: Duration,
}

impl ApplianceImporter {
    /// Create an importer handing artifacts over to `owner`.
    #[must_use]
    pub fn new(client: OneClient, owner: Owner, policy: WaitPolicy) -> Self {
        Self {
            resolver: EntityResolver::new(client.clone()),
            ownership: OwnershipTransferrer::new(client.clone()),
            client,
            owner,
            policy,
            export_grace: Duration::from_secs(sandbox_core::wait::DEFAULT_EXPORT_GRACE_SECS),
        }
    }

    /// Set the pause between an export and the first touch of its artifacts.
    #[must_use]
    pub const fn with_export_grace(mut self, grace: Duration) -> Self {
        self.export_grace = grace;
        self
    }

    /// Import `name` from `marketplace` into `datastore`.
    ///
    /// The export is skipped when a local artifact with the appliance name
    /// already exists. Either way every image is waited on until it is
    /// usable and ownership of every artifact is then transferred.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the marketplace does not publish the
    /// appliance, [`Error::CommandFailed`] when the export fails,
    /// [`Error::EntityFailed`] when an image ends in `ERROR`,
    /// [`Error::Timeout`] when a bounded policy runs out and
    /// [`Error::ChownFailed`] when an artifact cannot be handed over.
    pub async fn import_appliance(
        &self,
        name: &str,
        marketplace: &str,
        datastore: DatastoreId,
    ) -> Result<ApplianceArtifacts> {
        let app = self
            .resolver
            .find_appliance(name, marketplace)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("appliance `{name}` in marketplace `{marketplace}`"))
            })?;
        let kind = app.kind()?;

        let artifacts = match self.discover(kind, name).await? {
            Some(existing) => {
                info!(appliance = name, %kind, "appliance already imported, skipping export");
                existing
            }
            None => self.export(&app, kind, name, datastore).await?,
        };

        self.wait_ready(&artifacts.image_ids).await?;
        self.ownership
            .chown_artifacts(&artifacts.to_artifact_ids(), self.owner)
            .await?;

        info!(
            appliance = name,
            %kind,
            images = artifacts.image_ids.len(),
            templates = artifacts.template_ids.len(),
            exported = artifacts.exported,
            "appliance ready"
        );
        Ok(artifacts)
    }

    /// Existing local artifacts named after the appliance.
    async fn discover(&self, kind: ApplianceKind, name: &str) -> Result<Option<ApplianceArtifacts>> {
        let lookup = Lookup::name(name);
        let mut artifacts = ApplianceArtifacts::empty(kind, false);

        match kind {
            ApplianceKind::Image => {
                let Some(image) = self.resolver.resolve::<Image>(&lookup).await? else {
                    return Ok(None);
                };
                artifacts.image_ids.push(image.id);
                if let Some(template) = self.resolver.resolve::<Template>(&lookup).await? {
                    artifacts.template_ids.push(template.id);
                }
            }
            ApplianceKind::Vm => {
                let Some(template) = self.resolver.resolve::<Template>(&lookup).await? else {
                    return Ok(None);
                };
                artifacts.image_ids = self.client.template_image_ids(template.id).await?;
                artifacts.template_ids.push(template.id);
            }
            ApplianceKind::Service => {
                let Some(service) = self.resolver.resolve::<ServiceTemplate>(&lookup).await? else {
                    return Ok(None);
                };
                for template in service.template_ids() {
                    artifacts
                        .image_ids
                        .extend(self.client.template_image_ids(template).await?);
                    artifacts.template_ids.push(template);
                }
                artifacts.service_template_id = Some(service.id);
            }
        }
        Ok(Some(artifacts))
    }

    async fn export(
        &self,
        app: &MarketApp,
        kind: ApplianceKind,
        name: &str,
        datastore: DatastoreId,
    ) -> Result<ApplianceArtifacts> {
        info!(appliance = name, id = %app.id, %kind, datastore = %datastore, "exporting appliance");
        let exported = self.client.export_app(app.id, name, datastore).await?;
        let context = format!("export of `{name}`");
        settle(self.export_grace).await;

        let mut artifacts = ApplianceArtifacts::empty(kind, true);
        match kind {
            ApplianceKind::Image => {
                let image = *exported
                    .images
                    .first()
                    .ok_or_else(|| Error::malformed(&context, "IMAGE"))?;
                self.rename_image(image, name).await?;
                artifacts.image_ids.push(image);
                artifacts.template_ids = exported.templates;
            }
            ApplianceKind::Vm => {
                let template = *exported
                    .templates
                    .first()
                    .ok_or_else(|| Error::malformed(&context, "VMTEMPLATE"))?;
                artifacts.image_ids = self.rename_template_images(template, name).await?;
                artifacts.template_ids.push(template);
            }
            ApplianceKind::Service => {
                let service = *exported
                    .service_templates
                    .first()
                    .ok_or_else(|| Error::malformed(&context, "SERVICE_TEMPLATE"))?;
                for &template in &exported.templates {
                    let template_name = self
                        .resolver
                        .require::<Template>(&Lookup::id(template))
                        .await?
                        .name;
                    let images = self.rename_template_images(template, &template_name).await?;
                    artifacts.image_ids.extend(images);
                    artifacts.template_ids.push(template);
                }
                artifacts.service_template_id = Some(service);
            }
        }
        Ok(artifacts)
    }

    /// Rename a template's images `<prefix>-0`, `<prefix>-1`, ...
    async fn rename_template_images(&self, template: TemplateId, prefix: &str) -> Result<Vec<ImageId>> {
        let images = self.client.template_image_ids(template).await?;
        for (index, &image) in images.iter().enumerate() {
            self.rename_image(image, &format!("{prefix}-{index}")).await?;
        }
        Ok(images)
    }

    async fn rename_image(&self, image: ImageId, target: &str) -> Result<()> {
        let current = self.resolver.require::<Image>(&Lookup::id(image)).await?;
        if current.name == target {
            debug!(image = %image, name = target, "image already carries its final name");
            return Ok(());
        }
        self.client
            .rename(EntityKind::Image, image.get(), target)
            .await?;
        info!(image = %image, from = %current.name, to = target, "image renamed");
        Ok(())
    }

    async fn wait_ready(&self, images: &[ImageId]) -> Result<()> {
        for &image in images {
            poll_until(&self.policy, &format!("image {image}"), || self.image_progress(image))
                .await?;
            info!(image = %image, "image ready");
        }
        Ok(())
    }

    async fn image_progress(&self, image: ImageId) -> Result<Progress<()>> {
        let state = self
            .resolver
            .require::<Image>(&Lookup::id(image))
            .await?
            .state()?;
        if state.is_available() {
            Ok(Progress::Done(()))
        } else if state.is_failed() {
            Err(Error::EntityFailed {
                kind: EntityKind::Image,
                id: image.get(),
                state: state.as_str().to_string(),
            })
        } else {
            Ok(Progress::Pending(state.as_str().to_string()))
        }
    }
}
