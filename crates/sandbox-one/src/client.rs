//! Asynchronous client over the `one*` command line tools.

use std::io::Write;
use std::sync::Arc;

use sandbox_core::args::{render_command, CommandArgs};
use sandbox_core::backend::{CommandExecutor, CommandOutput};
use sandbox_core::ids::{
    parse_id, ApplianceId, DatastoreId, GroupId, ImageId, ServiceId, ServiceTemplateId,
    TemplateId, UserId,
};
use sandbox_core::types::EntityKind;
use sandbox_core::Error;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::{ArtifactIds, OneEntity};
use crate::Result;

/// Client issuing backend commands through a [`CommandExecutor`].
#[derive(Clone)]
pub struct OneClient {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for OneClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneClient").finish_non_exhaustive()
    }
}

impl OneClient {
    /// Create a client over `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// The underlying executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// Run a command and return its raw output, whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnFailed`] if the program could not be started.
    pub async fn run_raw(&self, program: &str, args: CommandArgs) -> Result<CommandOutput> {
        let args = args.into_vec();
        debug!(command = %render_command(program, &args), "running backend command");
        self.executor.execute(program, &args).await
    }

    /// Run a command and return its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] on a non-zero exit.
    pub async fn run(&self, program: &str, args: CommandArgs) -> Result<String> {
        let line = render_command(program, args.as_slice());
        self.run_raw(program, args).await?.into_result(&line)
    }

    /// Show an entity and return the object under its JSON root, or `None`
    /// when the backend reports that it does not exist.
    ///
    /// # Errors
    ///
    /// Fails on any other command failure, on invalid JSON and when the root
    /// element is missing.
    pub async fn show_value(&self, kind: EntityKind, target: &str) -> Result<Option<Value>> {
        let args = CommandArgs::subcommand("show").arg(target).json();
        let line = render_command(kind.command(), args.as_slice());
        let output = self.run_raw(kind.command(), args).await?;

        if !output.is_success() && is_not_found(&output.stderr) {
            debug!(kind = %kind, entity = target, "entity not found");
            return Ok(None);
        }

        let stdout = output.into_result(&line)?;
        let document: Value = serde_json::from_str(&stdout)?;
        let context = format!("{kind} {target}");
        match document {
            Value::Object(mut map) => map
                .remove(kind.json_root())
                .map(Some)
                .ok_or_else(|| Error::malformed(context, kind.json_root())),
            _ => Err(Error::malformed(context, kind.json_root())),
        }
    }

    /// Show an entity as a typed model.
    ///
    /// # Errors
    ///
    /// Same as [`OneClient::show_value`], plus
    /// [`Error::MalformedResponse`] when an expected field is missing.
    pub async fn show<T: OneEntity>(&self, target: &str) -> Result<Option<T>> {
        match self.show_value(T::KIND, target).await? {
            Some(value) => decode(&format!("{} {target}", T::KIND), value).map(Some),
            None => Ok(None),
        }
    }

    /// List every entity of a kind.
    ///
    /// # Errors
    ///
    /// Fails on command failure or malformed output.
    pub async fn list<T: OneEntity>(&self) -> Result<Vec<T>> {
        let kind = T::KIND;
        let stdout = self
            .run(kind.command(), CommandArgs::subcommand("list").json())
            .await?;
        let context = format!("{kind} pool");

        let document: Value = serde_json::from_str(&stdout)?;
        let pool = document
            .get(kind.pool_root())
            .ok_or_else(|| Error::malformed(&context, kind.pool_root()))?;

        match pool.get(kind.json_root()) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(|item| decode(&context, item))
                .collect(),
            Some(single) => Ok(vec![decode(&context, single.clone())?]),
        }
    }

    /// Create an entity from a template file and return the new id.
    ///
    /// The body is written to a private temporary file that lives until the
    /// command has completed.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written, the command fails or its output
    /// carries no id.
    pub async fn create_from_template(
        &self,
        kind: EntityKind,
        body: &str,
        extra: CommandArgs,
    ) -> Result<u64> {
        let file = write_temp(body)?;
        let mut args = CommandArgs::subcommand("create").arg(file.path().display());
        for arg in extra.into_vec() {
            args = args.arg(arg);
        }
        let stdout = self.run(kind.command(), args).await?;
        parse_id_line(&stdout)
    }

    /// Rename an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] on a non-zero exit.
    pub async fn rename(&self, kind: EntityKind, id: u64, name: &str) -> Result<()> {
        self.run(
            kind.command(),
            CommandArgs::subcommand("rename").arg(id).arg(name),
        )
        .await
        .map(|_| ())
    }

    /// Change the owner of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] on a non-zero exit.
    pub async fn chown(&self, kind: EntityKind, id: u64, user: UserId, group: GroupId) -> Result<()> {
        self.run(
            kind.command(),
            CommandArgs::subcommand("chown").arg(id).arg(user).arg(group),
        )
        .await
        .map(|_| ())
    }

    /// Export a marketplace appliance into `datastore` under `name`.
    ///
    /// # Errors
    ///
    /// Fails when the export command fails or its output cannot be parsed.
    pub async fn export_app(
        &self,
        app: ApplianceId,
        name: &str,
        datastore: DatastoreId,
    ) -> Result<ArtifactIds> {
        let stdout = self
            .run(
                EntityKind::Appliance.command(),
                CommandArgs::subcommand("export")
                    .arg(app)
                    .arg(name)
                    .option("--datastore", datastore),
            )
            .await?;
        parse_export_output(&stdout)
    }

    /// Instantiate a service template with an extra-template payload.
    ///
    /// # Errors
    ///
    /// Fails when the command fails or returns no id.
    pub async fn instantiate_service(
        &self,
        template: ServiceTemplateId,
        payload: &Value,
    ) -> Result<ServiceId> {
        let file = write_temp(&serde_json::to_string_pretty(payload)?)?;
        let stdout = self
            .run(
                EntityKind::ServiceTemplate.command(),
                CommandArgs::subcommand("instantiate")
                    .arg(template)
                    .arg(file.path().display()),
            )
            .await?;
        parse_id_line(&stdout).map(ServiceId::new)
    }

    /// Merge `body` into a user's template.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] on a non-zero exit.
    pub async fn update_user_template(&self, user: UserId, body: &str) -> Result<()> {
        let file = write_temp(body)?;
        self.run(
            EntityKind::User.command(),
            CommandArgs::subcommand("update")
                .arg(user)
                .arg(file.path().display())
                .flag("--append"),
        )
        .await
        .map(|_| ())
    }

    /// Image ids of a template, resolving disks that reference images by name.
    ///
    /// # Errors
    ///
    /// Fails when the template or a referenced image cannot be read.
    pub async fn template_image_ids(&self, template: TemplateId) -> Result<Vec<ImageId>> {
        let context = format!("{} {template}", EntityKind::Template);
        let template: crate::models::Template = self
            .show(&template.to_string())
            .await?
            .ok_or_else(|| Error::NotFound(context.clone()))?;

        let mut ids = Vec::with_capacity(template.template.disks.len());
        for disk in &template.template.disks {
            match (disk.image_id, disk.image.as_deref()) {
                (Some(id), _) => ids.push(id),
                (None, Some(name)) => {
                    let image: crate::models::Image = self
                        .show(name)
                        .await?
                        .ok_or_else(|| Error::NotFound(format!("image {name}")))?;
                    ids.push(image.id);
                }
                (None, None) => return Err(Error::malformed(context, "DISK/IMAGE_ID")),
            }
        }
        Ok(ids)
    }
}

/// Whether a failed command's stderr means "no such entity".
#[must_use]
pub fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found") || lower.contains("error getting")
}

/// Decode a JSON value, reporting a missing field as a malformed response.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] for missing fields and
/// [`Error::ParseError`] for anything else.
pub fn decode<T: DeserializeOwned>(context: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        let message = e.to_string();
        match missing_field(&message) {
            Some(key) => Error::malformed(context, key),
            None => Error::ParseError(format!("{context}: {message}")),
        }
    })
}

fn missing_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}

/// Parse the `ID: <n>` line printed by create and instantiate commands.
///
/// # Errors
///
/// Returns [`Error::ParseError`] when no such line is present.
pub fn parse_id_line(output: &str) -> Result<u64> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ID:"))
        .map(str::trim)
        .next()
        .ok_or_else(|| Error::ParseError(format!("No `ID:` line in `{}`", output.trim())))
        .and_then(parse_id)
}

/// Parse the sectioned output of a marketplace export:
///
/// ```text
/// IMAGE
///     ID: 12
/// VMTEMPLATE
///     ID: 7
/// ```
///
/// # Errors
///
/// Returns [`Error::ParseError`] for an id line outside a section or an id
/// that is not a number (the backend prints its error message in place of
/// the id when one of the exports fails).
pub fn parse_export_output(output: &str) -> Result<ArtifactIds> {
    let mut ids = ArtifactIds::default();
    let mut section: Option<EntityKind> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "IMAGE" => section = Some(EntityKind::Image),
            "VMTEMPLATE" => section = Some(EntityKind::Template),
            "SERVICE_TEMPLATE" => section = Some(EntityKind::ServiceTemplate),
            _ => {
                let Some(value) = line.strip_prefix("ID:") else {
                    continue;
                };
                let id = parse_id(value).map_err(|_| {
                    Error::ParseError(format!("Export failed: {}", value.trim()))
                })?;
                match section {
                    Some(EntityKind::Image) => ids.images.push(ImageId::new(id)),
                    Some(EntityKind::Template) => ids.templates.push(TemplateId::new(id)),
                    Some(EntityKind::ServiceTemplate) => {
                        ids.service_templates.push(ServiceTemplateId::new(id));
                    }
                    _ => {
                        return Err(Error::ParseError(format!(
                            "Export id {id} outside of a section"
                        )))
                    }
                }
            }
        }
    }

    Ok(ids)
}

/// Render `KEY = "value"` pairs as a backend template.
#[must_use]
pub fn render_template(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{key} = \"{escaped}\"\n")
        })
        .collect()
}

fn write_temp(body: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(body.as_bytes())?;
    file.flush()?;
    Ok(file)
}
