//! Tenant user, group and permission setup.
//!
//! The tenant owns every artifact the installer produces. Its password is
//! generated once, stored in a private file and reused on later runs so the
//! installer can be re-run without invalidating downstream credentials.

use std::fs;
use std::io::Write;
use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sandbox_core::args::CommandArgs;
use sandbox_core::backend::Credentials;
use sandbox_core::ids::{GroupId, UserId};
use sandbox_core::types::EntityKind;
use sandbox_core::Error;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::client::{render_template, OneClient};
use crate::models::{Group, User};
use crate::ownership::Owner;
use crate::resolver::{EntityResolver, Lookup};
use crate::Result;

const PASSWORD_LENGTH: usize = 16;

/// The tenant the installer provisions for.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// User id
    pub user: UserId,
    /// Group id
    pub group: GroupId,
    /// Login and password
    pub credentials: Credentials,
}

impl Tenant {
    /// Ownership target for the tenant's artifacts.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        Owner::new(self.user, self.group)
    }
}

/// Creates the tenant user, group and ACL rules.
#[derive(Debug, Clone)]
pub struct TenantSetup {
    client: OneClient,
    resolver: EntityResolver,
}

impl TenantSetup {
    /// Create a setup helper over `client`.
    #[must_use]
    pub fn new(client: OneClient) -> Self {
        Self {
            resolver: EntityResolver::new(client.clone()),
            client,
        }
    }

    /// Ensure the group, the user and its permissions exist.
    ///
    /// # Errors
    ///
    /// Fails on any backend or filesystem error.
    pub async fn setup(
        &self,
        username: &str,
        group: &str,
        password_file: &Path,
        acl_rules: &[String],
    ) -> Result<Tenant> {
        let group_id = self.ensure_group(group).await?;
        let (user_id, password) = self.ensure_user(username, group_id, password_file).await?;
        self.ensure_group_admin(group_id, user_id).await?;
        self.apply_acl_rules(group_id, acl_rules).await?;

        Ok(Tenant {
            user: user_id,
            group: group_id,
            credentials: Credentials {
                username: username.to_string(),
                password,
            },
        })
    }

    /// Create the group unless it exists.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    pub async fn ensure_group(&self, name: &str) -> Result<GroupId> {
        if let Some(group) = self.resolver.resolve::<Group>(&Lookup::name(name)).await? {
            info!(group = name, id = %group.id, "group already exists");
            return Ok(group.id);
        }

        let stdout = self
            .client
            .run(
                EntityKind::Group.command(),
                CommandArgs::subcommand("create").arg(name),
            )
            .await?;
        let id = GroupId::new(crate::client::parse_id_line(&stdout)?);
        info!(group = name, id = %id, "group created");
        Ok(id)
    }

    /// Create the user unless it exists and make `group` its primary group.
    ///
    /// The password is read from `password_file` when present. A new one is
    /// generated otherwise and, for an existing user, set on the account.
    ///
    /// # Errors
    ///
    /// Fails on backend or filesystem errors.
    pub async fn ensure_user(
        &self,
        name: &str,
        group: GroupId,
        password_file: &Path,
    ) -> Result<(UserId, SecretString)> {
        let stored = read_password(password_file)?;
        let existing = self.resolver.resolve::<User>(&Lookup::name(name)).await?;

        let (user, password) = match (existing, stored) {
            (Some(user), Some(password)) => {
                info!(user = name, id = %user.id, "user already exists");
                (user, password)
            }
            (Some(user), None) => {
                warn!(user = name, "password file missing, resetting the user's password");
                let password = generate_password();
                write_password(password_file, &password)?;
                self.client
                    .run(
                        EntityKind::User.command(),
                        CommandArgs::subcommand("passwd")
                            .arg(user.id)
                            .arg(password_file.display())
                            .flag("--read-file"),
                    )
                    .await?;
                (user, password)
            }
            (None, stored) => {
                let password = match stored {
                    Some(password) => password,
                    None => {
                        let password = generate_password();
                        write_password(password_file, &password)?;
                        password
                    }
                };
                let stdout = self
                    .client
                    .run(
                        EntityKind::User.command(),
                        CommandArgs::subcommand("create")
                            .arg(name)
                            .arg(password_file.display())
                            .flag("--read-file"),
                    )
                    .await?;
                let id = UserId::new(crate::client::parse_id_line(&stdout)?);
                info!(user = name, id = %id, "user created");
                let user = self.resolver.require::<User>(&Lookup::id(id)).await?;
                (user, password)
            }
        };

        if user.gid != group {
            self.client
                .run(
                    EntityKind::User.command(),
                    CommandArgs::subcommand("chgrp").arg(user.id).arg(group),
                )
                .await?;
        }

        Ok((user.id, password))
    }

    /// Make `user` an administrator of `group`.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    pub async fn ensure_group_admin(&self, group: GroupId, user: UserId) -> Result<()> {
        let current = self.resolver.require::<Group>(&Lookup::id(group)).await?;
        if current.is_admin(user) {
            return Ok(());
        }
        self.client
            .run(
                EntityKind::Group.command(),
                CommandArgs::subcommand("addadmin").arg(group).arg(user),
            )
            .await?;
        info!(group = %group, user = %user, "group admin added");
        Ok(())
    }

    /// Create ACL rules, replacing `{group}` with the group id.
    ///
    /// Rules that already exist are skipped.
    ///
    /// # Errors
    ///
    /// Fails on backend errors other than a duplicate rule.
    pub async fn apply_acl_rules(&self, group: GroupId, rules: &[String]) -> Result<()> {
        for template in rules {
            let rule = template.replace("{group}", &group.to_string());
            let output = self
                .client
                .run_raw("oneacl", CommandArgs::subcommand("create").arg(&rule))
                .await?;
            if output.is_success() {
                info!(%rule, "ACL rule created");
            } else if output.stderr.to_lowercase().contains("already exists") {
                info!(%rule, "ACL rule already exists");
            } else {
                output.into_result(&format!("oneacl create {rule}"))?;
            }
        }
        Ok(())
    }

    /// Append an SSH public key to the user's authorized keys.
    ///
    /// # Errors
    ///
    /// Fails on backend errors.
    pub async fn append_ssh_key(&self, user: UserId, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidRequest("Empty SSH public key".to_string()));
        }

        let current = self.resolver.require::<User>(&Lookup::id(user)).await?;
        let mut keys: Vec<&str> = current.ssh_public_keys();
        if keys.contains(&key) {
            info!(user = %user, "SSH key already authorized");
            return Ok(());
        }
        keys.push(key);

        let joined = keys.join("\n");
        let body = render_template(&[("SSH_PUBLIC_KEY", joined.as_str())]);
        self.client.update_user_template(user, &body).await?;
        info!(user = %user, "SSH key authorized");
        Ok(())
    }
}

/// Random alphanumeric password.
#[must_use]
pub fn generate_password() -> SecretString {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect();
    SecretString::from(password)
}

fn read_password(path: &Path) -> Result<Option<SecretString>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(SecretString::from(trimmed.to_string())))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_password(path: &Path, password: &SecretString) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(password.expose_secret().as_bytes())?;
    Ok(())
}
