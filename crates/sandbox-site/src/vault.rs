//! Encryption of the site file at rest.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use sandbox_core::args::CommandArgs;
use sandbox_core::backend::{run_checked, CommandExecutor};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::Result;

const VAULT_PROGRAM: &str = "ansible-vault";
const VAULT_HEADER: &str = "$ANSIBLE_VAULT;";

/// Vault password derived from the operator's repository token: the hex
/// SHA-256 digest of the token.
#[must_use]
pub fn vault_secret(token: &SecretString) -> SecretString {
    let digest = Sha256::digest(token.expose_secret().as_bytes());
    SecretString::from(hex::encode(digest))
}

/// `ansible-vault` driven through the command executor.
#[derive(Clone)]
pub struct Vault {
    executor: Arc<dyn CommandExecutor>,
}

impl Vault {
    /// Create a vault running commands through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Check whether `path` already holds vault data.
    ///
    /// # Errors
    ///
    /// Returns [`sandbox_core::Error::IoError`] when the file cannot be read.
    pub fn is_encrypted(path: &Path) -> Result<bool> {
        Ok(std::fs::read_to_string(path)?.starts_with(VAULT_HEADER))
    }

    /// Encrypt `file` in place.
    ///
    /// # Errors
    ///
    /// Fails when the password file cannot be written or `ansible-vault`
    /// exits non-zero.
    pub async fn encrypt(&self, file: &Path, secret: &SecretString) -> Result<()> {
        self.run("encrypt", file, secret).await
    }

    /// Decrypt `file` in place.
    ///
    /// # Errors
    ///
    /// Same as [`Vault::encrypt`]; a wrong secret makes `ansible-vault` fail.
    pub async fn decrypt(&self, file: &Path, secret: &SecretString) -> Result<()> {
        self.run("decrypt", file, secret).await
    }

    async fn run(&self, action: &str, file: &Path, secret: &SecretString) -> Result<()> {
        // Created with mode 0600 and removed on drop.
        let mut password_file = tempfile::NamedTempFile::new()?;
        password_file.write_all(secret.expose_secret().as_bytes())?;
        password_file.flush()?;

        let args = CommandArgs::subcommand(action)
            .arg(file.display())
            .option("--vault-password-file", password_file.path().display())
            .into_vec();
        run_checked(self.executor.as_ref(), VAULT_PROGRAM, &args).await?;

        info!(file = %file.display(), action, "site file processed with ansible-vault");
        Ok(())
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}
