//! End-to-end site configuration run.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sandbox_core::prompt::Prompter;
use sandbox_core::Error;
use secrecy::SecretString;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::repo::VersionControl;
use crate::vault::{vault_secret, Vault};
use crate::walk::{apply_overrides, walk_document, Overrides};
use crate::Result;

/// Name of the site file inside the site directory.
pub const SITE_FILE: &str = "core.yaml";

/// Inputs of one site configuration run.
#[derive(Debug, Clone)]
pub struct SiteRequest {
    /// Sites repository URL
    pub repository: String,
    /// Site name, used as directory and branch name
    pub site: String,
    /// Repository access token; also keys the vault
    pub token: SecretString,
    /// Template copied for a new site, relative to the repository root
    pub template_path: PathBuf,
    /// Values the installer fills in without asking
    pub overrides: Overrides,
}

impl SiteRequest {
    /// Create a request for `site`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] unless `site` is usable as both a
    /// directory and a branch name.
    pub fn new(
        repository: impl Into<String>,
        site: impl Into<String>,
        token: SecretString,
        template_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let site = site.into();
        let valid = !site.is_empty()
            && !site.starts_with('.')
            && site
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::ValidationError(format!(
                "site name `{site}` must be letters, digits, `-`, `_` or `.`"
            )));
        }
        Ok(Self {
            repository: repository.into(),
            site,
            token,
            template_path: template_path.into(),
            overrides: Overrides::new(),
        })
    }

    /// Add known values.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides.extend(overrides);
        self
    }
}

/// Result of a site configuration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOutcome {
    /// Path of the encrypted site file
    pub site_file: PathBuf,
    /// Whether the site branch was created by this run
    pub branch_created: bool,
    /// Whether the site file was seeded from the template
    pub seeded: bool,
    /// Number of values asked
    pub asked: usize,
    /// Commit id, `None` when nothing changed
    pub commit: Option<String>,
    /// Whether the branch was pushed
    pub pushed: bool,
}

/// Clone, edit, encrypt, commit and push a site configuration.
pub struct SitePipeline {
    vcs: Arc<dyn VersionControl>,
    vault: Vault,
    checkout_dir: PathBuf,
}

impl SitePipeline {
    /// Create a pipeline working in `checkout_dir`.
    #[must_use]
    pub fn new(vcs: Arc<dyn VersionControl>, vault: Vault, checkout_dir: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            vault,
            checkout_dir: checkout_dir.into(),
        }
    }

    /// Local clone of the sites repository.
    #[must_use]
    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    /// Run the pipeline for `request`.
    ///
    /// An existing, encrypted site file is decrypted with the token-derived
    /// secret and edited. It is encrypted again only when a value changed;
    /// otherwise, and when editing fails, the committed ciphertext is put
    /// back, since every encryption salts the file anew.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GitError`] for repository failures,
    /// [`Error::NotFound`] when a new site has no template to start from,
    /// [`Error::ParseError`] for an unreadable site document, and propagates
    /// vault and prompt failures.
    pub async fn run(&self, request: &SiteRequest, prompter: &dyn Prompter) -> Result<SiteOutcome> {
        let repo = self.checkout_dir.as_path();
        self.vcs.clone_or_open(&request.repository, repo)?;
        let branch_created = self.vcs.checkout_branch(repo, &request.site)?;

        let site_file = repo.join(&request.site).join(SITE_FILE);
        let secret = vault_secret(&request.token);
        let mut ciphertext = None;
        let seeded = if site_file.exists() {
            if Vault::is_encrypted(&site_file)? {
                ciphertext = Some(fs::read(&site_file)?);
                self.vault.decrypt(&site_file, &secret).await?;
            }
            false
        } else {
            self.seed(&request.template_path, &site_file)?;
            true
        };

        let edited = match edit(&site_file, &request.overrides, prompter) {
            Ok(edited) => edited,
            Err(err) => {
                if let Some(original) = &ciphertext {
                    if let Err(restore) = fs::write(&site_file, original) {
                        warn!(error = %restore, file = %site_file.display(), "site file left decrypted");
                    }
                }
                return Err(err);
            }
        };
        match ciphertext {
            Some(original) if !edited.changed => {
                fs::write(&site_file, original)?;
                debug!(file = %site_file.display(), "site values unchanged, keeping the committed file");
            }
            _ => self.vault.encrypt(&site_file, &secret).await?,
        }
        let asked = edited.asked;

        let message = format!("Configure site {}", request.site);
        let commit = self.vcs.commit_all(repo, &message)?;
        let pushed = commit.is_some() || branch_created;
        if pushed {
            self.vcs.push(repo, &request.site)?;
        } else {
            info!(site = %request.site, "site configuration unchanged");
        }

        Ok(SiteOutcome {
            site_file,
            branch_created,
            seeded,
            asked,
            commit,
            pushed,
        })
    }

    fn seed(&self, template_path: &Path, site_file: &Path) -> Result<()> {
        let template = self.checkout_dir.join(template_path);
        if !template.is_file() {
            return Err(Error::NotFound(format!(
                "site template {} in the sites repository",
                template_path.display()
            )));
        }
        if let Some(parent) = site_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&template, site_file)?;
        info!(template = %template_path.display(), file = %site_file.display(), "site file seeded");
        Ok(())
    }
}

impl std::fmt::Debug for SitePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SitePipeline")
            .field("checkout_dir", &self.checkout_dir)
            .finish_non_exhaustive()
    }
}

struct Edited {
    asked: usize,
    changed: bool,
}

fn edit(site_file: &Path, overrides: &Overrides, prompter: &dyn Prompter) -> Result<Edited> {
    let original: Value = serde_yaml::from_str(&fs::read_to_string(site_file)?)?;
    let mut doc = original.clone();
    apply_overrides(&mut doc, overrides)?;
    let skip: BTreeSet<String> = overrides.keys().cloned().collect();
    let asked = walk_document(&mut doc, &skip, prompter)?;
    fs::write(site_file, serde_yaml::to_string(&doc)?)?;
    Ok(Edited {
        asked,
        changed: doc != original,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MockVersionControl;
    use mockall::predicate::{always, eq};
    use sandbox_test_utils::{FakeOne, ScriptedPrompter};

    const TEMPLATE: &str = "site_hypervisor: one\nsite_dns: 1.1.1.1\n";

    fn token() -> SecretString {
        SecretString::from("ghp_token".to_string())
    }

    fn request() -> SiteRequest {
        SiteRequest::new(
            "https://example.org/sites.git",
            "uma",
            token(),
            ".dummy_site/core.yaml",
        )
        .unwrap()
    }

    /// Mock that "clones" by writing the template into the checkout.
    fn vcs_with_template(created: bool, commit: Option<&'static str>) -> MockVersionControl {
        let mut vcs = MockVersionControl::new();
        vcs.expect_clone_or_open()
            .with(eq("https://example.org/sites.git"), always())
            .times(1)
            .returning(|_, target| {
                fs::create_dir_all(target.join(".dummy_site")).unwrap();
                fs::write(target.join(".dummy_site/core.yaml"), TEMPLATE).unwrap();
                Ok(())
            });
        vcs.expect_checkout_branch()
            .with(always(), eq("uma"))
            .times(1)
            .returning(move |_, _| Ok(created));
        vcs.expect_commit_all()
            .with(always(), eq("Configure site uma"))
            .times(1)
            .returning(move |_, _| Ok(commit.map(ToString::to_string)));
        vcs
    }

    #[tokio::test]
    async fn test_new_site_is_seeded_encrypted_and_pushed() {
        let dir = tempfile::tempdir().unwrap();
        let mut vcs = vcs_with_template(true, Some("abc123"));
        vcs.expect_push().with(always(), eq("uma")).times(1).returning(|_, _| Ok(()));
        let fake = Arc::new(FakeOne::new());
        let pipeline = SitePipeline::new(Arc::new(vcs), Vault::new(fake.clone()), dir.path());

        let overrides: Overrides = [(
            "site_hypervisor".to_string(),
            Value::String("opennebula".to_string()),
        )]
        .into();
        let prompter = ScriptedPrompter::new(["8.8.8.8"]);
        let outcome = pipeline
            .run(&request().with_overrides(overrides), &prompter)
            .await
            .unwrap();

        assert!(outcome.seeded);
        assert!(outcome.branch_created);
        assert!(outcome.pushed);
        assert_eq!(outcome.asked, 1);
        assert_eq!(outcome.commit.as_deref(), Some("abc123"));
        assert_eq!(outcome.site_file, dir.path().join("uma/core.yaml"));
        assert!(Vault::is_encrypted(&outcome.site_file).unwrap());

        Vault::new(fake.clone())
            .decrypt(&outcome.site_file, &vault_secret(&token()))
            .await
            .unwrap();
        let doc: Value =
            serde_yaml::from_str(&fs::read_to_string(&outcome.site_file).unwrap()).unwrap();
        assert_eq!(doc["site_hypervisor"], "opennebula");
        assert_eq!(doc["site_dns"], "8.8.8.8");
    }

    #[tokio::test]
    async fn test_unchanged_existing_branch_is_not_pushed() {
        let dir = tempfile::tempdir().unwrap();
        let mut vcs = vcs_with_template(false, None);
        vcs.expect_push().times(0);
        let pipeline = SitePipeline::new(Arc::new(vcs), Vault::new(Arc::new(FakeOne::new())), dir.path());

        let outcome = pipeline
            .run(&request(), &ScriptedPrompter::new(["", ""]))
            .await
            .unwrap();

        assert!(!outcome.pushed);
        assert!(outcome.commit.is_none());
    }

    /// Checkout holding an encrypted `uma/core.yaml` and no template.
    async fn encrypted_site(dir: &Path, fake: &Arc<FakeOne>) -> PathBuf {
        let site_file = dir.join("uma").join(SITE_FILE);
        fs::create_dir_all(site_file.parent().unwrap()).unwrap();
        fs::write(&site_file, TEMPLATE).unwrap();
        Vault::new(fake.clone())
            .encrypt(&site_file, &vault_secret(&token()))
            .await
            .unwrap();
        site_file
    }

    fn existing_branch(commit: Option<&'static str>) -> MockVersionControl {
        let mut vcs = MockVersionControl::new();
        vcs.expect_clone_or_open().times(1).returning(|_, _| Ok(()));
        vcs.expect_checkout_branch().times(1).returning(|_, _| Ok(false));
        vcs.expect_commit_all()
            .times(1)
            .returning(move |_, _| Ok(commit.map(ToString::to_string)));
        vcs
    }

    #[tokio::test]
    async fn test_unchanged_site_keeps_committed_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOne::new());
        let site_file = encrypted_site(dir.path(), &fake).await;
        let committed = fs::read(&site_file).unwrap();
        let mut vcs = existing_branch(None);
        vcs.expect_push().times(0);
        let pipeline = SitePipeline::new(Arc::new(vcs), Vault::new(fake.clone()), dir.path());

        let outcome = pipeline
            .run(&request(), &ScriptedPrompter::new(["", ""]))
            .await
            .unwrap();

        assert_eq!(outcome.asked, 2);
        assert!(!outcome.pushed);
        assert_eq!(fs::read(&site_file).unwrap(), committed);
        assert_eq!(fake.calls_matching("ansible-vault encrypt").len(), 1);
    }

    #[tokio::test]
    async fn test_changed_site_is_encrypted_again() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOne::new());
        let site_file = encrypted_site(dir.path(), &fake).await;
        let mut vcs = existing_branch(Some("def456"));
        vcs.expect_push().with(always(), eq("uma")).times(1).returning(|_, _| Ok(()));
        let pipeline = SitePipeline::new(Arc::new(vcs), Vault::new(fake.clone()), dir.path());

        let outcome = pipeline
            .run(&request(), &ScriptedPrompter::new(["", "9.9.9.9"]))
            .await
            .unwrap();

        assert!(outcome.pushed);
        assert_eq!(fake.calls_matching("ansible-vault encrypt").len(), 2);
        Vault::new(fake.clone())
            .decrypt(&site_file, &vault_secret(&token()))
            .await
            .unwrap();
        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&site_file).unwrap()).unwrap();
        assert_eq!(doc["site_dns"], "9.9.9.9");
    }

    #[tokio::test]
    async fn test_failed_edit_restores_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeOne::new());
        let site_file = encrypted_site(dir.path(), &fake).await;
        let committed = fs::read(&site_file).unwrap();
        let mut vcs = MockVersionControl::new();
        vcs.expect_clone_or_open().returning(|_, _| Ok(()));
        vcs.expect_checkout_branch().returning(|_, _| Ok(false));
        vcs.expect_commit_all().times(0);
        let pipeline = SitePipeline::new(Arc::new(vcs), Vault::new(fake.clone()), dir.path());

        // No answers left: the walk fails on the first value.
        let err = pipeline
            .run(&request(), &ScriptedPrompter::new(Vec::<String>::new()))
            .await;

        assert!(err.is_err());
        assert_eq!(fs::read(&site_file).unwrap(), committed);
    }

    #[tokio::test]
    async fn test_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut vcs = MockVersionControl::new();
        vcs.expect_clone_or_open().returning(|_, _| Ok(()));
        vcs.expect_checkout_branch().returning(|_, _| Ok(true));
        vcs.expect_commit_all().times(0);
        let pipeline = SitePipeline::new(Arc::new(vcs), Vault::new(Arc::new(FakeOne::new())), dir.path());

        let err = pipeline
            .run(&request(), &ScriptedPrompter::new(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_site_name_validation() {
        for bad in ["", "../etc", ".hidden", "my site", "a/b"] {
            assert!(
                SiteRequest::new("https://x/y.git", bad, token(), "t.yaml").is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(SiteRequest::new("https://x/y.git", "uma-malaga_2", token(), "t.yaml").is_ok());
    }
}
