//! Version control seam.
//!
//! The pipeline only needs four operations on the sites repository; they sit
//! behind [`VersionControl`] so the pipeline can be tested without a remote.
//! [`GitRepository`] implements them with `git2`, authenticating HTTPS
//! remotes with the operator's access token.

use std::cell::RefCell;
use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Commit, Cred, CredentialType, ErrorClass, ErrorCode, FetchOptions, IndexAddOption,
    PushOptions, RemoteCallbacks, Repository, Signature,
};
use sandbox_core::Error;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::Result;

/// Operations the site pipeline performs on the sites repository.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait VersionControl: Send + Sync {
    /// Clone `url` into `target`, or fetch `origin` when `target` already
    /// holds a clone.
    fn clone_or_open(&self, url: &str, target: &Path) -> Result<()>;

    /// Check out `branch`, creating it when neither a local nor a remote
    /// branch of that name exists. Returns `true` when the branch was created.
    fn checkout_branch(&self, repo: &Path, branch: &str) -> Result<bool>;

    /// Stage every change and commit it. Returns the commit id, or `None`
    /// when the tree is unchanged.
    fn commit_all(&self, repo: &Path, message: &str) -> Result<Option<String>>;

    /// Push `branch` to `origin`.
    fn push(&self, repo: &Path, branch: &str) -> Result<()>;
}

/// `git2` implementation of [`VersionControl`].
#[derive(Debug, Clone)]
pub struct GitRepository {
    token: Option<SecretString>,
    author_name: String,
    author_email: String,
}

impl GitRepository {
    /// Create a repository handle committing as the given author.
    #[must_use]
    pub fn new(author_name: impl Into<String>, author_email: impl Into<String>) -> Self {
        Self {
            token: None,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    /// Authenticate HTTPS remotes with an access token.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    fn callbacks<'a>(&self) -> RemoteCallbacks<'a> {
        let token = self.token.clone();
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username, allowed| {
            if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
                if let Some(token) = &token {
                    return Cred::userpass_plaintext(token.expose_secret(), "");
                }
            }
            if allowed.contains(CredentialType::DEFAULT) {
                return Cred::default();
            }
            Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Http,
                "no access token for the sites repository",
            ))
        });
        callbacks
    }

    fn fetch_options<'a>(&self) -> FetchOptions<'a> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(self.callbacks());
        options
    }
}

impl VersionControl for GitRepository {
    fn clone_or_open(&self, url: &str, target: &Path) -> Result<()> {
        if target.join(".git").exists() {
            let repo = open(target)?;
            let mut remote = repo.find_remote("origin").map_err(git("find remote origin"))?;
            remote
                .fetch::<&str>(&[], Some(&mut self.fetch_options()), None)
                .map_err(git("fetch origin"))?;
            info!(path = %target.display(), "sites repository updated");
            return Ok(());
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(self.fetch_options());
        builder
            .clone(url, target)
            .map_err(git(&format!("clone {url}")))?;
        info!(url, path = %target.display(), "sites repository cloned");
        Ok(())
    }

    fn checkout_branch(&self, path: &Path, branch: &str) -> Result<bool> {
        let repo = open(path)?;
        let mut created = false;

        if repo.find_branch(branch, BranchType::Local).is_err() {
            let upstream = format!("origin/{branch}");
            let start = match repo.find_branch(&upstream, BranchType::Remote) {
                Ok(remote) => remote.get().peel_to_commit(),
                Err(_) => {
                    created = true;
                    repo.head().and_then(|head| head.peel_to_commit())
                }
            }
            .map_err(git("resolve branch start"))?;

            let mut local = repo
                .branch(branch, &start, false)
                .map_err(git(&format!("create branch {branch}")))?;
            if !created {
                local
                    .set_upstream(Some(&upstream))
                    .map_err(git("set upstream"))?;
            }
        }

        repo.set_head(&format!("refs/heads/{branch}"))
            .map_err(git(&format!("switch to {branch}")))?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.checkout_head(Some(&mut checkout))
            .map_err(git(&format!("check out {branch}")))?;

        info!(branch, created, "site branch checked out");
        Ok(created)
    }

    fn commit_all(&self, path: &Path, message: &str) -> Result<Option<String>> {
        let repo = open(path)?;
        let mut index = repo.index().map_err(git("open index"))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(git("stage changes"))?;
        index.write().map_err(git("write index"))?;
        let tree_id = index.write_tree().map_err(git("write tree"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(git("resolve HEAD"))?),
            Err(_) => None,
        };
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            debug!(path = %path.display(), "nothing to commit");
            return Ok(None);
        }

        let tree = repo.find_tree(tree_id).map_err(git("find tree"))?;
        let signature =
            Signature::now(&self.author_name, &self.author_email).map_err(git("signature"))?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(git("commit"))?;

        info!(commit = %oid, "site configuration committed");
        Ok(Some(oid.to_string()))
    }

    fn push(&self, path: &Path, branch: &str) -> Result<()> {
        let repo = open(path)?;
        let mut remote = repo.find_remote("origin").map_err(git("find remote origin"))?;

        let rejected: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = self.callbacks();
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejected.borrow_mut() = Some(format!("{refname}: {status}"));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(git(&format!("push {branch}")))?;

        if let Some(reason) = rejected.borrow_mut().take() {
            return Err(Error::GitError(format!("push {branch} rejected: {reason}")));
        }
        info!(branch, "site branch pushed");
        Ok(())
    }
}

fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(git(&format!("open {}", path.display())))
}

fn git(context: &str) -> impl FnOnce(git2::Error) -> Error + '_ {
    move |err| Error::GitError(format!("{context}: {}", describe(&err)))
}

/// Short operator-facing reason for a `git2` failure.
fn describe(err: &git2::Error) -> String {
    let message = err.message().to_lowercase();
    if message.contains("not found") || message.contains("404") {
        "repository not found".to_string()
    } else if message.contains("authentication") || message.contains("credentials") {
        "authentication failed, check the access token".to_string()
    } else if err.class() == ErrorClass::Net || message.contains("timed out") {
        format!("network error: {}", err.message())
    } else {
        err.message().to_string()
    }
}
