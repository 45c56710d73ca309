//! Ownership reassignment.
//!
//! Artifacts are created by the administrator account and handed over to the
//! tenant once they are ready. Every id is changed independently: a failure is
//! logged and reported, earlier successes are kept.

use sandbox_core::ids::{GroupId, UserId};
use sandbox_core::types::EntityKind;
use sandbox_core::Error;
use tracing::{error, info};

use crate::client::{decode, OneClient};
use crate::models::{ArtifactIds, EntityOwner};
use crate::Result;

/// Target owner of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// Owning user
    pub user: UserId,
    /// Owning group
    pub group: GroupId,
}

impl Owner {
    /// Create an owner.
    #[must_use]
    pub const fn new(user: UserId, group: GroupId) -> Self {
        Self { user, group }
    }
}

/// Changes and verifies entity ownership.
#[derive(Debug, Clone)]
pub struct OwnershipTransferrer {
    client: OneClient,
}

impl OwnershipTransferrer {
    /// Create a transferrer over `client`.
    #[must_use]
    pub const fn new(client: OneClient) -> Self {
        Self { client }
    }

    /// Change the owner of every id of one kind.
    ///
    /// All ids are attempted; the first failure is returned after the rest
    /// have been tried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for kinds without ownership and
    /// [`Error::ChownFailed`] for the first id that could not be changed.
    pub async fn chown(&self, kind: EntityKind, ids: &[u64], owner: Owner) -> Result<()> {
        if !kind.supports_chown() {
            return Err(Error::InvalidRequest(format!(
                "Ownership of a {kind} cannot be changed"
            )));
        }

        let mut first_failure = None;
        for &id in ids {
            match self.client.chown(kind, id, owner.user, owner.group).await {
                Ok(()) => {
                    info!(kind = %kind, id, user = %owner.user, group = %owner.group, "owner changed");
                }
                Err(e) => {
                    let failure = Error::ChownFailed {
                        kind,
                        id,
                        message: e.to_string(),
                    };
                    error!(kind = %kind, id, error = %e, "failed to change owner");
                    first_failure.get_or_insert(failure);
                }
            }
        }

        first_failure.map_or(Ok(()), Err)
    }

    /// Change the owner of every artifact of an import, service templates
    /// first and images last.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::ChownFailed`] encountered.
    pub async fn chown_artifacts(&self, artifacts: &ArtifactIds, owner: Owner) -> Result<()> {
        let groups: [(EntityKind, Vec<u64>); 3] = [
            (
                EntityKind::ServiceTemplate,
                artifacts.service_templates.iter().map(|id| id.get()).collect(),
            ),
            (
                EntityKind::Template,
                artifacts.templates.iter().map(|id| id.get()).collect(),
            ),
            (
                EntityKind::Image,
                artifacts.images.iter().map(|id| id.get()).collect(),
            ),
        ];

        let mut first_failure = None;
        for (kind, ids) in groups {
            if ids.is_empty() {
                continue;
            }
            if let Err(e) = self.chown(kind, &ids, owner).await {
                first_failure.get_or_insert(e);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Read an entity back and check that it belongs to `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entity is gone and fails on
    /// malformed responses.
    pub async fn verify(&self, kind: EntityKind, id: u64, owner: Owner) -> Result<bool> {
        let context = format!("{kind} {id}");
        let value = self
            .client
            .show_value(kind, &id.to_string())
            .await?
            .ok_or_else(|| Error::NotFound(context.clone()))?;
        let current: EntityOwner = decode(&context, value)?;
        Ok(current.uid == owner.user && current.gid == owner.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;
    use sandbox_core::backend::{CommandOutput, MockCommandExecutor};
    use sandbox_core::ids::{ImageId, ServiceTemplateId, TemplateId};
    use std::sync::{Arc, Mutex};

    fn owner() -> Owner {
        Owner::new(UserId::new(5), GroupId::new(100))
    }

    #[tokio::test]
    async fn test_chown_continues_after_failure() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_execute()
            .with(always(), always())
            .times(3)
            .returning(move |program, args| {
                recorded.lock().unwrap().push(format!("{program} {}", args.join(" ")));
                if args[1] == "2" {
                    Ok(CommandOutput::failure(255, "[one.image.chown] Not authorized"))
                } else {
                    Ok(CommandOutput::success(""))
                }
            });

        let transferrer = OwnershipTransferrer::new(OneClient::new(Arc::new(executor)));
        let err = transferrer
            .chown(EntityKind::Image, &[1, 2, 3], owner())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ChownFailed { kind: EntityKind::Image, id: 2, .. }));
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "oneimage chown 1 5 100",
                "oneimage chown 2 5 100",
                "oneimage chown 3 5 100"
            ]
        );
    }

    #[tokio::test]
    async fn test_chown_rejects_unsupported_kind() {
        let transferrer =
            OwnershipTransferrer::new(OneClient::new(Arc::new(MockCommandExecutor::new())));
        let err = transferrer
            .chown(EntityKind::Marketplace, &[1], owner())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_chown_artifacts_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let mut executor = MockCommandExecutor::new();
        executor.expect_execute().returning(move |program, args| {
            recorded
                .lock()
                .unwrap()
                .push(format!("{program} {}", args[1]));
            Ok(CommandOutput::success(""))
        });

        let artifacts = ArtifactIds {
            images: vec![ImageId::new(10), ImageId::new(11)],
            templates: vec![TemplateId::new(4)],
            service_templates: vec![ServiceTemplateId::new(2)],
        };
        OwnershipTransferrer::new(OneClient::new(Arc::new(executor)))
            .chown_artifacts(&artifacts, owner())
            .await
            .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "oneflow-template 2",
                "onetemplate 4",
                "oneimage 10",
                "oneimage 11"
            ]
        );
    }

    #[tokio::test]
    async fn test_verify() {
        let mut executor = MockCommandExecutor::new();
        executor.expect_execute().returning(|_, _| {
            Ok(CommandOutput::success(
                r#"{"VMTEMPLATE": {"ID": "4", "NAME": "vm", "UID": "5", "GID": "100"}}"#,
            ))
        });
        let transferrer = OwnershipTransferrer::new(OneClient::new(Arc::new(executor)));
        assert!(transferrer.verify(EntityKind::Template, 4, owner()).await.unwrap());
        assert!(!transferrer
            .verify(EntityKind::Template, 4, Owner::new(UserId::new(0), GroupId::new(0)))
            .await
            .unwrap());
    }
}
