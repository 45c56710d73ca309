//! Name/id resolution for backend entities.
//!
//! Configuration names entities; mutation commands address them by id. The
//! resolver sits between the two: it looks an entity up by name or id and
//! returns `None` when it does not exist, so callers can branch on existence
//! without matching on error variants.

use sandbox_core::Error;
use tracing::debug;

use crate::client::OneClient;
use crate::models::{MarketApp, OneEntity};
use crate::Result;

/// How an entity is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Exact name
    Name(String),
    /// Numeric id
    Id(u64),
}

impl Lookup {
    /// Lookup by exact name.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// Lookup by id.
    #[must_use]
    pub fn id(id: impl Into<u64>) -> Self {
        Self::Id(id.into())
    }

    /// Build a lookup from optional parts; exactly one must be given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] when both or neither are supplied.
    pub fn from_parts(name: Option<&str>, id: Option<u64>) -> Result<Self> {
        match (name, id) {
            (Some(name), None) => Ok(Self::name(name)),
            (None, Some(id)) => Ok(Self::Id(id)),
            (Some(_), Some(_)) => Err(Error::InvalidRequest(
                "Provide either a name or an id, not both".to_string(),
            )),
            (None, None) => Err(Error::InvalidRequest(
                "Provide a name or an id".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "`{name}`"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Resolves entities by name or id.
#[derive(Debug, Clone)]
pub struct EntityResolver {
    client: OneClient,
}

impl EntityResolver {
    /// Create a resolver over `client`.
    #[must_use]
    pub const fn new(client: OneClient) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &OneClient {
        &self.client
    }

    /// Look an entity up. Absence is `Ok(None)`.
    ///
    /// Names are matched exactly against the pool listing, so a name that
    /// happens to be numeric is never mistaken for an id.
    ///
    /// # Errors
    ///
    /// Fails on command failures and malformed responses.
    pub async fn resolve<T: OneEntity>(&self, lookup: &Lookup) -> Result<Option<T>> {
        let found = match lookup {
            Lookup::Id(id) => self.client.show::<T>(&id.to_string()).await?,
            Lookup::Name(name) => self
                .client
                .list::<T>()
                .await?
                .into_iter()
                .find(|entity| entity.name() == name),
        };
        debug!(kind = %T::KIND, lookup = %lookup, found = found.is_some(), "resolved entity");
        Ok(found)
    }

    /// Look an entity up and fail if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the entity does not exist.
    pub async fn require<T: OneEntity>(&self, lookup: &Lookup) -> Result<T> {
        self.resolve::<T>(lookup)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {lookup}", T::KIND)))
    }

    /// Check whether an entity exists.
    ///
    /// # Errors
    ///
    /// Fails on command failures and malformed responses.
    pub async fn exists<T: OneEntity>(&self, lookup: &Lookup) -> Result<bool> {
        Ok(self.resolve::<T>(lookup).await?.is_some())
    }

    /// List every entity of a kind.
    ///
    /// # Errors
    ///
    /// Fails on command failures and malformed responses.
    pub async fn list<T: OneEntity>(&self) -> Result<Vec<T>> {
        self.client.list::<T>().await
    }

    /// Find an appliance by name within a given marketplace.
    ///
    /// # Errors
    ///
    /// Fails on command failures and malformed responses.
    pub async fn find_appliance(&self, name: &str, marketplace: &str) -> Result<Option<MarketApp>> {
        Ok(self
            .client
            .list::<MarketApp>()
            .await?
            .into_iter()
            .find(|app| app.name == name && app.marketplace == marketplace))
    }
}
