use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use crate::api::SymphonyClient;
use crate::cache::TtlCache;
use crate::error::{SymphonyError, SymphonyResult};
use crate::types::SymphonyUser;

/// A validated directory lookup: exactly one identifying field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserQuery {
    UserId(u64),
    Username(String),
    Email(String),
}

impl fmt::Display for UserQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserQuery::UserId(id) => write!(f, "userId={id}"),
            UserQuery::Username(name) => write!(f, "username={name}"),
            UserQuery::Email(email) => write!(f, "emailAddress={email}"),
        }
    }
}

/// Lookup arguments as callers supply them; converted into a [`UserQuery`]
/// before any network call is made.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserLookup {
    pub user_id: Option<u64>,
    pub username: Option<String>,
    pub email_address: Option<String>,
}

impl UserLookup {
    pub fn by_id(user_id: u64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn by_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn by_email(email_address: impl Into<String>) -> Self {
        Self {
            email_address: Some(email_address.into()),
            ..Self::default()
        }
    }
}

impl TryFrom<&UserLookup> for UserQuery {
    type Error = SymphonyError;

    fn try_from(lookup: &UserLookup) -> Result<Self, Self::Error> {
        match (
            lookup.user_id,
            lookup.username.as_deref(),
            lookup.email_address.as_deref(),
        ) {
            (Some(id), None, None) => Ok(UserQuery::UserId(id)),
            (None, Some(name), None) => Ok(UserQuery::Username(name.to_string())),
            (None, None, Some(email)) => Ok(UserQuery::Email(email.to_string())),
            (None, None, None) => Err(SymphonyError::validation(
                "no valid user argument supplied",
            )),
            _ => Err(SymphonyError::validation(
                "exactly one of userId, username or emailAddress must be supplied",
            )),
        }
    }
}

/// A resolved user as tracked by the host's registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: u64,
    pub username: String,
    pub display_name: String,
    pub email_address: String,
    /// Conversation the user was last seen in.
    pub stream_id: Option<String>,
}

impl DirectoryEntry {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            username: String::new(),
            display_name: String::new(),
            email_address: String::new(),
            stream_id: None,
        }
    }
}

/// The host's user registry. Entries are unique per user id; `store`
/// replaces the previous record wholesale.
pub trait UserRegistry: Send + Sync {
    fn get(&self, user_id: u64) -> Option<DirectoryEntry>;
    fn store(&self, entry: DirectoryEntry);
}

pub type SharedUserRegistry = Arc<dyn UserRegistry>;

#[derive(Default)]
pub struct MemoryUserRegistry {
    users: DashMap<u64, DirectoryEntry>,
}

impl MemoryUserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserRegistry for MemoryUserRegistry {
    fn get(&self, user_id: u64) -> Option<DirectoryEntry> {
        self.users.get(&user_id).map(|entry| entry.value().clone())
    }

    fn store(&self, entry: DirectoryEntry) {
        self.users.insert(entry.id, entry);
    }
}

type DirectoryKey = (UserQuery, Option<String>);

/// Memoized user lookups, keyed by query and the conversation the lookup was
/// made for.
pub struct DirectoryCache {
    client: SymphonyClient,
    registry: SharedUserRegistry,
    cache: TtlCache<DirectoryKey, DirectoryEntry>,
}

impl DirectoryCache {
    pub fn new(client: SymphonyClient, registry: SharedUserRegistry, ttl: Duration) -> Self {
        Self {
            client,
            registry,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn registry(&self) -> &SharedUserRegistry {
        &self.registry
    }

    pub async fn resolve(
        &self,
        lookup: &UserLookup,
        stream_id: Option<&str>,
    ) -> SymphonyResult<DirectoryEntry> {
        let query = UserQuery::try_from(lookup)?;
        self.resolve_query(query, stream_id).await
    }

    pub async fn resolve_query(
        &self,
        query: UserQuery,
        stream_id: Option<&str>,
    ) -> SymphonyResult<DirectoryEntry> {
        let key = (query, stream_id.map(str::to_string));
        self.cache
            .get_or_try_fetch(&key, || async {
                let user = self.client.get_user(&key.0).await?;
                Ok(self.record(user, stream_id))
            })
            .await
    }

    pub async fn resolve_by_username(&self, username: &str) -> SymphonyResult<DirectoryEntry> {
        self.resolve(&UserLookup::by_username(username), None).await
    }

    pub async fn resolve_by_email(&self, email: &str) -> SymphonyResult<DirectoryEntry> {
        self.resolve(&UserLookup::by_email(email), None).await
    }

    /// Folds a fresh lookup into the registry, binding the user to the
    /// conversation when one was supplied.
    fn record(&self, user: SymphonyUser, stream_id: Option<&str>) -> DirectoryEntry {
        let mut entry = self
            .registry
            .get(user.id)
            .unwrap_or_else(|| DirectoryEntry::new(user.id));
        entry.username = user.username.unwrap_or_default();
        entry.display_name = user.display_name.unwrap_or_default();
        entry.email_address = user.email_address.unwrap_or_default();
        if let Some(stream) = stream_id
            && entry.stream_id.as_deref() != Some(stream)
        {
            debug!(user_id = entry.id, stream_id = stream, "user seen in new conversation");
            entry.stream_id = Some(stream.to_string());
        }
        self.registry.store(entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_requires_exactly_one_field() {
        assert_eq!(
            UserQuery::try_from(&UserLookup::by_id(7)).unwrap(),
            UserQuery::UserId(7)
        );
        assert_eq!(
            UserQuery::try_from(&UserLookup::by_email("a@b.c")).unwrap(),
            UserQuery::Email("a@b.c".into())
        );
        assert!(matches!(
            UserQuery::try_from(&UserLookup::default()),
            Err(SymphonyError::Validation(_))
        ));
        let both = UserLookup {
            user_id: Some(7),
            username: Some("johndoe".into()),
            email_address: None,
        };
        assert!(matches!(
            UserQuery::try_from(&both),
            Err(SymphonyError::Validation(_))
        ));
    }

    #[test]
    fn registry_keeps_one_entry_per_user() {
        let registry = MemoryUserRegistry::new();
        let mut entry = DirectoryEntry::new(42);
        entry.stream_id = Some("room-a".into());
        registry.store(entry.clone());
        entry.stream_id = Some("room-b".into());
        registry.store(entry);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(42).unwrap().stream_id.as_deref(),
            Some("room-b")
        );
    }

    #[test]
    fn query_display_names_the_field() {
        assert_eq!(UserQuery::UserId(1).to_string(), "userId=1");
        assert_eq!(
            UserQuery::Username("johndoe".into()).to_string(),
            "username=johndoe"
        );
    }
}
