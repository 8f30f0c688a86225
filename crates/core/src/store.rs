//! Persistence contracts for the subscription document and per-user CI tokens.

use async_trait::async_trait;

use crate::models::SubscriptionList;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The document was written by someone else since it was loaded.
    #[error("subscription document changed since version {expected} was loaded")]
    Conflict { expected: u64 },
    #[error("malformed stored document")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// A value together with the document version it was read at.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load the full subscription document. A missing document is empty at version 0.
    async fn get_all(&self) -> Result<Versioned<SubscriptionList>, StoreError>;

    /// Replace the whole document if it is still at `expected_version`, returning the
    /// new version. Fails with [`StoreError::Conflict`] otherwise, leaving the stored
    /// document untouched.
    async fn save(&self, list: &SubscriptionList, expected_version: u64)
    -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn token_for_user(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn store_token(&self, user_id: &str, token: &str) -> Result<(), StoreError>;

    /// Returns `false` if the user had no token.
    async fn delete_token(&self, user_id: &str) -> Result<bool, StoreError>;
}

/// Run a read-modify-write cycle against the subscription document.
///
/// `transform` is applied to a freshly loaded copy of the document. If it changed the
/// list, the result is saved with compare-and-swap; on a conflict the whole cycle is
/// retried (up to `attempts` times) with `transform` re-applied to the newer document.
/// Nothing is written if the list is unchanged.
pub async fn modify_subscriptions<R, F>(
    store: &dyn SubscriptionStore,
    attempts: u32,
    mut transform: F,
) -> Result<R, StoreError>
where
    R: Send,
    F: FnMut(&mut SubscriptionList) -> R + Send,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Versioned { version, value: mut list } = store.get_all().await?;
        let original = list.clone();
        let result = transform(&mut list);
        if list == original {
            return Ok(result);
        }
        match store.save(&list, version).await {
            Ok(new_version) => {
                tracing::debug!(version = new_version, "Saved subscription document");
                return Ok(result);
            }
            Err(StoreError::Conflict { expected }) if attempt < attempts => {
                tracing::warn!(
                    expected,
                    attempt,
                    "Subscription document changed concurrently, retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
}
