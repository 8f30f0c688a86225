//! In-memory store implementations.
//!
//! Same compare-and-swap semantics as the sqlite stores; all state is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use ci_relay_core::{
    models::SubscriptionList,
    store::{StoreError, SubscriptionStore, TokenStore, Versioned},
};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemorySubscriptionStore {
    document: RwLock<Versioned<SubscriptionList>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_subscriptions(list: SubscriptionList) -> Self {
        Self { document: RwLock::new(Versioned { version: 1, value: list }) }
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn get_all(&self) -> Result<Versioned<SubscriptionList>, StoreError> {
        Ok(self.document.read().await.clone())
    }

    async fn save(
        &self,
        list: &SubscriptionList,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut document = self.document.write().await;
        if document.version != expected_version {
            return Err(StoreError::Conflict { expected: expected_version });
        }
        document.version += 1;
        document.value = list.clone();
        Ok(document.version)
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn token_for_user(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.tokens.read().await.get(user_id).cloned())
    }

    async fn store_token(&self, user_id: &str, token: &str) -> Result<(), StoreError> {
        self.tokens.write().await.insert(user_id.to_string(), token.to_string());
        Ok(())
    }

    async fn delete_token(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.tokens.write().await.remove(user_id).is_some())
    }
}
