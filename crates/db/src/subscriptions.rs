use anyhow::Context;
use async_trait::async_trait;
use ci_relay_core::{
    models::SubscriptionList,
    store::{StoreError, SubscriptionStore, Versioned},
};
use sqlx::{Row, SqlitePool};

/// Subscription document stored as one JSON row per installation, guarded by a version
/// counter for compare-and-swap writes.
#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    pool: SqlitePool,
    installation_id: String,
}

impl SqliteSubscriptionStore {
    pub fn new(pool: SqlitePool, installation_id: impl Into<String>) -> Self {
        Self { pool, installation_id: installation_id.into() }
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn get_all(&self) -> Result<Versioned<SubscriptionList>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT version, data
            FROM subscription_documents
            WHERE installation_id = ?
            "#,
        )
        .bind(&self.installation_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load subscriptions")?;
        let Some(row) = row else {
            return Ok(Versioned::default());
        };
        let version: i64 = row.try_get("version").context("Failed to read document version")?;
        let data: String = row.try_get("data").context("Failed to read document data")?;
        Ok(Versioned { version: version as u64, value: serde_json::from_str(&data)? })
    }

    async fn save(
        &self,
        list: &SubscriptionList,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let data = serde_json::to_string(list)?;
        let result = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO subscription_documents (installation_id, version, data, updated_at)
                VALUES (?, 1, ?, CURRENT_TIMESTAMP)
                ON CONFLICT (installation_id) DO NOTHING
                "#,
            )
            .bind(&self.installation_id)
            .bind(&data)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE subscription_documents
                SET version = version + 1, data = ?, updated_at = CURRENT_TIMESTAMP
                WHERE installation_id = ? AND version = ?
                "#,
            )
            .bind(&data)
            .bind(&self.installation_id)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
        };
        let result = result.context("Failed to store subscriptions")?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict { expected: expected_version });
        }
        Ok(expected_version + 1)
    }
}

#[cfg(test)]
mod tests {
    use ci_relay_core::{
        models::{ProjectIdentifier, Subscription, SubscriptionFlags, VcsKind},
        store::modify_subscriptions,
    };

    use super::*;
    use crate::Database;

    fn subscription(channel: &str) -> Subscription {
        Subscription {
            channel_id: channel.to_string(),
            creator_id: "user".to_string(),
            flags: SubscriptionFlags::default(),
            project: ProjectIdentifier::new(VcsKind::GitHub, "acme", "widgets"),
        }
    }

    #[tokio::test]
    async fn test_missing_document_is_empty() {
        let db = Database::new_in_memory().await.unwrap();
        let store = db.subscriptions("default");
        let loaded = store.get_all().await.unwrap();
        assert_eq!(loaded.version, 0);
        assert!(loaded.value.is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let db = Database::new_in_memory().await.unwrap();
        let store = db.subscriptions("default");

        let mut list = SubscriptionList::default();
        list.add_or_update(subscription("C1"));
        assert_eq!(store.save(&list, 0).await.unwrap(), 1);

        // A second writer that loaded the empty document loses
        let mut stale = SubscriptionList::default();
        stale.add_or_update(subscription("C2"));
        assert!(matches!(store.save(&stale, 0).await, Err(StoreError::Conflict { expected: 0 })));

        list.add_or_update(subscription("C3"));
        assert_eq!(store.save(&list, 1).await.unwrap(), 2);
        assert!(matches!(store.save(&stale, 1).await, Err(StoreError::Conflict { expected: 1 })));

        let loaded = store.get_all().await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.value, list);
    }

    #[tokio::test]
    async fn test_installations_are_separate() {
        let db = Database::new_in_memory().await.unwrap();
        let first = db.subscriptions("first");
        let second = db.subscriptions("second");
        modify_subscriptions(&first, 3, |list| list.add_or_update(subscription("C1")))
            .await
            .unwrap();
        assert_eq!(first.get_all().await.unwrap().value.len(), 1);
        assert!(second.get_all().await.unwrap().value.is_empty());
    }
}
