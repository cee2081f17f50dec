use async_trait::async_trait;
use tokio::sync::watch;

use super::{FeedSink, Query, RemoteStore, Row, Session, Subscription, Table};
use crate::error::{Result, SyncError};

/// Stand-in used when no remote store is configured.
///
/// Every data call fails with [`SyncError::Configuration`] and there is never a
/// session, so the household stays in its empty, read-only state instead of
/// crashing.
pub struct UnconfiguredRemote {
    reason: String,
    session: watch::Sender<Option<Session>>,
}

impl UnconfiguredRemote {
    pub fn new(reason: impl Into<String>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            reason: reason.into(),
            session,
        }
    }

    fn error(&self) -> SyncError {
        SyncError::Configuration(self.reason.clone())
    }
}

#[async_trait]
impl RemoteStore for UnconfiguredRemote {
    async fn select(&self, _table: Table, _query: &Query) -> Result<Vec<Row>> {
        Err(self.error())
    }

    async fn insert(&self, _table: Table, _row: Row) -> Result<Row> {
        Err(self.error())
    }

    async fn update(&self, _table: Table, _id: i64, _patch: Row) -> Result<()> {
        Err(self.error())
    }

    async fn delete(&self, _table: Table, _id: i64) -> Result<()> {
        Err(self.error())
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(None)
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn subscribe_changes(&self, _table: Table, _sink: FeedSink) -> Result<Subscription> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn every_call_reports_configuration_error() {
        let remote = UnconfiguredRemote::new("HEARTH_URL is not set");
        let err = remote
            .insert(Table::ShoppingList, json!({"item_name": "Milk"}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::Configuration("HEARTH_URL is not set".to_string())
        );
        assert!(remote.select(Table::Profiles, &Query::new()).await.is_err());
        assert!(remote.update(Table::Recipes, 1, json!({})).await.is_err());
        assert!(remote.delete(Table::Recipes, 1).await.is_err());
    }

    #[tokio::test]
    async fn session_is_always_empty() {
        let remote = UnconfiguredRemote::new("missing");
        assert_eq!(remote.get_session().await.unwrap(), None);
        assert!(remote.on_session_change().borrow().is_none());
    }
}
