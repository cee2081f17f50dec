//! The contract between the household mirror and the store that owns the data.
//!
//! Two implementations ship with the core: [`MemoryRemote`], an in-process
//! store with a live change feed, and [`UnconfiguredRemote`], the inert stand-in
//! used when no remote is configured. The CLI adds an HTTP client on top.

mod memory;
mod unconfigured;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::error::{Result, SyncError};

pub use memory::{MemoryRemote, WriteOp};
pub use unconfigured::UnconfiguredRemote;

/// A row as the remote store sees it: a JSON object keyed by column name.
pub type Row = Value;

/// Channel end a subscription pushes change events into.
pub type FeedSink = mpsc::UnboundedSender<ChangeEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    WeeklyPlan,
    ShoppingList,
    Recipes,
    RecipeIngredients,
    Categories,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Profiles,
        Table::WeeklyPlan,
        Table::ShoppingList,
        Table::Recipes,
        Table::RecipeIngredients,
        Table::Categories,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::WeeklyPlan => "weekly_plan",
            Self::ShoppingList => "shopping_list",
            Self::Recipes => "recipes",
            Self::RecipeIngredients => "recipe_ingredients",
            Self::Categories => "categories",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Table::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SyncError::validation(format!("Unknown table '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Equality filters, an optional single-column ordering, and an optional
/// embedded child table (only `recipe_ingredients` under `recipes`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order: Option<Order>,
    pub embed: Option<Table>,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    #[must_use]
    pub fn embed(mut self, table: Table) -> Self {
        self.embed = Some(table);
        self
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.filters
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed change to one table, as delivered by the change feed.
///
/// `new_row` is present for inserts and updates, `old_row` for deletes; the
/// old row is only guaranteed to carry the `id` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_row: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_row: Option<Row>,
}

impl ChangeEvent {
    #[must_use]
    pub fn insert(table: Table, row: Row) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new_row: Some(row),
            old_row: None,
        }
    }

    #[must_use]
    pub fn update(table: Table, row: Row) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new_row: Some(row),
            old_row: None,
        }
    }

    #[must_use]
    pub fn delete(table: Table, id: i64) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new_row: None,
            old_row: Some(serde_json::json!({ "id": id })),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: String,
}

/// Live registration on a table's change feed. Dropping it unsubscribes.
pub struct Subscription {
    table: Table,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(table: Table, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            table,
            cancel: Some(Box::new(cancel)),
        }
    }

    #[must_use]
    pub fn table(&self) -> Table {
        self.table
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The remote collaborator. It owns every row; ids are assigned on insert.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>>;

    /// Insert a row and return it as stored (with its assigned `id`).
    async fn insert(&self, table: Table, row: Row) -> Result<Row>;

    async fn update(&self, table: Table, id: i64, patch: Row) -> Result<()>;

    async fn delete(&self, table: Table, id: i64) -> Result<()>;

    async fn get_session(&self) -> Result<Option<Session>>;

    /// Receiver that observes every session change (sign-in, sign-out).
    fn on_session_change(&self) -> watch::Receiver<Option<Session>>;

    async fn subscribe_changes(&self, table: Table, sink: FeedSink) -> Result<Subscription>;
}

/// Read the `id` column of a row.
#[must_use]
pub fn row_id(row: &Row) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}

/// Decode a row returned by the remote into a typed entity.
pub fn decode_row<T: DeserializeOwned>(table: Table, row: Row) -> Result<T> {
    serde_json::from_value(row)
        .map_err(|e| SyncError::remote(table, format!("unexpected row shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn table_names_round_trip_through_from_str() {
        for table in Table::ALL {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
        assert!("pantry".parse::<Table>().is_err());
    }

    #[test]
    fn query_matches_all_filters() {
        let q = Query::new().eq("day_of_week", "Monday").eq("profile_id", 1);
        assert!(q.matches(&json!({"day_of_week": "Monday", "profile_id": 1, "id": 4})));
        assert!(!q.matches(&json!({"day_of_week": "Monday", "profile_id": 2})));
        assert!(Query::new().matches(&json!({})));
    }

    #[test]
    fn change_event_wire_shape() {
        let event = ChangeEvent::delete(Table::ShoppingList, 7);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "DELETE");
        assert_eq!(value["table"], "shopping_list");
        assert_eq!(value["old_row"]["id"], 7);
        assert!(value.get("new_row").is_none());
    }

    #[test]
    fn dropping_subscription_runs_cancel_once() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let sub = Subscription::new(Table::Profiles, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });
        sub.unsubscribe();
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn decode_row_reports_table() {
        let err = decode_row::<i64>(Table::Recipes, json!({"id": 1})).unwrap_err();
        assert!(matches!(err, SyncError::Remote { table: Table::Recipes, .. }));
    }
}
