use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use super::{
    ChangeEvent, ChangeKind, FeedSink, Query, RemoteStore, Row, Session, Subscription, Table,
    row_id,
};
use crate::error::{Result, SyncError};

/// Remote operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Select,
    Insert,
    Update,
    Delete,
}

struct Subscriber {
    id: u64,
    table: Table,
    sink: FeedSink,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, Vec<Row>>,
    next_id: i64,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    faults: Vec<(Table, WriteOp)>,
    offline: bool,
    duplicate_delivery: bool,
}

impl Inner {
    fn check(&mut self, table: Table, op: WriteOp) -> Result<()> {
        if self.offline {
            return Err(SyncError::Network("remote unreachable".to_string()));
        }
        if let Some(pos) = self.faults.iter().position(|f| *f == (table, op)) {
            self.faults.remove(pos);
            return Err(SyncError::remote(table, "injected failure"));
        }
        Ok(())
    }

    fn rows(&self, table: Table) -> &[Row] {
        self.tables.get(&table).map_or(&[], Vec::as_slice)
    }

    fn publish(&mut self, event: &ChangeEvent) {
        let copies = if self.duplicate_delivery { 2 } else { 1 };
        self.subscribers.retain(|sub| {
            if sub.table != event.table {
                return true;
            }
            (0..copies).all(|_| sub.sink.send(event.clone()).is_ok())
        });
    }

    fn insert(&mut self, table: Table, row: Row) -> Result<Row> {
        let Value::Object(mut fields) = row else {
            return Err(SyncError::remote(table, "row must be a JSON object"));
        };
        if table == Table::RecipeIngredients {
            let parent = fields.get("recipe_id").and_then(Value::as_i64);
            let exists = parent.is_some_and(|pid| {
                self.rows(Table::Recipes)
                    .iter()
                    .any(|r| row_id(r) == Some(pid))
            });
            if !exists {
                return Err(SyncError::remote(
                    table,
                    "recipe_id does not reference an existing recipe",
                ));
            }
        }

        self.next_id += 1;
        fields.insert("id".to_string(), Value::from(self.next_id));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::from(chrono::Utc::now().to_rfc3339()));
        let row = Value::Object(fields);

        self.tables.entry(table).or_default().push(row.clone());
        self.publish(&ChangeEvent::insert(table, row.clone()));
        tracing::debug!(%table, id = self.next_id, "row inserted");
        Ok(row)
    }

    fn update(&mut self, table: Table, id: i64, patch: Row) -> Result<()> {
        let Value::Object(patch) = patch else {
            return Err(SyncError::remote(table, "patch must be a JSON object"));
        };
        let row = self
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            .ok_or(SyncError::NotFound { table, id })?;
        if let Value::Object(fields) = row {
            for (key, value) in patch {
                if key != "id" {
                    fields.insert(key, value);
                }
            }
        }
        let updated = row.clone();
        self.publish(&ChangeEvent::update(table, updated));
        Ok(())
    }

    fn delete(&mut self, table: Table, id: i64) -> Result<()> {
        let rows = self.tables.entry(table).or_default();
        let pos = rows
            .iter()
            .position(|r| row_id(r) == Some(id))
            .ok_or(SyncError::NotFound { table, id })?;
        let removed = rows.remove(pos);

        if table == Table::Recipes {
            let children = self.tables.entry(Table::RecipeIngredients).or_default();
            let mut orphans = Vec::new();
            children.retain(|r| {
                let owned = r.get("recipe_id").and_then(Value::as_i64) == Some(id);
                if owned {
                    orphans.push(r.clone());
                }
                !owned
            });
            for orphan in orphans {
                self.publish(&ChangeEvent {
                    table: Table::RecipeIngredients,
                    kind: ChangeKind::Delete,
                    new_row: None,
                    old_row: Some(orphan),
                });
            }
        }

        self.publish(&ChangeEvent {
            table,
            kind: ChangeKind::Delete,
            new_row: None,
            old_row: Some(removed),
        });
        Ok(())
    }

    fn select(&self, table: Table, query: &Query) -> Vec<Row> {
        let mut rows: Vec<Row> = self
            .rows(table)
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        if table == Table::Recipes && query.embed == Some(Table::RecipeIngredients) {
            let ingredients = self.rows(Table::RecipeIngredients);
            for row in &mut rows {
                let id = row_id(row);
                let children: Vec<Row> = ingredients
                    .iter()
                    .filter(|i| i.get("recipe_id").and_then(Value::as_i64) == id)
                    .cloned()
                    .collect();
                if let Value::Object(fields) = row {
                    fields.insert("recipe_ingredients".to_string(), Value::Array(children));
                }
            }
        }
        rows
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        // Nulls and missing columns sort last.
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// In-process remote store with a live change feed.
///
/// Every clone shares the same tables, so two households built on clones of
/// one `MemoryRemote` behave like two clients of one backend. Change events are
/// published synchronously at commit time.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
    session: Arc<watch::Sender<Option<Session>>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            session: Arc::new(session),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session for `user_id` and notify session watchers.
    pub fn sign_in(&self, user_id: &str) -> Session {
        let session = Session {
            user_id: user_id.to_string(),
            email: None,
            access_token: Uuid::new_v4().to_string(),
        };
        self.session.send_replace(Some(session.clone()));
        session
    }

    pub fn sign_out(&self) {
        self.session.send_replace(None);
    }

    /// Insert a row directly, bypassing injected faults. Subscribers still see it.
    pub fn seed(&self, table: Table, row: Row) -> Result<Row> {
        self.lock().insert(table, row)
    }

    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.lock().rows(table).to_vec()
    }

    /// Make the next `op` on `table` fail with a remote error.
    pub fn fail_next(&self, table: Table, op: WriteOp) {
        self.lock().faults.push((table, op));
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Deliver every change event twice, as an at-least-once transport may.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.lock().duplicate_delivery = enabled;
    }

    #[must_use]
    pub fn subscriber_count(&self, table: Table) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.table == table && !s.sink.is_closed())
            .count()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>> {
        let mut inner = self.lock();
        inner.check(table, WriteOp::Select)?;
        Ok(inner.select(table, query))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        let mut inner = self.lock();
        inner.check(table, WriteOp::Insert)?;
        inner.insert(table, row)
    }

    async fn update(&self, table: Table, id: i64, patch: Row) -> Result<()> {
        let mut inner = self.lock();
        inner.check(table, WriteOp::Update)?;
        inner.update(table, id, patch)
    }

    async fn delete(&self, table: Table, id: i64) -> Result<()> {
        let mut inner = self.lock();
        inner.check(table, WriteOp::Delete)?;
        inner.delete(table, id)
    }

    async fn get_session(&self) -> Result<Option<Session>> {
        if self.lock().offline {
            return Err(SyncError::Network("remote unreachable".to_string()));
        }
        Ok(self.session.borrow().clone())
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn subscribe_changes(&self, table: Table, sink: FeedSink) -> Result<Subscription> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(SyncError::Network("remote unreachable".to_string()));
        }
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;
        inner.subscribers.push(Subscriber { id, table, sink });

        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(table, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .subscribers
                    .retain(|s| s.id != id);
            }
        }))
    }
}
