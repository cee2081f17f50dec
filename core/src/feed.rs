//! Folding the remote change feed into the mirror.
//!
//! Inserts and updates become upserts, deletes become removals. Both are
//! idempotent, so duplicated or replayed deliveries of the same event leave the
//! mirror unchanged. Conflicting concurrent edits to one id resolve as
//! last-applied-wins.

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::mirror::{Mirror, SharedMirror};
use crate::models::{Category, Entity, Ingredient, MealSlot, Profile, Recipe, ShoppingItem};
use crate::remote::{ChangeEvent, ChangeKind, Table, row_id};

enum Change<T> {
    Upsert(T),
    Remove(i64),
}

fn malformed(table: Table, reason: impl Into<String>) -> SyncError {
    SyncError::MalformedEvent {
        table,
        reason: reason.into(),
    }
}

fn decode<T: DeserializeOwned>(event: &ChangeEvent) -> Result<Change<T>> {
    match event.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let row = event
                .new_row
                .clone()
                .ok_or_else(|| malformed(event.table, "missing new_row"))?;
            serde_json::from_value(row)
                .map(Change::Upsert)
                .map_err(|e| malformed(event.table, e.to_string()))
        }
        ChangeKind::Delete => event
            .old_row
            .as_ref()
            .and_then(row_id)
            .map(Change::Remove)
            .ok_or_else(|| malformed(event.table, "missing old_row.id")),
    }
}

fn fold_entity<T: Entity>(mirror: &mut Mirror, change: Change<T>) {
    let store = T::store_mut(mirror);
    match change {
        Change::Upsert(row) => {
            let id = row.id();
            let merged = row.absorb(store.get(id));
            store.upsert(merged);
            if T::TABLE == Table::Recipes {
                mirror.adopt_pending_ingredients(id);
            }
        }
        Change::Remove(id) => {
            store.remove(id);
            if T::TABLE == Table::Recipes {
                mirror.forget_pending_ingredients(id);
            }
        }
    }
    if T::TABLE == Table::Profiles {
        mirror.reselect_profile();
    }
}

fn fold_ingredient(mirror: &mut Mirror, change: Change<Ingredient>) {
    match change {
        Change::Upsert(ingredient) => mirror.place_ingredient(ingredient),
        Change::Remove(id) => mirror.remove_ingredient(id),
    }
}

/// Applies change events to the mirror of one session.
///
/// A listener is bound to the epoch it was created for; once the session ends
/// its events are discarded.
#[derive(Clone)]
pub struct ChangeFeedListener {
    mirror: SharedMirror,
    epoch: u64,
}

impl ChangeFeedListener {
    #[must_use]
    pub fn new(mirror: SharedMirror, epoch: u64) -> Self {
        Self { mirror, epoch }
    }

    /// Apply one event. Returns `Ok(false)` when the session has since ended.
    pub fn apply(&self, event: &ChangeEvent) -> Result<bool> {
        let applied = match event.table {
            Table::Profiles => self.fold(decode::<Profile>(event)?),
            Table::WeeklyPlan => self.fold(decode::<MealSlot>(event)?),
            Table::ShoppingList => self.fold(decode::<ShoppingItem>(event)?),
            Table::Recipes => self.fold(decode::<Recipe>(event)?),
            Table::Categories => self.fold(decode::<Category>(event)?),
            Table::RecipeIngredients => {
                let change = decode::<Ingredient>(event)?;
                self.mirror
                    .write_in(self.epoch, |m| fold_ingredient(m, change))
                    .is_some()
            }
        };
        if !applied {
            tracing::debug!(table = %event.table, "change event from ended session dropped");
        }
        Ok(applied)
    }

    fn fold<T: Entity>(&self, change: Change<T>) -> bool {
        self.mirror
            .write_in(self.epoch, |m| fold_entity(m, change))
            .is_some()
    }

    /// Consume events until the channel closes. Malformed events are logged
    /// and dropped; they never stop the loop.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.apply(&event) {
                tracing::warn!(error = %e, "dropping change event");
            }
        }
        tracing::debug!(epoch = self.epoch, "change feed closed");
    }
}
