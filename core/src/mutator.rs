//! Optimistic writes: snapshot, apply locally, call the remote, restore on
//! failure.
//!
//! A mutator is bound to the session epoch current when it was created. If the
//! session ends while a remote call is in flight, the outcome is still returned
//! to the caller but nothing is written back into the mirror.

use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::mirror::SharedMirror;
use crate::models::Entity;
use crate::remote::{RemoteStore, Row, decode_row};
use crate::store::Snapshot;

pub struct Mutator<'a> {
    remote: &'a dyn RemoteStore,
    mirror: &'a SharedMirror,
    epoch: u64,
}

impl<'a> Mutator<'a> {
    #[must_use]
    pub fn new(remote: &'a dyn RemoteStore, mirror: &'a SharedMirror) -> Self {
        Self {
            remote,
            mirror,
            epoch: mirror.epoch(),
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn mirror(&self) -> &'a SharedMirror {
        self.mirror
    }

    /// Change entry `id` locally with `apply`, then send `patch` to the remote.
    ///
    /// Returns the entry as optimistically applied.
    pub async fn update<T: Entity>(
        &self,
        id: i64,
        patch: Row,
        apply: impl FnOnce(&mut T),
    ) -> Result<T> {
        let (snapshot, updated) = self
            .mirror
            .write_in(self.epoch, |m| {
                let store = T::store_mut(m);
                let snapshot = store.snapshot(id);
                snapshot.item()?;
                let item = store.get_mut(id)?;
                apply(item);
                Some((snapshot, item.clone()))
            })
            .ok_or(SyncError::SessionEnded)?
            .ok_or(SyncError::NotFound {
                table: T::TABLE,
                id,
            })?;

        match self.remote.update(T::TABLE, id, patch).await {
            Ok(()) => Ok(updated),
            Err(e) => {
                self.rollback(snapshot, &e);
                Err(e)
            }
        }
    }

    /// Remove entry `id` locally, then delete it remotely.
    ///
    /// An id the mirror does not hold is reported as `NotFound` without
    /// contacting the remote.
    pub async fn remove<T: Entity>(&self, id: i64) -> Result<T> {
        let snapshot = self
            .mirror
            .write_in(self.epoch, |m| {
                let store = T::store_mut(m);
                let snapshot = store.snapshot(id);
                store.remove(id)?;
                Some(snapshot)
            })
            .ok_or(SyncError::SessionEnded)?
            .ok_or(SyncError::NotFound {
                table: T::TABLE,
                id,
            })?;
        let removed = snapshot.item().cloned();

        match self.remote.delete(T::TABLE, id).await {
            Ok(()) => removed.ok_or(SyncError::NotFound {
                table: T::TABLE,
                id,
            }),
            Err(e) => {
                self.rollback(snapshot, &e);
                Err(e)
            }
        }
    }

    /// Show `provisional` under a temporary negative id until the remote
    /// acknowledges the insert, then swap in the stored row.
    pub async fn insert<T, P>(&self, payload: &P, provisional: impl FnOnce(i64) -> T) -> Result<T>
    where
        T: Entity,
        P: Serialize + Sync,
    {
        let row = serde_json::to_value(payload)
            .map_err(|e| SyncError::validation(format!("cannot encode {}: {e}", T::TABLE)))?;
        let provisional_id = self
            .mirror
            .write_in(self.epoch, |m| {
                let id = m.next_provisional_id();
                T::store_mut(m).upsert(provisional(id));
                id
            })
            .ok_or(SyncError::SessionEnded)?;

        let stored = self
            .remote
            .insert(T::TABLE, row)
            .await
            .and_then(|row| decode_row::<T>(T::TABLE, row));
        match stored {
            Ok(item) => {
                let settled = item.clone();
                self.mirror
                    .write_in(self.epoch, |m| T::store_mut(m).settle(provisional_id, settled));
                Ok(item)
            }
            Err(e) => {
                self.rollback::<T>(Snapshot::Absent { id: provisional_id }, &e);
                Err(e)
            }
        }
    }

    /// Insert remotely first and mirror the row only once it is acknowledged.
    pub async fn insert_confirmed<T, P>(&self, payload: &P) -> Result<T>
    where
        T: Entity,
        P: Serialize + Sync,
    {
        let row = serde_json::to_value(payload)
            .map_err(|e| SyncError::validation(format!("cannot encode {}: {e}", T::TABLE)))?;
        let row = self.remote.insert(T::TABLE, row).await?;
        let item = decode_row::<T>(T::TABLE, row)?;
        let mirrored = item.clone();
        self.mirror
            .write_in(self.epoch, |m| T::store_mut(m).upsert(mirrored));
        Ok(item)
    }

    fn rollback<T: Entity>(&self, snapshot: Snapshot<T>, cause: &SyncError) {
        let restored = self.mirror.write_in(self.epoch, |m| {
            let store = T::store_mut(m);
            match snapshot {
                // The row is gone remotely; showing it again would be a lie.
                Snapshot::Present { item, .. } if cause.is_not_found() => {
                    store.remove(item.id());
                }
                snapshot => store.restore(snapshot),
            }
        });
        if restored.is_some() {
            tracing::info!(table = %T::TABLE, error = %cause, "optimistic change rolled back");
        }
    }
}
