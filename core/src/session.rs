//! Binding the mirror's lifetime to the authenticated session.
//!
//! `begin` moves the gate `Unauthenticated -> Loading -> Ready`: it subscribes
//! every table's change feed (events queue in the channel), bulk loads each
//! collection, then starts the feed loop over the queued and future events.
//! `end` tears the subscriptions down before clearing the stores.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::feed::ChangeFeedListener;
use crate::mirror::{Phase, SharedMirror};
use crate::models::{Category, Entity, MealSlot, Profile, Recipe, ShoppingItem};
use crate::remote::{Query, RemoteStore, Session, Subscription, Table, decode_row};

struct LiveSession {
    subscriptions: Vec<Subscription>,
    feed: JoinHandle<()>,
}

impl LiveSession {
    fn shutdown(self) {
        for subscription in self.subscriptions {
            subscription.unsubscribe();
        }
        self.feed.abort();
    }
}

pub struct SessionGate {
    remote: Arc<dyn RemoteStore>,
    mirror: SharedMirror,
    live: Mutex<Option<LiveSession>>,
}

impl SessionGate {
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, mirror: SharedMirror) -> Self {
        Self {
            remote,
            mirror,
            live: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.mirror.read(|m| m.phase())
    }

    /// Ask the remote for its current session and follow it.
    pub async fn refresh(&self) -> Result<Phase> {
        match self.remote.get_session().await? {
            Some(session) => self.begin(session).await,
            None => self.end(),
        }
        Ok(self.phase())
    }

    /// Load the mirror for `session`.
    ///
    /// A call while a load is already running is ignored. A new session for a
    /// different user replaces the current one.
    pub async fn begin(&self, session: Session) {
        enum Entry {
            Start(u64),
            Busy,
            Same,
            Replace,
        }
        let epoch = loop {
            let entry = self.mirror.write(|m| {
                let same_user = m
                    .session
                    .as_ref()
                    .is_some_and(|current| current.user_id == session.user_id);
                match m.phase {
                    Phase::Loading => Entry::Busy,
                    Phase::Ready if same_user => {
                        m.session = Some(session.clone());
                        Entry::Same
                    }
                    Phase::Ready => Entry::Replace,
                    Phase::Unauthenticated => {
                        m.epoch += 1;
                        m.clear();
                        m.phase = Phase::Loading;
                        m.session = Some(session.clone());
                        Entry::Start(m.epoch)
                    }
                }
            });
            match entry {
                Entry::Start(epoch) => break epoch,
                Entry::Busy => {
                    tracing::debug!("session load already in progress");
                    return;
                }
                Entry::Same => return,
                Entry::Replace => self.end(),
            }
        };
        tracing::info!(user = %session.user_id, "session started, loading");

        let (sink, events) = mpsc::unbounded_channel();
        let mut subscriptions = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            match self.remote.subscribe_changes(table, sink.clone()).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => tracing::warn!(%table, error = %e, "change feed unavailable"),
            }
        }
        drop(sink);

        self.bulk_load(epoch).await;

        let feed = tokio::spawn(ChangeFeedListener::new(self.mirror.clone(), epoch).run(events));
        let live = LiveSession {
            subscriptions,
            feed,
        };
        let ready = self.mirror.write_in(epoch, |m| {
            m.phase = Phase::Ready;
            m.reselect_profile();
        });
        if ready.is_none() {
            tracing::debug!("session ended during load");
            live.shutdown();
            return;
        }
        if let Some(previous) = self.lock_live().replace(live) {
            previous.shutdown();
        }
        tracing::info!(
            profiles = self.mirror.read(|m| m.profiles.len()),
            "session ready"
        );
    }

    /// Drop the session: unsubscribe, stop the feed loop, clear every store.
    pub fn end(&self) {
        let live = self.lock_live().take();
        let had_feed = live.is_some();
        if let Some(live) = live {
            live.shutdown();
        }
        let was = self.mirror.write(|m| {
            let was = m.phase;
            m.epoch += 1;
            m.clear();
            m.phase = Phase::Unauthenticated;
            m.session = None;
            was
        });
        if had_feed || was != Phase::Unauthenticated {
            tracing::info!("session ended, mirror cleared");
        }
    }

    /// Follow session notifications until the remote drops its sender.
    pub async fn follow(&self, mut sessions: watch::Receiver<Option<Session>>) {
        let initial = sessions.borrow_and_update().clone();
        match initial {
            Some(session) => self.begin(session).await,
            None => {
                if let Err(e) = self.refresh().await {
                    tracing::error!(error = %e, "session check failed");
                }
            }
        }
        while sessions.changed().await.is_ok() {
            let current = sessions.borrow_and_update().clone();
            match current {
                Some(session) => self.begin(session).await,
                None => self.end(),
            }
        }
    }

    async fn bulk_load(&self, epoch: u64) {
        let (profiles, meals, shopping, recipes, categories) = tokio::join!(
            self.load::<Profile>(Query::new().order_by("name", true)),
            self.load::<MealSlot>(Query::new()),
            self.load::<ShoppingItem>(Query::new().order_by("created_at", true)),
            self.load::<Recipe>(
                Query::new()
                    .order_by("created_at", false)
                    .embed(Table::RecipeIngredients)
            ),
            self.load::<Category>(Query::new().order_by("name", true)),
        );
        self.mirror.write_in(epoch, |m| {
            m.profiles.replace_all(profiles);
            m.meals.replace_all(meals);
            m.shopping.replace_all(shopping);
            m.recipes.replace_all(recipes);
            m.categories.replace_all(categories);
        });
    }

    async fn load<T: Entity>(&self, query: Query) -> Vec<T> {
        let loaded = self
            .remote
            .select(T::TABLE, &query)
            .await
            .and_then(|rows| {
                rows.into_iter()
                    .map(|row| decode_row(T::TABLE, row))
                    .collect::<Result<Vec<T>>>()
            });
        match loaded {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(table = %T::TABLE, error = %e, "bulk load failed, collection left empty");
                Vec::new()
            }
        }
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, Option<LiveSession>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionGate {
    fn drop(&mut self) {
        if let Some(live) = self.lock_live().take() {
            live.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, UnconfiguredRemote, WriteOp};
    use crate::mirror::Mirror;
    use crate::test_support::{settle, wait_until};
    use serde_json::json;

    fn seed(remote: &MemoryRemote) {
        for name in ["Mom", "Dad"] {
            remote
                .seed(Table::Profiles, json!({"name": name, "color_theme": "blue"}))
                .unwrap();
        }
        remote
            .seed(Table::ShoppingList, json!({"item_name": "Milk", "is_checked": false}))
            .unwrap();
        let soup = remote.seed(Table::Recipes, json!({"name": "Soup"})).unwrap();
        remote
            .seed(
                Table::RecipeIngredients,
                json!({"recipe_id": soup["id"], "ingredient_name": "Leek", "quantity": "2"}),
            )
            .unwrap();
        remote
            .seed(Table::Categories, json!({"name": "Cena", "icon": "moon"}))
            .unwrap();
    }

    fn gate(remote: &MemoryRemote) -> (SessionGate, SharedMirror) {
        let mirror = SharedMirror::new();
        (
            SessionGate::new(Arc::new(remote.clone()), mirror.clone()),
            mirror,
        )
    }

    #[tokio::test]
    async fn begin_loads_everything_in_order() {
        let remote = MemoryRemote::new();
        seed(&remote);
        let (gate, mirror) = gate(&remote);
        gate.begin(remote.sign_in("u1")).await;

        assert_eq!(gate.phase(), Phase::Ready);
        mirror.read(|m| {
            let names: Vec<&str> = m.profiles.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names, vec!["Dad", "Mom"]);
            assert_eq!(m.current_profile().unwrap().name, "Dad");
            assert_eq!(m.shopping.len(), 1);
            assert_eq!(m.recipes.items()[0].ingredients.len(), 1);
            assert_eq!(m.categories.len(), 1);
        });
    }

    #[tokio::test]
    async fn failed_collection_is_left_empty() {
        let remote = MemoryRemote::new();
        seed(&remote);
        remote.fail_next(Table::Recipes, WriteOp::Select);
        let (gate, mirror) = gate(&remote);
        gate.begin(remote.sign_in("u1")).await;

        assert_eq!(gate.phase(), Phase::Ready);
        assert!(mirror.read(|m| m.recipes.is_empty()));
        assert_eq!(mirror.read(|m| m.profiles.len()), 2);
    }

    #[tokio::test]
    async fn feed_events_reach_the_mirror() {
        let remote = MemoryRemote::new();
        let (gate, mirror) = gate(&remote);
        gate.begin(remote.sign_in("u1")).await;

        remote
            .seed(Table::ShoppingList, json!({"item_name": "Bread"}))
            .unwrap();
        wait_until(&mirror, |m| m.shopping.len() == 1).await;
    }

    #[tokio::test]
    async fn end_clears_and_ignores_later_events() {
        let remote = MemoryRemote::new();
        seed(&remote);
        let (gate, mirror) = gate(&remote);
        gate.begin(remote.sign_in("u1")).await;
        assert_eq!(remote.subscriber_count(Table::ShoppingList), 1);

        gate.end();
        assert_eq!(gate.phase(), Phase::Unauthenticated);
        assert!(mirror.read(|m| m.is_empty() && m.session().is_none()));
        assert_eq!(remote.subscriber_count(Table::ShoppingList), 0);

        remote
            .seed(Table::ShoppingList, json!({"item_name": "Late"}))
            .unwrap();
        settle().await;
        assert!(mirror.read(|m| m.shopping.is_empty()));
    }

    #[tokio::test]
    async fn begin_while_loading_is_ignored() {
        let remote = MemoryRemote::new();
        seed(&remote);
        let (gate, mirror) = gate(&remote);
        mirror.write(|m| m.phase = Phase::Loading);
        gate.begin(remote.sign_in("u1")).await;
        assert!(mirror.read(|m| m.profiles.is_empty()));
        assert_eq!(remote.subscriber_count(Table::Profiles), 0);
    }

    #[tokio::test]
    async fn same_user_session_does_not_reload() {
        let remote = MemoryRemote::new();
        let (gate, mirror) = gate(&remote);
        gate.begin(remote.sign_in("u1")).await;
        let epoch = mirror.epoch();
        gate.begin(remote.sign_in("u1")).await;
        assert_eq!(mirror.epoch(), epoch);

        gate.begin(remote.sign_in("u2")).await;
        assert!(mirror.epoch() > epoch);
        assert_eq!(mirror.read(|m| m.session().unwrap().user_id.clone()), "u2");
        assert_eq!(remote.subscriber_count(Table::Recipes), 1);
    }

    #[tokio::test]
    async fn follow_tracks_sign_in_and_out() {
        let remote = MemoryRemote::new();
        seed(&remote);
        let mirror = SharedMirror::new();
        let gate = Arc::new(SessionGate::new(Arc::new(remote.clone()), mirror.clone()));
        let follower = {
            let gate = Arc::clone(&gate);
            let sessions = remote.on_session_change();
            tokio::spawn(async move { gate.follow(sessions).await })
        };

        remote.sign_in("u1");
        wait_until(&mirror, |m| m.phase() == Phase::Ready).await;
        assert_eq!(mirror.read(|m| m.profiles.len()), 2);

        remote.sign_out();
        wait_until(&mirror, |m| m.phase() == Phase::Unauthenticated).await;
        assert!(mirror.read(Mirror::is_empty));
        follower.abort();
    }

    #[tokio::test]
    async fn unconfigured_remote_stays_signed_out() {
        let mirror = SharedMirror::new();
        let gate = SessionGate::new(
            Arc::new(UnconfiguredRemote::new("HEARTH_URL is not set")),
            mirror.clone(),
        );
        assert_eq!(gate.refresh().await.unwrap(), Phase::Unauthenticated);
        assert!(mirror.read(Mirror::is_empty));
    }
}
