use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{Category, Ingredient, MealSlot, Profile, Recipe, ShoppingItem};
use crate::remote::Session;
use crate::store::EntityStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Unauthenticated,
    Loading,
    Ready,
}

/// Everything the household mirrors for one session.
///
/// `epoch` increases on every session start and end; work that began under an
/// older epoch must not write back.
#[derive(Debug, Default)]
pub struct Mirror {
    pub profiles: EntityStore<Profile>,
    pub meals: EntityStore<MealSlot>,
    pub shopping: EntityStore<ShoppingItem>,
    pub recipes: EntityStore<Recipe>,
    pub categories: EntityStore<Category>,
    pub(crate) phase: Phase,
    pub(crate) session: Option<Session>,
    pub(crate) epoch: u64,
    pub(crate) current_profile: Option<i64>,
    pub(crate) preferred_profile: Option<String>,
    /// Ingredient rows that arrived before their recipe, keyed by recipe id.
    pending_ingredients: HashMap<i64, Vec<Ingredient>>,
    next_provisional: i64,
}

impl Mirror {
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn current_profile(&self) -> Option<&Profile> {
        self.current_profile.and_then(|id| self.profiles.get(id))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
            && self.meals.is_empty()
            && self.shopping.is_empty()
            && self.recipes.is_empty()
            && self.categories.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.profiles.clear();
        self.meals.clear();
        self.shopping.clear();
        self.recipes.clear();
        self.categories.clear();
        self.pending_ingredients.clear();
        self.current_profile = None;
    }

    /// Put `ingredient` on its recipe, or hold it until the recipe shows up.
    pub(crate) fn place_ingredient(&mut self, ingredient: Ingredient) {
        match self.recipes.get_mut(ingredient.recipe_id) {
            Some(recipe) => upsert_ingredient(&mut recipe.ingredients, ingredient),
            None => {
                tracing::debug!(
                    recipe_id = ingredient.recipe_id,
                    "ingredient held until its recipe arrives"
                );
                let pending = self
                    .pending_ingredients
                    .entry(ingredient.recipe_id)
                    .or_default();
                upsert_ingredient(pending, ingredient);
            }
        }
    }

    pub(crate) fn remove_ingredient(&mut self, id: i64) {
        for recipe in &mut self.recipes {
            recipe.ingredients.retain(|i| i.id != id);
        }
        self.pending_ingredients.retain(|_, held| {
            held.retain(|i| i.id != id);
            !held.is_empty()
        });
    }

    /// Move ingredients held for `recipe_id` onto the now mirrored recipe.
    pub(crate) fn adopt_pending_ingredients(&mut self, recipe_id: i64) {
        let Some(recipe) = self.recipes.get_mut(recipe_id) else {
            return;
        };
        for ingredient in self.pending_ingredients.remove(&recipe_id).unwrap_or_default() {
            upsert_ingredient(&mut recipe.ingredients, ingredient);
        }
    }

    pub(crate) fn forget_pending_ingredients(&mut self, recipe_id: i64) {
        self.pending_ingredients.remove(&recipe_id);
    }

    #[must_use]
    pub fn pending_ingredient_count(&self) -> usize {
        self.pending_ingredients.values().map(Vec::len).sum()
    }

    /// Temporary ids for optimistic inserts are negative and never reused.
    pub(crate) fn next_provisional_id(&mut self) -> i64 {
        self.next_provisional -= 1;
        self.next_provisional
    }

    /// Keep the current profile if it still exists, otherwise prefer the
    /// configured name and fall back to the first profile.
    pub(crate) fn reselect_profile(&mut self) {
        if self
            .current_profile
            .is_some_and(|id| self.profiles.get(id).is_some_and(|p| p.id > 0))
        {
            return;
        }
        let preferred = self.preferred_profile.as_deref().and_then(|name| {
            self.profiles
                .iter()
                .find(|p| p.id > 0 && p.name.eq_ignore_ascii_case(name))
        });
        self.current_profile = preferred
            .or_else(|| self.profiles.iter().find(|p| p.id > 0))
            .map(|p| p.id);
    }
}

fn upsert_ingredient(ingredients: &mut Vec<Ingredient>, ingredient: Ingredient) {
    match ingredients.iter_mut().find(|i| i.id == ingredient.id) {
        Some(slot) => *slot = ingredient,
        None => ingredients.push(ingredient),
    }
}

/// Handle to the session's mirror, shared by the gate, the feed listener and
/// every mutation. The lock is never held across an await point.
#[derive(Clone)]
pub struct SharedMirror {
    state: Arc<Mutex<Mirror>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for SharedMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMirror {
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(Mirror::default())),
            revision: Arc::new(revision),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&Mirror) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Mutate the mirror and notify watchers.
    pub fn write<R>(&self, f: impl FnOnce(&mut Mirror) -> R) -> R {
        let result = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut state)
        };
        self.revision.send_modify(|r| *r += 1);
        result
    }

    /// Mutate the mirror only while it still belongs to `epoch`.
    pub fn write_in<R>(&self, epoch: u64, f: impl FnOnce(&mut Mirror) -> R) -> Option<R> {
        let result = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.epoch != epoch {
                return None;
            }
            f(&mut state)
        };
        self.revision.send_modify(|r| *r += 1);
        Some(result)
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.read(Mirror::epoch)
    }

    /// Receiver that changes whenever the mirror does.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
