//! Meal-plan upserts keyed by `(day, meal type, profile)` instead of by id.
//!
//! The remote does not enforce that key, so two clients racing on an empty slot
//! can each insert a row. Every client treats the row with the lowest id as the
//! canonical one; after a plan write the surviving dish is moved onto it and the
//! other rows are deleted. Both racers converge on the same row.

use std::collections::HashSet;

use serde_json::json;

use crate::error::Result;
use crate::models::{MealSlot, NewMealSlot, validate_day, validate_meal_type};
use crate::mutator::Mutator;
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MealKey {
    pub day_of_week: String,
    pub meal_type: String,
    pub profile_id: i64,
}

impl MealKey {
    /// Build a key from user input, normalising day and meal type.
    pub fn new(day: &str, meal_type: &str, profile_id: i64) -> Result<Self> {
        Ok(Self {
            day_of_week: validate_day(day)?,
            meal_type: validate_meal_type(meal_type)?,
            profile_id,
        })
    }

    #[must_use]
    pub fn of(slot: &MealSlot) -> Self {
        Self {
            day_of_week: slot.day_of_week.clone(),
            meal_type: slot.meal_type.clone(),
            profile_id: slot.profile_id,
        }
    }

    #[must_use]
    pub fn matches(&self, slot: &MealSlot) -> bool {
        slot.profile_id == self.profile_id
            && slot.day_of_week == self.day_of_week
            && slot.meal_type == self.meal_type
    }
}

pub struct LogicalKeyResolver;

impl LogicalKeyResolver {
    #[must_use]
    pub fn canonical<'a>(meals: &'a EntityStore<MealSlot>, key: &MealKey) -> Option<&'a MealSlot> {
        meals
            .iter()
            .filter(|slot| key.matches(slot))
            .min_by_key(|slot| slot.id)
    }

    /// Ids of every row for `key` other than the canonical one.
    #[must_use]
    pub fn duplicates(meals: &EntityStore<MealSlot>, key: &MealKey) -> Vec<i64> {
        let Some(canonical) = Self::canonical(meals, key) else {
            return Vec::new();
        };
        meals
            .iter()
            .filter(|slot| key.matches(slot) && slot.id != canonical.id)
            .map(|slot| slot.id)
            .collect()
    }

    /// One slot per logical key, in storage order of the canonical rows.
    #[must_use]
    pub fn collapse(meals: &EntityStore<MealSlot>) -> Vec<MealSlot> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for slot in meals {
            let key = MealKey::of(slot);
            if seen.contains(&key) {
                continue;
            }
            if let Some(canonical) = Self::canonical(meals, &key) {
                out.push(canonical.clone());
            }
            seen.insert(key);
        }
        out
    }
}

/// Set the dish for `key`: update the existing slot, or insert one.
pub async fn plan_meal(mutator: &Mutator<'_>, key: &MealKey, dish: &str) -> Result<MealSlot> {
    let dish = dish.trim().to_string();
    let existing = mutator
        .mirror()
        .read(|m| LogicalKeyResolver::canonical(&m.meals, key).map(|slot| slot.id));

    let written = match existing {
        Some(id) => {
            let value = dish.clone();
            mutator
                .update::<MealSlot>(id, json!({ "dish_name": dish }), move |slot| {
                    slot.dish_name = value;
                })
                .await?
        }
        None => {
            let payload = NewMealSlot {
                day_of_week: key.day_of_week.clone(),
                meal_type: key.meal_type.clone(),
                dish_name: dish.clone(),
                profile_id: key.profile_id,
            };
            mutator.insert_confirmed::<MealSlot, _>(&payload).await?
        }
    };

    Ok(reconcile(mutator, key, written).await)
}

/// Fold duplicates of `key` into the canonical row. Best effort: failures are
/// logged and the slot just written is returned.
async fn reconcile(mutator: &Mutator<'_>, key: &MealKey, written: MealSlot) -> MealSlot {
    let mirror = mutator.mirror();
    let Some(canonical) = mirror.read(|m| LogicalKeyResolver::canonical(&m.meals, key).cloned())
    else {
        return written;
    };

    let canonical = if canonical.id != written.id && canonical.dish_name != written.dish_name {
        let value = written.dish_name.clone();
        match mutator
            .update::<MealSlot>(
                canonical.id,
                json!({ "dish_name": written.dish_name }),
                move |slot| slot.dish_name = value,
            )
            .await
        {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(id = canonical.id, error = %e, "could not merge duplicate meal slot");
                return written;
            }
        }
    } else {
        canonical
    };

    let duplicates = mirror.read(|m| LogicalKeyResolver::duplicates(&m.meals, key));
    for id in duplicates {
        match mutator.remove::<MealSlot>(id).await {
            Ok(_) => tracing::info!(id, canonical = canonical.id, "duplicate meal slot removed"),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(id, error = %e, "could not remove duplicate meal slot"),
        }
    }
    canonical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::mirror::SharedMirror;
    use crate::remote::{MemoryRemote, Table, WriteOp};

    fn slot(id: i64, day: &str, meal: &str, profile_id: i64, dish: &str) -> MealSlot {
        MealSlot {
            id,
            day_of_week: day.to_string(),
            meal_type: meal.to_string(),
            profile_id,
            dish_name: dish.to_string(),
        }
    }

    fn monday_lunch() -> MealKey {
        MealKey::new("monday", "LUNCH", 1).unwrap()
    }

    /// Seed a row remotely and mirror it, as bulk load would.
    fn mirror_row(remote: &MemoryRemote, mirror: &SharedMirror, dish: &str) -> MealSlot {
        let row = remote
            .seed(
                Table::WeeklyPlan,
                json!({"day_of_week": "Monday", "meal_type": "Lunch", "profile_id": 1, "dish_name": dish}),
            )
            .unwrap();
        let slot: MealSlot = serde_json::from_value(row).unwrap();
        mirror.write(|m| m.meals.upsert(slot.clone()));
        slot
    }

    #[test]
    fn meal_key_validates_input() {
        let key = monday_lunch();
        assert_eq!(key.day_of_week, "Monday");
        assert_eq!(key.meal_type, "Lunch");
        assert!(matches!(
            MealKey::new("Someday", "Lunch", 1),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn canonical_is_lowest_id_and_collapse_keeps_one_per_key() {
        let mut meals = EntityStore::new();
        meals.replace_all(vec![
            slot(7, "Monday", "Lunch", 1, "Later"),
            slot(3, "Monday", "Dinner", 1, "Soup"),
            slot(4, "Monday", "Lunch", 1, "Earlier"),
            slot(5, "Monday", "Lunch", 2, "Other profile"),
        ]);
        let key = monday_lunch();
        assert_eq!(LogicalKeyResolver::canonical(&meals, &key).unwrap().id, 4);
        assert_eq!(LogicalKeyResolver::duplicates(&meals, &key), vec![7]);

        let ids: Vec<i64> = LogicalKeyResolver::collapse(&meals)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![4, 3, 5]);
    }

    #[tokio::test]
    async fn plan_then_replan_keeps_one_slot() {
        let remote = MemoryRemote::new();
        let mirror = SharedMirror::new();
        let mutator = Mutator::new(&remote, &mirror);
        let key = monday_lunch();

        let first = plan_meal(&mutator, &key, "Pasta").await.unwrap();
        assert_eq!(mirror.read(|m| m.meals.len()), 1);
        assert_eq!(first.dish_name, "Pasta");

        let second = plan_meal(&mutator, &key, "Rice").await.unwrap();
        assert_eq!(second.id, first.id);
        let meals = mirror.read(|m| m.meals.items().to_vec());
        assert_eq!(meals.len(), 1);
        assert_eq!(meals[0].dish_name, "Rice");
        assert_eq!(remote.rows(Table::WeeklyPlan).len(), 1);
    }

    #[tokio::test]
    async fn repeated_plans_leave_last_dish() {
        let remote = MemoryRemote::new();
        let mirror = SharedMirror::new();
        let mutator = Mutator::new(&remote, &mirror);
        let key = monday_lunch();
        for dish in ["Pasta", "Rice", "Tacos", "Salad"] {
            plan_meal(&mutator, &key, dish).await.unwrap();
        }
        let matching: Vec<MealSlot> = mirror.read(|m| {
            m.meals.iter().filter(|s| key.matches(s)).cloned().collect()
        });
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].dish_name, "Salad");
    }

    #[tokio::test]
    async fn failed_replan_restores_previous_dish() {
        let remote = MemoryRemote::new();
        let mirror = SharedMirror::new();
        let mutator = Mutator::new(&remote, &mirror);
        let key = monday_lunch();
        plan_meal(&mutator, &key, "Pasta").await.unwrap();

        remote.fail_next(Table::WeeklyPlan, WriteOp::Update);
        assert!(plan_meal(&mutator, &key, "Rice").await.is_err());
        assert_eq!(mirror.read(|m| m.meals.items()[0].dish_name.clone()), "Pasta");
    }

    #[tokio::test]
    async fn racing_duplicates_fold_into_lowest_id() {
        let remote = MemoryRemote::new();
        let mirror = SharedMirror::new();
        let kept = mirror_row(&remote, &mirror, "Pasta");
        let dup = mirror_row(&remote, &mirror, "Pizza");

        let mutator = Mutator::new(&remote, &mirror);
        let slot = plan_meal(&mutator, &monday_lunch(), "Rice").await.unwrap();

        assert_eq!(slot.id, kept.id);
        assert_eq!(slot.dish_name, "Rice");
        assert!(!mirror.read(|m| m.meals.contains(dup.id)));
        let remote_rows = remote.rows(Table::WeeklyPlan);
        assert_eq!(remote_rows.len(), 1);
        assert_eq!(remote_rows[0]["dish_name"], "Rice");
    }

    #[tokio::test]
    async fn failed_duplicate_cleanup_is_not_an_error() {
        let remote = MemoryRemote::new();
        let mirror = SharedMirror::new();
        mirror_row(&remote, &mirror, "Pasta");
        mirror_row(&remote, &mirror, "Pizza");
        remote.fail_next(Table::WeeklyPlan, WriteOp::Delete);

        let mutator = Mutator::new(&remote, &mirror);
        let slot = plan_meal(&mutator, &monday_lunch(), "Rice").await.unwrap();
        assert_eq!(slot.dish_name, "Rice");
        // The duplicate survives until the next plan write, but the view hides it.
        assert_eq!(mirror.read(|m| m.meals.len()), 2);
        assert_eq!(mirror.read(|m| LogicalKeyResolver::collapse(&m.meals).len()), 1);
    }
}
