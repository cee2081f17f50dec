use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::mirror::{Phase, SharedMirror};
use crate::models::{
    COLOR_THEMES, Category, DAYS, Ingredient, IngredientInput, MEAL_TYPES, MealSlot, NewCategory,
    NewIngredient, NewProfile, NewRecipe, NewShoppingItem, Profile, Recipe, ShoppingItem,
    require_text, validate_color_theme,
};
use crate::mutator::Mutator;
use crate::planner::{self, LogicalKeyResolver, MealKey};
use crate::remote::{RemoteStore, Session, Table, decode_row};
use crate::session::SessionGate;

/// The household's shared meal plan, shopping list, recipes and categories.
///
/// Reads come from the local mirror and never touch the network. Writes go
/// through the optimistic protocol: the mirror changes first and is rolled back
/// if the remote rejects the write.
pub struct Household {
    remote: Arc<dyn RemoteStore>,
    mirror: SharedMirror,
    gate: Arc<SessionGate>,
}

impl Household {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let mirror = SharedMirror::new();
        let gate = Arc::new(SessionGate::new(Arc::clone(&remote), mirror.clone()));
        Self {
            remote,
            mirror,
            gate,
        }
    }

    /// Profile to select by default once data is loaded, matched by name.
    #[must_use]
    pub fn with_preferred_profile(self, name: Option<String>) -> Self {
        self.mirror.write(|m| m.preferred_profile = name);
        self
    }

    // --- Session ---

    /// Check the remote for a session and load the mirror if there is one.
    pub async fn start(&self) -> Result<Phase> {
        self.gate.refresh().await
    }

    pub fn end_session(&self) {
        self.gate.end();
    }

    /// Follow the remote's sign-in and sign-out notifications in the background.
    pub fn watch_sessions(&self) -> JoinHandle<()> {
        let gate = Arc::clone(&self.gate);
        let sessions = self.remote.on_session_change();
        tokio::spawn(async move { gate.follow(sessions).await })
    }

    // --- Views ---

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.mirror.read(|m| m.phase())
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.mirror.read(|m| m.session().cloned())
    }

    #[must_use]
    pub fn profiles(&self) -> Vec<Profile> {
        self.mirror.read(|m| m.profiles.items().to_vec())
    }

    /// One slot per `(day, meal type, profile)`.
    #[must_use]
    pub fn meals(&self) -> Vec<MealSlot> {
        self.mirror.read(|m| LogicalKeyResolver::collapse(&m.meals))
    }

    /// A profile's planned meals in week order.
    #[must_use]
    pub fn meals_for(&self, profile_id: i64) -> Vec<MealSlot> {
        let mut meals: Vec<MealSlot> = self
            .meals()
            .into_iter()
            .filter(|m| m.profile_id == profile_id)
            .collect();
        meals.sort_by_key(|m| {
            (
                DAYS.iter().position(|d| *d == m.day_of_week),
                MEAL_TYPES.iter().position(|t| *t == m.meal_type),
            )
        });
        meals
    }

    #[must_use]
    pub fn shopping_items(&self) -> Vec<ShoppingItem> {
        self.mirror.read(|m| m.shopping.items().to_vec())
    }

    #[must_use]
    pub fn recipes(&self) -> Vec<Recipe> {
        self.mirror.read(|m| m.recipes.items().to_vec())
    }

    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.mirror.read(|m| m.categories.items().to_vec())
    }

    #[must_use]
    pub fn current_profile(&self) -> Option<Profile> {
        self.mirror.read(|m| m.current_profile().cloned())
    }

    pub fn set_current_profile(&self, id: i64) -> Result<Profile> {
        self.mirror.write(|m| {
            let profile = m
                .profiles
                .get(id)
                .filter(|p| p.id > 0)
                .cloned()
                .ok_or(SyncError::NotFound {
                    table: Table::Profiles,
                    id,
                })?;
            m.current_profile = Some(id);
            Ok(profile)
        })
    }

    /// Receiver that changes on every mirror update.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.mirror.subscribe()
    }

    fn mutator(&self) -> Result<Mutator<'_>> {
        if self.phase() != Phase::Ready {
            return Err(SyncError::SessionEnded);
        }
        Ok(Mutator::new(self.remote.as_ref(), &self.mirror))
    }

    // --- Shopping list ---

    pub async fn add_shopping_item(&self, name: &str) -> Result<ShoppingItem> {
        let payload = NewShoppingItem {
            item_name: require_text("Item name", name)?,
            is_checked: false,
        };
        self.mutator()?
            .insert(&payload, |id| payload.provisional(id))
            .await
    }

    pub async fn toggle_shopping_item(&self, id: i64, checked: bool) -> Result<ShoppingItem> {
        self.mutator()?
            .update::<ShoppingItem>(id, json!({ "is_checked": checked }), |item| {
                item.is_checked = checked;
            })
            .await
    }

    /// Add every ingredient mentioned in a profile's planned dishes that is not
    /// already on the list. Returns the items added.
    pub async fn fill_shopping_from_plan(&self, profile_id: i64) -> Result<Vec<ShoppingItem>> {
        let dishes: Vec<String> = self
            .meals_for(profile_id)
            .into_iter()
            .map(|m| m.dish_name)
            .filter(|d| !d.trim().is_empty())
            .collect();
        if dishes.is_empty() {
            return Err(SyncError::validation("Nothing is planned for this profile"));
        }

        let mut wanted: Vec<String> = Vec::new();
        for fragment in dishes.iter().flat_map(|d| split_dish(d)) {
            if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&fragment)) {
                wanted.push(fragment);
            }
        }

        let mut added = Vec::new();
        for name in wanted {
            let listed = self.mirror.read(|m| {
                m.shopping
                    .iter()
                    .any(|item| item.item_name.eq_ignore_ascii_case(&name))
            });
            if !listed {
                added.push(self.add_shopping_item(&name).await?);
            }
        }
        Ok(added)
    }

    /// Pending items as a shareable bullet list, or `None` when nothing is left
    /// to buy.
    #[must_use]
    pub fn shopping_share_text(&self) -> Option<String> {
        let pending: Vec<String> = self
            .shopping_items()
            .into_iter()
            .filter(|item| !item.is_checked)
            .map(|item| format!("- {}", item.item_name))
            .collect();
        if pending.is_empty() {
            return None;
        }
        Some(format!("*Shopping List*:\n\n{}", pending.join("\n")))
    }

    // --- Meal plan ---

    pub async fn plan_meal(
        &self,
        day: &str,
        meal_type: &str,
        dish: &str,
        profile_id: i64,
    ) -> Result<MealSlot> {
        let key = MealKey::new(day, meal_type, profile_id)?;
        planner::plan_meal(&self.mutator()?, &key, dish).await
    }

    // --- Recipes ---

    /// Insert a recipe, then its ingredients. If any ingredient is rejected the
    /// recipe is deleted again so no half-written recipe survives.
    pub async fn add_recipe(
        &self,
        name: &str,
        instructions: &str,
        image_url: Option<String>,
        ingredients: Vec<IngredientInput>,
        category: Option<String>,
    ) -> Result<Recipe> {
        let payload = NewRecipe {
            name: require_text("Recipe name", name)?,
            instructions: instructions.trim().to_string(),
            image_url: non_blank(image_url),
            category: non_blank(category),
            is_favorite: false,
        };
        let inputs: Vec<IngredientInput> = ingredients
            .into_iter()
            .filter(|i| !i.name.trim().is_empty())
            .collect();

        let mutator = self.mutator()?;
        let mut recipe: Recipe = mutator
            .insert(&payload, |id| {
                let pending = inputs
                    .iter()
                    .zip(1..)
                    .map(|(input, n)| Ingredient {
                        id: -n,
                        recipe_id: id,
                        ingredient_name: input.name.trim().to_string(),
                        quantity: input.quantity.trim().to_string(),
                    })
                    .collect();
                payload.provisional(id, pending)
            })
            .await?;

        match self.insert_ingredients(recipe.id, &inputs).await {
            Ok(stored) => {
                recipe.ingredients = stored;
                let mirrored = recipe.clone();
                self.mirror.write_in(mutator.epoch(), |m| {
                    if let Some(entry) = m.recipes.get_mut(mirrored.id) {
                        for ingredient in mirrored.ingredients {
                            match entry.ingredients.iter_mut().find(|i| i.id == ingredient.id) {
                                Some(slot) => *slot = ingredient,
                                None => entry.ingredients.push(ingredient),
                            }
                        }
                    }
                });
                Ok(recipe)
            }
            Err(e) => {
                tracing::warn!(recipe = recipe.id, error = %e, "ingredient insert failed, removing recipe");
                if let Err(undo) = self.remote.delete(Table::Recipes, recipe.id).await {
                    tracing::error!(recipe = recipe.id, error = %undo, "could not remove partial recipe");
                }
                self.mirror
                    .write_in(mutator.epoch(), |m| m.recipes.remove(recipe.id));
                Err(e)
            }
        }
    }

    async fn insert_ingredients(
        &self,
        recipe_id: i64,
        inputs: &[IngredientInput],
    ) -> Result<Vec<Ingredient>> {
        let mut stored = Vec::with_capacity(inputs.len());
        for input in inputs {
            let payload = NewIngredient {
                recipe_id,
                ingredient_name: input.name.trim().to_string(),
                quantity: input.quantity.trim().to_string(),
            };
            let row = serde_json::to_value(&payload)
                .map_err(|e| SyncError::validation(format!("cannot encode ingredient: {e}")))?;
            let row = self.remote.insert(Table::RecipeIngredients, row).await?;
            stored.push(decode_row(Table::RecipeIngredients, row)?);
        }
        Ok(stored)
    }

    pub async fn delete_recipe(&self, id: i64) -> Result<Recipe> {
        self.mutator()?.remove::<Recipe>(id).await
    }

    pub async fn toggle_favorite_recipe(&self, id: i64, favorite: bool) -> Result<Recipe> {
        self.mutator()?
            .update::<Recipe>(id, json!({ "is_favorite": favorite }), |recipe| {
                recipe.is_favorite = favorite;
            })
            .await
    }

    // --- Categories ---

    pub async fn add_category(&self, name: &str, icon: Option<String>) -> Result<Category> {
        let payload = NewCategory {
            name: require_text("Category name", name)?,
            icon: non_blank(icon),
        };
        self.mutator()?
            .insert(&payload, |id| payload.provisional(id))
            .await
    }

    pub async fn delete_category(&self, id: i64) -> Result<Category> {
        self.mutator()?.remove::<Category>(id).await
    }

    // --- Profiles ---

    pub async fn add_profile(&self, name: &str, color_theme: Option<&str>) -> Result<Profile> {
        let payload = NewProfile {
            name: require_text("Profile name", name)?,
            color_theme: match color_theme {
                Some(theme) => validate_color_theme(theme)?,
                None => COLOR_THEMES[0].to_string(),
            },
        };
        let profile = self
            .mutator()?
            .insert(&payload, |id| payload.provisional(id))
            .await?;
        self.mirror.write(|m| m.reselect_profile());
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        id: i64,
        name: Option<&str>,
        color_theme: Option<&str>,
    ) -> Result<Profile> {
        let name = name.map(|n| require_text("Profile name", n)).transpose()?;
        let color_theme = color_theme.map(validate_color_theme).transpose()?;
        let mut patch = Map::new();
        if let Some(name) = &name {
            patch.insert("name".to_string(), Value::from(name.as_str()));
        }
        if let Some(theme) = &color_theme {
            patch.insert("color_theme".to_string(), Value::from(theme.as_str()));
        }
        if patch.is_empty() {
            return Err(SyncError::validation("Nothing to update"));
        }
        self.mutator()?
            .update::<Profile>(id, Value::Object(patch), move |profile| {
                if let Some(name) = name {
                    profile.name = name;
                }
                if let Some(theme) = color_theme {
                    profile.color_theme = theme;
                }
            })
            .await
    }

    pub async fn delete_profile(&self, id: i64) -> Result<Profile> {
        let removed = self.mutator()?.remove::<Profile>(id).await;
        self.mirror.write(|m| m.reselect_profile());
        removed
    }
}

/// Split a dish description into likely ingredient names.
fn split_dish(dish: &str) -> Vec<String> {
    dish.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|part| part.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, UnconfiguredRemote, WriteOp};
    use crate::test_support::{settle, wait_until};

    async fn started(remote: &MemoryRemote) -> Household {
        remote.sign_in("user-1");
        let household = Household::new(Arc::new(remote.clone()));
        assert_eq!(household.start().await.unwrap(), Phase::Ready);
        household
    }

    async fn with_profile(remote: &MemoryRemote) -> (Household, i64) {
        let household = started(remote).await;
        let profile = household.add_profile("Mom", None).await.unwrap();
        (household, profile.id)
    }

    #[tokio::test]
    async fn plan_meal_upserts_by_logical_key() {
        let remote = MemoryRemote::new();
        let (household, mom) = with_profile(&remote).await;

        let first = household
            .plan_meal("Monday", "Lunch", "Pasta", mom)
            .await
            .unwrap();
        assert_eq!(household.meals().len(), 1);
        assert_eq!(household.meals()[0].dish_name, "Pasta");

        let second = household
            .plan_meal("Monday", "Lunch", "Rice", mom)
            .await
            .unwrap();
        let meals = household.meals();
        assert_eq!(meals.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(meals[0].dish_name, "Rice");
    }

    #[tokio::test]
    async fn failed_add_leaves_no_item() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        remote.fail_next(Table::ShoppingList, WriteOp::Insert);

        assert!(household.add_shopping_item("Milk").await.is_err());
        assert!(
            household
                .shopping_items()
                .iter()
                .all(|item| item.item_name != "Milk")
        );
    }

    #[tokio::test]
    async fn later_feed_update_wins_over_local_toggle() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        let item = household.add_shopping_item("Milk").await.unwrap();

        let toggled = household.toggle_shopping_item(item.id, true).await.unwrap();
        assert!(toggled.is_checked);
        wait_until(&household.mirror, |m| {
            m.shopping.get(item.id).is_some_and(|i| i.is_checked)
        })
        .await;

        // Another client unchecks it.
        remote
            .update(Table::ShoppingList, item.id, json!({"is_checked": false}))
            .await
            .unwrap();
        wait_until(&household.mirror, |m| {
            m.shopping.get(item.id).is_some_and(|i| !i.is_checked)
        })
        .await;
    }

    #[tokio::test]
    async fn duplicated_feed_delivery_keeps_one_entry() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        remote.set_duplicate_delivery(true);

        let row = remote
            .seed(Table::ShoppingList, json!({"item_name": "Bread"}))
            .unwrap();
        let id = row["id"].as_i64().unwrap();
        wait_until(&household.mirror, |m| m.shopping.contains(id)).await;
        settle().await;
        assert_eq!(household.shopping_items().len(), 1);
    }

    #[tokio::test]
    async fn deleting_unknown_recipe_reports_not_found() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        let err = household.delete_recipe(3).await.unwrap_err();
        assert_eq!(
            err,
            SyncError::NotFound {
                table: Table::Recipes,
                id: 3
            }
        );
        assert!(household.recipes().is_empty());
    }

    #[tokio::test]
    async fn recipe_with_ingredients_round_trips_through_remote() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        let recipe = household
            .add_recipe(
                "Lentejas",
                "Simmer for 40 minutes",
                None,
                vec![
                    IngredientInput::new("Lentils", "200g"),
                    IngredientInput::new("  ", "ignored"),
                    IngredientInput::new("Carrot", "1"),
                ],
                Some("Comida".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(recipe.ingredients.len(), 2);
        assert_eq!(remote.rows(Table::RecipeIngredients).len(), 2);
        settle().await;
        let mirrored = household.recipes();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].ingredients.len(), 2);
        assert!(mirrored[0].ingredients.iter().all(|i| i.id > 0));

        household.toggle_favorite_recipe(recipe.id, true).await.unwrap();
        settle().await;
        assert!(household.recipes()[0].is_favorite);
        assert_eq!(household.recipes()[0].ingredients.len(), 2);

        household.delete_recipe(recipe.id).await.unwrap();
        assert!(household.recipes().is_empty());
        assert!(remote.rows(Table::RecipeIngredients).is_empty());
    }

    #[tokio::test]
    async fn rejected_ingredient_removes_recipe() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        remote.fail_next(Table::RecipeIngredients, WriteOp::Insert);

        let result = household
            .add_recipe(
                "Soup",
                "",
                None,
                vec![IngredientInput::new("Leek", "2")],
                None,
            )
            .await;
        assert!(result.is_err());
        settle().await;
        assert!(remote.rows(Table::Recipes).is_empty());
        assert!(household.recipes().is_empty());
    }

    #[tokio::test]
    async fn categories_add_and_delete() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        let category = household
            .add_category("Cena", Some("moon".to_string()))
            .await
            .unwrap();
        assert_eq!(household.categories()[0].icon.as_deref(), Some("moon"));

        household.delete_category(category.id).await.unwrap();
        assert!(household.categories().is_empty());
        assert!(matches!(
            household.add_category("  ", None).await,
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn profiles_drive_current_selection() {
        let remote = MemoryRemote::new();
        remote.seed(Table::Profiles, json!({"name": "Dad"})).unwrap();
        remote.seed(Table::Profiles, json!({"name": "Mom"})).unwrap();
        remote.sign_in("user-1");
        let household = Household::new(Arc::new(remote.clone()))
            .with_preferred_profile(Some("Mom".to_string()));
        household.start().await.unwrap();
        assert_eq!(household.current_profile().unwrap().name, "Mom");

        let mom = household.current_profile().unwrap();
        let updated = household
            .update_profile(mom.id, None, Some("Orange"))
            .await
            .unwrap();
        assert_eq!(updated.color_theme, "orange");
        assert!(matches!(
            household.update_profile(mom.id, None, Some("purple")).await,
            Err(SyncError::Validation(_))
        ));

        household.delete_profile(mom.id).await.unwrap();
        assert_eq!(household.current_profile().unwrap().name, "Dad");

        let kid = household.add_profile("Kid", Some("blue")).await.unwrap();
        household.set_current_profile(kid.id).unwrap();
        assert_eq!(household.current_profile().unwrap().name, "Kid");
        assert!(household.set_current_profile(999).is_err());
    }

    #[tokio::test]
    async fn fill_from_plan_adds_missing_fragments() {
        let remote = MemoryRemote::new();
        let (household, mom) = with_profile(&remote).await;
        household.add_shopping_item("eggs").await.unwrap();
        household
            .plan_meal("Monday", "Dinner", "Tortilla, Eggs; Potatoes", mom)
            .await
            .unwrap();
        household
            .plan_meal("Tuesday", "Lunch", "potatoes\nOil", mom)
            .await
            .unwrap();

        let added: Vec<String> = household
            .fill_shopping_from_plan(mom)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.item_name)
            .collect();
        assert_eq!(added, vec!["Tortilla", "Potatoes", "Oil"]);
        assert_eq!(household.shopping_items().len(), 4);
    }

    #[tokio::test]
    async fn fill_from_empty_plan_is_rejected() {
        let remote = MemoryRemote::new();
        let (household, mom) = with_profile(&remote).await;
        assert!(matches!(
            household.fill_shopping_from_plan(mom).await,
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn share_text_lists_pending_items() {
        let remote = MemoryRemote::new();
        let household = started(&remote).await;
        assert!(household.shopping_share_text().is_none());

        let milk = household.add_shopping_item("Milk").await.unwrap();
        household.add_shopping_item("Bread").await.unwrap();
        household.toggle_shopping_item(milk.id, true).await.unwrap();
        assert_eq!(
            household.shopping_share_text().unwrap(),
            "*Shopping List*:\n\n- Bread"
        );
    }

    #[tokio::test]
    async fn two_households_share_one_remote() {
        let remote = MemoryRemote::new();
        let a = started(&remote).await;
        let b = started(&remote).await;

        let item = a.add_shopping_item("Coffee").await.unwrap();
        wait_until(&b.mirror, |m| m.shopping.contains(item.id)).await;

        b.toggle_shopping_item(item.id, true).await.unwrap();
        wait_until(&a.mirror, |m| {
            m.shopping.get(item.id).is_some_and(|i| i.is_checked)
        })
        .await;
    }

    #[tokio::test]
    async fn ending_the_session_clears_every_view() {
        let remote = MemoryRemote::new();
        let (household, mom) = with_profile(&remote).await;
        household.add_shopping_item("Milk").await.unwrap();
        household
            .plan_meal("Friday", "Dinner", "Pizza", mom)
            .await
            .unwrap();

        household.end_session();
        assert_eq!(household.phase(), Phase::Unauthenticated);
        assert!(household.profiles().is_empty());
        assert!(household.meals().is_empty());
        assert!(household.shopping_items().is_empty());
        assert!(household.current_profile().is_none());
        assert_eq!(
            household.add_shopping_item("Eggs").await.unwrap_err(),
            SyncError::SessionEnded
        );
    }

    #[tokio::test]
    async fn unconfigured_remote_degrades_to_empty_state() {
        let household = Household::new(Arc::new(UnconfiguredRemote::new("HEARTH_URL is not set")));
        assert_eq!(household.start().await.unwrap(), Phase::Unauthenticated);
        assert!(household.session().is_none());
        assert!(household.shopping_items().is_empty());
        assert!(household.add_shopping_item("Milk").await.is_err());
    }

    #[tokio::test]
    async fn watch_sessions_follows_sign_in() {
        let remote = MemoryRemote::new();
        let household = Household::new(Arc::new(remote.clone()));
        let watcher = household.watch_sessions();
        let updates = household.updates();

        remote.sign_in("user-1");
        wait_until(&household.mirror, |m| m.phase() == Phase::Ready).await;
        assert!(updates.has_changed().unwrap());

        remote.sign_out();
        wait_until(&household.mirror, |m| m.phase() == Phase::Unauthenticated).await;
        watcher.abort();
    }

    #[test]
    fn split_dish_keeps_meaningful_fragments() {
        assert_eq!(
            split_dish("Rice, egg;\n ox; Tomato sauce"),
            vec!["Rice", "egg", "Tomato sauce"]
        );
        assert!(split_dish("a, bb").is_empty());
    }
}
