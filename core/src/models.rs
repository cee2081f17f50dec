use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::mirror::Mirror;
use crate::remote::Table;
use crate::store::EntityStore;

/// A mirrored entity: one row of one remote table, keyed by its storage id.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const TABLE: Table;

    fn id(&self) -> i64;

    fn store(mirror: &Mirror) -> &EntityStore<Self>;

    fn store_mut(mirror: &mut Mirror) -> &mut EntityStore<Self>;

    /// Fold an incoming remote row over the entry already mirrored for its id.
    fn absorb(self, _existing: Option<&Self>) -> Self {
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_color_theme")]
    pub color_theme: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealSlot {
    pub id: i64,
    pub day_of_week: String,
    pub meal_type: String,
    pub profile_id: i64,
    #[serde(default)]
    pub dish_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingItem {
    pub id: i64,
    pub item_name: String,
    #[serde(default)]
    pub is_checked: bool,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, rename = "recipe_ingredients")]
    pub ingredients: Vec<Ingredient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_name: String,
    #[serde(default)]
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Entity for Profile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> i64 {
        self.id
    }

    fn store(mirror: &Mirror) -> &EntityStore<Self> {
        &mirror.profiles
    }

    fn store_mut(mirror: &mut Mirror) -> &mut EntityStore<Self> {
        &mut mirror.profiles
    }
}

impl Entity for MealSlot {
    const TABLE: Table = Table::WeeklyPlan;

    fn id(&self) -> i64 {
        self.id
    }

    fn store(mirror: &Mirror) -> &EntityStore<Self> {
        &mirror.meals
    }

    fn store_mut(mirror: &mut Mirror) -> &mut EntityStore<Self> {
        &mut mirror.meals
    }
}

impl Entity for ShoppingItem {
    const TABLE: Table = Table::ShoppingList;

    fn id(&self) -> i64 {
        self.id
    }

    fn store(mirror: &Mirror) -> &EntityStore<Self> {
        &mirror.shopping
    }

    fn store_mut(mirror: &mut Mirror) -> &mut EntityStore<Self> {
        &mut mirror.shopping
    }
}

impl Entity for Recipe {
    const TABLE: Table = Table::Recipes;

    fn id(&self) -> i64 {
        self.id
    }

    fn store(mirror: &Mirror) -> &EntityStore<Self> {
        &mirror.recipes
    }

    fn store_mut(mirror: &mut Mirror) -> &mut EntityStore<Self> {
        &mut mirror.recipes
    }

    // Feed rows for `recipes` never embed ingredients; keep the mirrored ones.
    fn absorb(mut self, existing: Option<&Self>) -> Self {
        if self.ingredients.is_empty() {
            if let Some(existing) = existing {
                self.ingredients.clone_from(&existing.ingredients);
            }
        }
        self
    }
}

impl Entity for Category {
    const TABLE: Table = Table::Categories;

    fn id(&self) -> i64 {
        self.id
    }

    fn store(mirror: &Mirror) -> &EntityStore<Self> {
        &mirror.categories
    }

    fn store_mut(mirror: &mut Mirror) -> &mut EntityStore<Self> {
        &mut mirror.categories
    }
}

// --- Insert payloads (the remote assigns `id` and `created_at`) ---

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub name: String,
    pub color_theme: String,
}

impl NewProfile {
    #[must_use]
    pub fn provisional(&self, id: i64) -> Profile {
        Profile {
            id,
            name: self.name.clone(),
            color_theme: self.color_theme.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMealSlot {
    pub day_of_week: String,
    pub meal_type: String,
    pub dish_name: String,
    pub profile_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewShoppingItem {
    pub item_name: String,
    pub is_checked: bool,
}

impl NewShoppingItem {
    #[must_use]
    pub fn provisional(&self, id: i64) -> ShoppingItem {
        ShoppingItem {
            id,
            item_name: self.item_name.clone(),
            is_checked: self.is_checked,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRecipe {
    pub name: String,
    pub instructions: String,
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub is_favorite: bool,
}

impl NewRecipe {
    #[must_use]
    pub fn provisional(&self, id: i64, ingredients: Vec<Ingredient>) -> Recipe {
        Recipe {
            id,
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            image_url: self.image_url.clone(),
            category: self.category.clone(),
            is_favorite: self.is_favorite,
            created_at: chrono::Utc::now().to_rfc3339(),
            ingredients,
        }
    }
}

/// An ingredient as entered by the user, before it belongs to a stored recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientInput {
    pub name: String,
    #[serde(default)]
    pub quantity: String,
}

impl IngredientInput {
    pub fn new(name: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewIngredient {
    pub recipe_id: i64,
    pub ingredient_name: String,
    pub quantity: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub icon: Option<String>,
}

impl NewCategory {
    #[must_use]
    pub fn provisional(&self, id: i64) -> Category {
        Category {
            id,
            name: self.name.clone(),
            icon: self.icon.clone(),
        }
    }
}

// --- Validation ---

pub const DAYS: &[&str] = &[
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub const MEAL_TYPES: &[&str] = &["Breakfast", "Lunch", "Dinner", "Snack"];

pub const COLOR_THEMES: &[&str] = &["emerald", "blue", "orange"];

fn default_color_theme() -> String {
    COLOR_THEMES[0].to_string()
}

fn match_ignore_case(value: &str, allowed: &[&str]) -> Option<String> {
    let value = value.trim();
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(value))
        .map(|a| (*a).to_string())
}

pub fn validate_day(day: &str) -> Result<String> {
    match_ignore_case(day, DAYS).ok_or_else(|| {
        SyncError::validation(format!(
            "Invalid day '{day}'. Must be one of: {}",
            DAYS.join(", ")
        ))
    })
}

pub fn validate_meal_type(meal: &str) -> Result<String> {
    match_ignore_case(meal, MEAL_TYPES).ok_or_else(|| {
        SyncError::validation(format!(
            "Invalid meal type '{meal}'. Must be one of: {}",
            MEAL_TYPES.join(", ")
        ))
    })
}

pub fn validate_color_theme(theme: &str) -> Result<String> {
    match_ignore_case(theme, COLOR_THEMES).ok_or_else(|| {
        SyncError::validation(format!(
            "Invalid color theme '{theme}'. Must be one of: {}",
            COLOR_THEMES.join(", ")
        ))
    })
}

/// Trim `value`, rejecting it when nothing is left.
pub fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SyncError::validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}
