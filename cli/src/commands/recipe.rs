use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use hearth_core::Household;
use hearth_core::models::{IngredientInput, Recipe};

use super::helpers::{not_found, or_not_found, print_json, truncate};

pub(crate) fn cmd_recipe_list(household: &Household, favorites: bool, json: bool) -> Result<()> {
    let recipes: Vec<Recipe> = household
        .recipes()
        .into_iter()
        .filter(|r| !favorites || r.is_favorite)
        .collect();

    if json {
        return print_json(&recipes);
    }
    if recipes.is_empty() {
        if favorites {
            eprintln!("No favorite recipes yet. Use `hearth recipe favorite <id>` to mark one.");
        } else {
            eprintln!("No recipes yet. Use `hearth recipe add <name>` to create one.");
        }
        return Ok(());
    }

    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Fav")]
        favorite: &'static str,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: r.id,
            name: truncate(&r.name, 35),
            category: r.category.clone().unwrap_or_default(),
            favorite: if r.is_favorite { "*" } else { "" },
            ingredients: r.ingredients.len(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) fn cmd_recipe_show(household: &Household, id: i64, json: bool) -> Result<()> {
    let Some(recipe) = household.recipes().into_iter().find(|r| r.id == id) else {
        not_found(&format!("Recipe {id} not found"), json);
    };
    if json {
        return print_json(&recipe);
    }

    let star = if recipe.is_favorite { " *" } else { "" };
    println!("{}{star}", recipe.name);
    if let Some(category) = &recipe.category {
        println!("Category: {category}");
    }
    if let Some(url) = &recipe.image_url {
        println!("Image: {url}");
    }

    if !recipe.ingredients.is_empty() {
        #[derive(Tabled)]
        struct IngredientRow {
            #[tabled(rename = "Ingredient")]
            name: String,
            #[tabled(rename = "Quantity")]
            quantity: String,
        }
        let rows: Vec<IngredientRow> = recipe
            .ingredients
            .iter()
            .map(|i| IngredientRow {
                name: i.ingredient_name.clone(),
                quantity: i.quantity.clone(),
            })
            .collect();
        println!("{}", Table::new(&rows).with(Style::rounded()));
    }
    if !recipe.instructions.is_empty() {
        println!();
        println!("{}", recipe.instructions);
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_add(
    household: &Household,
    name: &str,
    instructions: Option<&str>,
    image_url: Option<String>,
    category: Option<String>,
    ingredients: Vec<IngredientInput>,
    json: bool,
) -> Result<()> {
    let recipe = household
        .add_recipe(
            name,
            instructions.unwrap_or_default(),
            image_url,
            ingredients,
            category,
        )
        .await?;
    if json {
        print_json(&recipe)
    } else {
        println!(
            "Added recipe {} '{}' with {} ingredient(s)",
            recipe.id,
            recipe.name,
            recipe.ingredients.len()
        );
        Ok(())
    }
}

pub(crate) async fn cmd_recipe_delete(household: &Household, id: i64, json: bool) -> Result<()> {
    let removed = or_not_found(household.delete_recipe(id).await, json)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": removed.id }));
    } else {
        println!("Deleted recipe {} '{}'", removed.id, removed.name);
    }
    Ok(())
}

pub(crate) async fn cmd_recipe_favorite(
    household: &Household,
    id: i64,
    favorite: bool,
    json: bool,
) -> Result<()> {
    let recipe = or_not_found(household.toggle_favorite_recipe(id, favorite).await, json)?;
    if json {
        print_json(&recipe)
    } else if recipe.is_favorite {
        println!("Marked '{}' as a favorite", recipe.name);
        Ok(())
    } else {
        println!("Removed '{}' from favorites", recipe.name);
        Ok(())
    }
}
