use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use hearth_core::Household;

use super::helpers::{or_not_found, print_json};

pub(crate) fn cmd_category_list(household: &Household, json: bool) -> Result<()> {
    let categories = household.categories();

    if json {
        return print_json(&categories);
    }
    if categories.is_empty() {
        eprintln!("No categories yet. Use `hearth category add <name>` to create one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct CategoryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Icon")]
        icon: String,
        #[tabled(rename = "Name")]
        name: String,
    }

    let rows: Vec<CategoryRow> = categories
        .into_iter()
        .map(|c| CategoryRow {
            id: c.id,
            icon: c.icon.unwrap_or_default(),
            name: c.name,
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) async fn cmd_category_add(
    household: &Household,
    name: &str,
    icon: Option<String>,
    json: bool,
) -> Result<()> {
    let category = household.add_category(name, icon).await?;
    if json {
        print_json(&category)
    } else {
        println!("Added category {} '{}'", category.id, category.name);
        Ok(())
    }
}

pub(crate) async fn cmd_category_delete(household: &Household, id: i64, json: bool) -> Result<()> {
    let removed = or_not_found(household.delete_category(id).await, json)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": removed.id }));
    } else {
        println!("Deleted category {} '{}'", removed.id, removed.name);
    }
    Ok(())
}
