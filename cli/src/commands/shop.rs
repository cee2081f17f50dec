use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use hearth_core::Household;
use hearth_core::models::ShoppingItem;

use super::helpers::{not_found, or_not_found, print_json, resolve_profile, share_link, truncate};

fn print_items(items: &[ShoppingItem]) {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = " ")]
        checked: &'static str,
        #[tabled(rename = "Item")]
        name: String,
    }

    let rows: Vec<ItemRow> = items
        .iter()
        .map(|item| ItemRow {
            id: item.id,
            checked: if item.is_checked { "[x]" } else { "[ ]" },
            name: truncate(&item.item_name, 40),
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
}

pub(crate) fn cmd_shop_list(household: &Household, json: bool) -> Result<()> {
    let items = household.shopping_items();

    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        eprintln!("The shopping list is empty. Use `hearth shop add <item>` to add something.");
        return Ok(());
    }
    print_items(&items);
    let pending = items.iter().filter(|i| !i.is_checked).count();
    println!("{pending} of {} still to buy", items.len());
    Ok(())
}

pub(crate) async fn cmd_shop_add(household: &Household, name: &str, json: bool) -> Result<()> {
    let item = household.add_shopping_item(name).await?;
    if json {
        print_json(&item)
    } else {
        println!("Added '{}' (id {})", item.item_name, item.id);
        Ok(())
    }
}

/// Flip an item between bought and not bought.
pub(crate) async fn cmd_shop_toggle(household: &Household, id: i64, json: bool) -> Result<()> {
    let Some(current) = household.shopping_items().into_iter().find(|i| i.id == id) else {
        not_found(&format!("Shopping item {id} not found"), json);
    };
    let item = or_not_found(
        household
            .toggle_shopping_item(id, !current.is_checked)
            .await,
        json,
    )?;
    if json {
        print_json(&item)
    } else {
        let state = if item.is_checked { "checked" } else { "unchecked" };
        println!("'{}' is now {state}", item.item_name);
        Ok(())
    }
}

pub(crate) async fn cmd_shop_fill(
    household: &Household,
    profile: Option<&str>,
    json: bool,
) -> Result<()> {
    let profile = resolve_profile(household, profile, json)?;
    let added = household.fill_shopping_from_plan(profile.id).await?;
    if json {
        return print_json(&added);
    }
    if added.is_empty() {
        println!("Everything in {}'s plan is already on the list", profile.name);
    } else {
        println!("Added {} item(s) from {}'s plan:", added.len(), profile.name);
        print_items(&added);
    }
    Ok(())
}

pub(crate) fn cmd_shop_share(household: &Household, json: bool) -> Result<()> {
    let Some(text) = household.shopping_share_text() else {
        if json {
            println!("{}", serde_json::json!({ "text": null, "link": null }));
        } else {
            eprintln!("Nothing left to buy.");
        }
        return Ok(());
    };
    let link = share_link(&text);
    if json {
        println!("{}", serde_json::json!({ "text": text, "link": link }));
    } else {
        println!("{text}");
        println!();
        println!("Share: {link}");
    }
    Ok(())
}
