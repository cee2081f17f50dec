use anyhow::Result;
use tabled::{Table, Tabled, settings::Style};

use hearth_core::Household;

use super::helpers::{or_not_found, print_json, resolve_profile, truncate};
use crate::config::Config;

pub(crate) fn cmd_profile_list(household: &Household, json: bool) -> Result<()> {
    let profiles = household.profiles();

    if json {
        return print_json(&profiles);
    }
    if profiles.is_empty() {
        eprintln!("No profiles yet. Use `hearth profile add <name>` to create one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct ProfileRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Theme")]
        theme: String,
        #[tabled(rename = "Current")]
        current: &'static str,
    }

    let current = household.current_profile().map(|p| p.id);
    let rows: Vec<ProfileRow> = profiles
        .iter()
        .map(|p| ProfileRow {
            id: p.id,
            name: truncate(&p.name, 30),
            theme: p.color_theme.clone(),
            current: if current == Some(p.id) { "*" } else { "" },
        })
        .collect();
    println!("{}", Table::new(&rows).with(Style::rounded()));
    Ok(())
}

pub(crate) async fn cmd_profile_add(
    household: &Household,
    name: &str,
    theme: Option<&str>,
    json: bool,
) -> Result<()> {
    let profile = household.add_profile(name, theme).await?;
    if json {
        print_json(&profile)
    } else {
        println!(
            "Added profile {} '{}' ({})",
            profile.id, profile.name, profile.color_theme
        );
        Ok(())
    }
}

pub(crate) async fn cmd_profile_update(
    household: &Household,
    selector: &str,
    name: Option<&str>,
    theme: Option<&str>,
    json: bool,
) -> Result<()> {
    let target = resolve_profile(household, Some(selector), json)?;
    let profile = or_not_found(
        household.update_profile(target.id, name, theme).await,
        json,
    )?;
    if json {
        print_json(&profile)
    } else {
        println!(
            "Updated profile {}: '{}' ({})",
            profile.id, profile.name, profile.color_theme
        );
        Ok(())
    }
}

pub(crate) async fn cmd_profile_delete(
    household: &Household,
    selector: &str,
    json: bool,
) -> Result<()> {
    let target = resolve_profile(household, Some(selector), json)?;
    let removed = or_not_found(household.delete_profile(target.id).await, json)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": removed.id }));
    } else {
        println!("Deleted profile {} '{}'", removed.id, removed.name);
    }
    Ok(())
}

/// Make a profile the default for later commands.
pub(crate) fn cmd_profile_use(
    household: &Household,
    config: &Config,
    selector: &str,
    json: bool,
) -> Result<()> {
    let target = resolve_profile(household, Some(selector), json)?;
    let profile = or_not_found(household.set_current_profile(target.id), json)?;
    config.save_preferred_profile(&profile.name)?;
    if json {
        print_json(&profile)
    } else {
        println!("Now using profile '{}'", profile.name);
        Ok(())
    }
}
