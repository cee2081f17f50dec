use anyhow::Result;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Modify, Style, Width, object::Columns},
};

use hearth_core::Household;
use hearth_core::models::{DAYS, MealSlot, Profile};

use super::helpers::{print_json, resolve_profile};

#[derive(Serialize)]
struct WeekPlan<'a> {
    profile: &'a Profile,
    meals: &'a [MealSlot],
}

#[derive(Tabled)]
struct DayRow {
    #[tabled(rename = "Day")]
    day: &'static str,
    #[tabled(rename = "Breakfast")]
    breakfast: String,
    #[tabled(rename = "Lunch")]
    lunch: String,
    #[tabled(rename = "Dinner")]
    dinner: String,
    #[tabled(rename = "Snack")]
    snack: String,
}

fn week_rows(meals: &[MealSlot]) -> Vec<DayRow> {
    let dish = |day: &str, meal: &str| {
        meals
            .iter()
            .find(|m| m.day_of_week == day && m.meal_type == meal)
            .map_or_else(|| "-".to_string(), |m| m.dish_name.clone())
    };
    DAYS.iter()
        .map(|&day| DayRow {
            day,
            breakfast: dish(day, "Breakfast"),
            lunch: dish(day, "Lunch"),
            dinner: dish(day, "Dinner"),
            snack: dish(day, "Snack"),
        })
        .collect()
}

pub(crate) fn cmd_plan_show(
    household: &Household,
    profile: Option<&str>,
    json: bool,
) -> Result<()> {
    let profile = resolve_profile(household, profile, json)?;
    let meals = household.meals_for(profile.id);

    if json {
        return print_json(&WeekPlan {
            profile: &profile,
            meals: &meals,
        });
    }

    println!("Week plan for {}", profile.name);
    let table = Table::new(week_rows(&meals))
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Width::wrap(24)))
        .to_string();
    println!("{table}");
    Ok(())
}

pub(crate) async fn cmd_plan_set(
    household: &Household,
    day: &str,
    meal: &str,
    dish: &str,
    profile: Option<&str>,
    json: bool,
) -> Result<()> {
    let profile = resolve_profile(household, profile, json)?;
    let slot = household.plan_meal(day, meal, dish, profile.id).await?;
    if json {
        print_json(&slot)
    } else {
        println!(
            "Planned {} {} for {}: {}",
            slot.day_of_week, slot.meal_type, profile.name, slot.dish_name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: i64, day: &str, meal: &str, dish: &str) -> MealSlot {
        MealSlot {
            id,
            day_of_week: day.to_string(),
            meal_type: meal.to_string(),
            profile_id: 1,
            dish_name: dish.to_string(),
        }
    }

    #[test]
    fn week_rows_cover_every_day_in_order() {
        let meals = vec![
            slot(1, "Wednesday", "Dinner", "Soup"),
            slot(2, "Monday", "Lunch", "Pasta"),
        ];
        let rows = week_rows(&meals);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].day, "Monday");
        assert_eq!(rows[0].lunch, "Pasta");
        assert_eq!(rows[0].dinner, "-");
        assert_eq!(rows[2].dinner, "Soup");
        assert_eq!(rows[6].day, "Sunday");
    }
}
