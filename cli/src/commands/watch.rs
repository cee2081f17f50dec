use anyhow::Result;
use serde::Serialize;

use hearth_core::{Household, Phase};

#[derive(Serialize)]
struct Snapshot {
    phase: Phase,
    profiles: usize,
    meals: usize,
    to_buy: usize,
    shopping_items: usize,
    recipes: usize,
    categories: usize,
}

impl Snapshot {
    fn of(household: &Household) -> Self {
        let items = household.shopping_items();
        Self {
            phase: household.phase(),
            profiles: household.profiles().len(),
            meals: household.meals().len(),
            to_buy: items.iter().filter(|i| !i.is_checked).count(),
            shopping_items: items.len(),
            recipes: household.recipes().len(),
            categories: household.categories().len(),
        }
    }

    fn line(&self) -> String {
        format!(
            "[{:?}] {} profiles, {} meals, {}/{} to buy, {} recipes, {} categories",
            self.phase,
            self.profiles,
            self.meals,
            self.to_buy,
            self.shopping_items,
            self.recipes,
            self.categories
        )
    }
}

fn report(household: &Household, json: bool) -> Result<()> {
    let snapshot = Snapshot::of(household);
    if json {
        println!("{}", serde_json::to_string(&snapshot)?);
    } else {
        println!("{}", snapshot.line());
    }
    Ok(())
}

/// Print a summary line every time the mirror changes, until interrupted.
pub(crate) async fn cmd_watch(household: &Household, json: bool) -> Result<()> {
    let sessions = household.watch_sessions();
    let mut updates = household.updates();
    report(household, json)?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                report(household, json)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sessions.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::MemoryRemote;
    use std::sync::Arc;

    #[tokio::test]
    async fn snapshot_counts_mirrored_rows() {
        let remote = MemoryRemote::new();
        remote.sign_in("household");
        let household = Household::new(Arc::new(remote));
        household.start().await.unwrap();
        household.add_shopping_item("Milk").await.unwrap();
        let bread = household.add_shopping_item("Bread").await.unwrap();
        household.toggle_shopping_item(bread.id, true).await.unwrap();

        let snapshot = Snapshot::of(&household);
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(snapshot.shopping_items, 2);
        assert_eq!(snapshot.to_buy, 1);
        assert_eq!(
            snapshot.line(),
            "[Ready] 0 profiles, 0 meals, 1/2 to buy, 0 recipes, 0 categories"
        );
        household.end_session();
    }
}
