mod commands;
mod config;
mod rest;
mod server;
mod wire;

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hearth_core::{Household, Phase, RemoteStore, UnconfiguredRemote};

use crate::commands::{
    cmd_category_add, cmd_category_delete, cmd_category_list, cmd_plan_set, cmd_plan_show,
    cmd_profile_add, cmd_profile_delete, cmd_profile_list, cmd_profile_update, cmd_profile_use,
    cmd_recipe_add, cmd_recipe_delete, cmd_recipe_favorite, cmd_recipe_list, cmd_recipe_show,
    cmd_shop_add, cmd_shop_fill, cmd_shop_list, cmd_shop_share, cmd_shop_toggle, cmd_watch,
    parse_ingredient,
};
use crate::config::Config;
use crate::rest::RestRemote;

#[derive(Parser)]
#[command(
    name = "hearth",
    version,
    about = "A shared household meal planner and shopping list",
    long_about = "A shared household meal planner and shopping list.\n\n\
        Every command talks to the store named by HEARTH_URL. Run `hearth serve`\n\
        to host an in-memory store for the household."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve an in-memory household store over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
    /// Follow live changes from every household member
    Watch,
    /// Manage household member profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Show or change the weekly meal plan
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Manage the shared shopping list
    Shop {
        #[command(subcommand)]
        command: ShopCommands,
    },
    /// Manage the recipe book
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage recipe categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List profiles
    List,
    /// Add a profile
    Add {
        /// Profile name
        name: String,
        /// Color theme: emerald, blue, orange (default: emerald)
        #[arg(long)]
        theme: Option<String>,
    },
    /// Rename a profile or change its theme
    Update {
        /// Profile ID or name
        profile: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New color theme: emerald, blue, orange
        #[arg(long)]
        theme: Option<String>,
    },
    /// Delete a profile
    Delete {
        /// Profile ID or name
        profile: String,
    },
    /// Make a profile the default for later commands
    Use {
        /// Profile ID or name
        profile: String,
    },
}

#[derive(Subcommand)]
enum PlanCommands {
    /// Show the week for a profile
    Show {
        /// Profile ID or name (default: current profile)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Plan a dish for one day and meal
    Set {
        /// Day of the week (e.g. monday)
        day: String,
        /// Meal type: breakfast, lunch, dinner, snack
        meal: String,
        /// Dish name
        dish: String,
        /// Profile ID or name (default: current profile)
        #[arg(short, long)]
        profile: Option<String>,
    },
}

#[derive(Subcommand)]
enum ShopCommands {
    /// List the shopping list
    List,
    /// Add an item
    Add {
        /// Item name
        name: String,
    },
    /// Check or uncheck an item
    Toggle {
        /// Item ID
        id: i64,
    },
    /// Add the ingredients of a profile's planned dishes
    Fill {
        /// Profile ID or name (default: current profile)
        #[arg(short, long)]
        profile: Option<String>,
    },
    /// Print the pending items with a share link
    Share,
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// List recipes
    List {
        /// Only show favorites
        #[arg(long)]
        favorites: bool,
    },
    /// Show a recipe with its ingredients
    Show {
        /// Recipe ID
        id: i64,
    },
    /// Add a recipe
    Add {
        /// Recipe name
        name: String,
        /// Preparation instructions
        #[arg(long)]
        instructions: Option<String>,
        /// Image URL
        #[arg(long)]
        image_url: Option<String>,
        /// Category name
        #[arg(long)]
        category: Option<String>,
        /// Ingredient as "name:quantity" (repeatable)
        #[arg(short, long = "ingredient", value_name = "NAME:QTY")]
        ingredients: Vec<String>,
    },
    /// Delete a recipe
    Delete {
        /// Recipe ID
        id: i64,
    },
    /// Mark a recipe as a favorite
    Favorite {
        /// Recipe ID
        id: i64,
        /// Remove the favorite mark instead
        #[arg(long)]
        off: bool,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// List categories
    List,
    /// Add a category
    Add {
        /// Category name
        name: String,
        /// Icon (e.g. an emoji)
        #[arg(long)]
        icon: Option<String>,
    },
    /// Delete a category
    Delete {
        /// Category ID
        id: i64,
    },
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

/// Pick the remote once: the HTTP store when configured, the inert stub otherwise.
fn connect(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    match (&config.remote_url, &config.api_key) {
        (Some(url), Some(key)) => Ok(Arc::new(RestRemote::new(url, key.clone())?)),
        _ => {
            let reason = config.missing_remote().unwrap_or_default();
            tracing::error!("{reason}; continuing without a remote store");
            Ok(Arc::new(UnconfiguredRemote::new(reason)))
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let json = cli.json;

    if let Commands::Serve {
        port,
        bind,
        no_auth,
    } = cli.command
    {
        let (api_key, new_api_key) = if no_auth {
            (None, false)
        } else {
            let (key, new) = config.load_or_create_api_key()?;
            (Some(key), new)
        };
        return server::start_server(port, &bind, api_key, new_api_key).await;
    }

    let household =
        Household::new(connect(&config)?).with_preferred_profile(config.preferred_profile.clone());
    if household.start().await? != Phase::Ready {
        tracing::warn!("no active session; showing an empty household");
    }

    let result = dispatch(&household, &config, cli.command, json).await;
    household.end_session();
    result
}

async fn dispatch(
    household: &Household,
    config: &Config,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Serve { .. } => Ok(()),
        Commands::Watch => cmd_watch(household, json).await,
        Commands::Profile { command } => match command {
            ProfileCommands::List => cmd_profile_list(household, json),
            ProfileCommands::Add { name, theme } => {
                cmd_profile_add(household, &name, theme.as_deref(), json).await
            }
            ProfileCommands::Update {
                profile,
                name,
                theme,
            } => {
                cmd_profile_update(
                    household,
                    &profile,
                    name.as_deref(),
                    theme.as_deref(),
                    json,
                )
                .await
            }
            ProfileCommands::Delete { profile } => {
                cmd_profile_delete(household, &profile, json).await
            }
            ProfileCommands::Use { profile } => cmd_profile_use(household, config, &profile, json),
        },
        Commands::Plan { command } => match command {
            PlanCommands::Show { profile } => cmd_plan_show(household, profile.as_deref(), json),
            PlanCommands::Set {
                day,
                meal,
                dish,
                profile,
            } => cmd_plan_set(household, &day, &meal, &dish, profile.as_deref(), json).await,
        },
        Commands::Shop { command } => match command {
            ShopCommands::List => cmd_shop_list(household, json),
            ShopCommands::Add { name } => cmd_shop_add(household, &name, json).await,
            ShopCommands::Toggle { id } => cmd_shop_toggle(household, id, json).await,
            ShopCommands::Fill { profile } => {
                cmd_shop_fill(household, profile.as_deref(), json).await
            }
            ShopCommands::Share => cmd_shop_share(household, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::List { favorites } => cmd_recipe_list(household, favorites, json),
            RecipeCommands::Show { id } => cmd_recipe_show(household, id, json),
            RecipeCommands::Add {
                name,
                instructions,
                image_url,
                category,
                ingredients,
            } => {
                let ingredients = ingredients
                    .iter()
                    .map(|s| parse_ingredient(s))
                    .collect::<Result<Vec<_>>>()?;
                cmd_recipe_add(
                    household,
                    &name,
                    instructions.as_deref(),
                    image_url,
                    category,
                    ingredients,
                    json,
                )
                .await
            }
            RecipeCommands::Delete { id } => cmd_recipe_delete(household, id, json).await,
            RecipeCommands::Favorite { id, off } => {
                cmd_recipe_favorite(household, id, !off, json).await
            }
        },
        Commands::Category { command } => match command {
            CategoryCommands::List => cmd_category_list(household, json),
            CategoryCommands::Add { name, icon } => {
                cmd_category_add(household, &name, icon, json).await
            }
            CategoryCommands::Delete { id } => cmd_category_delete(household, id, json).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_and_verbose_are_global() {
        let cli = Cli::try_parse_from(["hearth", "shop", "list", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Shop {
                command: ShopCommands::List
            }
        ));
    }

    #[test]
    fn recipe_ingredients_repeat() {
        let cli = Cli::try_parse_from([
            "hearth", "recipe", "add", "Soup", "-i", "Leek:2", "-i", "Salt",
        ])
        .unwrap();
        let Commands::Recipe {
            command: RecipeCommands::Add { ingredients, .. },
        } = cli.command
        else {
            panic!("expected recipe add");
        };
        assert_eq!(ingredients, vec!["Leek:2", "Salt"]);
    }

    #[test]
    fn unconfigured_config_connects_to_stub() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), |_| None).unwrap();
        // The stub never has a session.
        let remote = connect(&config).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert!(rt.block_on(remote.get_session()).unwrap().is_none());
    }
}
