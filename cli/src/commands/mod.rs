mod category;
mod helpers;
mod plan;
mod profile;
mod recipe;
mod shop;
mod watch;

pub(crate) use category::{cmd_category_add, cmd_category_delete, cmd_category_list};
pub(crate) use helpers::parse_ingredient;
pub(crate) use plan::{cmd_plan_set, cmd_plan_show};
pub(crate) use profile::{
    cmd_profile_add, cmd_profile_delete, cmd_profile_list, cmd_profile_update, cmd_profile_use,
};
pub(crate) use recipe::{
    cmd_recipe_add, cmd_recipe_delete, cmd_recipe_favorite, cmd_recipe_list, cmd_recipe_show,
};
pub(crate) use shop::{cmd_shop_add, cmd_shop_fill, cmd_shop_list, cmd_shop_share, cmd_shop_toggle};
pub(crate) use watch::cmd_watch;
