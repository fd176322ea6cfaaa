pub mod chat;
pub mod checker;
pub mod commands;
pub mod config;
pub mod data;
pub mod groups;
pub mod handlers;
pub mod identity;
pub mod ingest;
pub mod logging;
pub mod lookup;
pub mod store;

pub const BOT_NAME: &str = "steam_ban_checker";
pub const COMMAND_TARGET: &str = "steam_ban_checker::command";
pub const ERROR_TARGET: &str = "steam_ban_checker::error";
pub const EVENT_TARGET: &str = "steam_ban_checker::handlers";
pub const CHECKER_TARGET: &str = "steam_ban_checker::checker";
pub const CONSOLE_TARGET: &str = "steam_ban_checker";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
