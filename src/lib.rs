//! A Discord chat bot backed by a conversational language model.
//!
//! Parsing, history, and command handling are plain library code with no
//! network access. The `io` feature adds the gateway, REST and inference
//! clients plus [`run`], which wires them together.

pub mod canned;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod history;
pub mod model;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod http;
#[cfg(feature = "io")]
pub mod llama;

/// Run the Discord bot.
///
/// Loads `.env`, reads [`config::BotConfig`] from the environment and hands
/// over to [`bot::start`] for the event loop.
#[cfg(feature = "io")]
pub async fn run() -> Result<(), error::BotError> {
    dotenv::dotenv().ok();
    let config = config::BotConfig::from_env()?;
    bot::start(config).await
}
