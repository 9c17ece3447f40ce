pub mod clip;
pub mod commands;
pub mod config;
pub mod discord;
pub mod error;
pub mod handlers;
pub mod player;
pub mod routing;
pub mod voice;

use clap::Parser;
use poise::serenity_prelude as serenity;
use serenity::{GatewayIntents, GuildId};
use songbird::Songbird;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{
  clip::{prepare, FfmpegOpusEncoder},
  commands::{command_list, CommandRegistry},
  config::Config,
  discord::BotSetup,
  error::Result,
};

const DEFAULT_LOG_FILTER: &str = "info,serenity=warn,songbird=warn";

#[tokio::main]
async fn main() -> Result<()> {
  dotenv::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
    .init();

  let config = Config::parse()
    .validate()
    .inspect_err(|err| error!("{}", err))?;
  info!(?config, "configuration loaded");

  let lego_yoda = prepare(&config.clip, &FfmpegOpusEncoder::new(&config.ffmpeg))
    .await
    .inspect_err(|err| error!(clip = %config.clip.display(), "failed to prepare clip: {}", err))?;

  let registry = CommandRegistry::register(command_list())?;

  let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

  let manager = Songbird::serenity();
  let framework = discord::get_framework(
    Arc::clone(&manager),
    BotSetup {
      registry,
      lego_yoda,
      player_config: config.player_config(),
      guild_id: config.guild_id.map(GuildId::new),
    },
  );

  let mut client = serenity::Client::builder(&config.token, intents)
    .framework(framework)
    .voice_manager_arc(manager)
    .await
    .inspect_err(|err| error!("Error creating client: {}", err))?;

  let shard_manager = Arc::clone(&client.shard_manager);
  tokio::spawn(async move {
    if let Err(err) = tokio::signal::ctrl_c().await {
      error!("failed to listen for Ctrl+C: {}", err);
      return;
    }
    info!("Shutting down");
    shard_manager.shutdown_all().await;
  });

  info!("Press Ctrl+C to exit");
  client.start().await?;
  info!("Program exited gracefully");
  Ok(())
}
