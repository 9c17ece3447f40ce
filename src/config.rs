use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
  error::{Error, Result},
  player::PlayerConfig,
};

pub const DEFAULT_CLIP_PATH: &str = "files/legoYoda.mp3";

/// Command line and environment configuration. `.env` is loaded before parsing.
#[derive(Parser, Clone)]
#[command(name = "shagohad", version, about = "Discord bot that plays Lego Yoda into voice channels")]
pub struct Config {
  /// Bot access token
  #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true, default_value = "")]
  pub token: String,

  /// Audio asset encoded once at startup and replayed by /play-yoda
  #[arg(long, env = "YODA_CLIP", default_value = DEFAULT_CLIP_PATH)]
  pub clip: PathBuf,

  /// Register commands in this guild only instead of globally
  #[arg(long, env = "DEV_GUILD_ID")]
  pub guild_id: Option<u64>,

  /// Encoder executable used to decode the asset to PCM
  #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
  pub ffmpeg: PathBuf,

  #[arg(long, env = "VOICE_SETTLE_MS", default_value_t = 250)]
  pub settle_ms: u64,

  #[arg(long, env = "VOICE_JOIN_TIMEOUT_SECS", default_value_t = 10)]
  pub join_timeout_secs: u64,

  #[arg(long, env = "VOICE_FRAME_TIMEOUT_SECS", default_value_t = 5)]
  pub frame_timeout_secs: u64,

  #[arg(long, env = "VOICE_DRAIN_TIMEOUT_SECS", default_value_t = 15)]
  pub drain_timeout_secs: u64,
}

impl Config {
  /// Fails fast on a missing or blank token; clap alone would accept `--token ""`.
  pub fn validate(mut self) -> Result<Self> {
    self.token = self.token.trim().to_string();
    if self.token.is_empty() {
      return Err(Error::Configuration(
        "bot token required, pass --token or set DISCORD_TOKEN".to_string(),
      ));
    }
    if self.guild_id == Some(0) {
      return Err(Error::Configuration("guild id must be non-zero".to_string()));
    }
    if self.clip.as_os_str().is_empty() {
      return Err(Error::Configuration("clip path must not be empty".to_string()));
    }
    Ok(self)
  }

  pub fn player_config(&self) -> PlayerConfig {
    PlayerConfig {
      settle_delay: Duration::from_millis(self.settle_ms),
      join_timeout: Duration::from_secs(self.join_timeout_secs),
      frame_timeout: Duration::from_secs(self.frame_timeout_secs),
      drain_timeout: Duration::from_secs(self.drain_timeout_secs),
    }
  }
}

impl std::fmt::Debug for Config {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Config")
      .field("token", &"<redacted>")
      .field("clip", &self.clip)
      .field("guild_id", &self.guild_id)
      .field("ffmpeg", &self.ffmpeg)
      .field("settle_ms", &self.settle_ms)
      .field("join_timeout_secs", &self.join_timeout_secs)
      .field("frame_timeout_secs", &self.frame_timeout_secs)
      .field("drain_timeout_secs", &self.drain_timeout_secs)
      .finish()
  }
}
