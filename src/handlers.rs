use poise::serenity_prelude::async_trait;
use tracing::{error, info};

use crate::{
  clip::FrameBuffer,
  commands::{CommandHandler, CommandKind},
  error::Result,
  player::{PlaybackReport, VoiceConnector, VoicePlayer},
  routing::{resolve_voice_target, Invocation},
};

pub const HELLO_WORLD_REPLY: &str = "Now you owe me 2000$ÃŸ";
pub const PLAY_LEGO_YODA_REPLY: &str = "Crush my cock with a rock I must";
pub const PLAY_LEGO_YODA_FAILED_REPLY: &str = "Error playing Lego Yoda!";

pub struct BotCommands<C> {
  player: VoicePlayer<C>,
  lego_yoda: FrameBuffer,
}

impl<C: VoiceConnector> BotCommands<C> {
  pub fn new(player: VoicePlayer<C>, lego_yoda: FrameBuffer) -> Self {
    Self { player, lego_yoda }
  }

  async fn play_lego_yoda(&self, invocation: &Invocation) -> Result<PlaybackReport> {
    let target = resolve_voice_target(invocation)?;
    self
      .player
      .play(target.guild_id, target.channel_id, &self.lego_yoda)
      .await
  }
}

#[async_trait]
impl<C: VoiceConnector> CommandHandler for BotCommands<C> {
  async fn handle(&self, command: CommandKind, invocation: &Invocation) -> String {
    match command {
      CommandKind::HelloWorld => {
        info!(user = %invocation.user_id, "saying hello");
        HELLO_WORLD_REPLY.to_string()
      },
      CommandKind::PlayLegoYoda => {
        match self.play_lego_yoda(invocation).await {
          Ok(report) => {
            info!(frames = report.frames_sent, state = ?report.state, "played Lego Yoda");
            PLAY_LEGO_YODA_REPLY.to_string()
          },
          Err(err) => {
            error!(user = %invocation.user_id, "could not play Lego Yoda: {}", err);
            PLAY_LEGO_YODA_FAILED_REPLY.to_string()
          },
        }
      },
    }
  }
}
