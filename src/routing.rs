use std::collections::HashMap;

use poise::serenity_prelude as serenity;
use serenity::{ChannelId, GuildId, UserId};

use crate::error::{Error, Result};

/// Voice presence of one guild, copied out of the gateway cache at invocation time.
#[derive(Debug, Clone)]
pub struct GuildVoiceSnapshot {
  pub guild_id: GuildId,
  pub voice_states: HashMap<UserId, ChannelId>,
}

impl GuildVoiceSnapshot {
  pub fn new(guild_id: GuildId, voice_states: impl IntoIterator<Item = (UserId, ChannelId)>) -> Self {
    Self {
      guild_id,
      voice_states: voice_states.into_iter().collect(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Invocation {
  pub user_id: UserId,
  pub bot_id: UserId,
  /// `None` for direct messages or a guild missing from the cache.
  pub guild: Option<GuildVoiceSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceTarget {
  pub guild_id: GuildId,
  pub channel_id: ChannelId,
}

/// Finds the voice channel the requester currently occupies in the invoking guild.
pub fn resolve_voice_target(invocation: &Invocation) -> Result<VoiceTarget> {
  if invocation.user_id == invocation.bot_id {
    return Err(Error::SelfInvocation);
  }

  let guild = invocation.guild.as_ref().ok_or(Error::NotFound("guild"))?;

  let channel_id = guild
    .voice_states
    .get(&invocation.user_id)
    .copied()
    .ok_or(Error::NotFound("voice channel"))?;

  Ok(VoiceTarget {
    guild_id: guild.guild_id,
    channel_id,
  })
}
