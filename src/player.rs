use std::{future::Future, time::Duration};

use poise::serenity_prelude::{async_trait, ChannelId, GuildId};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::{
  clip::FrameBuffer,
  error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
  Idle,
  Joining,
  Speaking,
  Draining,
  Disconnected,
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
  /// Pause after joining and again before leaving.
  pub settle_delay: Duration,
  pub join_timeout: Duration,
  pub frame_timeout: Duration,
  pub drain_timeout: Duration,
}

#[async_trait]
pub trait VoiceConnector: Send + Sync {
  type Session: VoiceSession;

  async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<Self::Session>;

  /// Drops whatever connection state a failed or abandoned join left behind.
  async fn release(&self, guild_id: GuildId) -> Result<()>;
}

/// One live voice connection, owned by a single playback.
#[async_trait]
pub trait VoiceSession: Send {
  async fn start_speaking(&mut self) -> Result<()>;

  /// May wait while the transport is behind.
  async fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

  /// Marks transmission finished and waits for queued frames to play out.
  async fn stop_speaking(&mut self) -> Result<()>;

  async fn disconnect(self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
  pub frames_sent: usize,
  pub state: PlaybackState,
}

pub struct VoicePlayer<C> {
  connector: C,
  config: PlayerConfig,
}

impl<C: VoiceConnector> VoicePlayer<C> {
  pub fn new(connector: C, config: PlayerConfig) -> Self {
    Self { connector, config }
  }

  /// Joins the channel, streams every frame in order and leaves again.
  pub async fn play(&self, guild_id: GuildId, channel_id: ChannelId, buffer: &FrameBuffer) -> Result<PlaybackReport> {
    let mut state = PlaybackState::Idle;
    transition(&mut state, PlaybackState::Joining, guild_id);

    let joined = bounded(
      self.config.join_timeout,
      "voice join",
      self.connector.join(guild_id, channel_id),
    )
    .await;
    let mut session = match joined {
      Ok(session) => session,
      Err(err) => {
        warn!(guild = %guild_id, channel = %channel_id, "voice join failed: {}", err);
        if let Err(release_err) = self.connector.release(guild_id).await {
          warn!(guild = %guild_id, "releasing the abandoned join failed: {}", release_err);
        }
        return Err(err);
      },
    };
    info!(guild = %guild_id, channel = %channel_id, "joined voice channel");

    if let Err(err) = self.stream(&mut session, &mut state, guild_id, buffer).await {
      warn!(guild = %guild_id, "playback failed, leaving channel: {}", err);
      if let Err(leave_err) = session.disconnect().await {
        warn!(guild = %guild_id, "disconnect after failure also failed: {}", leave_err);
      }
      return Err(err);
    }

    session.disconnect().await?;
    transition(&mut state, PlaybackState::Disconnected, guild_id);
    info!(guild = %guild_id, frames = buffer.len(), "playback finished");

    Ok(PlaybackReport {
      frames_sent: buffer.len(),
      state,
    })
  }

  async fn stream(
    &self,
    session: &mut C::Session,
    state: &mut PlaybackState,
    guild_id: GuildId,
    buffer: &FrameBuffer,
  ) -> Result<()> {
    sleep(self.config.settle_delay).await;
    session.start_speaking().await?;
    transition(state, PlaybackState::Speaking, guild_id);

    if buffer.is_empty() {
      debug!(guild = %guild_id, "empty frame buffer, nothing to send");
    }
    for (index, frame) in buffer.frames().iter().enumerate() {
      trace!(index, bytes = frame.len(), "sending frame");
      bounded(self.config.frame_timeout, "frame send", session.send_frame(frame)).await?;
    }

    transition(state, PlaybackState::Draining, guild_id);
    bounded(self.config.drain_timeout, "voice drain", session.stop_speaking()).await?;

    sleep(self.config.settle_delay).await;
    Ok(())
  }
}

fn transition(state: &mut PlaybackState, next: PlaybackState, guild_id: GuildId) {
  debug!(guild = %guild_id, from = ?state, to = ?next, "playback state");
  *state = next;
}

async fn bounded<T>(limit: Duration, what: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
  match timeout(limit, fut).await {
    Ok(result) => result,
    Err(_) => Err(Error::Connection(format!("{what} timed out after {limit:?}"))),
  }
}
