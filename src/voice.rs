use std::{
  io::{self, Read, Seek, SeekFrom},
  sync::{Arc, Mutex},
};

use poise::serenity_prelude::{async_trait, ChannelId, GuildId};
use serde::Serialize;
use songbird::{
  error::JoinError,
  input::{AudioStream, Input, LiveInput},
  tracks::TrackHandle,
  Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use symphonia_core::io::MediaSource;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tracing::{debug, warn};

use crate::{
  clip::{BITRATE, CHANNELS, FRAME_SIZE, SAMPLE_RATE},
  error::{Error, Result},
  player::{VoiceConnector, VoiceSession},
};

/// Frames queued ahead of the mixer before `send_frame` starts waiting.
const FRAME_QUEUE_DEPTH: usize = 8;
const DCA_MAGIC: &[u8; 4] = b"DCA1";

pub struct SongbirdConnector {
  manager: Arc<Songbird>,
}

impl SongbirdConnector {
  pub fn new(manager: Arc<Songbird>) -> Self {
    Self { manager }
  }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
  type Session = SongbirdSession;

  async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<SongbirdSession> {
    let call = self
      .manager
      .join(guild_id, channel_id)
      .await
      .map_err(|err| Error::Connection(format!("failed to join voice channel: {err}")))?;

    Ok(SongbirdSession {
      manager: Arc::clone(&self.manager),
      guild_id,
      call,
      frames: None,
      track: None,
      ended: None,
    })
  }

  async fn release(&self, guild_id: GuildId) -> Result<()> {
    match self.manager.remove(guild_id).await {
      Ok(()) | Err(JoinError::NoCall) => Ok(()),
      Err(err) => Err(Error::Connection(format!("failed to release voice call: {err}"))),
    }
  }
}

pub struct SongbirdSession {
  manager: Arc<Songbird>,
  guild_id: GuildId,
  call: Arc<TokioMutex<Call>>,
  frames: Option<mpsc::Sender<Vec<u8>>>,
  track: Option<TrackHandle>,
  ended: Option<oneshot::Receiver<()>>,
}

#[async_trait]
impl VoiceSession for SongbirdSession {
  async fn start_speaking(&mut self) -> Result<()> {
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
    let stream = DcaFrameStream::new(frames_rx)?;
    let input = Input::Live(
      LiveInput::Raw(AudioStream {
        input: Box::new(stream) as Box<dyn MediaSource>,
        hint: None,
      }),
      None,
    );

    let track = self.call.lock().await.play_only_input(input);

    let (ended_tx, ended_rx) = oneshot::channel();
    let notifier = TrackEndNotifier {
      ended: Arc::new(Mutex::new(Some(ended_tx))),
    };
    for event in [TrackEvent::End, TrackEvent::Error] {
      track
        .add_event(Event::Track(event), notifier.clone())
        .map_err(|err| Error::Connection(format!("voice track unavailable: {err}")))?;
    }

    debug!(guild = %self.guild_id, "speaking");
    self.frames = Some(frames_tx);
    self.track = Some(track);
    self.ended = Some(ended_rx);
    Ok(())
  }

  async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
    let frames = self
      .frames
      .as_ref()
      .ok_or_else(|| Error::Connection("frame sent before speaking".to_string()))?;
    frames
      .send(frame.to_vec())
      .await
      .map_err(|_| Error::Connection("voice track stopped reading frames".to_string()))
  }

  async fn stop_speaking(&mut self) -> Result<()> {
    // Closing the queue ends the DCA stream once the mixer has read everything.
    self.frames = None;
    if let Some(ended) = self.ended.take() {
      if ended.await.is_err() {
        warn!(guild = %self.guild_id, "track dropped without an end event");
      }
    }
    self.track = None;
    debug!(guild = %self.guild_id, "stopped speaking");
    Ok(())
  }

  async fn disconnect(mut self) -> Result<()> {
    self.frames = None;
    if let Some(track) = self.track.take() {
      if let Err(err) = track.stop() {
        debug!(guild = %self.guild_id, "track already gone: {}", err);
      }
    }
    self
      .manager
      .remove(self.guild_id)
      .await
      .map_err(|err| Error::Connection(format!("failed to leave voice channel: {err}")))
  }
}

#[derive(Clone)]
struct TrackEndNotifier {
  ended: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
  async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
    if let EventContext::Track(states) = ctx {
      for (state, _handle) in *states {
        debug!(playing = ?state.playing, "track finished");
      }
    }
    let sender = self.ended.lock().ok().and_then(|mut ended| ended.take());
    if let Some(sender) = sender {
      if sender.send(()).is_err() {
        debug!("track end arrived after the session stopped waiting");
      }
    }
    Some(Event::Cancel)
  }
}

#[derive(Serialize)]
struct DcaMetadata {
  dca: DcaInfo,
  opus: DcaOpus,
}

#[derive(Serialize)]
struct DcaInfo {
  version: u64,
  tool: DcaTool,
}

#[derive(Serialize)]
struct DcaTool {
  name: &'static str,
  version: &'static str,
}

#[derive(Serialize)]
struct DcaOpus {
  mode: &'static str,
  sample_rate: u32,
  frame_size: u64,
  abr: Option<u64>,
  vbr: bool,
  channels: u8,
}

fn dca_header() -> Result<Vec<u8>> {
  let metadata = serde_json::to_vec(&DcaMetadata {
    dca: DcaInfo {
      version: 1,
      tool: DcaTool {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
      },
    },
    opus: DcaOpus {
      mode: "music",
      sample_rate: SAMPLE_RATE,
      frame_size: FRAME_SIZE as u64,
      abr: Some(BITRATE as u64),
      vbr: true,
      channels: CHANNELS as u8,
    },
  })
  .map_err(|err| Error::Encoding(format!("failed to write DCA metadata: {err}")))?;

  let metadata_len = i32::try_from(metadata.len())
    .map_err(|_| Error::Encoding("DCA metadata too large".to_string()))?;

  let mut header = Vec::with_capacity(DCA_MAGIC.len() + 4 + metadata.len());
  header.extend_from_slice(DCA_MAGIC);
  header.extend_from_slice(&metadata_len.to_le_bytes());
  header.extend_from_slice(&metadata);
  Ok(header)
}

/// Presents queued Opus frames to songbird as a DCA1 byte stream.
///
/// Reads block the mixer's decode thread until the next frame arrives or the
/// sending side is dropped, which ends the stream.
struct DcaFrameStream {
  frames: Mutex<mpsc::Receiver<Vec<u8>>>,
  pending: Vec<u8>,
  offset: usize,
}

impl DcaFrameStream {
  fn new(frames: mpsc::Receiver<Vec<u8>>) -> Result<Self> {
    Ok(Self {
      frames: Mutex::new(frames),
      pending: dca_header()?,
      offset: 0,
    })
  }

  fn refill(&mut self) -> io::Result<bool> {
    let next = self
      .frames
      .get_mut()
      .map_err(|_| io::Error::new(io::ErrorKind::Other, "frame queue poisoned"))?
      .blocking_recv();

    let Some(frame) = next else {
      return Ok(false);
    };
    let len = i16::try_from(frame.len())
      .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "opus frame too large for DCA"))?;

    self.pending.clear();
    self.pending.extend_from_slice(&len.to_le_bytes());
    self.pending.extend_from_slice(&frame);
    self.offset = 0;
    Ok(true)
  }
}

impl Read for DcaFrameStream {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }
    if self.offset >= self.pending.len() && !self.refill()? {
      return Ok(0);
    }
    let available = &self.pending[self.offset..];
    let count = available.len().min(buf.len());
    buf[..count].copy_from_slice(&available[..count]);
    self.offset += count;
    Ok(count)
  }
}

impl Seek for DcaFrameStream {
  fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "live frame stream cannot seek"))
  }
}

impl MediaSource for DcaFrameStream {
  fn is_seekable(&self) -> bool {
    false
  }

  fn byte_len(&self) -> Option<u64> {
    None
  }
}
