use std::{
  path::{Path, PathBuf},
  process::Stdio,
  sync::Arc,
};

use audiopus::{coder::Encoder as OpusEncoder, Application, Bitrate, Channels, SampleRate};
use poise::serenity_prelude::async_trait;
use tokio::{
  io::AsyncReadExt,
  process::{Child, ChildStdout, Command},
};
use tracing::{debug, info, trace};

use crate::error::{Error, Result};

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: usize = 2;
/// Samples per channel in one 20ms frame.
pub const FRAME_SIZE: usize = 960;
pub const BITRATE: i32 = 64_000;
const PCM_FRAME_BYTES: usize = FRAME_SIZE * CHANNELS * 2;
const MAX_PACKET_BYTES: usize = 4_000;

/// Opus frames of one asset, in encode order. Cloning shares the frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
  frames: Arc<[Vec<u8>]>,
}

impl FrameBuffer {
  pub fn new(frames: Vec<Vec<u8>>) -> Self {
    Self { frames: frames.into() }
  }

  pub fn frames(&self) -> &[Vec<u8>] {
    &self.frames
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

#[async_trait]
pub trait FrameSource: Send {
  /// `Ok(None)` marks end of stream.
  async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
pub trait ClipEncoder: Send + Sync {
  async fn encode(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// Reads an asset to an ordered frame buffer. Runs once per asset at startup.
pub async fn prepare<E>(path: &Path, encoder: &E) -> Result<FrameBuffer>
where
  E: ClipEncoder + ?Sized,
{
  info!(path = %path.display(), "preparing clip");
  let file = tokio::fs::File::open(path).await?;

  let mut source = encoder.encode(path).await?;
  let mut frames = Vec::new();
  while let Some(frame) = source.next_frame().await? {
    trace!(index = frames.len(), bytes = frame.len(), "encoded frame");
    frames.push(frame);
  }
  drop(file);

  if frames.is_empty() {
    return Err(Error::Encoding(format!("{} produced no audio frames", path.display())));
  }
  info!(path = %path.display(), frames = frames.len(), "clip ready");
  Ok(FrameBuffer::new(frames))
}

/// Decodes with an ffmpeg child process and encodes 20ms stereo Opus frames in-process.
pub struct FfmpegOpusEncoder {
  ffmpeg: PathBuf,
}

impl FfmpegOpusEncoder {
  pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
    Self { ffmpeg: ffmpeg.into() }
  }
}

#[async_trait]
impl ClipEncoder for FfmpegOpusEncoder {
  async fn encode(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
    let mut child = Command::new(&self.ffmpeg)
      .args(["-hide_banner", "-loglevel", "error", "-i"])
      .arg(path)
      .args(["-f", "s16le", "-ar", "48000", "-ac", "2", "pipe:1"])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
      .map_err(|err| Error::Encoding(format!("failed to start {}: {}", self.ffmpeg.display(), err)))?;
    debug!(ffmpeg = %self.ffmpeg.display(), "encoder process started");

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| Error::Encoding("encoder stdout unavailable".to_string()))?;

    let mut encoder = OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)?;
    encoder.set_bitrate(Bitrate::BitsPerSecond(BITRATE))?;

    Ok(Box::new(PcmOpusSource {
      child: Some(child),
      stdout,
      encoder,
      pcm: vec![0; PCM_FRAME_BYTES],
      samples: vec![0; FRAME_SIZE * CHANNELS],
      packet: vec![0; MAX_PACKET_BYTES],
    }))
  }
}

struct PcmOpusSource {
  child: Option<Child>,
  stdout: ChildStdout,
  encoder: OpusEncoder,
  pcm: Vec<u8>,
  samples: Vec<i16>,
  packet: Vec<u8>,
}

impl PcmOpusSource {
  /// Fills `pcm` as far as the stream allows, returning the bytes read.
  async fn read_pcm_frame(&mut self) -> Result<usize> {
    let mut filled = 0;
    while filled < self.pcm.len() {
      let read = self
        .stdout
        .read(&mut self.pcm[filled..])
        .await
        .map_err(|err| Error::Encoding(format!("failed to read encoder output: {err}")))?;
      if read == 0 {
        break;
      }
      filled += read;
    }
    Ok(filled)
  }

  async fn finish(&mut self) -> Result<()> {
    if let Some(mut child) = self.child.take() {
      let status = child
        .wait()
        .await
        .map_err(|err| Error::Encoding(format!("failed to wait for encoder: {err}")))?;
      if !status.success() {
        return Err(Error::Encoding(format!("encoder exited with {status}")));
      }
    }
    Ok(())
  }
}

#[async_trait]
impl FrameSource for PcmOpusSource {
  async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
    let filled = self.read_pcm_frame().await?;
    if filled == 0 {
      self.finish().await?;
      return Ok(None);
    }
    // Short tail gets padded with silence.
    self.pcm[filled..].fill(0);

    for (sample, bytes) in self.samples.iter_mut().zip(self.pcm.chunks_exact(2)) {
      *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
    }
    let len = self.encoder.encode(&self.samples, &mut self.packet)?;
    Ok(Some(self.packet[..len].to_vec()))
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  /// Splits the file contents into fixed-size "frames"; stands in for ffmpeg and Opus.
  struct ChunkEncoder {
    chunk: usize,
  }

  struct ChunkSource {
    chunks: std::vec::IntoIter<Vec<u8>>,
  }

  #[async_trait]
  impl FrameSource for ChunkSource {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
      Ok(self.chunks.next())
    }
  }

  #[async_trait]
  impl ClipEncoder for ChunkEncoder {
    async fn encode(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
      let bytes = tokio::fs::read(path).await?;
      let chunks: Vec<Vec<u8>> = bytes.chunks(self.chunk).map(<[u8]>::to_vec).collect();
      Ok(Box::new(ChunkSource { chunks: chunks.into_iter() }))
    }
  }

  struct FailingEncoder {
    after: usize,
  }

  struct FailingSource {
    remaining: usize,
  }

  #[async_trait]
  impl FrameSource for FailingSource {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
      if self.remaining == 0 {
        return Err(Error::Encoding("corrupt stream".to_string()));
      }
      self.remaining -= 1;
      Ok(Some(vec![0xF8, 0xFF, 0xFE]))
    }
  }

  #[async_trait]
  impl ClipEncoder for FailingEncoder {
    async fn encode(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
      Ok(Box::new(FailingSource { remaining: self.after }))
    }
  }

  fn asset(contents: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents).unwrap();
    file.flush().unwrap();
    file
  }

  #[tokio::test]
  async fn prepare_buffers_frames_in_encode_order() {
    let file = asset(b"abcdefghij");
    let buffer = prepare(file.path(), &ChunkEncoder { chunk: 4 }).await.unwrap();

    assert_eq!(
      buffer.frames(),
      &[b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]
    );
  }

  #[tokio::test]
  async fn prepare_is_stable_for_identical_input() {
    let file = asset(&(0..=255u8).cycle().take(5_000).collect::<Vec<_>>());
    let encoder = ChunkEncoder { chunk: 160 };

    let first = prepare(file.path(), &encoder).await.unwrap();
    let second = prepare(file.path(), &encoder).await.unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("legoYoda.mp3");

    let result = prepare(&missing, &ChunkEncoder { chunk: 4 }).await;
    assert!(matches!(result, Err(Error::Io(_))));
  }

  #[tokio::test]
  async fn encoder_failure_discards_partial_frames() {
    let file = asset(b"irrelevant");
    let result = prepare(file.path(), &FailingEncoder { after: 3 }).await;
    assert!(matches!(result, Err(Error::Encoding(_))));
  }

  #[tokio::test]
  async fn empty_asset_is_an_encoding_error() {
    let file = asset(b"");
    let result = prepare(file.path(), &ChunkEncoder { chunk: 4 }).await;
    assert!(matches!(result, Err(Error::Encoding(_))));
  }

  #[tokio::test]
  async fn missing_encoder_binary_is_an_encoding_error() {
    let file = asset(b"not audio");
    let encoder = FfmpegOpusEncoder::new("/nonexistent/ffmpeg-for-tests");
    let result = prepare(file.path(), &encoder).await;
    assert!(matches!(result, Err(Error::Encoding(_))));
  }

  /// Writes an executable stand-in for ffmpeg that ignores its arguments.
  #[cfg(unix)]
  fn fake_ffmpeg(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.path().join("ffmpeg");
    std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn pcm_stream_is_cut_into_frames_with_a_padded_tail() {
    let dir = tempfile::tempdir().unwrap();
    let pcm_bytes = PCM_FRAME_BYTES * 2 + 100;
    let ffmpeg = fake_ffmpeg(&dir, &format!("head -c {pcm_bytes} /dev/zero"));
    let file = asset(b"not audio");

    let buffer = prepare(file.path(), &FfmpegOpusEncoder::new(ffmpeg)).await.unwrap();

    assert_eq!(buffer.len(), 3);
    assert!(buffer.frames().iter().all(|frame| !frame.is_empty() && frame.len() <= MAX_PACKET_BYTES));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn encoder_exit_failure_is_an_encoding_error() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(&dir, "exit 1");
    let file = asset(b"not audio");

    let result = prepare(file.path(), &FfmpegOpusEncoder::new(ffmpeg)).await;
    assert!(matches!(result, Err(Error::Encoding(_))));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn frames_written_before_a_failing_exit_are_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(&dir, &format!("head -c {PCM_FRAME_BYTES} /dev/zero\nexit 3"));
    let file = asset(b"not audio");

    let result = prepare(file.path(), &FfmpegOpusEncoder::new(ffmpeg)).await;
    assert!(matches!(result, Err(Error::Encoding(_))));
  }

  #[test]
  fn cloned_buffers_share_frames() {
    let buffer = FrameBuffer::new(vec![vec![1], vec![2]]);
    let clone = buffer.clone();
    assert!(std::ptr::eq(buffer.frames(), clone.frames()));
    assert_eq!(clone.len(), 2);
  }
}
