use poise::serenity_prelude as serenity;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("connection error: {0}")]
  Connection(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("encoding error: {0}")]
  Encoding(String),

  #[error("not found: {0}")]
  NotFound(&'static str),

  #[error("refusing to act on the bot's own invocation")]
  SelfInvocation,

  #[error("serenity error: {0}")]
  Framework(Box<serenity::Error>),
}

impl From<serenity::Error> for Error {
  fn from(value: serenity::Error) -> Self {
    Error::Framework(Box::new(value))
  }
}

impl From<audiopus::Error> for Error {
  fn from(value: audiopus::Error) -> Self {
    Error::Encoding(value.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
