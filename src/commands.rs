use std::collections::HashMap;

use poise::serenity_prelude as serenity;
use serenity::{async_trait, CreateCommand};
use tracing::{debug, info};

use crate::{
  error::{Error, Result},
  routing::Invocation,
};

pub const HELLO_WORLD_COMMAND_NAME: &str = "test-command";
pub const PLAY_LEGO_YODA_COMMAND_NAME: &str = "play-yoda";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
  HelloWorld,
  PlayLegoYoda,
}

impl CommandKind {
  /// Commands whose handler outlives the acknowledgment window get deferred first.
  pub fn is_deferred(self) -> bool {
    match self {
      CommandKind::HelloWorld => false,
      CommandKind::PlayLegoYoda => true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
  pub kind: CommandKind,
  pub name: &'static str,
  pub description: &'static str,
}

impl CommandDefinition {
  pub fn to_create_command(&self) -> CreateCommand {
    CreateCommand::new(self.name).description(self.description)
  }
}

/// The commands the bot declares at startup, in registration order.
pub fn command_list() -> Vec<CommandDefinition> {
  vec![
    CommandDefinition {
      kind: CommandKind::HelloWorld,
      name: HELLO_WORLD_COMMAND_NAME,
      description: "Shagohad says hello",
    },
    CommandDefinition {
      kind: CommandKind::PlayLegoYoda,
      name: PLAY_LEGO_YODA_COMMAND_NAME,
      description: "Play a fun noise from a cute critter",
    },
  ]
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
  /// Produces the single reply for one invocation. Failures are folded into the reply.
  async fn handle(&self, command: CommandKind, invocation: &Invocation) -> String;
}

pub struct CommandRegistry {
  ordered: Vec<CommandDefinition>,
  by_name: HashMap<&'static str, usize>,
}

impl CommandRegistry {
  pub fn register(commands: Vec<CommandDefinition>) -> Result<Self> {
    let mut by_name = HashMap::with_capacity(commands.len());
    for (index, command) in commands.iter().enumerate() {
      if by_name.insert(command.name, index).is_some() {
        return Err(Error::Configuration(format!(
          "duplicate command name '{}'",
          command.name
        )));
      }
    }
    info!(count = commands.len(), "command registry built");
    Ok(Self { ordered: commands, by_name })
  }

  pub fn get(&self, name: &str) -> Option<&CommandDefinition> {
    self.by_name.get(name).map(|index| &self.ordered[*index])
  }

  pub fn definitions(&self) -> &[CommandDefinition] {
    &self.ordered
  }

  pub fn create_commands(&self) -> Vec<CreateCommand> {
    self.ordered.iter().map(CommandDefinition::to_create_command).collect()
  }

  /// Unknown names are ignored and yield no reply.
  pub async fn dispatch<H>(&self, name: &str, handler: &H, invocation: &Invocation) -> Option<String>
  where
    H: CommandHandler + ?Sized,
  {
    let Some(definition) = self.get(name) else {
      debug!(command = name, "ignoring unknown command");
      return None;
    };
    info!(command = definition.name, user = %invocation.user_id, "dispatching command");
    Some(handler.handle(definition.kind, invocation).await)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::serenity::UserId;

  use super::*;

  #[derive(Default)]
  struct RecordingHandler {
    calls: Mutex<Vec<CommandKind>>,
  }

  #[async_trait]
  impl CommandHandler for RecordingHandler {
    async fn handle(&self, command: CommandKind, _invocation: &Invocation) -> String {
      self.calls.lock().unwrap().push(command);
      format!("{command:?}")
    }
  }

  fn invocation() -> Invocation {
    Invocation {
      user_id: UserId::new(7),
      bot_id: UserId::new(1),
      guild: None,
    }
  }

  #[test]
  fn register_rejects_duplicate_names() {
    let mut commands = command_list();
    commands.push(CommandDefinition {
      kind: CommandKind::PlayLegoYoda,
      name: HELLO_WORLD_COMMAND_NAME,
      description: "again",
    });
    match CommandRegistry::register(commands) {
      Err(Error::Configuration(message)) => assert!(message.contains(HELLO_WORLD_COMMAND_NAME)),
      Err(other) => panic!("unexpected error {other}"),
      Ok(_) => panic!("duplicate names must not register"),
    }
  }

  #[test]
  fn registry_keeps_declaration_order() {
    let registry = CommandRegistry::register(command_list()).unwrap();
    let names: Vec<_> = registry.definitions().iter().map(|c| c.name).collect();
    assert_eq!(names, vec![HELLO_WORLD_COMMAND_NAME, PLAY_LEGO_YODA_COMMAND_NAME]);
    assert_eq!(registry.create_commands().len(), 2);
  }

  #[tokio::test]
  async fn dispatch_invokes_exactly_the_registered_handler() {
    let registry = CommandRegistry::register(command_list()).unwrap();
    let handler = RecordingHandler::default();

    for definition in command_list() {
      let reply = registry.dispatch(definition.name, &handler, &invocation()).await;
      assert_eq!(reply, Some(format!("{:?}", definition.kind)));
    }

    assert_eq!(
      *handler.calls.lock().unwrap(),
      vec![CommandKind::HelloWorld, CommandKind::PlayLegoYoda]
    );
  }

  #[tokio::test]
  async fn dispatch_of_unknown_name_is_a_no_op() {
    let registry = CommandRegistry::register(command_list()).unwrap();
    let handler = RecordingHandler::default();

    assert_eq!(registry.dispatch("play-vader", &handler, &invocation()).await, None);
    assert!(handler.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn only_playback_is_deferred() {
    assert!(!CommandKind::HelloWorld.is_deferred());
    assert!(CommandKind::PlayLegoYoda.is_deferred());
  }
}
