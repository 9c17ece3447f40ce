use std::sync::Arc;

use poise::serenity_prelude as serenity;
use serenity::{
  Command, CommandInteraction, CreateInteractionResponse, CreateInteractionResponseMessage,
  EditInteractionResponse, GuildId,
};
use songbird::Songbird;
use tracing::{debug, error, info, warn};

use crate::{
  clip::FrameBuffer,
  commands::CommandRegistry,
  error::Error,
  handlers::BotCommands,
  player::{PlayerConfig, VoicePlayer},
  routing::{GuildVoiceSnapshot, Invocation},
  voice::SongbirdConnector,
};

pub struct Data {
  registry: CommandRegistry,
  commands: BotCommands<SongbirdConnector>,
}

/// Everything the framework needs to build `Data` once the gateway is ready.
pub struct BotSetup {
  pub registry: CommandRegistry,
  pub lego_yoda: FrameBuffer,
  pub player_config: PlayerConfig,
  pub guild_id: Option<GuildId>,
}

/// Copies the requester's identity and the guild's voice presence out of the cache.
fn invocation_for(ctx: &serenity::Context, command: &CommandInteraction) -> Invocation {
  let user_id = command
    .member
    .as_ref()
    .map_or(command.user.id, |member| member.user.id);
  let bot_id = ctx.cache.current_user().id;

  let guild = command.guild_id.and_then(|guild_id| {
    ctx.cache.guild(guild_id).map(|guild| {
      GuildVoiceSnapshot::new(
        guild_id,
        guild
          .voice_states
          .values()
          .filter_map(|state| state.channel_id.map(|channel_id| (state.user_id, channel_id))),
      )
    })
  });
  if command.guild_id.is_some() && guild.is_none() {
    warn!(guild = ?command.guild_id, "guild missing from cache");
  }

  Invocation {
    user_id,
    bot_id,
    guild,
  }
}

async fn handle_command(ctx: &serenity::Context, command: &CommandInteraction, data: &Data) -> Result<(), Error> {
  let name = command.data.name.as_str();
  let Some(definition) = data.registry.get(name) else {
    debug!(command = name, "ignoring interaction for unregistered command");
    return Ok(());
  };

  let deferred = definition.kind.is_deferred();
  if deferred {
    command.defer(ctx).await?;
  }

  let invocation = invocation_for(ctx, command);
  let Some(content) = data.registry.dispatch(name, &data.commands, &invocation).await else {
    return Ok(());
  };

  if deferred {
    command
      .edit_response(ctx, EditInteractionResponse::new().content(content))
      .await?;
  } else {
    command
      .create_response(
        ctx,
        CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().content(content)),
      )
      .await?;
  }
  Ok(())
}

async fn poise_event_handler(
  ctx: &serenity::Context,
  event: &serenity::FullEvent,
  _framework: poise::FrameworkContext<'_, Data, Error>,
  data: &Data,
) -> Result<(), Error> {
  match event {
    serenity::FullEvent::InteractionCreate { interaction } => {
      if let serenity::Interaction::Command(command) = interaction {
        if let Err(err) = handle_command(ctx, command, data).await {
          error!(command = %command.data.name, "failed to answer interaction: {}", err);
        }
      }
    },
    _ => {},
  }
  Ok(())
}

fn get_framework_options() -> poise::FrameworkOptions<Data, Error> {
  poise::FrameworkOptions {
    event_handler: |ctx, event, framework, data| Box::pin(poise_event_handler(ctx, event, framework, data)),
    on_error: |error| {
      Box::pin(async move {
        match error {
          // Slash commands are dispatched by the registry, not by poise.
          poise::FrameworkError::UnknownInteraction { .. } => {},
          other => {
            if let Err(err) = poise::builtins::on_error(other).await {
              error!("error while handling framework error: {}", err);
            }
          },
        }
      })
    },
    ..Default::default()
  }
}

pub fn get_framework(songbird: Arc<Songbird>, setup: BotSetup) -> poise::Framework<Data, Error> {
  poise::Framework::builder()
    .options(get_framework_options())
    .setup(move |ctx, ready, _framework| {
      Box::pin(async move {
        info!("Logged in as {}", ready.user.name);

        let BotSetup {
          registry,
          lego_yoda,
          player_config,
          guild_id,
        } = setup;

        let create_commands = registry.create_commands();
        match guild_id {
          Some(guild_id) => {
            info!(guild = %guild_id, "registering commands in development guild");
            guild_id.set_commands(&ctx.http, create_commands).await?;
          },
          None => {
            info!("registering commands globally");
            Command::set_global_commands(&ctx.http, create_commands).await?;
          },
        }
        for definition in registry.definitions() {
          info!(command = definition.name, "registered command");
        }

        let player = VoicePlayer::new(SongbirdConnector::new(songbird), player_config);
        Ok(Data {
          registry,
          commands: BotCommands::new(player, lego_yoda),
        })
      })
    })
    .build()
}
