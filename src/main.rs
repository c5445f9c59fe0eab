mod config;
mod openai;
mod pipeline;
mod telegram;

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use openai::Models;
use pipeline::{run_voice_pipeline, GREETING};
use telegram::TelegramClient;

struct BotState {
    telegram: TelegramClient,
    openai: openai::Client,
}

impl BotState {
    fn new(config: &Config, bot: &Bot) -> Self {
        let models = Models {
            chat: config.chat_model.clone(),
            transcription: config.transcription_model.clone(),
            speech: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
        };

        Self {
            telegram: TelegramClient::new(bot.clone()),
            openai: openai::Client::new(config.openai_api_key.clone(), models),
        }
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    /// Show the welcome message.
    Start,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "voxrelay.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("voxrelay.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting voxrelay...");
    info!("Loaded config from {config_path}");
    info!("Chat model: {}, TTS voice: {}", config.chat_model, config.tts_voice);

    let state = Arc::new(BotState::new(&config, &bot));

    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(handle_voice),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, GREETING).await?;
        }
    }
    Ok(())
}

async fn handle_voice(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(voice) = msg.voice() else {
        return Ok(());
    };
    let file_id = voice.file.id.0.clone();
    let chat_id = msg.chat.id.0;

    info!("🎤 Voice message in chat {} ({} bytes)", chat_id, voice.file.size);

    // No size/format filtering here; the transcription service applies its
    // own acceptance rules. A failed invocation ends without a user-visible
    // reply, the process keeps serving other chats.
    if let Err(e) = run_voice_pipeline(&state.telegram, &state.openai, chat_id, &file_id).await {
        warn!("Voice pipeline failed for chat {}: {}", chat_id, e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_command_parses() {
        assert!(matches!(
            Command::parse("/start", "voxrelay_bot"),
            Ok(Command::Start)
        ));
        assert!(matches!(
            Command::parse("/start@voxrelay_bot", "voxrelay_bot"),
            Ok(Command::Start)
        ));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Command::parse("/stop", "voxrelay_bot").is_err());
        assert!(Command::parse("not a command", "voxrelay_bot").is_err());
    }
}
