//! Command-line host: runs an agent on a local in-memory channel.

use crate::agent::{Agent, ERROR_PREFIX, PLACEHOLDER_TEXT};
use crate::channel::{AiState, ChannelEvent, ChatSession, MemoryChannel};
use crate::config::Config;
use crate::provider::Provider;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

const LOCAL_CID: &str = "messaging:local";
const LOCAL_USER: &str = "you";

/// AI responder for chat channels
#[derive(Parser, Debug)]
#[command(name = "herald", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Provider to use (google, huggingface)
    #[arg(short, long, global = true)]
    pub provider: Option<Provider>,

    /// Model override (e.g., "gemini-2.0-flash")
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message and print the agent's reply
    Ask(AskArgs),
    /// Chat with the agent line by line on stdin
    Chat(ChatArgs),
    /// Show the config file path
    ConfigPath,
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    /// Message text (use "-" to read from stdin)
    #[arg(required = true)]
    pub message: String,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Reply text only
    #[default]
    Text,
    /// Every channel event as a JSON line
    Json,
}

/// How a turn ended, as seen from the channel.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Answer(String),
    Failed(String),
}

/// Run the CLI.
pub async fn run(cli: Cli) -> ExitCode {
    match run_inner(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<ExitCode> {
    if let Commands::ConfigPath = cli.command {
        let path = cli.config.clone().unwrap_or_else(Config::default_path);
        println!("{}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Ask(args) => ask(config, args).await,
        Commands::Chat(args) => chat(config, args).await,
        Commands::ConfigPath => Ok(ExitCode::SUCCESS),
    }
}

/// Config file, then environment, then CLI flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if let Some(ref model) = cli.model {
        config.model = Some(model.clone());
    }
    Ok(config)
}

async fn start_agent(config: Config) -> Result<(Arc<MemoryChannel>, Agent)> {
    let channel = Arc::new(MemoryChannel::new(
        LOCAL_CID,
        config.agent_user_id.clone(),
    ));
    let agent = Agent::new(channel.clone(), config);
    agent.init().await.context("Failed to start agent")?;
    Ok((channel, agent))
}

async fn ask(config: Config, args: AskArgs) -> Result<ExitCode> {
    let message = if args.message == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer.trim().to_string()
    } else {
        args.message
    };
    if message.is_empty() {
        anyhow::bail!("Empty message");
    }

    let (channel, agent) = start_agent(config).await?;
    let mut events = channel.subscribe();
    channel.post_user_message(LOCAL_USER, &message);

    let reply = wait_for_reply(&channel, &mut events, args.output_format).await;
    agent.dispose().await?;

    Ok(print_reply(&reply?, args.output_format))
}

async fn chat(config: Config, args: ChatArgs) -> Result<ExitCode> {
    let (channel, agent) = start_agent(config).await?;
    let mut events = channel.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if args.output_format == OutputFormat::Text {
        eprintln!("Connected. Type a message, or /quit to exit.");
    }

    loop {
        if args.output_format == OutputFormat::Text {
            eprint!("> ");
            io::stderr().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "/quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        channel.post_user_message(LOCAL_USER, line);
        let reply = wait_for_reply(&channel, &mut events, args.output_format).await?;
        print_reply(&reply, args.output_format);
    }

    agent.dispose().await?;
    Ok(ExitCode::SUCCESS)
}

/// Follow channel events until the next DONE or ERROR indicator.
async fn wait_for_reply(
    channel: &MemoryChannel,
    events: &mut broadcast::Receiver<ChannelEvent>,
    output_format: OutputFormat,
) -> Result<Reply> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Missed channel events");
                continue;
            }
            Err(RecvError::Closed) => anyhow::bail!("Channel closed before the agent replied"),
        };

        if output_format == OutputFormat::Json {
            println!("{}", serde_json::to_string(&event)?);
        }

        if let ChannelEvent::AiIndicator(indicator) = event {
            match indicator.ai_state {
                AiState::Thinking => {
                    if output_format == OutputFormat::Text {
                        eprintln!("{PLACEHOLDER_TEXT}");
                    }
                }
                AiState::Done => {
                    let text = indicator
                        .message_id
                        .and_then(|id| channel.message(&id))
                        .map(|m| m.text)
                        .unwrap_or_default();
                    return Ok(Reply::Answer(text));
                }
                AiState::Error => return Ok(Reply::Failed(last_error_text(channel))),
            }
        }
    }
}

/// The ERROR indicator carries no message id; find the error post instead.
fn last_error_text(channel: &MemoryChannel) -> String {
    channel
        .messages()
        .into_iter()
        .rev()
        .find(|m| m.ai_generated && m.text.starts_with(ERROR_PREFIX))
        .map(|m| m.text)
        .unwrap_or_else(|| format!("{ERROR_PREFIX}unknown error"))
}

fn print_reply(reply: &Reply, output_format: OutputFormat) -> ExitCode {
    match reply {
        Reply::Answer(text) => {
            if output_format == OutputFormat::Text {
                println!("{text}");
            }
            ExitCode::SUCCESS
        }
        Reply::Failed(text) => {
            if output_format == OutputFormat::Text {
                eprintln!("{text}");
            }
            ExitCode::from(1)
        }
    }
}
