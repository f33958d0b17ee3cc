//! mqttchat - terminal chat client over MQTT

use clap::{Parser, Subcommand};
use mqttchat::config::ChatConfig;
use mqttchat::observability::{init_default_logging, init_logging, LogFormat};
use mqttchat::protocol::ChatMessage;
use mqttchat::session::{ChatSession, SessionSettings, SessionSnapshot, SessionStatus};
use mqttchat::transport::MqttTransport;
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, Level};

/// Chat over an MQTT broker
#[derive(Parser)]
#[command(name = "mqttchat")]
#[command(about = "Terminal chat client for an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the chat
    Chat {
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Broker username
        #[arg(long)]
        username: Option<String>,
        /// Broker password
        #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Broker URL, overriding the configuration file
        #[arg(long)]
        broker: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Pretty, true),
    }

    let broker_override = match &cli.command {
        Commands::Chat { broker, .. } => broker.clone(),
        Commands::Config { .. } => None,
    };

    let config = match load_configuration(&cli.config, broker_override) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("mqttchat: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Chat {
            name,
            username,
            password,
            ..
        } => run_chat(config, name, username, password).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
    broker_override: Option<String>,
) -> Result<ChatConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => Some(path.clone()),
        None => ["mqttchat.toml", "config/mqttchat.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    };

    let mut config = match (path, &broker_override) {
        (Some(path), _) => {
            info!("Loading configuration from: {}", path.display());
            ChatConfig::load_from_file(&path)?
        }
        (None, Some(broker)) => ChatConfig::with_broker(broker.clone()),
        (None, None) => {
            return Err(
                "no configuration file found; pass -c/--config, create mqttchat.toml or use --broker"
                    .into(),
            )
        }
    };

    if let Some(broker) = broker_override {
        config.mqtt.broker_url = broker;
    }
    config.validate()?;
    Ok(config)
}

async fn run_chat(
    config: ChatConfig,
    name: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = ChatSession::spawn(MqttTransport::new(), SessionSettings::from_config(&config));

    if let Some(name) = name {
        session.set_identity(name);
    }
    if let Some(username) = username.or_else(|| config.get_mqtt_username()) {
        let password = password
            .or_else(|| config.get_mqtt_password())
            .unwrap_or_default();
        session.set_credentials(username, password);
    }
    session.connect();

    let mut snapshots = session.subscribe();
    let mut view = TranscriptView::default();
    view.render(&snapshots.borrow_and_update());
    println!("Type a message and press Enter. /quit exits, /help lists commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                view.render(&snapshots.borrow_and_update());
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Connect => session.connect(),
                    Input::Disconnect => session.disconnect(),
                    Input::Rename(name) => session.set_identity(name),
                    Input::Help => print_help(),
                    Input::Text(text) => session.send(text),
                }
            }

            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, leaving chat");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    Connect,
    Disconnect,
    Rename(String),
    Help,
    Text(String),
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "/quit" | "/exit" => Input::Quit,
        "/connect" => Input::Connect,
        "/disconnect" => Input::Disconnect,
        "/help" => Input::Help,
        other => match other.strip_prefix("/name ") {
            Some(name) => Input::Rename(name.trim().to_string()),
            None => Input::Text(line.to_string()),
        },
    }
}

fn print_help() {
    println!("/connect        connect to the broker");
    println!("/disconnect     leave the broker");
    println!("/name <name>    change display name (while disconnected)");
    println!("/quit           exit");
}

/// Prints what changed between snapshots
#[derive(Default)]
struct TranscriptView {
    status: Option<SessionStatus>,
    identity: String,
    printed: usize,
}

impl TranscriptView {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.identity != self.identity {
            self.identity = snapshot.identity.clone();
            self.printed = 0;
            println!("* You are {}", self.identity);
        }

        if self.status != Some(snapshot.status) {
            self.status = Some(snapshot.status);
            match &snapshot.last_error {
                Some(cause) => println!("* {} ({})", snapshot.status_text, cause),
                None => println!("* {}", snapshot.status_text),
            }
        }

        for message in snapshot.messages.iter().skip(self.printed) {
            println!("{}", format_line(message));
        }
        self.printed = snapshot.messages.len();
    }
}

fn format_line(message: &ChatMessage) -> String {
    let sender = if message.is_own() {
        "you"
    } else {
        message.sender()
    };
    format!("[{}] {}: {}", message.time_label(), sender, message.body())
}

fn handle_config_command(config: ChatConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("  /connect "), Input::Connect);
        assert_eq!(parse_input("/name Bob"), Input::Rename("Bob".to_string()));
        assert_eq!(parse_input("hello"), Input::Text("hello".to_string()));
        assert_eq!(parse_input("/unknown"), Input::Text("/unknown".to_string()));
    }

    #[test]
    fn test_format_line_marks_own_messages() {
        let own = ChatMessage::new("1", "Alice", "hi", 0).tagged_for("Alice");
        let other = ChatMessage::new("2", "Bob", "hello", 0);
        assert!(format_line(&own).ends_with("] you: hi"));
        assert!(format_line(&other).ends_with("] Bob: hello"));
    }

    #[test]
    fn test_cli_parses_chat_flags() {
        let cli = Cli::try_parse_from([
            "mqttchat",
            "chat",
            "--name",
            "Alice",
            "--broker",
            "mqtt://localhost:1883",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat { name, broker, .. } => {
                assert_eq!(name.as_deref(), Some("Alice"));
                assert_eq!(broker.as_deref(), Some("mqtt://localhost:1883"));
            }
            Commands::Config { .. } => panic!("expected chat command"),
        }
    }
}
