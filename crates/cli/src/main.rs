use clap::{Parser, Subcommand};
use machan::config::{self, Config};
use machan::{Coordinator, Media, Message, MediaRef, OutboundMessage, SendOutcome, Sender};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "machan")]
#[command(about = "machan CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file with the persona spelled out.
    Init {
        /// Config file path (default: MACHAN_CONFIG_PATH or ~/.machan/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List models available to the configured API key.
    Models {
        /// Config file path (default: MACHAN_CONFIG_PATH or ~/.machan/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with the assistant (interactive). Replies stream in as they are generated.
    Chat {
        /// Config file path (default: MACHAN_CONFIG_PATH or ~/.machan/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model to use instead of the configured one.
        #[arg(long, short, value_name = "NAME")]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("machan {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Models { config }) => {
            if let Err(e) = run_models(config).await {
                log::error!("models failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, model }) => {
            if let Err(e) = run_chat(config, model).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = machan::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Load config and resolve the API key; chat and models both need one.
fn load_with_key(config_path: Option<PathBuf>) -> anyhow::Result<(Config, String)> {
    let (config, path) = config::load_config(config_path)?;
    let key = config::resolve_api_key(&config).ok_or_else(|| {
        anyhow::anyhow!(
            "no API key; set GEMINI_API_KEY (or API_KEY) or model.apiKey in {}",
            path.display()
        )
    })?;
    Ok((config, key))
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, key) = load_with_key(config_path)?;
    let client = machan::llm::GeminiClient::from_config(&config, key);
    for model in client.list_models().await? {
        match model.display_name {
            Some(display) => println!("{}\t{}", model.name, display),
            None => println!("{}", model.name),
        }
    }
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>, model: Option<String>) -> anyhow::Result<()> {
    let (mut config, key) = load_with_key(config_path)?;
    if let Some(m) = model {
        config.model.name = m;
    }
    log::info!("chatting with {}", config.model.name);
    let coordinator = Coordinator::from_config(&config, key);

    for message in coordinator.messages() {
        print_message(&message);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/history") {
            for message in coordinator.messages() {
                print_message(&message);
            }
            continue;
        }

        let outbound = match parse_input(input) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let mut outcome = exchange(&coordinator, Step::Send(outbound)).await;
        if outcome == SendOutcome::AwaitingConfirmation {
            if let Some(pending) = coordinator.pending_image() {
                println!("image staged: {}", describe_media(&pending.image.to_ref()));
            }
            write!(stdout, "caption (enter to send, /cancel to discard)> ")?;
            stdout.flush()?;
            let mut caption = String::new();
            if stdin.read_line(&mut caption)? == 0 {
                coordinator.discard_image();
                println!();
                break;
            }
            let caption = caption.trim();
            if caption.eq_ignore_ascii_case("/cancel") {
                coordinator.discard_image();
                println!("image discarded");
                continue;
            }
            let caption = Some(caption.to_string()).filter(|c| !c.is_empty());
            outcome = exchange(&coordinator, Step::Confirm(caption)).await;
        }
        if let SendOutcome::Failed { message_id, error } = outcome {
            log::debug!("exchange failed: {}", error);
            if let Some(m) = coordinator.messages().iter().find(|m| m.id == message_id) {
                println!("< {}", m.text());
            }
        }
    }

    Ok(())
}

enum Step {
    Send(OutboundMessage),
    Confirm(Option<String>),
}

/// Run one coordinator call, echoing reply fragments to stdout as they arrive.
async fn exchange<B: machan::llm::ChatBackend>(coordinator: &Coordinator<B>, step: Step) -> SendOutcome {
    let mut started = false;
    let mut print_fragment = |s: &str| {
        let mut out = io::stdout();
        if !started {
            let _ = write!(out, "< ");
            started = true;
        }
        let _ = write!(out, "{}", s);
        let _ = out.flush();
    };
    let outcome = match step {
        Step::Send(m) => coordinator.send(m, Some(&mut print_fragment)).await,
        Step::Confirm(caption) => coordinator.confirm_image(caption, Some(&mut print_fragment)).await,
    };
    if started {
        println!();
    }
    outcome
}

/// `/image PATH [caption]`, `/audio PATH [text]`, or plain text.
fn parse_input(input: &str) -> anyhow::Result<OutboundMessage> {
    let (command, rest) = match input.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (input, ""),
    };
    let attach = |rest: &str| -> anyhow::Result<(Media, Option<String>)> {
        let (path, text) = match rest.split_once(char::is_whitespace) {
            Some((p, t)) => (p, Some(t.trim().to_string())),
            None => (rest, None),
        };
        if path.is_empty() {
            anyhow::bail!("usage: {} PATH [text]", command);
        }
        Ok((Media::from_path(Path::new(path))?, text))
    };
    let message = match command {
        "/image" => {
            let (image, caption) = attach(rest)?;
            OutboundMessage {
                text: caption,
                image: Some(image),
                audio: None,
            }
        }
        "/audio" => {
            let (audio, text) = attach(rest)?;
            OutboundMessage {
                text,
                image: None,
                audio: Some(audio),
            }
        }
        _ => OutboundMessage::text(input),
    };
    Ok(message)
}

fn describe_media(media: &MediaRef) -> String {
    match &media.name {
        Some(name) => format!("{} ({}, {} bytes)", name, media.mime_type, media.byte_len),
        None => format!("{}, {} bytes", media.mime_type, media.byte_len),
    }
}

fn print_message(message: &Message) {
    let who = match message.sender {
        Sender::User => "you",
        Sender::Bot => "bot",
    };
    let mut line = format!("[{}] {}:", message.timestamp, who);
    if let Some(ref image) = message.image {
        line.push_str(&format!(" [image: {}]", describe_media(image)));
    }
    if let Some(ref audio) = message.audio {
        line.push_str(&format!(" [audio: {}]", describe_media(audio)));
    }
    if !message.text().is_empty() {
        line.push(' ');
        line.push_str(message.text());
    }
    println!("{}", line);
}
