mod console;

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use genrelay_contracts::channels::MessageContext;
use genrelay_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use genrelay_contracts::events::EventWriter;
use genrelay_contracts::job::{Capability, Resolution, SpeechLanguage};
use genrelay_contracts::GenerationError;
use genrelay_engine::config::RelayConfig;
use genrelay_engine::extract::{Document, DocumentSource};
use genrelay_engine::{ChatMessage, Collaborators, GenerationRequest, Relay};
use serde_json::json;

use crate::console::ConsoleSurface;

const DIRECT_CHANNEL: &str = "dm";
const MENTION: &str = "@genrelay";

#[derive(Debug, Parser)]
#[command(name = "genrelay", version, about = "Chat relay for hosted generation backends")]
struct Cli {
    /// Repeat for more log output (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat session.
    Chat(ChatArgs),
    Imagine(GenerateArgs),
    Speech(GenerateArgs),
    Music(GenerateArgs),
    Video(GenerateArgs),
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Directory for downloaded artifacts and long replies.
    #[arg(long)]
    out: Option<PathBuf>,
    /// JSONL event log (defaults to OUT/events.jsonl when --out is set).
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long, default_value = "local")]
    actor: String,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long, default_value = DIRECT_CHANNEL)]
    channel: String,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    resolution: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("genrelay error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Imagine(args) => run_generate(Capability::Image, args),
        Command::Speech(args) => run_generate(Capability::Speech, args),
        Command::Music(args) => run_generate(Capability::Music, args),
        Command::Video(args) => run_generate(Capability::Video, args),
    }
}

fn init_tracing(verbose: u8) {
    let fallback_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn build_relay(session: &SessionArgs) -> Result<Relay> {
    let mut config = RelayConfig::load();
    if let Some(model) = &session.text_model {
        config.text_model = model.clone();
    }
    if let Some(adapter) = &session.image_model {
        config.default_image_adapter = adapter.clone();
    }
    let session_id = format!("genrelay-{}", std::process::id());
    let events = match (&session.events, &session.out) {
        (Some(path), _) => EventWriter::jsonl(path, session_id),
        (None, Some(out)) => EventWriter::jsonl(out.join("events.jsonl"), session_id),
        (None, None) => EventWriter::disabled(),
    };
    if let Some(out) = &session.out {
        fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    }
    let collaborators = Collaborators::live(&config, events)?;
    Ok(Relay::new(config, collaborators))
}

fn run_generate(capability: Capability, args: GenerateArgs) -> Result<i32> {
    let relay = build_relay(&args.session)?;
    let mut request = GenerationRequest::new(capability, args.prompt.join(" "));
    request.adapter = args.model.clone();
    request.resolution = args
        .resolution
        .as_deref()
        .map(str::parse::<Resolution>)
        .transpose()?;
    request.language = args
        .language
        .as_deref()
        .map(str::parse::<SpeechLanguage>)
        .transpose()?;

    let mut surface = ConsoleSurface::stdout(args.session.out.clone());
    let result = relay.generate(&args.session.actor, request, &mut surface);
    surface.finish();
    match result {
        Ok(_) => Ok(0),
        Err(err) => {
            tracing::debug!(error = %err, "generation failed");
            Ok(1)
        }
    }
}

/// REPL state. Requests run on worker threads so `/stop` stays responsive.
struct ChatSession {
    relay: Arc<Relay>,
    actor: String,
    channel: String,
    out_dir: Option<PathBuf>,
    workers: Vec<JoinHandle<()>>,
}

enum Flow {
    Continue,
    Quit,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let relay = build_relay(&args.session)?;
    let mut session = ChatSession {
        relay: Arc::new(relay),
        actor: args.session.actor.clone(),
        channel: args.channel.clone(),
        out_dir: args.session.out.clone(),
        workers: Vec::new(),
    };

    println!(
        "genrelay chat started ({}). Type /help for commands.",
        session.relay.model_name()
    );
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        match session.handle(&intent) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => println!("{err:#}"),
        }
    }

    session.relay.cancel(&session.actor);
    for worker in session.workers.drain(..) {
        if worker.join().is_err() {
            tracing::warn!("chat worker panicked");
        }
    }
    Ok(())
}

impl ChatSession {
    fn handle(&mut self, intent: &Intent) -> Result<Flow> {
        let relay = Arc::clone(&self.relay);
        let actor = self.actor.clone();
        match intent.action.as_str() {
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "quit" => return Ok(Flow::Quit),
            "chat" => self.chat(intent)?,
            "generate_image" | "generate_speech" | "generate_music" | "generate_video" => {
                let request = generation_request(intent)?;
                self.spawn(request.capability.as_str(), move |relay, surface| {
                    if let Err(err) = relay.generate(&actor, request, surface) {
                        tracing::debug!(error = %err, "generation failed");
                    }
                })?;
            }
            "set_image_model" => {
                let name = relay.select_adapter(&actor, Capability::Image, value(intent))?;
                println!("Image model set to {name}");
            }
            "set_speech_model" => {
                let name = relay.select_adapter(&actor, Capability::Speech, value(intent))?;
                println!("Speech model set to {name}");
            }
            "set_resolution" => {
                let resolution = relay.set_resolution(&actor, value(intent))?;
                println!("Resolution set to {resolution}");
            }
            "set_instructions" => {
                match relay.preferences().set_instructions(&actor, Some(value(intent))) {
                    Some(text) => println!("Instructions set: {text}"),
                    None => println!("Instructions cleared"),
                }
            }
            "clear_instructions" => {
                relay.preferences().set_instructions(&actor, None);
                println!("Instructions cleared");
            }
            "set_actor" => {
                let next = value(intent).trim();
                if next.is_empty() {
                    bail!("/actor requires an id");
                }
                self.actor = next.to_string();
                println!("Actor set to {}", self.actor);
            }
            "set_channel" => {
                let next = value(intent).trim();
                if next.is_empty() {
                    bail!("/channel requires a name");
                }
                self.channel = next.to_string();
                println!("Channel set to {}", self.channel);
            }
            "toggle_style" => {
                let style = relay.preferences().toggle_style(&actor);
                println!(
                    "Response style: {} ({} characters per message)",
                    json!(style).as_str().unwrap_or_default(),
                    style.char_budget()
                );
            }
            "toggle_urls" => {
                let mode = relay.preferences().toggle_url_mode(&actor);
                println!(
                    "URL reading {}",
                    if mode.is_on() { "enabled" } else { "disabled" }
                );
            }
            "toggle_enhance" => {
                let enabled = relay.preferences().toggle_prompt_enhancement(&actor);
                println!(
                    "Prompt enhancement {}",
                    if enabled { "enabled" } else { "disabled" }
                );
            }
            "toggle_always_respond" => {
                let on = relay.channels().toggle_actor(&self.channel, &actor);
                println!(
                    "Always responding to {actor} in {}: {}",
                    self.channel,
                    if on { "on" } else { "off" }
                );
            }
            "toggle_channel" => {
                let on = relay.channels().toggle_channel(&self.channel);
                println!(
                    "Responding to everyone in {}: {}",
                    self.channel,
                    if on { "on" } else { "off" }
                );
            }
            "clear_history" => {
                if relay.clear_history(&actor) {
                    println!("History cleared");
                } else {
                    println!("No history to clear");
                }
            }
            "export_history" => self.export_history()?,
            "stop" => {
                if !relay.cancel(&actor) {
                    println!("Nothing to stop");
                }
            }
            "list_adapters" => {
                for capability in Capability::ALL {
                    println!(
                        "{capability}: {}",
                        relay.adapter_names(capability).join(", ")
                    );
                }
            }
            "show_settings" => {
                let prefs = relay.preferences().get(&actor);
                println!("{}", serde_json::to_string_pretty(&prefs)?);
            }
            "unknown" => println!(
                "Unknown command /{}. Type /help for commands.",
                intent.arg("command").unwrap_or_default()
            ),
            other => tracing::debug!(action = other, "unhandled intent"),
        }
        Ok(Flow::Continue)
    }

    fn chat(&mut self, intent: &Intent) -> Result<()> {
        let text = intent.prompt.clone().unwrap_or_default();
        let mut message = ChatMessage::text(text.clone());
        if let Some(path) = intent.arg("path") {
            if path.is_empty() {
                bail!("/attach requires a path");
            }
            let path = PathBuf::from(path);
            if !path.exists() {
                bail!("file not found ({})", path.display());
            }
            message = message.with_attachment(attachment(&path));
        }

        let context = message_context(&self.channel, &self.actor, &text);
        if !self.relay.should_respond(&context) {
            tracing::debug!(channel = %self.channel, actor = %self.actor, "message ignored");
            return Ok(());
        }
        let actor = self.actor.clone();
        self.spawn("chat", move |relay, surface| {
            if let Err(err) = relay.chat(&actor, message, surface) {
                tracing::debug!(error = %err, "chat failed");
            }
        })
    }

    fn export_history(&self) -> Result<()> {
        let Some(text) = self.relay.export_history(&self.actor) else {
            println!("No history to export");
            return Ok(());
        };
        match &self.out_dir {
            Some(dir) => {
                let path = dir.join(format!("history-{}.txt", self.actor));
                fs::write(&path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("History exported to {}", path.display());
            }
            None => println!("{text}"),
        }
        Ok(())
    }

    fn spawn<F>(&mut self, label: &str, task: F) -> Result<()>
    where
        F: FnOnce(&Relay, &mut ConsoleSurface<io::Stdout>) + Send + 'static,
    {
        let relay = Arc::clone(&self.relay);
        let out_dir = self.out_dir.clone();
        self.workers.retain(|worker| !worker.is_finished());
        let worker = thread::Builder::new()
            .name(format!("genrelay-{label}-{}", self.actor))
            .spawn(move || {
                let mut surface = ConsoleSurface::stdout(out_dir);
                task(&relay, &mut surface);
                surface.finish();
            })
            .context("failed to start request worker")?;
        self.workers.push(worker);
        Ok(())
    }
}

fn value(intent: &Intent) -> &str {
    intent.arg("value").unwrap_or_default()
}

fn generation_request(intent: &Intent) -> Result<GenerationRequest, GenerationError> {
    let capability = match intent.action.as_str() {
        "generate_image" => Capability::Image,
        "generate_speech" => Capability::Speech,
        "generate_music" => Capability::Music,
        "generate_video" => Capability::Video,
        other => {
            return Err(GenerationError::UnsupportedSelection(format!(
                "'{other}' is not a generation command"
            )))
        }
    };
    let prompt = intent.prompt.clone().unwrap_or_default();
    if prompt.trim().is_empty() {
        return Err(GenerationError::UnsupportedSelection(format!(
            "{capability} generation needs a prompt"
        )));
    }
    let mut request = GenerationRequest::new(capability, prompt);
    request.adapter = intent.arg("model").map(str::to_string);
    request.resolution = intent.arg("resolution").map(str::parse).transpose()?;
    request.language = intent.arg("language").map(str::parse).transpose()?;
    Ok(request)
}

fn attachment(path: &Path) -> Document {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let document = Document::new(name, DocumentSource::File(path.to_path_buf()));
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    let mime = match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => return document,
    };
    document.with_mime_type(mime)
}

fn message_context<'a>(channel: &'a str, actor: &'a str, text: &str) -> MessageContext<'a> {
    MessageContext {
        channel,
        actor,
        direct: channel == DIRECT_CHANNEL,
        mentioned: text.to_ascii_lowercase().contains(MENTION),
    }
}
