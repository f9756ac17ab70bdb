//! chorus - one-shot chat across streaming providers

mod config;
mod tools;

use anyhow::{Context, bail};
use chorus_agent::{
    RequestStatus, StartRequest, StreamEvent, StreamEventKind, Supervisor, ToolRegistry,
};
use chorus_ai::{Attachment, ConversationTurn, HttpAdapterFactory, Provider, ThinkingConfig};
use clap::Parser;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

/// chorus - chat with any supported provider from the terminal
#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Prompt to send (read from stdin when omitted)
    prompt: Vec<String>,

    /// Provider (openai, anthropic, google, poe, cohere, compatible)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Enable thinking with this token budget
    #[arg(short, long)]
    thinking: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum provider calls, including tool rounds
    #[arg(long)]
    max_tool_depth: Option<usize>,

    /// Attach a file to the prompt
    #[arg(short, long)]
    attach: Vec<PathBuf>,

    /// Do not offer tools to the model
    #[arg(long)]
    no_tools: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("chorus=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chorus=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.init_config {
        let path = config::Config::init()?;
        println!("Config file created at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load();

    // CLI takes precedence over the config file
    let provider: Provider = args
        .provider
        .as_deref()
        .or(cfg.provider.as_deref())
        .unwrap_or("anthropic")
        .parse()?;
    let model = args
        .model
        .clone()
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::default_model(provider).to_string());

    let Some(provider_config) = cfg.provider_config(provider) else {
        bail!(
            "No API key found for {}. Set {} or add it to {}",
            provider,
            provider.api_key_env_vars().join(" or "),
            config::Config::config_path().display()
        );
    };

    let prompt = if args.prompt.is_empty() {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        input
    } else {
        args.prompt.join(" ")
    };
    if prompt.trim().is_empty() {
        bail!("Empty prompt");
    }

    let attachments = args
        .attach
        .iter()
        .map(|path| read_attachment(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let registry = Arc::new(ToolRegistry::new());
    if !args.no_tools {
        registry.register(Arc::new(tools::DateTimeTool));
    }

    let mut supervisor_config = cfg.supervisor_config();
    if let Some(depth) = args.max_tool_depth {
        supervisor_config.max_tool_depth = depth;
    }
    let supervisor = Supervisor::new(supervisor_config, Arc::new(HttpAdapterFactory::new()?));

    let thinking = match args.thinking.or(cfg.thinking_budget) {
        Some(budget) if budget > 0 => ThinkingConfig::enabled(budget),
        _ => ThinkingConfig::default(),
    };

    let mut request = StartRequest::new(
        "cli",
        provider_config,
        model,
        vec![ConversationTurn::user(prompt)],
    );
    request.system_prompt = args.system.or(cfg.system_prompt.clone());
    request.attachments = attachments;
    request.tools = registry.specs();
    request.thinking = thinking;
    request.temperature = args.temperature.or(cfg.temperature);
    request.max_tokens = cfg.max_tokens;

    // Subscribe before starting so no event is missed
    let events = supervisor.events();
    tokio::pin!(events);
    let request_id = supervisor.start(request)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                supervisor.cancel(&request_id)?;
                eprintln!("\n[Cancelled]");
                return Ok(());
            }
            event = events.next() => {
                let Some(event) = event else {
                    bail!("Event channel closed");
                };
                if event.request_id != request_id {
                    continue;
                }
                if let Some(status) = handle_event(&supervisor, &registry, event)? {
                    if status == RequestStatus::Failed {
                        std::process::exit(1);
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Render one event; returns the terminal status once the request ends
fn handle_event(
    supervisor: &Supervisor,
    registry: &Arc<ToolRegistry>,
    event: StreamEvent,
) -> anyhow::Result<Option<RequestStatus>> {
    let mut stdout = std::io::stdout();
    match event.kind {
        StreamEventKind::PartialResponse { text } => {
            print!("{}", text);
            stdout.flush()?;
        }
        StreamEventKind::ThinkingStarted => eprintln!("[Thinking...]"),
        StreamEventKind::ThinkingPartial { text } => {
            tracing::debug!("thinking: {}", text);
        }
        StreamEventKind::ThinkingComplete { duration_ms, .. } => {
            eprintln!("[Thought for {:.1}s]", duration_ms as f64 / 1000.0);
        }
        StreamEventKind::ToolCallRequest { call, .. } => {
            println!("\n[Running {}...]", call.tool_id);
            let supervisor = supervisor.clone();
            let registry = registry.clone();
            let request_id = event.request_id;
            tokio::spawn(async move {
                let result = registry.execute(&call).await;
                if let Err(e) = supervisor.provide_tool_result(&request_id, result) {
                    tracing::debug!("Dropping tool result: {}", e);
                }
            });
        }
        StreamEventKind::MessagesAdded { turns } => {
            if let Some(result) = turns.iter().find_map(|t| t.tool_result.as_ref()) {
                let content = result.content();
                let preview: String = content.chars().take(200).collect();
                if result.is_error() {
                    println!("[Tool failed: {}]", preview);
                } else {
                    println!("[Tool: {}]", preview);
                }
            }
        }
        StreamEventKind::Complete { .. } => println!(),
        StreamEventKind::Error { message } => eprintln!("\nError: {}", message),
        StreamEventKind::StatusChange { status } if status.is_terminal() => {
            return Ok(Some(status));
        }
        StreamEventKind::StatusChange { .. } => {}
    }
    Ok(None)
}

fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let attachment = Attachment::from_bytes(mime_type(path), &bytes);
    Ok(match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => attachment.with_file_name(name),
        None => attachment,
    })
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_by_extension() {
        assert_eq!(mime_type(Path::new("a/photo.JPG")), "image/jpeg");
        assert_eq!(mime_type(Path::new("doc.pdf")), "application/pdf");
        assert_eq!(mime_type(Path::new("blob")), "application/octet-stream");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["chorus", "-p", "poe", "-t", "2048", "what", "time"]);
        assert_eq!(args.provider.as_deref(), Some("poe"));
        assert_eq!(args.thinking, Some(2048));
        assert_eq!(args.prompt, vec!["what", "time"]);
    }
}
