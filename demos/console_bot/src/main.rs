//! Console Bot Demo
//!
//! Drives the Warden runtime from the terminal: every line typed on stdin is
//! an inbound message from one simulated user, and bot replies are printed to
//! stdout.
//!
//! ```text
//! stdin ──line──► ChatEvent ──► mpsc ──► WardenRuntime ──► ConsoleTransport ──► stdout
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --user alice --group --admin
//! ```
//!
//! Then try `!help`, `!ping`, `!echo hello`, `!roll 20`, `!divide 1 0` or
//! `!stats` (owner only; pass `--owner` to make the console user an owner).

use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};
use warden::core::TransportError;
use warden::prelude::*;
use warden::runtime::RuntimeBuilder;

#[derive(Parser, Debug)]
#[command(about = "Chat with a Warden-powered bot from the terminal")]
struct Args {
    /// Configuration file (defaults to warden.toml in the current directory).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sender id of the console user.
    #[arg(short, long, default_value = "console")]
    user: String,

    /// Treat messages as group messages.
    #[arg(long)]
    group: bool,

    /// The console user is a group admin.
    #[arg(long)]
    admin: bool,

    /// Add the console user to the owner list.
    #[arg(long)]
    owner: bool,
}

// ============================================================================
// Transport
// ============================================================================

/// Prints outbound messages to stdout.
struct ConsoleTransport {
    stdout: Mutex<Stdout>,
    sent: AtomicU64,
}

impl ConsoleTransport {
    fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
            sent: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn id(&self) -> &str {
        "console"
    }

    async fn send_text(&self, chat: &str, text: &str) -> TransportResult<MessageRef> {
        let id = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        let line = format!("[bot → {chat}] {text}\n");
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::send_failed(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| TransportError::send_failed(e.to_string()))?;
        Ok(MessageRef::new(chat, id.to_string()))
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn ping() -> HandlerDefinition {
    HandlerDefinition::new("ping")
        .alias("p")
        .description("Check that the bot is alive")
        .category("general")
        .cooldown(2)
        .handler(handler_fn(|inv: Invocation| async move {
            inv.reply("pong").await?;
            Ok::<_, BoxError>(())
        }))
}

fn echo() -> HandlerDefinition {
    HandlerDefinition::new("echo")
        .description("Repeat the given text")
        .category("general")
        .args(
            ArgumentRules::new()
                .min(1)
                .usage("<text...>")
                .example("hello world"),
        )
        .handler(handler_fn(|inv: Invocation| async move {
            inv.reply(&inv.command.rest()).await?;
            Ok::<_, BoxError>(())
        }))
}

fn roll() -> HandlerDefinition {
    HandlerDefinition::new("roll")
        .alias("dice")
        .description("Roll a die with the given number of sides")
        .category("fun")
        .args(
            ArgumentRules::new()
                .max(1)
                .arg(ArgType::number_in(2.0, 1000.0).optional())
                .usage("[sides]")
                .example("20"),
        )
        .handler(handler_fn(|inv: Invocation| async move {
            let sides: u64 = match inv.args().first() {
                Some(arg) => arg.parse::<f64>().map(|n| n as u64)?,
                None => 6,
            };
            // Message id digits are the only entropy a console bot has.
            let seed: u64 = inv
                .event
                .message_id
                .bytes()
                .fold(17, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
            inv.reply(&format!("🎲 {}", seed % sides + 1)).await?;
            Ok::<_, BoxError>(())
        }))
}

fn divide() -> HandlerDefinition {
    HandlerDefinition::new("divide")
        .description("Divide two numbers")
        .category("fun")
        .args(
            ArgumentRules::new()
                .min(2)
                .max(2)
                .arg(ArgType::number())
                .arg(ArgType::number())
                .usage("<a> <b>"),
        )
        .handler(handler_fn(|inv: Invocation| async move {
            let a: f64 = inv.args()[0].parse()?;
            let b: f64 = inv.args()[1].parse()?;
            if b == 0.0 {
                return Err(BoxError::from(CommandError::user("Cannot divide by zero.")));
            }
            inv.reply(&format!("{}", a / b)).await?;
            Ok::<_, BoxError>(())
        }))
}

fn help(engine: Weak<DispatchEngine>) -> HandlerDefinition {
    HandlerDefinition::new("help")
        .alias("h")
        .description("List available commands")
        .category("general")
        .cooldown(0)
        .handler(handler_fn(move |inv: Invocation| {
            let engine = engine.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return Ok(());
                };
                let prefix = &engine.settings().prefix;
                let mut lines = vec!["Commands:".to_string()];
                for descriptor in engine.registry().descriptors() {
                    let aliases = if descriptor.aliases().is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", descriptor.aliases().join(", "))
                    };
                    lines.push(format!(
                        "  {prefix}{}{aliases} - {}",
                        descriptor.name(),
                        descriptor.description().unwrap_or("no description")
                    ));
                }
                inv.reply(&lines.join("\n")).await?;
                Ok::<_, BoxError>(())
            }
        }))
}

fn stats(engine: Weak<DispatchEngine>) -> HandlerDefinition {
    HandlerDefinition::new("stats")
        .description("Show engine statistics")
        .category("admin")
        .owner_only()
        .cooldown(0)
        .handler(handler_fn(move |inv: Invocation| {
            let engine = engine.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return Ok(());
                };
                let report = serde_json::to_string_pretty(&engine.stats())?;
                inv.reply(&report).await?;
                Ok::<_, BoxError>(())
            }
        }))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = RuntimeBuilder::new();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if args.owner {
        let user = args.user.clone();
        builder = builder.adjust(move |config| config.engine.owner_ids.push(user));
    }
    let runtime = builder.build()?;

    let engine = runtime.engine();
    let report = engine.register_all([
        ping(),
        echo(),
        roll(),
        divide(),
        help(Arc::downgrade(engine)),
        stats(Arc::downgrade(engine)),
    ]);
    info!(loaded = report.loaded.len(), errors = report.errors.len(), "Handlers registered");

    let (tx, rx) = mpsc::channel(64);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut next_id: u64 = 0;
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    next_id += 1;
                    let event = ChatEvent::new(&args.user, "console", line)
                        .with_message_id(next_id.to_string())
                        .with_sender_name(&args.user)
                        .in_group(args.group)
                        .with_admin(args.admin)
                        .with_bot_admin(args.group);
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
    });

    runtime.serve(Arc::new(ConsoleTransport::new()), rx).await?;
    reader.abort();

    Ok(())
}
