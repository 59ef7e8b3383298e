//! Echo Bot Example
//!
//! Reads updates as JSON lines (one platform update per line) from stdin or
//! a file, queues them into a [`SwitchyardRuntime`] and prints each reply.
//!
//! # Handlers
//!
//! - `/start`, `/help` (exact), `/echo <text>` (prefix), `/roll <n>` (regexp)
//! - `page:<n>` callback buttons (prefix on callback data)
//! - `/register`: a three-turn conversation driven by step handlers
//! - everything else falls through to the default handler
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- demos/echo_bot/updates.jsonl
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use switchyard::prelude::*;
use switchyard::runtime::{RuntimeConfig, SwitchyardConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(about = "Dispatch JSON-line updates through Switchyard")]
struct Args {
    /// File with one update per line; stdin when omitted.
    input: Option<PathBuf>,

    /// Configuration file; without one the bot runs a single worker.
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// Replies
// ============================================================================

/// Stands in for the platform's send-message call.
fn reply(ctx: &HandlerContext, text: impl AsRef<str>) {
    let user = ctx.user_id().map_or(0, UserId::get);
    println!("-> {user}: {}", text.as_ref());
}

// ============================================================================
// Command handlers
// ============================================================================

async fn start_handler(ctx: HandlerContext) {
    reply(&ctx, "Hello! Send /help to see what I can do.");
}

async fn help_handler(ctx: HandlerContext) {
    reply(
        &ctx,
        "/echo <text> - echo text\n\
         /roll <n>    - roll an n-sided die\n\
         /register    - tell me about yourself\n\
         /cancel      - abort /register",
    );
}

async fn echo_handler(ctx: HandlerContext) {
    if let Some(content) = ctx.text().and_then(|t| t.strip_prefix("/echo ")) {
        reply(&ctx, content);
    }
}

async fn roll_handler(ctx: HandlerContext) -> Result<()> {
    let sides: u64 = ctx
        .text()
        .and_then(|t| t.strip_prefix("/roll "))
        .context("missing die size")?
        .parse()?;
    if sides == 0 {
        anyhow::bail!("a die needs at least one side");
    }
    // Deterministic stand-in for a real roll.
    let rolled = (ctx.update().update_id.unsigned_abs() % sides) + 1;
    reply(&ctx, format!("You rolled {rolled} (d{sides})"));
    Ok(())
}

async fn page_handler(ctx: HandlerContext) {
    match ctx
        .callback_data()
        .and_then(|d| d.strip_prefix("page:"))
        .and_then(|n| n.parse::<u32>().ok())
    {
        Some(page) => reply(&ctx, format!("Showing page {page}")),
        None => warn!(data = ?ctx.callback_data(), "Malformed page button"),
    }
}

async fn fallback_handler(ctx: HandlerContext) {
    match (ctx.text(), ctx.callback_data()) {
        (Some(text), _) => reply(&ctx, format!("You said: {text}")),
        (None, Some(data)) => reply(&ctx, format!("Unknown button: {data}")),
        (None, None) => info!(event = ctx.update().event_name(), "Ignoring update"),
    }
}

// ============================================================================
// /register conversation
// ============================================================================

#[derive(Debug, Default)]
struct Profile {
    name: Option<String>,
}

async fn register_handler(ctx: HandlerContext) -> Result<()> {
    ctx.register_step(ask_name_step, Profile::default())?;
    reply(&ctx, "What's your name? (/cancel to stop)");
    Ok(())
}

/// Consumes `/cancel` while a step is active. Returns `true` if it did.
fn cancelled(ctx: &HandlerContext) -> bool {
    if ctx.text().map(str::trim) == Some("/cancel") {
        ctx.unregister_step();
        reply(ctx, "Registration cancelled.");
        true
    } else {
        false
    }
}

async fn ask_name_step(ctx: HandlerContext) -> Result<()> {
    if cancelled(&ctx) {
        return Ok(());
    }
    let name = ctx.text().unwrap_or_default().trim().to_string();
    reply(&ctx, format!("Nice to meet you, {name}. How old are you?"));
    ctx.register_step(ask_age_step, Profile { name: Some(name) })?;
    Ok(())
}

async fn ask_age_step(ctx: HandlerContext) {
    if cancelled(&ctx) {
        return;
    }
    let Ok(age) = ctx.text().unwrap_or_default().trim().parse::<u8>() else {
        // The step stays registered, so the next message retries.
        reply(&ctx, "Please send your age as a number.");
        return;
    };

    let name = ctx
        .step_data::<Profile>()
        .and_then(|p| p.name.clone())
        .unwrap_or_else(|| "stranger".to_string());
    ctx.unregister_step();
    reply(&ctx, format!("Registered {name}, age {age}."));
}

// ============================================================================
// Input
// ============================================================================

/// Queues every parseable line, returning how many updates were sent.
async fn feed<R>(input: R, sender: UpdateSender) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut sent = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Update>(&line) {
            Ok(update) => {
                sender.send(update).await?;
                sent += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed update"),
        }
    }
    Ok(sent)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = SwitchyardRuntime::builder().default_handler(fallback_handler);
    match &args.config {
        Some(path) => builder = builder.config_file(path),
        None => {
            // One worker keeps each user's messages in order.
            builder = builder.merge(SwitchyardConfig {
                runtime: RuntimeConfig {
                    workers: 1,
                    ..Default::default()
                },
                ..Default::default()
            });
        }
    }
    let runtime = builder.build()?;

    let router = runtime.router();
    router.register_exact(HandlerKind::MessageText, "/start", start_handler)?;
    router.register_exact(HandlerKind::MessageText, "/help", help_handler)?;
    router.register_prefix(HandlerKind::MessageText, "/echo ", echo_handler)?;
    router.register_regexp(HandlerKind::MessageText, r"^/roll \d+$", roll_handler)?;
    router.register_exact(HandlerKind::MessageText, "/register", register_handler)?;
    router.register_prefix(HandlerKind::CallbackData, "page:", page_handler)?;
    info!(handlers = router.handler_count(), "Handlers registered");

    let sender = runtime.sender();
    let feeder = tokio::spawn(async move {
        match args.input {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening {}", path.display()))?;
                feed(BufReader::new(file), sender).await
            }
            None => feed(BufReader::new(tokio::io::stdin()), sender).await,
        }
    });

    // Stop once every fed update has been dispatched, or on Ctrl+C.
    let drained = async {
        let sent = match feeder.await {
            Ok(Ok(sent)) => sent,
            Ok(Err(e)) => {
                error!(error = %e, "Reading updates failed");
                return;
            }
            Err(e) => {
                error!(error = %e, "Input task failed");
                return;
            }
        };
        while runtime.stats().dispatched < sent {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    runtime
        .run_until(async {
            tokio::select! {
                _ = drained => {}
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
            }
        })
        .await?;

    let stats = runtime.stats();
    info!(
        dispatched = stats.dispatched,
        unhandled = stats.unhandled,
        failed = stats.failed_callbacks,
        "Done"
    );

    Ok(())
}
