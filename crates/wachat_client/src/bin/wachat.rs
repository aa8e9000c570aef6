//! wachat: send one message to the chat backend and print the streamed reply.
//! Reads config, connects over WebSocket, selects (or creates) a conversation,
//! sends the question from the command line or stdin, and writes the reply
//! to stdout as it arrives.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use wachat_client::{config, Config, Notifier, Role, SendOutcome, SyncOptions, Synchronizer};

#[derive(Parser, Debug)]
#[command(name = "wachat", about = "Chat with the wachat backend from the terminal")]
struct Args {
    /// Config file (default: ~/.wachat/config.yaml)
    #[arg(long, env = "WACHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Continue an existing conversation instead of starting a new one
    #[arg(long)]
    conversation: Option<String>,

    /// Message to send; read from stdin when omitted
    question: Option<String>,
}

/// Keeps the first stream failure so `main` can report it.
#[derive(Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<String>>>);

impl Notifier for FailureSlot {
    fn alert(&self, message: &str) {
        self.0.lock().get_or_insert_with(|| message.to_string());
    }
}

fn resolve_config_path(args: &Args) -> Result<PathBuf> {
    match &args.config {
        Some(path) => Ok(path.clone()),
        None => config::default_config_path()
            .context("unable to determine config path (set --config or WACHAT_CONFIG)"),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wachat={level},wachat_client={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn read_question(args: &Args) -> Result<String> {
    let question = match &args.question {
        Some(q) => q.trim().to_string(),
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read question from stdin")?;
            line.trim().to_string()
        }
    };
    if question.is_empty() {
        bail!("no question provided");
    }
    Ok(question)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = resolve_config_path(&args)?;
    let cfg = config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    init_logging(cfg.log_level());

    let question = read_question(&args)?;
    run(&cfg, &question, args.conversation.as_deref()).await
}

async fn run(cfg: &Config, question: &str, conversation: Option<&str>) -> Result<()> {
    let url = cfg.server_url();
    let client = wachat_client::connect(url)
        .await
        .with_context(|| format!("connection to {url} failed"))?
        .with_request_timeout(cfg.request_timeout());
    let client = Arc::new(client);
    let mut events = client.events().subscribe_all();

    let failure = FailureSlot::default();
    let mut sync = Synchronizer::new(client.clone())
        .with_options(SyncOptions::from(cfg))
        .with_notifier(Box::new(failure.clone()));

    sync.load_conversations().await;
    let selected = match conversation {
        Some(id) => sync.select_conversation(id).await,
        None => sync.create_new_conversation().await.is_some(),
    };
    if !selected {
        bail!("no conversation available to send to");
    }

    match sync.send_message(question).await {
        SendOutcome::Sent => {}
        SendOutcome::Rejected => bail!("message was rejected"),
        SendOutcome::Failed => bail!("backend did not accept the message"),
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0;
    let mut streamed = false;
    while sync.is_sending() {
        if !sync.drive(&mut events).await {
            bail!("connection closed before the reply finished");
        }
        let partial = sync.streaming_message();
        if partial.len() < printed {
            // buffer restarted (stream:start) or the stream finished
            printed = 0;
        }
        if partial.len() > printed {
            write!(out, "{}", &partial[printed..])?;
            out.flush()?;
            printed = partial.len();
            streamed = true;
        }
    }

    if let Some(message) = failure.0.lock().take() {
        bail!(message);
    }
    if !streamed {
        if let Some(reply) = sync
            .current_messages()
            .last()
            .filter(|m| m.role == Role::Assistant)
        {
            write!(out, "{}", reply.content)?;
        }
    }
    writeln!(out)?;
    Ok(())
}
