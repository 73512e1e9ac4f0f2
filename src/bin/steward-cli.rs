//! Steward CLI - run repository actions from the terminal
//!
//! Fetches the named objects, dispatches one action over them and waits for
//! the follow-up poll to settle before printing the report.

use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::future::BoxFuture;
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use steward::runtime::config::load_config;
use steward::runtime::confirm::{ConfirmPrompt, ConfirmSpec, ConfirmationGate, GateReply};
use steward::runtime::transport::fetch_record;
use steward::runtime::{
    ActionEvent, ActionEventHandler, ActionKind, ActionOutcome, AutoConfirm, BaseContext,
    ConfirmPolicy, Operation, RuntimeConfig, Target, TargetHandle, TargetId, TracingAlertSink,
};

#[derive(Parser)]
#[command(name = "steward")]
#[command(about = "Run repository actions and wait for them to become visible", long_about = None)]
struct Cli {
    /// Configuration file (JSON); STEWARD_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Repository base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Action to run: publish, unpublish, delete, restore, destroy, reindex, move
    action: String,

    /// Object ids
    #[arg(required = true)]
    ids: Vec<String>,

    /// Run as one batch request
    #[arg(long)]
    batch: bool,

    /// Destination container for move
    #[arg(long)]
    to: Option<String>,

    /// Skip confirmation prompts
    #[arg(short, long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    config.apply_env().context("Invalid environment override")?;
    if config.debug {
        tracing::debug!(?config, "loaded configuration");
    }

    let op = parse_operation(&cli.action)?;
    let kind = if cli.batch {
        ActionKind::Batch(op)
    } else {
        ActionKind::Single(op)
    };
    if !cli.batch && cli.ids.len() > 1 {
        bail!("{} takes one id; use --batch for several", kind);
    }

    let gate: Arc<dyn ConfirmationGate> = if cli.yes {
        Arc::new(AutoConfirm)
    } else {
        Arc::new(TerminalGate)
    };
    let base = BaseContext::connect(config, Arc::new(TracingAlertSink), gate)
        .context("Failed to set up repository client")?;

    let mut handles = Vec::new();
    for id in &cli.ids {
        let id = TargetId::new(id.as_str());
        let record = fetch_record(&*base.client, &base.paths, &id)
            .await
            .with_context(|| format!("Failed to fetch {id}"))?;
        let mut target = Target::from(record);
        target.selected = true;
        handles.push(TargetHandle::new(target));
    }

    let mut event = if cli.batch {
        ActionEvent::batch(kind, handles)
    } else {
        let handle = handles.pop().context("no target given")?;
        ActionEvent::single(kind, handle)
    };
    if let Some(destination) = cli.to {
        event = event.with_field("destination", Value::String(destination));
    }
    if cli.yes {
        event = event.with_confirm(ConfirmPolicy::Skip);
    }

    let handler = ActionEventHandler::new(base);
    let report = handler.dispatch(event).join().await;
    handler.shutdown();

    println!("Action: {}", report.kind);
    println!("State: {:?}", report.final_state);
    if let Some(timestamp) = report.server_timestamp() {
        println!("Server time: {}", timestamp.to_rfc3339());
    }
    match report.outcome {
        ActionOutcome::Completed {
            completed,
            detection,
            ..
        } => {
            for id in completed {
                println!("  {id}");
            }
            if let Some(detection) = detection {
                println!("Follow-up: {detection:?}");
            }
            Ok(())
        }
        ActionOutcome::Cancelled => {
            println!("Cancelled");
            Ok(())
        }
        ActionOutcome::NoValidTargets => {
            println!("No valid targets");
            Ok(())
        }
        ActionOutcome::Failed(err) => bail!("{err}"),
        ActionOutcome::Rejected(err) => bail!("{err}"),
        ActionOutcome::Aborted => bail!("action aborted"),
    }
}

fn parse_operation(name: &str) -> Result<Operation> {
    Operation::ALL
        .into_iter()
        .find(|op| op.verb().eq_ignore_ascii_case(name) || op.name().eq_ignore_ascii_case(name))
        .with_context(|| format!("Unknown action: {name}"))
}

/// Prompts on stdin/stdout
struct TerminalGate;

impl ConfirmationGate for TerminalGate {
    fn open(&self, spec: ConfirmSpec) -> BoxFuture<'_, GateReply> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || prompt(spec))
                .await
                .unwrap_or(GateReply::Cancelled)
        })
    }
}

fn prompt(spec: ConfirmSpec) -> GateReply {
    let mut prompt = ConfirmPrompt::new(spec);
    let question = match &prompt.spec().confirm_match_text {
        Some(text) => format!(
            "{} Type \"{text}\" to {}: ",
            prompt.spec().prompt_text,
            prompt.spec().confirm_text.to_lowercase()
        ),
        None => format!(
            "{} [{}/{}] ",
            prompt.spec().prompt_text,
            prompt.spec().confirm_text,
            prompt.spec().cancel_text
        ),
    };

    let mut stdout = io::stdout();
    if write!(stdout, "{question}").and_then(|_| stdout.flush()).is_err() {
        return GateReply::Cancelled;
    }
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return GateReply::Cancelled;
    }
    let answer = line.trim();

    if prompt.spec().confirm_match_text.is_some() {
        prompt.input(answer);
        return prompt.reply();
    }
    let confirmed = answer.eq_ignore_ascii_case("y")
        || answer.eq_ignore_ascii_case("yes")
        || answer.eq_ignore_ascii_case(&prompt.spec().confirm_text);
    if confirmed {
        GateReply::Confirmed { entered: None }
    } else {
        GateReply::Cancelled
    }
}
