use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ideaforge::config::Config;
use ideaforge::dispatch::Completion;
use ideaforge::error::AppError;
use ideaforge::export;
use ideaforge::models;
use ideaforge::orchestrator::{Orchestrator, SandboxOutcome, UiEvent};
use ideaforge::state::Role;
use ideaforge::store::{FileStore, KeyValueStore};

const DEFAULT_PROJECT_NAME: &str = "My project";
const DEFAULT_EXPORT_DIR: &str = "export";

const HELP: &str = "\
commands:
  /new [title]          start a conversation
  /list                 conversations in this project
  /switch <n>           switch to conversation n from /list
  /model [id]           show models or switch the active one
  /phase                current phase and stored documents
  /lock                 lock the current phase and generate its document
  /sandbox <request>    generate component code for the sandbox
  /promote <n>          use preview n of the last reply as sandbox code
  /export [dir]         write phase documents and sandbox code
  /quit                 exit
anything else is sent as a message; Ctrl-C stops a streaming reply";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    dotenvy::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.data_dir.clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let mut orch = Orchestrator::open(&config, store)
        .await
        .context("failed to load saved state")?
        .with_events(tx);
    ensure_conversation(&mut orch).await?;

    tracing::info!(model = %orch.state().settings.active_model, "ideaforge starting");

    let printer = tokio::spawn(print_events(rx));

    // Ctrl-C stops a running stream; when idle it quits.
    let quit = CancellationToken::new();
    let control = orch.control();
    let quit_on_interrupt = quit.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !control.stop() {
                quit_on_interrupt.cancel();
                break;
            }
        }
    });

    print_banner(&orch);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&orch);
        let line = tokio::select! {
            _ = quit.cancelled() => break,
            line = lines.next_line() => line.context("failed to read input")?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match handle_line(&mut orch, line).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => eprintln!("{}", e.user_message()),
        }
    }

    orch.shutdown().await.context("failed to save state")?;
    printer.abort();
    tracing::info!("ideaforge shutting down");
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_line(orch: &mut Orchestrator, line: &str) -> Result<Flow, AppError> {
    let Some(command) = line.strip_prefix('/') else {
        orch.send(line).await?;
        return Ok(Flow::Continue);
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => println!("{HELP}"),
        "new" => {
            let title = (!arg.is_empty()).then_some(arg);
            let project_id = active_project(orch)?;
            orch.update(|state| {
                state.create_conversation(&project_id, title)?;
                Ok(())
            })
            .await?;
            println!("started a new conversation");
        }
        "list" => {
            let project_id = active_project(orch)?;
            let active = orch.state().active_conversation_id();
            for (n, conv) in orch.state().conversations_for(&project_id).iter().enumerate() {
                let marker = if active.as_deref() == Some(conv.id.as_str()) { "*" } else { " " };
                println!("{marker}{:>3}  [{}] {}", n + 1, conv.phase, conv.title);
            }
        }
        "switch" => {
            let project_id = active_project(orch)?;
            let n: usize = arg
                .parse()
                .map_err(|_| AppError::Config(format!("not a number: {arg:?}")))?;
            let id = orch
                .state()
                .conversations_for(&project_id)
                .get(n.wrapping_sub(1))
                .map(|c| c.id.clone())
                .ok_or_else(|| AppError::NotFound {
                    kind: "conversation",
                    id: arg.to_string(),
                })?;
            orch.update(|state| state.select(&project_id, Some(&id))).await?;
        }
        "model" if arg.is_empty() => {
            let active = &orch.state().settings.active_model;
            for model in models::all() {
                let marker = if model.id == active { "*" } else { " " };
                let key = if orch.state().has_credentials(model.provider) {
                    ""
                } else {
                    "  (no key)"
                };
                println!("{marker} {:<18} {}{key}", model.id, model.display_name);
            }
        }
        "model" => {
            orch.update(|state| state.set_active_model(arg)).await?;
            println!("model set to {}", orch.state().settings.active_model);
        }
        "phase" => {
            let conv = orch
                .state()
                .active_conversation()
                .ok_or(AppError::NoActiveConversation)?;
            println!("phase: {}", conv.phase.label());
            for phase in conv.spec_docs.keys() {
                println!("  locked: {}", phase.label());
            }
        }
        "lock" => match orch.lock_phase().await? {
            Some(result) => match result.advanced_to {
                Some(next) => println!("\n{} locked, now in {}", result.stored.label(), next.label()),
                None => println!("\n{} document updated", result.stored.label()),
            },
            None => println!("\nlock cancelled"),
        },
        "sandbox" => {
            if arg.is_empty() {
                println!("usage: /sandbox <request>");
            } else {
                report_sandbox(orch.generate_sandbox(arg).await?);
            }
        }
        "promote" => {
            let n: usize = arg.parse().unwrap_or(1);
            let conv = orch
                .state()
                .active_conversation()
                .ok_or(AppError::NoActiveConversation)?;
            let message_id = conv
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .map(|m| m.id.clone())
                .ok_or_else(|| AppError::NotFound {
                    kind: "message",
                    id: "last reply".to_string(),
                })?;
            report_sandbox(orch.promote_preview(&message_id, n.saturating_sub(1)).await?);
        }
        "export" => {
            let dir = if arg.is_empty() {
                PathBuf::from(DEFAULT_EXPORT_DIR)
            } else {
                PathBuf::from(arg)
            };
            let conv = orch
                .state()
                .active_conversation()
                .ok_or(AppError::NoActiveConversation)?;
            let written = export::write_bundle(conv, &dir).await?;
            if written.is_empty() {
                println!("nothing to export yet; lock a phase first");
            }
            for path in written {
                println!("wrote {}", path.display());
            }
        }
        other => println!("unknown command /{other}; try /help"),
    }
    Ok(Flow::Continue)
}

/// Make sure there is a project and a selected conversation to talk in.
async fn ensure_conversation(orch: &mut Orchestrator) -> anyhow::Result<()> {
    if orch.state().active_conversation().is_some() {
        return Ok(());
    }
    orch.update(|state| {
        let project_id = match state.selection.project_id.clone() {
            Some(id) => id,
            None => match state.projects.first() {
                Some(p) => p.id.clone(),
                None => state.create_project(DEFAULT_PROJECT_NAME, "").id.clone(),
            },
        };
        let latest = state.conversations_for(&project_id).first().map(|c| c.id.clone());
        match latest {
            Some(id) => state.select(&project_id, Some(&id)),
            None => state.create_conversation(&project_id, None).map(|_| ()),
        }
    })
    .await
    .context("failed to create a conversation")
}

fn active_project(orch: &Orchestrator) -> Result<String, AppError> {
    orch.state()
        .selection
        .project_id
        .clone()
        .ok_or(AppError::NoActiveConversation)
}

fn report_sandbox(outcome: SandboxOutcome) {
    match outcome {
        SandboxOutcome::Accepted(code) => {
            println!("\nsandbox updated ({} lines)", code.lines().count());
        }
        SandboxOutcome::Rejected {
            diagnostic,
            restored,
        } => {
            let kept = if restored.is_some() {
                "previous code kept"
            } else {
                "sandbox left empty"
            };
            println!("\ngenerated code rejected: {diagnostic}; {kept}");
        }
        SandboxOutcome::Cancelled => println!("\nsandbox generation cancelled"),
    }
}

fn print_banner(orch: &Orchestrator) {
    if let Some(conv) = orch.state().active_conversation() {
        println!("{} [{}]  /help for commands", conv.title, conv.phase.label());
    }
}

fn prompt(orch: &Orchestrator) {
    let phase = orch
        .state()
        .active_conversation()
        .map(|c| c.phase.as_str())
        .unwrap_or("-");
    print!("{phase}> ");
    std::io::stdout().flush().ok();
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<UiEvent>) {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::Delta { text, .. } => {
                print!("{text}");
                stdout.flush().ok();
            }
            UiEvent::Preview { code, .. } => {
                println!("\n[preview ready: {} lines, /promote to use it]", code.lines().count());
            }
            UiEvent::Completed { completion, .. } => match completion {
                Completion::Finished => println!(),
                Completion::Cancelled => println!("\n[stopped]"),
            },
            UiEvent::Failed { message, .. } => println!("\n[error] {message}"),
            UiEvent::PhaseChanged { phase, .. } => println!("[phase: {}]", phase.label()),
            UiEvent::SandboxUpdated { .. } => {}
        }
    }
}
