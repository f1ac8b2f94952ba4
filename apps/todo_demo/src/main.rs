use std::{path::PathBuf, sync::Arc};

use action_core::{ActionStatus, RunOptions, Settlement, SupervisorConfig};
use anyhow::Result;
use clap::{Parser, Subcommand};
use model_store::KeyedStore;
use shared::error::ErrorReport;
use tracing::{info, warn};

mod config;
mod todos;

use config::{load_settings, Settings};
use todos::{render, SimulatedTodosClient, TodoScreen};

#[derive(Parser, Debug)]
#[command(about = "Drives a todo screen against a simulated backend")]
struct Cli {
    #[arg(long, default_value = "todo_demo.toml")]
    config: PathBuf,
    /// Overrides the configured client latency.
    #[arg(long)]
    latency_ms: Option<u64>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, add, edit, and fail to add a todo.
    Walkthrough,
    /// Fire one add per text without waiting; each supersedes the previous one.
    Add { texts: Vec<String> },
    /// Fire `fetch_todos` several times in a row.
    Refresh {
        #[arg(long, default_value_t = 3)]
        times: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(latency_ms) = cli.latency_ms {
        settings.latency_ms = latency_ms;
    }

    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let store = KeyedStore::new();
    let client = Arc::new(SimulatedTodosClient::new(
        settings.latency(),
        settings.failure_text.clone(),
        settings.initial_todos.clone(),
    ));
    let config = SupervisorConfig::new().on_error(|action, error, options, _rerun| {
        let toast = options
            .get("toast")
            .and_then(|value| value.as_str())
            .unwrap_or("Request failed");
        warn!(action, %error, "todo_demo: {toast}");
    });
    let screen = TodoScreen::mount(&store, client, config)?;

    let mut changes = screen.todos().subscribe()?;
    tokio::spawn(async move {
        while let Some(event) = changes.changed().await {
            info!(
                revision = event.revision,
                kind = ?event.kind,
                transition = event.transition.as_deref().unwrap_or("-"),
                "todo_demo: todos changed"
            );
        }
    });

    match cli.command.unwrap_or(Command::Walkthrough) {
        Command::Walkthrough => walkthrough(&screen, &settings).await?,
        Command::Add { texts } => add_all(&screen, texts).await?,
        Command::Refresh { times } => refresh(&screen, times).await?,
    }

    println!("{}", render(&*screen.todos().read()?));
    screen.unmount();
    Ok(())
}

async fn walkthrough(screen: &TodoScreen, settings: &Settings) -> Result<()> {
    screen.fetch_todos.run((), RunOptions::default()).await?;
    println!("loaded:\n{}", render(&*screen.todos().read()?));

    screen
        .create_todo
        .run("Water the plants".to_string(), RunOptions::clear())
        .await?;
    if let Some(created) = screen.create_todo.snapshot().shared_response() {
        screen.complete(created.id)?;
        screen.rename(created.id, "Water all the plants")?;
        screen.undo(created.id)?;
    }
    if let Some(done) = screen
        .todos()
        .read()?
        .values()
        .find(|todo| todo.completed)
    {
        screen.delete(done.id)?;
    }

    let settlement = screen
        .create_todo
        .run(settings.failure_text.clone(), RunOptions::clear())
        .await?;
    if let Some(error) = screen.create_todo.snapshot().error() {
        let report: ErrorReport = error.report();
        println!("add {settlement:?}: {}", serde_json::to_string(&report)?);
    }
    Ok(())
}

async fn add_all(screen: &TodoScreen, texts: Vec<String>) -> Result<()> {
    let pending = texts
        .into_iter()
        .map(|text| {
            let label = text.clone();
            (label, screen.create_todo.spawn(text, RunOptions::default()))
        })
        .collect::<Vec<_>>();

    for (text, handle) in pending {
        let settlement = handle.await??;
        println!("add {text:?}: {}", describe(settlement));
    }
    Ok(())
}

async fn refresh(screen: &TodoScreen, times: usize) -> Result<()> {
    let pending = (0..times)
        .map(|_| screen.fetch_todos.spawn((), RunOptions::default()))
        .collect::<Vec<_>>();

    for (attempt, handle) in pending.into_iter().enumerate() {
        let settlement = handle.await??;
        println!("fetch #{attempt}: {}", describe(settlement));
    }
    let summary = screen.summary();
    println!(
        "loading={} settled={} render_content={}",
        summary.is_loading,
        screen.fetch_todos.is_settled(),
        summary.should_render_content()
    );
    Ok(())
}

fn describe(settlement: Settlement) -> &'static str {
    match settlement {
        Settlement::Succeeded => "applied",
        Settlement::Failed => "failed",
        Settlement::Discarded => "superseded",
    }
}
