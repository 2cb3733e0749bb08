//! SaveChat CLI: saved-response management and an engine demo.
//!
//! Usage:
//!   savechat responses <subcommand> [--db path]
//!   savechat demo [--config path]

use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use savechat::dom::El;
use savechat::engine::attach::find_affordances;
use savechat::{
    Document, EngineConfig, ExportBundle, MemoryStore, NodeId, OpenStore, ResponseStore,
    SaveChatEngine, SqliteStore, StoreError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "savechat",
    version,
    about = "Save controls for assistant messages on a chat page"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage saved responses
    Responses {
        #[command(subcommand)]
        action: ResponsesAction,
        /// Path to SQLite database file
        #[arg(long, global = true)]
        db: Option<PathBuf>,
    },
    /// Run the engine against a synthetic conversation page
    Demo {
        /// YAML engine configuration
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ResponsesAction {
    /// List saved responses, newest first
    List {
        /// Print full records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show totals and date range
    Stats,
    /// Delete every saved response
    Clear,
    /// Delete one saved response by id
    Delete {
        /// Record id
        id: String,
    },
    /// Write an export bundle to a file, or stdout
    Export {
        /// Output file
        path: Option<PathBuf>,
    },
    /// Merge an export bundle into the store
    Import {
        /// Bundle file
        #[arg(required = true)]
        path: PathBuf,
    },
}

/// Get the default database path (~/.local/share/savechat/responses.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let savechat_dir = data_dir.join("savechat");
    std::fs::create_dir_all(&savechat_dir).ok();
    savechat_dir.join("responses.db")
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))
}

fn format_time(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

async fn cmd_responses_list(store: &dyn ResponseStore, json: bool) -> i32 {
    let records = match store.list().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if json {
        return match serde_json::to_string_pretty(&records) {
            Ok(out) => {
                println!("{}", out);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        };
    }
    if records.is_empty() {
        println!("No saved responses.");
        return 0;
    }
    println!("{:<36}  {:<20}  {:>6}  {:<32}", "ID", "SAVED", "CHARS", "CONVERSATION");
    println!("{}", "-".repeat(100));
    for record in records {
        println!(
            "{:<36}  {:<20}  {:>6}  {:<32}",
            record.id,
            format_time(&record.timestamp),
            record.char_count(),
            preview(&record.context.title, 32)
        );
    }
    0
}

async fn cmd_responses_stats(store: &dyn ResponseStore) -> i32 {
    match store.stats().await {
        Ok(stats) => {
            println!("Responses:  {}", stats.total_responses);
            println!("Characters: {}", stats.total_characters);
            if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
                println!("Oldest:     {}", format_time(&oldest));
                println!("Newest:     {}", format_time(&newest));
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_responses_clear(store: &dyn ResponseStore) -> i32 {
    match store.clear().await {
        Ok(()) => {
            println!("Cleared all saved responses");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_responses_delete(store: &dyn ResponseStore, id: &str) -> i32 {
    match store.delete(id).await {
        Ok(true) => {
            println!("Deleted response {}", id);
            0
        }
        Ok(false) => {
            eprintln!("Error: response '{}' not found", id);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_responses_export(store: &dyn ResponseStore, path: Option<&Path>) -> i32 {
    let bundle = match store.export().await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let json = match serde_json::to_string_pretty(&bundle) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match path {
        Some(path) => match std::fs::write(path, json) {
            Ok(()) => {
                println!(
                    "Exported {} responses to {}",
                    bundle.total_responses,
                    path.display()
                );
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        None => {
            println!("{}", json);
            0
        }
    }
}

fn read_bundle(path: &Path) -> Result<ExportBundle, StoreError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| StoreError::InvalidImport(e.to_string()))
}

async fn cmd_responses_import(store: &dyn ResponseStore, path: &Path) -> i32 {
    let bundle = match read_bundle(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match store.import(bundle).await {
        Ok(summary) => {
            println!(
                "Imported {} responses ({} total)",
                summary.imported, summary.total
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn run_responses(action: ResponsesAction, db: Option<PathBuf>) -> i32 {
    let store = match open_store(db) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match action {
        ResponsesAction::List { json } => cmd_responses_list(&store, json).await,
        ResponsesAction::Stats => cmd_responses_stats(&store).await,
        ResponsesAction::Clear => cmd_responses_clear(&store).await,
        ResponsesAction::Delete { id } => cmd_responses_delete(&store, &id).await,
        ResponsesAction::Export { path } => cmd_responses_export(&store, path.as_deref()).await,
        ResponsesAction::Import { path } => cmd_responses_import(&store, &path).await,
    }
}

fn demo_page(document: &Document) -> Result<NodeId, savechat::DomError> {
    let main = document.append(document.body(), El::new("main"))?;
    document.append(main, El::new("h1").text("Borrow checker questions"))?;
    document.append(
        main,
        El::new("div")
            .author("user")
            .child(El::new("div").class("whitespace-pre-wrap").text("Why does my loop not compile?")),
    )?;
    let answer = document.append(
        main,
        El::new("div")
            .author("assistant")
            .child(
                El::new("div")
                    .class("markdown prose")
                    .child(El::new("p").text("The iterator borrows the vector mutably."))
                    .child(El::new("p").text("Collect the indices first, then mutate.")),
            )
            .child(
                El::new("div")
                    .testid("message-actions")
                    .child(El::new("button").attr("aria-label", "Copy"))
                    .child(El::new("button").attr("aria-label", "Regenerate")),
            ),
    )?;
    Ok(answer)
}

/// Replace `answer`'s action tray with a fresh one, the way the page does
/// on re-render. Returns the new tray, or `None` when there was no tray.
fn rerender_actions(
    document: &Document,
    answer: NodeId,
) -> Result<Option<NodeId>, savechat::DomError> {
    let tray = document.read(|tree| {
        tree.element(answer)
            .and_then(|el| el.find(|e| e.attr_is("data-testid", "message-actions")))
            .map(|el| el.id())
    });
    let Some(tray) = tray else {
        return Ok(None);
    };
    document.remove(tray)?;
    let fresh = document.append(
        answer,
        El::new("div")
            .testid("message-actions")
            .child(El::new("button").attr("aria-label", "Copy")),
    )?;
    Ok(Some(fresh))
}

async fn cmd_demo(config: Option<PathBuf>) -> i32 {
    let config = match config {
        Some(path) => match EngineConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: failed to load {}: {}", path.display(), e);
                return 1;
            }
        },
        None => EngineConfig::default(),
    };

    let document = Arc::new(Document::new("https://chat.openai.com/c/demo"));
    document.set_title("Borrow checker questions - ChatGPT");
    let answer = match demo_page(&document) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let store = Arc::new(MemoryStore::new());
    let engine = match SaveChatEngine::new(document.clone(), store.clone(), config) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let mut events = engine.subscribe();

    let report = match engine.start().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!(
        "Initial scan: {} candidates, {} attached",
        report.candidates, report.attached
    );

    // Re-render: the page replaces its action tray, dropping the control
    if let Err(e) = rerender_actions(&document, answer) {
        eprintln!("Error: re-render failed: {}", e);
        engine.shutdown();
        return 1;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let button = document.read(|tree| {
        tree.element(answer)
            .and_then(|el| find_affordances(&el).into_iter().next())
    });
    match button {
        Some(button) => {
            document.click(button);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None => println!("No save control present after re-render"),
    }

    let body = document.body();
    println!();
    println!("{}", document.read(|tree| tree.outline(body)));

    while let Ok(event) = events.try_recv() {
        println!("event: {:?}", event);
    }
    engine.shutdown();

    match store.list().await {
        Ok(records) => {
            println!();
            println!("Saved {} responses:", records.len());
            for record in records {
                println!("  [{}] {}", record.context.title, preview(&record.text, 60));
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async {
        match cli.command {
            Commands::Responses { action, db } => run_responses(action, db).await,
            Commands::Demo { config } => cmd_demo(config).await,
        }
    });

    std::process::exit(code);
}
