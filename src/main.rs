//! Nodexia - trip lifecycle and dispatch synchronization service

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nodexia::{
    api::{build_router, triaged_dispatches, AppState},
    config::{default_config_path, get_data_dir, load_config, save_config_to, Config},
    db::init_database,
    events::EventBus,
    notifications::NotificationTrigger,
    triage::{Bucket, Triage, TriageSummary},
};

#[derive(Parser)]
#[command(name = "nodexia")]
#[command(version)]
#[command(about = "Trip lifecycle state machine and dispatch synchronization for road freight")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Host to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Database path (defaults to the platform data directory)
    #[arg(short, long, env = "NODEXIA_DATABASE")]
    database: Option<String>,

    /// Configuration file (defaults to config.toml in the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Nodexia server
    Serve,
    /// Initialize the database
    Init,
    /// Show configuration info
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
    /// Print the dispatch board grouped by triage bucket
    Triage {
        /// Only show one bucket
        #[arg(short, long)]
        bucket: Option<Bucket>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(host) = cli.host.clone() {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database.clone() {
        config.database.path = Some(database);
    }

    init_tracing(&config);

    let db_path = config.database.get_path().to_string_lossy().to_string();

    match cli.command {
        Some(Commands::Init) => {
            println!("Initializing database at: {}", db_path);
            let _pool = init_database(&db_path).await?;
            println!("Database initialized successfully!");
            Ok(())
        }
        Some(Commands::Config { write }) => show_config(&config, cli.config, &db_path, write),
        Some(Commands::Triage { bucket }) => print_triage(&config, &db_path, bucket).await,
        Some(Commands::Serve) | None => run_server(config, &db_path).await,
    }
}

fn init_tracing(config: &Config) {
    let default_filter = config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| "nodexia=info,tower_http=debug".to_string());
    let json = config.logging.json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

fn show_config(
    config: &Config,
    path: Option<PathBuf>,
    db_path: &str,
    write: bool,
) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(default_config_path);

    if write {
        save_config_to(config, &path)?;
        println!("Configuration written to: {}", path.display());
        return Ok(());
    }

    println!("Nodexia Configuration");
    println!("=====================");
    println!("Config file: {}", path.display());
    println!("Data directory: {}", get_data_dir().display());
    println!("Database path: {}", db_path);
    println!("Server: {}:{}", config.server.host, config.server.port);
    println!(
        "Triage window: {} min, plant offset {} min",
        config.triage.window_minutes, config.triage.utc_offset_minutes
    );
    println!(
        "Notifications: event bus {}, webhook {}",
        if config.notifications.event_bus { "on" } else { "off" },
        config.notifications.webhook_url.as_deref().unwrap_or("none")
    );
    Ok(())
}

async fn print_triage(config: &Config, db_path: &str, only: Option<Bucket>) -> anyhow::Result<()> {
    let pool = init_database(db_path).await?;
    let triage = Triage::from_config(&config.triage);
    let items = triaged_dispatches(&pool, &triage).await?;

    let summary: TriageSummary = items.iter().map(|item| item.bucket).collect();

    for bucket in Bucket::ALL {
        if only.is_some_and(|b| b != bucket) {
            continue;
        }
        println!("{} ({})", bucket, summary.count(bucket));
        for item in items.iter().filter(|item| item.bucket == bucket) {
            println!(
                "  {:<16} {}  {}",
                item.dispatch.code,
                item.dispatch.scheduled_at.format("%Y-%m-%d %H:%M"),
                item.dispatch.status
            );
        }
    }
    println!("Total: {}", summary.total);
    Ok(())
}

async fn run_server(config: Config, db_path: &str) -> anyhow::Result<()> {
    tracing::info!("Initializing database at: {}", db_path);
    let pool = init_database(db_path).await?;

    let event_bus = EventBus::new();
    let notifier = NotificationTrigger::from_config(&config.notifications, event_bus.clone())?;
    let app_state = AppState::new(pool, event_bus, notifier, &config);

    let app = build_router(app_state, config.server.cors_enabled);

    let host = config.server.host.as_str();
    let port = config.server.port;
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    print_banner(host, port, db_path);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_banner(host: &str, port: u16, db_path: &str) {
    println!();
    println!("  NODEXIA v{}", env!("CARGO_PKG_VERSION"));
    println!("  Trip lifecycle & dispatch synchronization");
    println!();
    println!("  API:       http://{}:{}/api", host, port);
    println!("  WebSocket: ws://{}:{}/api/ws", host, port);
    println!("  Database:  {}", truncate_path(db_path, 48));
    println!();
}

/// Keep the tail of `path` within `max_len` characters
fn truncate_path(path: &str, max_len: usize) -> String {
    let chars = path.chars().count();
    if chars <= max_len {
        return path.to_string();
    }
    let skip = chars - max_len.saturating_sub(3);
    let start = path
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(path.len());
    format!("...{}", &path[start..])
}
