//! `sia-server` — daemon entry point and CLI wrapper for the sia image
//! archiver: loads configuration, wires the core components together, and
//! either serves the HTTP surface or runs a one-shot maintenance pass.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sia_config::ConfigManager;
use sia_core::{Downloader, GalleryIndexer, MetadataStore, NamingEngine, RequestSigner, Watcher};
use sia_server::{create_router, AppState};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "sia-server")]
#[command(about = "Personal image-archiver daemon")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Override the configured base directory.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Load config, start the HTTP server and watcher, and block. Default.
    #[default]
    Run,
    /// Reconcile the metadata store against the filesystem and rebuild the
    /// gallery index, then exit.
    Doctor,
    /// Materialize a default config file if one doesn't already exist.
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sia_server=info,sia_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command.unwrap_or_default() {
        Command::InitConfig => init_config(),
        Command::Doctor => doctor(args.base_dir).await,
        Command::Run => run(args.base_dir, args.port).await,
    }
}

fn init_config() -> anyhow::Result<()> {
    let path = sia_config::config_path();
    if path.exists() {
        info!(path = %path.display(), "config already exists, leaving it untouched");
        return Ok(());
    }
    match ConfigManager::load(&path) {
        Ok(_) => {
            info!(path = %path.display(), "materialized default config");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "failed to materialize default config");
            std::process::exit(2);
        }
    }
}

async fn doctor(base_dir_override: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match load_config(base_dir_override, None) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };

    let store = match MetadataStore::open(&config.base_dir, 4).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open metadata store");
            std::process::exit(3);
        }
    };

    let existing = match walk_relative_paths(&config.base_dir).await {
        Ok(paths) => paths,
        Err(e) => {
            error!(error = %e, "failed to walk base_dir");
            std::process::exit(3);
        }
    };

    let removed = match store.reconcile(&existing).await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "reconcile failed");
            std::process::exit(3);
        }
    };

    let naming = NamingEngine::new(&config.base_dir);
    let mut normalized = 0usize;
    match tokio::fs::read_dir(&config.base_dir).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                match naming.normalize_folder(&entry.path()).await {
                    Ok(renames) => normalized += renames.len(),
                    Err(e) => warn!(folder = %entry.path().display(), error = %e, "failed to normalize folder"),
                }
            }
        }
        Err(e) => {
            error!(error = %e, "failed to list base_dir");
            std::process::exit(3);
        }
    }

    let gallery = GalleryIndexer::new(&config.base_dir);
    let entries = match gallery.rebuild(&store).await {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "gallery rebuild failed");
            std::process::exit(3);
        }
    };

    info!(
        removed_rows = removed,
        normalized_files = normalized,
        entries = entries.len(),
        "doctor pass complete"
    );
    println!(
        "reconciled: removed {removed} dangling row(s), normalized {normalized} file(s), rebuilt {} gallery entr(ies)",
        entries.len()
    );
    Ok(())
}

async fn run(base_dir_override: Option<PathBuf>, port_override: Option<u16>) -> anyhow::Result<()> {
    let config = match load_config(base_dir_override, port_override) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };

    let config_manager = Arc::new(match ConfigManager::load(sia_config::config_path()) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "failed to load config manager");
            std::process::exit(2);
        }
    });

    tokio::fs::create_dir_all(&config.base_dir).await?;

    let store = Arc::new(MetadataStore::open(&config.base_dir, config.concurrency.max(1)).await?);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.download.timeout_seconds))
        .build()?;
    let downloader = Arc::new(Downloader::new(client));
    let naming = Arc::new(NamingEngine::new(&config.base_dir));
    let gallery = Arc::new(GalleryIndexer::new(&config.base_dir));
    let signer = Arc::new(RequestSigner::new(config.hmac_key.as_bytes()));

    let watcher = Watcher::start(
        config.base_dir.clone(),
        naming.clone(),
        store.clone(),
        gallery.clone(),
    )
    .await?;

    let state = AppState {
        config: config_manager,
        store,
        downloader,
        naming,
        gallery,
        signer,
        base_dir: config.base_dir.clone(),
    };

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, base_dir = %config.base_dir.display(), "sia-server listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    watcher.shutdown().await;
    serve_result?;
    Ok(())
}

fn load_config(
    base_dir_override: Option<PathBuf>,
    port_override: Option<u16>,
) -> sia_config::Result<sia_config::SiaConfig> {
    let manager = ConfigManager::load_default()?;
    let mut config = manager.get();
    if let Some(base_dir) = base_dir_override {
        config.base_dir = base_dir;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    Ok(config)
}

async fn walk_relative_paths(base_dir: &std::path::Path) -> std::io::Result<std::collections::HashSet<String>> {
    let mut out = std::collections::HashSet::new();
    let mut stack = vec![base_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(base_dir) {
                    out.insert(relative.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    Ok(out)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => warn!(error = %e, "failed to install Ctrl+C handler"),
    }
}
