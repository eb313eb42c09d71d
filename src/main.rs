use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ephemeral::config::Config;
use ephemeral::git::CgiGitBackend;
use ephemeral::server::{AppState, create_router};
use ephemeral::store::SqliteStore;
use ephemeral::{auth, types, webauth};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Minimal launcher: load config, stand up storage, bootstrap the
/// first admin token if none exists, serve. The command tree and TOML
/// editing a real forge CLI would offer are out of scope here — this
/// binary only runs the server (spec.md Non-goals).
#[derive(Parser, Debug)]
#[command(name = "ephemeral", about = "Self-hosted git forge core")]
struct Cli {
    /// Path to a TOML config file; defaults are used for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    cfg.log_summary();

    if let Err(e) = std::fs::create_dir_all(&cfg.data_dir) {
        error!(path = %cfg.data_dir.display(), "failed to create data dir: {e}");
        std::process::exit(1);
    }

    let store: Arc<dyn ephemeral::store::Store> = match SqliteStore::new(&cfg.db_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to open database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = store.initialize() {
        error!("failed to initialize schema: {e}");
        std::process::exit(1);
    }

    if let Err(e) = bootstrap_admin_token(store.as_ref(), &cfg) {
        error!("failed to bootstrap admin token: {e}");
        std::process::exit(1);
    }

    let cfg = Arc::new(cfg);
    let git_backend: Arc<dyn ephemeral::git::GitBackend> = Arc::new(CgiGitBackend);
    let state = AppState::new(store.clone(), cfg.clone(), git_backend);

    let shutdown = CancellationToken::new();
    let sweeper = webauth::spawn_sweeper(store.clone(), shutdown.clone());

    let router = create_router(state);
    let addr = match cfg.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid host/port: {e}");
            std::process::exit(1);
        }
    };

    info!(%addr, "starting ephemeral");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!("server error: {e}");
    }

    shutdown.cancel();
    let _ = sweeper.await;
}

/// If no admin token exists yet, mint one and drop its secret on disk
/// (mode 0600) so the operator can retrieve it without another
/// out-of-band channel (spec.md §4.1 "bootstrap").
fn bootstrap_admin_token(store: &dyn ephemeral::store::Store, cfg: &Config) -> anyhow::Result<()> {
    if store.has_admin_token()? {
        return Ok(());
    }

    let generated = auth::generate_token();
    let token = types::Token {
        id: uuid::Uuid::new_v4().to_string(),
        name: Some("bootstrap-admin".to_string()),
        is_admin: true,
        created_at: chrono::Utc::now(),
        expires_at: None,
        last_used_at: None,
    };
    store.create_token(&token, &generated.salt, &generated.hash, &generated.lookup)?;

    let path = cfg.admin_token_path();
    std::fs::write(&path, format!("{}\n", generated.secret))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %path.display(), "bootstrapped admin token");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
