use std::{env, fs, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Layered config: built-in defaults → TOML file (if present) →
/// environment variable overrides. Mirrors the defaults-then-env
/// convention the teacher's `Config::from_env` used, extended with a
/// TOML layer per spec.md §6 ("Server reads a TOML config").
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub auth: AuthConfig,
}

#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    pub web_auth_url: Option<String>,
    pub exchange_validation_url: Option<String>,
    pub exchange_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    server: TomlServer,
    #[serde(default)]
    auth: TomlAuth,
}

#[derive(Debug, Default, Deserialize)]
struct TomlServer {
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlAuth {
    web_auth_url: Option<String>,
    exchange_validation_url: Option<String>,
    exchange_secret: Option<String>,
}

impl Config {
    /// Load from an optional TOML file, then apply environment
    /// overrides, then fall back to defaults.
    pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let toml_cfg = match path {
            Some(p) if p.exists() => {
                let text = fs::read_to_string(p)?;
                toml::from_str::<TomlConfig>(&text)?
            }
            Some(p) => {
                warn!(path = %p.display(), "config file not found, using defaults/env");
                TomlConfig::default()
            }
            None => TomlConfig::default(),
        };

        let host = env::var("EPHEMERAL_HOST")
            .ok()
            .or(toml_cfg.server.host)
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let port = env::var("EPHEMERAL_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .or(toml_cfg.server.port)
            .unwrap_or(8080);

        let data_dir = env::var("EPHEMERAL_DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or(toml_cfg.server.data_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));

        let auth = AuthConfig {
            web_auth_url: env::var("EPHEMERAL_WEB_AUTH_URL")
                .ok()
                .or(toml_cfg.auth.web_auth_url),
            exchange_validation_url: env::var("EPHEMERAL_EXCHANGE_VALIDATION_URL")
                .ok()
                .or(toml_cfg.auth.exchange_validation_url),
            exchange_secret: env::var("EPHEMERAL_EXCHANGE_SECRET")
                .ok()
                .or(toml_cfg.auth.exchange_secret),
        };

        Ok(Self {
            host,
            port,
            data_dir: resolve_path(data_dir),
            auth,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ephemeral.db")
    }

    pub fn admin_token_path(&self) -> PathBuf {
        self.data_dir.join("admin-token")
    }

    pub fn socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn log_summary(&self) {
        info!("config initialized");
        info!("  host           : {}", self.host);
        info!("  port           : {}", self.port);
        info!("  data_dir       : {}", self.data_dir.display());
        info!("  db_path        : {}", self.db_path().display());
        if self.auth.web_auth_url.is_some() {
            info!("  web_auth       : enabled");
        } else {
            info!("  web_auth       : disabled (no web_auth_url configured)");
        }
    }
}

fn resolve_path(p: PathBuf) -> PathBuf {
    if p.is_absolute() {
        p
    } else {
        env::current_dir().map(|base| base.join(&p)).unwrap_or(p)
    }
}
