//! Process configuration from environment variables (and an optional `.env`).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::compiler::Branding;
use crate::error::{BridgeError, BridgeResult};

pub const DEFAULT_PORT: u16 = 8901;
pub const DEFAULT_HOSTED_URL: &str = "https://posdashboard.zdtamusement.com";
pub const DEFAULT_CHANNEL: &str = "timeclock_channel";
/// Loopback port the frontend sends print and settings commands to.
pub const DEFAULT_COMMAND_PORT: u16 = 8902;

/// How to launch and probe the local backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub program: String,
    pub entry: String,
    pub node_env: String,
    pub port: u16,
    /// Hostname whose certificate is not validated by the readiness probe.
    pub local_host: String,
    pub health_path: String,
    pub ready_interval: Duration,
    pub ready_max_attempts: u32,
}

impl BackendConfig {
    pub fn local_url(&self) -> String {
        format!("https://{}:{}", self.local_host, self.port)
    }

    pub fn health_url(&self) -> String {
        let path = self.health_path.trim_start_matches('/');
        format!("{}/{}", self.local_url(), path)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "node".into(),
            entry: "posdashboard/dist/index.js".into(),
            node_env: "electron".into(),
            port: DEFAULT_PORT,
            local_host: "localhost".into(),
            health_path: "/".into(),
            ready_interval: Duration::from_millis(2000),
            ready_max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub data_dir: PathBuf,
    pub backend: BackendConfig,
    pub hosted_url: String,
    /// `None` disables the timeclock subscriber.
    pub database: Option<DatabaseConfig>,
    pub printers: Vec<String>,
    pub open_previews: bool,
    pub branding: Branding,
    /// Always bound on 127.0.0.1; `0` picks a free port.
    pub command_port: u16,
}

impl BridgeConfig {
    /// Load `.env` (from `POS_ENV_FILE` or the working directory) and read the
    /// process environment.
    pub fn from_env() -> BridgeResult<Self> {
        match std::env::var("POS_ENV_FILE") {
            Ok(path) => {
                dotenv::from_path(&path)
                    .map_err(|e| BridgeError::Config(format!("POS_ENV_FILE {path}: {e}")))?;
            }
            Err(_) => {
                dotenv::dotenv().ok();
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> BridgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = get("POS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let defaults = BackendConfig::default();
        let backend = BackendConfig {
            program: get("POS_BACKEND_PROGRAM").unwrap_or(defaults.program),
            entry: get("POS_BACKEND_ENTRY").unwrap_or(defaults.entry),
            node_env: get("POS_BACKEND_NODE_ENV").unwrap_or(defaults.node_env),
            port: parse_or("ELECTRON_PORT", get("ELECTRON_PORT"), defaults.port)?,
            local_host: get("POS_LOCAL_HOST").unwrap_or(defaults.local_host),
            health_path: get("POS_HEALTH_PATH").unwrap_or(defaults.health_path),
            ready_interval: Duration::from_millis(parse_or(
                "POS_READY_INTERVAL_MS",
                get("POS_READY_INTERVAL_MS"),
                2000u64,
            )?),
            ready_max_attempts: parse_or(
                "POS_READY_MAX_ATTEMPTS",
                get("POS_READY_MAX_ATTEMPTS"),
                defaults.ready_max_attempts,
            )?,
        };

        let database = match get("DB_HOST") {
            Some(host) => Some(DatabaseConfig {
                host,
                port: parse_or("DB_PORT", get("DB_PORT"), 5432u16)?,
                user: get("DB_USER").unwrap_or_else(|| "postgres".into()),
                password: lookup("DB_PASSWORD").unwrap_or_default(),
                name: get("DB_NAME").unwrap_or_else(|| "postgres".into()),
                channel: get("POS_NOTIFY_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.into()),
            }),
            None => None,
        };

        let printers = get("POS_PRINTERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let open_previews = match get("POS_OPEN_PREVIEWS") {
            Some(v) => parse_bool("POS_OPEN_PREVIEWS", &v)?,
            None => true,
        };

        let default_branding = Branding::default();
        let time_zone = match get("POS_TIMEZONE") {
            Some(name) => Tz::from_str(&name)
                .map_err(|_| BridgeError::Config(format!("POS_TIMEZONE: unknown time zone {name}")))?,
            None => default_branding.time_zone,
        };
        let branding = Branding {
            logo_path: get("POS_LOGO_PATH").unwrap_or_else(|| {
                data_dir
                    .join("images")
                    .join("longlogo.png")
                    .to_string_lossy()
                    .into_owned()
            }),
            // Not trimmed: the address block carries trailing blank lines.
            store_address: lookup("POS_STORE_ADDRESS")
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.replace("\\n", "\n"))
                .unwrap_or(default_branding.store_address),
            terms: get("POS_TERMS_TEXT").unwrap_or(default_branding.terms),
            time_zone,
        };

        Ok(Self {
            data_dir,
            backend,
            hosted_url: get("POS_HOSTED_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_HOSTED_URL.into()),
            database,
            printers,
            open_previews,
            branding,
            command_port: parse_or("POS_COMMAND_PORT", get("POS_COMMAND_PORT"), DEFAULT_COMMAND_PORT)?,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(crate::settings::SETTINGS_FILE)
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> BridgeResult<T> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|_| BridgeError::Config(format!("{key}: invalid value {raw:?}"))),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> BridgeResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::Config(format!("{key}: invalid boolean {raw:?}"))),
    }
}

/// Per-user data directory, e.g. `~/.local/share/pos-bridge`.
pub fn default_data_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("pos-bridge")
}
