use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

const MIB: u64 = 1024 * 1024;

/// Application configuration loaded from environment variables.
/// Every variable has a default; malformed values fail startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub templates_dir: PathBuf,
    pub template_manifest: PathBuf,
    pub max_template_bytes: u64,
    pub max_request_bytes: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub rate_limit_sweep_interval: Duration,
    pub conversion_timeout: Duration,
    /// Office engine binary; `None` leaves only the built-in renderer.
    pub soffice_path: Option<PathBuf>,
    pub filename_max_len: usize,
    pub ai_service_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let templates_dir = PathBuf::from(env_or("TEMPLATES_DIR", "templates"));
        let template_manifest = optional_env("TEMPLATE_MANIFEST")
            .map(PathBuf::from)
            .unwrap_or_else(|| templates_dir.join("manifest.json"));

        Ok(Config {
            port: parse_env("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),
            templates_dir,
            template_manifest,
            max_template_bytes: parse_env("MAX_TEMPLATE_BYTES", 10 * MIB)?,
            max_request_bytes: parse_env("MAX_REQUEST_BYTES", 5 * MIB as usize)?,
            rate_limit_window: Duration::from_secs(parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max_requests: parse_env("RATE_LIMIT_MAX_REQUESTS", 10)?,
            rate_limit_sweep_interval: Duration::from_secs(parse_env("RATE_LIMIT_SWEEP_SECS", 300)?),
            conversion_timeout: Duration::from_millis(parse_env("CONVERSION_TIMEOUT_MS", 30_000)?),
            soffice_path: optional_env("SOFFICE_PATH").map(PathBuf::from),
            filename_max_len: at_least_one("FILENAME_MAX_LEN", parse_env("FILENAME_MAX_LEN", 100)?)?,
            ai_service_url: optional_env("AI_SERVICE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }
}

impl Default for Config {
    /// The configuration `from_env` yields with an empty environment.
    fn default() -> Self {
        let templates_dir = PathBuf::from("templates");
        Config {
            port: 8080,
            rust_log: "info".to_string(),
            template_manifest: templates_dir.join("manifest.json"),
            templates_dir,
            max_template_bytes: 10 * MIB,
            max_request_bytes: 5 * MIB as usize,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max_requests: 10,
            rate_limit_sweep_interval: Duration::from_secs(300),
            conversion_timeout: Duration::from_millis(30_000),
            soffice_path: None,
            filename_max_len: 100,
            ai_service_url: None,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}

fn at_least_one(key: &str, value: usize) -> Result<usize> {
    anyhow::ensure!(value >= 1, "{key} must be at least 1");
    Ok(value)
}
