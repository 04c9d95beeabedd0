use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("`LBC_DELAY_MIN` ({min}) is greater than `LBC_DELAY_MAX` ({max})")]
    PacingWindow { min: u64, max: u64 },
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Run settings, built once and passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sheets_id: String,
    pub sheet_name: String,
    pub service_account_path: PathBuf,
    pub storage_state_path: PathBuf,
    pub headless: bool,
    pub delay_min_secs: u64,
    pub delay_max_secs: u64,
    pub max_ads_per_run: usize,
    pub login_timeout: Option<Duration>,
    pub category_map_path: Option<PathBuf>,
    pub webdriver_url: String,
    pub chromedriver_path: Option<PathBuf>,
    pub proxy: Option<ProxyConfig>,
    pub http_timeout: Duration,
    pub http_connect_timeout: Duration,
}

impl AppConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Keys are matched upper-case first, then lower-case.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| -> Option<String> {
            lookup(key)
                .or_else(|| lookup(&key.to_lowercase()))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let delay_min_secs = parse_number(&get, "LBC_DELAY_MIN", 2)?;
        let delay_max_secs = parse_number(&get, "LBC_DELAY_MAX", 5)?;
        if delay_min_secs > delay_max_secs {
            return Err(ConfigError::PacingWindow {
                min: delay_min_secs,
                max: delay_max_secs,
            });
        }

        let login_timeout = match get("LBC_LOGIN_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_raw("LBC_LOGIN_TIMEOUT_SECS", &raw)?)),
            None => None,
        };

        let proxy = get("PROXY_SERVER").map(|server| ProxyConfig {
            server,
            username: get("PROXY_USERNAME"),
            password: get("PROXY_PASSWORD"),
        });

        Ok(Self {
            sheets_id: required("SHEETS_ID")?,
            sheet_name: get("SHEET_NAME").unwrap_or_else(|| "Feuille 1".to_string()),
            service_account_path: required("GOOGLE_SERVICE_ACCOUNT_JSON")?.into(),
            storage_state_path: get("LBC_STORAGE_STATE")
                .unwrap_or_else(|| "./.state/lbc_storage.json".to_string())
                .into(),
            headless: match get("LBC_HEADLESS") {
                Some(raw) => parse_bool("LBC_HEADLESS", &raw)?,
                None => false,
            },
            delay_min_secs,
            delay_max_secs,
            max_ads_per_run: parse_number(&get, "LBC_MAX_ADS_PER_RUN", 5)? as usize,
            login_timeout,
            category_map_path: get("LBC_CATEGORY_MAP").map(PathBuf::from),
            webdriver_url: get("WEBDRIVER_URL")
                .unwrap_or_else(|| "http://localhost:9515".to_string()),
            chromedriver_path: get("CHROMEDRIVER_PATH").map(PathBuf::from),
            proxy,
            http_timeout: Duration::from_secs(parse_number(&get, "HTTP_TIMEOUT_SECS", 30)?),
            http_connect_timeout: Duration::from_secs(parse_number(
                &get,
                "HTTP_CONNECT_TIMEOUT_SECS",
                5,
            )?),
        })
    }

    pub fn pacing_window(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.delay_min_secs),
            Duration::from_secs(self.delay_max_secs),
        )
    }

    /// Sheet id shortened for log lines.
    pub fn sheets_id_preview(&self) -> String {
        let head: String = self.sheets_id.chars().take(8).collect();
        format!("{head}...")
    }
}

fn parse_number(
    get: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        Some(raw) => parse_raw(key, &raw),
        None => Ok(default),
    }
}

fn parse_raw(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}
