use crate::error::{AppError, AppResult};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CozeSettings {
    pub api_base_url: String,
    pub access_token: String,
    pub workflow_id: String,
    pub app_id: String,
    pub timeout_secs: u64,
}

impl CozeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Process-wide settings, built once in `main` and shared behind an `Arc`.
///
/// Every field has a default so the service starts with an empty environment.
#[derive(Clone, Debug)]
pub struct Settings {
    pub app_name: String,
    pub app_version: String,
    pub app_description: String,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub cors_origins: Vec<String>,
    pub cors_allow_credentials: bool,
    pub cors_allow_methods: Vec<String>,
    pub cors_allow_headers: Vec<String>,
    pub database_url: String,
    pub database_echo: bool,
    pub database_pool_size: u32,
    pub database_pool_timeout_secs: u64,
    pub log_level: String,
    pub log_file: Option<String>,
    pub coze: CozeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            app_name: "Feishu Bot".to_string(),
            app_version: "0.1.0".to_string(),
            app_description: "集成 Coze AI 的飞书机器人".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            debug: true,
            cors_origins: vec!["*".to_string()],
            cors_allow_credentials: true,
            cors_allow_methods: vec!["*".to_string()],
            cors_allow_headers: vec!["*".to_string()],
            database_url: "sqlite://feishu-bot.sqlite".to_string(),
            database_echo: false,
            database_pool_size: 5,
            database_pool_timeout_secs: 30,
            log_level: "debug".to_string(),
            log_file: None,
            coze: CozeSettings {
                api_base_url: "https://api.coze.cn".to_string(),
                access_token: String::new(),
                workflow_id: String::new(),
                app_id: String::new(),
                timeout_secs: 30,
            },
        }
    }
}

impl Settings {
    /// Loads `.env` (if present) and then reads the process environment.
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Missing keys fall back to
    /// the defaults; present but malformed values are configuration errors.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let debug = match get("DEBUG") {
            Some(raw) => parse_bool("DEBUG", &raw)?,
            None => defaults.debug,
        };

        let log_level = get("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| if debug { "debug" } else { "info" }.to_string());

        Ok(Settings {
            app_name: get("APP_NAME").unwrap_or(defaults.app_name),
            app_version: get("APP_VERSION").unwrap_or(defaults.app_version),
            app_description: get("APP_DESCRIPTION").unwrap_or(defaults.app_description),
            host: get("HOST").unwrap_or(defaults.host),
            port: match get("PORT") {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| AppError::Config(format!("Invalid PORT: {}", raw)))?,
                None => defaults.port,
            },
            debug,
            cors_origins: match get("CORS_ORIGINS") {
                Some(raw) => parse_list("CORS_ORIGINS", &raw)?,
                None => defaults.cors_origins,
            },
            cors_allow_credentials: match get("CORS_ALLOW_CREDENTIALS") {
                Some(raw) => parse_bool("CORS_ALLOW_CREDENTIALS", &raw)?,
                None => defaults.cors_allow_credentials,
            },
            cors_allow_methods: match get("CORS_ALLOW_METHODS") {
                Some(raw) => parse_list("CORS_ALLOW_METHODS", &raw)?,
                None => defaults.cors_allow_methods,
            },
            cors_allow_headers: match get("CORS_ALLOW_HEADERS") {
                Some(raw) => parse_list("CORS_ALLOW_HEADERS", &raw)?,
                None => defaults.cors_allow_headers,
            },
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            database_echo: match get("DATABASE_ECHO") {
                Some(raw) => parse_bool("DATABASE_ECHO", &raw)?,
                None => defaults.database_echo,
            },
            database_pool_size: match get("DATABASE_POOL_SIZE") {
                Some(raw) => parse_positive("DATABASE_POOL_SIZE", &raw)?,
                None => defaults.database_pool_size,
            },
            database_pool_timeout_secs: match get("DATABASE_POOL_TIMEOUT") {
                Some(raw) => parse_positive("DATABASE_POOL_TIMEOUT", &raw)?,
                None => defaults.database_pool_timeout_secs,
            },
            log_level,
            log_file: get("LOG_FILE").filter(|v| !v.is_empty()),
            coze: CozeSettings {
                api_base_url: get("COZE_API_BASE_URL")
                    .map(|v| v.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.coze.api_base_url),
                access_token: get("COZE_ACCESS_TOKEN").unwrap_or_default(),
                workflow_id: get("COZE_WORKFLOW_ID").unwrap_or_default(),
                app_id: get("COZE_APP_ID").unwrap_or_default(),
                timeout_secs: match get("COZE_TIMEOUT") {
                    Some(raw) => parse_positive("COZE_TIMEOUT", &raw)?,
                    None => defaults.coze.timeout_secs,
                },
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn database_pool_timeout(&self) -> Duration {
        Duration::from_secs(self.database_pool_timeout_secs)
    }
}

fn parse_bool(key: &str, raw: &str) -> AppResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Ok(false),
        _ => Err(AppError::Config(format!("Invalid {}: {}", key, raw))),
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> AppResult<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(AppError::Config(format!("Invalid {}: {}", key, raw))),
    }
}

/// Accepts a JSON array (`["a","b"]`) or a comma-separated string (`a, b`).
fn parse_list(key: &str, raw: &str) -> AppResult<Vec<String>> {
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(raw)
            .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e)));
    }

    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}
