use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required settings: {0}")]
    Missing(String),
    #[error("invalid value for `{key}`: `{value}`")]
    Invalid { key: String, value: String },
}

/// Runtime settings, read from the environment once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub api_key: String,
    pub api_base: String,
    pub api_version: Option<String>,
    pub model: String,
    pub browser_width: u32,
    pub browser_height: u32,
    pub browser_headless: bool,
    pub browser_args: Vec<String>,
    pub max_iterations: usize,
    pub default_wait_secs: u64,
    pub base_retry_delay_secs: u64,
    pub max_retries: u32,
    pub max_retry_delay_secs: Option<u64>,
    pub retry_jitter: bool,
    pub operator_timeout_secs: Option<u64>,
    pub crm_url: String,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.openai.com/v1".into(),
            api_version: None,
            model: "computer-use-preview".into(),
            browser_width: 1024,
            browser_height: 768,
            browser_headless: false,
            browser_args: vec!["--disable-extensions".into(), "--disable-file-system".into()],
            max_iterations: 50,
            default_wait_secs: 2,
            base_retry_delay_secs: 2,
            max_retries: 5,
            max_retry_delay_secs: Some(60),
            retry_jitter: false,
            operator_timeout_secs: None,
            crm_url: "http://localhost:8000/login.html".into(),
            snapshot_dir: None,
        }
    }
}

impl Settings {
    /// Loads `.env` (if any) and then reads the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };
        let mut s = Settings::default();

        if let Some(v) = get(&["AZURE_OPENAI_API_KEY", "OPENAI_API_KEY"]) {
            s.api_key = v;
        }
        if let Some(v) = get(&["AZURE_OPENAI_ENDPOINT", "OPENAI_BASE_URL"]) {
            s.api_base = v.trim_end_matches('/').to_string();
        }
        s.api_version = get(&["AZURE_OPENAI_API_VERSION"]);
        if let Some(v) = get(&["CUA_MODEL", "AZURE_OPENAI_MODEL"]) {
            s.model = v;
        }
        if let Some(v) = get(&["DEFAULT_CRM_URL"]) {
            s.crm_url = v;
        }
        s.snapshot_dir = get(&["SNAPSHOT_DIR"]).map(PathBuf::from);

        s.browser_width = parse_or(&get, "BROWSER_WIDTH", s.browser_width)?;
        s.browser_height = parse_or(&get, "BROWSER_HEIGHT", s.browser_height)?;
        s.browser_headless = parse_bool_or(&get, "BROWSER_HEADLESS", s.browser_headless)?;
        s.max_iterations = parse_or(&get, "MAX_ITERATIONS", s.max_iterations)?;
        s.default_wait_secs = parse_or(&get, "DEFAULT_WAIT_TIME", s.default_wait_secs)?;
        s.base_retry_delay_secs = parse_or(&get, "BASE_RETRY_DELAY", s.base_retry_delay_secs)?;
        s.max_retries = parse_or(&get, "MAX_RETRIES", s.max_retries)?;
        s.retry_jitter = parse_bool_or(&get, "RETRY_JITTER", s.retry_jitter)?;
        if get(&["MAX_RETRY_DELAY"]).is_some() {
            // 0 disables the cap
            let cap: u64 = parse_or(&get, "MAX_RETRY_DELAY", 0)?;
            s.max_retry_delay_secs = (cap > 0).then_some(cap);
        }
        if get(&["OPERATOR_TIMEOUT"]).is_some() {
            let t: u64 = parse_or(&get, "OPERATOR_TIMEOUT", 0)?;
            s.operator_timeout_secs = (t > 0).then_some(t);
        }
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.api_key.trim().is_empty() {
            missing.push("AZURE_OPENAI_API_KEY");
        }
        if self.api_base.trim().is_empty() {
            missing.push("AZURE_OPENAI_ENDPOINT");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing.join(", ")))
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.base_retry_delay_secs),
            max_delay: self.max_retry_delay_secs.map(Duration::from_secs),
            jitter: self.retry_jitter,
        }
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_secs(self.default_wait_secs)
    }

    pub fn operator_timeout(&self) -> Option<Duration> {
        self.operator_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&[&str]) -> Option<String>,
{
    match get(&[key]) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { key: key.to_string(), value: raw }),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&[&str]) -> Option<String>,
{
    match get(&[key]) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { key: key.to_string(), value: raw }),
        },
        None => Ok(default),
    }
}
