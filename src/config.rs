//! Config file parsing and validation.
//!
//! The config file holds one `<profile>.<key>=<value>` entry per line. Blank
//! lines and lines starting with `#` are ignored. Example:
//!
//! ```text
//! default.api_token=BAhbB0kiAbB7ImNsaWVudF9pZCI6...
//! default.account_id=999999999
//! default.max_retries=5
//! ```

use crate::api_defaults;
use crate::error::BCError;
use crate::Result;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const API_TOKEN_ENV: &str = "BC_API_TOKEN";
pub const ACCOUNT_ID_ENV: &str = "BC_ACCOUNT_ID";

pub trait ConfigProperties {
    fn api_token(&self) -> &str;
    fn account_id(&self) -> &str;
    fn base_url(&self) -> &str {
        api_defaults::BASE_URL
    }
    fn max_retries(&self) -> u32 {
        api_defaults::DEFAULT_MAX_RETRIES
    }
    fn initial_backoff(&self) -> Duration {
        api_defaults::DEFAULT_INITIAL_BACKOFF
    }
    fn max_backoff(&self) -> Duration {
        api_defaults::DEFAULT_MAX_BACKOFF
    }
    fn rate_limit_requests(&self) -> u32 {
        api_defaults::DEFAULT_RATE_LIMIT_REQUESTS
    }
    fn rate_limit_window(&self) -> Duration {
        api_defaults::DEFAULT_RATE_LIMIT_WINDOW
    }
    fn proactive_delay_threshold(&self) -> u32 {
        api_defaults::PROACTIVE_DELAY_THRESHOLD
    }
    fn proactive_delay_step(&self) -> Duration {
        api_defaults::PROACTIVE_DELAY_STEP
    }
    fn page_delay(&self) -> Duration {
        api_defaults::PAGE_DELAY
    }
    /// Fail pagination on a Link header we cannot parse instead of stopping
    /// at the current page.
    fn strict_link_header(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    api_token: String,
    account_id: String,
    base_url: String,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    rate_limit_requests: u32,
    rate_limit_window: Duration,
    proactive_delay_threshold: u32,
    proactive_delay_step: Duration,
    page_delay: Duration,
    strict_link_header: bool,
}

impl Config {
    pub fn new<T: Read>(reader: T, profile: &str) -> Result<Self> {
        let values = Config::parse(reader, profile)?;
        Config::from_values(&values, profile)
    }

    fn from_values(values: &HashMap<String, String>, profile: &str) -> Result<Self> {
        let api_token = required(values, "api_token", profile)?;
        let account_id = required(values, "account_id", profile)?;
        let base_url = values
            .get("base_url")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| api_defaults::BASE_URL.to_string());
        let rate_limit_requests =
            parse_key(values, "rate_limit_requests", api_defaults::DEFAULT_RATE_LIMIT_REQUESTS)?;
        if rate_limit_requests == 0 {
            return Err(BCError::ConfigurationError(
                "rate_limit_requests must be greater than 0".to_string(),
            )
            .into());
        }
        Ok(Config {
            api_token,
            account_id,
            base_url,
            max_retries: parse_key(values, "max_retries", api_defaults::DEFAULT_MAX_RETRIES)?,
            initial_backoff: millis_key(
                values,
                "initial_backoff_ms",
                api_defaults::DEFAULT_INITIAL_BACKOFF,
            )?,
            max_backoff: millis_key(values, "max_backoff_ms", api_defaults::DEFAULT_MAX_BACKOFF)?,
            rate_limit_requests,
            rate_limit_window: Duration::from_secs(parse_key(
                values,
                "rate_limit_window_seconds",
                api_defaults::DEFAULT_RATE_LIMIT_WINDOW.as_secs(),
            )?),
            proactive_delay_threshold: parse_key(
                values,
                "proactive_delay_threshold",
                api_defaults::PROACTIVE_DELAY_THRESHOLD,
            )?,
            proactive_delay_step: millis_key(
                values,
                "proactive_delay_step_ms",
                api_defaults::PROACTIVE_DELAY_STEP,
            )?,
            page_delay: millis_key(values, "page_delay_ms", api_defaults::PAGE_DELAY)?,
            strict_link_header: parse_key(values, "strict_link_header", false)?,
        })
    }

    fn parse<T: Read>(mut reader: T, profile: &str) -> Result<HashMap<String, String>> {
        let mut config_data = String::new();
        reader.read_to_string(&mut config_data)?;
        let regex = regex::Regex::new(&format!(
            r"^{}\.(?P<key>\w+)\s*=\s*(?P<value>.*)$",
            regex::escape(profile)
        ))?;
        let mut profile_config = HashMap::new();
        for line in config_data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(captured_names) = regex.captures(line) {
                profile_config.insert(
                    captured_names["key"].to_string(),
                    captured_names["value"].trim().to_string(),
                );
            }
        }
        Ok(profile_config)
    }
}

fn required(values: &HashMap<String, String>, key: &str, profile: &str) -> Result<String> {
    match values.get(key) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(BCError::ConfigurationError(format!(
            "No {} found for profile {} in config",
            key, profile
        ))
        .into()),
    }
}

fn parse_key<T: FromStr>(values: &HashMap<String, String>, key: &str, default: T) -> Result<T> {
    match values.get(key) {
        Some(value) => value.parse::<T>().map_err(|_| {
            BCError::ConfigurationError(format!("Invalid value {:?} for {}", value, key)).into()
        }),
        None => Ok(default),
    }
}

fn millis_key(values: &HashMap<String, String>, key: &str, default: Duration) -> Result<Duration> {
    let millis = parse_key(values, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

/// Reads the config for `profile` at `path`. The `BC_API_TOKEN` and
/// `BC_ACCOUNT_ID` environment variables take precedence over the file. The
/// file can be missing as long as both variables are set.
pub fn read_config(path: &Path, profile: &str) -> Result<Config> {
    read_config_with_env(path, profile, |name| std::env::var(name).ok())
}

pub fn read_config_with_env(
    path: &Path,
    profile: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut values = match File::open(path) {
        Ok(file) => Config::parse(file, profile)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            if env(API_TOKEN_ENV).is_none() || env(ACCOUNT_ID_ENV).is_none() {
                return Err(BCError::ConfigurationError(format!(
                    "Config file {} not found. Create it or set the {} and {} environment variables",
                    path.display(),
                    API_TOKEN_ENV,
                    ACCOUNT_ID_ENV
                ))
                .into());
            }
            HashMap::new()
        }
        Err(err) => {
            return Err(BCError::ConfigurationError(format!(
                "Unable to open config file {}: {}",
                path.display(),
                err
            ))
            .into())
        }
    };
    for (name, key) in [(API_TOKEN_ENV, "api_token"), (ACCOUNT_ID_ENV, "account_id")] {
        if let Some(value) = env(name) {
            values.insert(key.to_string(), value);
        }
    }
    Config::from_values(&values, profile)
}

impl ConfigProperties for Config {
    fn api_token(&self) -> &str {
        &self.api_token
    }

    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    fn rate_limit_requests(&self) -> u32 {
        self.rate_limit_requests
    }

    fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    fn proactive_delay_threshold(&self) -> u32 {
        self.proactive_delay_threshold
    }

    fn proactive_delay_step(&self) -> Duration {
        self.proactive_delay_step
    }

    fn page_delay(&self) -> Duration {
        self.page_delay
    }

    fn strict_link_header(&self) -> bool {
        self.strict_link_header
    }
}
