use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "https://api.plant.id/v3/health_assessment";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// External command that scores soil/climate readings.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ScorerCommand {
    /// Splits a whitespace separated command line. Blank input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub upload_dir: PathBuf,
    pub classifier_endpoint: String,
    pub classifier_credentials: Vec<String>,
    pub classifier_timeout: Duration,
    pub scorer: Option<ScorerCommand>,
    pub scorer_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 5020,
            body_limit_bytes: 10 * 1024 * 1024,
            upload_dir: PathBuf::from("uploads"),
            classifier_endpoint: DEFAULT_ENDPOINT.into(),
            classifier_credentials: Vec::new(),
            classifier_timeout: Duration::from_secs(30),
            scorer: None,
            scorer_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let body_limit_bytes = match lookup("BODY_LIMIT_MB") {
            Some(raw) => {
                const EXPECTED: &str = "size in megabytes";
                parse::<usize>("BODY_LIMIT_MB", EXPECTED, &raw)?
                    .checked_mul(1024 * 1024)
                    .ok_or_else(|| ConfigError::Invalid {
                        name: "BODY_LIMIT_MB",
                        expected: EXPECTED,
                        value: raw.clone(),
                    })?
            }
            None => defaults.body_limit_bytes,
        };

        let port = match lookup("PORT") {
            Some(raw) => parse::<u16>("PORT", "number between 0 and 65535", &raw)?,
            None => defaults.port,
        };

        let classifier_timeout = match lookup("CLASSIFIER_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse("CLASSIFIER_TIMEOUT_SECS", "integer", &raw)?),
            None => defaults.classifier_timeout,
        };

        let scorer_timeout = match lookup("SCORER_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse("SCORER_TIMEOUT_SECS", "integer", &raw)?),
            None => defaults.scorer_timeout,
        };

        let credentials = credential_list(
            lookup("PLANT_ID_API_KEYS").as_deref(),
            lookup("PLANT_ID_API_KEY").as_deref(),
        );

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port,
            body_limit_bytes,
            upload_dir: lookup("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            classifier_endpoint: lookup("PLANT_ID_ENDPOINT").unwrap_or(defaults.classifier_endpoint),
            classifier_credentials: credentials,
            classifier_timeout,
            scorer: lookup("SCORER_COMMAND")
                .as_deref()
                .and_then(ScorerCommand::parse),
            scorer_timeout,
        })
    }
}

fn parse<T: std::str::FromStr>(
    name: &'static str,
    expected: &'static str,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value: raw.to_string(),
    })
}

/// Ordered, de-duplicated credential list. The comma list comes first, the single key last.
fn credential_list(list: Option<&str>, single: Option<&str>) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let candidates = list
        .unwrap_or_default()
        .split(',')
        .chain(single.into_iter());
    for key in candidates.map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    keys
}
