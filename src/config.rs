use std::env;
use std::fmt;
use std::str::FromStr;
use std::string::String;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;
use tracing::debug;

/// Largest request body accepted, in bytes. Upstream splits and retries batches
/// answered with 413, so this value is part of the wire contract.
pub const MAX_PAYLOAD_BYTES: usize = 262144;

pub const DEFAULT_KEY_FIELD: &str = "EventProcessedUtcTime";

const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is not set")]
    Missing { var: &'static str },
    #[error("{var} is invalid - {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// What to do with a record whose key field cannot be turned into a store key.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub enum MissingKeyPolicy {
    /// Log the record, skip its write and keep going with the rest of the batch.
    #[default]
    Skip,
    /// Refuse the whole batch with a client error before touching the store.
    Reject,
}

impl FromStr for MissingKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(MissingKeyPolicy::Skip),
            "reject" => Ok(MissingKeyPolicy::Reject),
            other => Err(format!("unsupported missing key policy {}", other)),
        }
    }
}

impl fmt::Display for MissingKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MissingKeyPolicy::Skip => write!(f, "skip"),
            MissingKeyPolicy::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Normalised connection URL, always `redis://` or `rediss://` style.
    pub redis_url: String,
    pub redis_database_index: i64,
    pub key_field: String,
    pub missing_key_policy: MissingKeyPolicy,
    pub store_timeout: Duration,
}

impl Config {
    pub fn load_from_env() -> Result<Config, ConfigError> {
        let raw_connection = env::var("REDIS_CONNECTION_STRING")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing {
                var: "REDIS_CONNECTION_STRING",
            })?;

        let redis_database_index = env::var("REDIS_DATABASE_INDEX")
            .map_err(|_| ConfigError::Missing {
                var: "REDIS_DATABASE_INDEX",
            })?
            .trim()
            .parse::<u32>()
            .map_err(|e| ConfigError::Invalid {
                var: "REDIS_DATABASE_INDEX",
                reason: format!("error parsing to a non-negative integer - {}", e),
            })?;

        let conf = Config {
            redis_url: normalize_connection_string(&raw_connection).map_err(|reason| {
                ConfigError::Invalid {
                    var: "REDIS_CONNECTION_STRING",
                    reason,
                }
            })?,
            redis_database_index: i64::from(redis_database_index),
            key_field: env::var("EVENT_KEY_FIELD")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_KEY_FIELD.to_string()),
            missing_key_policy: env::var("MISSING_KEY_POLICY")
                .ok()
                .map(|s| s.parse::<MissingKeyPolicy>())
                .transpose()
                .map_err(|reason| ConfigError::Invalid {
                    var: "MISSING_KEY_POLICY",
                    reason,
                })?
                .unwrap_or_default(),
            store_timeout: env::var("STORE_TIMEOUT_MS")
                .unwrap_or(DEFAULT_STORE_TIMEOUT_MS.to_string())
                .parse::<u64>()
                .map_err(|e| format!("error parsing to u64 - {}", e))
                .and_then(|ms| match ms {
                    0 => Err("must be greater than zero".to_string()),
                    ms => Ok(Duration::from_millis(ms)),
                })
                .map_err(|reason| ConfigError::Invalid {
                    var: "STORE_TIMEOUT_MS",
                    reason,
                })?,
        };

        Ok(conf)
    }
}

/// Accepts either a redis URL or the comma separated
/// `host:port,password=...,ssl=True,abortConnect=False` form handed out by
/// managed Redis offerings, and returns a URL the redis client understands.
pub fn normalize_connection_string(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.starts_with("redis://") || raw.starts_with("rediss://") || raw.starts_with("redis+unix://")
    {
        return Ok(raw.to_string());
    }

    let mut parts = raw.split(',').map(str::trim).filter(|p| !p.is_empty());
    let endpoint = parts
        .next()
        .ok_or_else(|| "empty connection string".to_string())?;
    if endpoint.contains('=') {
        return Err(format!("expected host[:port] first, got {}", endpoint));
    }

    let mut user = None;
    let mut password = None;
    let mut tls = false;
    for option in parts {
        let (name, value) = option
            .split_once('=')
            .ok_or_else(|| format!("malformed option {}", option))?;
        match name.trim().to_lowercase().as_str() {
            "password" => password = Some(value.trim().to_string()),
            "user" => user = Some(value.trim().to_string()),
            "ssl" => {
                tls = value
                    .trim()
                    .to_lowercase()
                    .parse::<bool>()
                    .map_err(|e| format!("error parsing ssl option - {}", e))?
            }
            other => debug!("ignoring connection string option {}", other),
        }
    }

    // managed endpoints without an explicit port use the TLS/plain defaults
    let host_port = if endpoint.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        endpoint.to_string()
    } else if tls {
        format!("{}:6380", endpoint)
    } else {
        format!("{}:6379", endpoint)
    };

    let credentials = match (user, password) {
        (None, None) => String::new(),
        (user, password) => format!(
            "{}:{}@",
            utf8_percent_encode(user.as_deref().unwrap_or(""), NON_ALPHANUMERIC),
            utf8_percent_encode(password.as_deref().unwrap_or(""), NON_ALPHANUMERIC)
        ),
    };

    let scheme = if tls { "rediss" } else { "redis" };
    Ok(format!("{}://{}{}", scheme, credentials, host_port))
}
