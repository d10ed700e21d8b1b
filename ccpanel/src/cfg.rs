use std::{env, fs, path::Path, time::Duration};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable which overrides `api_base` from the configuration files.
pub const API_BASE_ENV_VAR: &str = "CCPANEL_API_BASE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Base URL of the testbed backend. All API paths and event streams are resolved against it.
    #[serde(default = "api_base_default")]
    pub api_base: String,
    /// Timeout for a single API request. Does not apply to event streams. Defaults to 15 seconds.
    #[serde(default = "request_timeout_default")]
    pub request_timeout: Duration,
    /// Timeout for establishing a connection, for both API requests and event streams.
    #[serde(default = "connect_timeout_default")]
    pub connect_timeout: Duration,
    /// Token sent as the `token` query parameter to the event streams and the log tail.
    #[serde(default)]
    pub token: Option<String>,
    /// How long a dropped event stream waits before reconnecting, unless the server sends its own
    /// `retry:` field.
    #[serde(default = "sse_retry_default")]
    pub sse_retry: Duration,
    /// Capacity of the queue between the stream readers and the log store.
    #[serde(default = "event_queue_default")]
    pub event_queue: usize,
    /// Number of lines requested by a log tail when no limit is given.
    #[serde(default = "tail_limit_default")]
    pub tail_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base: api_base_default(),
            request_timeout: request_timeout_default(),
            connect_timeout: connect_timeout_default(),
            token: None,
            sse_retry: sse_retry_default(),
            event_queue: event_queue_default(),
            tail_limit: tail_limit_default(),
        }
    }
}

pub fn api_base_default() -> String {
    "http://localhost:8080".to_string()
}

pub fn request_timeout_default() -> Duration {
    Duration::from_secs(15)
}

pub fn connect_timeout_default() -> Duration {
    Duration::from_secs(5)
}

pub fn sse_retry_default() -> Duration {
    // Matches the reconnection delay browsers use for EventSource.
    Duration::from_secs(3)
}

pub fn event_queue_default() -> usize {
    1024
}

pub fn tail_limit_default() -> usize {
    200
}

impl Config {
    /// Load and merge a list of TOML files. A top-level key may only appear in one of them.
    /// With no files, the defaults are used.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Config> {
        let mut merged = toml::Table::new();
        for path in paths {
            let path = path.as_ref();
            let contents = fs::read_to_string(path)?;
            let table: toml::Table = toml::from_str(&contents)?;
            for key in table.keys() {
                if merged.contains_key(key) {
                    return Err(anyhow!(
                        "configuration conflict: {path:?} contained a key {key:?} that was already included in an earlier file"
                    ));
                }
            }
            merged.extend(table);
        }
        let mut config: Config = Deserialize::deserialize(merged)?;
        if let Ok(base) = env::var(API_BASE_ENV_VAR) {
            config.api_base = base;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        if self.event_queue == 0 {
            return Err(anyhow!("event_queue must be at least 1"));
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api_base).map_err(|e| anyhow!("invalid api_base {:?}: {e}", self.api_base))
    }

    /// The token, if it was configured and is not blank.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = Config::load::<&str>(&[]).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.tail_limit, 200);
        assert_eq!(config.token(), None);
    }

    #[test]
    fn merges_files() {
        let a = write_config("api_base = \"http://10.0.0.1:9000\"\n");
        let b = write_config("token = \"abc\"\ntail_limit = 50\n");
        let config = Config::load(&[a.path(), b.path()]).unwrap();
        if env::var(API_BASE_ENV_VAR).is_err() {
            assert_eq!(config.api_base, "http://10.0.0.1:9000");
        }
        assert_eq!(config.token(), Some("abc"));
        assert_eq!(config.tail_limit, 50);
    }

    #[test]
    fn conflicting_keys() {
        let a = write_config("tail_limit = 10\n");
        let b = write_config("tail_limit = 20\n");
        let err = Config::load(&[a.path(), b.path()]).unwrap_err();
        assert!(err.to_string().contains("configuration conflict"));
    }

    #[test]
    fn unknown_key() {
        let a = write_config("no_such_thing = 1\n");
        assert!(Config::load(&[a.path()]).is_err());
    }

    #[test]
    fn blank_token_is_none() {
        let config = Config {
            token: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.token(), None);
    }
}
