use aion_stream::{ProducerSettings, StreamLimits, UpstreamConfig, WordSplitterConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub body_limit_bytes: usize,
    /// Buffered frames between the controller and the HTTP body.
    pub channel_capacity: usize,
    pub limits: StreamLimits,
    pub producer: ProducerSettings,
    pub rate_limit_per_minute: Option<u64>,
    pub chat_rate_limit_per_minute: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        FileConfig::default().into()
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    stream: StreamSection,
    #[serde(default)]
    producer: ProducerSettings,
    #[serde(default)]
    rate_limit: RateLimitSection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default = "default_body_limit")]
    body_limit_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamSection {
    #[serde(default = "default_max_fragments")]
    max_fragments: usize,
    /// Zero disables the deadline.
    #[serde(default = "default_deadline_secs")]
    deadline_secs: u64,
    #[serde(default)]
    signal_truncation: bool,
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            max_fragments: default_max_fragments(),
            deadline_secs: default_deadline_secs(),
            signal_truncation: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RateLimitSection {
    #[serde(default)]
    requests_per_minute: Option<u64>,
    #[serde(default)]
    chat_requests_per_minute: Option<u64>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

fn default_max_fragments() -> usize {
    200
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_channel_capacity() -> usize {
    16
}

fn deadline(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl From<FileConfig> for ServerConfig {
    fn from(file: FileConfig) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            environment: file.server.environment,
            body_limit_bytes: file.server.body_limit_bytes,
            channel_capacity: file.stream.channel_capacity.max(1),
            limits: StreamLimits {
                max_fragments: file.stream.max_fragments,
                deadline: deadline(file.stream.deadline_secs),
                signal_truncation: file.stream.signal_truncation,
            },
            producer: file.producer,
            rate_limit_per_minute: file.rate_limit.requests_per_minute,
            chat_rate_limit_per_minute: file.rate_limit.chat_requests_per_minute,
        }
    }
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        match config_path(env::var("AION_SERVER_CONFIG").ok()) {
            Some(path) => Self::from_path(path),
            None => Ok(Self::from_env()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path.display(), err))?;
        Self::from_toml(&contents)
            .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), err))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let parsed: FileConfig = toml::from_str(contents)?;
        Ok(parsed.into())
    }

    fn from_env() -> Self {
        let host = env::var("AION_HOST").unwrap_or_else(|_| default_host());
        let port = env_parse("AION_PORT").unwrap_or_else(default_port);
        let environment = env::var("AION_ENVIRONMENT").unwrap_or_else(|_| default_environment());
        let max_fragments = env_parse("AION_MAX_FRAGMENTS").unwrap_or_else(default_max_fragments);
        let deadline_secs =
            env_parse("AION_STREAM_DEADLINE_SECS").unwrap_or_else(default_deadline_secs);

        let producer = match env::var("AION_PRODUCER").as_deref() {
            Ok("upstream") => {
                let mut upstream = UpstreamConfig::default();
                if let Ok(base_url) = env::var("AION_UPSTREAM_BASE_URL") {
                    upstream.base_url = base_url;
                }
                if let Ok(model) = env::var("AION_UPSTREAM_MODEL") {
                    upstream.model = model;
                }
                ProducerSettings::Upstream(upstream)
            }
            _ => ProducerSettings::WordSplitter(WordSplitterConfig {
                fragment_delay_ms: env_parse("AION_FRAGMENT_DELAY_MS")
                    .unwrap_or(WordSplitterConfig::default().fragment_delay_ms),
                max_fragments,
            }),
        };

        Self {
            host,
            port,
            environment,
            body_limit_bytes: default_body_limit(),
            channel_capacity: default_channel_capacity(),
            limits: StreamLimits {
                max_fragments,
                deadline: deadline(deadline_secs),
                signal_truncation: env_parse("AION_SIGNAL_TRUNCATION").unwrap_or(false),
            },
            producer,
            rate_limit_per_minute: env_parse("AION_RATE_LIMIT_RPM"),
            chat_rate_limit_per_minute: env_parse("AION_CHAT_RATE_LIMIT_RPM"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse::<T>().ok())
}

/// The explicitly configured file, else `./server.toml` when present.
fn config_path(explicit: Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }
    let default = Path::new("server.toml");
    default.exists().then(|| default.to_path_buf())
}
