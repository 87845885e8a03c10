use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Submission API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Largest accepted request body (submissions and direct uploads)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: ByteSize,
    #[serde(default = "default_max_urls_per_submission")]
    pub max_urls_per_submission: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
            max_urls_per_submission: default_max_urls_per_submission(),
        }
    }
}

impl ServerConfig {
    /// Base URL a local client uses to reach this server
    ///
    /// An unspecified bind address (`0.0.0.0`, `::`) is reached via loopback.
    pub fn local_url(&self) -> String {
        let mut addr = self.bind_addr;
        if addr.ip().is_unspecified() {
            let loopback: IpAddr = if addr.is_ipv4() {
                Ipv4Addr::LOCALHOST.into()
            } else {
                Ipv6Addr::LOCALHOST.into()
            };
            addr.set_ip(loopback);
        }
        format!("http://{addr}")
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_body_bytes() -> ByteSize {
    ByteSize(20 * 1024 * 1024) // 20 MB, large enough for a direct image upload
}

fn default_max_urls_per_submission() -> usize {
    100
}

/// Durable queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_path")]
    pub path: PathBuf,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Unsettled deliveries a worker may hold at once
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path: default_broker_path(),
            queue_name: default_queue_name(),
            prefetch: default_prefetch(),
        }
    }
}

fn default_broker_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_queue_name() -> String {
    "person_detection".to_string()
}

fn default_prefetch() -> usize {
    1
}

/// Image fetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: ByteSize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            max_image_bytes: default_max_image_bytes(),
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    1
}

fn default_max_image_bytes() -> ByteSize {
    ByteSize(20 * 1024 * 1024)
}

fn default_user_agent() -> String {
    concat!("crowdcount/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Remote detector configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detector_endpoint(),
            timeout_ms: default_detector_timeout_ms(),
        }
    }
}

fn default_detector_endpoint() -> String {
    "http://127.0.0.1:9000/detect".to_string()
}

fn default_detector_timeout_ms() -> u64 {
    60_000
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
}

/// Result store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("uploaded_images")
}

/// Worker behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Copy failed and poison messages to the dead-letter partition before acking
    #[serde(default = "default_dead_letter")]
    pub dead_letter: bool,
    /// Competing consumers run by one worker process, each with its own prefetch window
    #[serde(default = "default_consumers")]
    pub consumers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            dead_letter: default_dead_letter(),
            consumers: default_consumers(),
        }
    }
}

fn default_dead_letter() -> bool {
    true
}

fn default_consumers() -> usize {
    1
}
