//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use tmx_jobs::ManagerConfig;

/// Immutable server configuration, captured once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket bind host.
    pub ws_host: String,
    /// WebSocket bind port.
    pub ws_port: u16,
    /// Health probe port.
    pub health_port: u16,
    /// Worker count (concurrent ffmpeg pipelines).
    pub workers: usize,
    /// Queue capacity.
    pub queue_cap: usize,
    /// Per-invocation ffmpeg timeout.
    pub ffmpeg_timeout: Duration,
    /// Thread hint for ffmpeg (0 = auto).
    pub ffmpeg_threads: u32,
    /// Root for per-job work directories.
    pub work_root: PathBuf,
    /// Input size cap in bytes.
    pub max_input_bytes: u64,
    /// Stale work dir sweep interval.
    pub cleanup_interval: Duration,
    /// How long terminal jobs stay resolvable in the session map.
    pub retention: Duration,
    /// How long a running job waits for its upload.
    pub upload_timeout: Duration,
    /// Largest accepted WebSocket message.
    pub ws_max_frame_bytes: usize,
    /// Heartbeat ping interval.
    pub ws_ping_interval: Duration,
    /// Grace past the interval before a silent peer is dropped.
    pub ws_ping_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 8080,
            health_port: 8081,
            workers: 4,
            queue_cap: 64,
            ffmpeg_timeout: Duration::from_secs(600),
            ffmpeg_threads: 0,
            work_root: PathBuf::from("/tmp/tmx-jobs"),
            max_input_bytes: 500 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(60),
            retention: Duration::from_secs(300),
            upload_timeout: Duration::from_secs(30),
            ws_max_frame_bytes: 524_288_000,
            ws_ping_interval: Duration::from_secs(30),
            ws_ping_timeout: Duration::from_secs(10),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ws_host: std::env::var("TMX_WS_HOST").unwrap_or(defaults.ws_host),
            ws_port: env_parse("TMX_WS_PORT", defaults.ws_port),
            health_port: env_parse("TMX_HEALTH_PORT", defaults.health_port),
            workers: env_parse("TMX_MAX_CONCURRENT_JOBS", defaults.workers).clamp(1, 32),
            queue_cap: env_parse("TMX_QUEUE_CAP", defaults.queue_cap).max(1),
            ffmpeg_timeout: Duration::from_secs(env_parse(
                "TMX_FFMPEG_TIMEOUT_SECS",
                defaults.ffmpeg_timeout.as_secs(),
            )),
            ffmpeg_threads: env_parse("TMX_FFMPEG_THREADS", defaults.ffmpeg_threads),
            work_root: std::env::var("TMX_WORK_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_root),
            max_input_bytes: env_parse("TMX_MAX_FILE_SIZE_MB", 500u64) * 1024 * 1024,
            cleanup_interval: Duration::from_secs(env_parse(
                "TMX_CLEANUP_INTERVAL_SECS",
                defaults.cleanup_interval.as_secs(),
            )),
            retention: Duration::from_secs(env_parse(
                "TMX_RETENTION_SECS",
                defaults.retention.as_secs(),
            )),
            upload_timeout: Duration::from_secs(env_parse(
                "TMX_UPLOAD_TIMEOUT_SECS",
                defaults.upload_timeout.as_secs(),
            )),
            ws_max_frame_bytes: env_parse("TMX_WS_MAX_FRAME_BYTES", defaults.ws_max_frame_bytes),
            ws_ping_interval: Duration::from_secs(env_parse(
                "TMX_WS_PING_INTERVAL_SECS",
                defaults.ws_ping_interval.as_secs(),
            )),
            ws_ping_timeout: Duration::from_secs(env_parse(
                "TMX_WS_PING_TIMEOUT_SECS",
                defaults.ws_ping_timeout.as_secs(),
            )),
        }
    }

    /// The job manager configuration derived from this config.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            workers: self.workers,
            queue_cap: self.queue_cap,
            work_root: self.work_root.clone(),
            max_input_bytes: self.max_input_bytes,
            ffmpeg_timeout: self.ffmpeg_timeout,
            ffmpeg_threads: self.ffmpeg_threads,
            upload_timeout: self.upload_timeout,
            cleanup_interval: self.cleanup_interval,
            work_dir_max_age: self.retention.max(Duration::from_secs(600)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.ws_port, 8080);
        assert_eq!(config.health_port, 8081);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_input_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn manager_config_mirrors_server_config() {
        let config = ServerConfig {
            workers: 2,
            queue_cap: 8,
            ..Default::default()
        };
        let mc = config.manager_config();
        assert_eq!(mc.workers, 2);
        assert_eq!(mc.queue_cap, 8);
        assert_eq!(mc.work_root, config.work_root);
    }
}
