use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Runtime configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    /// Env: DATABASE_PATH (default: "hearth.db")
    pub database_path: String,

    /// Main loop frequency in ticks per second
    /// Env: TICK_RATE (default: 20)
    pub tick_rate: u32,

    /// How often accrued playtime is written to the store, in seconds
    /// Env: PLAYTIME_FLUSH_SECS (default: 60)
    pub playtime_flush: Duration,

    /// How often idle records of offline players are evicted from the cache
    /// Env: CACHE_SWEEP_SECS (default: 300)
    pub cache_sweep: Duration,

    /// Lines sent to every player once their data finished loading
    /// Env: WELCOME_MESSAGES ('|' separated, default: none)
    pub welcome_messages: Vec<String>,

    /// Status endpoint port
    /// Env: STATUS_PORT (default: 3000)
    pub status_port: u16,

    /// Status request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 10)
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv();
        Self {
            database_path: env_or_default_string("DATABASE_PATH", "hearth.db"),
            tick_rate: env_or_default("TICK_RATE", 20u32).max(1),
            playtime_flush: Duration::from_secs(env_or_default("PLAYTIME_FLUSH_SECS", 60)),
            cache_sweep: Duration::from_secs(env_or_default("CACHE_SWEEP_SECS", 300)),
            welcome_messages: parse_welcome_messages(&env_or_default_string(
                "WELCOME_MESSAGES",
                "",
            )),
            status_port: env_or_default("STATUS_PORT", 3000),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 10)),
        }
    }

    /// Number of ticks between two playtime flushes (at least one).
    pub fn playtime_flush_ticks(&self) -> u64 {
        duration_to_ticks(self.playtime_flush, self.tick_rate)
    }

    /// Number of ticks between two cache sweeps (at least one).
    pub fn cache_sweep_ticks(&self) -> u64 {
        duration_to_ticks(self.cache_sweep, self.tick_rate)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "hearth.db".to_string(),
            tick_rate: 20,
            playtime_flush: Duration::from_secs(60),
            cache_sweep: Duration::from_secs(300),
            welcome_messages: Vec::new(),
            status_port: 3000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn duration_to_ticks(duration: Duration, tick_rate: u32) -> u64 {
    (duration.as_secs() * u64::from(tick_rate)).max(1)
}

/// Split the welcome message list. Empty input means no welcome messages.
fn parse_welcome_messages(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split('|').map(str::to_string).collect()
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
