use std::env;
use std::str::FromStr;

use crate::recipe::{MEMORY_GB, MEMORY_MB};
use crate::validation::Limits;

pub const DEFAULT_QUEUE_NAME: &str = "codejudge:queue:submissions";

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub queue_name: String,
    /// Upper bound on concurrently running testcase containers per submission
    pub max_parallel_runs: usize,
    pub max_memory_bytes: u64,
    pub max_time_limit_ms: u64,
    pub default_memory_bytes: u64,
    pub default_time_limit_ms: u64,
    pub pop_timeout_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            queue_name: env::var("QUEUE_NAME")
                .unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
            max_parallel_runs: env_or("MAX_PARALLEL_RUNS", 4usize).max(1),
            max_memory_bytes: env_or("MAX_MEMORY_BYTES", MEMORY_GB),
            max_time_limit_ms: env_or("MAX_TIME_LIMIT_MS", 30_000),
            default_memory_bytes: env_or("DEFAULT_MEMORY_BYTES", 256 * MEMORY_MB),
            default_time_limit_ms: env_or("DEFAULT_TIME_LIMIT_MS", 5_000),
            pop_timeout_secs: env_or("POP_TIMEOUT_SECS", 5),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_memory_bytes: self.max_memory_bytes,
            max_time_limit_ms: self.max_time_limit_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
