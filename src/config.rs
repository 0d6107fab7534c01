//! Environment-driven server configuration.

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the API server listens on
    pub port: u16,
    /// Path to the SQLite database backing the event log and task registry
    pub database_path: String,
    /// Maximum number of simultaneously running tasks; excess stays pending
    pub max_concurrent_tasks: usize,
    /// How long a tail read blocks before returning empty
    pub tail_block_ms: u64,
    /// Historical replay batch size
    pub replay_batch: usize,
    /// Days a task (and its stream) is retained after finishing
    pub task_ttl_days: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: env_parse("UNDERTOW_PORT", 8000)?,
            database_path: env_str("UNDERTOW_DATABASE", "./data/undertow.db"),
            max_concurrent_tasks: env_parse("UNDERTOW_MAX_CONCURRENT_TASKS", 3)?,
            tail_block_ms: env_parse("UNDERTOW_TAIL_BLOCK_MS", 1000)?,
            replay_batch: env_parse("UNDERTOW_REPLAY_BATCH", 100)?,
            task_ttl_days: env_parse("UNDERTOW_TASK_TTL_DAYS", 7)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            database_path: ":memory:".to_string(),
            max_concurrent_tasks: 3,
            tail_block_ms: 1000,
            replay_batch: 100,
            task_ttl_days: 7,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
