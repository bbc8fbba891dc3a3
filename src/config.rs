/// Runtime configuration, sourced from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// Global simultaneous consultation slots across all providers
    pub max_concurrency: usize,
    /// Simultaneous slots per provider (1 = one session, strictly sequential)
    pub per_provider_concurrency: usize,
    /// Pre-flight jitter bounds, in seconds
    pub fetch_min_delay: f64,
    pub fetch_max_delay: f64,
    /// Generic retry budget per identifier
    pub max_retries: u32,
    /// Cooldown after a block signal, in seconds
    pub block_sleep_seconds: u64,
    /// How many block cooldowns to tolerate before giving up
    pub max_block_cooldowns: u32,
    /// Default timeout for selector waits, in milliseconds
    pub timeout_selector_ms: u64,
    /// Default cache TTL, in days
    pub cache_ttl_days: i64,
    /// Directory of per-provider mapping files
    pub mappings_dir: String,
    /// Directory of persisted session storage states
    pub state_dir: String,
    /// Directory of the file-backed cache store
    pub cache_dir: String,
    /// Directory of failure screenshot artifacts
    pub errors_dir: String,
    /// Append-only metrics file
    pub metrics_file: String,
    /// Run the browser headless
    pub headless: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            per_provider_concurrency: 1,
            fetch_min_delay: 0.5,
            fetch_max_delay: 1.5,
            max_retries: 2,
            block_sleep_seconds: 120,
            max_block_cooldowns: 2,
            timeout_selector_ms: 20_000,
            cache_ttl_days: 7,
            mappings_dir: "mappings".to_string(),
            state_dir: "data/storage_states".to_string(),
            cache_dir: "data/cache".to_string(),
            errors_dir: "data/errors".to_string(),
            metrics_file: "data/metrics.jsonl".to_string(),
            headless: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrency: env_parsed("MAX_CONCURRENCY", default.max_concurrency),
            per_provider_concurrency: env_parsed(
                "PER_PROVIDER_CONCURRENCY",
                default.per_provider_concurrency,
            ),
            fetch_min_delay: env_parsed("FETCH_MIN_DELAY", default.fetch_min_delay),
            fetch_max_delay: env_parsed("FETCH_MAX_DELAY", default.fetch_max_delay),
            max_retries: env_parsed("MAX_RETRIES", default.max_retries),
            block_sleep_seconds: env_parsed("BLOCK_SLEEP_SECONDS", default.block_sleep_seconds),
            max_block_cooldowns: env_parsed("MAX_BLOCK_COOLDOWNS", default.max_block_cooldowns),
            timeout_selector_ms: env_parsed("TIMEOUT_SELECTOR_MS", default.timeout_selector_ms),
            cache_ttl_days: env_parsed("CACHE_TTL_DAYS", default.cache_ttl_days),
            mappings_dir: std::env::var("MAPPINGS_DIR").unwrap_or(default.mappings_dir),
            state_dir: std::env::var("STATE_DIR").unwrap_or(default.state_dir),
            cache_dir: std::env::var("CACHE_DIR").unwrap_or(default.cache_dir),
            errors_dir: std::env::var("ERRORS_DIR").unwrap_or(default.errors_dir),
            metrics_file: std::env::var("METRICS_FILE").unwrap_or(default.metrics_file),
            headless: env_parsed("HEADLESS", default.headless),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
