//! Runtime configuration: plain defaults overridable by `CLAWMINER_*`
//! environment variables.

/// Data directory name under `$HOME`.
pub const DATA_DIR: &str = ".clawminer/mainnet";

/// Bind address for the mandatory relay-mesh HTTP surface.
pub const RELAY_HTTP_BIND_DEFAULT: &str = "0.0.0.0";
pub const RELAY_HTTP_PORT_DEFAULT: u16 = 9090;
pub const P2P_PORT_DEFAULT: u16 = 9091;

#[derive(Debug, Clone)]
pub struct Config {
    // Identity
    pub miner_address: String,
    pub data_dir: String,

    // Networking / HTTP surface
    pub relay_http_bind: String,
    pub relay_http_port: u16,
    pub p2p_port: u16,

    // Difficulty adjuster
    pub adjustment_period: u64,
    pub target_block_time_ms: u64,
    pub initial_difficulty: u32,

    // Mempool / mining loop
    pub min_items_to_mine: usize,
    pub batch_size: usize,
    pub heartbeat_interval_ms: u64,
    pub chunk_size: u64,
    pub max_chunks_per_header: u64,

    // Mint broadcaster retry policy
    pub mint_max_retries: u32,
    pub mint_retry_min_ms: u64,
    pub mint_retry_max_ms: u64,

    // Relay cache
    pub relay_cache_max: usize,
    pub relay_cache_ttl_s: u64,
    pub relay_prune_interval_ms: u64,

    // Header sync / Block Header Service
    pub bhs_url: Option<String>,
    pub bhs_api_key: Option<String>,
    pub bhs_poll_interval_ms: u64,
    pub bhs_batch_size: u32,
    pub bhs_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        let home = resolve_home_dir();
        Config {
            miner_address: String::new(),
            data_dir: format!("{home}/{DATA_DIR}"),

            relay_http_bind: RELAY_HTTP_BIND_DEFAULT.to_string(),
            relay_http_port: RELAY_HTTP_PORT_DEFAULT,
            p2p_port: P2P_PORT_DEFAULT,

            adjustment_period: 144,
            target_block_time_ms: 600_000,
            initial_difficulty: 8,

            min_items_to_mine: 5,
            batch_size: 10,
            heartbeat_interval_ms: 15_000,
            chunk_size: 1_000,
            max_chunks_per_header: 1_000,

            mint_max_retries: 3,
            mint_retry_min_ms: 2_000,
            mint_retry_max_ms: 5_000,

            relay_cache_max: 10_000,
            relay_cache_ttl_s: 3_600,
            relay_prune_interval_ms: 60_000,

            bhs_url: None,
            bhs_api_key: None,
            bhs_poll_interval_ms: 30_000,
            bhs_batch_size: 2_000,
            bhs_max_retries: 5,
        }
    }
}

impl Config {
    /// Builds the default configuration, then applies any `CLAWMINER_*`
    /// environment overrides present in the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(v) = std::env::var("CLAWMINER_MINER_ADDRESS") {
            cfg.miner_address = v;
        }
        if let Ok(v) = std::env::var("CLAWMINER_DATA_DIR") {
            cfg.data_dir = v;
        }
        if let Ok(v) = std::env::var("CLAWMINER_RELAY_HTTP_BIND") {
            cfg.relay_http_bind = v;
        }
        if let Ok(p) = env_parsed("CLAWMINER_RELAY_HTTP_PORT") {
            cfg.relay_http_port = p;
        }
        if let Ok(p) = env_parsed("CLAWMINER_P2P_PORT") {
            cfg.p2p_port = p;
        }
        if let Ok(v) = env_parsed("CLAWMINER_ADJUSTMENT_PERIOD") {
            cfg.adjustment_period = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_TARGET_BLOCK_TIME_MS") {
            cfg.target_block_time_ms = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_INITIAL_DIFFICULTY") {
            cfg.initial_difficulty = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_MIN_ITEMS_TO_MINE") {
            cfg.min_items_to_mine = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_BATCH_SIZE") {
            cfg.batch_size = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_HEARTBEAT_INTERVAL_MS") {
            cfg.heartbeat_interval_ms = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_MINT_MAX_RETRIES") {
            cfg.mint_max_retries = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_MINT_RETRY_MIN_MS") {
            cfg.mint_retry_min_ms = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_MINT_RETRY_MAX_MS") {
            cfg.mint_retry_max_ms = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_RELAY_CACHE_MAX") {
            cfg.relay_cache_max = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_RELAY_CACHE_TTL_S") {
            cfg.relay_cache_ttl_s = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_RELAY_PRUNE_INTERVAL_MS") {
            cfg.relay_prune_interval_ms = v;
        }
        if let Ok(v) = std::env::var("CLAWMINER_BHS_URL") {
            cfg.bhs_url = Some(v);
        }
        if let Ok(v) = std::env::var("CLAWMINER_BHS_API_KEY") {
            cfg.bhs_api_key = Some(v);
        }
        if let Ok(v) = env_parsed("CLAWMINER_BHS_POLL_INTERVAL_MS") {
            cfg.bhs_poll_interval_ms = v;
        }
        if let Ok(v) = env_parsed("CLAWMINER_BHS_BATCH_SIZE") {
            cfg.bhs_batch_size = v;
        }

        cfg
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<T, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn resolve_home_dir() -> String {
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return home;
        }
    }
    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            if !home.trim().is_empty() {
                return home;
            }
        }
        let drive = std::env::var("HOMEDRIVE").unwrap_or_default();
        let path = std::env::var("HOMEPATH").unwrap_or_default();
        if !drive.is_empty() || !path.is_empty() {
            return format!("{drive}{path}");
        }
    }
    ".".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.adjustment_period, 144);
        assert_eq!(cfg.target_block_time_ms, 600_000);
        assert_eq!(cfg.min_items_to_mine, 5);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.mint_max_retries, 3);
        assert_eq!(cfg.mint_retry_min_ms, 2_000);
        assert_eq!(cfg.mint_retry_max_ms, 5_000);
        assert_eq!(cfg.relay_cache_ttl_s, 3_600);
        assert_eq!(cfg.bhs_max_retries, 5);
        assert_eq!(cfg.bhs_batch_size, 2_000);
    }

    #[test]
    fn test_env_override_parses_numeric_fields() {
        // SAFETY: test-only env mutation; no other test in this process reads this key.
        unsafe { std::env::set_var("CLAWMINER_MINT_MAX_RETRIES", "7") };
        let cfg = Config::from_env();
        assert_eq!(cfg.mint_max_retries, 7);
        unsafe { std::env::remove_var("CLAWMINER_MINT_MAX_RETRIES") };
    }
}
