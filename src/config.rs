//! Typed settings loaded from the environment. Every tunable the pipeline exposes
//! specification gets an `env::var` read and a hardcoded default, mirroring the teacher's
//! `Config::from_env` in `models.rs`: `dotenv().ok()` once at the top, then
//! `env::var(...).ok().and_then(...).unwrap_or(default)` per field. A bad value for any setting
//! is collected rather than returned on the first failure, so an operator sees every offending
//! setting in one error.

use std::env;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub problems: Vec<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.problems.join("; "))
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,

    /// Capability names resolved against a `Registry` at startup; empty by default since
    /// concrete integrations are out of scope here.
    pub news_sources: Vec<String>,
    pub market_platforms: Vec<String>,
    pub embedding_provider: Option<String>,
    pub llm_provider: Option<String>,
    pub alert_sinks: Vec<String>,
    /// Per-sink confidence threshold, keyed by sink name; a sink with no entry here falls back
    /// to `min_confidence`. Parsed from `ALERT_SINK_THRESHOLDS` as `name=value` pairs separated
    /// by commas, e.g. `email=0.9,desktop=0.7`.
    pub alert_sink_thresholds: std::collections::HashMap<String, f64>,

    pub embedding_batch_size: i64,
    pub matching_batch_size: i64,
    pub validation_batch_size: i64,

    pub match_top_n: i64,
    pub min_similarity: f64,
    pub min_confidence: f64,

    pub validation_candidates_per_article: i64,
    pub validation_chunk_size: i64,

    pub market_embedding_batch_size: i64,
    pub retention_days: i64,
    pub alert_cooldown_minutes: i64,

    pub worker_poll_interval: Duration,
    pub platform_sync_interval: Duration,
    pub news_ingestion_interval: Duration,

    pub trading_enabled: bool,
    pub dry_run: bool,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T, problems: &mut Vec<String>) -> T {
    match env::var(name) {
        Err(_) => default,
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            problems.push(format!("{name}='{raw}' is not valid"));
            default
        }),
    }
}

fn parse_list_env(name: &str) -> Vec<String> {
    env::var(name)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_threshold_map_env(name: &str, problems: &mut Vec<String>) -> std::collections::HashMap<String, f64> {
    let mut map = std::collections::HashMap::new();
    let Ok(raw) = env::var(name) else {
        return map;
    };
    for pair in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        match pair.split_once('=') {
            Some((sink, value)) => match value.trim().parse::<f64>() {
                Ok(v) => {
                    map.insert(sink.trim().to_string(), v);
                }
                Err(_) => problems.push(format!("{name}: '{pair}' has a non-numeric threshold")),
            },
            None => problems.push(format!("{name}: '{pair}' is not a 'name=value' pair")),
        }
    }
    map
}

fn parse_bool_env(name: &str, default: bool, problems: &mut Vec<String>) -> bool {
    match env::var(name) {
        Err(_) => default,
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                problems.push(format!("{name}='{raw}' is not a valid boolean"));
                default
            }
        },
    }
}

impl Config {
    /// Reads every setting from the environment, `dotenv()`-loaded first (same order as the
    /// teacher's `main.rs`). Collects every malformed value into one `ConfigError` instead of
    /// failing on the first.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut problems = Vec::new();

        let database_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "marketpulse.db".to_string());

        let news_sources = parse_list_env("NEWS_SOURCES");
        let market_platforms = parse_list_env("MARKET_PLATFORMS");
        let embedding_provider = env::var("EMBEDDING_PROVIDER").ok().filter(|s| !s.is_empty());
        let llm_provider = env::var("LLM_PROVIDER").ok().filter(|s| !s.is_empty());
        let alert_sinks = parse_list_env("ALERT_SINKS");
        let alert_sink_thresholds = parse_threshold_map_env("ALERT_SINK_THRESHOLDS", &mut problems);

        let embedding_batch_size = parse_env("EMBEDDING_BATCH_SIZE", 10, &mut problems);
        let matching_batch_size = parse_env("MATCHING_BATCH_SIZE", 5, &mut problems);
        let validation_batch_size = parse_env("VALIDATION_BATCH_SIZE", 3, &mut problems);

        let match_top_n = parse_env("MATCH_TOP_N", 20, &mut problems);
        let min_similarity = parse_env("MIN_SIMILARITY", 0.3, &mut problems);
        let min_confidence = parse_env("MIN_CONFIDENCE", 0.7, &mut problems);

        let validation_candidates_per_article =
            parse_env("VALIDATION_CANDIDATES_PER_ARTICLE", 10, &mut problems);
        let validation_chunk_size = parse_env("VALIDATION_CHUNK_SIZE", 10, &mut problems);

        let market_embedding_batch_size = parse_env("MARKET_EMBEDDING_BATCH_SIZE", 200, &mut problems);
        let retention_days = parse_env("RETENTION_DAYS", 7, &mut problems);
        let alert_cooldown_minutes = parse_env("ALERT_COOLDOWN_MINUTES", 60, &mut problems);

        let worker_poll_secs: u64 = parse_env("WORKER_POLL_SECS", 1, &mut problems);
        let platform_sync_secs: u64 = parse_env("PLATFORM_SYNC_SECS", 5, &mut problems);
        let news_ingestion_secs: u64 = parse_env("NEWS_INGESTION_SECS", 1, &mut problems);

        let trading_enabled = parse_bool_env("TRADING_ENABLED", false, &mut problems);
        let dry_run = parse_bool_env("DRY_RUN", true, &mut problems);

        if min_similarity < 0.0 || min_similarity > 1.0 {
            problems.push(format!("MIN_SIMILARITY={min_similarity} must be within [0, 1]"));
        }
        if min_confidence < 0.0 || min_confidence > 1.0 {
            problems.push(format!("MIN_CONFIDENCE={min_confidence} must be within [0, 1]"));
        }
        if embedding_batch_size <= 0 || matching_batch_size <= 0 || validation_batch_size <= 0 {
            problems.push("batch sizes must be positive".to_string());
        }

        if !problems.is_empty() {
            return Err(ConfigError { problems });
        }

        Ok(Self {
            database_path,
            news_sources,
            market_platforms,
            embedding_provider,
            llm_provider,
            alert_sinks,
            alert_sink_thresholds,
            embedding_batch_size,
            matching_batch_size,
            validation_batch_size,
            match_top_n,
            min_similarity,
            min_confidence,
            validation_candidates_per_article,
            validation_chunk_size,
            market_embedding_batch_size,
            retention_days,
            alert_cooldown_minutes,
            worker_poll_interval: Duration::from_secs(worker_poll_secs),
            platform_sync_interval: Duration::from_secs(platform_sync_secs),
            news_ingestion_interval: Duration::from_secs(news_ingestion_secs),
            trading_enabled,
            dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_similarity() {
        std::env::set_var("MIN_SIMILARITY", "1.5");
        let err = Config::from_env().unwrap_err();
        std::env::remove_var("MIN_SIMILARITY");
        assert!(err.problems.iter().any(|p| p.contains("MIN_SIMILARITY")));
    }

    #[test]
    fn parses_alert_sink_thresholds() {
        std::env::set_var("ALERT_SINK_THRESHOLDS", "email=0.9, desktop=0.5");
        let config = Config::from_env().unwrap();
        std::env::remove_var("ALERT_SINK_THRESHOLDS");
        assert_eq!(config.alert_sink_thresholds.get("email"), Some(&0.9));
        assert_eq!(config.alert_sink_thresholds.get("desktop"), Some(&0.5));
    }

    #[test]
    fn collects_every_malformed_setting() {
        std::env::set_var("EMBEDDING_BATCH_SIZE", "not-a-number");
        std::env::set_var("MATCH_TOP_N", "also-bad");
        let err = Config::from_env().unwrap_err();
        std::env::remove_var("EMBEDDING_BATCH_SIZE");
        std::env::remove_var("MATCH_TOP_N");
        assert!(err.problems.len() >= 2);
    }
}
