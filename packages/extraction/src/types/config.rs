//! Configuration types for the extraction pipeline.
//!
//! Every knob has a conservative default and can be overridden either with
//! the builder-style `with_*` methods or through environment variables via
//! `from_env()` (the CLI loads `.env` first with `dotenvy`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "True"),
        Err(_) => default,
    }
}

/// Configuration for the language-model collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible chat-completions endpoint.
    pub base_url: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Per-request timeout. A stuck call would otherwise block its worker
    /// indefinitely; there is no orchestration-level timeout above this.
    pub timeout: Duration,

    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout: Duration::from_secs(60),
            temperature: 0.1,
            max_tokens: 2000,
        }
    }
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("MODEL_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("MODEL_NAME").unwrap_or(defaults.model),
            timeout: Duration::from_secs(env_parse("MODEL_TIMEOUT", 60)),
            temperature: env_parse("MODEL_TEMPERATURE", defaults.temperature),
            max_tokens: env_parse("MODEL_MAX_TOKENS", defaults.max_tokens),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for the rate-limited search client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Instance pool, tried round-robin with health tracking.
    pub instances: Vec<String>,

    /// Sustained request rate in requests per second.
    pub rate_per_second: f64,

    /// Token-bucket burst capacity.
    pub burst: u32,

    /// Minimum wall-clock spacing between any two requests.
    pub min_request_delay: Duration,

    /// Retry ceiling for 429/503/transport errors.
    pub max_retries: u32,

    /// Initial backoff, doubled per attempt with jitter on top.
    pub initial_backoff: Duration,

    /// Per-request HTTP timeout.
    pub timeout: Duration,

    /// Search language hint (e.g. `en`, `pt-BR`).
    pub language: String,

    /// An instance is skipped once another has succeeded more recently
    /// than this window.
    pub health_window: Duration,

    /// Whether secondary page crawling is allowed at all.
    pub crawl_enabled: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            instances: vec![
                "https://searx.be".to_string(),
                "https://search.bus-hit.me".to_string(),
                "https://searx.tiekoetter.com".to_string(),
            ],
            rate_per_second: 2.0,
            burst: 5,
            min_request_delay: Duration::from_secs(1),
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            language: "en".to_string(),
            health_window: Duration::from_secs(300),
            crawl_enabled: false,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let instances = std::env::var("SEARXNG_INSTANCES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.instances);
        Self {
            instances,
            rate_per_second: env_parse("SEARXNG_RATE_LIMIT", defaults.rate_per_second),
            burst: env_parse("SEARXNG_BURST_LIMIT", defaults.burst),
            min_request_delay: Duration::from_secs_f64(env_parse("SEARXNG_MIN_DELAY", 1.0)),
            max_retries: env_parse("SEARXNG_MAX_RETRIES", defaults.max_retries),
            initial_backoff: Duration::from_secs_f64(env_parse("SEARXNG_BACKOFF", 2.0)),
            timeout: Duration::from_secs(env_parse("SEARXNG_TIMEOUT", 30)),
            language: std::env::var("SEARXNG_LANGUAGE").unwrap_or(defaults.language),
            health_window: defaults.health_window,
            crawl_enabled: env_flag("SEARXNG_CRAWL", defaults.crawl_enabled),
        }
    }

    pub fn with_instances(mut self, instances: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.instances = instances.into_iter().map(|i| i.into()).collect();
        self
    }

    pub fn with_rate(mut self, rate_per_second: f64, burst: u32) -> Self {
        self.rate_per_second = rate_per_second;
        self.burst = burst;
        self
    }

    pub fn with_min_request_delay(mut self, delay: Duration) -> Self {
        self.min_request_delay = delay;
        self
    }

    pub fn with_crawl_enabled(mut self, enabled: bool) -> Self {
        self.crawl_enabled = enabled;
        self
    }
}

/// Thresholds and limits for per-field web retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Below this a field is "missing" and handed to retrieval.
    pub confidence_low: f64,

    /// Between `confidence_low` and this a field qualifies for refinement;
    /// at or above it the field is settled.
    pub confidence_mid: f64,

    /// Raw-score ceiling above which a search round stops early.
    pub sufficiency_score: f64,

    /// Raw-score floor below which crawling kicks in (when enabled).
    pub crawl_score: f64,

    /// Field-level retry rounds over the query variant set.
    pub max_attempts: u32,

    /// Base for the exponential inter-attempt backoff.
    pub backoff_base: Duration,

    /// Pages crawled per field at most.
    pub max_crawl_pages_per_field: usize,

    /// Ceiling on crawled text kept per page.
    pub crawl_text_max_chars: usize,

    /// Targeted refinement rounds run by the enricher.
    pub refinement_max_rounds: u32,

    /// Top-K chunks pulled from the semantic index per field query.
    pub retrieval_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            confidence_low: 0.6,
            confidence_mid: 0.75,
            sufficiency_score: 900.0,
            crawl_score: 400.0,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            max_crawl_pages_per_field: 2,
            crawl_text_max_chars: 5000,
            refinement_max_rounds: 2,
            retrieval_top_k: 5,
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            confidence_low: env_parse("CONFIDENCE_THRESHOLD_LOW", defaults.confidence_low),
            confidence_mid: env_parse("CONFIDENCE_THRESHOLD_MID", defaults.confidence_mid),
            sufficiency_score: defaults.sufficiency_score,
            crawl_score: defaults.crawl_score,
            max_attempts: env_parse("FIELD_SEARCH_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base: Duration::from_secs_f64(env_parse("FIELD_SEARCH_BACKOFF_BASE", 0.5)),
            max_crawl_pages_per_field: env_parse(
                "MAX_CRAWL_PAGES_PER_FIELD",
                defaults.max_crawl_pages_per_field,
            ),
            crawl_text_max_chars: env_parse("CRAWL_TEXT_MAX_CHARS", defaults.crawl_text_max_chars),
            refinement_max_rounds: env_parse("REFINEMENT_MAX_ROUNDS", defaults.refinement_max_rounds),
            retrieval_top_k: env_parse("RETRIEVAL_TOP_K", defaults.retrieval_top_k),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker pool size for the processing queue.
    pub workers: usize,

    /// Character window for fallback chunking.
    pub chunk_size: usize,

    /// Files above this are rejected before registration.
    pub max_file_size_bytes: u64,

    /// Any heuristic candidate at or above this skips the model pass for
    /// the whole document.
    pub heuristic_confidence_skip: f64,

    /// TTL for field result cache entries.
    pub cache_ttl: Duration,

    /// TTL for cached search results and crawled pages.
    pub search_cache_ttl: Duration,

    pub model: ModelConfig,
    pub search: SearchConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            chunk_size: 4000,
            max_file_size_bytes: 10 * 1024 * 1024,
            heuristic_confidence_skip: 0.82,
            cache_ttl: Duration::from_secs(30 * 24 * 3600),
            search_cache_ttl: Duration::from_secs(7 * 24 * 3600),
            model: ModelConfig::default(),
            search: SearchConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_parse("MAX_WORKERS", defaults.workers).max(1),
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size),
            max_file_size_bytes: env_parse::<u64>("MAX_FILE_SIZE_MB", 10) * 1024 * 1024,
            heuristic_confidence_skip: env_parse(
                "HEURISTIC_CONFIDENCE_SKIP",
                defaults.heuristic_confidence_skip,
            ),
            cache_ttl: Duration::from_secs(env_parse("FIELD_CACHE_TTL", 30 * 24 * 3600)),
            search_cache_ttl: Duration::from_secs(env_parse("SEARXNG_CACHE_TTL", 7 * 24 * 3600)),
            model: ModelConfig::from_env(),
            search: SearchConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_heuristic_confidence_skip(mut self, threshold: f64) -> Self {
        self.heuristic_confidence_skip = threshold;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}
