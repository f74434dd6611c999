//! Rate-limited SearXNG client with instance failover.
//!
//! Safeguards, in request order:
//!   1. persistent cache lookup (zero network cost on repeat queries)
//!   2. token-bucket permit (bounds burst and sustained rate)
//!   3. minimum wall-clock spacing since the last request
//!   4. user-agent rotation per request
//!   5. exponential backoff with jitter on 429/503/transport errors,
//!      rotating to the next instance each retry
//!   6. instance health tracking with a freshness window
//!
//! The token bucket is shared by `search` and `fetch_page`, so the
//! aggregate ceiling holds regardless of how many workers call in.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{SearchError, SearchResult};
use crate::search::{search_cache_key, SearchCache, SearchHit, SearchProvider};
use crate::types::config::SearchConfig;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// User-agent pool rotated per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

fn quota(rate_per_second: f64, burst: u32) -> Quota {
    let period = Duration::from_secs_f64(1.0 / rate_per_second.max(0.001));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
        .allow_burst(NonZeroU32::new(burst.max(1)).expect("burst is at least one"))
}

/// SearXNG-backed search provider.
pub struct SearxClient {
    config: SearchConfig,
    http: reqwest::Client,
    limiter: DirectRateLimiter,
    /// Wall-clock spacing guard; held across the sleep so callers queue.
    last_request: tokio::sync::Mutex<Option<Instant>>,
    current_instance: AtomicUsize,
    /// Instance URL to time of last successful request.
    health: Mutex<HashMap<String, Instant>>,
    cache: Option<Arc<dyn SearchCache>>,
}

impl SearxClient {
    pub fn new(mut config: SearchConfig) -> Self {
        if config.instances.is_empty() {
            config.instances = SearchConfig::default().instances;
        }
        let limiter = RateLimiter::direct(quota(config.rate_per_second, config.burst));
        tracing::info!(
            instances = config.instances.len(),
            rate = config.rate_per_second,
            "search client initialized"
        );
        Self {
            config,
            http: reqwest::Client::new(),
            limiter,
            last_request: tokio::sync::Mutex::new(None),
            current_instance: AtomicUsize::new(0),
            health: Mutex::new(HashMap::new()),
            cache: None,
        }
    }

    /// Attach a persistent cache, checked before any network call.
    pub fn with_cache(mut self, cache: Arc<dyn SearchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Block until the token bucket and the minimum spacing both allow a
    /// request.
    async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;

        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.config.min_request_delay {
                let wait = self.config.min_request_delay - elapsed;
                tracing::debug!(wait_ms = wait.as_millis() as u64, "min delay safeguard");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn user_agent(&self) -> &'static str {
        USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// Current instance, skipping it when it has gone stale.
    fn pick_instance(&self) -> String {
        let len = self.config.instances.len();
        let idx = self.current_instance.load(Ordering::Relaxed) % len;
        let candidate = self.config.instances[idx].clone();
        let stale = {
            let health = self.health.lock().unwrap();
            health
                .get(&candidate)
                .map_or(true, |at| at.elapsed() > self.config.health_window)
        };
        if stale && len > 1 {
            let next = (idx + 1) % len;
            self.current_instance.store(next, Ordering::Relaxed);
            self.config.instances[next].clone()
        } else {
            candidate
        }
    }

    fn rotate_instance(&self) {
        let len = self.config.instances.len();
        let idx = self.current_instance.load(Ordering::Relaxed);
        self.current_instance.store((idx + 1) % len, Ordering::Relaxed);
    }

    fn mark_healthy(&self, instance: &str) {
        self.health
            .lock()
            .unwrap()
            .insert(instance.to_string(), Instant::now());
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.config.initial_backoff.as_secs_f64() * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        tokio::time::sleep(Duration::from_secs_f64(base + jitter)).await;
    }

    async fn search_once(
        &self,
        instance: &str,
        query: &str,
        limit: usize,
    ) -> SearchResult<Vec<SearchHit>> {
        #[derive(serde::Deserialize)]
        struct SearxResponse {
            #[serde(default)]
            results: Vec<SearxResult>,
        }

        #[derive(serde::Deserialize)]
        struct SearxResult {
            #[serde(default)]
            title: String,
            #[serde(default)]
            url: String,
            #[serde(default)]
            content: String,
        }

        let response = self
            .http
            .get(format!("{instance}/search"))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("language", self.config.language.as_str()),
                ("safesearch", "0"),
            ])
            .header("User-Agent", self.user_agent())
            .header("Accept", "application/json")
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(SearchError::Throttled {
                instance: instance.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SearchError::Http(Box::new(std::io::Error::other(format!(
                "instance {instance} returned status {status}"
            )))));
        }

        let parsed: SearxResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        Ok(parsed
            .results
            .into_iter()
            .take(limit)
            .map(|r| SearchHit::new(r.title, r.url, r.content))
            .collect())
    }

    async fn fetch_page_once(&self, url: &str) -> SearchResult<String> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", self.user_agent())
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(SearchError::Throttled {
                instance: url.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(SearchError::Http(Box::new(std::io::Error::other(format!(
                "page {url} returned status {status}"
            )))));
        }

        response
            .text()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))
    }
}

#[async_trait]
impl SearchProvider for SearxClient {
    async fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<SearchHit>> {
        let cache_key = search_cache_key(query, limit);
        if let Some(cache) = &self.cache {
            if let Some(hits) = cache.get_search(&cache_key).await? {
                tracing::debug!(query = %query, "search cache hit");
                return Ok(hits);
            }
        }

        let mut attempt = 0u32;
        loop {
            let instance = self.pick_instance();
            self.wait_for_permit().await;

            match self.search_once(&instance, query, limit).await {
                Ok(hits) => {
                    self.mark_healthy(&instance);
                    if let Some(cache) = &self.cache {
                        cache.put_search(&cache_key, query, &hits).await?;
                    }
                    return Ok(hits);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    tracing::warn!(
                        %instance,
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        error = %err,
                        "search attempt failed, rotating instance"
                    );
                    self.rotate_instance();
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(SearchError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    async fn fetch_page(&self, url: &str) -> SearchResult<String> {
        url::Url::parse(url).map_err(|_| SearchError::InvalidUrl(url.to_string()))?;

        if let Some(cache) = &self.cache {
            if let Some(content) = cache.get_page(url).await? {
                tracing::debug!(%url, "crawl cache hit");
                return Ok(content);
            }
        }

        let mut attempt = 0u32;
        loop {
            self.wait_for_permit().await;
            match self.fetch_page_once(url).await {
                Ok(content) => {
                    if let Some(cache) = &self.cache {
                        cache.put_page(url, &content).await?;
                    }
                    return Ok(content);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    tracing::warn!(%url, attempt = attempt + 1, error = %err, "page fetch failed");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(SearchError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }

    fn supports_crawl(&self) -> bool {
        self.config.crawl_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::MemorySearchCache;

    fn test_config() -> SearchConfig {
        SearchConfig::default()
            .with_instances(["https://searx.test-a", "https://searx.test-b"])
            .with_min_request_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn token_bucket_saturation_delays_excess_permits() {
        let config = test_config().with_rate(20.0, 2);
        let client = SearxClient::new(config);

        let start = Instant::now();
        // Burst capacity covers two permits; the third must wait ~50ms.
        client.wait_for_permit().await;
        client.wait_for_permit().await;
        client.wait_for_permit().await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(40),
            "third permit was not delayed: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn min_request_delay_spaces_calls() {
        let config = test_config().with_rate(1000.0, 1000).with_min_request_delay(
            Duration::from_millis(30),
        );
        let client = SearxClient::new(config);

        let start = Instant::now();
        client.wait_for_permit().await;
        client.wait_for_permit().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn cached_search_short_circuits_network() {
        // Instances are unroutable; a network attempt would error out.
        let cache = Arc::new(MemorySearchCache::new(Duration::from_secs(60)));
        let key = search_cache_key("acetona FDS", 3);
        let hits = vec![SearchHit::new("FDS", "https://example.com/fds", "UN 1090")];
        cache.put_search(&key, "acetona FDS", &hits).await.unwrap();

        let mut config = test_config();
        config.max_retries = 0;
        config.initial_backoff = Duration::ZERO;
        let client = SearxClient::new(config).with_cache(cache);

        let result = client.search("acetona FDS", 3).await.unwrap();
        assert_eq!(result, hits);
    }

    #[tokio::test]
    async fn unhealthy_instance_is_skipped() {
        let client = SearxClient::new(test_config());
        // No instance has ever succeeded, so the picker advances past the
        // first instance.
        let picked = client.pick_instance();
        assert_eq!(picked, "https://searx.test-b");

        client.mark_healthy("https://searx.test-b");
        assert_eq!(client.pick_instance(), "https://searx.test-b");
    }

    #[tokio::test]
    async fn invalid_crawl_url_is_rejected() {
        let client = SearxClient::new(test_config());
        let err = client.fetch_page("not a url").await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidUrl(_)));
    }
}
