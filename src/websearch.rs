//! Multi-provider web search with failover and rate shaping

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Minimum spacing between requests to one provider
const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(200);

/// Search depth requested from providers that support it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

/// Options for one search call
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub search_depth: SearchDepth,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 5,
            search_depth: SearchDepth::Basic,
            include_domains: Vec::new(),
            exclude_domains: Vec::new(),
        }
    }
}

/// One web search hit with a score normalized to [0,1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: f32,
    pub published_date: Option<String>,
    pub raw_content: Option<String>,
    pub provider: String,
}

/// Search response with provenance
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub results: Vec<WebSearchResult>,
    pub provider: String,
    pub latency_ms: u64,
}

/// A web search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Credentials are configured for this provider
    fn is_available(&self) -> bool;

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<WebSearchResult>>;
}

/// Rank-decay score for providers that report none
fn rank_decay_score(rank: usize) -> f32 {
    1.0 / (1.0 + 0.1 * rank as f32)
}

// ---- Tavily ----

/// Tavily search API (primary provider)
pub struct TavilyProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: SearchDepth,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude_domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    published_date: Option<String>,
    #[serde(default)]
    raw_content: Option<String>,
}

impl TavilyProvider {
    pub fn new(api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        Self::with_endpoint(api_key, timeout_secs, "https://api.tavily.com/search")
    }

    pub fn with_endpoint(
        api_key: Option<String>,
        timeout_secs: u64,
        endpoint: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SearchError::ProviderFailed {
                provider: "tavily".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<WebSearchResult>> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::NoProviderAvailable)?;

        let request = TavilyRequest {
            api_key,
            query,
            max_results: options.max_results,
            search_depth: options.search_depth,
            include_domains: options.include_domains.clone(),
            exclude_domains: options.exclude_domains.clone(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::ProviderFailed {
                provider: "tavily".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited("tavily".to_string()).into());
        }
        if !status.is_success() {
            return Err(SearchError::ProviderFailed {
                provider: "tavily".to_string(),
                reason: format!("status {}", status),
            }
            .into());
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ProviderFailed {
                provider: "tavily".to_string(),
                reason: e.to_string(),
            })?;

        Ok(parsed
            .results
            .into_iter()
            .enumerate()
            .map(|(rank, r)| WebSearchResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
                score: r
                    .score
                    .map(|s| s.clamp(0.0, 1.0))
                    .unwrap_or_else(|| rank_decay_score(rank)),
                published_date: r.published_date,
                raw_content: r.raw_content,
                provider: "tavily".to_string(),
            })
            .collect())
    }
}

// ---- Brave ----

/// Brave Search API (fallback provider)
pub struct BraveProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
}

impl BraveProvider {
    pub fn new(api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        Self::with_endpoint(
            api_key,
            timeout_secs,
            "https://api.search.brave.com/res/v1/web/search",
        )
    }

    pub fn with_endpoint(
        api_key: Option<String>,
        timeout_secs: u64,
        endpoint: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SearchError::ProviderFailed {
                provider: "brave".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SearchProvider for BraveProvider {
    fn name(&self) -> &str {
        "brave"
    }

    fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<WebSearchResult>> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::NoProviderAvailable)?;

        let count = options.max_results.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await
            .map_err(|e| SearchError::ProviderFailed {
                provider: "brave".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::RateLimited("brave".to_string()).into());
        }
        if !status.is_success() {
            return Err(SearchError::ProviderFailed {
                provider: "brave".to_string(),
                reason: format!("status {}", status),
            }
            .into());
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ProviderFailed {
                provider: "brave".to_string(),
                reason: e.to_string(),
            })?;

        Ok(parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(rank, r)| WebSearchResult {
                title: r.title,
                url: r.url,
                snippet: r.description,
                // Brave reports no relevance score
                score: rank_decay_score(rank),
                published_date: r.page_age,
                raw_content: None,
                provider: "brave".to_string(),
            })
            .collect())
    }
}

// ---- failover searcher ----

/// Tries providers in order, failing over on transport errors and 5xx
pub struct WebSearcher {
    providers: Vec<Arc<dyn SearchProvider>>,
    last_request: Mutex<Option<Instant>>,
    request_timeout: Duration,
}

impl WebSearcher {
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>, timeout_secs: u64) -> Self {
        Self {
            providers,
            last_request: Mutex::new(None),
            request_timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Build the provider chain from configuration
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let providers: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(TavilyProvider::new(
                config.tavily_api_key.clone(),
                config.timeout,
            )?),
            Arc::new(BraveProvider::new(
                config.brave_api_key.clone(),
                config.timeout,
            )?),
        ];
        Ok(Self::new(providers, config.timeout))
    }

    /// Any provider has usable credentials
    pub fn any_available(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }

    /// Search with failover across the configured providers
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        self.shape_rate().await;

        let start = Instant::now();
        let mut last_error: Option<crate::error::TailorError> = None;

        for provider in self.providers.iter().filter(|p| p.is_available()) {
            match timeout(self.request_timeout, provider.search(query, options)).await {
                Ok(Ok(results)) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    info!(
                        provider = provider.name(),
                        results = results.len(),
                        latency_ms,
                        "web search complete"
                    );
                    return Ok(SearchResponse {
                        results,
                        provider: provider.name().to_string(),
                        latency_ms,
                    });
                }
                Ok(Err(e)) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, trying next");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(provider = provider.name(), "provider timed out, trying next");
                    last_error = Some(SearchError::Timeout.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SearchError::NoProviderAvailable.into()))
    }

    /// Keep a minimum interval between outbound requests
    async fn shape_rate(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
        debug!("rate shaping applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> SearchOptions {
        SearchOptions::default()
    }

    #[test]
    fn test_availability_requires_key() {
        let provider = TavilyProvider::new(None, 5).unwrap();
        assert!(!provider.is_available());

        let provider = TavilyProvider::new(Some("tvly-key".to_string()), 5).unwrap();
        assert!(provider.is_available());
    }

    #[test]
    fn test_rank_decay_monotone() {
        assert!(rank_decay_score(0) > rank_decay_score(1));
        assert!(rank_decay_score(1) > rank_decay_score(5));
        assert!(rank_decay_score(100) > 0.0);
    }

    #[tokio::test]
    async fn test_tavily_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": "bcrypt vs argon2", "url": "https://example.com/a",
                     "content": "comparison", "score": 0.92},
                    {"title": "hashing guide", "url": "https://example.com/b",
                     "content": "guide"}
                ]
            })))
            .mount(&server)
            .await;

        let provider = TavilyProvider::with_endpoint(
            Some("key".to_string()),
            5,
            &format!("{}/search", server.uri()),
        )
        .unwrap();

        let results = provider.search("bcrypt vs argon2", &options()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!((results[0].score - 0.92).abs() < 1e-6);
        assert!(results[1].score > 0.0, "missing score gets rank decay");
    }

    #[tokio::test]
    async fn test_failover_to_second_provider() {
        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&failing)
            .await;

        let working = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/web/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {"results": [
                    {"title": "result", "url": "https://example.com", "description": "text"}
                ]}
            })))
            .mount(&working)
            .await;

        let tavily = TavilyProvider::with_endpoint(
            Some("key".to_string()),
            5,
            &format!("{}/search", failing.uri()),
        )
        .unwrap();
        let brave = BraveProvider::with_endpoint(
            Some("key".to_string()),
            5,
            &format!("{}/web/search", working.uri()),
        )
        .unwrap();

        let searcher = WebSearcher::new(vec![Arc::new(tavily), Arc::new(brave)], 5);
        let response = searcher.search("anything", &options()).await.unwrap();
        assert_eq!(response.provider, "brave");
        assert_eq!(response.results.len(), 1);
    }

    #[tokio::test]
    async fn test_no_provider_available() {
        let tavily = TavilyProvider::new(None, 5).unwrap();
        let brave = BraveProvider::new(None, 5).unwrap();
        let searcher = WebSearcher::new(vec![Arc::new(tavily), Arc::new(brave)], 5);

        assert!(!searcher.any_available());
        let err = searcher.search("anything", &options()).await.unwrap_err();
        assert!(err.to_string().contains("No search provider"));
    }
}
