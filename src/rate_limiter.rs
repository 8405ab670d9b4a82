//! Fixed-window request rate limiting.
//!
//! Counters live in-process in a [`DashMap`], keyed by caller identity
//! (authenticated user id when available, client IP otherwise). Per-path
//! overrides can tighten the global limit for sensitive routes such as
//! checkout. Responses carry `X-RateLimit-*` headers; a rejected request
//! gets a `429` with a JSON body.

use axum::{
    extract::Request,
    http::{header, Response, StatusCode},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::AuthService;

/// Converts a number to a header value. Numeric strings are always valid
/// ASCII header content.
fn num_to_header_value<T: ToString>(n: T) -> http::HeaderValue {
    http::HeaderValue::from_str(&n.to_string())
        .unwrap_or_else(|_| http::HeaderValue::from_static("0"))
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Counts one request against the window, resetting the window first if
    /// it has expired. Returns the count after this request.
    fn record(&mut self, window_duration: Duration) -> u32 {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= window_duration {
            self.count = 0;
            self.window_start = now;
        }
        self.count += 1;
        self.count
    }

    fn time_until_reset(&self, window_duration: Duration) -> Duration {
        let elapsed = Instant::now().duration_since(self.window_start);
        window_duration.saturating_sub(elapsed)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
    pub enable_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window_duration: Duration::from_secs(60),
            enable_headers: true,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_time: Duration,
}

#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<DashMap<String, RateLimitEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Same store, different policy. Used for per-path overrides so every
    /// policy shares one counter per key.
    pub fn with_config(&self, config: RateLimitConfig) -> Self {
        Self {
            entries: self.entries.clone(),
            config,
        }
    }

    pub fn check_rate_limit(&self, key: &str) -> RateLimitResult {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(RateLimitEntry::new);

        let count = entry.record(self.config.window_duration);
        let reset_time = entry.time_until_reset(self.config.window_duration);
        let allowed = count <= self.config.requests_per_window;

        RateLimitResult {
            allowed,
            limit: self.config.requests_per_window,
            remaining: self.config.requests_per_window.saturating_sub(count),
            reset_time,
        }
    }

    /// Drops entries whose window has fully elapsed. Called periodically by
    /// the background sweep so abandoned keys do not accumulate.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let window = self.config.window_duration;
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < window);
    }
}

/// Per-path override: the longest matching prefix wins over the global limit.
#[derive(Clone, Debug)]
pub struct PathPolicy {
    pub prefix: String,
    pub requests_per_window: u32,
    pub window_duration: Duration,
}

#[derive(Debug, Error)]
pub enum PolicyParseError {
    #[error("Invalid policy '{spec}': expected 'path:limit:window_secs', got {parts} parts")]
    InvalidFormat { spec: String, parts: usize },

    #[error("Invalid limit '{value}' in policy '{spec}'")]
    InvalidLimit { spec: String, value: String },

    #[error("Invalid window '{value}' in policy '{spec}'")]
    InvalidWindow { spec: String, value: String },

    #[error("Empty policy specification")]
    EmptySpec,

    #[error("Path policy must start with '/': got '{path}'")]
    InvalidPathFormat { path: String },

    #[error("Limit and window must both be at least 1")]
    OutOfRange,
}

/// Parses one `path:limit:window_secs` specification.
pub fn parse_path_policy(spec: &str) -> Result<PathPolicy, PolicyParseError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(PolicyParseError::EmptySpec);
    }

    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() != 3 {
        return Err(PolicyParseError::InvalidFormat {
            spec: spec.to_string(),
            parts: parts.len(),
        });
    }

    let path = parts[0].trim();
    if !path.starts_with('/') {
        return Err(PolicyParseError::InvalidPathFormat {
            path: path.to_string(),
        });
    }

    let limit: u32 = parts[1]
        .trim()
        .parse()
        .map_err(|_| PolicyParseError::InvalidLimit {
            spec: spec.to_string(),
            value: parts[1].to_string(),
        })?;

    let window_secs: u64 =
        parts[2]
            .trim()
            .parse()
            .map_err(|_| PolicyParseError::InvalidWindow {
                spec: spec.to_string(),
                value: parts[2].to_string(),
            })?;

    if limit < 1 || window_secs < 1 {
        return Err(PolicyParseError::OutOfRange);
    }

    Ok(PathPolicy {
        prefix: path.to_string(),
        requests_per_window: limit,
        window_duration: Duration::from_secs(window_secs),
    })
}

/// Parses a comma-separated list of path policies, collecting warnings for
/// specs that fail to parse instead of failing the whole list.
pub fn parse_path_policies(policies_str: &str) -> (Vec<PathPolicy>, Vec<String>) {
    let mut policies = Vec::new();
    let mut warnings = Vec::new();

    for spec in policies_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        match parse_path_policy(spec) {
            Ok(policy) => policies.push(policy),
            Err(e) => warnings.push(format!("Skipping invalid path policy '{spec}': {e}")),
        }
    }

    (policies, warnings)
}

fn extract_ip_key(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                return format!("ip:{}", ip.trim());
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return format!("ip:{ip_str}");
        }
    }

    "ip:unknown".to_string()
}

/// Identity key for an authenticated caller, if the request carries a valid
/// Bearer token.
fn extract_user_key(request: &Request, auth_service: Option<&Arc<AuthService>>) -> Option<String> {
    let service = auth_service?;
    let raw = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let token = raw.strip_prefix("Bearer ").map(str::trim)?;
    let claims = service.validate_token(token).ok()?;
    Some(format!("user:{}", claims.sub))
}

fn rejection_response(result: &RateLimitResult, enable_headers: bool) -> Response<axum::body::Body> {
    let body = serde_json::json!({
        "success": false,
        "error": "Rate limit exceeded",
    });
    let mut response = Response::new(axum::body::Body::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );

    if enable_headers {
        let headers = response.headers_mut();
        headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
        headers.insert("X-RateLimit-Remaining", num_to_header_value(0));
        headers.insert(
            "X-RateLimit-Reset",
            num_to_header_value(result.reset_time.as_secs()),
        );
        headers.insert(
            header::RETRY_AFTER,
            num_to_header_value(result.reset_time.as_secs().max(1)),
        );
    }

    response
}

#[derive(Clone)]
pub struct RateLimitLayer {
    rate_limiter: RateLimiter,
    path_policies: Arc<Vec<PathPolicy>>,
    auth_service: Option<Arc<AuthService>>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config),
            path_policies: Arc::new(Vec::new()),
            auth_service: None,
        }
    }

    pub fn with_policies(mut self, policies: Vec<PathPolicy>) -> Self {
        self.path_policies = Arc::new(policies);
        self
    }

    pub fn with_auth_service(mut self, auth_service: Arc<AuthService>) -> Self {
        self.auth_service = Some(auth_service);
        self
    }

    pub fn limiter(&self) -> RateLimiter {
        self.rate_limiter.clone()
    }
}

impl<S> tower::Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            rate_limiter: self.rate_limiter.clone(),
            path_policies: self.path_policies.clone(),
            auth_service: self.auth_service.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    rate_limiter: RateLimiter,
    path_policies: Arc<Vec<PathPolicy>>,
    auth_service: Option<Arc<AuthService>>,
}

impl<S> tower::Service<Request> for RateLimitService<S>
where
    S: tower::Service<Request, Response = Response<axum::body::Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<axum::body::Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let rate_limiter = self.rate_limiter.clone();
        let mut inner = self.inner.clone();
        let policies = self.path_policies.clone();
        let auth_service = self.auth_service.clone();

        Box::pin(async move {
            let path = request.uri().path().to_string();
            if path.starts_with("/health") || path.starts_with("/api-docs") {
                return inner.call(request).await;
            }

            let key = extract_user_key(&request, auth_service.as_ref())
                .unwrap_or_else(|| extract_ip_key(&request));

            // Longest matching path prefix overrides the global policy.
            let override_policy = policies
                .iter()
                .filter(|p| path.starts_with(&p.prefix))
                .max_by_key(|p| p.prefix.len());

            let limiter = match override_policy {
                Some(p) => rate_limiter.with_config(RateLimitConfig {
                    requests_per_window: p.requests_per_window,
                    window_duration: p.window_duration,
                    enable_headers: rate_limiter.config.enable_headers,
                }),
                None => rate_limiter.clone(),
            };

            // Override keys are scoped by prefix so a tight checkout quota
            // does not consume the caller's global allowance.
            let scoped_key = match override_policy {
                Some(p) => format!("{}:{}", p.prefix, key),
                None => key.clone(),
            };

            let result = limiter.check_rate_limit(&scoped_key);
            if !result.allowed {
                warn!(%key, %path, "Rate limit exceeded");
                return Ok(rejection_response(&result, limiter.config.enable_headers));
            }

            let mut response = inner.call(request).await?;

            if limiter.config.enable_headers {
                let headers = response.headers_mut();
                headers.insert("X-RateLimit-Limit", num_to_header_value(result.limit));
                headers.insert(
                    "X-RateLimit-Remaining",
                    num_to_header_value(result.remaining),
                );
                headers.insert(
                    "X-RateLimit-Reset",
                    num_to_header_value(result.reset_time.as_secs()),
                );
            }

            Ok(response)
        })
    }
}

/// Periodically drops expired counters.
pub async fn start_cleanup_task(rate_limiter: RateLimiter, interval: Duration) {
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        interval_timer.tick().await;
        rate_limiter.cleanup_expired();
        debug!("Rate limiter cleanup completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window_duration: window,
            enable_headers: true,
        })
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(2, Duration::from_secs(60));

        assert!(limiter.check_rate_limit("user:a").allowed);
        assert!(limiter.check_rate_limit("user:a").allowed);
        assert!(!limiter.check_rate_limit("user:a").allowed);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert!(limiter.check_rate_limit("user:a").allowed);
        assert!(limiter.check_rate_limit("user:b").allowed);
        assert!(!limiter.check_rate_limit("user:a").allowed);
        assert!(!limiter.check_rate_limit("user:b").allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = limiter(3, Duration::from_secs(60));

        assert_eq!(limiter.check_rate_limit("k").remaining, 2);
        assert_eq!(limiter.check_rate_limit("k").remaining, 1);
        assert_eq!(limiter.check_rate_limit("k").remaining, 0);
        assert!(!limiter.check_rate_limit("k").allowed);
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let limiter = limiter(1, Duration::from_millis(50));

        assert!(limiter.check_rate_limit("k").allowed);
        assert!(!limiter.check_rate_limit("k").allowed);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check_rate_limit("k").allowed);
    }

    #[tokio::test]
    async fn cleanup_drops_expired_entries() {
        let limiter = limiter(5, Duration::from_millis(10));
        limiter.check_rate_limit("k");
        assert_eq!(limiter.entries.len(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.cleanup_expired();
        assert_eq!(limiter.entries.len(), 0);
    }

    #[test]
    fn shared_store_across_configs() {
        let base = limiter(2, Duration::from_secs(60));
        let tight = base.with_config(RateLimitConfig {
            requests_per_window: 1,
            window_duration: Duration::from_secs(60),
            enable_headers: true,
        });

        assert!(base.check_rate_limit("k").allowed);
        assert!(!tight.check_rate_limit("k").allowed);
    }

    #[test]
    fn parse_valid_path_policy() {
        let policy = parse_path_policy("/api/v1/checkout:10:60").unwrap();
        assert_eq!(policy.prefix, "/api/v1/checkout");
        assert_eq!(policy.requests_per_window, 10);
        assert_eq!(policy.window_duration, Duration::from_secs(60));
    }

    #[test]
    fn parse_rejects_malformed_policies() {
        assert!(matches!(
            parse_path_policy("/api/v1/checkout:10"),
            Err(PolicyParseError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_path_policy("api/v1/checkout:10:60"),
            Err(PolicyParseError::InvalidPathFormat { .. })
        ));
        assert!(matches!(
            parse_path_policy("/api:abc:60"),
            Err(PolicyParseError::InvalidLimit { .. })
        ));
        assert!(matches!(
            parse_path_policy("/api:0:60"),
            Err(PolicyParseError::OutOfRange)
        ));
    }

    #[test]
    fn parse_policy_list_collects_warnings() {
        let (policies, warnings) =
            parse_path_policies("/api/v1/orders:20:60,bogus,/api/v1/checkout:10:60");
        assert_eq!(policies.len(), 2);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bogus"));
    }
}
