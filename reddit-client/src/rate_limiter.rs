use replybot_core::CoreError;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};

/// Reddit's budget resets every ten minutes.
pub const MAX_SERVER_RESET: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    pub fn reddit_oauth() -> Self {
        Self {
            max_requests: 100, // Reddit allows 100 requests per minute for OAuth2
            time_window: Duration::from_secs(60),
            burst_allowance: 10,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance as f64;
        let refill_rate = config.max_requests as f64 / config.time_window.as_secs_f64();

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes tokens, or returns how long to wait until enough are available.
    pub async fn acquire(&self, tokens_needed: f64) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= tokens_needed {
            state.tokens -= tokens_needed;
            Ok(())
        } else {
            let missing = tokens_needed - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    pub async fn get_available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

/// Client-side token bucket plus the server's own view of the budget, as
/// reported through the `x-ratelimit-*` response headers.
#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    semaphore: Arc<Semaphore>,
    config: RateLimitConfig,
    window_tracker: Mutex<WindowTracker>,
    blocked_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.burst_allowance as usize));
        let token_bucket = TokenBucket::new(&config);
        let window_tracker = Mutex::new(WindowTracker::new(config.time_window));

        Self {
            token_bucket,
            semaphore,
            config,
            window_tracker,
            blocked_until: Mutex::new(None),
        }
    }

    pub async fn acquire_permit(&self) -> Result<RateLimitPermit, CoreError> {
        let start_time = Instant::now();
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal {
                message: "rate limiter semaphore closed".to_string(),
            })?;

        let blocked_until = *self.blocked_until.lock().await;
        if let Some(deadline) = blocked_until {
            if deadline > Instant::now() {
                tracing::info!(
                    "Reddit request budget exhausted, waiting {:?} for the window to reset",
                    deadline - Instant::now()
                );
                sleep_until(deadline).await;
            }
        }

        loop {
            match self.token_bucket.acquire(1.0).await {
                Ok(()) => break,
                Err(wait_time) => {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        self.window_tracker.lock().await.record_request();

        Ok(RateLimitPermit {
            _permit,
            queue_wait_time: start_time.elapsed(),
        })
    }

    /// Feeds back `x-ratelimit-remaining` / `x-ratelimit-reset`. Once Reddit
    /// reports less than one request left, permits are held back until the
    /// reported reset, but never longer than [`MAX_SERVER_RESET`].
    pub async fn observe_server_budget(&self, remaining: Option<f64>, reset_after: Option<Duration>) {
        let mut blocked_until = self.blocked_until.lock().await;
        match (remaining, reset_after) {
            (Some(remaining), Some(reset_after)) if remaining < 1.0 => {
                *blocked_until = Some(Instant::now() + reset_after.min(MAX_SERVER_RESET));
            }
            (Some(_), _) => {
                *blocked_until = None;
            }
            _ => {}
        }
    }

    pub async fn record_outcome(&self, rate_limited: bool) {
        let mut tracker = self.window_tracker.lock().await;
        if rate_limited {
            tracker.record_rate_limited();
        } else {
            tracker.record_success();
        }
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        let available_tokens = self.token_bucket.get_available_tokens().await;
        let available_permits = self.semaphore.available_permits();
        let window_stats = self.window_tracker.lock().await.get_current_window_stats();

        let blocked_for = self
            .blocked_until
            .lock()
            .await
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero());

        let estimated_wait_time = if let Some(blocked_for) = blocked_for {
            Some(blocked_for)
        } else if available_tokens < 1.0 {
            Some(Duration::from_secs_f64(
                self.config.time_window.as_secs_f64() / self.config.max_requests as f64,
            ))
        } else {
            None
        };

        RateLimitStatus {
            available_tokens: available_tokens as u32,
            max_tokens: self.config.burst_allowance,
            available_permits,
            max_permits: self.config.burst_allowance as usize,
            requests_per_window: self.config.max_requests,
            current_window_requests: window_stats.request_count,
            rate_limited_in_window: window_stats.rate_limited_requests,
            window_start_time: window_stats.window_start,
            server_blocked: blocked_for.is_some(),
            estimated_wait_time,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub available_permits: usize,
    pub max_permits: usize,
    pub requests_per_window: u32,
    pub current_window_requests: u32,
    pub rate_limited_in_window: u32,
    pub window_start_time: SystemTime,
    pub server_blocked: bool,
    pub estimated_wait_time: Option<Duration>,
}

impl RateLimitStatus {
    pub fn utilization_percentage(&self) -> f64 {
        let used_tokens = self.max_tokens.saturating_sub(self.available_tokens);
        (used_tokens as f64 / self.max_tokens as f64) * 100.0
    }

    pub fn is_near_limit(&self) -> bool {
        self.server_blocked || self.utilization_percentage() > 80.0
    }

    pub fn requests_remaining_in_window(&self) -> u32 {
        self.requests_per_window
            .saturating_sub(self.current_window_requests)
    }
}

#[derive(Debug)]
pub struct WindowTracker {
    window_duration: Duration,
    current_window: WindowStats,
}

#[derive(Debug, Clone)]
pub struct WindowStats {
    pub window_start: SystemTime,
    pub request_count: u32,
    pub successful_requests: u32,
    pub rate_limited_requests: u32,
}

impl WindowStats {
    fn starting_at(window_start: SystemTime) -> Self {
        Self {
            window_start,
            request_count: 0,
            successful_requests: 0,
            rate_limited_requests: 0,
        }
    }
}

impl WindowTracker {
    pub fn new(window_duration: Duration) -> Self {
        Self {
            window_duration,
            current_window: WindowStats::starting_at(SystemTime::now()),
        }
    }

    pub fn record_request(&mut self) {
        self.ensure_current_window();
        self.current_window.request_count += 1;
    }

    pub fn record_success(&mut self) {
        self.ensure_current_window();
        self.current_window.successful_requests += 1;
    }

    pub fn record_rate_limited(&mut self) {
        self.ensure_current_window();
        self.current_window.rate_limited_requests += 1;
    }

    pub fn get_current_window_stats(&self) -> WindowStats {
        self.current_window.clone()
    }

    fn ensure_current_window(&mut self) {
        let now = SystemTime::now();
        let window_age = now
            .duration_since(self.current_window.window_start)
            .unwrap_or_default();

        if window_age >= self.window_duration {
            self.current_window = WindowStats::starting_at(now);
        }
    }
}
