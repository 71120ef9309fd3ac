use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use market_core::{Bar, BarSeries, Interval, MarketDataError, MarketDataSource};
use reqwest::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";
pub const DEFAULT_RATE_LIMIT: usize = 5;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_WAIT: Duration = Duration::from_secs(15);

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            let oldest = match ts.front() {
                Some(&oldest) if ts.len() >= self.max_requests => oldest,
                _ => {
                    ts.push_back(now);
                    return;
                }
            };

            // wait for the oldest request to leave the window
            let sleep_dur = (oldest + self.window).saturating_duration_since(now)
                + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for market data slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Aggregates (OHLCV bars) REST client
#[derive(Clone)]
pub struct MarketDataClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl MarketDataClient {
    /// `rate_limit` is requests per minute.
    pub fn new(api_key: String, base_url: impl Into<String>, rate_limit: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, MarketDataError> {
        let request = builder
            .build()
            .map_err(|e| MarketDataError::Api(e.to_string()))?;

        for attempt in 0..MAX_ATTEMPTS {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| MarketDataError::Api("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| MarketDataError::Api(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            tracing::warn!(
                "Market data 429 rate limited, waiting {}s before retry {}/{}",
                RETRY_WAIT.as_secs(),
                attempt + 1,
                MAX_ATTEMPTS
            );
            tokio::time::sleep(RETRY_WAIT).await;
        }

        Err(MarketDataError::RateLimited(format!(
            "still rate limited after {} attempts",
            MAX_ATTEMPTS
        )))
    }

    /// Bars for `ticker` between two dates, inclusive, oldest first.
    pub async fn get_aggregates(
        &self,
        ticker: &str,
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let (multiplier, timespan) = interval.as_aggregate();
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            ticker,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
            ]))
            .await?;

        if !response.status().is_success() {
            return Err(MarketDataError::Api(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| MarketDataError::Api(e.to_string()))?;
        parse_aggregates(&body)
    }
}

#[async_trait]
impl MarketDataSource for MarketDataClient {
    async fn fetch_historical_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Option<BarSeries>, MarketDataError> {
        let ticker = ticker_for(symbol)?;
        let bars = self.get_aggregates(&ticker, interval, start, end).await?;
        tracing::debug!("{} {} bars for {} ({})", bars.len(), interval, symbol, ticker);
        Ok(BarSeries::non_empty(bars))
    }

    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Option<BarSeries>, MarketDataError> {
        let ticker = ticker_for(symbol)?;
        let now = Utc::now();
        let from = recent_window_start(now, interval, limit);
        let bars = self
            .get_aggregates(&ticker, interval, from, now.date_naive())
            .await?;
        Ok(BarSeries::non_empty(bars).map(|series| series.tail(limit)))
    }
}

/// Map a watch-list pair to an aggregates ticker.
///
/// Pairs (`BTC/USDT`) become crypto tickers (`X:BTCUSDT`); anything else is
/// passed through upper-cased.
pub fn ticker_for(symbol: &str) -> Result<String, MarketDataError> {
    let symbol = symbol.trim();
    if symbol.is_empty() || symbol.contains(char::is_whitespace) {
        return Err(MarketDataError::InvalidSymbol(symbol.to_string()));
    }

    match symbol.split_once('/') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
            Ok(format!("X:{}{}", base.to_uppercase(), quote.to_uppercase()))
        }
        Some(_) => Err(MarketDataError::InvalidSymbol(symbol.to_string())),
        None => Ok(symbol.to_uppercase()),
    }
}

/// First date to request so that at least `limit` bars come back. Asks for
/// twice the span to cover gaps in the feed.
fn recent_window_start(now: DateTime<Utc>, interval: Interval, limit: usize) -> NaiveDate {
    let periods = i32::try_from(limit.max(1)).unwrap_or(i32::MAX / 2).saturating_mul(2);
    let span = interval.duration() * periods;
    (now - span - ChronoDuration::days(1)).date_naive()
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

fn parse_aggregates(body: &str) -> Result<Vec<Bar>, MarketDataError> {
    let response: AggregateResponse =
        serde_json::from_str(body).map_err(|e| MarketDataError::Decode(e.to_string()))?;

    Ok(response
        .results
        .into_iter()
        .filter_map(|r| {
            let timestamp = DateTime::from_timestamp_millis(r.t)?;
            Some(Bar {
                timestamp,
                open: r.o,
                high: r.h,
                low: r.l,
                close: r.c,
                volume: r.v,
            })
        })
        .collect())
}
