use async_trait::async_trait;
use chrono::NaiveDate;
use crate::{BarSeries, Interval, MarketDataError};

/// Source of historical and recent OHLCV bars.
///
/// `Ok(None)` means the source answered but has no bars for the symbol;
/// `Err` means the request itself failed.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_historical_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Option<BarSeries>, MarketDataError>;

    /// Most recent `limit` bars, oldest first.
    async fn fetch_recent_bars(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Option<BarSeries>, MarketDataError>;
}
