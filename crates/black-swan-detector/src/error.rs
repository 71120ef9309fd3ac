use market_core::{MarketDataError, Symbol};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("No market data source attached")]
    NoDataSource,

    #[error("No data available for {0}")]
    NoData(Symbol),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Data source error: {0}")]
    DataSource(#[from] MarketDataError),

    #[error("Computation error: {0}")]
    Computation(String),
}

/// Failure of one evaluator for one symbol. Logged and skipped by the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalError {
    #[error("{symbol}: need at least {required} bars, got {actual}")]
    TooFewBars {
        symbol: Symbol,
        required: usize,
        actual: usize,
    },

    #[error("{symbol}: degenerate baseline ({reason})")]
    DegenerateBaseline { symbol: Symbol, reason: String },

    #[error("{symbol}: non-finite value ({reason})")]
    NonFinite { symbol: Symbol, reason: String },
}
