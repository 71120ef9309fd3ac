use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketDataError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
}
