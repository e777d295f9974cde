// =============================================================================
// MarketDataFeed — vendor-agnostic live bar source
// =============================================================================
//
// The ingestor state machine (ingestor.rs) talks only to this trait, so the
// Alpaca websocket implementation (alpaca_feed.rs) can be swapped for a
// different vendor, or for a scripted fake in tests, without touching
// reconnect/backoff or universe-diffing logic.
// =============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::DataFeed;
use crate::error::ScannerResult;
use crate::types::Bar;

/// A bar for `symbol` received from the upstream feed.
#[derive(Debug, Clone)]
pub struct FeedBar {
    pub symbol: String,
    pub bar: Bar,
}

#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Connect, subscribe to `symbols`, and stream bars into `tx` until the
    /// connection drops or an unrecoverable error occurs. Returning `Ok(())`
    /// or `Err` both mean "the stream ended"; the caller is responsible for
    /// reconnect/backoff.
    async fn run(
        &self,
        symbols: &[String],
        feed: DataFeed,
        tx: mpsc::Sender<FeedBar>,
    ) -> ScannerResult<()>;
}
