pub mod alpaca_feed;
pub mod feed;
pub mod ingestor;

pub use feed::MarketDataFeed;
pub use ingestor::{Ingestor, IngestorState};
