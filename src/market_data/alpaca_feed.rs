// =============================================================================
// Alpaca market-data feed — concrete MarketDataFeed implementation
// =============================================================================
//
// Connects to Alpaca's streaming bars endpoint, authenticates, subscribes to
// the requested symbols, and forwards parsed 1-minute bars. Runs until the
// socket closes or the stream errors; the ingestor owns reconnect/backoff.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::feed::{FeedBar, MarketDataFeed};
use crate::config::DataFeed;
use crate::error::{ScannerError, ScannerResult};
use crate::types::Bar;

pub struct AlpacaFeed {
    key_id: String,
    secret_key: String,
}

impl AlpacaFeed {
    pub fn new(key_id: String, secret_key: String) -> Self {
        Self { key_id, secret_key }
    }
}

#[async_trait]
impl MarketDataFeed for AlpacaFeed {
    async fn run(
        &self,
        symbols: &[String],
        feed: DataFeed,
        tx: mpsc::Sender<FeedBar>,
    ) -> ScannerResult<()> {
        if symbols.is_empty() {
            return Ok(());
        }

        let url = format!("wss://stream.data.alpaca.markets/v2/{feed}");
        info!(url = %url, count = symbols.len(), "connecting to Alpaca bar stream");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .map_err(|e| ScannerError::Transient(format!("alpaca connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let auth_msg = serde_json::json!({
            "action": "auth",
            "key": self.key_id,
            "secret": self.secret_key,
        });
        write
            .send(Message::Text(auth_msg.to_string()))
            .await
            .map_err(|e| ScannerError::Transient(format!("alpaca auth send failed: {e}")))?;

        let subscribe_msg = serde_json::json!({
            "action": "subscribe",
            "bars": symbols,
        });
        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .map_err(|e| ScannerError::Transient(format!("alpaca subscribe send failed: {e}")))?;

        info!(symbols = ?symbols, "subscribed to Alpaca bar stream");

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    for feed_bar in parse_bar_messages(&text) {
                        if tx.send(feed_bar).await.is_err() {
                            warn!("ingestor channel closed — ending Alpaca stream");
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(?frame, "Alpaca stream closed by server");
                    return Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(ScannerError::Transient(format!("alpaca read error: {e}")));
                }
                None => {
                    warn!("Alpaca stream ended");
                    return Ok(());
                }
            }
        }
    }
}

/// Parse an Alpaca stream message, which is a JSON array of envelopes such as
/// `{"T":"success",...}`, `{"T":"subscription",...}`, or
/// `{"T":"b","S":"AAPL","o":1,"h":2,"l":0.5,"c":1.5,"v":1000,"t":"2024-.."}`.
/// Non-bar envelopes are logged and skipped.
fn parse_bar_messages(text: &str) -> Vec<FeedBar> {
    let root: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to parse Alpaca stream message");
            return Vec::new();
        }
    };

    let entries: Vec<serde_json::Value> = match root {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let mut bars = Vec::new();
    for entry in entries {
        match entry.get("T").and_then(|v| v.as_str()) {
            Some("b") => match parse_single_bar(&entry) {
                Ok(feed_bar) => bars.push(feed_bar),
                Err(e) => warn!(error = %e, "skipping malformed Alpaca bar"),
            },
            Some("error") => {
                warn!(payload = %entry, "Alpaca stream reported an error");
            }
            Some(other) => {
                debug!(envelope = other, "ignoring non-bar Alpaca stream envelope");
            }
            None => {}
        }
    }
    bars
}

fn parse_single_bar(v: &serde_json::Value) -> Result<FeedBar, String> {
    let symbol = v
        .get("S")
        .and_then(|x| x.as_str())
        .ok_or("missing field S")?
        .to_ascii_uppercase();

    let field = |name: &str| -> Result<f64, String> {
        v.get(name)
            .and_then(|x| x.as_f64())
            .ok_or_else(|| format!("missing or non-numeric field {name}"))
    };

    let ts_str = v.get("t").and_then(|x| x.as_str()).ok_or("missing field t")?;
    let ts: DateTime<Utc> = ts_str
        .parse()
        .map_err(|e| format!("invalid timestamp {ts_str}: {e}"))?;

    let bar = Bar {
        ts,
        o: field("o")?,
        h: field("h")?,
        l: field("l")?,
        c: field("c")?,
        v: field("v")?,
    };

    Ok(FeedBar { symbol, bar })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_bar_envelope() {
        let msg = r#"[{"T":"b","S":"AAPL","o":190.1,"h":190.5,"l":189.9,"c":190.3,"v":12000,"t":"2024-03-04T14:31:00Z"}]"#;
        let bars = parse_bar_messages(msg);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].symbol, "AAPL");
        assert_eq!(bars[0].bar.c, 190.3);
    }

    #[test]
    fn ignores_non_bar_envelopes() {
        let msg = r#"[{"T":"success","msg":"authenticated"},{"T":"subscription","bars":["AAPL"]}]"#;
        assert!(parse_bar_messages(msg).is_empty());
    }

    #[test]
    fn skips_malformed_bar_without_panicking() {
        let msg = r#"[{"T":"b","S":"AAPL"}]"#;
        assert!(parse_bar_messages(msg).is_empty());
    }
}
