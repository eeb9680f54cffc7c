//! Market data stream
//!
//! Connects to the combined stream for `<symbol>@aggTrade` and
//! `<symbol>@bookTicker` across every configured pair, with exponential
//! backoff reconnection (1s doubling, capped at 60s) and per-symbol trade
//! sequence-gap detection. Parsed events are pushed into the bounded event
//! queue; a full queue blocks the reader, which is the backpressure the
//! dispatcher relies on.

use crate::binance::types::{AggTradeEvent, BookTickerEvent, CombinedStreamMessage};
use crate::config::Settings;
use crate::engine::events::Event;
use crate::error::{EngineError, Result};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Initial reconnect delay; doubles on each failure.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for the reconnect backoff.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
/// Application-level heartbeat.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Long-lived task feeding market events into the queue.
pub struct MarketStream {
    cfg: Arc<Settings>,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
    last_trade_ids: HashMap<String, u64>,
}

impl MarketStream {
    pub fn new(cfg: Arc<Settings>, events: mpsc::Sender<Event>, shutdown: CancellationToken) -> Self {
        Self {
            cfg,
            events,
            shutdown,
            last_trade_ids: HashMap::new(),
        }
    }

    fn stream_url(&self) -> String {
        let streams: Vec<String> = self
            .cfg
            .trading_pairs
            .iter()
            .flat_map(|s| {
                let sl = s.to_lowercase();
                [format!("{sl}@aggTrade"), format!("{sl}@bookTicker")]
            })
            .collect();
        format!("{}/stream?streams={}", self.cfg.ws_url, streams.join("/"))
    }

    /// Run until shutdown, reconnecting with exponential backoff.
    pub async fn run(mut self) {
        let mut delay = INITIAL_RECONNECT_DELAY;

        while !self.shutdown.is_cancelled() {
            match self.connect_once().await {
                Ok(()) => {
                    // Clean exit only happens on shutdown
                    break;
                }
                Err(e) => {
                    error!(error = %e, delay_secs = delay.as_secs(), "market stream failed");
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
        info!("market stream stopped");
    }

    async fn connect_once(&mut self) -> Result<()> {
        let url = self.stream_url();
        info!(url = %url, "connecting market stream");

        let (ws_stream, _) = connect_async(&url).await?;
        info!("market stream connected");

        let (mut write, mut read) = ws_stream.split();
        let mut ping = interval(PING_INTERVAL);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_message(text.as_str()).await?,
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(frame = ?frame, "market stream closed by server");
                        return Err(EngineError::WebSocket("closed by server".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(EngineError::WebSocket("stream ended".to_string())),
                }
            }
        }
    }

    /// Parse one combined-stream frame and enqueue the typed event.
    ///
    /// Malformed frames are logged and skipped; only a closed event queue
    /// is fatal.
    async fn handle_message(&mut self, raw: &str) -> Result<()> {
        let recv = Instant::now();
        let msg: CombinedStreamMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "unparseable market frame");
                return Ok(());
            }
        };

        if msg.stream.ends_with("@aggTrade") {
            let trade: AggTradeEvent = match serde_json::from_value(msg.data) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "bad aggTrade payload");
                    return Ok(());
                }
            };
            let (Ok(price), Ok(qty)) = (trade.price.parse::<f64>(), trade.quantity.parse::<f64>())
            else {
                warn!(symbol = %trade.symbol, "non-numeric aggTrade fields");
                return Ok(());
            };

            self.track_sequence(&trade.symbol, trade.agg_trade_id);

            self.events
                .send(Event::AggTrade {
                    symbol: trade.symbol,
                    price,
                    qty,
                    is_buyer_maker: trade.is_buyer_maker,
                    trade_id: trade.agg_trade_id,
                    event_time_ms: trade.event_time,
                    recv,
                })
                .await
                .map_err(|_| EngineError::Connection("event queue closed".to_string()))?;
        } else if msg.stream.ends_with("@bookTicker") {
            let tick: BookTickerEvent = match serde_json::from_value(msg.data) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "bad bookTicker payload");
                    return Ok(());
                }
            };
            let (Ok(bid_price), Ok(bid_qty), Ok(ask_price), Ok(ask_qty)) = (
                tick.bid_price.parse::<f64>(),
                tick.bid_qty.parse::<f64>(),
                tick.ask_price.parse::<f64>(),
                tick.ask_qty.parse::<f64>(),
            ) else {
                warn!(symbol = %tick.symbol, "non-numeric bookTicker fields");
                return Ok(());
            };

            self.events
                .send(Event::BookTicker {
                    symbol: tick.symbol,
                    bid_price,
                    bid_qty,
                    ask_price,
                    ask_qty,
                    recv,
                })
                .await
                .map_err(|_| EngineError::Connection("event queue closed".to_string()))?;
        } else {
            debug!(stream = %msg.stream, "ignoring unknown stream");
        }

        Ok(())
    }

    /// Trade ids increase by 1 per symbol; a jump means the venue (or the
    /// connection) dropped trades. Logged, never blocking.
    fn track_sequence(&mut self, symbol: &str, trade_id: u64) {
        if let Some(&last) = self.last_trade_ids.get(symbol) {
            if trade_id > last + 1 {
                warn!(
                    symbol,
                    gap = trade_id - last - 1,
                    "aggTrade sequence gap"
                );
            }
        }
        self.last_trade_ids.insert(symbol.to_string(), trade_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with_queue() -> (MarketStream, mpsc::Receiver<Event>) {
        let cfg = Arc::new(Settings::from_env().expect("default settings"));
        let (tx, rx) = mpsc::channel(16);
        (
            MarketStream::new(cfg, tx, CancellationToken::new()),
            rx,
        )
    }

    #[tokio::test]
    async fn test_agg_trade_frame_becomes_event() {
        let (mut stream, mut rx) = stream_with_queue();
        let raw = r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":1672531200000,"s":"BTCUSDT","a":100,"p":"16800.50","q":"1.25","m":true}}"#;
        stream.handle_message(raw).await.unwrap();

        let Some(Event::AggTrade {
            symbol,
            price,
            qty,
            is_buyer_maker,
            trade_id,
            event_time_ms,
            ..
        }) = rx.recv().await
        else {
            panic!("expected agg trade event");
        };
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(price, 16800.50);
        assert_eq!(qty, 1.25);
        assert!(is_buyer_maker);
        assert_eq!(trade_id, 100);
        assert_eq!(event_time_ms, 1672531200000);
    }

    #[tokio::test]
    async fn test_book_ticker_frame_becomes_event() {
        let (mut stream, mut rx) = stream_with_queue();
        let raw = r#"{"stream":"btcusdt@bookTicker","data":{"u":1,"s":"BTCUSDT","b":"100.1","B":"3.0","a":"100.2","A":"1.0"}}"#;
        stream.handle_message(raw).await.unwrap();

        let Some(Event::BookTicker {
            bid_price,
            bid_qty,
            ask_price,
            ask_qty,
            ..
        }) = rx.recv().await
        else {
            panic!("expected book ticker event");
        };
        assert_eq!(bid_price, 100.1);
        assert_eq!(bid_qty, 3.0);
        assert_eq!(ask_price, 100.2);
        assert_eq!(ask_qty, 1.0);
    }

    #[tokio::test]
    async fn test_sequence_gap_is_tracked_not_dropped() {
        let (mut stream, mut rx) = stream_with_queue();
        let frame = |id: u64| {
            format!(
                r#"{{"stream":"btcusdt@aggTrade","data":{{"E":1,"s":"BTCUSDT","a":{id},"p":"100","q":"1","m":false}}}}"#
            )
        };
        stream.handle_message(&frame(10)).await.unwrap();
        // Gap of 4 trades: logged, but the trade still flows through
        stream.handle_message(&frame(15)).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Event::AggTrade { trade_id: 10, .. })));
        assert!(matches!(rx.recv().await, Some(Event::AggTrade { trade_id: 15, .. })));
        assert_eq!(stream.last_trade_ids["BTCUSDT"], 15);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (mut stream, mut rx) = stream_with_queue();
        stream.handle_message("not json").await.unwrap();
        stream
            .handle_message(r#"{"stream":"btcusdt@aggTrade","data":{"s":"BTCUSDT"}}"#)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stream_url_contains_both_channels() {
        let (stream, _rx) = {
            let cfg = Arc::new(Settings::from_env().expect("default settings"));
            let (tx, rx) = mpsc::channel(1);
            (MarketStream::new(cfg, tx, CancellationToken::new()), rx)
        };
        let url = stream.stream_url();
        assert!(url.contains("/stream?streams="));
        assert!(url.contains("btcusdt@aggTrade"));
        assert!(url.contains("btcusdt@bookTicker"));
    }
}
