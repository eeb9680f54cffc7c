//! User data stream
//!
//! Obtains a listen key over REST, connects to the private stream, and
//! forwards order/account updates into the event queue. A sibling renewer
//! keeps the key alive every 30 minutes (it expires after 60); a
//! `listenKeyExpired` push forces a reconnect with a fresh key.

use crate::binance::types::UserStreamEvent;
use crate::binance::FuturesClient;
use crate::config::Settings;
use crate::engine::events::{AssetBalance, Event};
use crate::error::{EngineError, Result};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay before retrying listen-key acquisition or the connection itself.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Keepalive cadence; the venue expires keys after 60 minutes.
const RENEW_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Application-level heartbeat.
const PING_INTERVAL: Duration = Duration::from_secs(15);

/// Long-lived task feeding private events into the queue.
pub struct UserStream {
    cfg: Arc<Settings>,
    client: Arc<FuturesClient>,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
}

impl UserStream {
    pub fn new(
        cfg: Arc<Settings>,
        client: Arc<FuturesClient>,
        events: mpsc::Sender<Event>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            client,
            events,
            shutdown,
        }
    }

    /// Run until shutdown: acquire key, stream, renew, reconnect.
    pub async fn run(self) {
        while !self.shutdown.is_cancelled() {
            let listen_key = match self.client.create_listen_key().await {
                Ok(key) => key,
                Err(e) => {
                    error!(error = %e, "listen key acquisition failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = sleep(RECONNECT_DELAY) => continue,
                    }
                }
            };
            info!("listen key acquired");

            let renewer = tokio::spawn(renew_loop(
                Arc::clone(&self.client),
                self.shutdown.child_token(),
            ));

            if let Err(e) = self.connect_once(&listen_key).await {
                error!(error = %e, "user stream failed");
            }
            renewer.abort();

            if self.shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(RECONNECT_DELAY) => {}
            }
        }

        // Best-effort: invalidate the session key on the way out
        if let Err(e) = self.client.close_listen_key().await {
            debug!(error = %e, "listen key close failed");
        }
        info!("user stream stopped");
    }

    async fn connect_once(&self, listen_key: &str) -> Result<()> {
        let url = format!("{}/ws/{}", self.cfg.ws_url, listen_key);
        info!("connecting user data stream");

        let (ws_stream, _) = connect_async(&url).await?;
        info!("user data stream connected");

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
                    Some(Ok(Message::Text(text))) => {
                        if self.handle_message(text.as_str()).await? {
                            return Err(EngineError::WebSocket(
                                "listen key expired".to_string(),
                            ));
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(frame = ?frame, "user stream closed by server");
                        return Err(EngineError::WebSocket("closed by server".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(EngineError::WebSocket("stream ended".to_string())),
                }
            }
        }
    }

    /// Parse one private frame. Returns `true` when the listen key expired
    /// and the connection must be rebuilt.
    async fn handle_message(&self, raw: &str) -> Result<bool> {
        let event: UserStreamEvent = match serde_json::from_str(raw) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "unparseable user frame");
                return Ok(false);
            }
        };

        match event {
            UserStreamEvent::OrderTradeUpdate { order } => {
                self.events
                    .send(Event::OrderUpdate(order.to_status_update()))
                    .await
                    .map_err(|_| EngineError::Connection("event queue closed".to_string()))?;
            }
            UserStreamEvent::AccountUpdate { account } => {
                let balances = account
                    .balances
                    .iter()
                    .filter_map(|b| {
                        b.wallet_balance.parse::<f64>().ok().map(|wb| AssetBalance {
                            asset: b.asset.clone(),
                            wallet_balance: wb,
                        })
                    })
                    .collect();
                self.events
                    .send(Event::AccountUpdate { balances })
                    .await
                    .map_err(|_| EngineError::Connection("event queue closed".to_string()))?;
            }
            UserStreamEvent::ListenKeyExpired => {
                warn!("listen key expired, reconnecting");
                return Ok(true);
            }
            UserStreamEvent::Other => {
                debug!("ignoring unhandled user event");
            }
        }
        Ok(false)
    }
}

/// Keepalive loop for the listen key; aborted when its stream reconnects.
async fn renew_loop(client: Arc<FuturesClient>, shutdown: CancellationToken) {
    let mut tick = interval(RENEW_INTERVAL);
    tick.tick().await; // the first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tick.tick() => {
                match client.keepalive_listen_key().await {
                    Ok(()) => info!("listen key renewed"),
                    Err(e) => warn!(error = %e, "listen key renewal failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binance::RateLimiter;
    use crate::config::Credentials;
    use crate::oms::OrderStatusUpdate;

    fn stream_with_queue() -> (UserStream, mpsc::Receiver<Event>) {
        let cfg = Arc::new(Settings::from_env().expect("default settings"));
        let limiter = Arc::new(RateLimiter::new(2400, 60));
        let client = Arc::new(FuturesClient::new(
            cfg.rest_url.clone(),
            Credentials::from_env(),
            limiter,
        ));
        let (tx, rx) = mpsc::channel(16);
        (
            UserStream::new(cfg, client, tx, CancellationToken::new()),
            rx,
        )
    }

    #[tokio::test]
    async fn test_order_update_forwarded() {
        let (stream, mut rx) = stream_with_queue();
        let raw = r#"{"e":"ORDER_TRADE_UPDATE","E":1,"o":{"s":"BTCUSDT","c":"vs-1","X":"FILLED","i":7,"z":"1.0","ap":"100.0"}}"#;
        assert!(!stream.handle_message(raw).await.unwrap());

        let Some(Event::OrderUpdate(OrderStatusUpdate {
            client_id,
            status,
            filled_qty,
            ..
        })) = rx.recv().await
        else {
            panic!("expected order update");
        };
        assert_eq!(client_id, "vs-1");
        assert_eq!(status, "FILLED");
        assert_eq!(filled_qty, 1.0);
    }

    #[tokio::test]
    async fn test_account_update_forwarded() {
        let (stream, mut rx) = stream_with_queue();
        let raw = r#"{"e":"ACCOUNT_UPDATE","E":1,"a":{"B":[{"a":"USDT","wb":"5000.5"}]}}"#;
        assert!(!stream.handle_message(raw).await.unwrap());

        let Some(Event::AccountUpdate { balances }) = rx.recv().await else {
            panic!("expected account update");
        };
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].asset, "USDT");
        assert_eq!(balances[0].wallet_balance, 5000.5);
    }

    #[tokio::test]
    async fn test_listen_key_expiry_forces_reconnect() {
        let (stream, _rx) = stream_with_queue();
        let raw = r#"{"e":"listenKeyExpired","E":1}"#;
        assert!(stream.handle_message(raw).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_event_ignored() {
        let (stream, mut rx) = stream_with_queue();
        let raw = r#"{"e":"MARGIN_CALL","E":1}"#;
        assert!(!stream.handle_message(raw).await.unwrap());
        assert!(rx.try_recv().is_err());
    }
}
