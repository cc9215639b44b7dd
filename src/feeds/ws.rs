//! Connection plumbing shared by the streaming feeds.
//!
//! Streams reconnect forever after a fixed delay. There is no backoff
//! ceiling: both upstreams are expected to come back.

use crate::error::{FeedError, FeedResult};
use futures_util::{SinkExt, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// A session with no inbound frame for this long is considered dead.
pub const SILENCE_LIMIT: Duration = Duration::from_secs(60);

/// Fixed-delay reconnect policy for one named feed.
#[derive(Debug, Clone, Copy)]
pub struct Reconnect {
    pub feed: &'static str,
    pub delay: Duration,
}

impl Reconnect {
    pub fn new(feed: &'static str, delay_secs: u64) -> Self {
        Self {
            feed,
            delay: Duration::from_secs(delay_secs),
        }
    }

    /// Log the disconnect reason and sleep out the delay.
    pub async fn pause(&self, reason: impl Display) {
        warn!(
            "[{}] disconnected ({reason}), reconnecting in {}s",
            self.feed,
            self.delay.as_secs()
        );
        tokio::time::sleep(self.delay).await;
    }
}

/// Open a websocket, bounded by [`OPEN_TIMEOUT`].
pub async fn connect(url: &str) -> FeedResult<WsSession> {
    let (stream, _) = tokio::time::timeout(OPEN_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| FeedError::Timeout("websocket connect"))??;
    Ok(WsSession::new(stream))
}

enum Event {
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Keepalive,
}

/// A live connection that yields text frames and keeps itself alive.
pub struct WsSession {
    stream: WsStream,
    ping: Interval,
    last_inbound: Instant,
}

impl WsSession {
    pub fn new(stream: WsStream) -> Self {
        Self {
            stream,
            ping: interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL),
            last_inbound: Instant::now(),
        }
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) -> FeedResult<()> {
        let text = serde_json::to_string(value)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Wait for the next text frame. Any error, close or prolonged silence
    /// ends the session.
    pub async fn next_text(&mut self) -> FeedResult<String> {
        loop {
            let event = tokio::select! {
                msg = self.stream.next() => Event::Frame(msg),
                _ = self.ping.tick() => Event::Keepalive,
            };

            match event {
                Event::Frame(Some(Ok(Message::Text(text)))) => {
                    self.last_inbound = Instant::now();
                    return Ok(text);
                }
                Event::Frame(Some(Ok(Message::Close(frame)))) => {
                    debug!("close frame: {frame:?}");
                    return Err(FeedError::Closed);
                }
                Event::Frame(Some(Ok(_))) => {
                    // Ping, Pong, Binary: tungstenite answers pings itself.
                    self.last_inbound = Instant::now();
                }
                Event::Frame(Some(Err(e))) => return Err(e.into()),
                Event::Frame(None) => return Err(FeedError::Closed),
                Event::Keepalive => {
                    if self.last_inbound.elapsed() >= SILENCE_LIMIT {
                        return Err(FeedError::Timeout("no inbound frames"));
                    }
                    self.stream.send(Message::Ping(Vec::new())).await?;
                }
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
