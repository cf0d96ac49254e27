use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::Block;
use crate::error::{Error, Result};

/// Sent once after connecting; asks the server for block events.
pub const SUBSCRIBE_BLOCKS: &str = r#"{"action":"want","data":["blocks"]}"#;

/// A feed message, classified by which top-level key it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// `{"block": {...}}`: a newly mined block.
    BlockUpdate(Block),
    /// `{"blocks": [...]}`: the recent-blocks snapshot sent right after subscribing.
    Snapshot(Vec<Block>),
    /// Anything else (mempool stats, conversions, pongs, ...).
    Other,
}

impl FeedMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let Value::Object(mut fields) = serde_json::from_str::<Value>(text)? else {
            return Ok(Self::Other);
        };

        if let Some(block) = fields.remove("block") {
            let block: Block =
                serde_json::from_value(block).map_err(|e| Error::MalformedBlock(e.to_string()))?;
            if block.id.is_empty() {
                return Err(Error::MalformedBlock("empty block id".into()));
            }
            return Ok(Self::BlockUpdate(block));
        }

        if let Some(blocks) = fields.remove("blocks") {
            let blocks =
                serde_json::from_value(blocks).map_err(|e| Error::MalformedBlock(e.to_string()))?;
            return Ok(Self::Snapshot(blocks));
        }

        Ok(Self::Other)
    }
}

/// Turns raw feed text into the blocks worth processing.
///
/// Snapshot blocks are recorded as the known tip but not processed, and a
/// block repeated back-to-back is forwarded only once.
#[derive(Debug, Default)]
pub struct BlockRouter {
    last_block: Option<String>,
    tip_height: Option<u32>,
}

impl BlockRouter {
    pub fn route(&mut self, text: &str) -> Option<Block> {
        match FeedMessage::parse(text) {
            Ok(FeedMessage::BlockUpdate(block)) => {
                if self.last_block.as_deref() == Some(block.id.as_str()) {
                    debug!(hash = %block.id, "Duplicate block notification, skipping");
                    return None;
                }
                info!(height = block.height, hash = %block.id, "📦 New block found");
                self.last_block = Some(block.id.clone());
                self.tip_height = Some(block.height);
                Some(block)
            }
            Ok(FeedMessage::Snapshot(blocks)) => {
                if let Some(tip) = blocks.iter().max_by_key(|b| b.height) {
                    info!(height = tip.height, blocks = blocks.len(), "Received block snapshot");
                    self.last_block = Some(tip.id.clone());
                    self.tip_height = Some(tip.height);
                }
                None
            }
            Ok(FeedMessage::Other) => None,
            Err(e @ Error::MalformedBlock(_)) => {
                warn!("Ignoring feed message: {e}");
                None
            }
            Err(e) => {
                debug!("Ignoring non-JSON feed message: {e}");
                None
            }
        }
    }

    pub fn tip_height(&self) -> Option<u32> {
        self.tip_height
    }
}

/// WebSocket connection to the block feed.
pub struct BlockFeed {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl BlockFeed {
    /// Connect and subscribe. Any failure here is fatal to the caller.
    pub async fn connect(url: &str) -> Result<Self> {
        let (mut ws, _) = connect_async(url).await?;
        ws.send(Message::Text(SUBSCRIBE_BLOCKS.to_string())).await?;
        info!(url, "Connected to block feed, listening for blocks");
        Ok(Self { ws })
    }

    /// Read until cancelled, the server hangs up, or the read loop errors.
    /// New blocks are forwarded to `blocks`; there is no reconnect.
    pub async fn run(
        self,
        blocks: mpsc::Sender<Block>,
        ping_interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let (mut write, mut read) = self.ws.split();
        let mut router = BlockRouter::default();
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(block) = router.route(&text) else { continue };
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            sent = blocks.send(block) => if sent.is_err() {
                                info!("Block channel closed, stopping feed listener");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Feed closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        info!("Feed stream ended");
                        break;
                    }
                }
            }
        }

        info!(tip = ?router.tip_height(), "Feed listener stopped");
        Ok(())
    }
}
