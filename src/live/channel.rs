//! Streaming channel transport
//!
//! A channel is opened by a [`ChannelConnector`], which sends the setup
//! message first and then forwards every decoded inbound event to the
//! session's event queue. Outbound sends never block: they are queued to a
//! writer task and fail immediately if the queue is closed or full.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::protocol::{decode_server_frame, ClientMessage, ServerEvent, Setup};
use crate::services::CapabilityToken;
use crate::{Error, Result};

/// Outbound messages buffered before sends start failing
const OUTGOING_CAPACITY: usize = 256;

/// Everything needed to open a channel
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub url: String,
    pub token: CapabilityToken,
    pub setup: Setup,
}

impl ChannelRequest {
    /// Endpoint URL with the token attached as `access_token`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint URL is invalid
    pub fn authorized_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid live url {}: {e}", self.url)))?;
        url.query_pairs_mut()
            .append_pair("access_token", self.token.expose());
        Ok(url)
    }
}

/// An open duplex channel
pub trait LiveChannel: Send {
    /// Queue a message without waiting
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` if the channel is closed or its queue is full
    fn send(&mut self, message: ClientMessage) -> Result<()>;

    /// Close the channel from this side
    fn close(&mut self);
}

/// Opens channels
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a channel, delivering inbound events to `events`
    ///
    /// # Errors
    ///
    /// Returns `Error::Channel` if the transport cannot be established
    async fn open(
        &self,
        request: ChannelRequest,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Box<dyn LiveChannel>>;
}

/// WebSocket connector for the live endpoint
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn open(
        &self,
        request: ChannelRequest,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Box<dyn LiveChannel>> {
        let url = request.authorized_url()?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Channel(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(request.setup))?;
        sink.send(Message::Text(setup))
            .await
            .map_err(|e| Error::Channel(format!("failed to send setup: {e}")))?;
        tracing::info!(endpoint = %request.url, "live channel opened, setup sent");

        let (outgoing, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_CAPACITY);

        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::debug!(error = %e, "live channel writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let terminal = loop {
                match source.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if !forward(&events, text.as_bytes()).await {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if !forward(&events, &bytes).await {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or(
                            ServerEvent::Closed {
                                code: None,
                                reason: "closed by server".to_string(),
                            },
                            |f| ServerEvent::Closed {
                                code: Some(u16::from(f.code)),
                                reason: f.reason.into_owned(),
                            },
                        );
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break ServerEvent::Failed(e.to_string()),
                    None => {
                        break ServerEvent::Closed {
                            code: None,
                            reason: "connection lost".to_string(),
                        };
                    }
                }
            };
            let _ = events.send(terminal).await;
        });

        Ok(Box::new(WsChannel { outgoing }))
    }
}

/// Decode and forward one frame; returns false once the session stopped listening
async fn forward(events: &mpsc::Sender<ServerEvent>, frame: &[u8]) -> bool {
    match decode_server_frame(frame) {
        Ok(decoded) => {
            for event in decoded {
                if events.send(event).await.is_err() {
                    return false;
                }
            }
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping server message");
            true
        }
    }
}

struct WsChannel {
    outgoing: mpsc::Sender<Message>,
}

impl LiveChannel for WsChannel {
    fn send(&mut self, message: ClientMessage) -> Result<()> {
        let text = serde_json::to_string(&message)?;
        self.outgoing.try_send(Message::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Channel("send queue full".to_string()),
            mpsc::error::TrySendError::Closed(_) => Error::Channel("channel closed".to_string()),
        })
    }

    fn close(&mut self) {
        if self.outgoing.try_send(Message::Close(None)).is_err() {
            tracing::debug!("live channel already closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_travels_as_query_parameter() {
        let request = ChannelRequest {
            url: "wss://example.com/ws?alt=1".to_string(),
            token: CapabilityToken::new("auth_tokens/abc"),
            setup: Setup::new("m", "v", "i", Vec::new(), false),
        };
        let url = request.authorized_url().unwrap();
        let pairs: Vec<_> = url.query_pairs().collect();
        assert!(pairs.iter().any(|(k, v)| k == "alt" && v == "1"));
        assert!(pairs.iter().any(|(k, v)| k == "access_token" && v == "auth_tokens/abc"));
    }

    #[test]
    fn rejects_invalid_url() {
        let request = ChannelRequest {
            url: "not a url".to_string(),
            token: CapabilityToken::new("t"),
            setup: Setup::new("m", "v", "i", Vec::new(), false),
        };
        assert!(matches!(request.authorized_url(), Err(Error::Config(_))));
    }
}
