//! Per-viewer connection adapter
//!
//! Bridges one WebSocket to the session engine: acquires a subscription on
//! open, forwards frames and notices outbound, applies `start`/`stop`
//! commands inbound, and guarantees leave/release on every exit path.
//! Outbound forwarding suspends on the subscriber queues; it never polls.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::Result;
use crate::protocol::{Command, ServerMessage};
use crate::registry::SessionRegistry;
use crate::session::{StreamNotice, SubscriberEvent, SubscriberHandle};
use crate::store::SourceId;

/// One inbound or outbound step of the event loop
enum Step {
    /// Something arrived on the subscription
    Event(Option<SubscriberEvent>),
    /// Something arrived on the socket
    Inbound(Option<tokio_tungstenite::tungstenite::Result<Message>>),
}

/// One viewer connection
pub struct Connection {
    id: u64,
    source_id: SourceId,
    registry: Arc<SessionRegistry>,
    ws: WebSocketStream<TcpStream>,
    subscription: Option<SubscriberHandle>,
}

impl Connection {
    /// Wrap an accepted WebSocket addressed at `source_id`
    pub fn new(
        id: u64,
        source_id: SourceId,
        registry: Arc<SessionRegistry>,
        ws: WebSocketStream<TcpStream>,
    ) -> Self {
        Self {
            id,
            source_id,
            registry,
            ws,
            subscription: None,
        }
    }

    /// Drive the connection until the viewer disconnects
    pub async fn run(mut self) -> Result<()> {
        // Join on open; an acquire failure sends one notice and leaves the
        // socket open for a later `start` retry.
        self.try_acquire().await?;

        let result = self.event_loop().await;

        // Cleanup runs on every exit path, error or not
        if let Some(subscription) = self.subscription.take() {
            self.registry
                .release(&self.source_id, subscription.id())
                .await;
        }
        let _ = self.ws.close(None).await;

        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            let step = match &mut self.subscription {
                Some(subscription) => tokio::select! {
                    event = subscription.next_event() => Step::Event(event),
                    message = self.ws.next() => Step::Inbound(message),
                },
                // Not subscribed: only inbound commands can change that
                None => Step::Inbound(self.ws.next().await),
            };

            match step {
                Step::Event(Some(SubscriberEvent::Frame(payload))) => {
                    let text = ServerMessage::frame(&payload.data).to_text()?;
                    self.ws.send(Message::Text(text)).await?;
                }
                Step::Event(Some(SubscriberEvent::Notice(notice))) => {
                    self.send_notice(&notice).await?;
                    if notice.is_terminal() {
                        self.drop_subscription().await;
                    }
                }
                Step::Event(None) => {
                    // Session is gone; stay connected for a `start` retry
                    self.drop_subscription().await;
                }
                Step::Inbound(Some(Ok(Message::Text(text)))) => {
                    self.handle_command(&text).await?;
                }
                Step::Inbound(Some(Ok(Message::Ping(data)))) => {
                    self.ws.send(Message::Pong(data)).await?;
                }
                Step::Inbound(Some(Ok(Message::Close(_)))) | Step::Inbound(None) => {
                    return Ok(());
                }
                Step::Inbound(Some(Ok(_))) => {} // binary and pong ignored
                Step::Inbound(Some(Err(e))) => return Err(e.into()),
            }
        }
    }

    async fn handle_command(&mut self, text: &str) -> Result<()> {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(connection = self.id, error = %e, "Ignoring malformed command");
                return Ok(());
            }
        };

        match command {
            // Idempotent when already subscribed
            Command::Start if self.subscription.is_some() => Ok(()),
            Command::Start => self.try_acquire().await,
            Command::Stop => {
                self.drop_subscription().await;
                Ok(())
            }
        }
    }

    async fn try_acquire(&mut self) -> Result<()> {
        match self.registry.acquire(&self.source_id).await {
            Ok(handle) => {
                self.subscription = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(
                    connection = self.id,
                    source = %self.source_id,
                    error = %e,
                    "Acquire failed"
                );
                let notice = StreamNotice::new(e.notice_kind(), e.to_string());
                self.send_notice(&notice).await
            }
        }
    }

    async fn send_notice(&mut self, notice: &StreamNotice) -> Result<()> {
        let text = ServerMessage::error(notice).to_text()?;
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn drop_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.registry
                .release(&self.source_id, subscription.id())
                .await;
        }
    }
}
