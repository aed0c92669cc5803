use async_trait::async_trait;

use crate::{ChannelId, GatewayError, MessageId, StickyContent, Timestamp, UserId};

/// A message as seen when scanning a channel's recent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    pub id: MessageId,
    pub author: UserId,
    pub is_bot: bool,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: MessageId,
    pub timestamp: Timestamp,
}

/// An inbound chat message, as delivered by the platform event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: ChannelId,
    pub author: UserId,
    pub is_bot: bool,
}

/// The chat platform boundary the engine drives.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Up to `limit` most recent messages in `channel`, newest first.
    async fn fetch_recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<RecentMessage>, GatewayError>;

    /// Removes a message. Returns [`GatewayError::NotFound`] when it is
    /// already gone.
    async fn delete_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<(), GatewayError>;

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &StickyContent,
    ) -> Result<SentMessage, GatewayError>;
}
