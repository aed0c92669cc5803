use core::fmt;
use std::collections::HashSet;

use async_trait::async_trait;
use matrix_sdk::{
    Client,
    room::{MessagesOptions, Room},
    ruma::{
        EventId, RoomId, UserId as MatrixUserId,
        api::client::error::ErrorKind,
        events::{
            AnySyncMessageLikeEvent, AnySyncTimelineEvent,
            room::message::{MessageType, RoomMessageEventContent, SyncRoomMessageEvent},
        },
        serde::Raw,
    },
};
use sticky_engine::{
    ChannelId, Clock as _, GatewayError, MessageId, MessagingGateway, RecentMessage,
    SentMessage, StickyContent, SystemClock, Timestamp, UserId,
};
use tracing::debug;

const REDACT_REASON: &str = "sticky message refresh";

/// [`MessagingGateway`] over a logged-in matrix-sdk [`Client`].
///
/// Channels are room ids and messages are event ids. Deleting a message
/// redacts it.
#[derive(Clone)]
pub struct MatrixGateway {
    client: Client,
    bot_users: HashSet<String>,
}

impl fmt::Debug for MatrixGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatrixGateway")
            .field("bot_users", &self.bot_users)
            .finish_non_exhaustive()
    }
}

impl MatrixGateway {
    pub fn new(client: Client, bot_users: impl IntoIterator<Item = String>) -> Self {
        Self {
            client,
            bot_users: bot_users
                .into_iter()
                .map(|u| u.to_lowercase())
                .collect(),
        }
    }

    fn room(&self, channel: &ChannelId) -> Result<Room, GatewayError> {
        let room_id = RoomId::parse(channel.as_str()).map_err(|_| GatewayError::NotFound)?;
        self.client.get_room(&room_id).ok_or(GatewayError::NotFound)
    }

    pub fn is_bot(&self, sender: &MatrixUserId, msgtype: &MessageType) -> bool {
        let own = self.client.user_id().is_some_and(|own| own == sender);
        is_bot_message(own, &self.bot_users, sender.as_str(), msgtype)
    }

    fn recent_from_raw(&self, raw: &Raw<AnySyncTimelineEvent>) -> Option<RecentMessage> {
        let AnySyncTimelineEvent::MessageLike(AnySyncMessageLikeEvent::RoomMessage(
            SyncRoomMessageEvent::Original(event),
        )) = raw.deserialize().ok()?
        else {
            return None;
        };
        Some(RecentMessage {
            id: MessageId::new(event.event_id.as_str()),
            author: UserId::new(event.sender.as_str()),
            is_bot: self.is_bot(&event.sender, &event.content.msgtype),
            timestamp: Timestamp::from_millis(u64::from(event.origin_server_ts.get())),
        })
    }
}

/// Matrix has no bot flag: the bot itself, configured bot accounts and
/// `m.notice` senders all count as bots.
pub(crate) fn is_bot_message(
    own: bool,
    bot_users: &HashSet<String>,
    sender: &str,
    msgtype: &MessageType,
) -> bool {
    own || matches!(msgtype, MessageType::Notice(_)) || bot_users.contains(&sender.to_lowercase())
}

#[async_trait]
impl MessagingGateway for MatrixGateway {
    async fn fetch_recent_messages(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<RecentMessage>, GatewayError> {
        let room = self.room(channel)?;
        let mut options = MessagesOptions::backward();
        options.limit = u32::try_from(limit).unwrap_or(u32::MAX).into();
        let response = room
            .messages(options)
            .await
            .map_err(GatewayError::transient)?;

        let total = response.chunk.len();
        let recent: Vec<RecentMessage> = response
            .chunk
            .into_iter()
            .filter_map(|event| self.recent_from_raw(&event.into_raw()))
            .collect();
        debug!(room = %channel, total, messages = recent.len(), "Fetched recent room history");
        Ok(recent)
    }

    async fn delete_message(
        &self,
        channel: &ChannelId,
        message: &MessageId,
    ) -> Result<(), GatewayError> {
        let room = self.room(channel)?;
        let event_id = EventId::parse(message.as_str()).map_err(|_| GatewayError::NotFound)?;
        match room.redact(&event_id, Some(REDACT_REASON), None).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.client_api_error_kind(), Some(ErrorKind::NotFound)) => {
                Err(GatewayError::NotFound)
            }
            Err(e) => Err(GatewayError::transient(e)),
        }
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &StickyContent,
    ) -> Result<SentMessage, GatewayError> {
        let room = self.room(channel)?;
        let rendered = content.render();
        let message = match rendered.html {
            Some(html) => RoomMessageEventContent::text_html(rendered.body, html),
            None => RoomMessageEventContent::text_plain(rendered.body),
        };
        let sent = room.send(message).await.map_err(GatewayError::transient)?;
        Ok(SentMessage {
            id: MessageId::new(sent.event_id.as_str()),
            timestamp: SystemClock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_sdk::ruma::events::room::message::{NoticeMessageEventContent, TextMessageEventContent};

    #[test]
    fn bot_detection() {
        let bots: HashSet<String> = ["@helper:example.org".to_owned()].into();
        let text = MessageType::Text(TextMessageEventContent::plain("hi"));
        let notice = MessageType::Notice(NoticeMessageEventContent::plain("beep"));

        assert!(!is_bot_message(false, &bots, "@alice:example.org", &text));
        assert!(is_bot_message(true, &bots, "@alice:example.org", &text));
        assert!(is_bot_message(false, &bots, "@Helper:example.org", &text));
        assert!(is_bot_message(false, &bots, "@alice:example.org", &notice));
    }
}
