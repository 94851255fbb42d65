//! Chat and video listings built from paginated client queries.
//!
//! Every page is a correlated wait on a dedicated key, and a session runs one
//! page query at a time. A page whose result field is empty ends the
//! pagination; unrelated events in between never do.

use std::collections::HashSet;
use std::time::Duration;

use chrono::DateTime;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use vidgate_protocol::{Chat, Command, Event, Message, MessageSender, User};

use crate::correlator::{CorrelateError, CorrelationKey, Cursor, Timeout};
use crate::session::{Session, SessionError, SessionId};
use crate::sync::KeyedLocks;

#[derive(Debug, Error)]
pub enum ListingError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Correlate(#[from] CorrelateError),
}

/// One entry of `/get_chats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSummary {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<Chat> for ChatSummary {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            title: chat.title,
            kind: chat.kind,
        }
    }
}

/// One video message of `/get_files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoDescriptor {
    pub id: i32,
    pub mime_type: String,
    pub file_name: String,
    pub remote_id: String,
    pub message_text: String,
    pub message_id: i64,
    pub sender_id: String,
    /// `user` or `chat`.
    pub sender_type: String,
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
}

impl VideoDescriptor {
    /// `None` unless `message` carries a video.
    pub fn from_message(message: &Message) -> Option<Self> {
        let video = message.video()?;
        let (sender_id, sender_type) = match &message.sender_id {
            Some(MessageSender::MessageSenderUser { user_id }) => (user_id.to_string(), "user"),
            Some(MessageSender::MessageSenderChat { chat_id }) => (chat_id.to_string(), "chat"),
            _ => (String::new(), "chat"),
        };
        let date = DateTime::from_timestamp(message.date, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        Some(Self {
            id: video.video.id,
            mime_type: video.mime_type.clone(),
            file_name: video.file_name.clone(),
            remote_id: video.video.remote.id.clone(),
            message_text: message.caption().to_string(),
            message_id: message.id,
            sender_id,
            sender_type: sender_type.to_string(),
            date,
        })
    }
}

// ============================================================================
// Lister
// ============================================================================

#[derive(Clone)]
pub struct Lister {
    page_size: i32,
    page_timeout: Duration,
    /// Paginated replies carry nothing that ties them to their request, so
    /// only one page query per session is in flight at a time.
    page_locks: KeyedLocks<SessionId>,
}

impl Lister {
    #[must_use]
    pub fn new(page_size: i32, page_timeout: Duration) -> Self {
        Self {
            page_size: page_size.max(1),
            page_timeout,
            page_locks: KeyedLocks::new(),
        }
    }

    /// Every chat in the main list, in list order.
    pub async fn chats(&self, session: &Session) -> Result<Vec<ChatSummary>, ListingError> {
        let mut offset_order = i64::MAX;
        let mut offset_chat_id = 0;
        let mut seen = HashSet::new();
        let mut chats = Vec::new();

        loop {
            let command = Command::GetChats {
                offset_order: offset_order.to_string(),
                offset_chat_id,
                limit: self.page_size,
            };
            let page = self
                .page(session, CorrelationKey::Chats, command, |event| match event {
                    Event::ChatList(list) => Some(list.chat_ids.clone()),
                    _ => None,
                })
                .await?;

            let fresh: Vec<i64> = page.into_iter().filter(|id| seen.insert(*id)).collect();
            if fresh.is_empty() {
                break;
            }

            let mut last_order = None;
            for chat_id in fresh {
                let chat = self.chat(session, chat_id).await?;
                last_order = chat.order;
                offset_chat_id = chat.id;
                chats.push(ChatSummary::from(chat));
            }

            match last_order {
                Some(order) => offset_order = order,
                // Without an order there is no way to ask for the next page.
                None => break,
            }
        }

        debug!(session_id = %session.id(), count = chats.len(), "Listed chats");
        Ok(chats)
    }

    async fn chat(&self, session: &Session, chat_id: i64) -> Result<Chat, ListingError> {
        self.request(
            session,
            CorrelationKey::ChatDetail(chat_id),
            Command::GetChat { chat_id },
            |event| match event {
                Event::Chat(chat) | Event::ChatInfo(chat) if chat.id == chat_id => {
                    Some(chat.clone())
                }
                _ => None,
            },
        )
        .await
    }

    /// Every video message in `chat_id`, newest first.
    pub async fn chat_videos(
        &self,
        session: &Session,
        chat_id: i64,
    ) -> Result<Vec<VideoDescriptor>, ListingError> {
        let mut from_message_id = 0;
        let mut seen = HashSet::new();
        let mut videos = Vec::new();

        loop {
            let command = Command::GetChatHistory {
                chat_id,
                from_message_id,
                offset: 0,
                limit: self.page_size,
                only_local: false,
            };
            let messages = self
                .page(session, CorrelationKey::ChatHistory(chat_id), command, |event| {
                    match event {
                        Event::Messages(page)
                            if page.messages.iter().all(|m| m.chat_id == chat_id) =>
                        {
                            Some(page.messages.clone())
                        }
                        _ => None,
                    }
                })
                .await?;

            // Pages start at `from_message_id` inclusive, so the boundary
            // message shows up twice.
            let fresh: Vec<Message> = messages
                .into_iter()
                .filter(|m| seen.insert(m.id))
                .collect();
            let Some(oldest) = fresh.last().map(|m| m.id) else {
                break;
            };
            videos.extend(fresh.iter().filter_map(VideoDescriptor::from_message));
            from_message_id = oldest;
        }

        debug!(session_id = %session.id(), chat_id, count = videos.len(), "Listed chat videos");
        Ok(videos)
    }

    /// The logged-in user.
    pub async fn me(&self, session: &Session) -> Result<User, ListingError> {
        self.request(session, CorrelationKey::Profile, Command::GetMe, |event| {
            match event {
                Event::User(user) => Some(user.clone()),
                _ => None,
            }
        })
        .await
    }

    /// One page query, serialized with every other page query of the session.
    async fn page<T, F>(
        &self,
        session: &Session,
        key: CorrelationKey,
        command: Command,
        predicate: F,
    ) -> Result<T, ListingError>
    where
        F: FnMut(&Event) -> Option<T>,
    {
        let id = session.id();
        let lock = self.page_locks.get(&id);
        let result = {
            let _guard = lock.lock().await;
            self.request(session, key, command, predicate).await
        };
        drop(lock);
        self.page_locks.release(&id);
        result
    }

    async fn request<T, F>(
        &self,
        session: &Session,
        key: CorrelationKey,
        command: Command,
        predicate: F,
    ) -> Result<T, ListingError>
    where
        F: FnMut(&Event) -> Option<T>,
    {
        let mut cursor = Cursor::anchor(session, key);
        session.send(command).await?;
        let found = cursor
            .wait_for(Timeout::After(self.page_timeout), predicate)
            .await?;
        Ok(found)
    }
}

// ============================================================================
// Tests
// ============================================================================
