//! Events emitted by the bridge, and their normalized forms.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Event
// ============================================================================

/// A single event read from the bridge.
///
/// Parsing is total: well-formed but unmodelled payloads become
/// [`Event::Other`], unparseable ones [`Event::Malformed`]. Both still occupy
/// a slot in the session's event log.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AuthorizationState(AuthorizationState),
    /// One page of chat ids (`chats`).
    ChatList(ChatList),
    /// Chat detail, the reply to `getChat`.
    Chat(Chat),
    /// Chat announced by the client (`updateNewChat`).
    ChatInfo(Chat),
    /// One page of chat history (`messages`).
    Messages(MessagePage),
    /// A message created locally or received (`message`, `updateNewMessage`).
    NewMessage(Message),
    /// A pending outgoing message got its server-side identifier.
    MessageSendSucceeded {
        message: Message,
        old_message_id: i64,
    },
    /// Both `file` and `updateFile {file}` normalize to this.
    FileStatus(FileStatus),
    User(User),
    Error(UpstreamError),
    Other {
        kind: String,
    },
    Malformed {
        reason: String,
    },
}

impl Event {
    /// Parse one JSON line from the bridge.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(e) => Self::Malformed {
                reason: format!("invalid JSON: {e}"),
            },
        }
    }

    /// Classify an already-decoded JSON object.
    pub fn from_value(value: Value) -> Self {
        let Some(kind) = type_tag(&value).map(str::to_owned) else {
            return Self::Malformed {
                reason: "missing @type discriminator".to_string(),
            };
        };

        match Self::decode(&kind, value) {
            Ok(event) => event,
            Err(e) => Self::Malformed {
                reason: format!("{kind}: {e}"),
            },
        }
    }

    fn decode(kind: &str, value: Value) -> Result<Self, serde_json::Error> {
        let event = match kind {
            "updateAuthorizationState" => {
                let state = value
                    .get("authorization_state")
                    .and_then(type_tag)
                    .ok_or_else(|| missing("authorization_state"))?;
                Self::AuthorizationState(AuthorizationState::new(state))
            }
            k if k.starts_with("authorizationState") => {
                Self::AuthorizationState(AuthorizationState::new(k))
            }
            "chats" => Self::ChatList(decode(value)?),
            "chat" => Self::Chat(decode::<RawChat>(value)?.into()),
            "updateNewChat" => Self::ChatInfo(decode::<ChatEnvelope>(value)?.chat.into()),
            "messages" => Self::Messages(decode::<RawMessagePage>(value)?.into()),
            "message" => Self::NewMessage(decode(value)?),
            "updateNewMessage" => Self::NewMessage(decode::<MessageEnvelope>(value)?.message),
            "updateMessageSendSucceeded" => {
                let update: SendSucceeded = decode(value)?;
                Self::MessageSendSucceeded {
                    message: update.message,
                    old_message_id: update.old_message_id,
                }
            }
            "file" => Self::FileStatus(decode::<File>(value)?.into()),
            "updateFile" => Self::FileStatus(decode::<FileEnvelope>(value)?.file.into()),
            "user" => Self::User(decode::<RawUser>(value)?.into()),
            "updateUser" => Self::User(decode::<UserEnvelope>(value)?.user.into()),
            "error" => Self::Error(decode(value)?),
            other => Self::Other {
                kind: other.to_string(),
            },
        };
        Ok(event)
    }

    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::AuthorizationState(_) => "authorization_state",
            Self::ChatList(_) => "chat_list",
            Self::Chat(_) => "chat",
            Self::ChatInfo(_) => "chat_info",
            Self::Messages(_) => "messages",
            Self::NewMessage(_) => "new_message",
            Self::MessageSendSucceeded { .. } => "message_send_succeeded",
            Self::FileStatus(_) => "file_status",
            Self::User(_) => "user",
            Self::Error(_) => "error",
            Self::Other { kind } => kind,
            Self::Malformed { .. } => "malformed",
        }
    }

    /// True when the client reports that it has shut down for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::AuthorizationState(state) if state.is_closed())
    }
}

fn type_tag(value: &Value) -> Option<&str> {
    value
        .get("@type")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

fn missing(field: &'static str) -> serde_json::Error {
    serde::de::Error::missing_field(field)
}

fn positive(value: i64) -> Option<u64> {
    u64::try_from(value).ok().filter(|v| *v > 0)
}

/// int64 values arrive as strings, int53 values as numbers.
fn int64(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

// ============================================================================
// Authorization
// ============================================================================

/// Current login state, e.g. `authorizationStateWaitCode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationState {
    pub state: String,
}

impl AuthorizationState {
    pub const READY: &'static str = "authorizationStateReady";
    pub const CLOSED: &'static str = "authorizationStateClosed";

    #[must_use]
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == Self::READY
    }

    pub fn is_closed(&self) -> bool {
        self.state == Self::CLOSED
    }
}

/// Upstream error reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Files
// ============================================================================

/// A remote file as reported on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct File {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub expected_size: i64,
    #[serde(default)]
    pub local: LocalFile,
    #[serde(default)]
    pub remote: RemoteFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LocalFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub is_downloading_active: bool,
    #[serde(default)]
    pub is_downloading_completed: bool,
    #[serde(default)]
    pub download_offset: i64,
    #[serde(default)]
    pub downloaded_prefix_size: i64,
    #[serde(default)]
    pub downloaded_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub is_uploading_active: bool,
    #[serde(default)]
    pub is_uploading_completed: bool,
}

#[derive(Deserialize)]
struct FileEnvelope {
    file: File,
}

/// Inclusive byte window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow {
    pub start: u64,
    pub end: u64,
}

impl ByteWindow {
    pub fn contains(&self, start: u64, end: u64) -> bool {
        start >= self.start && end <= self.end
    }
}

/// Download/upload progress of one file, independent of wire shape.
///
/// Offsets are absolute positions in the local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub file_id: i32,
    pub local_path: Option<String>,
    /// Exact size if known, otherwise the expected size. `None` when neither
    /// is reported.
    pub size: Option<u64>,
    /// Contiguous bytes present locally.
    pub available: Option<ByteWindow>,
    pub downloading: bool,
    pub download_complete: bool,
    pub upload_complete: bool,
}

impl FileStatus {
    /// True when `[start, end]` is fully present on disk.
    pub fn covers(&self, start: u64, end: u64) -> bool {
        self.available.is_some_and(|w| w.contains(start, end))
    }
}

impl From<File> for FileStatus {
    fn from(file: File) -> Self {
        let size = positive(file.size).or_else(|| positive(file.expected_size));
        let local = file.local;

        let available = if local.is_downloading_completed {
            size.map(|s| ByteWindow { start: 0, end: s - 1 })
        } else {
            let offset = positive(local.download_offset).unwrap_or(0);
            positive(local.downloaded_prefix_size)
                .or_else(|| positive(local.downloaded_size))
                .map(|len| ByteWindow {
                    start: offset,
                    end: offset + len - 1,
                })
        };

        Self {
            file_id: file.id,
            local_path: Some(local.path).filter(|p| !p.is_empty()),
            size,
            available,
            downloading: local.is_downloading_active,
            download_complete: local.is_downloading_completed,
            upload_complete: file.remote.is_uploading_completed,
        }
    }
}

// ============================================================================
// Chats
// ============================================================================

/// One page of chat identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatList {
    #[serde(default)]
    pub total_count: i32,
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

/// Chat detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    /// The chat type's `@type`, e.g. `chatTypePrivate`.
    pub kind: String,
    /// Position in the main list, used as the next `getChats` offset.
    pub order: Option<i64>,
}

#[derive(Deserialize)]
struct RawChat {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    chat_type: Value,
    #[serde(default)]
    positions: Vec<Value>,
    #[serde(default)]
    order: Value,
}

impl From<RawChat> for Chat {
    fn from(raw: RawChat) -> Self {
        let order = raw
            .positions
            .iter()
            .find_map(|p| p.get("order").and_then(int64))
            .or_else(|| int64(&raw.order));
        Self {
            id: raw.id,
            title: raw.title,
            kind: type_tag(&raw.chat_type).unwrap_or_default().to_string(),
            order,
        }
    }
}

#[derive(Deserialize)]
struct ChatEnvelope {
    chat: RawChat,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(default)]
    pub chat_id: i64,
    /// Unix timestamp.
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub sender_id: Option<MessageSender>,
    /// Set while an outgoing message has no server-side identifier yet.
    #[serde(default)]
    pub sending_state: Option<MessageSendingState>,
    #[serde(default)]
    pub content: MessageContent,
}

impl Message {
    pub fn video(&self) -> Option<&Video> {
        match &self.content {
            MessageContent::MessageVideo { video, .. } => Some(video),
            MessageContent::Other => None,
        }
    }

    pub fn caption(&self) -> &str {
        match &self.content {
            MessageContent::MessageVideo { caption, .. } => &caption.text,
            MessageContent::Other => "",
        }
    }

    /// True for an outgoing message whose `id` is still a temporary one.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.sending_state,
            Some(MessageSendingState::MessageSendingStatePending)
        )
    }

    /// Local path of the attached video file, if any.
    pub fn video_local_path(&self) -> Option<&str> {
        self.video()
            .map(|v| v.video.local.path.as_str())
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageSender {
    MessageSenderUser {
        user_id: i64,
    },
    MessageSenderChat {
        chat_id: i64,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageSendingState {
    MessageSendingStatePending,
    MessageSendingStateFailed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageContent {
    MessageVideo {
        video: Video,
        #[serde(default)]
        caption: FormattedText,
    },
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FormattedText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub video: File,
}

/// One page of chat history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub total_count: i32,
    pub messages: Vec<Message>,
}

#[derive(Deserialize)]
struct RawMessagePage {
    #[serde(default)]
    total_count: i32,
    #[serde(default)]
    messages: Vec<Option<Message>>,
}

impl From<RawMessagePage> for MessagePage {
    fn from(raw: RawMessagePage) -> Self {
        Self {
            total_count: raw.total_count,
            messages: raw.messages.into_iter().flatten().collect(),
        }
    }
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: Message,
}

#[derive(Deserialize)]
struct SendSucceeded {
    message: Message,
    #[serde(default)]
    old_message_id: i64,
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub phone_number: String,
}

#[derive(Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    usernames: Option<Usernames>,
    #[serde(default)]
    phone_number: String,
}

#[derive(Deserialize)]
struct Usernames {
    #[serde(default)]
    active_usernames: Vec<String>,
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        let username = raw
            .usernames
            .and_then(|u| u.active_usernames.into_iter().next())
            .or(raw.username)
            .filter(|u| !u.is_empty());
        Self {
            id: raw.id,
            first_name: raw.first_name,
            last_name: raw.last_name,
            username,
            phone_number: raw.phone_number,
        }
    }
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: RawUser,
}

// ============================================================================
// Tests
// ============================================================================
