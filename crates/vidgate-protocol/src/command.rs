//! Commands sent from vidgate to the bridge.

use serde::{Deserialize, Serialize};

/// Highest download priority accepted by the client (range 1..=32).
pub const DOWNLOAD_PRIORITY_HIGH: i32 = 32;

// ============================================================================
// Commands (vidgate → bridge)
// ============================================================================

/// Commands handed verbatim to the protocol client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Command {
    // ------------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------------
    GetAuthorizationState,

    SetTdlibParameters(Box<TdlibParameters>),

    SetAuthenticationPhoneNumber {
        phone_number: String,
    },

    CheckAuthenticationCode {
        code: String,
    },

    CheckAuthenticationPassword {
        password: String,
    },

    LogOut,

    /// Release the client instance. Sent after `LogOut` completes.
    Close,

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------
    GetMe,

    /// Page through the main chat list.
    ///
    /// `offset_order` is an int64 and travels as a decimal string.
    GetChats {
        offset_order: String,
        offset_chat_id: i64,
        limit: i32,
    },

    GetChat {
        chat_id: i64,
    },

    /// Page backwards through a chat's history starting at `from_message_id`
    /// (0 = newest).
    GetChatHistory {
        chat_id: i64,
        from_message_id: i64,
        offset: i32,
        limit: i32,
        only_local: bool,
    },

    // ------------------------------------------------------------------------
    // Files and messages
    // ------------------------------------------------------------------------
    /// Download `limit` bytes starting at `offset`.
    DownloadFile {
        file_id: i32,
        priority: i32,
        offset: u64,
        limit: u64,
        synchronous: bool,
    },

    SendMessage {
        chat_id: i64,
        input_message_content: InputMessageContent,
    },
}

impl Command {
    /// Asynchronous high-priority download of the inclusive byte range
    /// `[start, end]`.
    #[must_use]
    pub fn download_range(file_id: i32, start: u64, end: u64) -> Self {
        Self::DownloadFile {
            file_id,
            priority: DOWNLOAD_PRIORITY_HIGH,
            offset: start,
            limit: end.saturating_sub(start) + 1,
            synchronous: false,
        }
    }

    /// Post the local file at `path` to `chat_id` as a streamable video.
    #[must_use]
    pub fn send_video(chat_id: i64, path: impl Into<String>) -> Self {
        Self::SendMessage {
            chat_id,
            input_message_content: InputMessageContent::InputMessageVideo {
                video: InputFile::InputFileLocal { path: path.into() },
                duration: None,
                width: None,
                height: None,
                supports_streaming: true,
            },
        }
    }

    /// The `@type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GetAuthorizationState => "getAuthorizationState",
            Self::SetTdlibParameters(_) => "setTdlibParameters",
            Self::SetAuthenticationPhoneNumber { .. } => "setAuthenticationPhoneNumber",
            Self::CheckAuthenticationCode { .. } => "checkAuthenticationCode",
            Self::CheckAuthenticationPassword { .. } => "checkAuthenticationPassword",
            Self::LogOut => "logOut",
            Self::Close => "close",
            Self::GetMe => "getMe",
            Self::GetChats { .. } => "getChats",
            Self::GetChat { .. } => "getChat",
            Self::GetChatHistory { .. } => "getChatHistory",
            Self::DownloadFile { .. } => "downloadFile",
            Self::SendMessage { .. } => "sendMessage",
        }
    }
}

// ============================================================================
// Command Payloads
// ============================================================================

/// Content of an outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum InputMessageContent {
    InputMessageVideo {
        video: InputFile,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
        #[serde(default)]
        supports_streaming: bool,
    },
}

/// A file reference inside an outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum InputFile {
    InputFileLocal { path: String },
}

/// Client instance parameters sent once per session during login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdlibParameters {
    #[serde(default)]
    pub use_test_dc: bool,
    pub database_directory: String,
    pub files_directory: String,
    #[serde(default)]
    pub database_encryption_key: String,
    pub use_file_database: bool,
    pub use_chat_info_database: bool,
    pub use_message_database: bool,
    pub use_secret_chats: bool,
    pub api_id: i32,
    pub api_hash: String,
    pub system_language_code: String,
    pub device_model: String,
    pub system_version: String,
    pub application_version: String,
}

impl TdlibParameters {
    /// Parameters with vidgate's defaults and the given storage directories.
    #[must_use]
    pub fn new(
        api_id: i32,
        api_hash: impl Into<String>,
        database_directory: impl Into<String>,
        files_directory: impl Into<String>,
        application_version: impl Into<String>,
    ) -> Self {
        Self {
            use_test_dc: false,
            database_directory: database_directory.into(),
            files_directory: files_directory.into(),
            database_encryption_key: String::new(),
            use_file_database: true,
            use_chat_info_database: true,
            use_message_database: true,
            use_secret_chats: false,
            api_id,
            api_hash: api_hash.into(),
            system_language_code: "en".to_string(),
            device_model: "vidgate".to_string(),
            system_version: String::new(),
            application_version: application_version.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn download_range_serializes_offset_and_limit() {
        let command = Command::download_range(42, 1000, 1999);
        let value = serde_json::to_value(&command).unwrap();

        assert_eq!(
            value,
            json!({
                "@type": "downloadFile",
                "file_id": 42,
                "priority": 32,
                "offset": 1000,
                "limit": 1000,
                "synchronous": false
            })
        );
    }

    #[test]
    fn send_video_omits_unknown_dimensions() {
        let command = Command::send_video(-100123, "/srv/uploads/clip.mp4");
        let value = serde_json::to_value(&command).unwrap();

        assert_eq!(value["@type"], "sendMessage");
        assert_eq!(value["chat_id"], -100123);
        let content = &value["input_message_content"];
        assert_eq!(content["@type"], "inputMessageVideo");
        assert_eq!(content["video"]["@type"], "inputFileLocal");
        assert_eq!(content["video"]["path"], "/srv/uploads/clip.mp4");
        assert!(content.get("duration").is_none());
        assert!(content.get("width").is_none());
    }

    #[test]
    fn unit_commands_carry_only_type() {
        let value = serde_json::to_value(Command::LogOut).unwrap();
        assert_eq!(value, json!({"@type": "logOut"}));

        let value = serde_json::to_value(Command::GetAuthorizationState).unwrap();
        assert_eq!(value, json!({"@type": "getAuthorizationState"}));
    }

    #[test]
    fn tdlib_parameters_are_flattened_into_command() {
        let params = TdlibParameters::new(1, "hash", "/data/db", "/data/files", "0.3.0");
        let value = serde_json::to_value(Command::SetTdlibParameters(Box::new(params))).unwrap();

        assert_eq!(value["@type"], "setTdlibParameters");
        assert_eq!(value["api_id"], 1);
        assert_eq!(value["database_directory"], "/data/db");
        assert_eq!(value["use_message_database"], true);
    }

    #[test]
    fn get_chats_round_trips() {
        let command = Command::GetChats {
            offset_order: i64::MAX.to_string(),
            offset_chat_id: 0,
            limit: 100,
        };
        let line = serde_json::to_string(&command).unwrap();
        let parsed: Command = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, command);
        assert_eq!(parsed.kind(), "getChats");
    }
}
