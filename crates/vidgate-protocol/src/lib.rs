//! Wire types exchanged between vidgate and a protocol-client bridge.
//!
//! The bridge wraps the real messaging client and talks to vidgate with
//! JSON Lines (newline-delimited JSON) over stdio:
//!
//! - **Commands** (vidgate → bridge): one `@type`-tagged object per line on stdin
//! - **Events** (bridge → vidgate): one `@type`-tagged object per line on stdout
//!
//! Events carry no request identifiers. vidgate correlates them to requests by
//! content, so [`Event::parse`] never fails: anything it cannot model becomes
//! [`Event::Other`] or [`Event::Malformed`].
//!
//! # Example: echoing the authorization state
//!
//! ```ignore
//! use vidgate_protocol::{Command, Event};
//!
//! let command: Command = serde_json::from_str(&line_from_stdin)?;
//! if command == Command::GetAuthorizationState {
//!     println!(r#"{{"@type":"authorizationStateReady"}}"#);
//! }
//! ```

mod command;
mod event;

pub use command::{
    Command, DOWNLOAD_PRIORITY_HIGH, InputFile, InputMessageContent, TdlibParameters,
};
pub use event::{
    AuthorizationState, ByteWindow, Chat, ChatList, Event, File, FileStatus, FormattedText,
    LocalFile, Message, MessageContent, MessagePage, MessageSender, MessageSendingState,
    RemoteFile, UpstreamError, User, Video,
};
