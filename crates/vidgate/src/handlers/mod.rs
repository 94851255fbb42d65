//! HTTP request handlers.

mod admin;
mod api_auth;
mod auth;
mod catalog;
mod chats;
mod error;
mod health;
mod params;
pub(crate) mod problem_details;
mod upload;
mod version;
mod video;

pub use admin::shutdown;
pub use auth::{auth, get_state, logout};
pub use catalog::{get_videos_data, set_video_data};
pub use chats::{get_chats, get_files, me};
pub use health::{livez, readyz};
pub use upload::upload_chunk;
pub use version::version;
pub use video::get_video;
