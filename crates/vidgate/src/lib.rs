pub mod account;
pub mod background;
pub mod build_info;
pub mod client;
pub mod config;
pub mod correlator;
pub mod handlers;
pub mod listing;
pub mod media;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;
