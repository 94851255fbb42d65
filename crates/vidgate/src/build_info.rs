//! Build metadata reported by `/version` and `--version`.

/// Crate version from Cargo.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name from Cargo.
pub const NAME: &str = env!("CARGO_PKG_NAME");
