//! Embedded web UI channel: a WebSocket endpoint plus static-file serving
//! (§2 component 9, §4.2, §6).

pub mod channel;
pub mod error;
pub mod server;

pub use channel::WebuiChannel;
pub use error::WebuiError;

/// Absolute path to the `static/` directory bundled with this crate, for
/// callers that don't want to configure their own.
pub fn bundled_static_dir() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/static").to_string()
}
