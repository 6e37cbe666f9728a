//! # ClipSlot
//!
//! Route clipboard content between the local clipboard, encrypted named
//! slots in local or object storage, and peer machines reached over ssh.
//!
//! Content can pass through a chain of transforms on the way, a watch loop
//! keeps the clipboard in sync with one peer, and mutating operations are
//! recorded in a bounded history file.

pub mod cli;
pub mod clipboard;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod fx;
pub mod history;
pub mod slots;
pub mod transport;
pub mod watch;

pub use config::Config;

/// Result type alias for ClipSlot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ClipSlot operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Key derivation or authenticated decryption failed
    #[error("Encryption error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    /// Slot storage error
    #[error("Slot error: {0}")]
    Slot(#[from] slots::SlotError),

    /// Remote peer error
    #[error("Peer error: {0}")]
    Peer(#[from] transport::PeerError),

    /// Transform chain aborted
    #[error("Transform error: {0}")]
    Transform(#[from] fx::TransformError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// History file error
    #[error("History error: {0}")]
    History(#[from] history::HistoryError),

    /// Watch loop stopped on a fatal error
    #[error("Watch error: {0}")]
    Watch(#[from] watch::WatchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
