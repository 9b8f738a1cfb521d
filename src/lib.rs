//! Babelroom - Real-time Multilingual Meeting Hub
//!
//! Participants join a named room from separate devices, stream microphone
//! audio, and receive captions translated into each participant's
//! preferred language. When a meeting ends, its transcripts become
//! persistent snapshots, a retrieval index and generated minutes, and can
//! be queried through a question-answering endpoint.
//!
//! # Example
//!
//! ```ignore
//! use babelroom::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     babelroom::server::start(config).await
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod lifecycle;
pub mod rag;
pub mod room;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Config;
pub use room::{Room, RoomManager, TranscriptStore};
pub use services::Services;
pub use store::MeetingStore;
pub use types::{BroadcastMessage, MeetingMode, ServerEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
