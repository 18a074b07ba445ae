use thiserror::Error;

pub mod api;
pub mod batch;
pub mod client;
pub mod config;
pub mod document;
pub mod events;
pub mod session;
pub mod sse;
pub mod store;
pub mod translate;

// Re-export for convenience
pub use api::{BatchRequest, SegmentRequest, SyncTranslation, TranslateApi};
pub use batch::{BatchOrchestrator, BatchOutcome, BatchSummary};
pub use client::{ClientError, SseClient};
pub use config::ConfigError;
pub use document::{Document, DocumentError, Segment, SegmentId, SentenceTranslation, Translation};
pub use events::{EventError, StreamEvent};
pub use session::Session;
pub use sse::{FrameParser, SseFrame};
pub use store::{BatchPhase, BatchProgress, StoreState, TranslationStore};
pub use translate::{SegmentOutcome, SegmentTranslator, TranslateEvent};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("translation service error: {0}")]
    Client(#[from] ClientError),
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration for the translation client.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL the endpoint paths are appended to.
    pub base_url: String,
    /// Sent as a bearer token on every request.
    pub api_token: Option<String>,
    pub sub_batch_size: usize,
    pub max_selection: usize,
    /// Per-sub-batch stream timeout; `None` waits forever.
    pub sub_batch_timeout_secs: Option<u64>,
    /// Batch runs retranslate segments that already have a translation.
    pub force: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            sub_batch_size: batch::SUB_BATCH_SIZE,
            max_selection: store::MAX_SELECTION,
            sub_batch_timeout_secs: None,
            force: false,
        }
    }
}
