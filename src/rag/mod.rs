//! Retrieval pipeline over terminated meetings
//!
//! A finished meeting's snapshot is chunked, embedded in one batch and
//! persisted; questions embed the same way and retrieve the closest
//! chunks to ground an LLM answer.

pub mod chunker;
pub mod indexer;
pub mod query;

pub use chunker::{chunk_transcript, TranscriptChunk};
pub use indexer::index_snapshot;
pub use query::{answer_question, QueryAnswer, QueryRequest};
