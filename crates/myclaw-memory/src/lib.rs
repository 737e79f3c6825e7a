//! Tiered memory engine: SQLite store, classic/enhanced retrieval,
//! extraction and compression services, legacy migrator (§2 component 3,
//! §4 components 4-5, §4.4-§4.7).

pub mod compression;
pub mod embedder;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod manager;
pub mod migrator;
pub mod retrieval;
pub mod schema;
pub mod types;
pub mod vector;

pub use compression::CompressionService;
pub use embedder::{Embedder, HttpEmbedder, HttpReranker, LlmQueryExpander, QueryExpander, Reranker};
pub use error::{MemoryError, Result};
pub use extraction::{ExtractionConfig, ExtractionService};
pub use llm::{CompressionLlm, ExtractionLlm, HttpMemoryLlm, ProfileLlm};
pub use manager::{MemoryEngine, MemoryStats};
pub use retrieval::{Mode as RetrievalMode, RetrievalConfig, RetrievalEngine};
pub use types::*;
