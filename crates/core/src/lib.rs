pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generator;
pub mod history;
pub mod ingest;
pub mod models;
pub mod retriever;
pub mod session;
pub mod sparse;

pub use chunking::{chunk_text, chunk_with_config, normalize_whitespace, ChunkingConfig};
pub use embeddings::{
    probe_strategy, select_strategy, ChunkIndex, DenseStrategy, EmbeddingStrategy, SparseStrategy,
    StrategySelection, TextEncoder,
};
pub use error::{ChatError, IngestError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use generator::{build_prompt, generate_answer, GeminiGenerator, Generator};
pub use history::{
    new_conversation_id, ConversationTurn, HistoryStore, InMemoryHistoryStore, JsonlHistoryStore,
};
pub use ingest::{
    discover_pdf_files, document_from_pdf, document_from_text, ingest_folder_best_effort,
    load_pdf_file, load_pdfs_best_effort, IngestionReport, SkippedPdf,
};
pub use models::{
    Answer, ChatOptions, Chunk, Document, RetrievalResult, ScoredChunk, StrategyKind,
};
pub use retriever::Retriever;
pub use session::Session;
pub use uuid::Uuid;
