//! docqa - PDF 문서 질의응답
//!
//! 문서를 문장 경계로 청킹하고 임베딩한 뒤, 질문마다
//! top-k + 이웃 윈도우 + 토큰 예산으로 청크를 골라 세 가지 모드로 답변합니다.
//! - rag: 문서 근거만 사용
//! - non_rag: 일반 지식만 사용
//! - hybrid: 문서 근거 + 일반 지식 보충

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod knowledge;
pub mod qa;
pub mod retry;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::{get_data_dir, RagConfig};
pub use embedding::{get_api_key, has_api_key, Embedder, EmbeddingProvider, GeminiEmbedding};
pub use error::{ProviderError, RagError, Result};
pub use generation::{
    AnswerMode, AnswerRecord, ComparisonResult, CompletionProvider, DocumentSummary,
    GeminiCompletion, Generator,
};
pub use ingest::{IngestEvent, IngestJob, IngestPipeline, IngestQueue, SubmitOutcome};
pub use knowledge::{
    Chunk, ChunkConfig, Chunker, Document, DocumentStatus, DocumentStore, InMemoryVectorStore,
    RetrievalParams, RetrievalResult, Retriever, VectorStore,
};
pub use qa::{AnswerOutput, AnswerRequest, DocQa, QaResponse};
