//! Knowledge 모듈 - 문서 청킹, 저장, 검색
//!
//! - Tokenizer: 결정적 로컬 토큰 카운터
//! - Chunker: 문단/문장 경계 청킹 (오버랩 포함)
//! - Vector: 문서별 인메모리 벡터 테이블 + 코사인 유사도
//! - Store: SQLite 문서 메타데이터/상태 + 청크 영속화
//! - Retriever: top-k + 이웃 윈도우 + 토큰 예산

mod chunker;
mod retriever;
mod store;
mod tokenizer;
mod vector;

// Re-exports
pub use chunker::{
    default_chunker, sentence_chunker, split_sentences, Chunk, ChunkConfig, Chunker, Sentence,
    SentenceChunker,
};
pub use retriever::{
    plan_retrieval, RetrievalParams, RetrievalPlan, RetrievalResult, RetrievedChunk, Retriever,
};
pub use store::{
    content_hash, Document, DocumentStatus, DocumentStatusLookup, DocumentStore, NewDocument,
    Registration, StoreStats, DB_FILE_NAME, INTERRUPTED_MESSAGE,
};
pub use tokenizer::count_tokens;
pub use vector::{cosine_similarity, ChunkRecord, InMemoryVectorStore, SharedVectorStore, VectorStore};
