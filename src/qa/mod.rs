//! 문서 질의응답 진입점
//!
//! 저장소, 벡터 테이블, 검색기, 생성기, 수집 파이프라인을 하나로 묶습니다.
//! 호출자 입장의 진입점은 두 개입니다.
//! - `ingest(document_id, text)` → 최종 상태
//! - `answer(document_id, query, mode | all)` → 답변 레코드

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::RagConfig;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{RagError, Result};
use crate::generation::{
    create_generator, AnswerMode, AnswerRecord, ComparisonResult, DocumentSummary, Generator,
    SUMMARY_QUERY,
};
use crate::ingest::{IngestEvent, IngestJob, IngestPipeline, IngestQueue};
use crate::knowledge::{
    sentence_chunker, ChunkConfig, Chunker, Document, DocumentStatus, DocumentStatusLookup,
    DocumentStore, InMemoryVectorStore, NewDocument, Registration, RetrievalParams,
    RetrievalResult, Retriever, SharedVectorStore, StoreStats,
};

const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Request / Response
// ============================================================================

/// 답변 요청 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerRequest {
    Single(AnswerMode),
    /// 세 모드 비교
    All,
}

impl FromStr for AnswerRequest {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Single)
        }
    }
}

impl fmt::Display for AnswerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(mode) => mode.fmt(f),
            Self::All => f.write_str("all"),
        }
    }
}

/// 답변 결과
#[derive(Debug)]
pub enum AnswerOutput {
    Single(AnswerRecord),
    Comparison(ComparisonResult),
}

/// 질의 응답
#[derive(Debug)]
pub struct QaResponse {
    pub document_id: i64,
    pub query: String,
    /// 컨텍스트로 공급된 청크 id (오름차순)
    pub retrieved: Vec<usize>,
    /// 토큰 예산으로 빠진 청크 id
    pub dropped: Vec<usize>,
    pub output: AnswerOutput,
}

// ============================================================================
// DocQa
// ============================================================================

/// 문서 질의응답 시스템
pub struct DocQa {
    config: RagConfig,
    store: DocumentStore,
    vectors: SharedVectorStore,
    retriever: Retriever,
    generator: Generator,
    pipeline: IngestPipeline,
    events: broadcast::Sender<IngestEvent>,
    /// 이 인스턴스가 띄운 큐들의 대기 + 처리 중 작업 수
    queue_size: Arc<AtomicUsize>,
}

impl DocQa {
    /// 구성 요소로 생성
    ///
    /// 리스가 `stale_processing_secs` 넘게 갱신되지 않은 processing 문서는
    /// 종료된 프로세스가 남긴 것으로 보고 failed 로 복구합니다.
    pub fn new(
        config: RagConfig,
        store: DocumentStore,
        embedder: Embedder,
        generator: Generator,
    ) -> Result<Self> {
        config.validate()?;
        store.recover_interrupted(config.stale_processing_after())?;

        let vectors = InMemoryVectorStore::shared();
        let status: Arc<dyn DocumentStatusLookup> = Arc::new(store.clone());
        let retriever = Retriever::new(embedder.clone(), vectors.clone(), status);

        let chunker: Arc<dyn Chunker> = Arc::from(sentence_chunker(ChunkConfig::from(&config)));
        let pipeline = IngestPipeline::new(store.clone(), vectors.clone(), embedder, chunker);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            store,
            vectors,
            retriever,
            generator,
            pipeline,
            events,
            queue_size: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// 기본 데이터 디렉토리 + Gemini 프로바이더로 생성
    pub fn from_config(config: RagConfig) -> Result<Self> {
        let store = DocumentStore::open_default()?;
        let embedder = create_embedder(&config)?;
        let generator = create_generator(&config)?;
        Self::new(config, store, embedder, generator)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// 수집 진행 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Registration & Ingestion
    // ------------------------------------------------------------------------

    /// 평문 문서 등록 (같은 내용이면 기존 문서)
    pub fn register_text(&self, name: &str, text: &str) -> Result<Registration> {
        self.store
            .register(&NewDocument::from_bytes(name, text.as_bytes()))
    }

    /// 파일 문서 등록 (페이지 수는 수집 시 기록)
    pub fn register_file(&self, path: &Path) -> Result<Registration> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.store
            .register(&NewDocument::from_bytes(name, &bytes).with_path(path))
    }

    /// 문서 수집 (호출자 입장에서 동기)
    ///
    /// 이미 completed 면 다시 임베딩하지 않습니다. failed 문서는 다시 처리합니다.
    pub async fn ingest(&self, document_id: i64, text: &str) -> Result<DocumentStatus> {
        self.run_job(IngestJob::text(document_id, text)).await
    }

    /// 파일 문서 수집 (호출자 입장에서 동기)
    pub async fn ingest_file(&self, document_id: i64, path: &Path) -> Result<DocumentStatus> {
        self.run_job(IngestJob::file(document_id, path)).await
    }

    async fn run_job(&self, job: IngestJob) -> Result<DocumentStatus> {
        let document_id = job.document_id;
        let status = self
            .store
            .document_status(document_id)?
            .ok_or(RagError::DocumentNotFound(document_id))?;

        match status {
            DocumentStatus::Completed => {
                tracing::info!("Document {} already processed", document_id);
                return Ok(DocumentStatus::Completed);
            }
            DocumentStatus::Processing => {
                return Err(RagError::DocumentNotReady {
                    document_id,
                    status,
                })
            }
            DocumentStatus::Failed => {
                self.store
                    .transition(document_id, DocumentStatus::Pending, None)?;
            }
            DocumentStatus::Pending => {}
        }

        self.pipeline.run(&job, &self.events).await?;
        Ok(DocumentStatus::Completed)
    }

    /// 백그라운드 수집 큐 시작 (진행 이벤트는 `subscribe`로 받음)
    pub fn start_queue(&self) -> IngestQueue {
        IngestQueue::start_shared(
            self.pipeline.clone(),
            self.events.clone(),
            self.queue_size.clone(),
        )
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 설정의 파라미터로 검색
    pub async fn retrieve(&self, document_id: i64, query: &str) -> Result<RetrievalResult> {
        self.retrieve_with(document_id, query, &RetrievalParams::from(&self.config))
            .await
    }

    async fn retrieve_with(
        &self,
        document_id: i64,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<RetrievalResult> {
        self.ensure_loaded(document_id)?;
        self.retriever.retrieve(query, document_id, params).await
    }

    /// 질문에 답변
    ///
    /// `All`은 검색을 한 번만 하고 세 모드를 동시에 생성합니다.
    /// non_rag 단독 요청은 검색하지 않습니다.
    pub async fn answer(
        &self,
        document_id: i64,
        query: &str,
        request: AnswerRequest,
    ) -> Result<QaResponse> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let retrieval = match request {
            AnswerRequest::Single(AnswerMode::NonRag) => {
                if self.store.document_status(document_id)?.is_none() {
                    return Err(RagError::DocumentNotFound(document_id));
                }
                RetrievalResult::empty(document_id)
            }
            _ => self.retrieve(document_id, query).await?,
        };

        let output = match request {
            AnswerRequest::Single(mode) => {
                AnswerOutput::Single(self.generator.generate(query, mode, &retrieval).await?)
            }
            AnswerRequest::All => {
                AnswerOutput::Comparison(self.generator.generate_all(query, &retrieval).await)
            }
        };

        Ok(QaResponse {
            document_id,
            query: query.to_string(),
            retrieved: retrieval.chunk_ids(),
            dropped: retrieval.dropped,
            output,
        })
    }

    /// 문서 요약 (이웃 확장 없이 요약용 top-k)
    pub async fn summarize(&self, document_id: i64) -> Result<DocumentSummary> {
        let params = RetrievalParams {
            top_k: self.config.summary.top_k,
            neighbor_window: 0,
            token_budget: self.config.token_budget,
        };
        let retrieval = self.retrieve_with(document_id, SUMMARY_QUERY, &params).await?;
        self.generator.summarize(&retrieval).await
    }

    /// 이전 프로세스가 처리한 문서를 벡터 테이블로 로드
    fn ensure_loaded(&self, document_id: i64) -> Result<()> {
        let Some(doc) = self.store.get_document(document_id)? else {
            return Ok(());
        };
        if doc.status != DocumentStatus::Completed || doc.total_chunks == 0 {
            return Ok(());
        }

        let loaded = self
            .vectors
            .read()
            .map_err(|_| RagError::LockPoisoned)?
            .chunk_count(document_id);
        if loaded > 0 {
            return Ok(());
        }

        let records = self.store.load_chunks(document_id)?;
        let count = records.len();
        self.vectors
            .write()
            .map_err(|_| RagError::LockPoisoned)?
            .replace_document(document_id, records)?;

        tracing::info!("Loaded {} chunks of document {} from store", count, document_id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Management
    // ------------------------------------------------------------------------

    pub fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        self.store.get_document(document_id)
    }

    pub fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        self.store.list_documents(status)
    }

    /// 문서 삭제 (저장소 + 벡터 테이블)
    pub fn delete_document(&self, document_id: i64) -> Result<bool> {
        let deleted = self.store.delete_document(document_id)?;
        self.vectors
            .write()
            .map_err(|_| RagError::LockPoisoned)?
            .remove_document(document_id);
        Ok(deleted)
    }

    /// 저장소 통계 + 수집 큐 크기
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = self.store.stats()?;
        stats.queue_size = self.queue_size.load(Ordering::SeqCst);
        Ok(stats)
    }
}

// ============================================================================
// Tests
// ============================================================================
