//! 문서 수집 모듈
//!
//! - IngestPipeline: 추출 → 청킹 → 임베딩 → 저장 → 벡터 테이블 공개
//! - IngestQueue: 질의 경로와 분리된 단일 백그라운드 워커
//!
//! 처리 중 실패한 문서는 항상 failed 로 표시되며 processing 에 남지 않습니다.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::collector::FileType;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::extractor;
use crate::knowledge::{
    ChunkRecord, Chunker, DocumentStatus, DocumentStatusLookup, DocumentStore, SharedVectorStore,
};

/// 진행 이벤트 채널 용량
const EVENT_CAPACITY: usize = 256;

// ============================================================================
// Jobs & Events
// ============================================================================

/// 수집 입력
#[derive(Debug, Clone)]
pub enum IngestSource {
    /// 이미 추출된 평문
    Text(String),
    /// 디스크의 PDF/텍스트 파일
    File(PathBuf),
}

/// 큐에 넣는 수집 작업
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub document_id: i64,
    pub source: IngestSource,
}

impl IngestJob {
    pub fn text(document_id: i64, text: impl Into<String>) -> Self {
        Self {
            document_id,
            source: IngestSource::Text(text.into()),
        }
    }

    pub fn file(document_id: i64, path: impl Into<PathBuf>) -> Self {
        Self {
            document_id,
            source: IngestSource::File(path.into()),
        }
    }
}

/// 수집 진행 이벤트
#[derive(Debug, Clone, Serialize)]
pub struct IngestEvent {
    pub document_id: i64,
    pub status: DocumentStatus,
    /// 0-100
    pub progress: u8,
    pub message: String,
}

/// 제출 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 큐에 들어감
    Queued,
    /// 이미 처리 완료된 문서
    AlreadyCompleted,
    /// 이미 큐에 있거나 처리 중
    AlreadyQueued,
}

// ============================================================================
// IngestPipeline
// ============================================================================

/// 한 문서를 끝까지 처리하는 파이프라인
#[derive(Clone)]
pub struct IngestPipeline {
    store: DocumentStore,
    vectors: SharedVectorStore,
    embedder: Embedder,
    chunker: Arc<dyn Chunker>,
}

impl IngestPipeline {
    pub fn new(
        store: DocumentStore,
        vectors: SharedVectorStore,
        embedder: Embedder,
        chunker: Arc<dyn Chunker>,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            chunker,
        }
    }

    /// 작업 실행 (pending 문서만)
    ///
    /// processing 전이 이후의 모든 실패(completed 전이 실패 포함)는 failed + 에러 메시지로
    /// 기록한 뒤 전파합니다. 어떤 경우에도 마지막 이벤트는 completed 또는 failed 입니다.
    /// 성공하면 생성된 청크 수를 반환합니다.
    pub async fn run(&self, job: &IngestJob, events: &broadcast::Sender<IngestEvent>) -> Result<usize> {
        let document_id = job.document_id;
        if let Err(e) = self
            .store
            .transition(document_id, DocumentStatus::Processing, None)
        {
            tracing::warn!("Document {} could not start: {}", document_id, e);
            publish(events, document_id, DocumentStatus::Failed, 100, e.to_string());
            return Err(e);
        }
        publish(events, document_id, DocumentStatus::Processing, 5, "processing started");

        let outcome = self.process(job, events).await.and_then(|count| {
            self.store
                .transition(document_id, DocumentStatus::Completed, None)
                .map(|_| count)
        });

        match outcome {
            Ok(count) => {
                publish(
                    events,
                    document_id,
                    DocumentStatus::Completed,
                    100,
                    format!("{} chunks indexed", count),
                );
                tracing::info!("Document {} processed: {} chunks", document_id, count);
                Ok(count)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Document {} failed: {}", document_id, message);
                self.fail(document_id, &message);
                publish(events, document_id, DocumentStatus::Failed, 100, message);
                Err(e)
            }
        }
    }

    async fn process(&self, job: &IngestJob, events: &broadcast::Sender<IngestEvent>) -> Result<usize> {
        let document_id = job.document_id;

        let text = match &job.source {
            IngestSource::Text(text) => text.clone(),
            IngestSource::File(path) => {
                let (_, extracted) = extractor::extract_file(path).await?;
                if let (FileType::Pdf, Some(pages)) = (extracted.source_type, extracted.num_pages) {
                    self.store.set_page_count(document_id, pages)?;
                }
                extracted.text
            }
        };
        publish(events, document_id, DocumentStatus::Processing, 20, "text ready");

        let chunks = self.chunker.chunk(&text)?;
        self.store.renew_lease(document_id)?;
        publish(
            events,
            document_id,
            DocumentStatus::Processing,
            40,
            format!("{} chunks created", chunks.len()),
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        publish(events, document_id, DocumentStatus::Processing, 80, "embeddings created");

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkRecord {
                document_id,
                chunk_id: chunk.chunk_id,
                text: chunk.text,
                token_count: chunk.token_count,
                start_sentence: chunk.start_sentence,
                end_sentence: chunk.end_sentence,
                embedding,
            })
            .collect();

        let count = records.len();
        // 회수된 문서에 청크를 쓰지 않도록 저장 직전 리스 확인
        self.store.renew_lease(document_id)?;
        // 재처리 대비: 이전 시도의 행을 지운 뒤 저장
        self.store.clear_chunks(document_id)?;
        self.store.insert_chunks(document_id, &records)?;
        self.vectors
            .write()
            .map_err(|_| RagError::LockPoisoned)?
            .replace_document(document_id, records)?;
        publish(events, document_id, DocumentStatus::Processing, 95, "chunks stored");

        Ok(count)
    }

    /// 실패한 문서의 부분 데이터 제거 + failed 기록
    ///
    /// 리스를 잃은 문서는 다른 인스턴스 소유이므로 DB 행은 건드리지 않습니다.
    fn fail(&self, document_id: i64, message: &str) {
        if let Ok(mut vectors) = self.vectors.write() {
            vectors.remove_document(document_id);
        }

        match self.store.holds_lease(document_id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Document {} is no longer owned, leaving its rows", document_id);
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to check lease of document {}: {}", document_id, e);
                return;
            }
        }

        if let Err(e) = self.store.clear_chunks(document_id) {
            tracing::warn!("Failed to clear chunks of document {}: {}", document_id, e);
        }
        if let Err(e) = self
            .store
            .transition(document_id, DocumentStatus::Failed, Some(message))
        {
            tracing::warn!("Failed to mark document {} as failed: {}", document_id, e);
        }
    }
}

fn publish(
    events: &broadcast::Sender<IngestEvent>,
    document_id: i64,
    status: DocumentStatus,
    progress: u8,
    message: impl Into<String>,
) {
    // 구독자가 없으면 버림
    let _ = events.send(IngestEvent {
        document_id,
        status,
        progress,
        message: message.into(),
    });
}

// ============================================================================
// IngestQueue
// ============================================================================

/// 백그라운드 수집 큐
///
/// 워커 하나가 작업을 순서대로 처리합니다. 같은 문서는 동시에 두 번 처리되지 않습니다.
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<IngestJob>,
    events: broadcast::Sender<IngestEvent>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    queue_size: Arc<AtomicUsize>,
    store: DocumentStore,
    worker: JoinHandle<()>,
}

impl IngestQueue {
    /// 워커를 띄우고 큐 생성 (tokio 런타임 안에서 호출)
    pub fn start(pipeline: IngestPipeline) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::start_shared(pipeline, events, Arc::new(AtomicUsize::new(0)))
    }

    /// 이벤트 채널과 작업 수 카운터를 호출자와 공유하는 큐 생성
    pub fn start_shared(
        pipeline: IngestPipeline,
        events: broadcast::Sender<IngestEvent>,
        queue_size: Arc<AtomicUsize>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let store = pipeline.store.clone();

        let worker = IngestWorker {
            rx,
            pipeline,
            events: events.clone(),
            in_flight: in_flight.clone(),
            queue_size: queue_size.clone(),
        };
        let worker = tokio::spawn(worker.run());

        Self {
            tx,
            events,
            in_flight,
            queue_size,
            store,
            worker,
        }
    }

    /// 작업 제출
    ///
    /// completed 문서는 건너뛰고, failed 문서는 pending 으로 되돌려 다시 큐에 넣습니다.
    pub fn submit(&self, job: IngestJob) -> Result<SubmitOutcome> {
        let document_id = job.document_id;
        let status = self
            .store
            .document_status(document_id)?
            .ok_or(RagError::DocumentNotFound(document_id))?;

        let mut in_flight = self.in_flight.lock().map_err(|_| RagError::LockPoisoned)?;
        if in_flight.contains(&document_id) {
            return Ok(SubmitOutcome::AlreadyQueued);
        }

        match status {
            DocumentStatus::Completed => return Ok(SubmitOutcome::AlreadyCompleted),
            DocumentStatus::Processing => return Ok(SubmitOutcome::AlreadyQueued),
            DocumentStatus::Failed => {
                self.store
                    .transition(document_id, DocumentStatus::Pending, None)?;
                tracing::info!("Re-queueing failed document {}", document_id);
            }
            DocumentStatus::Pending => {}
        }

        self.tx.send(job).map_err(|_| RagError::QueueClosed)?;
        in_flight.insert(document_id);
        self.queue_size.fetch_add(1, Ordering::SeqCst);

        publish(&self.events, document_id, DocumentStatus::Pending, 0, "queued");
        tracing::info!("Queued document {}", document_id);
        Ok(SubmitOutcome::Queued)
    }

    /// 진행 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    /// 대기 + 처리 중인 작업 수
    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::SeqCst)
    }

    pub fn is_queued(&self, document_id: i64) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&document_id))
            .unwrap_or(false)
    }

    /// 새 작업을 막고 남은 작업을 모두 처리한 뒤 종료
    pub async fn shutdown(self) -> Result<()> {
        drop(self.tx);
        self.worker
            .await
            .map_err(|e| RagError::Configuration(format!("ingest worker panicked: {}", e)))
    }
}

/// 큐 워커
struct IngestWorker {
    rx: mpsc::UnboundedReceiver<IngestJob>,
    pipeline: IngestPipeline,
    events: broadcast::Sender<IngestEvent>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    queue_size: Arc<AtomicUsize>,
}

impl IngestWorker {
    async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            let document_id = job.document_id;

            // 에러는 파이프라인이 문서 상태와 이벤트로 이미 기록함
            if let Err(e) = self.pipeline.run(&job, &self.events).await {
                tracing::debug!("Ingest job for document {} ended with: {}", document_id, e);
            }

            if let Ok(mut set) = self.in_flight.lock() {
                set.remove(&document_id);
            }
            self.queue_size.fetch_sub(1, Ordering::SeqCst);
        }

        tracing::debug!("Ingest worker stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
