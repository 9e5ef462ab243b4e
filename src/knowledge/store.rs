//! Document Store - rusqlite 기반 문서/청크 저장소
//!
//! 업로드된 문서의 메타데이터와 상태, 임베딩된 청크를 저장합니다.
//! 저장 위치: ~/.docqa/documents.db
//!
//! 문서는 SHA-256 내용 해시로 중복 제거되며, 상태는
//! pending → processing → completed | failed 순으로만 전이됩니다.
//!
//! processing 문서는 그 작업을 시작한 저장소 인스턴스가 리스(lease)로 소유합니다.
//! 리스가 오래 갱신되지 않은 문서만 다른 인스턴스가 failed 로 회수할 수 있습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::get_data_dir;
use crate::error::{RagError, Result};

use super::vector::ChunkRecord;

/// DB 파일 이름
pub const DB_FILE_NAME: &str = "documents.db";

/// 회수된 문서에 기록하는 에러 메시지
pub const INTERRUPTED_MESSAGE: &str = "processing was interrupted";

const DOCUMENT_COLUMNS: &str = "id, filename, file_hash, original_path, file_size, num_pages, \
     total_chunks, status, created_at, processed_at, error_message";

// ============================================================================
// DocumentStatus
// ============================================================================

/// 문서 처리 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Pending,
        DocumentStatus::Processing,
        DocumentStatus::Completed,
        DocumentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// 허용된 상태 전이인지 여부
    ///
    /// failed → pending 은 실패한 업로드의 재등록입니다.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(RagError::Configuration(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

impl ToSql for DocumentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DocumentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: RagError| FromSqlError::Other(Box::new(e)))
    }
}

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    /// SHA-256 내용 해시 (hex)
    pub file_hash: String,
    pub original_path: Option<String>,
    pub file_size: u64,
    pub num_pages: Option<u32>,
    pub total_chunks: usize,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// 새 문서 등록용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub file_hash: String,
    pub original_path: Option<String>,
    pub file_size: u64,
    pub num_pages: Option<u32>,
}

impl NewDocument {
    /// 원본 바이트로부터 해시/크기를 채워 생성
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            file_hash: content_hash(bytes),
            original_path: None,
            file_size: bytes.len() as u64,
            num_pages: None,
        }
    }

    pub fn with_path(mut self, path: &Path) -> Self {
        self.original_path = Some(path.display().to_string());
        self
    }

    pub fn with_pages(mut self, pages: u32) -> Self {
        self.num_pages = Some(pages);
        self
    }
}

/// 등록 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub document_id: i64,
    /// 새로 생성되었는지 (false면 같은 해시의 기존 문서)
    pub created: bool,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub by_status: BTreeMap<String, usize>,
    pub total_chunks: usize,
    pub total_tokens: usize,
    /// 완료된 문서의 평균 처리 시간 (분)
    pub avg_processing_minutes: Option<f64>,
    /// 백그라운드 큐의 대기 + 처리 중 작업 수 (큐를 가진 쪽이 채움)
    pub queue_size: usize,
    pub db_path: PathBuf,
}

/// 문서 상태 조회 (Retriever가 사용)
pub trait DocumentStatusLookup: Send + Sync {
    /// 문서가 없으면 None
    fn document_status(&self, document_id: i64) -> Result<Option<DocumentStatus>>;
}

// ============================================================================
// DocumentStore
// ============================================================================

/// Document Store - 동기 문서 저장소
#[derive(Clone)]
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    /// processing 리스 소유자 식별자 (clone 끼리 공유)
    instance_id: Arc<str>,
}

impl DocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            instance_id: Uuid::new_v4().to_string().into(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.docqa/documents.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join(DB_FILE_NAME))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RagError::LockPoisoned)
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                file_hash TEXT NOT NULL UNIQUE,
                original_path TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                num_pages INTEGER,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                processed_at TEXT,
                error_message TEXT,
                lease_owner TEXT,
                lease_at TEXT
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                start_sentence INTEGER NOT NULL,
                end_sentence INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                UNIQUE(document_id, chunk_id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            "#,
        )?;

        // 리스 컬럼이 없던 이전 스키마 마이그레이션
        let columns: Vec<String> = conn
            .prepare("SELECT name FROM pragma_table_info('documents')")?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        for column in ["lease_owner", "lease_at"] {
            if !columns.iter().any(|c| c == column) {
                conn.execute(&format!("ALTER TABLE documents ADD COLUMN {} TEXT", column), [])?;
            }
        }

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서 등록 (같은 해시가 있으면 기존 id 반환)
    pub fn register(&self, doc: &NewDocument) -> Result<Registration> {
        let conn = self.lock()?;
        let now = now_timestamp();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO documents
             (filename, file_hash, original_path, file_size, num_pages, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc.filename,
                doc.file_hash,
                doc.original_path,
                doc.file_size as i64,
                doc.num_pages,
                DocumentStatus::Pending,
                now
            ],
        )?;

        if inserted == 0 {
            let id: i64 = conn.query_row(
                "SELECT id FROM documents WHERE file_hash = ?1",
                params![doc.file_hash],
                |row| row.get(0),
            )?;
            tracing::debug!("Document {} already registered (id={})", doc.filename, id);
            return Ok(Registration {
                document_id: id,
                created: false,
            });
        }

        let id = conn.last_insert_rowid();
        tracing::info!("Registered document: {} (id={})", doc.filename, id);

        Ok(Registration {
            document_id: id,
            created: true,
        })
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
        let doc = conn
            .query_row(&sql, params![id], row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// 해시로 문서 조회
    pub fn get_by_hash(&self, file_hash: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE file_hash = ?1", DOCUMENT_COLUMNS);
        let doc = conn
            .query_row(&sql, params![file_hash], row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// 문서 목록 조회 (최신순)
    pub fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let conn = self.lock()?;

        let docs = if let Some(status) = status {
            let sql = format!(
                "SELECT {} FROM documents WHERE status = ?1 ORDER BY created_at DESC, id DESC",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![status], row_to_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let sql = format!(
                "SELECT {} FROM documents ORDER BY created_at DESC, id DESC",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(docs)
    }

    /// 상태 전이
    ///
    /// 허용되지 않은 전이는 `InvalidStatusTransition`.
    /// processing 으로 전이하면 이 인스턴스가 리스를 잡고, processing 에서 나가는
    /// 전이는 리스 소유자만 할 수 있습니다 (아니면 `LeaseLost`).
    /// completed 로 전이하면 processed_at 을 기록합니다.
    pub fn transition(
        &self,
        id: i64,
        to: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;

        let (from, lease_owner): (DocumentStatus, Option<String>) = conn
            .query_row(
                "SELECT status, lease_owner FROM documents WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(RagError::DocumentNotFound(id))?;

        if !from.can_transition_to(to) {
            return Err(RagError::InvalidStatusTransition {
                document_id: id,
                from,
                to,
            });
        }
        if from == DocumentStatus::Processing
            && lease_owner.is_some_and(|owner| owner.as_str() != &*self.instance_id)
        {
            return Err(RagError::LeaseLost(id));
        }

        match to {
            DocumentStatus::Processing => conn.execute(
                "UPDATE documents SET status = ?1, error_message = NULL, lease_owner = ?2, lease_at = ?3
                 WHERE id = ?4",
                params![to, &*self.instance_id, now_timestamp(), id],
            )?,
            DocumentStatus::Completed => conn.execute(
                "UPDATE documents SET status = ?1, processed_at = ?2, error_message = NULL,
                 lease_owner = NULL, lease_at = NULL
                 WHERE id = ?3",
                params![to, now_timestamp(), id],
            )?,
            _ => conn.execute(
                "UPDATE documents SET status = ?1, error_message = ?2, lease_owner = NULL, lease_at = NULL
                 WHERE id = ?3",
                params![to, error_message, id],
            )?,
        };

        tracing::debug!("Document {} status: {} -> {}", id, from, to);
        Ok(())
    }

    /// processing 리스 갱신
    ///
    /// 이 인스턴스가 더 이상 소유하지 않으면 (회수되었거나 다른 인스턴스가 처리 중) `LeaseLost`.
    pub fn renew_lease(&self, id: i64) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE documents SET lease_at = ?1
             WHERE id = ?2 AND status = ?3 AND lease_owner = ?4",
            params![now_timestamp(), id, DocumentStatus::Processing, &*self.instance_id],
        )?;
        if rows == 0 {
            return Err(RagError::LeaseLost(id));
        }
        Ok(())
    }

    /// 이 인스턴스가 문서의 processing 리스를 갖고 있는지
    pub fn holds_lease(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let owner: Option<Option<String>> = conn
            .query_row(
                "SELECT lease_owner FROM documents WHERE id = ?1 AND status = ?2",
                params![id, DocumentStatus::Processing],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner.flatten().as_deref() == Some(&*self.instance_id))
    }

    /// PDF 추출 후 페이지 수 기록
    pub fn set_page_count(&self, id: i64, num_pages: u32) -> Result<()> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE documents SET num_pages = ?1 WHERE id = ?2",
            params![num_pages, id],
        )?;
        if rows == 0 {
            return Err(RagError::DocumentNotFound(id));
        }
        Ok(())
    }

    /// 처리 중에 종료된 인스턴스가 남긴 문서를 failed 로 표시
    ///
    /// 리스가 `stale_after` 보다 오래 갱신되지 않은 processing 문서만 회수합니다.
    /// 살아 있는 다른 인스턴스가 처리 중인 문서는 건드리지 않습니다.
    pub fn recover_interrupted(&self, stale_after: Duration) -> Result<usize> {
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| RagError::Configuration(format!("invalid lease timeout: {}", e)))?;
        let cutoff = (Utc::now() - stale_after).to_rfc3339_opts(SecondsFormat::Millis, true);

        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE documents SET status = ?1, error_message = ?2, lease_owner = NULL, lease_at = NULL
             WHERE status = ?3 AND (lease_at IS NULL OR lease_at < ?4)",
            params![
                DocumentStatus::Failed,
                INTERRUPTED_MESSAGE,
                DocumentStatus::Processing,
                cutoff
            ],
        )?;
        if rows > 0 {
            tracing::warn!("Marked {} interrupted documents as failed", rows);
        }
        Ok(rows)
    }

    /// 문서와 청크 삭제
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id])?;
        let rows = tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        tx.commit()?;

        if rows > 0 {
            tracing::info!("Deleted document {}", id);
        }
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------------

    /// 문서의 청크 일괄 저장 (하나의 트랜잭션)
    ///
    /// 기존 청크와 키가 겹치면 `DuplicateChunk`로 전체 롤백됩니다.
    pub fn insert_chunks(&self, document_id: i64, records: &[ChunkRecord]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                 (document_id, chunk_id, text, token_count, start_sentence, end_sentence, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for record in records {
                stmt.execute(params![
                    document_id,
                    record.chunk_id as i64,
                    record.text,
                    record.token_count as i64,
                    record.start_sentence as i64,
                    record.end_sentence as i64,
                    encode_embedding(&record.embedding),
                ])
                .map_err(|e| match e.sqlite_error_code() {
                    Some(ErrorCode::ConstraintViolation) => RagError::DuplicateChunk {
                        document_id,
                        chunk_id: record.chunk_id,
                    },
                    _ => RagError::Storage(e),
                })?;
            }
        }

        tx.execute(
            "UPDATE documents
             SET total_chunks = (SELECT COUNT(*) FROM chunks WHERE document_id = ?1)
             WHERE id = ?1",
            params![document_id],
        )?;
        tx.commit()?;

        tracing::debug!("Stored {} chunks for document {}", records.len(), document_id);
        Ok(())
    }

    /// 문서의 청크 삭제 (재처리 전 정리용)
    pub fn clear_chunks(&self, document_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;
        conn.execute(
            "UPDATE documents SET total_chunks = 0 WHERE id = ?1",
            params![document_id],
        )?;
        Ok(rows)
    }

    /// 문서의 청크 로드 (chunk_id 순)
    pub fn load_chunks(&self, document_id: i64) -> Result<Vec<ChunkRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chunk_id, text, token_count, start_sentence, end_sentence, embedding
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_id",
        )?;

        let rows = stmt.query_map(params![document_id], |row| {
            Ok(ChunkRecord {
                document_id,
                chunk_id: row.get::<_, i64>(0)? as usize,
                text: row.get(1)?,
                token_count: row.get::<_, i64>(2)? as usize,
                start_sentence: row.get::<_, i64>(3)? as usize,
                end_sentence: row.get::<_, i64>(4)? as usize,
                embedding: decode_embedding(&row.get::<_, Vec<u8>>(5)?),
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let mut by_status: BTreeMap<String, usize> = DocumentStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            by_status.insert(status, count as usize);
        }

        let (total_chunks, total_tokens): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(token_count), 0) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let avg_processing_minutes: Option<f64> = conn.query_row(
            "SELECT AVG((julianday(processed_at) - julianday(created_at)) * 24 * 60)
             FROM documents WHERE status = 'completed' AND processed_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            document_count: by_status.values().sum(),
            by_status,
            total_chunks: total_chunks as usize,
            total_tokens: total_tokens as usize,
            avg_processing_minutes: avg_processing_minutes.map(|m| (m * 100.0).round() / 100.0),
            queue_size: 0,
            db_path: self.db_path.clone(),
        })
    }
}

impl DocumentStatusLookup for DocumentStore {
    fn document_status(&self, document_id: i64) -> Result<Option<DocumentStatus>> {
        let conn = self.lock()?;
        let status = conn
            .query_row(
                "SELECT status FROM documents WHERE id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SHA-256 내용 해시 (hex)
pub fn content_hash(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        file_hash: row.get(2)?,
        original_path: row.get(3)?,
        file_size: row.get::<_, i64>(4)?.max(0) as u64,
        num_pages: row.get(5)?,
        total_chunks: row.get::<_, i64>(6)?.max(0) as usize,
        status: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        processed_at: row.get::<_, Option<String>>(9)?.map(|s| parse_datetime(&s)),
        error_message: row.get(10)?,
    })
}

/// 현재 시각 (SQLite julianday()가 읽을 수 있는 RFC3339)
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// f32 벡터 → little-endian BLOB
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// little-endian BLOB → f32 벡터
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = DocumentStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn record(document_id: i64, chunk_id: usize) -> ChunkRecord {
        ChunkRecord {
            document_id,
            chunk_id,
            text: format!("Chunk number {}.", chunk_id),
            token_count: 4,
            start_sentence: chunk_id,
            end_sentence: chunk_id,
            embedding: vec![0.25, -1.5, chunk_id as f32],
        }
    }

    fn backdate_lease(store: &DocumentStore, id: i64, minutes: i64) {
        let at = (Utc::now() - chrono::Duration::minutes(minutes))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        store
            .lock()
            .unwrap()
            .execute("UPDATE documents SET lease_at = ?1 WHERE id = ?2", params![at, id])
            .unwrap();
    }

    #[test]
    fn test_recover_interrupted_marks_failed() {
        let (_dir, store) = create_test_store();
        let stuck = store
            .register(&NewDocument::from_bytes("stuck.pdf", b"stuck"))
            .unwrap()
            .document_id;
        let waiting = store
            .register(&NewDocument::from_bytes("waiting.pdf", b"waiting"))
            .unwrap()
            .document_id;
        store.transition(stuck, DocumentStatus::Processing, None).unwrap();
        backdate_lease(&store, stuck, 30);

        assert_eq!(
            store.recover_interrupted(Duration::from_secs(10 * 60)).unwrap(),
            1
        );

        let doc = store.get_document(stuck).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.error_message.unwrap().contains("interrupted"));
        assert_eq!(
            store.document_status(waiting).unwrap(),
            Some(DocumentStatus::Pending)
        );
    }

    #[test]
    fn test_recover_skips_live_lease() {
        let (dir, owner) = create_test_store();
        let id = owner
            .register(&NewDocument::from_bytes("live.pdf", b"live"))
            .unwrap()
            .document_id;
        owner.transition(id, DocumentStatus::Processing, None).unwrap();

        // 같은 DB를 연 두 번째 인스턴스
        let other = DocumentStore::open(&dir.path().join("test.db")).unwrap();
        assert_eq!(other.recover_interrupted(Duration::from_secs(60)).unwrap(), 0);
        assert_eq!(
            other.document_status(id).unwrap(),
            Some(DocumentStatus::Processing)
        );
        assert!(owner.holds_lease(id).unwrap());
        assert!(!other.holds_lease(id).unwrap());

        // 소유자가 아니면 processing 에서 내보낼 수 없음
        assert!(matches!(
            other.transition(id, DocumentStatus::Failed, Some("nope")),
            Err(RagError::LeaseLost(_))
        ));
        assert!(matches!(other.renew_lease(id), Err(RagError::LeaseLost(_))));

        owner.renew_lease(id).unwrap();
        owner.transition(id, DocumentStatus::Completed, None).unwrap();
        assert!(!owner.holds_lease(id).unwrap());
    }

    #[test]
    fn test_recovered_document_lease_is_lost() {
        let (dir, owner) = create_test_store();
        let id = owner
            .register(&NewDocument::from_bytes("slow.pdf", b"slow"))
            .unwrap()
            .document_id;
        owner.transition(id, DocumentStatus::Processing, None).unwrap();
        backdate_lease(&owner, id, 30);

        let other = DocumentStore::open(&dir.path().join("test.db")).unwrap();
        assert_eq!(other.recover_interrupted(Duration::from_secs(60)).unwrap(), 1);

        assert!(!owner.holds_lease(id).unwrap());
        assert!(matches!(owner.renew_lease(id), Err(RagError::LeaseLost(_))));
        assert!(matches!(
            owner.transition(id, DocumentStatus::Completed, None),
            Err(RagError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn test_set_page_count() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.pdf", b"a"))
            .unwrap()
            .document_id;
        store.set_page_count(id, 12).unwrap();
        assert_eq!(store.get_document(id).unwrap().unwrap().num_pages, Some(12));
        assert!(matches!(
            store.set_page_count(999, 1),
            Err(RagError::DocumentNotFound(999))
        ));
    }

    #[test]
    fn test_register_and_get_document() {
        let (_dir, store) = create_test_store();

        let doc = NewDocument::from_bytes("report.pdf", b"%PDF-1.4 body").with_pages(3);
        let reg = store.register(&doc).unwrap();
        assert!(reg.created);

        let stored = store.get_document(reg.document_id).unwrap().unwrap();
        assert_eq!(stored.filename, "report.pdf");
        assert_eq!(stored.status, DocumentStatus::Pending);
        assert_eq!(stored.num_pages, Some(3));
        assert_eq!(stored.file_size, 13);
        assert_eq!(stored.file_hash.len(), 64);
        assert!(stored.processed_at.is_none());
    }

    #[test]
    fn test_register_deduplicates_by_hash() {
        let (_dir, store) = create_test_store();

        let first = store
            .register(&NewDocument::from_bytes("a.pdf", b"same bytes"))
            .unwrap();
        let second = store
            .register(&NewDocument::from_bytes("b.pdf", b"same bytes"))
            .unwrap();

        assert!(!second.created);
        assert_eq!(first.document_id, second.document_id);
        assert_eq!(store.list_documents(None).unwrap().len(), 1);

        let hash = content_hash(b"same bytes");
        assert_eq!(
            store.get_by_hash(&hash).unwrap().unwrap().id,
            first.document_id
        );
    }

    #[test]
    fn test_status_transitions() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;

        // pending -> completed 는 불가
        assert!(matches!(
            store.transition(id, DocumentStatus::Completed, None),
            Err(RagError::InvalidStatusTransition { .. })
        ));

        store.transition(id, DocumentStatus::Processing, None).unwrap();
        store.transition(id, DocumentStatus::Completed, None).unwrap();

        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(doc.processed_at.is_some());

        // 완료된 문서는 되돌릴 수 없음
        assert!(store.transition(id, DocumentStatus::Pending, None).is_err());
    }

    #[test]
    fn test_failed_records_message_and_can_requeue() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;

        store.transition(id, DocumentStatus::Processing, None).unwrap();
        store
            .transition(id, DocumentStatus::Failed, Some("embedding service down"))
            .unwrap();

        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.error_message.as_deref(), Some("embedding service down"));

        store.transition(id, DocumentStatus::Pending, None).unwrap();
        let doc = store.get_document(id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert!(doc.error_message.is_none());
    }

    #[test]
    fn test_transition_unknown_document() {
        let (_dir, store) = create_test_store();
        assert!(matches!(
            store.transition(42, DocumentStatus::Processing, None),
            Err(RagError::DocumentNotFound(42))
        ));
    }

    #[test]
    fn test_insert_and_load_chunks() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;

        let records: Vec<_> = (0..3).map(|i| record(id, i)).collect();
        store.insert_chunks(id, &records).unwrap();

        let loaded = store.load_chunks(id).unwrap();
        assert_eq!(loaded, records);
        assert_eq!(store.get_document(id).unwrap().unwrap().total_chunks, 3);
    }

    #[test]
    fn test_duplicate_chunk_rolls_back() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;

        store.insert_chunks(id, &[record(id, 0)]).unwrap();

        let err = store
            .insert_chunks(id, &[record(id, 1), record(id, 0)])
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::DuplicateChunk { chunk_id: 0, .. }
        ));
        assert_eq!(store.load_chunks(id).unwrap().len(), 1);
    }

    #[test]
    fn test_list_documents_by_status() {
        let (_dir, store) = create_test_store();
        for i in 0..4 {
            let id = store
                .register(&NewDocument::from_bytes(format!("{}.txt", i), format!("doc {}", i).as_bytes()))
                .unwrap()
                .document_id;
            if i % 2 == 0 {
                store.transition(id, DocumentStatus::Processing, None).unwrap();
            }
        }

        assert_eq!(store.list_documents(None).unwrap().len(), 4);
        assert_eq!(
            store
                .list_documents(Some(DocumentStatus::Processing))
                .unwrap()
                .len(),
            2
        );
        assert!(store
            .list_documents(Some(DocumentStatus::Failed))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_delete_document_removes_chunks() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;
        store.insert_chunks(id, &[record(id, 0), record(id, 1)]).unwrap();

        assert!(store.delete_document(id).unwrap());
        assert!(store.get_document(id).unwrap().is_none());
        assert!(store.load_chunks(id).unwrap().is_empty());
        assert!(!store.delete_document(id).unwrap());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;
        store.register(&NewDocument::from_bytes("b.txt", b"other")).unwrap();
        store.insert_chunks(id, &[record(id, 0), record(id, 1)]).unwrap();
        store.transition(id, DocumentStatus::Processing, None).unwrap();
        store.transition(id, DocumentStatus::Completed, None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.by_status["completed"], 1);
        assert_eq!(stats.by_status["pending"], 1);
        assert_eq!(stats.by_status["failed"], 0);
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_tokens, 8);
        assert!(stats.avg_processing_minutes.is_some());
    }

    #[test]
    fn test_status_lookup() {
        let (_dir, store) = create_test_store();
        let id = store
            .register(&NewDocument::from_bytes("a.txt", b"text"))
            .unwrap()
            .document_id;
        assert_eq!(
            store.document_status(id).unwrap(),
            Some(DocumentStatus::Pending)
        );
        assert_eq!(store.document_status(id + 100).unwrap(), None);
    }

    #[test]
    fn test_status_parse_and_display() {
        for status in DocumentStatus::ALL {
            assert_eq!(status.to_string().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("archived".parse::<DocumentStatus>().is_err());
    }
}
