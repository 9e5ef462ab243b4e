//! CLI 모듈
//!
//! docqa CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{CollectedFile, CollectionStats, CollectorConfig, FileCollector, FileType};
use crate::config::{get_data_dir, RagConfig};
use crate::embedding::has_api_key;
use crate::generation::{AnswerMode, AnswerRecord};
use crate::ingest::{IngestJob, SubmitOutcome};
use crate::knowledge::{DocumentStatus, DocumentStore};
use crate::qa::{AnswerOutput, AnswerRequest, DocQa};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docqa")]
#[command(version, about = "PDF 문서 질의응답 - RAG / Non-RAG / Hybrid 비교", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일, 폴더, 또는 텍스트를 문서로 등록하고 처리
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 텍스트 문서 이름
        #[arg(short, long, default_value = "direct-input.txt")]
        name: String,

        /// 수집할 파일 경로 (PDF, txt, md)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 텍스트 파일 건너뛰기
        #[arg(long)]
        pdf_only: bool,
    },

    /// 문서에 질문
    Ask {
        /// 질문
        query: String,

        /// 문서 ID
        #[arg(short, long)]
        doc: i64,

        /// 답변 모드 (rag, non-rag, hybrid, all)
        #[arg(short, long, default_value = "all")]
        mode: String,
    },

    /// 문서 요약
    Summary {
        /// 문서 ID
        #[arg(short, long)]
        doc: i64,
    },

    /// 등록된 문서 목록
    List {
        /// 상태 필터 (pending, processing, completed, failed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: i64,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            text,
            name,
            file,
            dir,
            pdf_only,
        } => cmd_ingest(text, name, file, dir, pdf_only).await,
        Commands::Ask { query, doc, mode } => cmd_ask(&query, doc, &mode).await,
        Commands::Summary { doc } => cmd_summary(doc).await,
        Commands::List { status } => cmd_list(status),
        Commands::Delete { id } => cmd_delete(id),
        Commands::Status => cmd_status(),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

fn open_qa() -> Result<DocQa> {
    let config = RagConfig::load_default().context("설정 로드 실패")?;
    DocQa::from_config(config).context("DocQa 초기화 실패")
}

/// 문서 수집 명령어 (ingest)
///
/// 텍스트는 바로 처리하고, 파일/폴더는 백그라운드 큐로 처리하며 진행 상황을 출력합니다.
async fn cmd_ingest(
    text: Option<String>,
    name: String,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    pdf_only: bool,
) -> Result<()> {
    require_api_key()?;

    if file.is_some() || dir.is_some() {
        return cmd_ingest_files(file, dir, pdf_only).await;
    }

    let Some(text) = text else {
        bail!("--text, --file, --dir 중 하나를 지정해야 합니다");
    };

    let qa = open_qa()?;
    let registration = qa.register_text(&name, &text).context("문서 등록 실패")?;
    if !registration.created {
        println!("[*] 같은 내용의 문서가 이미 있습니다 (ID: {})", registration.document_id);
    }

    println!("[*] 청킹 및 임베딩 생성 중...");
    let status = qa
        .ingest(registration.document_id, &text)
        .await
        .context("문서 처리 실패")?;

    println!("[OK] 문서 #{} {}", registration.document_id, status);
    Ok(())
}

/// 파일/폴더 수집 명령어
async fn cmd_ingest_files(
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    pdf_only: bool,
) -> Result<()> {
    let collector = FileCollector::new(CollectorConfig {
        pdf_only,
        ..Default::default()
    });

    let files: Vec<CollectedFile> = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] 지원하지 않는 파일 형식: {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 수집 대상: {} 파일", stats.total_files);
    println!("    PDF: {}, 텍스트: {}", stats.pdf_files, stats.text_files);
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!();

    let qa = open_qa()?;
    let mut events = qa.subscribe();
    let queue = qa.start_queue();

    let mut queued = 0;
    for collected in &files {
        let type_str = match collected.file_type {
            FileType::Text => "TXT",
            FileType::Pdf => "PDF",
        };

        let registration = match qa.register_file(&collected.path) {
            Ok(r) => r,
            Err(e) => {
                println!("[!] [{}] {} 등록 실패: {}", type_str, collected.file_name(), e);
                continue;
            }
        };

        match queue.submit(IngestJob::file(registration.document_id, &collected.path))? {
            SubmitOutcome::Queued => {
                println!(
                    "[*] [{}] {} → 문서 #{} 대기열 추가",
                    type_str,
                    collected.file_name(),
                    registration.document_id
                );
                queued += 1;
            }
            SubmitOutcome::AlreadyCompleted => println!(
                "[-] [{}] {} → 이미 처리된 문서 #{}",
                type_str,
                collected.file_name(),
                registration.document_id
            ),
            SubmitOutcome::AlreadyQueued => {}
        }
    }

    // 진행 이벤트 출력 (완료/실패가 queued 개수만큼 오거나 큐가 빌 때까지)
    let mut success_count = 0;
    let mut error_count = 0;
    while success_count + error_count < queued {
        let received = match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(received) => received,
            Err(_) => {
                if queue.queue_size() == 0 {
                    tracing::warn!("수집 큐가 비었지만 완료 이벤트 일부를 받지 못함");
                    break;
                }
                tracing::debug!("남은 작업: {}", queue.queue_size());
                continue;
            }
        };

        match received {
            Ok(event) => match event.status {
                DocumentStatus::Completed => {
                    success_count += 1;
                    println!("[OK] 문서 #{}: {}", event.document_id, event.message);
                }
                DocumentStatus::Failed => {
                    error_count += 1;
                    println!("[!] 문서 #{} 실패: {}", event.document_id, event.message);
                }
                DocumentStatus::Processing => {
                    tracing::debug!(
                        "문서 #{} {}% {}",
                        event.document_id,
                        event.progress,
                        event.message
                    );
                }
                DocumentStatus::Pending => {}
            },
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("{} 개 진행 이벤트 누락", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    queue.shutdown().await.context("수집 큐 종료 실패")?;

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);
    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(query: &str, doc: i64, mode: &str) -> Result<()> {
    require_api_key()?;
    let request: AnswerRequest = mode.parse()?;

    println!("[*] 문서 #{}에 질문 중 ({}): \"{}\"", doc, request, query);

    let qa = open_qa()?;
    let response = qa.answer(doc, query, request).await.context("답변 생성 실패")?;

    println!(
        "[*] 검색된 청크: {:?}{}",
        response.retrieved,
        if response.dropped.is_empty() {
            String::new()
        } else {
            format!(" (토큰 예산으로 제외: {:?})", response.dropped)
        }
    );
    println!();

    match response.output {
        AnswerOutput::Single(record) => print_answer(&record),
        AnswerOutput::Comparison(result) => {
            for (mode, outcome) in result.iter() {
                match outcome {
                    Ok(record) => print_answer(record),
                    Err(e) => {
                        println!("=== {} ===", mode_label(mode));
                        println!("[!] 실패: {}", e);
                        println!();
                    }
                }
            }
        }
    }

    Ok(())
}

/// 요약 명령어 (summary)
async fn cmd_summary(doc: i64) -> Result<()> {
    require_api_key()?;
    println!("[*] 문서 #{} 요약 중...", doc);

    let qa = open_qa()?;
    let summary = qa.summarize(doc).await.context("요약 생성 실패")?;

    println!();
    println!("{}", summary.summary);
    println!();
    println!(
        "[*] 청크 {}개 | 인용 {:?} | {} | 토큰 {} / {}",
        summary.chunks_used,
        summary.citations,
        format_duration(summary.elapsed),
        summary.prompt_tokens,
        summary.completion_tokens
    );
    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(status: Option<String>) -> Result<()> {
    let status = status
        .as_deref()
        .map(str::parse::<DocumentStatus>)
        .transpose()?;
    let store = DocumentStore::open_default().context("DocumentStore 열기 실패")?;
    let docs = store
        .list_documents(status)
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 등록된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 등록된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!(
            "  #{:<4} [{}] {}",
            doc.id,
            doc.status,
            truncate_text(&doc.filename, 40)
        );
        println!(
            "        {} | {} | {} 페이지 | {} 청크",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            format_bytes(doc.file_size as usize),
            doc.num_pages
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            doc.total_chunks
        );
        if let Some(ref error) = doc.error_message {
            println!("        에러: {}", truncate_text(error, 80));
        }
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(id: i64) -> Result<()> {
    let store = DocumentStore::open_default().context("DocumentStore 열기 실패")?;

    if store.get_document(id).context("문서 조회 실패")?.is_none() {
        bail!("ID {}인 문서를 찾을 수 없습니다", id);
    }

    if store.delete_document(id).context("문서 삭제 실패")? {
        println!("[OK] 문서 #{} 삭제됨", id);
    } else {
        println!("[!] 삭제할 문서를 찾을 수 없습니다");
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status() -> Result<()> {
    println!("docqa v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match RagConfig::load_default() {
        Ok(config) => println!(
            "[OK] 모델: {} | 임베딩 {}차원 | top_k {} | 토큰 예산 {}",
            config.provider.chat_model,
            config.provider.embedding_dimension,
            config.top_k,
            config.token_budget
        ),
        Err(e) => println!("[!] 설정 오류: {}", e),
    }

    match DocumentStore::open_default().and_then(|store| store.stats()) {
        Ok(stats) => {
            println!("[OK] 등록된 문서: {} 건", stats.document_count);
            for (status, count) in &stats.by_status {
                println!("     {}: {}", status, count);
            }
            println!(
                "     총 청크: {} | 총 토큰: {}",
                stats.total_chunks, stats.total_tokens
            );
            if let Some(minutes) = stats.avg_processing_minutes {
                println!("     평균 처리 시간: {:.1}분", minutes);
            }
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn mode_label(mode: AnswerMode) -> &'static str {
    match mode {
        AnswerMode::Rag => "RAG (문서 기반)",
        AnswerMode::NonRag => "Non-RAG (일반 지식)",
        AnswerMode::Hybrid => "Hybrid (문서 + 일반 지식)",
    }
}

fn print_answer(record: &AnswerRecord) {
    println!("=== {} ===", mode_label(record.mode));
    println!("{}", record.answer);
    println!();
    println!(
        "[*] {} | 청크 {}개 | 인용 {:?} | 토큰 {} / {} | {}",
        format_duration(record.elapsed),
        record.chunks_used,
        record.citations,
        record.prompt_tokens,
        record.completion_tokens,
        record.model
    );
    println!();
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn format_duration(elapsed: Duration) -> String {
    format!("{:.2}초", elapsed.as_secs_f64())
}

// ============================================================================
// Tests
// ============================================================================
