//! 콘텐츠 추출 모듈
//!
//! 업로드 파일에서 평문 텍스트를 추출합니다.
//! - 텍스트 파일: 직접 읽기
//! - PDF 파일: pdf-extract로 페이지별 추출 후 페이지 마커로 연결

pub mod pdf;

use std::path::Path;

use crate::collector::FileType;
use crate::error::{RagError, Result};

// ============================================================================
// Extracted Document
// ============================================================================

/// 추출된 문서
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// 청킹할 평문 텍스트
    pub text: String,
    /// 원본 파일 타입
    pub source_type: FileType,
    /// PDF 페이지 수
    pub num_pages: Option<u32>,
}

// ============================================================================
// Extraction
// ============================================================================

/// 파일 바이트에서 텍스트 추출
///
/// PDF 추출은 CPU 바운드이므로 blocking 스레드에서 실행합니다.
pub async fn extract_bytes(bytes: Vec<u8>, file_type: FileType) -> Result<ExtractedDocument> {
    match file_type {
        FileType::Text => {
            let text = String::from_utf8(bytes)
                .map_err(|e| RagError::Extraction(format!("text file is not UTF-8: {}", e)))?;
            Ok(ExtractedDocument {
                text,
                source_type: FileType::Text,
                num_pages: None,
            })
        }
        FileType::Pdf => {
            let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&bytes))
                .await
                .map_err(|e| RagError::Extraction(format!("PDF extraction task failed: {}", e)))??;

            Ok(ExtractedDocument {
                text: pdf::join_pages(&pages),
                source_type: FileType::Pdf,
                num_pages: Some(pages.len() as u32),
            })
        }
    }
}

/// 파일 경로에서 텍스트 추출
pub async fn extract_file(path: &Path) -> Result<(Vec<u8>, ExtractedDocument)> {
    let file_type = FileType::from_path(path).ok_or_else(|| {
        RagError::Extraction(format!("unsupported file type: {}", path.display()))
    })?;

    let bytes = tokio::fs::read(path).await?;
    let extracted = extract_bytes(bytes.clone(), file_type).await?;

    tracing::debug!(
        "Extracted {} chars from {:?} ({:?} pages)",
        extracted.text.len(),
        path,
        extracted.num_pages
    );

    Ok((bytes, extracted))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extract_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "Section 1. Scope.").unwrap();

        let (bytes, doc) = extract_file(&path).await.unwrap();
        assert_eq!(bytes, b"Section 1. Scope.");
        assert_eq!(doc.text, "Section 1. Scope.");
        assert_eq!(doc.source_type, FileType::Text);
        assert!(doc.num_pages.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, [0u8, 1, 2]).unwrap();

        assert!(matches!(
            extract_file(&path).await,
            Err(RagError::Extraction(_))
        ));
    }

    #[tokio::test]
    async fn test_non_utf8_text_is_rejected() {
        assert!(extract_bytes(vec![0xff, 0xfe, 0x00], FileType::Text)
            .await
            .is_err());
    }
}
