//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 텍스트를 뽑고 폼피드(\x0c) 기준으로 페이지를 나눈 뒤
//! `--- Page N ---` 마커를 붙여 하나의 텍스트로 합칩니다.

use crate::error::{RagError, Result};

/// PDF 바이트에서 페이지별 텍스트 추출
///
/// 텍스트가 없는 PDF(스캔본 등)는 `Extraction` 에러입니다.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Extraction(format!("failed to extract PDF text: {}", e)))?;

    if text.trim().is_empty() {
        return Err(RagError::Extraction(
            "no text layer found in PDF (it might be a scanned document)".into(),
        ));
    }

    Ok(split_pages(&text))
}

/// 폼피드로 페이지 분리
///
/// 빈 페이지도 페이지 번호를 유지하기 위해 남겨 둡니다.
/// 문서 끝의 폼피드가 만드는 마지막 빈 조각만 제거합니다.
fn split_pages(text: &str) -> Vec<String> {
    let mut pages: Vec<String> = text.split('\x0c').map(|s| s.trim().to_string()).collect();

    while pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }

    pages
}

/// 페이지를 `--- Page N ---` 마커로 연결
pub fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("--- Page {} ---\n{}", i + 1, page))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages_with_formfeed() {
        let pages = split_pages("Page 1 content\x0cPage 2 content\x0c\x0cPage 4 content\x0c");
        assert_eq!(pages.len(), 4);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[2], "");
        assert_eq!(pages[3], "Page 4 content");
    }

    #[test]
    fn test_split_pages_no_separator() {
        let pages = split_pages("Just some text without page breaks");
        assert_eq!(pages, vec!["Just some text without page breaks".to_string()]);
    }

    #[test]
    fn test_join_pages_adds_markers() {
        let joined = join_pages(&["Intro.".to_string(), "Section 1.".to_string()]);
        assert_eq!(joined, "--- Page 1 ---\nIntro.\n\n--- Page 2 ---\nSection 1.");
    }

    #[test]
    fn test_invalid_pdf_is_extraction_error() {
        assert!(matches!(
            extract_pages(b"definitely not a pdf"),
            Err(RagError::Extraction(_))
        ));
    }
}
