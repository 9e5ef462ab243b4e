//! Text Chunking Module
//!
//! 문단 → 문장 경계를 따라 텍스트를 토큰 상한 이내의 청크로 분할합니다.
//! 연속된 청크는 이전 청크의 마지막 문장들을 오버랩으로 공유합니다.
//!
//! - 문장 중간에서 자르지 않음
//! - 청크 크기를 넘는 단일 문장은 잘라내지 않고 단독 청크로 만듦
//! - chunk_id는 0부터 빈틈 없이 증가 (이웃 조회가 인덱스 산술이 되도록)

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::RagConfig;
use crate::error::{RagError, Result};

use super::tokenizer::count_tokens;

static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("Invalid paragraph regex"));

// ============================================================================
// Types
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    /// 청크 최대 토큰 수
    pub chunk_size_tokens: usize,
    /// 오버랩 토큰 수
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size_tokens: 1000,
            overlap_tokens: 200,
        }
    }
}

impl From<&RagConfig> for ChunkConfig {
    fn from(config: &RagConfig) -> Self {
        Self {
            chunk_size_tokens: config.chunk_size,
            overlap_tokens: config.chunk_overlap,
        }
    }
}

/// 문서 내 문장 (원문 바이트 오프셋)
#[derive(Debug, Clone, PartialEq)]
pub struct Sentence {
    pub start: usize,
    pub end: usize,
    pub tokens: usize,
}

/// 문서 청크 (임베딩 전)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 문서 내 순번 (0-based)
    pub chunk_id: usize,
    pub text: String,
    pub token_count: usize,
    /// 첫 문장 인덱스
    pub start_sentence: usize,
    /// 마지막 문장 인덱스 (포함)
    pub end_sentence: usize,
    /// 원문 바이트 오프셋
    pub start_offset: usize,
    pub end_offset: usize,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// SentenceChunker
// ============================================================================

/// 문장 경계 청커
pub struct SentenceChunker {
    config: ChunkConfig,
}

impl SentenceChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 청크 끝 이후 다음 청크의 시작 문장 결정
    ///
    /// 이전 청크 끝에서 overlap_tokens 이내의 문장들을 되감되,
    /// 다음 청크가 반드시 새 문장(`end`)을 포함할 수 있는 만큼만 되감습니다.
    fn rewind_overlap(&self, sentences: &[Sentence], start: usize, end: usize) -> usize {
        let next_tokens = sentences[end].tokens;
        let mut next = end;
        let mut overlap = 0;

        while next > start + 1 {
            let tokens = sentences[next - 1].tokens;
            if overlap + tokens > self.config.overlap_tokens
                || overlap + tokens + next_tokens > self.config.chunk_size_tokens
            {
                break;
            }
            overlap += tokens;
            next -= 1;
        }

        next
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Err(RagError::EmptyDocument);
        }

        let limit = self.config.chunk_size_tokens.max(1);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < sentences.len() {
            // 1. 상한까지 문장 누적 (첫 문장은 크기와 무관하게 포함)
            let mut end = start;
            let mut tokens = 0;
            while end < sentences.len() {
                let t = sentences[end].tokens;
                if end > start && tokens + t > limit {
                    break;
                }
                tokens += t;
                end += 1;
            }

            // 2. 청크 생성 (원문 슬라이스)
            let start_offset = sentences[start].start;
            let end_offset = sentences[end - 1].end;
            let chunk_text = text[start_offset..end_offset].to_string();

            // 상한 비교에 쓴 문장 토큰 합
            chunks.push(Chunk {
                chunk_id: chunks.len(),
                token_count: tokens,
                text: chunk_text,
                start_sentence: start,
                end_sentence: end - 1,
                start_offset,
                end_offset,
            });

            if end >= sentences.len() {
                break;
            }

            // 3. 오버랩 되감기
            start = self.rewind_overlap(&sentences, start, end);
        }

        tracing::debug!(
            "Chunked {} sentences into {} chunks",
            sentences.len(),
            chunks.len()
        );

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "SentenceChunker"
    }
}

// ============================================================================
// Sentence Splitting
// ============================================================================

/// 텍스트를 문단 → 문장 순으로 분할
///
/// 문단 내부의 단일 줄바꿈은 공백으로 취급합니다 (PDF 줄바꿈 대응).
/// 공백만 있는 조각은 버립니다.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    // \r, \n -> ' ' 는 모두 1바이트이므로 오프셋이 그대로 유지됨
    let normalized = text.replace(['\r', '\n'], " ");
    let mut sentences = Vec::new();

    for (para_start, para_end) in paragraph_spans(text) {
        let paragraph = &normalized[para_start..para_end];
        let mut offset = para_start;

        for piece in paragraph.split_sentence_bounds() {
            let piece_start = offset;
            offset += piece.len();

            let leading = piece.len() - piece.trim_start().len();
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                continue;
            }

            let start = piece_start + leading;
            let end = start + trimmed.len();
            sentences.push(Sentence {
                start,
                end,
                tokens: count_tokens(trimmed).max(1),
            });
        }
    }

    sentences
}

/// 문단 (시작, 끝) 바이트 범위
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;

    for sep in PARAGRAPH_RE.find_iter(text) {
        if sep.start() > start {
            spans.push((start, sep.start()));
        }
        start = sep.end();
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }

    spans
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SentenceChunker::with_defaults())
}

/// 설정 지정 청커 생성
pub fn sentence_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(SentenceChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> SentenceChunker {
        SentenceChunker::new(ChunkConfig {
            chunk_size_tokens: size,
            overlap_tokens: overlap,
        })
    }

    fn sample_text() -> String {
        let mut text = String::new();
        for p in 0..4 {
            for s in 0..5 {
                text.push_str(&format!("Paragraph {} sentence {} has some words. ", p, s));
            }
            text.push_str("\n\n");
        }
        text
    }

    #[test]
    fn test_empty_document_is_error() {
        assert!(matches!(
            chunker(100, 10).chunk(""),
            Err(RagError::EmptyDocument)
        ));
        assert!(matches!(
            chunker(100, 10).chunk("  \n\n \t "),
            Err(RagError::EmptyDocument)
        ));
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunker(100, 10).chunk("One sentence. Two sentence.").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[0].text, "One sentence. Two sentence.");
        assert_eq!(chunks[0].start_sentence, 0);
        assert_eq!(chunks[0].end_sentence, 1);
    }

    #[test]
    fn test_split_sentences_paragraphs_and_line_breaks() {
        let text = "First line\ncontinues here. Second one!\n\nNew paragraph?";
        let sentences = split_sentences(text);
        let texts: Vec<&str> = sentences.iter().map(|s| &text[s.start..s.end]).collect();
        assert_eq!(
            texts,
            vec!["First line\ncontinues here.", "Second one!", "New paragraph?"]
        );
    }

    #[test]
    fn test_chunk_ids_are_dense() {
        let chunks = chunker(40, 16).chunk(&sample_text()).unwrap();
        assert!(chunks.len() > 2);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_id, i);
        }
    }

    #[test]
    fn test_chunks_respect_token_limit() {
        let chunks = chunker(40, 16).chunk(&sample_text()).unwrap();
        for chunk in &chunks {
            assert!(chunk.token_count <= 40, "chunk too big: {:?}", chunk);
            assert!(chunk.token_count >= 1);
        }
    }

    #[test]
    fn test_every_sentence_is_covered() {
        let text = sample_text();
        let sentences = split_sentences(&text);
        let chunks = chunker(40, 16).chunk(&text).unwrap();

        // 겹침을 제외하고 이어 붙이면 모든 문장이 순서대로 나와야 함
        let mut next_expected = 0;
        for chunk in &chunks {
            assert!(chunk.start_sentence <= next_expected);
            assert!(chunk.end_sentence + 1 >= next_expected);
            for idx in next_expected..=chunk.end_sentence {
                let s = &sentences[idx];
                assert!(chunk.text.contains(&text[s.start..s.end]));
            }
            next_expected = chunk.end_sentence + 1;
        }
        assert_eq!(next_expected, sentences.len());
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let chunks = chunker(40, 16).chunk(&sample_text()).unwrap();
        for pair in chunks.windows(2) {
            assert!(pair[1].start_sentence <= pair[0].end_sentence);
            assert!(pair[1].start_sentence > pair[0].start_sentence);
        }
    }

    #[test]
    fn test_no_overlap_when_disabled() {
        let chunks = chunker(40, 0).chunk(&sample_text()).unwrap();
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_sentence, pair[0].end_sentence + 1);
        }
    }

    #[test]
    fn test_oversized_sentence_becomes_own_chunk() {
        let long = format!("Lengthy {}.", "word ".repeat(50).trim());
        let text = format!("Short one. {} Another short.", long);
        let chunks = chunker(10, 2).chunk(&text).unwrap();

        let oversized = chunks
            .iter()
            .find(|c| c.text.contains("word word word"))
            .unwrap();
        assert_eq!(oversized.text, long);
        assert!(oversized.token_count > 10);
        assert!(chunks.last().unwrap().text.ends_with("Another short."));
    }

    #[test]
    fn test_chunk_text_matches_offsets() {
        let text = sample_text();
        let chunks = chunker(40, 8).chunk(&text).unwrap();
        for chunk in &chunks {
            assert_eq!(chunk.text, &text[chunk.start_offset..chunk.end_offset]);
        }
    }
}
