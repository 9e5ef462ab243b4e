//! 모드별 프롬프트
//!
//! 컨텍스트 청크는 `[Chunk N]` 헤더로 구분하며, 모델은 같은 표기로 인용합니다.

use crate::knowledge::RetrievedChunk;

use super::AnswerMode;

/// 근거가 없을 때 rag/hybrid 모드의 고정 답변
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "The document does not contain enough information to answer this question.";

/// 요약 생성용 고정 쿼리
pub const SUMMARY_QUERY: &str =
    "What is this document about? What are the main topics and key provisions?";

const RAG_SYSTEM: &str = "You are an expert assistant for analyzing documents such as \
government publications and legislation. Answer the question using ONLY the document \
context provided.

Rules:
1. Use no information beyond the provided context.
2. Cite every factual claim with the chunk it comes from, written exactly as [Chunk N].
3. Cite only chunks that appear in the context.
4. If the context does not contain enough information, say so explicitly instead of guessing.
5. Be precise. For legislation, refer to specific provisions, sections and requirements.";

const NON_RAG_SYSTEM: &str = "You are an expert assistant on government policy and \
legislation. Answer the question from your general knowledge.

Rules:
1. You have not seen any document. Do not refer to one or invent its contents.
2. Do not produce citations or chunk references.
3. Say so honestly when you lack specific information.";

const HYBRID_SYSTEM: &str = "You are an expert assistant for analyzing documents such as \
government publications and legislation. You have document context AND general knowledge.

Rules:
1. Treat the document context as the primary source for specific facts.
2. Cite every statement taken from the document as [Chunk N], using only chunks from the context.
3. You may add general background when it helps the reader understand implications or related concepts.
4. Mark such background clearly, e.g. begin the sentence with \"(General knowledge)\". Never cite a chunk for it.";

const SUMMARY_SYSTEM: &str = "You are an expert at summarizing documents such as government \
publications and legislation. Write a concise summary covering the purpose, the main topics \
and the key provisions, based only on the excerpts provided.";

/// 모드별 시스템 프롬프트
pub fn system_prompt(mode: AnswerMode) -> &'static str {
    match mode {
        AnswerMode::Rag => RAG_SYSTEM,
        AnswerMode::NonRag => NON_RAG_SYSTEM,
        AnswerMode::Hybrid => HYBRID_SYSTEM,
    }
}

pub fn summary_system_prompt() -> &'static str {
    SUMMARY_SYSTEM
}

/// 청크 목록을 `[Chunk N]` 블록으로 직렬화
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("[Chunk {}]\n{}", c.chunk_id, c.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 모드별 사용자 프롬프트
pub fn user_prompt(mode: AnswerMode, query: &str, chunks: &[RetrievedChunk]) -> String {
    match mode {
        AnswerMode::NonRag => format!("Question: {}", query.trim()),
        AnswerMode::Rag => format!(
            "Context from document:\n\n{}\n\nQuestion: {}\n\n\
             Answer from the context above and cite chunks as [Chunk N].",
            format_context(chunks),
            query.trim()
        ),
        AnswerMode::Hybrid => format!(
            "Context from document:\n\n{}\n\nQuestion: {}\n\n\
             Use the context as the foundation of your answer, cite it as [Chunk N], \
             and add clearly marked general background where it helps.",
            format_context(chunks),
            query.trim()
        ),
    }
}

/// 요약 사용자 프롬프트
pub fn summary_user_prompt(chunks: &[RetrievedChunk]) -> String {
    format!(
        "Summarize this document based on the following excerpts:\n\n{}\n\n\
         Focus on the purpose, the main topics and the key provisions.",
        format_context(chunks)
    )
}
