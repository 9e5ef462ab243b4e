//! 토큰 카운터
//!
//! cl100k_base BPE 로 토큰 수를 계산합니다. 어휘는 크레이트에 내장되어 있어
//! 네트워크 없이 로컬에서 동작하고, 같은 입력이면 항상 같은 값을 반환합니다.

use std::sync::LazyLock;

use tiktoken_rs::{cl100k_base, CoreBPE};

static BPE: LazyLock<CoreBPE> =
    LazyLock::new(|| cl100k_base().expect("Invalid bundled cl100k_base vocabulary"));

/// 텍스트의 토큰 수
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    BPE.encode_ordinary(text).len()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn test_common_words_are_single_tokens() {
        // "The", " cat", " sat", "."
        assert_eq!(count_tokens("The cat sat."), 4);
        assert_eq!(count_tokens("hello world"), 2);
    }

    #[test]
    fn test_longer_text_has_more_tokens() {
        let short = count_tokens("Payment is due.");
        let long = count_tokens("Payment is due on the first business day of every month.");
        assert!(short >= 1);
        assert!(long > short);
    }

    #[test]
    fn test_unicode_text_is_counted() {
        assert!(count_tokens("안녕하세요") >= 1);
    }

    #[test]
    fn test_deterministic() {
        let text = "Section 4(b) of the Act applies to all agencies.";
        assert_eq!(count_tokens(text), count_tokens(text));
        assert!(count_tokens(text) >= 1);
    }
}
