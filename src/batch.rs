//! 批次切分
//!
//! 按条目数、字符数与估算token数三个上限，把输入贪心地切成若干批次，
//! 并提供跳过无需翻译片段的判定。

use crate::types::BatchingConfig;

/// 单个批次的预算上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBudget {
    pub max_items: usize,
    pub max_chars: usize,
    pub token_budget: usize,
}

impl From<&BatchingConfig> for BatchBudget {
    fn from(config: &BatchingConfig) -> Self {
        Self {
            max_items: config.max_items,
            max_chars: config.max_chars,
            token_budget: config.token_budget,
        }
    }
}

/// 中日韩文字（含假名与谚文）
pub fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x1100..=0x11FF     // Hangul Jamo
        | 0x3040..=0x30FF   // Hiragana, Katakana
        | 0x3130..=0x318F   // Hangul Compatibility Jamo
        | 0x31F0..=0x31FF   // Katakana Phonetic Extensions
        | 0x3400..=0x4DBF   // CJK Extension A
        | 0x4E00..=0x9FFF   // CJK Unified Ideographs
        | 0xAC00..=0xD7AF   // Hangul Syllables
        | 0xF900..=0xFAFF   // CJK Compatibility Ideographs
        | 0xFF66..=0xFF9F   // Halfwidth Katakana
        | 0x20000..=0x2A6DF // CJK Extension B
    )
}

/// 估算token数：每个中日韩字符计1个，其余字符按每4个计1个（向上取整）。
///
/// 这是启发式估计，调用方应把 `token_budget` 视为余量而非硬性保证。
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    cjk + other.div_ceil(4)
}

/// 片段是否无需翻译：去除首尾空白后长度小于 `min_len`，
/// 或者不含任何字母、数字或中日韩字符（纯标点/空白）。
pub fn is_skippable_segment(text: &str, min_len: usize) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < min_len {
        return true;
    }
    !trimmed.chars().any(|c| c.is_alphanumeric() || is_cjk(c))
}

#[derive(Default)]
struct Running {
    items: usize,
    chars: usize,
    tokens: usize,
}

impl Running {
    fn would_exceed(&self, chars: usize, tokens: usize, budget: &BatchBudget) -> bool {
        self.items + 1 > budget.max_items
            || self.chars + chars > budget.max_chars
            || self.tokens + tokens > budget.token_budget
    }

    fn is_full(&self, budget: &BatchBudget) -> bool {
        self.items >= budget.max_items
            || self.chars >= budget.max_chars
            || self.tokens >= budget.token_budget
    }
}

/// 按预算贪心切分
///
/// 保证：每个批次至少一条；单条超预算的输入独占一个批次；
/// 所有批次按顺序拼接后与输入完全一致。
///
/// # 示例
///
/// ```rust
/// use translate_dispatch::{split_by_budget, BatchBudget};
///
/// let budget = BatchBudget { max_items: 2, max_chars: 100, token_budget: 100 };
/// let chunks = split_by_budget(&["a", "b", "c"], &budget);
/// assert_eq!(chunks, vec![vec!["a", "b"], vec!["c"]]);
/// ```
pub fn split_by_budget<S>(inputs: &[S], budget: &BatchBudget) -> Vec<Vec<S>>
where
    S: AsRef<str> + Clone,
{
    let mut chunks = Vec::new();
    let mut current: Vec<S> = Vec::new();
    let mut running = Running::default();

    for input in inputs {
        let text = input.as_ref();
        let chars = text.chars().count();
        let tokens = estimate_tokens(text);

        if !current.is_empty() && running.would_exceed(chars, tokens, budget) {
            chunks.push(std::mem::take(&mut current));
            running = Running::default();
        }

        current.push(input.clone());
        running.items += 1;
        running.chars += chars;
        running.tokens += tokens;

        if running.is_full(budget) {
            chunks.push(std::mem::take(&mut current));
            running = Running::default();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(max_items: usize, max_chars: usize, token_budget: usize) -> BatchBudget {
        BatchBudget {
            max_items,
            max_chars,
            token_budget,
        }
    }

    fn words(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("segment number {i} {}", "x".repeat(i % 13))).collect()
    }

    #[test]
    fn token_estimate_mixes_cjk_and_latin() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("你好"), 2);
        assert_eq!(estimate_tokens("こんにちは"), 5);
        assert_eq!(estimate_tokens("안녕 hi"), 2 + 1);
    }

    #[test]
    fn skippable_segments() {
        assert!(is_skippable_segment("   ", 1));
        assert!(is_skippable_segment("...!?", 1));
        assert!(is_skippable_segment(" — · ", 1));
        assert!(is_skippable_segment("a", 2));
        assert!(!is_skippable_segment("ok", 2));
        assert!(!is_skippable_segment("  字  ", 1));
        assert!(!is_skippable_segment("42", 1));
    }

    #[test]
    fn flatten_preserves_inputs() {
        let inputs = words(57);
        for b in [budget(1, 1000, 1000), budget(5, 60, 20), budget(100, 10_000, 10_000), budget(3, 1, 1)] {
            let chunks = split_by_budget(&inputs, &b);
            assert!(chunks.iter().all(|c| !c.is_empty()));
            let flat: Vec<String> = chunks.into_iter().flatten().collect();
            assert_eq!(flat, inputs);
        }
    }

    #[test]
    fn multi_item_chunks_respect_every_ceiling() {
        let inputs = words(80);
        let b = budget(6, 90, 25);
        for chunk in split_by_budget(&inputs, &b) {
            if chunk.len() > 1 {
                let chars: usize = chunk.iter().map(|s| s.chars().count()).sum();
                let tokens: usize = chunk.iter().map(|s| estimate_tokens(s)).sum();
                assert!(chunk.len() <= b.max_items);
                assert!(chars <= b.max_chars, "chars {chars}");
                assert!(tokens <= b.token_budget, "tokens {tokens}");
            }
        }
    }

    #[test]
    fn oversized_item_ships_alone() {
        let big = "y".repeat(500);
        let inputs = vec!["a".to_string(), big.clone(), "b".to_string()];
        let chunks = split_by_budget(&inputs, &budget(10, 100, 1000));
        assert_eq!(chunks, vec![vec!["a".to_string()], vec![big], vec!["b".to_string()]]);
    }

    #[test]
    fn exactly_full_chunk_closes_immediately() {
        let inputs = ["abcd", "efgh", "ij"];
        let chunks = split_by_budget(&inputs, &budget(10, 8, 100));
        assert_eq!(chunks, vec![vec!["abcd", "efgh"], vec!["ij"]]);
    }

    #[test]
    fn item_count_ceiling() {
        let inputs: Vec<&str> = vec!["a"; 7];
        let sizes: Vec<usize> = split_by_budget(&inputs, &budget(3, 1000, 1000))
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn empty_input_gives_no_chunks() {
        let inputs: Vec<String> = Vec::new();
        assert!(split_by_budget(&inputs, &budget(3, 10, 10)).is_empty());
    }
}
