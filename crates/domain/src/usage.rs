//! Token accounting across agent turns.

use serde::{Deserialize, Serialize};

/// Accumulated token usage for one agent execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    /// Fold one completion's usage into the running totals.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0 && self.input_tokens == 0 && self.output_tokens == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_sums_all_components() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            total_tokens: 120,
            reasoning_tokens: 5,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 200,
            output_tokens: 40,
            total_tokens: 240,
            reasoning_tokens: 0,
        });
        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 60);
        assert_eq!(total.total_tokens, 360);
        assert_eq!(total.reasoning_tokens, 5);
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let usage: TokenUsage = serde_json::from_str(r#"{"input_tokens": 10}"#).unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.reasoning_tokens, 0);
    }
}
