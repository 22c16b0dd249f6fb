//! Static pricing table, USD per million tokens.
//!
//! Used by the aggregator to turn per-run token totals into a dollar cost.
//! Matching is by substring on the reported model id, most specific pattern
//! first, so `gpt-4.1-mini` wins over `gpt-4.1` and date-suffixed ids still
//! match their family.

/// (pattern, input $/M, output $/M), ordered most specific first.
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5-nano", 0.05, 0.40),
    ("gpt-5", 1.25, 10.00),
    ("gpt-oss-120b", 0.10, 0.50),
    ("o4-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
    ("deepseek-reasoner", 0.55, 2.19),
    ("deepseek-chat", 0.27, 1.10),
    ("claude-3-7-sonnet", 3.00, 15.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-opus-4", 15.00, 75.00),
    ("gemini-2.5-pro", 1.25, 10.00),
    ("gemini-2.5-flash", 0.30, 2.50),
    ("kimi-k2", 0.60, 2.50),
    ("grok-code-fast-1", 0.20, 1.50),
    ("grok-4", 3.00, 15.00),
    ("qwen3-coder-plus", 1.00, 5.00),
    ("qwen3-max", 1.20, 6.00),
    ("glm-4.5", 0.60, 2.20),
];

/// Compute the USD cost of a token volume for a model, or `None` when the
/// model is not in the table.
pub fn compute_cost_usd(model: &str, input_tokens: f64, output_tokens: f64) -> Option<f64> {
    let lowered = model.to_lowercase();
    PRICES
        .iter()
        .find(|(pattern, _, _)| lowered.contains(pattern))
        .map(|(_, input_price, output_price)| {
            (input_tokens * input_price + output_tokens * output_price) / 1_000_000.0
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_cost() {
        let cost = compute_cost_usd("gpt-4o", 1_000_000.0, 100_000.0).unwrap();
        assert!((cost - 3.5).abs() < 1e-9);
    }

    #[test]
    fn specific_pattern_wins() {
        // gpt-4.1-mini must not be priced as gpt-4.1.
        let mini = compute_cost_usd("gpt-4.1-mini", 1_000_000.0, 0.0).unwrap();
        assert!((mini - 0.40).abs() < 1e-9);
    }

    #[test]
    fn date_suffixed_ids_match_family() {
        assert!(compute_cost_usd("claude-sonnet-4-20250514", 1000.0, 1000.0).is_some());
        assert!(compute_cost_usd("gpt-4o-2024-08-06", 1000.0, 1000.0).is_some());
    }

    #[test]
    fn unknown_model_is_none() {
        assert!(compute_cost_usd("mystery-model-9000", 1000.0, 1000.0).is_none());
    }

    #[test]
    fn zero_tokens_zero_cost() {
        assert_eq!(compute_cost_usd("gpt-4o", 0.0, 0.0), Some(0.0));
    }
}
