//! Static per-model pricing table and cost calculation.
//!
//! Pure data + a pure function — no I/O, no shared state. The table is
//! editable data, not part of the contract: adding a model is not a breaking
//! change.

/// Per-thousand-token input/output rates in USD.
#[derive(Debug, Clone, Copy)]
struct Rate {
    input_per_1k: f64,
    output_per_1k: f64,
}

const PRICING_TABLE: &[(&str, Rate)] = &[
    (
        "gpt-4o",
        Rate { input_per_1k: 0.0025, output_per_1k: 0.01 },
    ),
    (
        "gpt-4o-mini",
        Rate { input_per_1k: 0.00015, output_per_1k: 0.0006 },
    ),
    (
        "gpt-4-turbo",
        Rate { input_per_1k: 0.01, output_per_1k: 0.03 },
    ),
    (
        "gpt-3.5-turbo",
        Rate { input_per_1k: 0.0005, output_per_1k: 0.0015 },
    ),
];

fn lookup(model: &str) -> Option<Rate> {
    PRICING_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rate)| *rate)
}

/// `cost(model, prompt_tokens, completion_tokens) = prompt/1000 * rate_in + completion/1000 * rate_out`,
/// rounded to 6 decimal places. Unknown model or the mock provider → 0.
pub fn calculate_cost_usd(provider: &str, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    if provider.eq_ignore_ascii_case("mock") {
        return 0.0;
    }
    let Some(rate) = lookup(model) else {
        return 0.0;
    };
    let raw = (prompt_tokens as f64 / 1000.0) * rate.input_per_1k
        + (completion_tokens as f64 / 1000.0) * rate.output_per_1k;
    (raw * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_provider_is_always_free() {
        assert_eq!(calculate_cost_usd("mock", "gpt-4o", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn unknown_model_is_free() {
        assert_eq!(calculate_cost_usd("remote", "not-a-real-model", 1000, 1000), 0.0);
    }

    #[test]
    fn known_model_computes_expected_cost() {
        let cost = calculate_cost_usd("remote", "gpt-4o-mini", 1000, 1000);
        assert_eq!(cost, 0.00015 + 0.0006);
    }

    #[test]
    fn rounds_to_six_decimal_places() {
        let cost = calculate_cost_usd("remote", "gpt-4o", 333, 777);
        // 333/1000*0.0025 + 777/1000*0.01 = 0.0008325 + 0.00777 = 0.0086025
        assert_eq!(cost, 0.0086025);
    }
}
