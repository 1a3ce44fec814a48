//! `.agentreg.toml` parsing: Gate Checker thresholds and label/path rules.
//! The Rust-native re-expression of the original `.agentreg.yml`; no YAML
//! read-compat is attempted.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_S1_PASS_RATE: f64 = 100.0;
pub const DEFAULT_OVERALL_PASS_RATE: f64 = 80.0;
pub const DEFAULT_TOP_N: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub s1_pass_rate: Option<f64>,
    #[serde(default)]
    pub overall_pass_rate: Option<f64>,
    #[serde(default)]
    pub top_n: Option<usize>,
}

impl Thresholds {
    fn merge_over(self, base: Thresholds) -> Thresholds {
        Thresholds {
            s1_pass_rate: self.s1_pass_rate.or(base.s1_pass_rate),
            overall_pass_rate: self.overall_pass_rate.or(base.overall_pass_rate),
            top_n: self.top_n.or(base.top_n),
        }
    }

    pub fn resolved(self) -> ResolvedThresholds {
        ResolvedThresholds {
            s1_pass_rate: self.s1_pass_rate.unwrap_or(DEFAULT_S1_PASS_RATE),
            overall_pass_rate: self.overall_pass_rate.unwrap_or(DEFAULT_OVERALL_PASS_RATE),
            top_n: self.top_n.unwrap_or(DEFAULT_TOP_N),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedThresholds {
    pub s1_pass_rate: f64,
    pub overall_pass_rate: f64,
    pub top_n: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleMatch {
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

impl RuleMatch {
    /// An empty match (no labels and no paths configured) never matches. When
    /// both are specified, both must be satisfied.
    fn matches(&self, caller_labels: &[String], changed_paths: &[String]) -> bool {
        if self.labels.is_none() && self.paths.is_none() {
            return false;
        }
        let labels_ok = match &self.labels {
            None => true,
            Some(required) => required.iter().any(|l| caller_labels.contains(l)),
        };
        let paths_ok = match &self.paths {
            None => true,
            Some(patterns) => patterns.iter().any(|pattern| {
                changed_paths.iter().any(|path| glob_match(pattern, path))
            }),
        };
        labels_ok && paths_ok
    }
}

fn glob_match(pattern: &str, path: &str) -> bool {
    glob::Pattern::new(pattern).map(|p| p.matches(path)).unwrap_or(false)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Rule {
    pub name: String,
    #[serde(rename = "match", default)]
    pub rule_match: RuleMatch,
    #[serde(default)]
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub owner_fallback: Option<String>,
}

impl GateConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing .agentreg.toml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Auto-detect `.agentreg.toml` in `dir`; `Ok(None)` when absent, not an error.
    pub fn discover(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(".agentreg.toml");
        if path.exists() {
            Ok(Some(Self::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Layering: hard defaults -> config-file defaults -> first matching rule
    /// -> caller overrides. Partial-field rules inherit unset fields from the
    /// layer below them.
    pub fn resolve_thresholds(
        &self,
        caller_labels: &[String],
        changed_paths: &[String],
        caller_overrides: Thresholds,
    ) -> ResolvedThresholds {
        let mut resolved = Thresholds::default().merge_over(self.thresholds);

        if let Some(rule) = self.rules.iter().find(|r| r.rule_match.matches(caller_labels, changed_paths)) {
            resolved = rule.thresholds.merge_over(resolved);
        }

        caller_overrides.merge_over(resolved).resolved()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds { s1_pass_rate: None, overall_pass_rate: None, top_n: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_defaults_apply_when_nothing_configured() {
        let config = GateConfig::default();
        let resolved = config.resolve_thresholds(&[], &[], Thresholds::default());
        assert_eq!(resolved.s1_pass_rate, DEFAULT_S1_PASS_RATE);
        assert_eq!(resolved.overall_pass_rate, DEFAULT_OVERALL_PASS_RATE);
        assert_eq!(resolved.top_n, DEFAULT_TOP_N);
    }

    #[test]
    fn empty_rule_match_never_matches() {
        let toml_str = r#"
            [thresholds]
            overall_pass_rate = 70.0

            [[rules]]
            name = "catch-all"
            [rules.thresholds]
            overall_pass_rate = 10.0
        "#;
        let config = GateConfig::from_toml_str(toml_str).unwrap();
        let resolved = config.resolve_thresholds(&["anything".to_string()], &["a.rs".to_string()], Thresholds::default());
        assert_eq!(resolved.overall_pass_rate, 70.0);
    }

    #[test]
    fn rule_requires_both_label_and_path_when_both_specified() {
        let toml_str = r#"
            [[rules]]
            name = "risky"
            match = { labels = ["risky"], paths = ["src/gateway/**"] }
            [rules.thresholds]
            overall_pass_rate = 95.0
        "#;
        let config = GateConfig::from_toml_str(toml_str).unwrap();

        let labels_only = config.resolve_thresholds(&["risky".to_string()], &["README.md".to_string()], Thresholds::default());
        assert_eq!(labels_only.overall_pass_rate, DEFAULT_OVERALL_PASS_RATE);

        let both = config.resolve_thresholds(&["risky".to_string()], &["src/gateway/cache.rs".to_string()], Thresholds::default());
        assert_eq!(both.overall_pass_rate, 95.0);
    }

    #[test]
    fn caller_overrides_win_over_everything() {
        let toml_str = r#"
            [thresholds]
            overall_pass_rate = 70.0
        "#;
        let config = GateConfig::from_toml_str(toml_str).unwrap();
        let overrides = Thresholds { overall_pass_rate: Some(60.0), ..Default::default() };
        let resolved = config.resolve_thresholds(&[], &[], overrides);
        assert_eq!(resolved.overall_pass_rate, 60.0);
    }

    #[test]
    fn partial_rule_inherits_unset_fields_from_defaults() {
        let toml_str = r#"
            [thresholds]
            overall_pass_rate = 70.0
            top_n = 8

            [[rules]]
            name = "s1-only"
            match = { labels = ["s1"] }
            [rules.thresholds]
            s1_pass_rate = 99.0
        "#;
        let config = GateConfig::from_toml_str(toml_str).unwrap();
        let resolved = config.resolve_thresholds(&["s1".to_string()], &[], Thresholds::default());
        assert_eq!(resolved.s1_pass_rate, 99.0);
        assert_eq!(resolved.overall_pass_rate, 70.0);
        assert_eq!(resolved.top_n, 8);
    }
}
