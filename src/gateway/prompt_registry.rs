//! Prompt Registry: versioned prompt templates loaded once at startup from a
//! directory of descriptors. Grounded in the original `PromptTemplate` /
//! `PromptManager`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One versioned prompt descriptor, loaded from a `<version>.toml` file under
/// the configured prompts directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub version: String,
    pub system_prompt: String,
    /// User-prompt template containing the literal slot `{instruction}`.
    pub user_template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl PromptTemplate {
    /// Substitute `instruction` into the user template's `{instruction}` slot.
    pub fn render(&self, instruction: &str) -> String {
        self.user_template.replace("{instruction}", instruction)
    }

    /// The version string split into numeric components for descending sort
    /// (e.g. "2.10" sorts after "2.9").
    fn numeric_components(&self) -> Vec<u64> {
        self.version
            .split(['.', '-'])
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    }
}

pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
    default_version: String,
}

impl PromptRegistry {
    /// Load every `*.toml` file directly under `dir` as a [`PromptTemplate`].
    pub fn load_dir(dir: &Path, default_version: &str) -> Result<Self> {
        let mut templates = HashMap::new();
        if dir.exists() {
            for entry in std::fs::read_dir(dir)
                .with_context(|| format!("reading prompts directory {}", dir.display()))?
            {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                    continue;
                }
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading prompt file {}", path.display()))?;
                let template: PromptTemplate = toml::from_str(&raw)
                    .with_context(|| format!("parsing prompt file {}", path.display()))?;
                templates.insert(template.version.clone(), template);
            }
        }
        Ok(Self {
            templates,
            default_version: default_version.to_string(),
        })
    }

    /// Construct a registry directly from in-memory templates — used by tests
    /// and by the mock harness fixtures.
    pub fn from_templates(templates: Vec<PromptTemplate>, default_version: &str) -> Self {
        Self {
            templates: templates.into_iter().map(|t| (t.version.clone(), t)).collect(),
            default_version: default_version.to_string(),
        }
    }

    pub fn get(&self, version: &str) -> Option<&PromptTemplate> {
        self.templates.get(version)
    }

    /// Versions sorted by numeric component, descending (newest first).
    pub fn list_versions(&self) -> Vec<&str> {
        let mut versions: Vec<&PromptTemplate> = self.templates.values().collect();
        versions.sort_by(|a, b| b.numeric_components().cmp(&a.numeric_components()));
        versions.into_iter().map(|t| t.version.as_str()).collect()
    }

    pub fn default_version(&self) -> &str {
        &self.default_version
    }

    pub fn latest(&self) -> Option<&PromptTemplate> {
        self.list_versions()
            .first()
            .and_then(|v| self.templates.get(*v))
    }

    /// Resolve a requested version, falling back to the configured default
    /// with a warning when the requested version is absent or unspecified.
    /// Returns `(template, effective_version)`.
    pub fn resolve<'a>(&'a self, requested: Option<&str>) -> Option<(&'a PromptTemplate, String)> {
        if let Some(version) = requested {
            if let Some(template) = self.templates.get(version) {
                return Some((template, version.to_string()));
            }
            tracing::warn!(
                requested = version,
                default = %self.default_version,
                "requested prompt version not found, falling back to default"
            );
        }
        self.templates
            .get(&self.default_version)
            .map(|t| (t, self.default_version.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(version: &str) -> PromptTemplate {
        PromptTemplate {
            version: version.to_string(),
            system_prompt: "be helpful".into(),
            user_template: "Do this: {instruction}".into(),
            description: String::new(),
            tags: vec![],
            created_at: Utc::now(),
            examples: vec![],
        }
    }

    #[test]
    fn render_substitutes_instruction_slot() {
        let t = template("1");
        assert_eq!(t.render("summarize"), "Do this: summarize");
    }

    #[test]
    fn list_versions_sorts_numerically_descending() {
        let registry = PromptRegistry::from_templates(
            vec![template("2"), template("10"), template("1")],
            "1",
        );
        assert_eq!(registry.list_versions(), vec!["10", "2", "1"]);
    }

    #[test]
    fn resolve_falls_back_to_default_when_requested_version_missing() {
        let registry = PromptRegistry::from_templates(vec![template("1")], "1");
        let (resolved, effective) = registry.resolve(Some("99")).unwrap();
        assert_eq!(resolved.version, "1");
        assert_eq!(effective, "1");
    }

    #[test]
    fn resolve_with_no_request_uses_default() {
        let registry = PromptRegistry::from_templates(vec![template("1")], "1");
        let (_, effective) = registry.resolve(None).unwrap();
        assert_eq!(effective, "1");
    }
}
