//! Case Catalogue: loads regression test cases from a CSV file or a
//! directory of CSV files. Grounded in the original `load_from_csv` /
//! `load_from_directory`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Canonicalized severity: anything outside {S1, S2} buckets nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    S1,
    S2,
    Unclassified,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S1 => "S1",
            Self::S2 => "S2",
            Self::Unclassified => "unclassified",
        }
    }

    /// {S1, SEV1, 1, CRITICAL} → S1; {S2, SEV2, 2, HIGH} → S2; else unclassified.
    pub fn canonicalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "S1" | "SEV1" | "1" | "CRITICAL" => Self::S1,
            "S2" | "SEV2" | "2" | "HIGH" => Self::S2,
            _ => Self::Unclassified,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TestCase {
    pub case_id: String,
    pub name: String,
    pub input_prompt: String,
    pub expected_output: String,
    pub category: String,
    pub severity: Severity,
    pub owner: Option<String>,
    pub tags: Vec<String>,
    pub min_pass_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    case_id: String,
    name: String,
    input_prompt: String,
    #[serde(default)]
    expected_output: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    min_pass_rate: Option<String>,
}

impl From<CsvRow> for TestCase {
    fn from(row: CsvRow) -> Self {
        let tags = row
            .tags
            .unwrap_or_default()
            .split(';')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        // Unparseable min_pass_rate is silently ignored, per the original loader.
        let min_pass_rate = row.min_pass_rate.and_then(|s| s.trim().parse::<f64>().ok());

        Self {
            case_id: row.case_id,
            name: row.name,
            input_prompt: row.input_prompt,
            expected_output: row.expected_output,
            category: row.category,
            severity: Severity::canonicalize(&row.severity),
            owner: row.owner,
            tags,
            min_pass_rate,
        }
    }
}

/// Load cases from a single CSV file. Required columns: case_id, name,
/// input_prompt, expected_output, category, severity. Legacy files without
/// the optional columns (owner, tags, min_pass_rate) are accepted.
pub fn load_from_csv(path: &Path) -> Result<Vec<TestCase>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening case catalogue {}", path.display()))?;
    let mut cases = Vec::new();
    for record in reader.deserialize() {
        let row: CsvRow = record.with_context(|| format!("parsing row in {}", path.display()))?;
        cases.push(TestCase::from(row));
    }
    Ok(cases)
}

/// Load cases from every `*.csv` file directly under `dir`, concatenated.
pub fn load_from_directory(dir: &Path) -> Result<Vec<TestCase>> {
    let pattern = dir.join("*.csv");
    let pattern = pattern.to_string_lossy().to_string();
    let mut cases = Vec::new();
    for entry in glob::glob(&pattern).with_context(|| format!("globbing {pattern}"))? {
        let path = entry.context("reading glob entry")?;
        cases.extend(load_from_csv(&path)?);
    }
    Ok(cases)
}

/// Load either a single file or a directory, dispatching on `path`'s kind.
pub fn load(path: &Path) -> Result<Vec<TestCase>> {
    if path.is_dir() {
        load_from_directory(path)
    } else {
        load_from_csv(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn severity_canonicalizes_known_synonyms() {
        assert_eq!(Severity::canonicalize("SEV1"), Severity::S1);
        assert_eq!(Severity::canonicalize("critical"), Severity::S1);
        assert_eq!(Severity::canonicalize("HIGH"), Severity::S2);
        assert_eq!(Severity::canonicalize("2"), Severity::S2);
        assert_eq!(Severity::canonicalize("weird"), Severity::Unclassified);
    }

    #[test]
    fn loads_required_and_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "cases.csv",
            "case_id,name,input_prompt,expected_output,category,severity,owner,tags,min_pass_rate\n\
             TC001,first,do a thing,\"{\"\"a\"\":1}\",tools,S1,alice,foo; bar ;,95.5\n",
        );
        let cases = load_from_csv(&path).unwrap();
        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.case_id, "TC001");
        assert_eq!(case.severity, Severity::S1);
        assert_eq!(case.owner.as_deref(), Some("alice"));
        assert_eq!(case.tags, vec!["foo", "bar"]);
        assert_eq!(case.min_pass_rate, Some(95.5));
    }

    #[test]
    fn legacy_file_without_optional_columns_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "legacy.csv",
            "case_id,name,input_prompt,expected_output,category,severity\n\
             TC002,second,do another thing,expected text,tools,S2\n",
        );
        let cases = load_from_csv(&path).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].owner, None);
        assert!(cases[0].tags.is_empty());
        assert_eq!(cases[0].min_pass_rate, None);
    }

    #[test]
    fn unparseable_min_pass_rate_is_silently_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(
            dir.path(),
            "cases.csv",
            "case_id,name,input_prompt,expected_output,category,severity,min_pass_rate\n\
             TC003,third,x,y,tools,S1,not-a-number\n",
        );
        let cases = load_from_csv(&path).unwrap();
        assert_eq!(cases[0].min_pass_rate, None);
    }

    #[test]
    fn directory_loader_concatenates_all_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "a.csv",
            "case_id,name,input_prompt,expected_output,category,severity\nTC1,a,x,y,c,S1\n",
        );
        write_csv(
            dir.path(),
            "b.csv",
            "case_id,name,input_prompt,expected_output,category,severity\nTC2,b,x,y,c,S2\n",
        );
        let cases = load_from_directory(dir.path()).unwrap();
        assert_eq!(cases.len(), 2);
    }
}
