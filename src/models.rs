use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Canonical house codes, in tie-break order.
    pub houses: Vec<String>,
    pub policy: Policy,
    pub data_directory: Option<String>,
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    #[serde(rename = "greedy-minimum")]
    GreedyMinimum,
    #[serde(rename = "round-robin")]
    RoundRobin,
}

impl Policy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "greedy-minimum" => Some(Policy::GreedyMinimum),
            "round-robin" => Some(Policy::RoundRobin),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Policy::GreedyMinimum => "greedy-minimum",
            Policy::RoundRobin => "round-robin",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            houses: vec![
                "M".to_string(),
                "U".to_string(),
                "T".to_string(),
                "L".to_string(),
            ],
            policy: Policy::GreedyMinimum,
            data_directory: Some("data".to_string()),
            output_file: Some("students_with_houses.csv".to_string()),
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

/// One student row as loaded from a source file.
///
/// The classification fields (`program`, `semester`, `gender`) are extracted
/// and normalized by the loader; everything else is carried untouched in
/// `values` so the output file can reproduce the original columns. `house`
/// is written exactly once by the allocator.
#[derive(Debug, Clone)]
pub struct StudentRecord {
    /// Stable load-order identifier, used in error reports.
    pub row_id: usize,
    pub source_file: String,
    pub program: Option<String>,
    pub semester: Option<u32>,
    pub gender: Option<String>,
    pub house: Option<String>,
    /// Original cells keyed by cleaned header name.
    pub values: HashMap<String, String>,
}

impl StudentRecord {
    /// All three classification keys, or `None` if any is missing.
    pub fn classification(&self) -> Option<(&str, u32, &str)> {
        match (&self.program, self.semester, &self.gender) {
            (Some(p), Some(s), Some(g)) => Some((p.as_str(), s, g.as_str())),
            _ => None,
        }
    }

    /// Names of the classification fields this record is missing.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.program.is_none() {
            missing.push("Program");
        }
        if self.semester.is_none() {
            missing.push("Semester");
        }
        if self.gender.is_none() {
            missing.push("Gender");
        }
        missing
    }
}

/// Normalize a header cell: strip non-breaking spaces, collapse runs of
/// whitespace, trim.
pub fn clean_header(raw: &str) -> String {
    let whitespace = Regex::new(r"\s+").unwrap();
    let replaced = raw.replace('\u{a0}', " ");
    whitespace.replace_all(&replaced, " ").trim().to_string()
}

/// Normalize a gender cell to an uppercase trimmed code; empty cells and
/// spreadsheet NaN artifacts become `None`.
pub fn normalize_gender(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_uppercase();
    if normalized.is_empty() || normalized == "NAN" {
        return None;
    }
    Some(normalized)
}

/// Parse a semester cell. Accepts plain integers and float-formatted
/// integers ("1", "1.0") as exported by spreadsheets; anything else,
/// including zero, is `None`.
pub fn parse_semester(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value = if let Ok(n) = trimmed.parse::<u32>() {
        n
    } else {
        let f = trimmed.parse::<f64>().ok()?;
        if f.fract() != 0.0 || f < 0.0 || f > u32::MAX as f64 {
            return None;
        }
        f as u32
    };
    if value == 0 {
        return None;
    }
    Some(value)
}
