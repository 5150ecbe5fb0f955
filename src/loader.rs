use crate::models::{clean_header, normalize_gender, parse_semester, StudentRecord};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Everything read from the data directory: the union of cleaned headers in
/// first-seen order (for the output file) and the records in load order.
pub struct LoadedData {
    pub headers: Vec<String>,
    pub records: Vec<StudentRecord>,
}

pub struct RecordLoader;

impl RecordLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load every `.csv` file in the directory, in sorted filename order so
    /// repeated runs ingest records identically.
    pub fn load_directory(&self, data_dir: &str) -> Result<LoadedData> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(data_dir)
            .with_context(|| format!("Failed to read data directory: {}", data_dir))?
        {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("csv") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut headers: Vec<String> = Vec::new();
        let mut records = Vec::new();
        for path in &paths {
            println!("📄 Processing: {:?}", path.file_name().unwrap_or_default());
            let (file_headers, file_records) = self.load_file(path, records.len())?;
            println!("   ✅ Found {} student rows", file_records.len());

            for header in file_headers {
                if !headers.contains(&header) {
                    headers.push(header);
                }
            }
            records.extend(file_records);
        }

        Ok(LoadedData { headers, records })
    }

    fn load_file(&self, path: &Path, next_row_id: usize) -> Result<(Vec<String>, Vec<StudentRecord>)> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open file: {}", path.display()))?;
        let source_file = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let fallback_program = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        self.parse_reader(file, &source_file, &fallback_program, next_row_id)
            .with_context(|| format!("Failed to parse file: {}", path.display()))
    }

    /// Parse one CSV source. The program comes from a `Stream` column when
    /// present (then a `Program` column), falling back to the file stem for
    /// files named after their program.
    pub fn parse_reader<R: Read>(
        &self,
        reader: R,
        source_file: &str,
        fallback_program: &str,
        next_row_id: usize,
    ) -> Result<(Vec<String>, Vec<StudentRecord>)> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(clean_header)
            .collect();
        let column_index: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), i))
            .collect();
        let program_column = column_index
            .get("Stream")
            .or_else(|| column_index.get("Program"))
            .copied();
        let semester_column = column_index.get("Semester").copied();
        let gender_column = column_index.get("Gender").copied();

        let cell = |row: &csv::StringRecord, column: Option<usize>| -> Option<String> {
            let value = row.get(column?)?.trim();
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        };

        let mut records = Vec::new();
        for (offset, row) in csv_reader.records().enumerate() {
            let row = row.with_context(|| format!("Malformed CSV row in {}", source_file))?;

            let program = cell(&row, program_column)
                .or_else(|| program_column.is_none().then(|| fallback_program.to_string()));
            let semester = cell(&row, semester_column).and_then(|s| parse_semester(&s));
            let gender = cell(&row, gender_column).and_then(|g| normalize_gender(&g));

            let mut values = HashMap::new();
            for (i, header) in headers.iter().enumerate() {
                if let Some(value) = row.get(i) {
                    values.insert(header.clone(), value.to_string());
                }
            }

            records.push(StudentRecord {
                row_id: next_row_id + offset,
                source_file: source_file.to_string(),
                program,
                semester,
                gender,
                house: None,
                values,
            });
        }

        Ok((headers, records))
    }
}
