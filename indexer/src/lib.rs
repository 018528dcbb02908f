//! Reading scraped issue / pull request records from JSON and JSONL files.
//!
//! Accepted shapes: a JSONL file with one record per line, a JSON array of
//! records, or a single JSON object. Each record needs `title`, `body` and a
//! `locator` (or `url`). Unknown fields are ignored.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zapindex::InputDoc;

#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<InputDoc>,
    /// Lines or array entries that were not valid records.
    pub malformed: usize,
}

/// Files to read for `input`: the file itself, or every `.json` / `.jsonl`
/// file below a directory, in a stable order.
pub fn collect_input_files(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

pub fn load_records(input: &Path) -> Result<LoadedRecords> {
    let mut loaded = LoadedRecords::default();
    for file in collect_input_files(input) {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file, &mut loaded)?;
        } else {
            read_json(&file, &mut loaded)?;
        }
    }
    Ok(loaded)
}

fn read_jsonl(file: &Path, loaded: &mut LoadedRecords) -> Result<()> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let reader = BufReader::new(f);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", file.display()))?;
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<InputDoc>(&line) {
            Ok(doc) => loaded.records.push(doc),
            Err(e) => {
                tracing::warn!(file = %file.display(), line = lineno + 1, error = %e, "skipping malformed record");
                loaded.malformed += 1;
            }
        }
    }
    Ok(())
}

fn read_json(file: &Path, loaded: &mut LoadedRecords) -> Result<()> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let json: serde_json::Value = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parsing {}", file.display()))?;
    let values = match json {
        serde_json::Value::Array(arr) => arr,
        v @ serde_json::Value::Object(_) => vec![v],
        _ => {
            tracing::warn!(file = %file.display(), "expected a record or an array of records");
            return Ok(());
        }
    };
    for (i, v) in values.into_iter().enumerate() {
        match serde_json::from_value::<InputDoc>(v) {
            Ok(doc) => loaded.records.push(doc),
            Err(e) => {
                tracing::warn!(file = %file.display(), entry = i, error = %e, "skipping malformed record");
                loaded.malformed += 1;
            }
        }
    }
    Ok(())
}
