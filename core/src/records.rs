use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Load records from a `.json` file (array or single object), a `.jsonl` file, or a
/// directory walked recursively for both. Directory entries are visited in sorted order.
pub fn load_records<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut files: Vec<PathBuf> = Vec::new();
    if path.is_dir() {
        for entry in WalkDir::new(path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && is_record_file(p) {
                files.push(p.to_path_buf());
            }
        }
    } else if path.is_file() {
        files.push(path.to_path_buf());
    } else {
        anyhow::bail!("no such input: {}", path.display());
    }

    let mut out = Vec::new();
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            load_jsonl(&file, &mut out)?;
        } else {
            load_json(&file, &mut out)?;
        }
    }
    tracing::debug!(path = %path.display(), records = out.len(), "loaded records");
    Ok(out)
}

fn is_record_file(p: &Path) -> bool {
    matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl"))
}

fn load_jsonl<T: DeserializeOwned>(file: &Path, out: &mut Vec<T>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
        out.push(record);
    }
    Ok(())
}

fn load_json<T: DeserializeOwned>(file: &Path, out: &mut Vec<T>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)
        .with_context(|| format!("parsing {}", file.display()))?;
    match json {
        serde_json::Value::Array(arr) => {
            for v in arr {
                out.push(serde_json::from_value(v)?);
            }
        }
        serde_json::Value::Object(_) => out.push(serde_json::from_value(json)?),
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn loads_json_and_jsonl_from_directory() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"[{"id":"1"},{"id":"2"}]"#).unwrap();
        fs::write(dir.path().join("b.jsonl"), "{\"id\":\"3\"}\n\n{\"id\":\"4\"}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let records: Vec<Value> = load_records(dir.path()).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn single_object_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("one.json");
        fs::write(&file, r#"{"id":"solo"}"#).unwrap();
        let records: Vec<Value> = load_records(&file).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_records::<Value>(dir.path().join("nope")).is_err());
    }
}
