use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A line-by-line JSONL reader with typed parsing.
///
/// # Example
/// ```ignore
/// let source = JsonlSource::new("data/mp_20/train.jsonl");
/// for record in source.stream::<CrystRecord>()? {
///     let record = record?;
///     println!("{} atoms", record.num_atoms());
/// }
/// ```
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    /// Creates a new reader for a JSONL file at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Streams lines as Rust types.
    ///
    /// # Errors
    /// - Fails if the file cannot be opened or any line is invalid JSON for `T`.
    /// - Includes line numbers in errors (e.g., "Invalid JSON at line 3").
    pub fn stream<T: DeserializeOwned>(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<T>> + Send>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let iter = reader.lines().enumerate().filter_map(|(line_num, line)| {
            let line = match line {
                Ok(l) if l.trim().is_empty() => return None, // Skip blanks
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            Some(
                serde_json::from_str::<T>(&line)
                    .with_context(|| format!("Invalid JSON at line {}", line_num + 1)),
            )
        });
        Ok(Box::new(iter))
    }

    /// Reads the whole file into memory.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.stream()?
            .collect::<Result<Vec<T>>>()
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    /// Writes `items` as one JSON object per line, replacing the file.
    pub fn write_all<T: Serialize>(&self, items: &[T]) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        for item in items {
            serde_json::to_writer(&mut writer, item)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_jsonl_source_streams_typed_data() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, r#"{{"id": 1, "text": "foo"}}"#)?;
        writeln!(file)?;
        writeln!(file, r#"{{"id": 2, "text": "bar"}}"#)?;

        let source = JsonlSource::new(file.path());
        let items: Vec<Value> = source.read_all()?;
        assert_eq!(
            items,
            vec![json!({"id": 1, "text": "foo"}), json!({"id": 2, "text": "bar"})]
        );
        Ok(())
    }

    #[test]
    fn test_invalid_line_reports_line_number() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, r#"{{"id": 1}}"#)?;
        writeln!(file, "not json")?;

        let source = JsonlSource::new(file.path());
        let err = source.read_all::<Value>().unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
        Ok(())
    }

    #[test]
    fn test_write_all_then_read_all() -> Result<()> {
        let file = NamedTempFile::new()?;
        let source = JsonlSource::new(file.path());
        source.write_all(&[json!({"a": 1}), json!({"a": 2})])?;
        let items: Vec<Value> = source.read_all()?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["a"], 2);
        Ok(())
    }
}
