//! Line-oriented domain and pattern lists.
//!
//! One entry per line. Blank lines and lines starting with `#` are skipped,
//! a trailing `# comment` is dropped, and only the first whitespace-separated
//! token of what remains is kept.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::error::ListError;

#[derive(Debug, Clone)]
pub struct ListSource {
    pub path: PathBuf,
    pub entries: Vec<String>,
}

/// Read the first candidate that can be opened.
pub fn load_first<P: AsRef<Path>>(candidates: &[P]) -> Result<ListSource, ListError> {
    for candidate in candidates {
        let path = candidate.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "list candidate not readable");
                continue;
            }
        };
        let entries = read_entries(BufReader::new(file), path)?;
        return Ok(ListSource {
            path: path.to_path_buf(),
            entries,
        });
    }
    Err(ListError::NotFound {
        candidates: candidates.iter().map(|p| p.as_ref().to_path_buf()).collect(),
    })
}

pub fn read_entries<R: BufRead>(reader: R, path: &Path) -> Result<Vec<String>, ListError> {
    let mut entries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ListError::Read {
            path: path.to_path_buf(),
            line: line_no + 1,
            source,
        })?;
        if let Some(entry) = parse_line(&line) {
            entries.push(entry.to_string());
        }
    }
    Ok(entries)
}

/// Entries of an in-memory list such as the compiled-in seed list.
pub fn parse_str(text: &str) -> Vec<String> {
    text.lines().filter_map(parse_line).map(str::to_string).collect()
}

fn parse_line(line: &str) -> Option<&str> {
    let trimmed = line.split('#').next().unwrap_or("").trim();
    trimmed.split_whitespace().next()
}
