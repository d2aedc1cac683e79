//! Markdown table of processed source files.
//!
//! The file starts with a fixed header and gains one pipe-delimited row per
//! processing outcome:
//!
//! ```text
//! | Filename | Date Added | Date Processed | Status | Collection | Topic |
//! |----------|------------|----------------|--------|------------|-------|
//! | Eigenvalues_Notes.pdf | 2026-10-14 09:00 UTC | 2026-10-14 09:00 UTC | success | eigenvalues_notes | Eigenvalues Notes |
//! ```
//!
//! Rows are only ever appended. A filename appearing in any row is
//! "known" and will be skipped by the poller, whatever its status.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{StudyError, StudyResult};
use crate::event_log::{append_locked, ensure_parent};

pub const MANIFEST_HEADER: &str = "# Processed PDF Manifest\n\
<!-- Auto-managed by the ambient poller. Rows are append-only. -->\n\
\n\
| Filename | Date Added | Date Processed | Status | Collection | Topic |\n\
|----------|------------|----------------|--------|------------|-------|\n";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Terminal outcome recorded for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Success,
    IngestionFailed,
    AgentFailed,
}

impl ManifestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestStatus::Success => "success",
            ManifestStatus::IngestionFailed => "ingestion_failed",
            ManifestStatus::AgentFailed => "agent_failed",
        }
    }

    pub fn is_failure(self) -> bool {
        self != ManifestStatus::Success
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManifestStatus {
    type Err = String;

    /// Accepts the plain labels plus decorated forms such as `✅ complete`
    /// or `❌ agent_failed` that hand-edited manifests tend to contain.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s
            .trim()
            .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase();
        match bare.as_str() {
            "success" | "complete" => Ok(ManifestStatus::Success),
            "ingestion_failed" => Ok(ManifestStatus::IngestionFailed),
            "agent_failed" => Ok(ManifestStatus::AgentFailed),
            other => Err(format!("unknown manifest status: {}", other)),
        }
    }
}

/// One parsed data row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub date_added: String,
    pub date_processed: String,
    /// Raw status cell; see [`ManifestEntry::parsed_status`].
    pub status: String,
    pub collection: String,
    pub topic: String,
}

impl ManifestEntry {
    pub fn parsed_status(&self) -> Option<ManifestStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the header if the file does not exist yet.
    pub fn ensure(&self) -> StudyResult<()> {
        if self.path.exists() {
            return Ok(());
        }
        ensure_parent(&self.path)?;
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(MANIFEST_HEADER.as_bytes())
                    .map_err(|e| StudyError::persistence(&self.path, e))
            }
            // Another writer created it first.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(StudyError::persistence(&self.path, e)),
        }
    }

    /// Full file text, creating the file first if needed.
    pub fn read_raw(&self) -> StudyResult<String> {
        self.ensure()?;
        std::fs::read_to_string(&self.path).map_err(|e| StudyError::persistence(&self.path, e))
    }

    /// First column of every data row.
    pub fn known_filenames(&self) -> StudyResult<BTreeSet<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|entry| entry.filename)
            .collect())
    }

    /// Every data row, in file order.
    pub fn entries(&self) -> StudyResult<Vec<ManifestEntry>> {
        Ok(parse_rows(&self.read_raw()?))
    }

    /// Append one row stamped with the current UTC time.
    pub fn append(
        &self,
        filename: &str,
        status: ManifestStatus,
        collection: &str,
        topic: &str,
    ) -> StudyResult<()> {
        self.ensure()?;
        let now = chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let row = format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            cell(filename),
            now,
            now,
            status,
            cell(collection),
            cell(topic)
        );
        append_locked(&self.path, &row)
    }
}

/// Encode a value for one table cell.
///
/// Backslash, pipe and line breaks are escaped anywhere. Whitespace at
/// either end is written as `\u{..}` so the reader's trim cannot eat it.
pub fn cell(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let first = chars.iter().position(|c| !c.is_whitespace());
    let last = chars.iter().rposition(|c| !c.is_whitespace());
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        let at_edge = match (first, last) {
            (Some(first), Some(last)) => i < first || i > last,
            _ => true,
        };
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if at_edge && c.is_whitespace() => {
                out.push_str(&format!("\\u{{{:x}}}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`cell`]. Unknown escapes are kept as written.
fn uncell(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('|') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') if chars.peek() == Some(&'{') => {
                chars.next();
                let hex: String = chars.by_ref().take_while(|&h| h != '}').collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u{");
                        out.push_str(&hex);
                        out.push('}');
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split a row on unescaped pipes, returning trimmed raw cells between the
/// outer delimiters.
fn split_cells(line: &str) -> Vec<&str> {
    let mut cells = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '|' => {
                cells.push(line[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    cells.push(line[start..].trim());
    // Text before the leading pipe, and after the closing one if present.
    cells.remove(0);
    if cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    cells
}

fn is_header(cells: &[String]) -> bool {
    cells.first().map(String::as_str) == Some("Filename")
        && cells.get(1).map(String::as_str) == Some("Date Added")
}

fn is_separator(cells: &[String]) -> bool {
    cells
        .iter()
        .all(|c| !c.is_empty() && c.chars().all(|ch| ch == '-' || ch == ':'))
}

fn parse_rows(content: &str) -> Vec<ManifestEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('|'))
        .filter_map(|line| {
            let cells: Vec<String> = split_cells(line).into_iter().map(uncell).collect();
            if is_header(&cells) || is_separator(&cells) {
                return None;
            }
            let filename = cells.first().cloned().unwrap_or_default();
            if filename.is_empty() {
                return None;
            }
            let get = |i: usize| cells.get(i).cloned().unwrap_or_default();
            Some(ManifestEntry {
                filename,
                date_added: get(1),
                date_processed: get(2),
                status: get(3),
                collection: get(4),
                topic: get(5),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn created_with_header_on_first_access() {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path().join("nested").join("manifest.md"));
        assert!(store.known_filenames().unwrap().is_empty());
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.starts_with("# Processed PDF Manifest"));
        assert!(raw.contains("| Filename | Date Added |"));
    }

    #[test]
    fn append_then_known() {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path().join("manifest.md"));
        store
            .append("A.pdf", ManifestStatus::Success, "a_col", "A")
            .unwrap();
        store
            .append("B.pdf", ManifestStatus::AgentFailed, "b_col", "B")
            .unwrap();

        let known = store.known_filenames().unwrap();
        assert_eq!(
            known.into_iter().collect::<Vec<_>>(),
            vec!["A.pdf".to_string(), "B.pdf".to_string()]
        );

        let entries = store.entries().unwrap();
        assert_eq!(entries[1].parsed_status(), Some(ManifestStatus::AgentFailed));
        assert_eq!(entries[0].date_added, entries[0].date_processed);
        assert!(entries[0].date_added.ends_with(" UTC"));
    }

    #[test]
    fn duplicate_rows_are_kept_but_counted_once() {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path().join("manifest.md"));
        for _ in 0..2 {
            store
                .append("A.pdf", ManifestStatus::IngestionFailed, "a_col", "A")
                .unwrap();
        }
        assert_eq!(store.entries().unwrap().len(), 2);
        assert_eq!(store.known_filenames().unwrap().len(), 1);
    }

    #[test]
    fn ignores_header_separator_and_prose() {
        let content = "# Title\nSome prose | with a pipe\n\
            | Filename | Date Added | Date Processed | Status | Collection | Topic |\n\
            |----------|---|---|---|---|---|\n\
            | x.pdf | d | d | ✅ complete | x_col | X |\n\
            |  | d | d | success | c | t |\n";
        let rows = parse_rows(content);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filename, "x.pdf");
        assert_eq!(rows[0].parsed_status(), Some(ManifestStatus::Success));
    }

    #[test]
    fn pipes_in_values_do_not_shift_columns() {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path().join("manifest.md"));
        store
            .append("odd.pdf", ManifestStatus::Success, "odd", "A | B")
            .unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries[0].collection, "odd");
        assert_eq!(entries[0].topic, "A | B");
    }

    #[test]
    fn awkward_filenames_read_back_exactly() {
        let tmp = TempDir::new().unwrap();
        let store = ManifestStore::new(tmp.path().join("manifest.md"));
        let names = [
            "Filename",
            "Filenames_Lecture.pdf",
            "Filename Index.pdf",
            "A|B.pdf",
            " leading.pdf",
            "trailing .pdf",
            "back\\slash\\|.pdf",
            "---.pdf",
            "line\nbreak.pdf",
            "\\u{41}.pdf",
        ];
        for name in names {
            store
                .append(name, ManifestStatus::Success, "c", "T")
                .unwrap();
        }
        let known = store.known_filenames().unwrap();
        for name in names {
            assert!(known.contains(name), "{:?} missing from {:?}", name, known);
        }
        assert_eq!(known.len(), names.len());
        assert!(store
            .entries()
            .unwrap()
            .iter()
            .all(|e| e.status == "success" && e.collection == "c"));
    }

    #[test]
    fn only_the_exact_header_row_is_skipped() {
        let content = "| Filename | Date Added | Date Processed | Status | Collection | Topic |\n\
            | :---: | --- | - | - | - | - |\n\
            | Filename | d | d | success | f | F |\n\
            |---| already split |\n";
        let rows = parse_rows(content);
        let names: Vec<&str> = rows.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["Filename", "---"]);
    }

    #[test]
    fn cell_escapes_edges_and_delimiters() {
        assert_eq!(cell("plain.pdf"), "plain.pdf");
        assert_eq!(cell("a|b"), "a\\|b");
        assert_eq!(cell(" x "), "\\u{20}x\\u{20}");
        assert_eq!(cell("in side"), "in side");
        assert_eq!(uncell(&cell(" \\|\t ")), " \\|\t ");
    }

    #[test]
    fn status_parsing() {
        assert_eq!("❌ ingestion_failed".parse(), Ok(ManifestStatus::IngestionFailed));
        assert!("pending".parse::<ManifestStatus>().is_err());
    }
}
