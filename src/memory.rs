//! Persistent agent memory: a Markdown file of named sections.
//!
//! The file is parsed into a [`MemoryDocument`] (title, preamble, ordered
//! sections of entry lines), updated as data, and rendered back only when
//! saved. [`MemoryStore`] owns the file and serialises read-modify-write
//! cycles within the process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::error::{StudyError, StudyResult};
use crate::event_log::ensure_parent;

pub const USER_PROFILE: &str = "User Profile";
pub const SUBJECTS_AND_COLLECTIONS: &str = "Subjects & Collections";
pub const ANKI_DECKS: &str = "Anki Decks";
pub const RECENT_ACTIVITY: &str = "Recent Activity";
pub const USER_PREFERENCES: &str = "User Preferences";

/// Sections a memory file may contain, in template order.
pub const SECTIONS: [&str; 5] = [
    USER_PROFILE,
    SUBJECTS_AND_COLLECTIONS,
    ANKI_DECKS,
    RECENT_ACTIVITY,
    USER_PREFERENCES,
];

const DEFAULT_TITLE: &str = "# Agent Memory";
const LAST_UPDATED_PREFIX: &str = "<!-- Last updated:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Append,
    Replace,
}

impl FromStr for UpdateMode {
    type Err = StudyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(UpdateMode::Append),
            "replace" => Ok(UpdateMode::Replace),
            other => Err(StudyError::InvalidInput(format!(
                "mode must be 'append' or 'replace', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateMode::Append => "append",
            UpdateMode::Replace => "replace",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDocument {
    pub title: String,
    /// Lines between the title and the first section, minus the
    /// last-updated marker.
    pub preamble: Vec<String>,
    /// Section name and its non-blank lines, in file order.
    pub sections: Vec<(String, Vec<String>)>,
}

impl Default for MemoryDocument {
    /// The template: a title and every known section, empty.
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            preamble: Vec::new(),
            sections: SECTIONS
                .iter()
                .map(|s| (s.to_string(), Vec::new()))
                .collect(),
        }
    }
}

impl MemoryDocument {
    pub fn parse(text: &str) -> Self {
        let mut title = None;
        let mut preamble = Vec::new();
        let mut sections: Vec<(String, Vec<String>)> = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(name) = trimmed.strip_prefix("## ") {
                sections.push((name.trim().to_string(), Vec::new()));
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with(LAST_UPDATED_PREFIX) {
                continue;
            }
            match sections.last_mut() {
                Some((_, lines)) => lines.push(line.trim_end().to_string()),
                None if title.is_none() && trimmed.starts_with("# ") => {
                    title = Some(trimmed.to_string())
                }
                None => preamble.push(line.trim_end().to_string()),
            }
        }

        Self {
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            preamble,
            sections,
        }
    }

    /// Render to Markdown with a fresh last-updated marker.
    pub fn to_markdown(&self, updated_at: &str) -> String {
        let mut out = String::new();
        out.push_str(&self.title);
        out.push('\n');
        out.push_str(&format!("{} {} -->\n", LAST_UPDATED_PREFIX, updated_at));
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for (name, lines) in &self.sections {
            out.push_str(&format!("\n## {}\n", name));
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    pub fn section(&self, name: &str) -> Option<&[String]> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, lines)| lines.as_slice())
    }

    /// Apply `content` to `section`. Unknown section names are rejected;
    /// a known section missing from the file is added at the end.
    pub fn update(&mut self, section: &str, mode: UpdateMode, content: &str) -> StudyResult<()> {
        if !SECTIONS.contains(&section) {
            return Err(StudyError::InvalidInput(format!(
                "invalid section '{}'; must be one of: {}",
                section,
                SECTIONS.join(", ")
            )));
        }

        let new_lines: Vec<String> = content
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();

        let lines = self.section_mut(section);
        match mode {
            UpdateMode::Append => lines.extend(new_lines),
            UpdateMode::Replace => *lines = new_lines,
        }
        Ok(())
    }

    /// Keep only the newest `cap` dated entries (`- [...]`) of Recent
    /// Activity. Other lines in the section are left alone.
    pub fn cap_recent_activity(&mut self, cap: usize) {
        let Some((_, lines)) = self.sections.iter_mut().find(|(n, _)| n == RECENT_ACTIVITY) else {
            return;
        };
        let dated = lines.iter().filter(|l| is_dated_entry(l)).count();
        let mut to_drop = dated.saturating_sub(cap);
        lines.retain(|l| {
            if to_drop > 0 && is_dated_entry(l) {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
    }

    fn section_mut(&mut self, name: &str) -> &mut Vec<String> {
        let pos = match self.sections.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.sections.push((name.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos].1
    }
}

fn is_dated_entry(line: &str) -> bool {
    line.trim_start().starts_with("- [")
}

/// File-backed memory shared by the tools and the ambient poller.
pub struct MemoryStore {
    path: PathBuf,
    recent_activity_cap: usize,
    lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>, recent_activity_cap: usize) -> Self {
        Self {
            path: path.into(),
            recent_activity_cap,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document; the template if the file is missing or blank.
    pub async fn load(&self) -> StudyResult<MemoryDocument> {
        let _guard = self.lock.lock().await;
        self.read_document()
    }

    /// Apply one update and save.
    pub async fn update(&self, section: &str, mode: UpdateMode, content: &str) -> StudyResult<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document()?;
        doc.update(section, mode, content)?;
        doc.cap_recent_activity(self.recent_activity_cap);
        self.write_document(&doc)
    }

    /// Append a dated line to Recent Activity.
    pub async fn record_activity(&self, action: &str, description: &str) -> StudyResult<()> {
        let today = chrono::Utc::now().format("%Y-%m-%d");
        let line = format!("- [{}] {}: {}", today, action, description);
        self.update(RECENT_ACTIVITY, UpdateMode::Append, &line).await
    }

    fn read_document(&self) -> StudyResult<MemoryDocument> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if !text.trim().is_empty() => Ok(MemoryDocument::parse(&text)),
            Ok(_) => Ok(MemoryDocument::default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemoryDocument::default()),
            Err(e) => Err(StudyError::persistence(&self.path, e)),
        }
    }

    fn write_document(&self, doc: &MemoryDocument) -> StudyResult<()> {
        ensure_parent(&self.path)?;
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
        let tmp = self.path.with_extension("md.tmp");
        std::fs::write(&tmp, doc.to_markdown(&now)).map_err(|e| StudyError::persistence(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StudyError::persistence(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "# Agent Memory\n\
<!-- Last updated: 2026-01-01 00:00 UTC -->\n\
Notes the agent keeps between sessions.\n\
\n\
## User Profile\n\
- Third-year maths student\n\
\n\
## Recent Activity\n\
<!-- newest last -->\n\
- [2026-01-01] ingest: a\n\
- [2026-01-02] ingest: b\n";

    #[test]
    fn parse_keeps_structure() {
        let doc = MemoryDocument::parse(SAMPLE);
        assert_eq!(doc.title, "# Agent Memory");
        assert_eq!(doc.preamble, vec!["Notes the agent keeps between sessions."]);
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.section(RECENT_ACTIVITY).unwrap().len(), 3);
    }

    #[test]
    fn render_refreshes_timestamp_and_reparses() {
        let doc = MemoryDocument::parse(SAMPLE);
        let md = doc.to_markdown("2026-10-14 12:00 UTC");
        assert!(md.contains("<!-- Last updated: 2026-10-14 12:00 UTC -->"));
        assert!(!md.contains("2026-01-01 00:00 UTC"));
        assert_eq!(MemoryDocument::parse(&md), doc);
    }

    #[test]
    fn append_and_replace() {
        let mut doc = MemoryDocument::parse(SAMPLE);
        doc.update(USER_PROFILE, UpdateMode::Append, "- Prefers short cards\n\n")
            .unwrap();
        assert_eq!(doc.section(USER_PROFILE).unwrap().len(), 2);

        doc.update(USER_PROFILE, UpdateMode::Replace, "- Fourth-year").unwrap();
        assert_eq!(doc.section(USER_PROFILE).unwrap(), &["- Fourth-year".to_string()]);
    }

    #[test]
    fn missing_known_section_is_added() {
        let mut doc = MemoryDocument::parse(SAMPLE);
        doc.update(ANKI_DECKS, UpdateMode::Append, "- Maths::Groups").unwrap();
        assert_eq!(doc.sections.last().unwrap().0, ANKI_DECKS);
    }

    #[test]
    fn unknown_section_rejected() {
        let mut doc = MemoryDocument::default();
        let err = doc.update("Secrets", UpdateMode::Append, "x").unwrap_err();
        assert!(matches!(err, StudyError::InvalidInput(_)));
    }

    #[test]
    fn cap_drops_oldest_dated_entries_only() {
        let mut doc = MemoryDocument::parse(SAMPLE);
        doc.update(RECENT_ACTIVITY, UpdateMode::Append, "- [2026-01-03] ingest: c")
            .unwrap();
        doc.cap_recent_activity(2);
        let lines = doc.section(RECENT_ACTIVITY).unwrap();
        assert_eq!(
            lines,
            &[
                "<!-- newest last -->".to_string(),
                "- [2026-01-02] ingest: b".to_string(),
                "- [2026-01-03] ingest: c".to_string(),
            ]
        );
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("append".parse::<UpdateMode>().unwrap(), UpdateMode::Append);
        assert!("merge".parse::<UpdateMode>().is_err());
    }

    #[tokio::test]
    async fn store_creates_file_from_template() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new(tmp.path().join("mem").join(".agent_memory.md"), 50);
        store
            .update(SUBJECTS_AND_COLLECTIONS, UpdateMode::Append, "- algebra — Algebra")
            .await
            .unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        for section in SECTIONS {
            assert!(text.contains(&format!("## {}", section)));
        }
        assert!(text.contains("- algebra — Algebra"));
    }

    #[tokio::test]
    async fn store_applies_cap() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new(tmp.path().join("m.md"), 3);
        for i in 0..5 {
            store.record_activity("test", &format!("entry {}", i)).await.unwrap();
        }
        let doc = store.load().await.unwrap();
        let lines = doc.section(RECENT_ACTIVITY).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("entry 2"));
    }
}
