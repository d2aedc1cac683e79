//! Collection-key and topic-label derivation from source filenames.
//!
//! Both functions are pure: the same filename always yields the same key
//! and label, which is what lets the ambient poller and the ingest tool
//! agree on where a document lives without coordinating.

use std::path::Path;

/// Shortest key the similarity index accepts.
pub const MIN_KEY_LEN: usize = 3;
/// Longest key the similarity index accepts.
pub const MAX_KEY_LEN: usize = 63;

const SHORT_KEY_SUFFIX: &str = "_col";

/// Derive a collection key from a filename.
///
/// Directory and extension are dropped, the stem is lowercased, every run
/// of characters outside `[a-z0-9]` becomes one underscore, and leading or
/// trailing underscores are stripped. Keys shorter than [`MIN_KEY_LEN`]
/// get a fixed suffix; keys longer than [`MAX_KEY_LEN`] are truncated.
///
/// ```rust
/// use study_harness::collection::derive_collection_key;
///
/// assert_eq!(derive_collection_key("Linear Algebra Notes.pdf"), "linear_algebra_notes");
/// assert_eq!(derive_collection_key("MT2505-Eigenvalues.pdf"), "mt2505_eigenvalues");
/// assert_eq!(derive_collection_key("x.pdf"), "x_col");
/// ```
pub fn derive_collection_key(filename: &str) -> String {
    let stem = file_stem(filename);
    let lowered = stem.to_lowercase();
    let collapsed = collapse_non_alnum(lowered.trim());
    let mut key = collapsed.trim_matches('_').to_string();

    if key.len() < MIN_KEY_LEN {
        key.push_str(SHORT_KEY_SUFFIX);
        // An all-symbol stem leaves "_col"; strip so re-deriving is stable.
        key = key.trim_start_matches('_').to_string();
    }

    if key.len() > MAX_KEY_LEN {
        key.truncate(MAX_KEY_LEN);
        key = key.trim_end_matches('_').to_string();
    }

    key
}

/// Best-effort human topic label from a filename.
///
/// ```rust
/// use study_harness::collection::topic_from_filename;
///
/// assert_eq!(topic_from_filename("Eigenvalues_Lecture_Notes.pdf"), "Eigenvalues Lecture Notes");
/// assert_eq!(topic_from_filename("linearAlgebra-week3.pdf"), "Linear Algebra Week3");
/// ```
pub fn topic_from_filename(filename: &str) -> String {
    let stem = file_stem(filename);

    let mut spaced = String::with_capacity(stem.len());
    let mut in_separator_run = false;
    for c in stem.chars() {
        if c == '_' || c == '-' {
            if !in_separator_run {
                spaced.push(' ');
            }
            in_separator_run = true;
        } else {
            spaced.push(c);
            in_separator_run = false;
        }
    }

    let mut split = String::with_capacity(spaced.len() + 8);
    let mut prev: Option<char> = None;
    for c in spaced.chars() {
        if let Some(p) = prev {
            if p.is_ascii_lowercase() && c.is_ascii_uppercase() {
                split.push(' ');
            }
        }
        split.push(c);
        prev = Some(c);
    }

    title_case(split.trim())
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn collapse_non_alnum(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_run = false;
    for c in s.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Uppercase the first letter of each alphabetic run, lowercase the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}
