//! Learnings Index - the durable, category-grouped record of promoted signals
//!
//! LEARNINGS.md holds a title line followed by `## <Category>` sections, each
//! a list of `- [LRN-...] <content> (promoted to <target>)` bullets. Sections
//! appear in first-promotion order.
//!
//! Sections are found by their exact header text, which is derived from the
//! signal category with [`category_title`]. Changing that transform would stop
//! existing headers from matching and new duplicate sections would appear, so
//! it must stay stable for the lifetime of an index document.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::persist::write_atomic;

/// File name of the index inside the learnings directory
pub const LEARNINGS_INDEX: &str = "LEARNINGS.md";

/// First line of a new index document
pub const INDEX_TITLE: &str = "# Learnings";

/// Section used for signals without a category
pub const DEFAULT_CATEGORY_TITLE: &str = "General";

/// Display title for a category: separators become spaces, words title-cased
pub fn category_title(category: &str) -> String {
    if category.trim().is_empty() {
        return DEFAULT_CATEGORY_TITLE.to_string();
    }
    title_case(&category.replace(['-', '_'], " "))
}

/// Uppercase the first letter of every run of letters, lowercase the rest
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Format one index bullet
pub fn format_entry(learning_id: &str, content: &str, target: &str) -> String {
    // Bullets are single lines; a stray newline would split the section
    format!(
        "- [{}] {} (promoted to {})",
        learning_id,
        single_line(content),
        single_line(target)
    )
}

fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ").trim().to_string()
}

/// Insert `line` at the end of the `## <category_title>` section
///
/// The section is created at the end of the document when it does not exist.
/// Nothing outside the target section changes.
pub fn insert_entry(document: &str, category_title: &str, line: &str) -> String {
    let header = format!("## {}", category_title);
    let line = format!("{}\n", line.trim_end());

    let (doc, header_end) = match find_header(document, &header) {
        Some(end) => (document.to_string(), end),
        None => {
            let base = document.trim_end();
            let doc = format!("{}\n\n{}\n", base, header);
            let end = base.len() + 2 + header.len();
            (doc, end)
        }
    };

    match doc[header_end..].find("\n## ") {
        Some(offset) => {
            let next_section = header_end + offset;
            format!(
                "{}\n{}{}",
                doc[..next_section].trim_end(),
                line,
                &doc[next_section..]
            )
        }
        None => format!("{}\n{}", doc.trim_end(), line),
    }
}

/// Byte offset just past the header line matching `header` exactly
fn find_header(document: &str, header: &str) -> Option<usize> {
    let mut offset = 0;
    for line in document.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == header {
            return Some(offset + header.len());
        }
        offset += line.len();
    }
    None
}

/// The LEARNINGS.md document on disk
#[derive(Debug, Clone)]
pub struct LearningsIndex {
    path: PathBuf,
}

impl LearningsIndex {
    /// Index stored as LEARNINGS.md inside `learnings_dir`
    pub fn new(learnings_dir: &Path) -> Self {
        Self {
            path: learnings_dir.join(LEARNINGS_INDEX),
        }
    }

    /// Path of the index document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document text, or a fresh title when the file is missing
    pub fn load(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(format!("{}\n", INDEX_TITLE));
        }
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
    }

    /// Add a bullet under the category's section and persist the document
    pub fn add_entry(&self, category_title: &str, line: &str) -> Result<()> {
        let document = self.load()?;
        let updated = insert_entry(&document, category_title, line);
        write_atomic(&self.path, updated.as_bytes())?;
        debug!("Added entry under '{}' in {}", category_title, self.path.display());
        Ok(())
    }
}
