//! Edit summaries between consecutive versions

use crate::files::FileSet;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt;

/// What changed between a version and its parent
///
/// Computed once when the version is committed and stored with it, so the
/// summary of a version never changes afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditSummary {
    /// Paths present only in the new version
    pub added: Vec<String>,
    /// Paths present only in the parent
    pub removed: Vec<String>,
    /// Paths whose content changed
    pub modified: Vec<String>,
    /// Inserted lines across all files
    pub lines_inserted: usize,
    /// Deleted lines across all files
    pub lines_deleted: usize,
    /// Free-text description from the engine or the restore operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EditSummary {
    /// Compare `next` against `previous` (`None` for the first version)
    #[must_use]
    pub fn between(previous: Option<&FileSet>, next: &FileSet) -> Self {
        let empty = FileSet::new();
        let previous = previous.unwrap_or(&empty);
        let mut summary = Self::default();

        for (path, content) in next.iter() {
            match previous.get(path) {
                None => {
                    summary.added.push(path.to_string());
                    summary.lines_inserted += content.lines().count();
                }
                Some(old) if old != content => {
                    summary.modified.push(path.to_string());
                    let diff = TextDiff::from_lines(old, content);
                    for change in diff.iter_all_changes() {
                        match change.tag() {
                            ChangeTag::Insert => summary.lines_inserted += 1,
                            ChangeTag::Delete => summary.lines_deleted += 1,
                            ChangeTag::Equal => {}
                        }
                    }
                }
                Some(_) => {}
            }
        }

        for (path, content) in previous.iter() {
            if next.get(path).is_none() {
                summary.removed.push(path.to_string());
                summary.lines_deleted += content.lines().count();
            }
        }

        summary
    }

    /// Attach a free-text description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True when nothing changed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

impl fmt::Display for EditSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{} -{} ~{} files (+{}/-{} lines)",
            self.added.len(),
            self.removed.len(),
            self.modified.len(),
            self.lines_inserted,
            self.lines_deleted
        )?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn files(entries: &[(&str, &str)]) -> FileSet {
        entries
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect()
    }

    #[test]
    fn first_version_is_all_additions() {
        let next = files(&[("index.html", "a\nb\n"), ("game.js", "x\n")]);
        let summary = EditSummary::between(None, &next);
        assert_eq!(summary.added, vec!["game.js", "index.html"]);
        assert_eq!(summary.lines_inserted, 3);
        assert!(summary.removed.is_empty());
    }

    #[test]
    fn detects_modified_and_removed() {
        let prev = files(&[("game.js", "let score = 0;\ncolor = 'white';\n"), ("old.css", "x\n")]);
        let next = files(&[("game.js", "let score = 0;\ncolor = 'red';\n")]);
        let summary = EditSummary::between(Some(&prev), &next);
        assert_eq!(summary.modified, vec!["game.js"]);
        assert_eq!(summary.removed, vec!["old.css"]);
        assert_eq!(summary.lines_inserted, 1);
        assert_eq!(summary.lines_deleted, 2);
    }

    #[test]
    fn identical_sets_are_empty() {
        let set = files(&[("a", "1")]);
        assert!(EditSummary::between(Some(&set), &set).is_empty());
    }

    #[test]
    fn display_includes_description() {
        let summary = EditSummary::default().with_description("restored");
        assert!(summary.to_string().ends_with(": restored"));
    }
}
