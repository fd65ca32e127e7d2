//! Source-control delta detection for incremental reindexing
//!
//! Renames are reported by the VCS as a distinct status but treated as
//! delete+add of two paths; entity ids do not migrate across a rename.

use tracing::debug;

use crate::errors::Result;
use crate::git::runner::CommandRunner;

/// Path sets changed between two commits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// (old path, new path) pairs, already folded into deleted/added
    pub renamed: Vec<(String, String)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths whose entities must be purged before re-parsing
    pub fn paths_to_delete(&self) -> impl Iterator<Item = &str> {
        self.deleted
            .iter()
            .chain(self.modified.iter())
            .map(String::as_str)
    }

    /// Paths that need (re-)parsing
    pub fn paths_to_index(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .map(String::as_str)
    }
}

/// Commit currently checked out, if the tree is a repository
pub async fn current_commit(runner: &dyn CommandRunner) -> Result<String> {
    let output = runner.run(&["rev-parse", "HEAD"]).await?;
    Ok(output.trim().to_string())
}

/// Compute the delta between a previously indexed commit and HEAD
pub async fn detect_delta(runner: &dyn CommandRunner, old_commit: &str) -> Result<ChangeSet> {
    let output = runner
        .run(&["diff", "--name-status", old_commit, "HEAD"])
        .await?;
    let delta = parse_name_status(&output);
    debug!(
        added = delta.added.len(),
        modified = delta.modified.len(),
        deleted = delta.deleted.len(),
        renamed = delta.renamed.len(),
        "delta computed"
    );
    Ok(delta)
}

/// Parse `diff --name-status` output. Lines are tab-separated:
/// `A\tpath`, `M\tpath`, `D\tpath`, `R<score>\told\tnew`.
pub fn parse_name_status(output: &str) -> ChangeSet {
    let mut delta = ChangeSet::default();
    for line in output.lines() {
        let mut parts = line.split('\t');
        let status = match parts.next() {
            Some(s) if !s.is_empty() => s,
            _ => continue,
        };
        match status.chars().next() {
            Some('A') => {
                if let Some(path) = parts.next() {
                    delta.added.push(path.to_string());
                }
            }
            Some('M') => {
                if let Some(path) = parts.next() {
                    delta.modified.push(path.to_string());
                }
            }
            Some('D') => {
                if let Some(path) = parts.next() {
                    delta.deleted.push(path.to_string());
                }
            }
            Some('R') => {
                if let (Some(old), Some(new)) = (parts.next(), parts.next()) {
                    delta.deleted.push(old.to_string());
                    delta.added.push(new.to_string());
                    delta.renamed.push((old.to_string(), new.to_string()));
                }
            }
            // Copies and mode changes reparse the destination path
            Some('C') | Some('T') => {
                if let Some(path) = parts.next_back() {
                    delta.modified.push(path.to_string());
                }
            }
            _ => {}
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::runner::ScriptedRunner;

    #[test]
    fn parses_all_statuses() {
        let output = "A\tsrc/new.go\nM\tsrc/changed.go\nD\tsrc/gone.go\nR100\tsrc/old.go\tsrc/moved.go\n";
        let delta = parse_name_status(output);
        assert_eq!(delta.added, vec!["src/new.go", "src/moved.go"]);
        assert_eq!(delta.modified, vec!["src/changed.go"]);
        assert_eq!(delta.deleted, vec!["src/gone.go", "src/old.go"]);
        assert_eq!(
            delta.renamed,
            vec![("src/old.go".to_string(), "src/moved.go".to_string())]
        );
    }

    #[test]
    fn delete_and_index_sets_cover_modifications() {
        let delta = parse_name_status("M\ta.go\nA\tb.go\nD\tc.go\n");
        let to_delete: Vec<&str> = delta.paths_to_delete().collect();
        let to_index: Vec<&str> = delta.paths_to_index().collect();
        assert!(to_delete.contains(&"a.go") && to_delete.contains(&"c.go"));
        assert!(to_index.contains(&"a.go") && to_index.contains(&"b.go"));
        assert!(!to_index.contains(&"c.go"));
    }

    #[test]
    fn empty_output_is_empty_delta() {
        assert!(parse_name_status("").is_empty());
    }

    #[tokio::test]
    async fn detect_delta_runs_name_status() {
        let runner = ScriptedRunner::new()
            .respond("diff --name-status abc123 HEAD", "M\tsrc/main.go\n");
        let delta = detect_delta(&runner, "abc123").await.unwrap();
        assert_eq!(delta.modified, vec!["src/main.go"]);
    }

    #[tokio::test]
    async fn current_commit_trims_output() {
        let runner = ScriptedRunner::new().respond("rev-parse HEAD", "deadbeef\n");
        assert_eq!(current_commit(&runner).await.unwrap(), "deadbeef");
    }
}
