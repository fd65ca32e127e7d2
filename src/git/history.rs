//! Git history correlation for indexed functions
//!
//! Maps function locations onto commit history: line-range logs, reverse
//! pickaxe for first introduction, and blame aggregation. All VCS access
//! goes through the injected runner.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap as ParamMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use cozo::DataValue;

use crate::errors::{CieError, Result};
use crate::git::runner::CommandRunner;
use crate::store::{dv_int, dv_str, RelationStore};

const LOG_FORMAT: &str = "--format=%h|%an|%ad|%s";
/// Keeps `%ad` in RFC 3339 form so commit dates parse into timestamps
const DATE_FORMAT: &str = "--date=iso-strict";
const FILE_HISTORY_LIMIT: &str = "20";

/// One commit in a history listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitSummary {
    pub hash: String,
    pub author: String,
    /// Absent when the date field was missing or malformed
    pub date: Option<DateTime<FixedOffset>>,
    pub subject: String,
}

/// History of a single function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionHistory {
    pub function: String,
    pub file_path: String,
    pub commits: Vec<CommitSummary>,
    /// Set when line-range history degraded to file-level history
    pub note: Option<String>,
}

/// Per-author blame aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorStat {
    pub author: String,
    pub lines: usize,
    pub percentage: f64,
    /// First commit seen for this author in the stream, i.e. the most
    /// recent one
    pub most_recent_commit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlameReport {
    pub function: String,
    pub file_path: String,
    pub total_lines: usize,
    pub authors: Vec<AuthorStat>,
}

#[derive(Debug, Clone)]
struct FunctionLocation {
    name: String,
    file_path: String,
    start_line: i64,
    end_line: i64,
}

/// Correlates indexed functions with repository history
pub struct GitCorrelator {
    store: RelationStore,
    runner: Arc<dyn CommandRunner>,
}

impl GitCorrelator {
    pub fn new(store: RelationStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self { store, runner }
    }

    /// Commit log for one function, by line range. Falls back to
    /// file-level history with a visible note when the line-range log
    /// fails (renames, heavy churn).
    pub async fn function_history(&self, name: &str) -> Result<FunctionHistory> {
        let location = self.locate_single(name).await?;
        let range = format!(
            "{},{}:{}",
            location.start_line, location.end_line, location.file_path
        );

        match self
            .runner
            .run(&["log", "-L", &range, LOG_FORMAT, DATE_FORMAT, "--no-patch"])
            .await
        {
            Ok(output) => Ok(FunctionHistory {
                function: location.name,
                file_path: location.file_path,
                commits: parse_commit_lines(&output),
                note: None,
            }),
            Err(e) => {
                warn!(function = name, error = %e, "line-range log failed, using file history");
                let output = self
                    .runner
                    .run(&[
                        "log",
                        LOG_FORMAT,
                        DATE_FORMAT,
                        "-n",
                        FILE_HISTORY_LIMIT,
                        "--",
                        &location.file_path,
                    ])
                    .await?;
                Ok(FunctionHistory {
                    function: location.name,
                    file_path: location.file_path,
                    commits: parse_commit_lines(&output),
                    note: Some(
                        "line-range history unavailable (rename or heavy churn); showing file-level history"
                            .to_string(),
                    ),
                })
            }
        }
    }

    /// Reverse pickaxe: the first commit whose diff introduced `pattern`.
    /// `scope` narrows to a function's file when it names an indexed
    /// function, otherwise it is passed through as a pathspec.
    pub async fn find_introduction(
        &self,
        pattern: &str,
        scope: Option<&str>,
    ) -> Result<Option<CommitSummary>> {
        if pattern.trim().is_empty() {
            return Err(CieError::input("pattern must not be empty"));
        }
        let mut args: Vec<String> = vec![
            "log".into(),
            "-S".into(),
            pattern.into(),
            "--reverse".into(),
            LOG_FORMAT.into(),
            DATE_FORMAT.into(),
            "-n".into(),
            "1".into(),
        ];
        if let Some(scope) = scope {
            let pathspec = match self.locate(scope).await?.as_slice() {
                [single] => single.file_path.clone(),
                _ => scope.to_string(),
            };
            args.push("--".into());
            args.push(pathspec);
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.runner.run(&arg_refs).await?;
        Ok(parse_commit_lines(&output).into_iter().next())
    }

    /// Per-author line ownership of one function via blame porcelain
    pub async fn blame_function(&self, name: &str) -> Result<BlameReport> {
        let location = self.locate_single(name).await?;
        let range = format!("{},{}", location.start_line, location.end_line);
        let output = self
            .runner
            .run(&[
                "blame",
                "-L",
                &range,
                "--line-porcelain",
                &location.file_path,
            ])
            .await?;
        let (total_lines, authors) = parse_blame_porcelain(&output);
        Ok(BlameReport {
            function: location.name,
            file_path: location.file_path,
            total_lines,
            authors,
        })
    }

    async fn locate_single(&self, name: &str) -> Result<FunctionLocation> {
        let candidates = self.locate(name).await?;
        match candidates.len() {
            0 => Err(CieError::input(format!("no indexed function named '{name}'"))),
            1 => Ok(candidates.into_iter().next().unwrap()),
            _ => {
                let listing = candidates
                    .iter()
                    .map(|c| format!("{} ({}:{})", c.name, c.file_path, c.start_line))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(CieError::input(format!(
                    "multiple functions match '{name}': {listing}; narrow with path_pattern"
                )))
            }
        }
    }

    async fn locate(&self, name: &str) -> Result<Vec<FunctionLocation>> {
        let mut params = ParamMap::new();
        params.insert("name".to_string(), DataValue::Str(name.into()));
        params.insert(
            "suffix".to_string(),
            DataValue::Str(format!(".{name}").into()),
        );
        let rows = self
            .store
            .query(
                "?[name, file_path, start_line, end_line] := \
                 *cie_function{name, file_path, start_line, end_line}, name == $name \
                 ?[name, file_path, start_line, end_line] := \
                 *cie_function{name, file_path, start_line, end_line}, ends_with(name, $suffix)",
                params,
            )
            .await?;
        debug!(name, matches = rows.rows.len(), "located function candidates");
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| {
                Some(FunctionLocation {
                    name: dv_str(row.first()?)?.to_string(),
                    file_path: dv_str(row.get(1)?)?.to_string(),
                    start_line: dv_int(row.get(2)?)?,
                    end_line: dv_int(row.get(3)?)?,
                })
            })
            .collect())
    }
}

/// Parse `%h|%an|%ad|%s` lines, with `%ad` in iso-strict form
fn parse_commit_lines(output: &str) -> Vec<CommitSummary> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(4, '|');
            Some(CommitSummary {
                hash: parts.next()?.trim().to_string(),
                author: parts.next()?.to_string(),
                date: DateTime::parse_from_rfc3339(parts.next()?.trim()).ok(),
                subject: parts.next().unwrap_or("").to_string(),
            })
        })
        .filter(|c| !c.hash.is_empty())
        .collect()
}

/// Aggregate `--line-porcelain` output into per-author line counts.
/// Every source line repeats its full header block, so counting `author`
/// headers counts lines.
fn parse_blame_porcelain(output: &str) -> (usize, Vec<AuthorStat>) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_commit: HashMap<String, String> = HashMap::new();
    let mut current_sha = String::new();

    for line in output.lines() {
        if line.starts_with('\t') {
            continue;
        }
        let first_token = line.split(' ').next().unwrap_or("");
        if first_token.len() == 40 && first_token.chars().all(|c| c.is_ascii_hexdigit()) {
            current_sha = first_token[..12.min(first_token.len())].to_string();
            continue;
        }
        if let Some(author) = line.strip_prefix("author ") {
            *counts.entry(author.to_string()).or_insert(0) += 1;
            first_commit
                .entry(author.to_string())
                .or_insert_with(|| current_sha.clone());
        }
    }

    let total: usize = counts.values().sum();
    let mut authors: Vec<AuthorStat> = counts
        .into_iter()
        .map(|(author, lines)| AuthorStat {
            percentage: if total > 0 {
                (lines as f64 / total as f64) * 100.0
            } else {
                0.0
            },
            most_recent_commit: first_commit.get(&author).cloned().unwrap_or_default(),
            author,
            lines,
        })
        .collect();
    authors.sort_by(|a, b| b.lines.cmp(&a.lines).then(a.author.cmp(&b.author)));
    (total, authors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::runner::ScriptedRunner;
    use crate::types::FunctionEntity;
    use chrono::Datelike;

    async fn store_with(functions: &[FunctionEntity]) -> RelationStore {
        let store = RelationStore::connect("mem", 4).unwrap();
        store.ensure_schema().await.unwrap();
        store.put_functions(functions).await.unwrap();
        store
    }

    fn function(name: &str, file: &str, start: i64, end: i64) -> FunctionEntity {
        FunctionEntity {
            id: FunctionEntity::compute_id(file, name, name, start, end),
            name: name.to_string(),
            signature: format!("func {name}()"),
            file_path: file.to_string(),
            start_line: start,
            end_line: end,
            start_col: 0,
            end_col: 0,
            code_text: String::new(),
        }
    }

    #[tokio::test]
    async fn function_history_uses_line_range_log() {
        let store = store_with(&[function("Handle", "src/server.go", 10, 30)]).await;
        let runner = ScriptedRunner::new().respond(
            "log -L 10,30:src/server.go --format=%h|%an|%ad|%s --date=iso-strict --no-patch",
            "abc123|Ada|2026-01-02T09:15:00+00:00|tighten handler\n",
        );
        let correlator = GitCorrelator::new(store, Arc::new(runner));

        let history = correlator.function_history("Handle").await.unwrap();
        assert_eq!(history.commits.len(), 1);
        assert_eq!(history.commits[0].author, "Ada");
        let date = history.commits[0].date.expect("iso-strict date parses");
        assert_eq!(date.year(), 2026);
        assert!(history.note.is_none());
    }

    #[tokio::test]
    async fn function_history_falls_back_to_file_level() {
        let store = store_with(&[function("Handle", "src/server.go", 10, 30)]).await;
        let runner = ScriptedRunner::new()
            .fail(
                "log -L 10,30:src/server.go --format=%h|%an|%ad|%s --date=iso-strict --no-patch",
                "fatal: file has been renamed",
            )
            .respond(
                "log --format=%h|%an|%ad|%s --date=iso-strict -n 20 -- src/server.go",
                "def456|Grace|2025-11-05T08:00:00+00:00|move handler\n",
            );
        let correlator = GitCorrelator::new(store, Arc::new(runner));

        let history = correlator.function_history("Handle").await.unwrap();
        assert_eq!(history.commits[0].hash, "def456");
        assert!(history.note.is_some());
    }

    #[tokio::test]
    async fn malformed_dates_are_tolerated() {
        let commits = parse_commit_lines("abc123|Ada|not a date|subject\n");
        assert_eq!(commits.len(), 1);
        assert!(commits[0].date.is_none());
        assert_eq!(commits[0].subject, "subject");
    }

    #[tokio::test]
    async fn ambiguous_lookup_names_candidates() {
        let store = store_with(&[
            function("Server.Run", "src/server.go", 5, 20),
            function("Worker.Run", "src/worker.go", 8, 25),
        ])
        .await;
        let correlator = GitCorrelator::new(store, Arc::new(ScriptedRunner::new()));

        let err = correlator.function_history("Run").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Server.Run"));
        assert!(message.contains("Worker.Run"));
        assert!(message.contains("path_pattern"));
    }

    #[tokio::test]
    async fn find_introduction_scopes_to_function_file() {
        let store = store_with(&[function("Handle", "src/server.go", 10, 30)]).await;
        let runner = ScriptedRunner::new().respond(
            "log -S retryBudget --reverse --format=%h|%an|%ad|%s --date=iso-strict -n 1 -- src/server.go",
            "aaa111|Linus|2024-06-01T12:00:00+02:00|add retry budget\n",
        );
        let correlator = GitCorrelator::new(store, Arc::new(runner));

        let commit = correlator
            .find_introduction("retryBudget", Some("Handle"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commit.hash, "aaa111");
        assert!(commit.date.is_some());
    }

    #[tokio::test]
    async fn blame_aggregates_per_author() {
        let store = store_with(&[function("Handle", "src/server.go", 1, 4)]).await;
        let sha_a = "a".repeat(40);
        let sha_b = "b".repeat(40);
        let porcelain = format!(
            "{sha_a} 1 1 1\nauthor Ada\nsummary first\n\tline one\n\
             {sha_a} 2 2 1\nauthor Ada\nsummary first\n\tline two\n\
             {sha_b} 3 3 1\nauthor Grace\nsummary second\n\tline three\n\
             {sha_a} 4 4 1\nauthor Ada\nsummary first\n\tline four\n"
        );
        let runner = ScriptedRunner::new().respond(
            "blame -L 1,4 --line-porcelain src/server.go",
            &porcelain,
        );
        let correlator = GitCorrelator::new(store, Arc::new(runner));

        let report = correlator.blame_function("Handle").await.unwrap();
        assert_eq!(report.total_lines, 4);
        assert_eq!(report.authors[0].author, "Ada");
        assert_eq!(report.authors[0].lines, 3);
        assert!((report.authors[0].percentage - 75.0).abs() < 1e-9);
        assert_eq!(report.authors[0].most_recent_commit, "a".repeat(12));
        assert_eq!(report.authors[1].author, "Grace");
    }

    #[tokio::test]
    async fn empty_pickaxe_pattern_is_input_error() {
        let store = store_with(&[]).await;
        let correlator = GitCorrelator::new(store, Arc::new(ScriptedRunner::new()));
        assert!(matches!(
            correlator.find_introduction("  ", None).await,
            Err(CieError::Input { .. })
        ));
    }
}
