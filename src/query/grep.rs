//! Text search over indexed code, signatures, and names

use std::collections::HashSet;
use tracing::debug;

use super::{params, str_param, validate_regex, QueryEngine};
use crate::errors::{CieError, Result};
use crate::store::{dv_int, dv_str};

/// Which stored text a pattern is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchIn {
    Code,
    Signature,
    Name,
    All,
}

/// One text-search hit
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextMatch {
    pub function_id: String,
    pub name: String,
    pub file_path: String,
    pub start_line: i64,
    /// Which field matched: "code", "signature", or "name"
    pub matched_in: String,
}

impl QueryEngine {
    /// Grep the index. In literal mode regex metacharacters are escaped;
    /// otherwise the pattern is validated against the host regex engine
    /// before reaching the store.
    pub async fn search_text(
        &self,
        pattern: &str,
        search_in: SearchIn,
        literal: bool,
        file_pattern: Option<&str>,
        exclude_pattern: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TextMatch>> {
        if pattern.trim().is_empty() {
            return Err(CieError::input("search pattern must not be empty"));
        }
        let effective = if literal {
            regex::escape(pattern)
        } else {
            validate_regex(pattern)?;
            pattern.to_string()
        };
        let limit = if limit == 0 { 20 } else { limit };

        let file_re = file_pattern.map(validate_regex).transpose()?;
        let exclude_re = exclude_pattern.map(validate_regex).transpose()?;

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut matches = Vec::new();

        let targets: Vec<SearchIn> = match search_in {
            SearchIn::All => vec![SearchIn::Name, SearchIn::Signature, SearchIn::Code],
            other => vec![other],
        };

        for target in &targets {
            self.cancel_token().check()?;
            let (script, label) = match target {
                SearchIn::Name => (
                    "?[id, name, file_path, start_line] := \
                     *cie_function{id, name, file_path, start_line}, \
                     regex_matches(name, $pattern)",
                    "name",
                ),
                SearchIn::Signature => (
                    "?[id, name, file_path, start_line] := \
                     *cie_function{id, name, signature, file_path, start_line}, \
                     regex_matches(signature, $pattern)",
                    "signature",
                ),
                SearchIn::Code => (
                    "?[id, name, file_path, start_line] := \
                     *cie_function{id, name, file_path, start_line}, \
                     *cie_function_code{function_id: id, code_text}, \
                     regex_matches(code_text, $pattern)",
                    "code",
                ),
                SearchIn::All => unreachable!(),
            };

            let rows = self
                .store()
                .query(script, params(&[("pattern", str_param(&effective))]))
                .await?;
            for row in &rows.rows {
                let (Some(id), Some(name), Some(file_path), Some(line)) = (
                    row.first().and_then(dv_str),
                    row.get(1).and_then(dv_str),
                    row.get(2).and_then(dv_str),
                    row.get(3).and_then(dv_int),
                ) else {
                    continue;
                };
                if let Some(re) = &file_re {
                    if !re.is_match(file_path) {
                        continue;
                    }
                }
                if let Some(re) = &exclude_re {
                    if re.is_match(file_path) {
                        continue;
                    }
                }
                if !seen.insert((id.to_string(), label.to_string())) {
                    continue;
                }
                matches.push(TextMatch {
                    function_id: id.to_string(),
                    name: name.to_string(),
                    file_path: file_path.to_string(),
                    start_line: line,
                    matched_in: label.to_string(),
                });
                if matches.len() >= limit {
                    debug!(pattern, hits = matches.len(), "text search truncated at limit");
                    return Ok(matches);
                }
            }
        }
        debug!(pattern, hits = matches.len(), "text search complete");
        Ok(matches)
    }
}
