//! Symbol lookup: functions, types, and signature search

use tracing::debug;

use super::{
    code_for_function, params, row_to_function, str_param, validate_regex, FunctionRow,
    QueryEngine,
};
use crate::errors::{CieError, Result};
use crate::signature::{parse_go_params, parse_go_returns};
use crate::store::{dv_int, dv_str};

/// One matched function, optionally with its code text
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionMatch {
    #[serde(flatten)]
    pub row: FunctionRow,
    pub code_text: Option<String>,
}

/// Result of a function lookup
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionLookup {
    pub matches: Vec<FunctionMatch>,
    /// Set when no function matched but a same-named type exists
    pub suggestion: Option<String>,
}

/// One matched type
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TypeMatch {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: i64,
    pub code_text: Option<String>,
}

/// One signature-search hit with its parsed parameters
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignatureMatch {
    #[serde(flatten)]
    pub row: FunctionRow,
    pub param_types: Vec<String>,
    pub return_types: Vec<String>,
}

impl QueryEngine {
    /// Find functions by name. Exact mode matches the qualified or bare
    /// name; otherwise the name is a case-insensitive regex matched with
    /// an optional method prefix (`Run` also matches `X.Run`).
    pub async fn find_function(
        &self,
        name: &str,
        exact_match: bool,
        include_code: bool,
    ) -> Result<FunctionLookup> {
        if name.trim().is_empty() {
            return Err(CieError::input("function name must not be empty"));
        }

        let rows = if exact_match {
            super::functions_by_name(self.store(), name).await?
        } else {
            validate_regex(name)?;
            let pattern = format!("(?i)(^|\\.)({name})$");
            let result = self
                .store()
                .query(
                    "?[id, name, signature, file_path, start_line, end_line] := \
                     *cie_function{id, name, signature, file_path, start_line, end_line}, \
                     regex_matches(name, $pattern)",
                    params(&[("pattern", str_param(&pattern))]),
                )
                .await?;
            result.rows.iter().filter_map(|r| row_to_function(r)).collect()
        };

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let code_text = if include_code {
                code_for_function(self.store(), &row.id).await?
            } else {
                None
            };
            matches.push(FunctionMatch { row, code_text });
        }

        let suggestion = if matches.is_empty() {
            self.same_named_type_hint(name).await?
        } else {
            None
        };
        debug!(name, matches = matches.len(), "function lookup");
        Ok(FunctionLookup { matches, suggestion })
    }

    async fn same_named_type_hint(&self, name: &str) -> Result<Option<String>> {
        let rows = self
            .store()
            .query(
                "?[name, kind, file_path] := *cie_type{name, kind, file_path}, name == $name",
                params(&[("name", str_param(name))]),
            )
            .await?;
        Ok(rows.rows.first().map(|row| {
            let kind = dv_str(&row[1]).unwrap_or("type");
            let file = dv_str(&row[2]).unwrap_or("?");
            format!("no function named '{name}', but a {kind} type with that name exists in {file}; try find_type")
        }))
    }

    /// Find types by name, optionally filtered by kind and path pattern
    pub async fn find_type(
        &self,
        name: &str,
        kind: Option<&str>,
        path_pattern: Option<&str>,
        include_code: bool,
        limit: usize,
    ) -> Result<Vec<TypeMatch>> {
        if name.trim().is_empty() {
            return Err(CieError::input("type name must not be empty"));
        }
        validate_regex(name)?;
        if let Some(pattern) = path_pattern {
            validate_regex(pattern)?;
        }
        let limit = if limit == 0 { 20 } else { limit };

        let rows = self
            .store()
            .query(
                "?[id, name, kind, file_path, start_line] := \
                 *cie_type{id, name, kind, file_path, start_line}, \
                 regex_matches(name, $pattern)",
                params(&[("pattern", str_param(&format!("(?i)^({name})$")))]),
            )
            .await?;

        let path_re = path_pattern.map(validate_regex).transpose()?;
        let mut matches = Vec::new();
        for row in &rows.rows {
            let (Some(id), Some(type_name), Some(type_kind), Some(file_path), Some(line)) = (
                row.first().and_then(dv_str),
                row.get(1).and_then(dv_str),
                row.get(2).and_then(dv_str),
                row.get(3).and_then(dv_str),
                row.get(4).and_then(dv_int),
            ) else {
                continue;
            };
            if let Some(kind_filter) = kind {
                if type_kind != kind_filter {
                    continue;
                }
            }
            if let Some(re) = &path_re {
                if !re.is_match(file_path) {
                    continue;
                }
            }
            let code_text = if include_code {
                self.code_for_type(id).await?
            } else {
                None
            };
            matches.push(TypeMatch {
                id: id.to_string(),
                name: type_name.to_string(),
                kind: type_kind.to_string(),
                file_path: file_path.to_string(),
                start_line: line,
                code_text,
            });
            if matches.len() >= limit {
                break;
            }
        }
        Ok(matches)
    }

    async fn code_for_type(&self, type_id: &str) -> Result<Option<String>> {
        let rows = self
            .store()
            .query(
                "?[code_text] := *cie_type_code{type_id, code_text}, type_id == $id",
                params(&[("id", str_param(type_id))]),
            )
            .await?;
        Ok(rows
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(dv_str)
            .map(str::to_string))
    }

    /// Find functions by parameter and/or return type. The stored
    /// signature text is pre-filtered by regex, then candidates are
    /// post-filtered by running the signature parser for an exact match;
    /// the prefilter over-fetches to compensate for regex false
    /// positives.
    pub async fn find_by_signature(
        &self,
        param_type: Option<&str>,
        return_type: Option<&str>,
        path_pattern: Option<&str>,
        exclude_pattern: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureMatch>> {
        if param_type.is_none() && return_type.is_none() {
            return Err(CieError::input(
                "at least one of param_type or return_type is required",
            ));
        }
        let limit = if limit == 0 { 20 } else { limit };
        let fetch = limit * 5;

        let needle = param_type.or(return_type).unwrap_or_default();
        let script = format!(
            "?[id, name, signature, file_path, start_line, end_line] := \
             *cie_function{{id, name, signature, file_path, start_line, end_line}}, \
             regex_matches(signature, $needle) \
             :limit {fetch}"
        );
        let rows = self
            .store()
            .query(&script, params(&[("needle", str_param(&regex::escape(needle)))]))
            .await?;

        let path_re = path_pattern.map(validate_regex).transpose()?;
        let exclude_re = exclude_pattern.map(validate_regex).transpose()?;

        let mut matches = Vec::new();
        for row in &rows.rows {
            let Some(function) = row_to_function(row) else {
                continue;
            };
            if let Some(re) = &path_re {
                if !re.is_match(&function.file_path) {
                    continue;
                }
            }
            if let Some(re) = &exclude_re {
                if re.is_match(&function.file_path) {
                    continue;
                }
            }

            let param_types: Vec<String> = parse_go_params(&function.signature)
                .into_iter()
                .map(|p| p.type_name)
                .collect();
            let return_types = parse_go_returns(&function.signature);

            if let Some(wanted) = param_type {
                if !param_types.iter().any(|t| t == wanted) {
                    continue;
                }
            }
            if let Some(wanted) = return_type {
                if !return_types.iter().any(|t| t == wanted) {
                    continue;
                }
            }
            matches.push(SignatureMatch {
                row: function,
                param_types,
                return_types,
            });
            if matches.len() >= limit {
                break;
            }
        }
        Ok(matches)
    }
}
