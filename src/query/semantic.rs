//! Semantic search over the HNSW-indexed embeddings
//!
//! Cosine distance from the vector index is mapped to similarity as
//! `1 - d/2`. When embedding generation fails or the index returns no
//! rows, the search degrades to text search with a visible diagnostic
//! tag.

use tracing::{debug, warn};

use super::{grep::SearchIn, params, validate_regex, QueryEngine};
use crate::embeddings::EmbeddingClient;
use crate::errors::{CieError, Result};
use crate::store::{dv_float, dv_str};

/// Which entity class to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticRole {
    Function,
    Type,
}

/// One semantic hit
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SemanticHit {
    pub entity_id: String,
    pub name: String,
    pub file_path: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SemanticResult {
    pub hits: Vec<SemanticHit>,
    /// Set when the result came from the text-search fallback, with the
    /// reason
    pub fallback: Option<String>,
}

impl QueryEngine {
    /// Vector search over function or type embeddings
    pub async fn semantic_search(
        &self,
        query: &str,
        role: SemanticRole,
        path_pattern: Option<&str>,
        min_similarity: Option<f64>,
        limit: usize,
        client: &EmbeddingClient,
    ) -> Result<SemanticResult> {
        if query.trim().is_empty() {
            return Err(CieError::input("query must not be empty"));
        }
        if let Some(pattern) = path_pattern {
            validate_regex(pattern)?;
        }
        let limit = if limit == 0 { 10 } else { limit };

        let vector = match client.embed(&client.preprocess_query(query)).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "embedding generation failed, degrading to text search");
                return self
                    .text_fallback(
                        query,
                        path_pattern,
                        limit,
                        format!("text search fallback — reason: embedding generation failed: {e}"),
                    )
                    .await;
            }
        };

        let (relation, key, entity_table) = match role {
            SemanticRole::Function => ("cie_function_embedding", "function_id", "cie_function"),
            SemanticRole::Type => ("cie_type_embedding", "type_id", "cie_type"),
        };
        let k = limit * 3;
        let script = format!(
            "?[id, name, file_path, dist] := \
             ~{relation}:semantic{{ {key}: id | query: q, k: {k}, ef: 200, bind_distance: dist }}, \
             q = vec($vec), \
             *{entity_table}{{id, name, file_path}}"
        );
        let vec_param = cozo::DataValue::List(
            vector.iter().map(|x| cozo::DataValue::from(*x as f64)).collect(),
        );

        let rows = match self.store().query(&script, params(&[("vec", vec_param)])).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "vector query failed, degrading to text search");
                return self
                    .text_fallback(
                        query,
                        path_pattern,
                        limit,
                        format!("text search fallback — reason: vector query failed: {e}"),
                    )
                    .await;
            }
        };
        if rows.rows.is_empty() {
            return self
                .text_fallback(
                    query,
                    path_pattern,
                    limit,
                    "text search fallback — reason: vector index returned no rows".to_string(),
                )
                .await;
        }

        let path_re = path_pattern.map(validate_regex).transpose()?;
        let mut hits: Vec<SemanticHit> = rows
            .rows
            .iter()
            .filter_map(|row| {
                let id = dv_str(row.first()?)?;
                let name = dv_str(row.get(1)?)?;
                let file_path = dv_str(row.get(2)?)?;
                let dist = dv_float(row.get(3)?)?;
                if let Some(re) = &path_re {
                    if !re.is_match(file_path) {
                        return None;
                    }
                }
                // Cosine distance lives in [0, 2]
                let similarity = 1.0 - dist / 2.0;
                if let Some(min) = min_similarity {
                    if similarity < min {
                        return None;
                    }
                }
                Some(SemanticHit {
                    entity_id: id.to_string(),
                    name: name.to_string(),
                    file_path: file_path.to_string(),
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        debug!(query, hits = hits.len(), "semantic search");
        Ok(SemanticResult {
            hits,
            fallback: None,
        })
    }

    async fn text_fallback(
        &self,
        query: &str,
        path_pattern: Option<&str>,
        limit: usize,
        reason: String,
    ) -> Result<SemanticResult> {
        let pattern = query
            .split_whitespace()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("(?i)({pattern})");
        let matches = self
            .search_text(&pattern, SearchIn::All, false, path_pattern, None, limit)
            .await?;
        Ok(SemanticResult {
            hits: matches
                .into_iter()
                .map(|m| SemanticHit {
                    entity_id: m.function_id,
                    name: m.name,
                    file_path: m.file_path,
                    similarity: 0.0,
                })
                .collect(),
            fallback: Some(reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
    use crate::store::RelationStore;
    use crate::types::FunctionEntity;

    fn function(name: &str, file: &str) -> FunctionEntity {
        FunctionEntity {
            id: FunctionEntity::compute_id(file, name, name, 1, 10),
            name: name.to_string(),
            signature: format!("func {name}()"),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 10,
            start_col: 0,
            end_col: 0,
            code_text: format!("body of {name}"),
        }
    }

    async fn seeded_engine() -> (QueryEngine, EmbeddingClient, RelationStore) {
        let store = RelationStore::connect("mem", 8).unwrap();
        store.ensure_schema().await.unwrap();
        let client = EmbeddingClient::new(EmbeddingConfig::mock(8)).unwrap();

        let retry = function("RetryLoop", "retry.go");
        let serve = function("Serve", "server.go");
        store.put_functions(&[retry.clone(), serve.clone()]).await.unwrap();
        store
            .put_function_code(&[
                (retry.id.clone(), "retry with backoff".to_string()),
                (serve.id.clone(), "accept connections".to_string()),
            ])
            .await
            .unwrap();

        let vectors = vec![
            (retry.id.clone(), client.embed("retry with backoff").await.unwrap()),
            (serve.id.clone(), client.embed("accept connections").await.unwrap()),
        ];
        store
            .put_embeddings("cie_function_embedding", "function_id", &vectors)
            .await
            .unwrap();
        store
            .create_vector_index("cie_function_embedding", "embedding")
            .await
            .unwrap();
        (QueryEngine::new(store.clone()), client, store)
    }

    #[tokio::test]
    async fn identical_text_ranks_first_with_high_similarity() {
        let (engine, client, _store) = seeded_engine().await;
        let result = engine
            .semantic_search(
                "retry with backoff",
                SemanticRole::Function,
                None,
                None,
                5,
                &client,
            )
            .await
            .unwrap();
        assert!(result.fallback.is_none());
        assert!(!result.hits.is_empty());
        assert_eq!(result.hits[0].name, "RetryLoop");
        assert!(result.hits[0].similarity > 0.99, "identical vector, similarity ~1");
    }

    #[tokio::test]
    async fn threshold_filtering_is_monotonic() {
        let (engine, client, _store) = seeded_engine().await;
        let loose = engine
            .semantic_search("retry with backoff", SemanticRole::Function, None, Some(0.1), 10, &client)
            .await
            .unwrap();
        let tight = engine
            .semantic_search("retry with backoff", SemanticRole::Function, None, Some(0.9), 10, &client)
            .await
            .unwrap();
        let loose_ids: std::collections::HashSet<&str> =
            loose.hits.iter().map(|h| h.entity_id.as_str()).collect();
        for hit in &tight.hits {
            assert!(
                loose_ids.contains(hit.entity_id.as_str()),
                "tighter threshold must be a subset"
            );
        }
    }

    #[tokio::test]
    async fn embedding_failure_falls_back_to_text_with_tag() {
        let (engine, _, _store) = seeded_engine().await;
        // A real provider pointed at a dead endpoint fails fast
        let dead = EmbeddingClient::new(EmbeddingConfig {
            provider: EmbeddingProvider::Ollama,
            url: "http://127.0.0.1:1".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 8,
        })
        .unwrap();
        let result = engine
            .semantic_search("backoff", SemanticRole::Function, None, None, 5, &dead)
            .await
            .unwrap();
        let tag = result.fallback.expect("fallback tag present");
        assert!(tag.contains("text search fallback"));
        assert!(result.hits.iter().any(|h| h.name == "RetryLoop"));
    }

    #[tokio::test]
    async fn empty_query_is_input_error() {
        let (engine, client, _store) = seeded_engine().await;
        assert!(matches!(
            engine
                .semantic_search("", SemanticRole::Function, None, None, 5, &client)
                .await,
            Err(CieError::Input { .. })
        ));
    }
}
