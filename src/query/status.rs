//! Index status: entity counts, vector-index readiness, and breakdowns

use super::{params, QueryEngine};
use crate::errors::Result;
use crate::store::{
    dv_int, dv_str, META_INDEXING_IN_PROGRESS, META_LAST_INDEXED_COMMIT,
};

/// Aggregate view of the indexed project
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct IndexStatus {
    pub files: i64,
    pub functions: i64,
    pub types: i64,
    pub fields: i64,
    pub imports: i64,
    pub call_edges: i64,
    pub implements_edges: i64,
    pub function_embeddings: i64,
    pub type_embeddings: i64,
    /// HNSW index exists over the function embeddings
    pub hnsw_ready: bool,
    pub last_indexed_commit: Option<String>,
    /// An ingestion run is (or died) in flight; readers treat this as a
    /// warning
    pub indexing_in_progress: bool,
    pub files_by_language: Vec<(String, i64)>,
    /// Files with the most functions, descending
    pub top_files: Vec<(String, i64)>,
}

impl QueryEngine {
    pub async fn index_status(&self) -> Result<IndexStatus> {
        let store = self.store();
        let mut status = IndexStatus {
            files: store.count_relation("cie_file", "id").await?,
            functions: store.count_relation("cie_function", "id").await?,
            types: store.count_relation("cie_type", "id").await?,
            fields: store.count_relation("cie_field", "id").await?,
            imports: store.count_relation("cie_import", "id").await?,
            call_edges: store.count_relation("cie_calls", "id").await?,
            implements_edges: store.count_relation("cie_implements", "id").await?,
            function_embeddings: store
                .count_relation("cie_function_embedding", "function_id")
                .await?,
            type_embeddings: store.count_relation("cie_type_embedding", "type_id").await?,
            hnsw_ready: store.vector_indexes_ready().await,
            last_indexed_commit: store.get_meta(META_LAST_INDEXED_COMMIT).await?,
            indexing_in_progress: store
                .get_meta(META_INDEXING_IN_PROGRESS)
                .await?
                .is_some(),
            ..Default::default()
        };

        let by_language = store
            .query(
                "?[language, count(id)] := *cie_file{id, language}",
                params(&[]),
            )
            .await?;
        status.files_by_language = by_language
            .rows
            .iter()
            .filter_map(|row| {
                Some((
                    dv_str(row.first()?)?.to_string(),
                    dv_int(row.get(1)?)?,
                ))
            })
            .collect();
        status.files_by_language.sort_by(|a, b| b.1.cmp(&a.1));

        let per_file = store
            .query(
                "?[file_path, count(id)] := *cie_function{id, file_path}",
                params(&[]),
            )
            .await?;
        let mut top: Vec<(String, i64)> = per_file
            .rows
            .iter()
            .filter_map(|row| {
                Some((
                    dv_str(row.first()?)?.to_string(),
                    dv_int(row.get(1)?)?,
                ))
            })
            .collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        top.truncate(10);
        status.top_files = top;

        Ok(status)
    }
}
