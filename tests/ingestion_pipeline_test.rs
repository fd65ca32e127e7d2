//! End-to-end ingestion scenarios over the in-memory relation store

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use cie::{
    IndexingOptions, IngestionCoordinator, QueryEngine, RelationStore, ScriptedRunner,
    TraceRequest,
};

fn write_repo(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
    dir
}

async fn ingest(repo: &TempDir) -> (RelationStore, QueryEngine) {
    let store = RelationStore::connect("mem", 8).unwrap();
    let coordinator = IngestionCoordinator::new(store.clone(), IndexingOptions::default());
    coordinator.ingest(repo.path()).await.unwrap();
    (store.clone(), QueryEngine::new(store))
}

#[tokio::test]
async fn same_file_call_graph_round_trip() {
    let repo = write_repo(&[("main.go", "package main\nfunc A() { B() }\nfunc B() {}\n")]);
    let (store, engine) = ingest(&repo).await;

    assert_eq!(store.count_relation("cie_function", "id").await.unwrap(), 2);
    assert_eq!(store.count_relation("cie_calls", "id").await.unwrap(), 1);

    let callees = engine.find_callees("A").await.unwrap();
    assert_eq!(callees.callees.len(), 1);
    assert_eq!(callees.callees[0].name, "B");
}

#[tokio::test]
async fn interface_dispatch_trace_finds_three_hop_path() {
    let source = "package main\n\
        type Writer interface { Write(b []byte) }\n\
        type Backend struct{}\n\
        func (Backend) Write(b []byte) {}\n\
        type Builder struct { w Writer }\n\
        func (b Builder) Build() { b.w.Write(nil) }\n\
        func main() { b := Builder{}; b.Build() }\n";
    let repo = write_repo(&[("main.go", source)]);
    let (store, engine) = ingest(&repo).await;

    // The resolver materialized the dispatch edge
    let rows = store
        .query(
            "?[caller, callee] := *cie_calls{caller_id, callee_id}, \
             *cie_function{id: caller_id, name: caller}, \
             *cie_function{id: callee_id, name: callee}",
            Default::default(),
        )
        .await
        .unwrap();
    let pairs: Vec<(String, String)> = rows
        .rows
        .iter()
        .map(|r| {
            (
                cie::store::dv_str(&r[0]).unwrap().to_string(),
                cie::store::dv_str(&r[1]).unwrap().to_string(),
            )
        })
        .collect();
    assert!(pairs.contains(&("Builder.Build".to_string(), "Backend.Write".to_string())));

    // main -> Builder.Build -> Backend.Write
    let mut request = TraceRequest::new("Backend.Write");
    request.source = Some("main".to_string());
    let result = engine.trace_path(&request).await.unwrap();
    assert!(result.found(), "diagnostics: {:?}", result.diagnostics);
    assert_eq!(
        result.paths[0],
        vec!["main", "Builder.Build", "Backend.Write"]
    );
}

#[tokio::test]
async fn delta_reindex_keeps_untouched_files_stable() {
    let repo = write_repo(&[
        ("one.go", "package p\nfunc One() {}\n"),
        ("two.go", "package p\nfunc Two() { One() }\n"),
        ("three.go", "package p\nfunc Three() {}\n"),
    ]);
    let store = RelationStore::connect("mem", 8).unwrap();

    let runner = Arc::new(ScriptedRunner::new().respond("rev-parse HEAD", "c1\n"));
    IngestionCoordinator::new(store.clone(), IndexingOptions::default())
        .with_vcs(runner)
        .ingest(repo.path())
        .await
        .unwrap();

    async fn ids(store: &RelationStore) -> Vec<(String, String)> {
        let rows = store
            .query(
                "?[id, file_path] := *cie_function{id, file_path}",
                Default::default(),
            )
            .await
            .unwrap();
        rows.rows
            .iter()
            .map(|r| {
                (
                    cie::store::dv_str(&r[0]).unwrap().to_string(),
                    cie::store::dv_str(&r[1]).unwrap().to_string(),
                )
            })
            .collect::<Vec<_>>()
    }
    let before = ids(&store).await;

    fs::write(repo.path().join("two.go"), "package p\nfunc Two() { Three() }\n").unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond("rev-parse HEAD", "c2\n")
            .respond("diff --name-status c1 HEAD", "M\ttwo.go\n"),
    );
    IngestionCoordinator::new(store.clone(), IndexingOptions::default())
        .with_vcs(runner)
        .ingest(repo.path())
        .await
        .unwrap();
    let after = ids(&store).await;

    // Files one and three keep identical ids; file two was refreshed
    let before_stable: Vec<_> = before.iter().filter(|(_, f)| f != "two.go").collect();
    for entry in &before_stable {
        assert!(after.iter().any(|e| &e == entry), "stable id lost: {entry:?}");
    }
    let before_two: Vec<_> = before.iter().filter(|(_, f)| f == "two.go").collect();
    for entry in &before_two {
        assert!(
            !after.iter().any(|e| &e == entry),
            "modified file kept stale id: {entry:?}"
        );
    }

    // No call edge references a function that no longer exists
    let dangling = store
        .query(
            "?[id] := *cie_calls{id, caller_id}, not *cie_function{id: caller_id} \
             ?[id] := *cie_calls{id, callee_id}, not *cie_function{id: callee_id}",
            Default::default(),
        )
        .await
        .unwrap();
    assert!(dangling.rows.is_empty(), "dangling call edges after delta");
}

#[tokio::test]
async fn full_reindex_twice_is_idempotent() {
    let repo = write_repo(&[
        ("a.go", "package p\nfunc A() { B() }\nfunc B() {}\n"),
        ("util.py", "def helper():\n    return 1\n"),
        ("svc.ts", "export function run() { helper(); }\nfunction helper() {}\n"),
    ]);
    let store = RelationStore::connect("mem", 8).unwrap();
    let coordinator = IngestionCoordinator::new(store.clone(), IndexingOptions::default());

    coordinator.ingest(repo.path()).await.unwrap();
    let functions_first = store.count_relation("cie_function", "id").await.unwrap();
    let edges_first = store.count_relation("cie_calls", "id").await.unwrap();

    coordinator.ingest(repo.path()).await.unwrap();
    assert_eq!(
        store.count_relation("cie_function", "id").await.unwrap(),
        functions_first
    );
    assert_eq!(store.count_relation("cie_calls", "id").await.unwrap(), edges_first);
}

#[tokio::test]
async fn delete_entities_cascades_completely() {
    let repo = write_repo(&[(
        "main.go",
        "package main\nimport \"fmt\"\ntype S struct { n int }\nfunc A() { B() }\nfunc B() { fmt.Println() }\n",
    )]);
    let (store, _) = ingest(&repo).await;

    store.delete_entities_for_file("main.go").await.unwrap();

    for (relation, key) in [
        ("cie_function", "id"),
        ("cie_type", "id"),
        ("cie_field", "id"),
        ("cie_import", "id"),
        ("cie_calls", "id"),
        ("cie_defines", "id"),
        ("cie_defines_type", "id"),
        ("cie_file", "id"),
    ] {
        assert_eq!(
            store.count_relation(relation, key).await.unwrap(),
            0,
            "{relation} not fully purged"
        );
    }
}

#[tokio::test]
async fn multi_language_repo_indexes_every_parser() {
    let repo = write_repo(&[
        ("go/main.go", "package main\nfunc main() {}\n"),
        ("py/app.py", "class App:\n    def run(self):\n        pass\n"),
        ("ts/index.ts", "export function boot() {}\n"),
        ("rs/lib.rs", "pub fn start() {}\n"),
        ("java/Main.java", "public class Main { public void run() {} }\n"),
    ]);
    let (store, engine) = ingest(&repo).await;

    assert_eq!(store.count_relation("cie_file", "id").await.unwrap(), 5);
    let status = engine.index_status().await.unwrap();
    let languages: Vec<&str> = status
        .files_by_language
        .iter()
        .map(|(l, _)| l.as_str())
        .collect();
    for expected in ["go", "python", "typescript", "rust", "java"] {
        assert!(languages.contains(&expected), "missing {expected} in {languages:?}");
    }
}
