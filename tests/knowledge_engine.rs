use law_rag::config::DataPaths;
use law_rag::embedding::{EmbeddingProvider, HashingEmbedder};
use law_rag::error::{EmbeddingError, KnowledgeError};
use law_rag::index::FlatIndex;
use law_rag::knowledge::{EngineState, KnowledgeEngine};
use law_rag::records::{CaseRecord, KnowledgeKind, StatutePatch};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

const DIM: usize = 64;

/// Hashing encoder that can be switched into a failing mode after construction.
struct Flaky {
    inner: HashingEmbedder,
    fail: Arc<AtomicBool>,
}

impl EmbeddingProvider for Flaky {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Model("encoder offline".into()));
        }
        self.inner.encode(texts)
    }
}

/// Advertises one width and returns another.
struct WrongWidth;

impl EmbeddingProvider for WrongWidth {
    fn dimension(&self) -> usize {
        DIM
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0; DIM + 1]).collect())
    }
}

fn write_json(path: &std::path::Path, value: serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
}

fn seeded(dir: &TempDir) -> DataPaths {
    let paths = DataPaths::in_dir(dir.path().join("data"));
    write_json(
        &paths.laws,
        json!([
            {"条文编号": "A1", "条文内容": "盗窃罪", "解释说明": "盗窃公私财物，数额较大的"},
            {"条文编号": "A2", "条文内容": "故意伤害他人身体的", "解释说明": "故意伤害罪"},
            {"条文编号": "A3", "条文内容": "以暴力、胁迫方法抢劫公私财物的", "解释说明": "抢劫罪"}
        ]),
    );
    write_json(
        &paths.cases,
        json!([
            {"案件编号": "C1", "案件概述": "张某入户盗窃手机一部", "判决结果": "有期徒刑一年", "适用条文": "A1"},
            {"案件编号": "C2", "案件概述": "李某持刀伤人", "判决结果": "有期徒刑三年", "适用条文": "A2"}
        ]),
    );
    paths
}

fn assert_aligned<E: EmbeddingProvider>(engine: &KnowledgeEngine<E>, paths: &DataPaths) {
    let expected = engine.statutes().len() + engine.cases().len();
    assert_eq!(engine.document_count(), expected);

    let metadata: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&paths.metadata).unwrap()).unwrap();
    assert_eq!(metadata.len(), expected);
}

#[test]
fn test_scenario_two_documents() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::in_dir(dir.path());
    write_json(
        &paths.laws,
        json!([{"条文编号": "A1", "条文内容": "盗窃罪", "解释说明": "..."}]),
    );
    write_json(
        &paths.cases,
        json!([{"案件编号": "C1", "案件概述": "...", "判决结果": "...", "适用条文": "A1"}]),
    );

    let engine = KnowledgeEngine::new(paths.clone(), HashingEmbedder::new(DIM));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    let report = engine.rebuild_index().unwrap();
    assert_eq!((report.statutes, report.cases, report.skipped), (1, 1, 0));
    assert_eq!(engine.state(), EngineState::Ready);

    let hits = engine.retrieve_knowledge("盗窃", 5).unwrap();
    assert_eq!(hits.len(), 2);
    for hit in &hits {
        assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&hit.relevance_score));
    }
    assert!(hits[0].relevance_score >= hits[1].relevance_score);
    assert_aligned(&engine, &paths);
}

#[test]
fn test_results_are_ordered_and_clamped() {
    let dir = TempDir::new().unwrap();
    let engine = KnowledgeEngine::open(seeded(&dir), HashingEmbedder::new(DIM)).unwrap();

    let hits = engine.retrieve_knowledge("入户盗窃财物", 100).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(
        hits.windows(2)
            .all(|w| w[0].relevance_score >= w[1].relevance_score)
    );
    assert_eq!(engine.retrieve_knowledge("盗窃", 2).unwrap().len(), 2);
    assert!(engine.retrieve_knowledge("盗窃", 0).unwrap().is_empty());
}

#[test]
fn test_empty_knowledge_base_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::in_dir(dir.path());
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();

    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.document_count(), 0);
    assert!(engine.retrieve_knowledge("盗窃", 5).unwrap().is_empty());
    assert!(paths.index.exists());
    assert!(paths.metadata.exists());
}

#[test]
fn test_stored_vectors_are_unit_norm() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    engine
        .add_new_case(CaseRecord::new("C3", "赵某醉酒驾驶", "拘役两个月", "A5"))
        .unwrap();

    let index = FlatIndex::load(&paths.index).unwrap();
    assert_eq!(index.count(), 6);
    for vector in index.vectors() {
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() <= 1e-5, "norm {norm}");
    }
}

#[test]
fn test_rebuild_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();

    let index_before = fs::read(&paths.index).unwrap();
    let metadata_before = fs::read(&paths.metadata).unwrap();
    let hits_before = engine.retrieve_knowledge("盗窃", 5).unwrap();

    engine.rebuild_index().unwrap();

    assert_eq!(fs::read(&paths.index).unwrap(), index_before);
    assert_eq!(fs::read(&paths.metadata).unwrap(), metadata_before);
    assert_eq!(engine.retrieve_knowledge("盗窃", 5).unwrap(), hits_before);
}

#[test]
fn test_persisted_index_is_reused() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let first = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    let expected = first.retrieve_knowledge("抢劫", 3).unwrap();
    drop(first);

    // A failing encoder proves the second open never re-encodes documents.
    let fail = Arc::new(AtomicBool::new(true));
    let second = KnowledgeEngine::open(
        paths,
        Flaky {
            inner: HashingEmbedder::new(DIM),
            fail: Arc::clone(&fail),
        },
    )
    .unwrap();
    assert_eq!(second.document_count(), 5);

    fail.store(false, Ordering::SeqCst);
    assert_eq!(second.retrieve_knowledge("抢劫", 3).unwrap(), expected);
}

#[test]
fn test_add_new_case_is_searchable_and_aligned() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();

    let report = engine
        .add_new_case(CaseRecord::new("C3", "王某诈骗老人存款", "有期徒刑五年", "A4"))
        .unwrap();
    assert_eq!(report.cases, 3);
    assert_aligned(&engine, &paths);

    let hits = engine.retrieve_knowledge("诈骗老人存款", 1).unwrap();
    assert_eq!(hits[0].id(), "C3");
    assert_eq!(hits[0].kind(), KnowledgeKind::Case);

    let on_disk: Vec<CaseRecord> =
        serde_json::from_str(&fs::read_to_string(&paths.cases).unwrap()).unwrap();
    assert_eq!(on_disk.last().unwrap().case_id, "C3");
}

#[test]
fn test_failed_rebuild_leaves_index_untouched() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let fail = Arc::new(AtomicBool::new(false));
    let engine = KnowledgeEngine::open(
        paths.clone(),
        Flaky {
            inner: HashingEmbedder::new(DIM),
            fail: Arc::clone(&fail),
        },
    )
    .unwrap();

    let index_before = fs::read(&paths.index).unwrap();
    let metadata_before = fs::read(&paths.metadata).unwrap();

    fail.store(true, Ordering::SeqCst);
    let result = engine.add_new_case(CaseRecord::new("C9", "新案件", "缓刑", "A1"));
    assert!(matches!(result, Err(KnowledgeError::Embedding(_))));

    assert_eq!(fs::read(&paths.index).unwrap(), index_before);
    assert_eq!(fs::read(&paths.metadata).unwrap(), metadata_before);
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.document_count(), 5);
    assert!(engine.cases().iter().any(|c| c.case_id == "C9"));

    // The next successful rebuild picks up the stored case.
    fail.store(false, Ordering::SeqCst);
    assert_eq!(engine.rebuild_index().unwrap().cases, 3);
    assert_eq!(engine.document_count(), 6);
}

#[test]
fn test_update_law_changes_only_the_match() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    let before = engine.statutes();

    let patch: StatutePatch = serde_json::from_value(json!({"解释说明": "新说明"})).unwrap();
    let update = engine.update_law_content("A1", patch).unwrap();
    assert!(update.matched);

    let after = engine.statutes();
    assert_eq!(after[0].explanation, "新说明");
    assert_eq!(after[0].article_text, before[0].article_text);
    assert_eq!(after[1..], before[1..]);
    assert_aligned(&engine, &paths);

    let hits = engine.retrieve_knowledge("新说明", 5).unwrap();
    let a1 = hits.iter().find(|h| h.id() == "A1").unwrap();
    assert_eq!(a1.item.statute().unwrap().explanation, "新说明");
}

#[test]
fn test_update_unknown_law_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    let before = engine.statutes();

    let update = engine
        .update_law_content("NOPE", StatutePatch::default().with_explanation("x"))
        .unwrap();
    assert!(!update.matched);
    assert_eq!(update.report.documents(), 5);
    assert_eq!(engine.statutes(), before);
}

#[test]
fn test_dimension_drift_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    drop(KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap());

    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(32)).unwrap();
    assert_eq!(engine.index_dimension(), 32);
    assert_eq!(engine.retrieve_knowledge("盗窃", 5).unwrap().len(), 5);
    assert_aligned(&engine, &paths);
}

#[test]
fn test_corrupt_index_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    drop(KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap());

    fs::write(&paths.index, b"not an index").unwrap();
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.document_count(), 5);
    assert!(fs::read(&paths.index).unwrap().starts_with(b"LRIX"));
}

#[test]
fn test_metadata_count_mismatch_triggers_rebuild() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    drop(KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap());

    let mut metadata: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&paths.metadata).unwrap()).unwrap();
    metadata.pop();
    write_json(&paths.metadata, serde_json::Value::Array(metadata));

    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    assert_eq!(engine.document_count(), 5);
    assert_aligned(&engine, &paths);
}

#[test]
fn test_failed_initialize_stays_uninitialized() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);

    let engine = KnowledgeEngine::new(paths.clone(), WrongWidth);
    let result = engine.initialize();
    assert!(matches!(
        result,
        Err(KnowledgeError::DimensionMismatch { expected: DIM, actual: 65 })
    ));
    assert_eq!(engine.state(), EngineState::Uninitialized);
    assert!(engine.retrieve_knowledge("盗窃", 5).unwrap().is_empty());
    assert!(!paths.index.exists());
}

#[test]
fn test_malformed_entries_are_skipped() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::in_dir(dir.path());
    write_json(
        &paths.laws,
        json!([
            {"条文编号": 264, "条文内容": "盗窃罪", "解释说明": null},
            "not a record",
            42
        ]),
    );

    let engine = KnowledgeEngine::open(paths, HashingEmbedder::new(DIM)).unwrap();
    assert_eq!(engine.skipped_documents().statutes, 2);
    assert_eq!(engine.document_count(), 1);
    assert_eq!(engine.statutes()[0].article_id, "264");
}

#[test]
fn test_add_new_case_keeps_unindexed_entries_on_disk() {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::in_dir(dir.path());
    write_json(
        &paths.cases,
        json!([
            {"案件编号": "C1", "案件概述": "张某入户盗窃", "判决结果": "有期徒刑一年", "适用条文": "A1"},
            "legacy note",
            42
        ]),
    );

    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();
    let report = engine
        .add_new_case(CaseRecord::new("C2", "李某盗窃电动车", "拘役", "A1"))
        .unwrap();
    assert_eq!((report.cases, report.skipped), (2, 2));
    assert_eq!(engine.document_count(), 2);

    let on_disk: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&paths.cases).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 4);
    assert_eq!(on_disk[1], json!("legacy note"));
    assert_eq!(on_disk[2], json!(42));
    assert_eq!(on_disk[3]["案件编号"], "C2");
}

#[test]
fn test_structured_query() {
    let dir = TempDir::new().unwrap();
    let engine = KnowledgeEngine::open(seeded(&dir), HashingEmbedder::new(DIM)).unwrap();

    let query = json!({
        "行为描述": {"主要行为": "持刀伤人", "行为地点": null},
        "其他情节": ["故意伤害"]
    });
    let hits = engine.retrieve_knowledge(query, 5).unwrap();
    assert_eq!(hits.len(), 5);
    assert!(
        hits.windows(2)
            .all(|w| w[0].relevance_score >= w[1].relevance_score)
    );
}

#[test]
fn test_concurrent_reads_during_appends() {
    let dir = TempDir::new().unwrap();
    let paths = seeded(&dir);
    let engine = KnowledgeEngine::open(paths.clone(), HashingEmbedder::new(DIM)).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..20 {
                    // Empty while a rebuild is in flight, a full snapshot otherwise.
                    let hits = engine.retrieve_knowledge("盗窃", 10).unwrap();
                    assert!(hits.is_empty() || hits.len() >= 5);
                    assert!(
                        hits.windows(2)
                            .all(|w| w[0].relevance_score >= w[1].relevance_score)
                    );
                }
            });
        }
        scope.spawn(|| {
            for i in 0..5 {
                engine
                    .add_new_case(CaseRecord::new(format!("N{i}"), "盗窃电动车", "拘役", "A1"))
                    .unwrap();
            }
        });
    });

    assert_eq!(engine.document_count(), 10);
    assert_aligned(&engine, &paths);
}
