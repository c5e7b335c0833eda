use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use xrag_eval::analytics::{read_document, reduce_run, write_document};
use xrag_eval::report::{read_entries, NO_EXPLANATION};
use xrag_eval::{
    compare, ComparisonResult, ContractAnalyzer, ContractKey, EvalConfig,
    ExplanationSources, Label, MockLLMProvider, ModelId, Mode, ReportMaterializer, ResultStore,
    ReviewTable, RunReport,
};

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Three reentrant contracts and one safe one, each with a single similar contract.
fn dataset(root: &Path) {
    for id in ["A", "B", "C"] {
        write(
            root,
            &format!("source/reentrant/{}.sol", id),
            &format!("contract Vault{} {{ function withdraw() public {{}} }}", id),
        );
        write(
            root,
            &format!("source/reentrant/{}.similar/1_safe.sol", id),
            "contract Neighbor { }",
        );
    }
    write(root, "source/safe/S.sol", "contract Token { }");
}

fn id_set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn config() -> EvalConfig {
    let mut config = EvalConfig::default();
    config.model = ModelId::Gpt4o;
    config.retry.max_retries = 2;
    config.retry.initial_wait_secs = 0;
    config.describe_similar = false;
    config
}

fn labelled(label: &str, explanation: &str) -> String {
    serde_json::json!({ "classification": label, "explanation": explanation }).to_string()
}

async fn run(
    dataset_root: &Path,
    store_root: &Path,
    mode: Mode,
    provider: MockLLMProvider,
) -> Arc<MockLLMProvider> {
    let provider = Arc::new(provider);
    let analyzer =
        ContractAnalyzer::new(config(), mode, provider.clone(), ResultStore::new(store_root));
    let summary = analyzer
        .analyze_path(dataset_root, Vec::new(), true)
        .await
        .unwrap();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.skipped_total(), 0);
    provider
}

#[tokio::test]
async fn test_baseline_and_retrieval_runs_end_to_end() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("dataset");
    let baseline_store = dir.path().join("baseline");
    let xrag_store = dir.path().join("xrag");
    dataset(&data);

    // baseline misses A and B, retrieval misses B and C
    run(
        &data,
        &baseline_store,
        Mode::Direct,
        MockLLMProvider::new()
            .with_response("contract VaultA", labelled("Safe", "baseline: A looks fine"))
            .with_response("contract VaultB", labelled("Safe", "baseline: B looks fine"))
            .with_response("contract VaultC", MockLLMProvider::reentrant_response()),
    )
    .await;
    let xrag = run(
        &data,
        &xrag_store,
        Mode::Retrieval,
        MockLLMProvider::new()
            .with_response("contract VaultA", MockLLMProvider::reentrant_response())
            .with_response("contract VaultB", labelled("Safe", "xrag: neighbours are guarded"))
            .with_response("contract VaultC", labelled("Safe", "xrag: C looks fine")),
    )
    .await;
    assert!(xrag
        .prompts()
        .iter()
        .filter(|p| p.contains("contract Vault"))
        .all(|p| p.contains("contract Neighbor")));

    let baseline = reduce_run(&baseline_store, Mode::Direct).unwrap();
    let comparison = reduce_run(&xrag_store, Mode::Retrieval).unwrap();
    assert_eq!(baseline["gpt-4o"].total, 4);
    assert_eq!(baseline["gpt-4o"].misclassified_reentrant, 2);
    assert_eq!(comparison["gpt-4o"].misclassified_safe, 0);

    let result = compare(&baseline, &comparison);
    let reentrant = &result["gpt-4o"]["source"]["reentrant"];
    assert_eq!(reentrant.union, id_set(&["A", "B", "C"]));
    assert_eq!(reentrant.intersection, id_set(&["B"]));
    assert_eq!(reentrant.improvement, 0);

    let cmp_path = dir.path().join("analytics/comparison.json");
    write_document(&cmp_path, &result).unwrap();
    let reloaded: ComparisonResult = read_document(&cmp_path).unwrap();
    assert_eq!(reloaded, result);

    let materializer = ReportMaterializer::new(ExplanationSources {
        baseline_results: baseline_store,
        baseline_mode: Mode::Direct,
        comparison_results: xrag_store,
        comparison_mode: Mode::Retrieval,
        dataset_root: data,
        source_representation: "source".to_string(),
    });
    let entries = materializer.materialize(&reloaded);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].baseline_explanation, "baseline: B looks fine");
    assert_eq!(entries[0].comparison_explanation, "xrag: neighbours are guarded");
    assert!(entries[0].source_code.starts_with("contract VaultB"));

    let review_dir = dir.path().join("review");
    materializer.write_entries(&entries, &review_dir);
    let reread = read_entries(&review_dir).unwrap();
    assert_eq!(reread, entries);
    assert_eq!(
        reread[0].key(),
        ContractKey::new("source", Label::Reentrant, "B")
    );

    let table = ReviewTable::from_entries(&reread);
    assert_eq!(table.rows.len(), 1);
}

#[tokio::test]
async fn test_staged_run_without_external_calls_is_safe() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("dataset");
    let store_root = dir.path().join("staged");
    dataset(&data);

    let provider = run(
        &data,
        &store_root,
        Mode::Staged,
        MockLLMProvider::new().with_default_response(r#"{"functions_to_analyze": []}"#),
    )
    .await;
    assert_eq!(provider.call_count(), 4);

    let store = ResultStore::new(&store_root);
    let record = store
        .read(
            ModelId::Gpt4o,
            Mode::Staged,
            &ContractKey::new("source", Label::Reentrant, "A"),
        )
        .unwrap()
        .unwrap();
    assert_eq!(record.classification, Label::Safe);
    assert!(record.explanation.contains("no functions with external calls"));

    let report = reduce_run(&store_root, Mode::Staged).unwrap();
    assert_eq!(report["gpt-4o"].misclassified_reentrant, 3);
    assert_eq!(report["gpt-4o"].misclassified_safe, 0);
}

#[test]
fn test_document_without_breakdown_compares_after_round_trip() {
    let dir = TempDir::new().unwrap();
    let baseline: RunReport = serde_json::from_str(
        r#"{"gpt-4o": {"total": 1, "reentrant": 1, "safe": 0,
            "misclassified_reentrant": 1, "misclassified_safe": 0,
            "misclassified_contracts": [{"contract_id": "A", "groundtruth": "Reentrant",
                "predicted": "Safe", "data_representation": "source"}]}}"#,
    )
    .unwrap();

    let path = dir.path().join("direct.json");
    write_document(&path, &baseline).unwrap();
    let reloaded: RunReport = read_document(&path).unwrap();

    let result = compare(&baseline, &reloaded);
    let reentrant = &result["gpt-4o"]["source"]["reentrant"];
    assert_eq!(reentrant.union, id_set(&["A"]));
    assert_eq!(reentrant.intersection, id_set(&["A"]));
    assert_eq!(reentrant.improvement, 0);
}

#[test]
fn test_missing_baseline_record_degrades_to_sentinel() {
    let dir = TempDir::new().unwrap();
    let report: RunReport = serde_json::from_str(
        r#"{"o3-mini": {"total": 1, "reentrant": 0, "safe": 1,
            "misclassified_reentrant": 0, "misclassified_safe": 1,
            "by_representation": {"source": {"safe": {"total": 1, "misclassified": 1}}},
            "misclassified_contracts": [{"contract_id": "S", "groundtruth": "Safe",
                "predicted": "Reentrant", "data_representation": "source"}]}}"#,
    )
    .unwrap();

    let entries = ReportMaterializer::new(ExplanationSources {
        baseline_results: dir.path().join("none"),
        baseline_mode: Mode::Direct,
        comparison_results: dir.path().join("none"),
        comparison_mode: Mode::Staged,
        dataset_root: dir.path().join("none"),
        source_representation: "source".to_string(),
    })
    .materialize(&compare(&report, &report));

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].baseline_explanation, NO_EXPLANATION);
    assert_eq!(entries[0].groundtruth, Label::Safe);
}
