//! End-to-end gather + assemble flow over synthetic validation artifacts.
//!
//! Mirrors the two acceptance scenarios: a candidate whose defect breaks
//! the only test has no regression witness and is rejected; adding a
//! second, still-passing test yields an emitted instance with the expected
//! id shape, which then assembles into the canonical schema.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use swesmith::config::{LlmConfig, OwnerType, PipelineConfig, ProxyConfig};
use swesmith::dataset;
use swesmith::harness::gather;
use swesmith::harness::grading::classify;
use swesmith::issue_gen::IssueRecord;
use swesmith::profiles::{Arch, Language, LogParserKind, RepoProfile, TestOutcome};

fn profile() -> RepoProfile {
    RepoProfile {
        owner: "o".to_string(),
        repo: "r".to_string(),
        commit: "abc1234def5678900000000000000000000000ff".to_string(),
        language: Language::Javascript,
        container_recipe: "FROM node:20\nWORKDIR /testbed\n".to_string(),
        test_cmd: "npm test -- --verbose".to_string(),
        log_parser: LogParserKind::Jest,
        arch: Arch::X86_64,
        exclude_dirs: vec![],
        mem_limit: "10g".to_string(),
        timeout: 90,
        timeout_ref: 900,
        flaky_tests: vec![],
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        github_token: None,
        org_gh: "swesmith".to_string(),
        org_dh: "swebench".to_string(),
        gh_owner_type: OwnerType::Org,
        llm: LlmConfig {
            base_url: "http://localhost".to_string(),
            model: "test".to_string(),
            api_keys: vec![],
            timeout: Duration::from_secs(1),
            max_retries: 0,
        },
        proxy: ProxyConfig::default(),
    }
}

fn outcomes(pairs: &[(&str, TestOutcome)]) -> BTreeMap<String, TestOutcome> {
    pairs.iter().map(|(n, o)| (n.to_string(), *o)).collect()
}

fn write_validation_artifacts(workspace: &Path, instance_id: &str, report: &serde_json::Value) {
    let dir = workspace
        .join("logs/run_validation/o__r.abc1234d")
        .join(instance_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("report.json"), report.to_string()).unwrap();
    std::fs::write(
        dir.join("patch.diff"),
        "diff --git a/add.js b/add.js\n--- a/add.js\n+++ b/add.js\n@@ -1 +1 @@\n-function add(a,b){return a+b}\n+function add(a,b){return a-b}\n",
    )
    .unwrap();
}

#[test]
fn lone_breaking_test_is_rejected_no_instance_emitted() {
    // Gold has one test; the defect breaks it; nothing witnesses the rest
    // of the suite still working.
    let gold = outcomes(&[("add adds", TestOutcome::Pass)]);
    let candidate = outcomes(&[("add adds", TestOutcome::Fail)]);
    let report = classify(&gold, &candidate);
    assert!(!report.is_promotable());

    let workspace = tempfile::tempdir().unwrap();
    write_validation_artifacts(
        workspace.path(),
        "o__r.abc1234d.func_pm_invert_return__aaaa1111",
        &serde_json::to_value(&report).unwrap(),
    );
    let (instances, stats) =
        gather::collect_instances(&profile(), &config(), workspace.path()).unwrap();
    assert!(instances.is_empty());
    assert_eq!(stats.rejected, 1);
}

#[test]
fn second_passing_test_yields_instance_and_dataset() {
    let gold = outcomes(&[
        ("add adds", TestOutcome::Pass),
        ("add is a function", TestOutcome::Pass),
    ]);
    let candidate = outcomes(&[
        ("add adds", TestOutcome::Fail),
        ("add is a function", TestOutcome::Pass),
    ]);
    let report = classify(&gold, &candidate);
    assert!(report.is_promotable());

    let workspace = tempfile::tempdir().unwrap();
    let instance_id = "o__r.abc1234d.func_pm_invert_return__aaaa1111";
    write_validation_artifacts(
        workspace.path(),
        instance_id,
        &serde_json::to_value(&report).unwrap(),
    );

    let profile = profile();
    let config = config();
    let (instances, _) = gather::collect_instances(&profile, &config, workspace.path()).unwrap();
    assert_eq!(instances.len(), 1);
    let instance = &instances[0];
    assert_eq!(instance.instance_id, instance_id);
    assert_eq!(instance.repo, "swesmith/o__r.abc1234d");
    assert_eq!(
        instance.image_name,
        "swebench/swesmith.x86_64.o_1776_r.abc1234d"
    );
    assert_eq!(instance.fail_to_pass, vec!["add adds"]);
    assert_eq!(instance.pass_to_pass, vec!["add is a function"]);

    let instances_path = gather::write_instances(&profile, workspace.path(), &instances).unwrap();
    assert!(instances_path.ends_with("logs/task_insts/o__r.abc1234d.json"));

    // Join with an issue text and check the canonical schema end to end.
    let issues = vec![IssueRecord {
        instance_id: instance_id.to_string(),
        problem_statement: "add() subtracts instead of adding.".to_string(),
    }];
    let dataset_path = dataset::assemble(
        workspace.path(),
        "o__r.abc1234d",
        &instances,
        &issues,
        false,
    )
    .unwrap();
    assert!(dataset_path.ends_with("logs/agent_datasets/o__r.abc1234d_final.json"));

    let records: Vec<dataset::DatasetRecord> =
        serde_json::from_str(&std::fs::read_to_string(&dataset_path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
    let value = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(value.as_object().unwrap().len(), 7);
    assert_eq!(
        records[0].problem_statement,
        "add() subtracts instead of adding."
    );
}
