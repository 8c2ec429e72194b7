//! Dataset assembly.
//!
//! Joins gathered instances with their issue texts and emits the final
//! corpus in the canonical task-instance schema: exactly seven fields per
//! record, no extras. Schema violations are fatal and nothing is written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;
use crate::harness::gather::TaskInstance;
use crate::issue_gen::IssueRecord;

/// Root of assembled datasets.
pub const LOG_DIR_AGENT_DATASETS: &str = "logs/agent_datasets";

/// The canonical task-instance record. Field set is bit-exact with the
/// published schema; `deny_unknown_fields` makes round-trips reject
/// records that grew extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetRecord {
    pub instance_id: String,
    pub repo: String,
    pub patch: String,
    pub problem_statement: String,
    #[serde(rename = "FAIL_TO_PASS")]
    pub fail_to_pass: Vec<String>,
    #[serde(rename = "PASS_TO_PASS")]
    pub pass_to_pass: Vec<String>,
    pub image_name: String,
}

fn validate(record: &DatasetRecord) -> Result<(), DatasetError> {
    let violation = |message: &str| {
        Err(DatasetError::SchemaViolation {
            instance_id: record.instance_id.clone(),
            message: message.to_string(),
        })
    };
    if record.patch.trim().is_empty() {
        return violation("empty patch");
    }
    if record.fail_to_pass.is_empty() {
        return violation("empty FAIL_TO_PASS");
    }
    if record
        .fail_to_pass
        .iter()
        .any(|t| record.pass_to_pass.contains(t))
    {
        return violation("FAIL_TO_PASS and PASS_TO_PASS intersect");
    }
    if record.instance_id.is_empty() || record.repo.is_empty() || record.image_name.is_empty() {
        return violation("missing identity field");
    }
    Ok(())
}

/// Join instances with issue texts and write
/// `logs/agent_datasets/<repo_name>_final.json`.
///
/// `issues_optional` corresponds to `--issue-mode=skip`: records are
/// written with an empty problem statement instead of failing.
pub fn assemble(
    workspace: &Path,
    repo_name: &str,
    instances: &[TaskInstance],
    issues: &[IssueRecord],
    issues_optional: bool,
) -> Result<PathBuf, DatasetError> {
    let issue_map: BTreeMap<&str, &str> = issues
        .iter()
        .map(|i| (i.instance_id.as_str(), i.problem_statement.as_str()))
        .collect();

    // Validate every record before writing anything; a fatal violation
    // must not leave a partial dataset behind.
    let mut records = Vec::with_capacity(instances.len());
    for instance in instances {
        let problem_statement = match issue_map.get(instance.instance_id.as_str()) {
            Some(text) => text.to_string(),
            None if issues_optional => String::new(),
            None => {
                return Err(DatasetError::MissingProblemStatement {
                    instance_id: instance.instance_id.clone(),
                })
            }
        };
        let record = DatasetRecord {
            instance_id: instance.instance_id.clone(),
            repo: instance.repo.clone(),
            patch: instance.patch.clone(),
            problem_statement,
            fail_to_pass: instance.fail_to_pass.clone(),
            pass_to_pass: instance.pass_to_pass.clone(),
            image_name: instance.image_name.clone(),
        };
        validate(&record)?;
        records.push(record);
    }

    let out_dir = workspace.join(LOG_DIR_AGENT_DATASETS);
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join(format!("{repo_name}_final.json"));
    std::fs::write(
        &out_path,
        serde_json::to_string_pretty(&records).unwrap_or_default(),
    )?;
    tracing::info!(path = %out_path.display(), records = records.len(), "dataset assembled");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> TaskInstance {
        TaskInstance {
            instance_id: id.to_string(),
            repo: "swesmith/o__r.abc1234d".to_string(),
            patch: "diff --git a/x b/x\n".to_string(),
            fail_to_pass: vec!["t1".to_string()],
            pass_to_pass: vec!["t2".to_string()],
            image_name: "swebench/swesmith.x86_64.o_1776_r.abc1234d".to_string(),
        }
    }

    fn issue(id: &str) -> IssueRecord {
        IssueRecord {
            instance_id: id.to_string(),
            problem_statement: "Something broke.".to_string(),
        }
    }

    #[test]
    fn record_has_exactly_seven_canonical_keys() {
        let record = DatasetRecord {
            instance_id: "i".to_string(),
            repo: "r".to_string(),
            patch: "p".to_string(),
            problem_statement: "s".to_string(),
            fail_to_pass: vec![],
            pass_to_pass: vec![],
            image_name: "img".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
        for key in [
            "instance_id",
            "repo",
            "patch",
            "problem_statement",
            "FAIL_TO_PASS",
            "PASS_TO_PASS",
            "image_name",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn extra_keys_rejected_on_read() {
        let raw = r#"{
            "instance_id": "i", "repo": "r", "patch": "p",
            "problem_statement": "s", "FAIL_TO_PASS": [], "PASS_TO_PASS": [],
            "image_name": "img", "extra": true
        }"#;
        assert!(serde_json::from_str::<DatasetRecord>(raw).is_err());
    }

    #[test]
    fn assembles_joined_records_in_insertion_order() {
        let tmp = tempfile::tempdir().unwrap();
        let instances = vec![instance("b__r.abc1234d.k__2"), instance("a__r.abc1234d.k__1")];
        let issues = vec![issue("a__r.abc1234d.k__1"), issue("b__r.abc1234d.k__2")];
        let path = assemble(tmp.path(), "o__r.abc1234d", &instances, &issues, false).unwrap();
        let records: Vec<DatasetRecord> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        // Insertion order of the instance list, not sorted.
        assert_eq!(records[0].instance_id, "b__r.abc1234d.k__2");
        assert_eq!(records[1].instance_id, "a__r.abc1234d.k__1");
        assert_eq!(records[0].problem_statement, "Something broke.");
    }

    #[test]
    fn missing_problem_statement_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = assemble(tmp.path(), "o__r.abc1234d", &[instance("x")], &[], false).unwrap_err();
        assert!(matches!(err, DatasetError::MissingProblemStatement { .. }));
        // Nothing was written.
        assert!(!tmp.path().join(LOG_DIR_AGENT_DATASETS).exists());
    }

    #[test]
    fn skip_mode_tolerates_missing_statements() {
        let tmp = tempfile::tempdir().unwrap();
        let path = assemble(tmp.path(), "o__r.abc1234d", &[instance("x")], &[], true).unwrap();
        let records: Vec<DatasetRecord> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(records[0].problem_statement, "");
    }

    #[test]
    fn empty_patch_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bad = instance("x");
        bad.patch = "  ".to_string();
        let err = assemble(tmp.path(), "o__r.abc1234d", &[bad], &[issue("x")], false).unwrap_err();
        assert!(matches!(err, DatasetError::SchemaViolation { .. }));
    }

    #[test]
    fn overlapping_test_sets_are_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bad = instance("x");
        bad.pass_to_pass = vec!["t1".to_string()];
        let err = assemble(tmp.path(), "o__r.abc1234d", &[bad], &[issue("x")], false).unwrap_err();
        assert!(matches!(err, DatasetError::SchemaViolation { .. }));
    }
}
