//! Trajectory collection and SFT distillation.
//!
//! Takes a directory of agent trajectories plus an evaluation verdict per
//! instance, filters to resolved runs when asked, and serializes each
//! conversation as one JSON line in the chosen tool-call dialect. Records
//! longer than a training cutoff are kept as-is; truncation is a
//! training-time concern; the distiller only reports the distribution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SftError;

/// Root of distilled SFT output.
pub const SFT_OUT_DIR: &str = "trajectories_sft";

/// Tool-call parameters rendered with surrounding newlines in the XML
/// dialect, because their values are multi-line text.
const XML_MULTILINE_PARAMS: &[&str] = &["old_str", "new_str", "file_text"];

/// Serialization dialect for assistant tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum SftStyle {
    /// Keep native function-call messages.
    Tool,
    /// Render tool calls as XML-tagged text.
    Xml,
}

impl SftStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            SftStyle::Tool => "tool",
            SftStyle::Xml => "xml",
        }
    }
}

/// One tool call in a trajectory message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    /// Either a JSON object or a JSON-encoded string of one.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One message of an agent transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryMessage {
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// An agent's recorded attempt at one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    #[serde(default)]
    pub instance_id: Option<String>,
    pub messages: Vec<TrajectoryMessage>,
    #[serde(default)]
    pub model_patch: Option<String>,
}

/// One emitted SFT record (one JSON line).
#[derive(Debug, Serialize, Deserialize)]
pub struct SftRecord {
    pub instance_id: String,
    pub messages: serde_json::Value,
    pub model_patch: String,
    pub resolved: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DistillStats {
    pub read: usize,
    pub emitted: usize,
    pub resolved: usize,
    pub malformed: usize,
}

/// Load every `*.json` trajectory under `dir`. The instance id falls back
/// to the file stem when the record doesn't carry one.
pub fn load_trajectories(dir: &Path) -> Result<Vec<(String, Trajectory)>, SftError> {
    let mut found = Vec::new();
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|_| SftError::NoPredictions {
            dir: dir.to_path_buf(),
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    paths.sort();
    for path in paths {
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<Trajectory>(&raw) {
            Ok(traj) => {
                let id = traj.instance_id.clone().unwrap_or_else(|| {
                    path.file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default()
                });
                found.push((id, traj));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed trajectory skipped");
            }
        }
    }
    Ok(found)
}

/// Parse an evaluation report into `instance_id -> resolved`.
///
/// Accepts either a list of `{instance_id, resolved}` records or an object
/// keyed by instance id.
pub fn parse_eval_report(path: &Path) -> Result<BTreeMap<String, bool>, SftError> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| SftError::BadTrajectory {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    let mut map = BTreeMap::new();
    match &value {
        serde_json::Value::Array(items) => {
            for item in items {
                let (Some(id), Some(resolved)) = (
                    item.get("instance_id").and_then(|v| v.as_str()),
                    item.get("resolved").and_then(|v| v.as_bool()),
                ) else {
                    continue;
                };
                map.insert(id.to_string(), resolved);
            }
        }
        serde_json::Value::Object(entries) => {
            for (id, item) in entries {
                let resolved = item
                    .as_bool()
                    .or_else(|| item.get("resolved").and_then(|v| v.as_bool()))
                    .unwrap_or(false);
                map.insert(id.clone(), resolved);
            }
        }
        _ => {
            return Err(SftError::BadTrajectory {
                path: path.to_path_buf(),
                message: "evaluation report must be an array or object".to_string(),
            })
        }
    }
    Ok(map)
}

fn content_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn tool_call_to_xml(call: &ToolCall) -> String {
    let mut out = vec![format!("<function={}>", call.function.name)];
    let arguments = match &call.function.arguments {
        serde_json::Value::String(s) if !s.is_empty() => {
            serde_json::from_str::<serde_json::Value>(s).unwrap_or_default()
        }
        other => other.clone(),
    };
    if let Some(object) = arguments.as_object() {
        for (key, value) in object {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if XML_MULTILINE_PARAMS.contains(&key.as_str()) {
                out.push(format!("<parameter={key}>\n{rendered}\n</parameter>"));
            } else {
                out.push(format!("<parameter={key}>{rendered}</parameter>"));
            }
        }
    }
    out.push("</function>".to_string());
    out.join("\n")
}

/// Normalize one trajectory's messages into the chosen dialect.
pub fn transform_messages(traj: &Trajectory, style: SftStyle) -> serde_json::Value {
    match style {
        SftStyle::Tool => serde_json::to_value(&traj.messages).unwrap_or_default(),
        SftStyle::Xml => {
            let rendered: Vec<serde_json::Value> = traj
                .messages
                .iter()
                .map(|message| {
                    // Tool results read as user turns in the XML dialect.
                    let role = if message.role == "tool" {
                        "user"
                    } else {
                        message.role.as_str()
                    };
                    let content = if message.role == "assistant" {
                        let thought = message
                            .thought
                            .clone()
                            .unwrap_or_else(|| content_text(&message.content));
                        match &message.tool_calls {
                            Some(calls) if !calls.is_empty() => {
                                let actions = calls
                                    .iter()
                                    .map(tool_call_to_xml)
                                    .collect::<Vec<_>>()
                                    .join("\n");
                                format!("{thought}\n\n{actions}").trim().to_string()
                            }
                            _ => thought,
                        }
                    } else {
                        content_text(&message.content)
                    };
                    serde_json::json!({ "role": role, "content": content })
                })
                .collect();
            serde_json::Value::Array(rendered)
        }
    }
}

/// Distill trajectories into one JSONL file:
/// `trajectories_sft/<run_id>.<style>.jsonl`.
pub fn distill(
    workspace: &Path,
    traj_dir: &Path,
    resolved_map: &BTreeMap<String, bool>,
    run_id: &str,
    style: SftStyle,
    resolved_only: bool,
) -> Result<(PathBuf, DistillStats), SftError> {
    let trajectories = load_trajectories(traj_dir)?;
    let mut stats = DistillStats {
        read: trajectories.len(),
        ..Default::default()
    };
    if trajectories.is_empty() {
        return Err(SftError::NoPredictions {
            dir: traj_dir.to_path_buf(),
        });
    }

    let out_dir = workspace.join(SFT_OUT_DIR);
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join(format!("{run_id}.{}.jsonl", style.as_str()));

    let mut lines = Vec::new();
    let mut token_lengths: Vec<usize> = Vec::new();
    for (instance_id, traj) in &trajectories {
        let Some(model_patch) = traj.model_patch.clone().filter(|p| !p.trim().is_empty()) else {
            stats.malformed += 1;
            continue;
        };
        let resolved = resolved_map.get(instance_id).copied().unwrap_or(false);
        if resolved {
            stats.resolved += 1;
        }
        if resolved_only && !resolved {
            continue;
        }
        let record = SftRecord {
            instance_id: instance_id.clone(),
            messages: transform_messages(traj, style),
            model_patch,
            resolved,
        };
        let line = serde_json::to_string(&record).map_err(|e| SftError::BadTrajectory {
            path: traj_dir.to_path_buf(),
            message: e.to_string(),
        })?;
        token_lengths.push(line.len() / 4);
        lines.push(line);
        stats.emitted += 1;
    }

    let body = if lines.is_empty() {
        String::new()
    } else {
        lines.join("\n") + "\n"
    };
    std::fs::write(&out_path, body)?;
    report_length_distribution(&token_lengths);
    tracing::info!(
        path = %out_path.display(),
        read = stats.read,
        emitted = stats.emitted,
        resolved = stats.resolved,
        "SFT records written"
    );
    Ok((out_path, stats))
}

/// Over-length records are kept; training truncates. Report the shape so
/// operators can see what training will face.
fn report_length_distribution(token_lengths: &[usize]) {
    if token_lengths.is_empty() {
        return;
    }
    let mut sorted = token_lengths.to_vec();
    sorted.sort_unstable();
    let pct = |p: usize| sorted[(sorted.len() - 1) * p / 100];
    tracing::info!(
        min = sorted[0],
        p50 = pct(50),
        p90 = pct(90),
        max = sorted[sorted.len() - 1],
        "record token-length distribution (est. 4 bytes/token)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_traj(dir: &Path, id: &str, patch: &str, with_tool_call: bool) {
        let tool_calls = if with_tool_call {
            serde_json::json!([{
                "function": {
                    "name": "str_replace_editor",
                    "arguments": {"path": "src/add.py", "old_str": "a + b", "new_str": "a - b"}
                }
            }])
        } else {
            serde_json::Value::Null
        };
        let mut assistant = serde_json::json!({
            "role": "assistant",
            "content": "Fixing the operator.",
        });
        if with_tool_call {
            assistant["tool_calls"] = tool_calls;
        }
        let traj = serde_json::json!({
            "instance_id": id,
            "messages": [
                {"role": "system", "content": "You are an engineer."},
                {"role": "user", "content": "Addition is broken."},
                assistant,
            ],
            "model_patch": patch,
        });
        std::fs::write(dir.join(format!("{id}.json")), traj.to_string()).unwrap();
    }

    #[test]
    fn resolved_only_filters_to_report() {
        let tmp = tempfile::tempdir().unwrap();
        let traj_dir = tmp.path().join("trajs");
        std::fs::create_dir_all(&traj_dir).unwrap();
        for i in 0..5 {
            write_traj(&traj_dir, &format!("inst_{i}"), "diff --git a/x b/x\n", false);
        }
        let mut resolved = BTreeMap::new();
        resolved.insert("inst_0".to_string(), true);
        resolved.insert("inst_3".to_string(), true);
        resolved.insert("inst_4".to_string(), false);

        let (path, stats) = distill(
            tmp.path(),
            &traj_dir,
            &resolved,
            "run1",
            SftStyle::Tool,
            true,
        )
        .unwrap();
        assert_eq!(stats.read, 5);
        assert_eq!(stats.emitted, 2);
        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.trim_end().lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let record: SftRecord = serde_json::from_str(line).unwrap();
            assert!(record.resolved);
            assert!(!record.model_patch.is_empty());
        }
    }

    #[test]
    fn output_path_carries_run_and_style() {
        let tmp = tempfile::tempdir().unwrap();
        let traj_dir = tmp.path().join("trajs");
        std::fs::create_dir_all(&traj_dir).unwrap();
        write_traj(&traj_dir, "only", "diff\n", false);
        let (path, _) = distill(
            tmp.path(),
            &traj_dir,
            &BTreeMap::new(),
            "run7",
            SftStyle::Xml,
            false,
        )
        .unwrap();
        assert!(path.ends_with("trajectories_sft/run7.xml.jsonl"));
    }

    #[test]
    fn xml_style_renders_tool_calls() {
        let tmp = tempfile::tempdir().unwrap();
        let traj_dir = tmp.path().join("trajs");
        std::fs::create_dir_all(&traj_dir).unwrap();
        write_traj(&traj_dir, "inst_xml", "diff\n", true);
        let trajectories = load_trajectories(&traj_dir).unwrap();
        let rendered = transform_messages(&trajectories[0].1, SftStyle::Xml);
        let assistant = rendered.as_array().unwrap()[2]["content"].as_str().unwrap();
        assert!(assistant.contains("<function=str_replace_editor>"));
        // Multi-line params get newline-wrapped values.
        assert!(assistant.contains("<parameter=old_str>\na + b\n</parameter>"));
        assert!(assistant.contains("<parameter=path>src/add.py</parameter>"));
        assert!(assistant.contains("</function>"));
    }

    #[test]
    fn missing_patch_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let traj_dir = tmp.path().join("trajs");
        std::fs::create_dir_all(&traj_dir).unwrap();
        std::fs::write(
            traj_dir.join("no_patch.json"),
            serde_json::json!({
                "instance_id": "no_patch",
                "messages": [{"role": "user", "content": "hi"}]
            })
            .to_string(),
        )
        .unwrap();
        write_traj(&traj_dir, "good", "diff\n", false);
        let (_, stats) = distill(
            tmp.path(),
            &traj_dir,
            &BTreeMap::new(),
            "run",
            SftStyle::Tool,
            false,
        )
        .unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.emitted, 1);
    }

    #[test]
    fn empty_directory_is_no_predictions() {
        let tmp = tempfile::tempdir().unwrap();
        let traj_dir = tmp.path().join("trajs");
        std::fs::create_dir_all(&traj_dir).unwrap();
        let err = distill(
            tmp.path(),
            &traj_dir,
            &BTreeMap::new(),
            "run",
            SftStyle::Tool,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SftError::NoPredictions { .. }));
    }

    #[test]
    fn eval_report_both_shapes_parse() {
        let tmp = tempfile::tempdir().unwrap();
        let list = tmp.path().join("list.json");
        std::fs::write(
            &list,
            r#"[{"instance_id": "a", "resolved": true}, {"instance_id": "b", "resolved": false}]"#,
        )
        .unwrap();
        let map = parse_eval_report(&list).unwrap();
        assert_eq!(map["a"], true);
        assert_eq!(map["b"], false);

        let object = tmp.path().join("object.json");
        std::fs::write(&object, r#"{"a": {"resolved": true}, "b": false}"#).unwrap();
        let map = parse_eval_report(&object).unwrap();
        assert_eq!(map["a"], true);
        assert_eq!(map["b"], false);
    }
}
