//! Candidate defect generation.
//!
//! Three generator families (procedural, LM-modify, LM-rewrite) share one
//! artifact pipeline: splice a rewritten entity back into its file, compute
//! a unified diff against the clean tree, and write the diff plus metadata
//! under a content-addressed name. Identical diffs collapse onto the same
//! file regardless of which worker produced them.

pub mod collect;
pub mod llm;
pub mod procedural;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use similar::TextDiff;

use crate::adapters::CodeEntity;
use crate::error::GenError;
use crate::util::{file_as_dir, short_hash, whitespace_only_change};

/// Filename prefix for diff artifacts.
pub const PREFIX_BUG: &str = "bug";
/// Filename prefix for metadata artifacts.
pub const PREFIX_METADATA: &str = "metadata";

/// A rewritten entity body plus provenance, before diffing.
#[derive(Debug, Clone)]
pub struct BugRewrite {
    /// Replacement source text for the entity's span.
    pub rewrite: String,
    /// Human-readable account of what the defect looks like.
    pub explanation: String,
    /// Generator that produced it, e.g. `func_pm_invert_boundary` or
    /// `lm_modify`.
    pub strategy: String,
    /// LLM cost in dollars; zero for procedural rewrites.
    pub cost: f64,
}

/// A finished candidate patch: unified diff + content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePatch {
    pub bug_kind: String,
    pub hash: String,
    pub diff: String,
    pub file_path: PathBuf,
    pub entity_name: String,
}

/// Metadata written alongside every diff artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugMetadata {
    pub strategy: String,
    pub explanation: String,
    pub cost: f64,
    pub file_path: PathBuf,
    pub entity_name: String,
    pub line_start: usize,
    pub line_end: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Replace `span` in `file_src` with `replacement`.
pub fn splice(file_src: &str, lo: usize, hi: usize, replacement: &str) -> String {
    format!("{}{}{}", &file_src[..lo], replacement, &file_src[hi..])
}

/// Unified diff in `git apply` format for a single file.
pub fn unified_diff(path: &Path, old: &str, new: &str) -> String {
    let display = path.to_string_lossy().replace('\\', "/");
    let body = TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{display}"), &format!("b/{display}"))
        .to_string();
    format!("diff --git a/{display} b/{display}\n{body}")
}

/// Build a candidate patch from an entity rewrite.
///
/// Returns `None` when the rewrite is byte-identical to the original or
/// differs only in whitespace; such candidates carry no defect signal and
/// are dropped before any artifact is written.
pub fn patch_from_rewrite(
    file_src: &str,
    entity: &CodeEntity,
    bug_kind: &str,
    rewrite: &str,
) -> Option<CandidatePatch> {
    if rewrite == entity.src_code || whitespace_only_change(rewrite, &entity.src_code) {
        return None;
    }
    let mutated = splice(file_src, entity.lo, entity.hi, rewrite);
    let diff = unified_diff(&entity.file_path, file_src, &mutated);
    if diff.trim().is_empty() {
        return None;
    }
    let hash = short_hash(diff.as_bytes());
    Some(CandidatePatch {
        bug_kind: bug_kind.to_string(),
        hash,
        diff,
        file_path: entity.file_path.clone(),
        entity_name: entity.name.clone(),
    })
}

/// Directory holding one entity's artifacts:
/// `logs/bug_gen/<repo>/<file_as_dir>/<entity_key>/`.
pub fn bug_directory(log_dir: &Path, entity: &CodeEntity) -> PathBuf {
    log_dir
        .join(file_as_dir(&entity.file_path))
        .join(entity.artifact_key())
}

/// Write `bug__<kind>__<hash>.diff` and its metadata file.
///
/// Re-runs producing the same diff land on the same path; that overwrite is
/// the intended dedup behavior.
pub fn write_artifacts(
    log_dir: &Path,
    entity: &CodeEntity,
    patch: &CandidatePatch,
    rewrite: &BugRewrite,
) -> Result<PathBuf, GenError> {
    let dir = bug_directory(log_dir, entity);
    std::fs::create_dir_all(&dir).map_err(|e| GenError::ArtifactWrite {
        path: dir.clone(),
        message: e.to_string(),
    })?;

    let stem = format!("{}__{}", patch.bug_kind, patch.hash);
    let diff_path = dir.join(format!("{PREFIX_BUG}__{stem}.diff"));
    let meta_path = dir.join(format!("{PREFIX_METADATA}__{stem}.json"));

    let metadata = BugMetadata {
        strategy: rewrite.strategy.clone(),
        explanation: rewrite.explanation.clone(),
        cost: rewrite.cost,
        file_path: entity.file_path.clone(),
        entity_name: entity.name.clone(),
        line_start: entity.line_start,
        line_end: entity.line_end,
        created_at: chrono::Utc::now(),
    };

    std::fs::write(&diff_path, &patch.diff).map_err(|e| GenError::ArtifactWrite {
        path: diff_path.clone(),
        message: e.to_string(),
    })?;
    std::fs::write(
        &meta_path,
        serde_json::to_string_pretty(&metadata).unwrap_or_default(),
    )
    .map_err(|e| GenError::ArtifactWrite {
        path: meta_path,
        message: e.to_string(),
    })?;
    Ok(diff_path)
}

/// Per-generator summary counts surfaced at the end of the stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenStats {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl GenStats {
    pub fn merge(&mut self, other: GenStats) {
        self.generated += other.generated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LanguageAdapter;
    use std::path::Path;

    fn entity_for(src: &str, name: &str) -> CodeEntity {
        LanguageAdapter::Javascript
            .entities_in_source(src, Path::new("add.js"))
            .unwrap()
            .into_iter()
            .find(|e| e.name == name)
            .unwrap()
    }

    #[test]
    fn splice_round_trip() {
        let src = "function add(a,b){return a+b}\nmodule.exports = add;\n";
        let entity = entity_for(src, "add");
        let same = splice(src, entity.lo, entity.hi, &entity.src_code);
        assert_eq!(same, src);
    }

    #[test]
    fn diff_carries_git_headers() {
        let src = "function add(a,b){return a+b}\n";
        let diff = unified_diff(Path::new("add.js"), src, "function add(a,b){return a-b}\n");
        assert!(diff.starts_with("diff --git a/add.js b/add.js\n"));
        assert!(diff.contains("--- a/add.js"));
        assert!(diff.contains("+++ b/add.js"));
        assert!(diff.contains("-function add(a,b){return a+b}"));
        assert!(diff.contains("+function add(a,b){return a-b}"));
    }

    #[test]
    fn identical_rewrite_is_dropped() {
        let src = "function add(a,b){return a+b}\n";
        let entity = entity_for(src, "add");
        assert!(patch_from_rewrite(src, &entity, "k", &entity.src_code).is_none());
    }

    #[test]
    fn whitespace_only_rewrite_is_dropped() {
        let src = "function add(a,b){return a+b}\n";
        let entity = entity_for(src, "add");
        let spaced = "function add(a, b){ return a+b }";
        assert!(patch_from_rewrite(src, &entity, "k", spaced).is_none());
    }

    #[test]
    fn hash_matches_diff_bytes() {
        let src = "function add(a,b){return a+b}\n";
        let entity = entity_for(src, "add");
        let patch = patch_from_rewrite(src, &entity, "k", "function add(a,b){return a-b}")
            .expect("real change produces a patch");
        assert_eq!(patch.hash, short_hash(patch.diff.as_bytes()));
    }

    #[test]
    fn identical_diffs_share_hash_and_path() {
        let src = "function add(a,b){return a+b}\n";
        let entity = entity_for(src, "add");
        let a = patch_from_rewrite(src, &entity, "k", "function add(a,b){return a-b}").unwrap();
        let b = patch_from_rewrite(src, &entity, "k", "function add(a,b){return a-b}").unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.diff, b.diff);
    }

    #[test]
    fn artifacts_written_in_pairs() {
        let tmp = tempfile::tempdir().unwrap();
        let src = "function add(a,b){return a+b}\n";
        let entity = entity_for(src, "add");
        let patch = patch_from_rewrite(src, &entity, "func_pm_invert_return", "function add(a,b){return a-b}")
            .unwrap();
        let rewrite = BugRewrite {
            rewrite: "function add(a,b){return a-b}".to_string(),
            explanation: "Return value computed with the wrong operator.".to_string(),
            strategy: "func_pm_invert_return".to_string(),
            cost: 0.0,
        };
        let diff_path = write_artifacts(tmp.path(), &entity, &patch, &rewrite).unwrap();
        assert!(diff_path.exists());
        let meta_path = diff_path
            .to_string_lossy()
            .replace("bug__", "metadata__")
            .replace(".diff", ".json");
        assert!(Path::new(&meta_path).exists());
        let meta: BugMetadata =
            serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta.entity_name, "add");
        assert_eq!(meta.strategy, "func_pm_invert_return");
    }
}
