//! Patch collection.
//!
//! Walks a repo's bug_gen directory and consolidates every candidate diff
//! into one manifest for the validator. Ordering is lexicographic by path
//! then hash so two runs over identical inputs produce byte-identical
//! manifests.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GenError;
use crate::gen::{BugMetadata, PREFIX_BUG, PREFIX_METADATA};

/// One manifest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// `<repo_name>.<kind>__<hash>`; becomes the instance id if the
    /// candidate survives validation.
    pub instance_id_stub: String,
    pub patch: String,
    pub bug_kind: String,
    /// `<file>:<entity-name>` provenance.
    pub source_entity: String,
}

/// Collect all `bug__*.diff` artifacts under `bug_gen_dir` into
/// `<repo>_all_patches.json` next to it. Returns the manifest path and the
/// entries written.
pub fn collect_patches(
    bug_gen_dir: &Path,
    repo_name: &str,
) -> Result<(PathBuf, Vec<ManifestEntry>), GenError> {
    let mut diff_paths: Vec<PathBuf> = walkdir::WalkDir::new(bug_gen_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.starts_with(&format!("{PREFIX_BUG}__")) && name.ends_with(".diff")
        })
        .map(|e| e.into_path())
        .collect();
    diff_paths.sort();

    let mut entries = Vec::with_capacity(diff_paths.len());
    for diff_path in diff_paths {
        let file_name = diff_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        // bug__<kind>__<hash>.diff
        let stem = file_name
            .trim_start_matches(&format!("{PREFIX_BUG}__"))
            .trim_end_matches(".diff")
            .to_string();
        let patch = std::fs::read_to_string(&diff_path)?;

        let meta_path = diff_path.with_file_name(format!("{PREFIX_METADATA}__{stem}.json"));
        let source_entity = std::fs::read_to_string(&meta_path)
            .ok()
            .and_then(|raw| serde_json::from_str::<BugMetadata>(&raw).ok())
            .map(|m| format!("{}:{}", m.file_path.display(), m.entity_name))
            .unwrap_or_default();

        let bug_kind = stem
            .rsplit_once("__")
            .map(|(kind, _)| kind.to_string())
            .unwrap_or_else(|| stem.clone());

        entries.push(ManifestEntry {
            instance_id_stub: format!("{repo_name}.{stem}"),
            patch,
            bug_kind,
            source_entity,
        });
    }

    let manifest_path = bug_gen_dir
        .parent()
        .unwrap_or(bug_gen_dir)
        .join(format!("{repo_name}_all_patches.json"));
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&entries)?)?;
    tracing::info!(
        manifest = %manifest_path.display(),
        patches = entries.len(),
        "collected candidate patches"
    );
    Ok((manifest_path, entries))
}

impl From<serde_json::Error> for GenError {
    fn from(e: serde_json::Error) -> Self {
        GenError::ArtifactWrite {
            path: PathBuf::new(),
            message: e.to_string(),
        }
    }
}

/// Read a manifest back for the validator.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>, std::io::Error> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}
