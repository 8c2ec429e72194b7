//! Procedural bug generation.
//!
//! Each modifier declares an applicability predicate over entity properties
//! and a rewrite that mutates the entity's source. Rewrites are byte-span
//! edits computed against a fresh parse of the containing file, so the
//! returned text splices back over the entity span exactly. The driver
//! re-parses the mutated file and drops any rewrite that no longer parses.

mod control_flow;
mod operations;
mod remove;

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tree_sitter::{Node, Tree};

use crate::adapters::{CodeEntity, EntityKind, LanguageAdapter};
use crate::error::GenError;
use crate::gen::{patch_from_rewrite, write_artifacts, BugRewrite, GenStats};

pub use control_flow::{NegateCondition, ShuffleBranches, SwapSiblingStatements};
pub use operations::{InvertBoundary, OffByOneLoopBound};
pub use remove::{DropReturnValue, RemoveConditional};

/// An AST-directed rewrite family.
pub trait ProceduralModifier: Send + Sync {
    /// Variant name, used in artifact filenames and instance ids.
    fn name(&self) -> &'static str;

    /// One-line account of the planted defect, written into metadata.
    fn explanation(&self) -> &'static str;

    /// Entities below this complexity are too trivial to mutate usefully.
    fn min_complexity(&self) -> u32 {
        3
    }

    /// Applicability predicate over the entity's structural properties.
    fn applies(&self, entity: &CodeEntity) -> bool;

    /// Produce mutated source for the entity's span, or `None` when no
    /// rewrite site exists.
    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String>;
}

/// The modifier family is function-scoped: it mutates functions and
/// methods, never class entities. A class-level rewrite that reached into a
/// method body would duplicate the method entity's own candidates under the
/// class's name, mis-attributing provenance in metadata and the manifest.
pub(crate) fn function_scoped(entity: &CodeEntity) -> bool {
    matches!(entity.kind, EntityKind::Function | EntityKind::Method)
}

/// The full modifier family, in deterministic order.
pub fn all_modifiers() -> Vec<Box<dyn ProceduralModifier>> {
    vec![
        Box::new(RemoveConditional),
        Box::new(NegateCondition),
        Box::new(ShuffleBranches),
        Box::new(SwapSiblingStatements),
        Box::new(InvertBoundary),
        Box::new(OffByOneLoopBound),
        Box::new(DropReturnValue),
    ]
}

/// Run the procedural generator over extracted entities.
///
/// For each (entity, variant) pair where the predicate holds, emits at most
/// one candidate. Stops once `max_bugs` candidates have been written;
/// `max_bugs == 0` emits nothing and succeeds.
pub fn generate(
    repo_root: &Path,
    log_dir: &Path,
    entities: &[CodeEntity],
    lang: LanguageAdapter,
    max_bugs: usize,
    seed: u64,
) -> Result<GenStats, GenError> {
    let mut stats = GenStats::default();
    if max_bugs == 0 {
        return Ok(stats);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut file_cache: HashMap<PathBuf, String> = HashMap::new();

    for modifier in all_modifiers() {
        let mut candidates: Vec<&CodeEntity> = entities
            .iter()
            .filter(|e| e.complexity >= modifier.min_complexity() && modifier.applies(e))
            .collect();
        candidates.shuffle(&mut rng);
        tracing::info!(
            modifier = modifier.name(),
            candidates = candidates.len(),
            "procedural candidates"
        );

        for entity in candidates {
            if stats.generated >= max_bugs {
                return Ok(stats);
            }
            let file_src = match file_cache.entry(entity.file_path.clone()) {
                std::collections::hash_map::Entry::Occupied(o) => o.into_mut(),
                std::collections::hash_map::Entry::Vacant(v) => {
                    let Ok(contents) = std::fs::read_to_string(repo_root.join(&entity.file_path))
                    else {
                        stats.failed += 1;
                        continue;
                    };
                    v.insert(contents)
                }
            }
            .clone();

            let Some(rewrite_text) = modifier.rewrite(&file_src, entity, lang, &mut rng) else {
                stats.skipped += 1;
                continue;
            };
            // A mutated file that no longer parses would fail every test for
            // the wrong reason; drop it here.
            let mutated = crate::gen::splice(&file_src, entity.lo, entity.hi, &rewrite_text);
            if !lang.parses(&mutated) {
                stats.failed += 1;
                continue;
            }
            let Some(patch) = patch_from_rewrite(&file_src, entity, modifier.name(), &rewrite_text)
            else {
                stats.skipped += 1;
                continue;
            };
            let rewrite = BugRewrite {
                rewrite: rewrite_text,
                explanation: modifier.explanation().to_string(),
                strategy: modifier.name().to_string(),
                cost: 0.0,
            };
            write_artifacts(log_dir, entity, &patch, &rewrite)?;
            stats.generated += 1;
        }
    }
    Ok(stats)
}

// ── Shared tree helpers for modifier implementations ──

/// A byte-span edit in file coordinates.
pub(crate) struct SpanEdit {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Apply edits (in file coordinates) to the entity's slice. Edits must be
/// disjoint and lie inside the entity span.
pub(crate) fn apply_edits(entity: &CodeEntity, mut edits: Vec<SpanEdit>) -> String {
    edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    let mut slice = entity.src_code.clone();
    for edit in edits {
        debug_assert!(edit.range.start >= entity.lo && edit.range.end <= entity.hi);
        let lo = edit.range.start - entity.lo;
        let hi = edit.range.end - entity.lo;
        slice.replace_range(lo..hi, &edit.replacement);
    }
    slice
}

/// Parse the file and return the tree; `None` when the grammar fails.
pub(crate) fn parse_file(file_src: &str, lang: LanguageAdapter) -> Option<Tree> {
    lang.parser().ok()?.parse(file_src, None)
}

/// Collect all nodes within the entity's own scope whose kind is in
/// `kinds`, in source order. The search stops at nested definition
/// boundaries: a node inside a nested function or method belongs to that
/// entity, and editing it here would mis-attribute the candidate.
pub(crate) fn nodes_in_entity<'t>(
    tree: &'t Tree,
    entity: &CodeEntity,
    kinds: &[&str],
) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let Some(scope) = tree
        .root_node()
        .descendant_for_byte_range(entity.lo, entity.hi)
    else {
        return found;
    };
    let scope = resolve_scope(scope);
    let mut stack = vec![scope];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind())
            && node.start_byte() >= entity.lo
            && node.end_byte() <= entity.hi
        {
            found.push(node);
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if !crate::adapters::NESTED_SCOPE_KINDS.contains(&child.kind()) {
                stack.push(child);
            }
        }
    }
    found.sort_by_key(|n| n.start_byte());
    found
}

/// Unwrap span nodes down to the entity's own definition, so the
/// definition itself doesn't read as a nested boundary: decorated
/// definitions wrap the def, and a variable-bound function's span is the
/// declaration statement around the function value.
fn resolve_scope(scope: Node<'_>) -> Node<'_> {
    if let Some(def) = scope.child_by_field_name("definition") {
        return def;
    }
    match scope.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = scope.walk();
            let result = scope
                .children(&mut cursor)
                .find(|c| c.kind() == "variable_declarator")
                .and_then(|d| d.child_by_field_name("value"))
                .unwrap_or(scope);
            result
        }
        "variable_declarator" => scope.child_by_field_name("value").unwrap_or(scope),
        _ => scope,
    }
}

/// Pick one element at random.
pub(crate) fn pick<'a, T>(items: &'a [T], rng: &mut StdRng) -> Option<&'a T> {
    items.choose(rng)
}

/// Node kinds for if statements across the supported grammars.
pub(crate) const IF_KINDS: &[&str] = &["if_statement"];
/// Node kinds for loops.
pub(crate) const LOOP_KINDS: &[&str] = &[
    "for_statement",
    "while_statement",
    "for_in_statement",
    "do_statement",
];
/// Node kinds for return statements.
pub(crate) const RETURN_KINDS: &[&str] = &["return_statement"];
/// Node kinds for statement blocks.
pub(crate) const BLOCK_KINDS: &[&str] = &["block", "statement_block"];
/// Node kinds carrying comparison operators.
pub(crate) const COMPARISON_KINDS: &[&str] = &["comparison_operator", "binary_expression"];

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Extract the single entity named `name` from `src`.
    pub fn entity(src: &str, name: &str, lang: LanguageAdapter) -> CodeEntity {
        lang.entities_in_source(src, Path::new(test_file_name(lang)))
            .unwrap()
            .into_iter()
            .find(|e| e.name == name)
            .unwrap_or_else(|| panic!("entity {name} not found"))
    }

    fn test_file_name(lang: LanguageAdapter) -> &'static str {
        match lang {
            LanguageAdapter::Python => "m.py",
            LanguageAdapter::Javascript => "m.js",
            LanguageAdapter::Typescript => "m.ts",
        }
    }

    /// Run a modifier with a fixed seed and return the mutated file.
    pub fn run_modifier(
        modifier: &dyn ProceduralModifier,
        src: &str,
        name: &str,
        lang: LanguageAdapter,
    ) -> Option<String> {
        let e = entity(src, name, lang);
        let mut rng = StdRng::seed_from_u64(24);
        let rewrite = modifier.rewrite(src, &e, lang, &mut rng)?;
        let mutated = crate::gen::splice(src, e.lo, e.hi, &rewrite);
        assert!(lang.parses(&mutated), "mutated source must parse:\n{mutated}");
        Some(mutated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_bugs_zero_emits_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = generate(
            tmp.path(),
            tmp.path(),
            &[],
            LanguageAdapter::Python,
            0,
            24,
        )
        .unwrap();
        assert_eq!(stats.generated, 0);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn generic_modifiers_never_fire_on_class_entities() {
        // Both methods are rich in control flow; only the method entities
        // may match, never the class itself.
        let src = "\
class Ledger:
    def credit(self, amount):
        if amount > 0:
            self.total += amount
            return self.total
        return None

    def drain(self, entries):
        for e in entries:
            if e < 0:
                self.total += e
        return self.total
";
        let entities = LanguageAdapter::Python
            .entities_in_source(src, Path::new("ledger.py"))
            .unwrap();
        let class = entities
            .iter()
            .find(|e| e.kind == crate::adapters::EntityKind::Class)
            .unwrap();
        let method = entities.iter().find(|e| e.name == "Ledger.credit").unwrap();
        for modifier in all_modifiers() {
            assert!(
                !modifier.applies(class),
                "{} fired on a class entity",
                modifier.name()
            );
        }
        // The same predicates still admit the methods.
        assert!(RemoveConditional.applies(method));
        assert!(InvertBoundary.applies(method));
    }

    #[test]
    fn no_artifacts_attributed_to_class_entities() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let src = "\
class Ledger:
    def credit(self, amount):
        if amount > 0:
            self.total += amount
            return self.total
        return None
";
        std::fs::write(repo.join("ledger.py"), src).unwrap();
        let entities = LanguageAdapter::Python
            .entities_in_source(src, Path::new("ledger.py"))
            .unwrap();
        let class = entities
            .iter()
            .find(|e| e.kind == crate::adapters::EntityKind::Class)
            .unwrap();

        let log_dir = tmp.path().join("logs");
        let stats = generate(&repo, &log_dir, &entities, LanguageAdapter::Python, 20, 24).unwrap();
        assert!(stats.generated >= 1, "method bugs expected, got {stats:?}");

        let class_dir = crate::gen::bug_directory(&log_dir, class);
        assert!(
            !class_dir.exists(),
            "artifacts written under the class entity's directory"
        );
    }

    #[test]
    fn generates_bugs_for_python_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();
        let src = "def clamp(x, lo, hi):\n    if x < lo:\n        return lo\n    if x > hi:\n        return hi\n    return x\n";
        std::fs::write(repo.join("src/clamp.py"), src).unwrap();

        let entities = LanguageAdapter::Python
            .entities_in_source(src, Path::new("src/clamp.py"))
            .unwrap();
        let log_dir = tmp.path().join("logs");
        let stats = generate(&repo, &log_dir, &entities, LanguageAdapter::Python, 10, 24).unwrap();
        assert!(stats.generated >= 1, "expected at least one bug, got {stats:?}");

        // Every artifact pair exists and hash matches diff bytes.
        for entry in walkdir::WalkDir::new(&log_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("bug__"))
        {
            let diff = std::fs::read(entry.path()).unwrap();
            let name = entry.file_name().to_string_lossy().to_string();
            let hash = name
                .trim_end_matches(".diff")
                .rsplit("__")
                .next()
                .unwrap()
                .to_string();
            assert_eq!(hash, crate::util::short_hash(&diff));
        }
    }
}
