//! Operator-level modifiers: boundary inversions and off-by-one loop bounds.

use std::ops::Range;

use rand::rngs::StdRng;
use tree_sitter::Node;

use crate::adapters::{CodeEntity, LanguageAdapter};

use super::{
    apply_edits, function_scoped, nodes_in_entity, parse_file, pick, ProceduralModifier,
    SpanEdit, COMPARISON_KINDS, LOOP_KINDS,
};

const BOUNDARY_SWAP: &[(&str, &str)] = &[("<", "<="), ("<=", "<"), (">", ">="), (">=", ">")];

/// Locate the boundary-operator token inside a comparison-like node and
/// return its span plus the swapped operator.
fn boundary_op_token(node: Node<'_>, file_src: &str) -> Option<(Range<usize>, &'static str)> {
    // JS/TS binary_expression exposes the operator as a field; the Python
    // comparison_operator holds it as an anonymous child.
    if let Some(op) = node.child_by_field_name("operator") {
        let text = &file_src[op.byte_range()];
        if let Some((_, swapped)) = BOUNDARY_SWAP.iter().find(|(from, _)| *from == text) {
            return Some((op.byte_range(), swapped));
        }
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some((_, swapped)) = BOUNDARY_SWAP.iter().find(|(from, _)| *from == child.kind()) {
            return Some((child.byte_range(), swapped));
        }
    }
    None
}

/// Swap a strict comparison for its inclusive twin (or vice versa).
pub struct InvertBoundary;

impl ProceduralModifier for InvertBoundary {
    fn name(&self) -> &'static str {
        "func_pm_invert_boundary"
    }

    fn explanation(&self) -> &'static str {
        "A comparison is off by one at its boundary."
    }

    fn applies(&self, entity: &CodeEntity) -> bool {
        function_scoped(entity) && entity.props.has_boundary_cmp
    }

    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String> {
        let tree = parse_file(file_src, lang)?;
        let comparisons = nodes_in_entity(&tree, entity, COMPARISON_KINDS);
        let with_boundary: Vec<(Range<usize>, &'static str)> = comparisons
            .iter()
            .filter_map(|n| boundary_op_token(*n, file_src))
            .collect();
        let (range, swapped) = pick(&with_boundary, rng)?.clone();
        Some(apply_edits(
            entity,
            vec![SpanEdit {
                range,
                replacement: swapped.to_string(),
            }],
        ))
    }
}

/// Shrink or flip a loop bound by one iteration.
pub struct OffByOneLoopBound;

impl ProceduralModifier for OffByOneLoopBound {
    fn name(&self) -> &'static str {
        "func_pm_loop_bound"
    }

    fn explanation(&self) -> &'static str {
        "A loop iterates one time too few or too many."
    }

    fn applies(&self, entity: &CodeEntity) -> bool {
        function_scoped(entity) && entity.props.has_loop
    }

    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String> {
        let tree = parse_file(file_src, lang)?;
        let loops = nodes_in_entity(&tree, entity, LOOP_KINDS);
        let target = pick(&loops, rng)?;
        // The loop header: iterable for Python `for`, condition otherwise.
        let header = target
            .child_by_field_name("right")
            .or_else(|| target.child_by_field_name("condition"))?;

        // Prefer flipping a boundary comparison in the header; fall back to
        // nudging an integer literal.
        if let Some((range, swapped)) = find_boundary_in(header, file_src) {
            return Some(apply_edits(
                entity,
                vec![SpanEdit {
                    range,
                    replacement: swapped.to_string(),
                }],
            ));
        }
        let literal = find_integer_in(header, file_src)?;
        let text = &file_src[literal.clone()];
        let value: i64 = text.parse().ok()?;
        let nudged = if value > 0 { value - 1 } else { value + 1 };
        Some(apply_edits(
            entity,
            vec![SpanEdit {
                range: literal,
                replacement: nudged.to_string(),
            }],
        ))
    }
}

fn find_boundary_in(node: Node<'_>, file_src: &str) -> Option<(Range<usize>, &'static str)> {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if COMPARISON_KINDS.contains(&n.kind()) {
            if let Some(found) = boundary_op_token(n, file_src) {
                return Some(found);
            }
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            stack.push(child);
        }
    }
    None
}

fn find_integer_in(node: Node<'_>, file_src: &str) -> Option<Range<usize>> {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if matches!(n.kind(), "integer" | "number") {
            // Floats and hex literals don't take a clean +/- 1.
            if file_src[n.byte_range()].chars().all(|c| c.is_ascii_digit()) {
                return Some(n.byte_range());
            }
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            stack.push(child);
        }
    }
    None
}
