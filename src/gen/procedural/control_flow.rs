//! Control-flow modifiers: negated conditions, swapped branches, shuffled
//! statements.

use rand::rngs::StdRng;
use rand::Rng;

use crate::adapters::{CodeEntity, LanguageAdapter};

use super::{
    apply_edits, function_scoped, nodes_in_entity, parse_file, pick, ProceduralModifier,
    SpanEdit, BLOCK_KINDS, IF_KINDS,
};

/// Negate the test of one conditional.
pub struct NegateCondition;

impl ProceduralModifier for NegateCondition {
    fn name(&self) -> &'static str {
        "func_pm_negate_cond"
    }

    fn explanation(&self) -> &'static str {
        "A conditional check evaluates to the opposite of what it should."
    }

    fn applies(&self, entity: &CodeEntity) -> bool {
        function_scoped(entity) && entity.props.has_if
    }

    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String> {
        let tree = parse_file(file_src, lang)?;
        let ifs = nodes_in_entity(&tree, entity, IF_KINDS);
        let target = pick(&ifs, rng)?;
        let condition = target.child_by_field_name("condition")?;
        let cond_text = &file_src[condition.byte_range()];
        let replacement = match lang {
            LanguageAdapter::Python => format!("not ({cond_text})"),
            // The JS/TS condition node is the parenthesized expression.
            _ => {
                let inner = cond_text
                    .strip_prefix('(')
                    .and_then(|s| s.strip_suffix(')'))
                    .unwrap_or(cond_text);
                format!("(!({inner}))")
            }
        };
        Some(apply_edits(
            entity,
            vec![SpanEdit {
                range: condition.byte_range(),
                replacement,
            }],
        ))
    }
}

/// Swap the then- and else-branches of one if/else.
pub struct ShuffleBranches;

impl ProceduralModifier for ShuffleBranches {
    fn name(&self) -> &'static str {
        "func_pm_ctrl_invert_if"
    }

    fn explanation(&self) -> &'static str {
        "The bodies of an if/else statement are inverted."
    }

    fn applies(&self, entity: &CodeEntity) -> bool {
        function_scoped(entity) && entity.props.has_if_else
    }

    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String> {
        let tree = parse_file(file_src, lang)?;
        let ifs = nodes_in_entity(&tree, entity, IF_KINDS);
        let with_else: Vec<_> = ifs
            .iter()
            .filter(|n| n.child_by_field_name("alternative").is_some())
            .collect();
        let target = pick(&with_else, rng)?;
        let consequence = target.child_by_field_name("consequence")?;
        let alternative = target.child_by_field_name("alternative")?;
        // The alternative is the else clause; its body is the last named
        // child (a block in Python, a statement or block in JS). An
        // elif/else-if alternative has no swappable body.
        let else_body = alternative
            .child_by_field_name("body")
            .or_else(|| alternative.named_child(alternative.named_child_count().wrapping_sub(1)))?;
        if else_body.kind() == "if_statement" {
            return None;
        }
        let cons_text = file_src[consequence.byte_range()].to_string();
        let else_text = file_src[else_body.byte_range()].to_string();
        if cons_text == else_text {
            return None;
        }
        Some(apply_edits(
            entity,
            vec![
                SpanEdit {
                    range: consequence.byte_range(),
                    replacement: else_text,
                },
                SpanEdit {
                    range: else_body.byte_range(),
                    replacement: cons_text,
                },
            ],
        ))
    }
}

/// Swap two adjacent statements inside one block.
pub struct SwapSiblingStatements;

impl ProceduralModifier for SwapSiblingStatements {
    fn name(&self) -> &'static str {
        "func_pm_ctrl_shuffle"
    }

    fn explanation(&self) -> &'static str {
        "Statements inside the function are out of order."
    }

    fn applies(&self, entity: &CodeEntity) -> bool {
        // Needs a statement sequence worth reordering.
        function_scoped(entity) && (entity.props.has_assignment || entity.props.has_call)
    }

    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String> {
        let tree = parse_file(file_src, lang)?;
        let blocks = nodes_in_entity(&tree, entity, BLOCK_KINDS);
        let swappable: Vec<_> = blocks
            .iter()
            .filter(|b| b.named_child_count() >= 2)
            .collect();
        let block = pick(&swappable, rng)?;
        let count = block.named_child_count();
        let idx = rng.gen_range(0..count - 1);
        let first = block.named_child(idx)?;
        let second = block.named_child(idx + 1)?;
        // Swapping a return with its predecessor changes behavior reliably;
        // swapping comments does not. Skip comment nodes.
        if first.kind() == "comment" || second.kind() == "comment" {
            return None;
        }
        let first_text = file_src[first.byte_range()].to_string();
        let second_text = file_src[second.byte_range()].to_string();
        if first_text == second_text {
            return None;
        }
        Some(apply_edits(
            entity,
            vec![
                SpanEdit {
                    range: first.byte_range(),
                    replacement: second_text,
                },
                SpanEdit {
                    range: second.byte_range(),
                    replacement: first_text,
                },
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::run_modifier;
    use super::*;

    #[test]
    fn negate_python_condition() {
        let src = "def check(x):\n    if x > 0:\n        return True\n    return False\n";
        let mutated = run_modifier(&NegateCondition, src, "check", LanguageAdapter::Python).unwrap();
        assert!(mutated.contains("if not (x > 0):"), "{mutated}");
    }

    #[test]
    fn negate_js_condition() {
        let src = "function check(x) {\n  if (x > 0) {\n    return true;\n  }\n  return false;\n}\n";
        let mutated =
            run_modifier(&NegateCondition, src, "check", LanguageAdapter::Javascript).unwrap();
        assert!(mutated.contains("if (!(x > 0))"), "{mutated}");
    }

    #[test]
    fn invert_if_else_bodies() {
        let src = "def sign(x):\n    if x >= 0:\n        return 1\n    else:\n        return -1\n";
        let mutated = run_modifier(&ShuffleBranches, src, "sign", LanguageAdapter::Python).unwrap();
        let if_idx = mutated.find("if x >= 0:").unwrap();
        let minus_idx = mutated.find("return -1").unwrap();
        let plus_idx = mutated.rfind("return 1").unwrap();
        assert!(minus_idx > if_idx && minus_idx < plus_idx, "{mutated}");
    }

    #[test]
    fn invert_if_else_js() {
        let src = "function sign(x) {\n  if (x >= 0) {\n    return 1;\n  } else {\n    return -1;\n  }\n}\n";
        let mutated =
            run_modifier(&ShuffleBranches, src, "sign", LanguageAdapter::Javascript).unwrap();
        assert!(mutated.find("return -1").unwrap() < mutated.find("return 1;").unwrap());
    }

    #[test]
    fn negate_bound_arrow_function() {
        let src = "const check = (x) => {\n  if (x > 0) {\n    return 1;\n  }\n  return 0;\n};\n";
        let mutated =
            run_modifier(&NegateCondition, src, "check", LanguageAdapter::Javascript).unwrap();
        assert!(mutated.contains("if (!(x > 0))"), "{mutated}");
    }

    #[test]
    fn rewrite_never_reaches_nested_function() {
        // The only conditional lives in the nested helper; the outer
        // function's own body offers no rewrite site.
        let src = "\
def outer(xs):
    def keep(x):
        if x > 0:
            return x
        return 0
    return [keep(x) for x in xs]
";
        assert!(run_modifier(&NegateCondition, src, "outer", LanguageAdapter::Python).is_none());
        // The nested entity still gets its own rewrite.
        let mutated = run_modifier(&NegateCondition, src, "keep", LanguageAdapter::Python).unwrap();
        assert!(mutated.contains("if not (x > 0):"), "{mutated}");
    }

    #[test]
    fn swap_statements_changes_order() {
        let src = "def build(a, b):\n    x = a + 1\n    y = b + 2\n    return x * y\n";
        let mutated =
            run_modifier(&SwapSiblingStatements, src, "build", LanguageAdapter::Python).unwrap();
        assert_ne!(mutated, src);
    }

    #[test]
    fn no_else_means_no_shuffle() {
        let src = "def f(x):\n    if x:\n        return 1\n    return 2\n";
        assert!(run_modifier(&ShuffleBranches, src, "f", LanguageAdapter::Python).is_none());
    }
}
