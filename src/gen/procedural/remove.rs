//! Removal modifiers: dropped conditionals and discarded return values.

use rand::rngs::StdRng;

use crate::adapters::{CodeEntity, LanguageAdapter};

use super::{
    apply_edits, function_scoped, nodes_in_entity, parse_file, pick, ProceduralModifier,
    SpanEdit, IF_KINDS, RETURN_KINDS,
};

/// Remove one conditional subtree entirely.
pub struct RemoveConditional;

impl ProceduralModifier for RemoveConditional {
    fn name(&self) -> &'static str {
        "func_pm_remove_cond"
    }

    fn explanation(&self) -> &'static str {
        "A conditional and its body are missing from the function."
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
        // Removing the only statement of a Python block leaves it empty and
        // unparseable; substitute `pass` there.
        let replacement = match (lang, target.parent()) {
            (LanguageAdapter::Python, Some(parent))
                if parent.kind() == "block" && parent.named_child_count() == 1 =>
            {
                "pass".to_string()
            }
            _ => String::new(),
        };
        Some(apply_edits(
            entity,
            vec![SpanEdit {
                range: target.byte_range(),
                replacement,
            }],
        ))
    }
}

/// Turn `return expr` into a bare `return`.
pub struct DropReturnValue;

impl ProceduralModifier for DropReturnValue {
    fn name(&self) -> &'static str {
        "func_pm_drop_return"
    }

    fn explanation(&self) -> &'static str {
        "A return statement discards the value it should produce."
    }

    fn min_complexity(&self) -> u32 {
        // Even a trivial function with a returned value makes a usable bug.
        1
    }

    fn applies(&self, entity: &CodeEntity) -> bool {
        function_scoped(entity) && entity.props.has_return_value
    }

    fn rewrite(
        &self,
        file_src: &str,
        entity: &CodeEntity,
        lang: LanguageAdapter,
        rng: &mut StdRng,
    ) -> Option<String> {
        let tree = parse_file(file_src, lang)?;
        let returns = nodes_in_entity(&tree, entity, RETURN_KINDS);
        let with_value: Vec<_> = returns
            .iter()
            .filter(|n| n.named_child_count() > 0)
            .collect();
        let target = pick(&with_value, rng)?;
        let replacement = match lang {
            LanguageAdapter::Python => "return".to_string(),
            _ => "return;".to_string(),
        };
        Some(apply_edits(
            entity,
            vec![SpanEdit {
                range: target.byte_range(),
                replacement,
            }],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::run_modifier;
    use super::*;

    #[test]
    fn remove_conditional_python() {
        let src = "def total(xs):\n    t = 0\n    for x in xs:\n        if x > 0:\n            t += x\n    return t\n";
        let mutated =
            run_modifier(&RemoveConditional, src, "total", LanguageAdapter::Python).unwrap();
        // The conditional guarding the accumulation is gone; `pass` holds
        // the loop body open.
        assert!(!mutated.contains("if x > 0:"), "{mutated}");
        assert!(mutated.contains("pass"), "{mutated}");
    }

    #[test]
    fn remove_conditional_keeps_sibling_statements() {
        let src = "def norm(x):\n    if x < 0:\n        x = -x\n    return x\n";
        let mutated =
            run_modifier(&RemoveConditional, src, "norm", LanguageAdapter::Python).unwrap();
        assert!(!mutated.contains("if x < 0:"));
        assert!(mutated.contains("return x"));
    }

    #[test]
    fn remove_conditional_js() {
        let src = "function norm(x) {\n  if (x < 0) {\n    x = -x;\n  }\n  return x;\n}\n";
        let mutated =
            run_modifier(&RemoveConditional, src, "norm", LanguageAdapter::Javascript).unwrap();
        assert!(!mutated.contains("if (x < 0)"));
        assert!(mutated.contains("return x;"));
    }

    #[test]
    fn drop_return_value_python() {
        let src = "def add(a, b):\n    return a + b\n";
        let mutated =
            run_modifier(&DropReturnValue, src, "add", LanguageAdapter::Python).unwrap();
        assert!(mutated.contains("def add(a, b):\n    return\n"), "{mutated}");
    }

    #[test]
    fn drop_return_value_js() {
        let src = "function add(a, b) {\n  return a + b;\n}\n";
        let mutated =
            run_modifier(&DropReturnValue, src, "add", LanguageAdapter::Javascript).unwrap();
        assert!(mutated.contains("return;"), "{mutated}");
        assert!(!mutated.contains("a + b;"), "{mutated}");
    }

    #[test]
    fn bare_return_not_targeted() {
        let src = "def log(msg):\n    print(msg)\n    return\n";
        assert!(run_modifier(&DropReturnValue, src, "log", LanguageAdapter::Python).is_none());
    }
}
