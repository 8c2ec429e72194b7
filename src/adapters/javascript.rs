//! JavaScript and TypeScript entity extraction.
//!
//! One walker serves both grammars; the TypeScript grammar is a superset
//! and its type-only declarations (interfaces, type aliases, enums, ambient
//! declarations, overload signatures) simply never match a function-like
//! pattern with a body, so they are excluded by construction.

use std::path::Path;

use tree_sitter::Node;

use super::{analyze, line_range, node_text, CodeEntity, EntityKind, LanguageAdapter, JS_KINDS};

const FUNCTION_VALUE_KINDS: &[&str] = &["arrow_function", "function_expression", "generator_function"];

pub(crate) fn collect_entities(
    root: Node<'_>,
    source: &str,
    file_path: &Path,
    _adapter: LanguageAdapter,
    out: &mut Vec<CodeEntity>,
) {
    walk(root, source, file_path, None, out);
}

fn walk(
    node: Node<'_>,
    source: &str,
    file_path: &Path,
    enclosing_class: Option<&str>,
    out: &mut Vec<CodeEntity>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_declaration" | "generator_function_declaration" => {
                emit_named(child, source, file_path, EntityKind::Function, None, out);
                if let Some(body) = child.child_by_field_name("body") {
                    walk(body, source, file_path, None, out);
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                emit_class(child, source, file_path, out);
            }
            "lexical_declaration" | "variable_declaration" => {
                emit_bound_functions(child, source, file_path, out);
            }
            "method_definition" => {
                // Only reached when walking a class body; overload
                // signatures carry no body and are skipped.
                if child.child_by_field_name("body").is_some() {
                    emit_named(
                        child,
                        source,
                        file_path,
                        EntityKind::Method,
                        enclosing_class,
                        out,
                    );
                }
            }
            "export_statement" => {
                // Recurse into the exported declaration.
                walk(child, source, file_path, enclosing_class, out);
            }
            _ => {
                walk(child, source, file_path, enclosing_class, out);
            }
        }
    }
}

fn emit_named(
    node: Node<'_>,
    source: &str,
    file_path: &Path,
    kind: EntityKind,
    enclosing_class: Option<&str>,
    out: &mut Vec<CodeEntity>,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let bare = node_text(name_node, source);
    let name = match enclosing_class {
        Some(class) => format!("{class}.{bare}"),
        None => bare.to_string(),
    };
    push_entity(node, node, source, file_path, kind, name, out);
}

fn emit_class(node: Node<'_>, source: &str, file_path: &Path, out: &mut Vec<CodeEntity>) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let class_name = node_text(name_node, source).to_string();
    push_entity(
        node,
        node,
        source,
        file_path,
        EntityKind::Class,
        class_name.clone(),
        out,
    );
    if let Some(body) = node.child_by_field_name("body") {
        walk(body, source, file_path, Some(&class_name), out);
    }
}

/// `const add = (a, b) => a + b` and friends: emit one entity per
/// declarator whose value is function-like, named by the binding.
fn emit_bound_functions(node: Node<'_>, source: &str, file_path: &Path, out: &mut Vec<CodeEntity>) {
    let declarator_count = {
        let mut cursor = node.walk();
        node.children(&mut cursor)
            .filter(|c| c.kind() == "variable_declarator")
            .count()
    };
    let mut cursor = node.walk();
    for declarator in node.children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let Some(value) = declarator.child_by_field_name("value") else {
            continue;
        };
        if !FUNCTION_VALUE_KINDS.contains(&value.kind()) {
            continue;
        }
        let Some(name_node) = declarator.child_by_field_name("name") else {
            continue;
        };
        let name = node_text(name_node, source).to_string();
        // For a lone declarator the span covers the whole statement so a
        // rewrite replaces `const add = ...;` in one piece. Multiple
        // declarators must not share a span, so each keeps its own.
        let span_node = if declarator_count == 1 { node } else { declarator };
        push_entity(span_node, value, source, file_path, EntityKind::Function, name, out);
    }
}

fn push_entity(
    span_node: Node<'_>,
    body_node: Node<'_>,
    source: &str,
    file_path: &Path,
    kind: EntityKind,
    name: String,
    out: &mut Vec<CodeEntity>,
) {
    let lo = span_node.start_byte();
    let hi = span_node.end_byte();
    let (line_start, line_end) = line_range(source, lo, hi);
    let (props, complexity) = analyze(body_node, source, &JS_KINDS);
    out.push(CodeEntity {
        file_path: file_path.to_path_buf(),
        kind,
        name,
        lo,
        hi,
        line_start,
        line_end,
        src_code: source[lo..hi].to_string(),
        props,
        complexity,
    });
}

#[cfg(test)]
mod tests {
    use super::super::{EntityKind, LanguageAdapter};
    use std::path::Path;

    #[test]
    fn js_function_forms() {
        let src = r#"
function add(a, b) { return a + b; }
const mul = (a, b) => a * b;
var legacy = function (x) { return x; };
class Calc {
  square(n) { return n * n; }
}
"#;
        let entities = LanguageAdapter::Javascript
            .entities_in_source(src, Path::new("calc.js"))
            .unwrap();
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"add"));
        assert!(names.contains(&"mul"));
        assert!(names.contains(&"legacy"));
        assert!(names.contains(&"Calc"));
        assert!(names.contains(&"Calc.square"));

        let square = entities.iter().find(|e| e.name == "Calc.square").unwrap();
        assert_eq!(square.kind, EntityKind::Method);
    }

    #[test]
    fn js_round_trip() {
        let src = "function add(a,b){return a+b}\nconst t = add(1,2);\n";
        let entities = LanguageAdapter::Javascript
            .entities_in_source(src, Path::new("a.js"))
            .unwrap();
        for e in &entities {
            let rebuilt = format!("{}{}{}", &src[..e.lo], e.src_code, &src[e.hi..]);
            assert_eq!(rebuilt, src);
        }
    }

    #[test]
    fn ts_type_only_declarations_excluded() {
        let src = r#"
interface Shape { area(): number; }
type Pair = [number, number];
enum Color { Red, Green }
function area(s: Shape): number { return 0; }
"#;
        let entities = LanguageAdapter::Typescript
            .entities_in_source(src, Path::new("shapes.ts"))
            .unwrap();
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["area"]);
    }

    #[test]
    fn class_props_reflect_only_direct_body() {
        let src = r#"
class Queue {
  push(item) {
    if (item != null) {
      this.items.push(item);
    }
  }
  drain(limit) {
    for (let i = 0; i < limit; i++) {
      this.items.pop();
    }
  }
}
"#;
        let entities = LanguageAdapter::Javascript
            .entities_in_source(src, Path::new("queue.js"))
            .unwrap();
        let class = entities.iter().find(|e| e.name == "Queue").unwrap();
        assert!(!class.props.has_if, "class inherited has_if from a method");
        assert!(!class.props.has_loop, "class inherited has_loop from a method");
        assert!(!class.props.has_boundary_cmp);
        assert_eq!(class.complexity, 1);

        let push = entities.iter().find(|e| e.name == "Queue.push").unwrap();
        assert!(push.props.has_if);
        let drain = entities.iter().find(|e| e.name == "Queue.drain").unwrap();
        assert!(drain.props.has_loop);
        assert!(drain.props.has_boundary_cmp);
    }

    #[test]
    fn ts_overload_signatures_excluded() {
        let src = r#"
class Parser {
  parse(input: string): number;
  parse(input: number): number;
  parse(input: string | number): number { return 0; }
}
"#;
        let entities = LanguageAdapter::Typescript
            .entities_in_source(src, Path::new("parser.ts"))
            .unwrap();
        let methods: Vec<_> = entities
            .iter()
            .filter(|e| e.name == "Parser.parse")
            .collect();
        assert_eq!(methods.len(), 1);
        assert!(methods[0].src_code.contains("return 0"));
    }
}
