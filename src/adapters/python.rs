//! Python entity extraction.

use std::path::Path;

use tree_sitter::Node;

use super::{analyze, line_range, node_text, CodeEntity, EntityKind, PYTHON_KINDS};

/// Collect function, method, and class entities from a parsed Python file.
///
/// `decorated_definition` wrappers are unwrapped for naming but the emitted
/// span covers the decorators too, so splicing a rewrite replaces the whole
/// decorated block.
pub(crate) fn collect_entities(
    root: Node<'_>,
    source: &str,
    file_path: &Path,
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
            "function_definition" => {
                emit_function(child, child, source, file_path, enclosing_class, out);
                // Nested defs keep their own lexical name.
                if let Some(body) = child.child_by_field_name("body") {
                    walk(body, source, file_path, None, out);
                }
            }
            "class_definition" => {
                emit_class(child, child, source, file_path, out);
            }
            "decorated_definition" => {
                if let Some(def) = child.child_by_field_name("definition") {
                    match def.kind() {
                        "function_definition" => {
                            emit_function(child, def, source, file_path, enclosing_class, out);
                            if let Some(body) = def.child_by_field_name("body") {
                                walk(body, source, file_path, None, out);
                            }
                        }
                        "class_definition" => emit_class(child, def, source, file_path, out),
                        _ => {}
                    }
                }
            }
            _ => {
                walk(child, source, file_path, enclosing_class, out);
            }
        }
    }
}

/// `span_node` is the node whose bytes the entity covers (may include
/// decorators); `def_node` carries the name and body.
fn emit_function(
    span_node: Node<'_>,
    def_node: Node<'_>,
    source: &str,
    file_path: &Path,
    enclosing_class: Option<&str>,
    out: &mut Vec<CodeEntity>,
) {
    let Some(name_node) = def_node.child_by_field_name("name") else {
        return;
    };
    let bare_name = node_text(name_node, source);
    let (kind, name) = match enclosing_class {
        Some(class) => (EntityKind::Method, format!("{class}.{bare_name}")),
        None => (EntityKind::Function, bare_name.to_string()),
    };
    push_entity(span_node, def_node, source, file_path, kind, name, out);
}

fn emit_class(
    span_node: Node<'_>,
    def_node: Node<'_>,
    source: &str,
    file_path: &Path,
    out: &mut Vec<CodeEntity>,
) {
    let Some(name_node) = def_node.child_by_field_name("name") else {
        return;
    };
    let class_name = node_text(name_node, source).to_string();
    push_entity(
        span_node,
        def_node,
        source,
        file_path,
        EntityKind::Class,
        class_name.clone(),
        out,
    );
    if let Some(body) = def_node.child_by_field_name("body") {
        walk(body, source, file_path, Some(&class_name), out);
    }
}

fn push_entity(
    span_node: Node<'_>,
    def_node: Node<'_>,
    source: &str,
    file_path: &Path,
    kind: EntityKind,
    name: String,
    out: &mut Vec<CodeEntity>,
) {
    let lo = span_node.start_byte();
    let hi = span_node.end_byte();
    let (line_start, line_end) = line_range(source, lo, hi);
    let (props, complexity) = analyze(def_node, source, &PYTHON_KINDS);
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
