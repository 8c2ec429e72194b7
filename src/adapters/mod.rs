//! Language adapters.
//!
//! One adapter per source language, selected by the profile's language tag.
//! Each adapter parses a source tree into a flat sequence of code entities
//! (functions, methods, class bodies) with byte-exact source spans. New
//! languages are added by extending the sum type, not by registering at
//! runtime.

mod javascript;
mod python;

use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};
use walkdir::WalkDir;

use crate::error::AdapterError;
use crate::profiles::{Language, RepoProfile};

/// Kind of a code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Method,
    Class,
}

/// Structural properties of an entity, used by the procedural modifiers'
/// applicability predicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProps {
    pub has_if: bool,
    pub has_if_else: bool,
    pub has_loop: bool,
    pub has_return: bool,
    /// A `return` with an expression, as opposed to a bare `return`.
    pub has_return_value: bool,
    pub has_binary_op: bool,
    pub has_bool_op: bool,
    /// A boundary comparison: `<`, `<=`, `>`, or `>=`.
    pub has_boundary_cmp: bool,
    pub has_assignment: bool,
    pub has_call: bool,
}

/// A syntactic unit with executable body inside the repository.
///
/// `src_code` is byte-exact with the file contents over `span`; re-inserting
/// it at `span` yields the original file byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntity {
    /// Path relative to the repository root.
    pub file_path: PathBuf,
    pub kind: EntityKind,
    /// Lexical name; `Class.method` for methods.
    pub name: String,
    /// Byte span `[lo, hi)` in the file.
    pub lo: usize,
    pub hi: usize,
    /// 1-based line range.
    pub line_start: usize,
    pub line_end: usize,
    pub src_code: String,
    pub props: EntityProps,
    /// Decision points + boolean/comparison operators, starting at 1.
    pub complexity: u32,
}

impl CodeEntity {
    pub fn span(&self) -> Range<usize> {
        self.lo..self.hi
    }

    /// Directory-safe identifier for artifact placement:
    /// `<name>_<hash8-of-name-and-span>`.
    pub fn artifact_key(&self) -> String {
        let sig = format!("{}:{}:{}", self.file_path.display(), self.name, self.lo);
        format!(
            "{}_{}",
            self.name.replace('.', "_"),
            crate::util::short_hash(sig.as_bytes())
        )
    }
}

/// Sum type over supported languages. Each variant implements the same
/// `entities_of` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageAdapter {
    Python,
    Javascript,
    Typescript,
}

impl LanguageAdapter {
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Python => LanguageAdapter::Python,
            Language::Javascript => LanguageAdapter::Javascript,
            Language::Typescript => LanguageAdapter::Typescript,
        }
    }

    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            LanguageAdapter::Python => tree_sitter_python::LANGUAGE.into(),
            LanguageAdapter::Javascript => tree_sitter_javascript::LANGUAGE.into(),
            LanguageAdapter::Typescript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        }
    }

    /// Grammar for a specific file. `.tsx` files need the TSX variant of the
    /// TypeScript grammar; everything else uses the language default.
    fn grammar_for_file(self, path: &Path) -> tree_sitter::Language {
        if self == LanguageAdapter::Typescript
            && path.extension().is_some_and(|e| e == "tsx")
        {
            return tree_sitter_typescript::LANGUAGE_TSX.into();
        }
        self.grammar()
    }

    fn language_name(self) -> &'static str {
        match self {
            LanguageAdapter::Python => "python",
            LanguageAdapter::Javascript => "javascript",
            LanguageAdapter::Typescript => "typescript",
        }
    }

    /// Build a parser for this language.
    pub fn parser(self) -> Result<Parser, AdapterError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar())
            .map_err(|e| AdapterError::GrammarLoad {
                language: self.language_name().to_string(),
                message: e.to_string(),
            })?;
        Ok(parser)
    }

    /// Extract entities from every source file under `root` that the
    /// profile's globs admit. Files that fail to read as UTF-8 or to parse
    /// are skipped; a broken file must not sink the whole run.
    pub fn entities_of(
        self,
        root: &Path,
        profile: &RepoProfile,
    ) -> Result<Vec<CodeEntity>, AdapterError> {
        let mut entities = Vec::new();
        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            if rel.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if !profile.is_source_path(&rel) {
                continue;
            }
            let source = match std::fs::read_to_string(entry.path()) {
                Ok(s) => s,
                Err(_) => continue,
            };
            match self.entities_in_source(&source, &rel) {
                Ok(mut found) => entities.append(&mut found),
                Err(err) => {
                    tracing::debug!(path = %rel.display(), error = %err, "skipping unparseable file");
                }
            }
        }
        Ok(entities)
    }

    /// Extract entities from a single file's source text.
    pub fn entities_in_source(
        self,
        source: &str,
        file_path: &Path,
    ) -> Result<Vec<CodeEntity>, AdapterError> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar_for_file(file_path))
            .map_err(|e| AdapterError::GrammarLoad {
                language: self.language_name().to_string(),
                message: e.to_string(),
            })?;
        let tree = parser.parse(source, None).ok_or_else(|| AdapterError::FileRead {
            path: file_path.to_path_buf(),
            message: "parser returned no tree".to_string(),
        })?;
        let mut entities = Vec::new();
        match self {
            LanguageAdapter::Python => {
                python::collect_entities(tree.root_node(), source, file_path, &mut entities)
            }
            LanguageAdapter::Javascript | LanguageAdapter::Typescript => {
                javascript::collect_entities(
                    tree.root_node(),
                    source,
                    file_path,
                    self,
                    &mut entities,
                )
            }
        }
        Ok(entities)
    }

    /// Whether a snippet parses without syntax errors under this grammar.
    pub fn parses(self, source: &str) -> bool {
        let Ok(mut parser) = self.parser() else {
            return false;
        };
        match parser.parse(source, None) {
            Some(tree) => !tree.root_node().has_error(),
            None => false,
        }
    }

    /// Signature of the first definition in a snippet: `name(params)` for
    /// functions and methods, name plus base list for classes. Used to
    /// check that an LLM rewrite preserved the entity's signature.
    pub fn signature_of(self, source: &str) -> Option<String> {
        let mut parser = self.parser().ok()?;
        let tree = parser.parse(source, None)?;
        first_signature(tree.root_node(), source)
    }

    /// All function-like signatures in a snippet, in source order.
    pub fn signatures_of(self, source: &str) -> Vec<String> {
        let Ok(mut parser) = self.parser() else {
            return Vec::new();
        };
        let Some(tree) = parser.parse(source, None) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        collect_signatures(tree.root_node(), source, &mut found);
        found
    }
}

/// Node kinds that open a class scope in the supported grammars.
const CLASS_KINDS: &[&str] = &["class_definition", "class_declaration", "abstract_class_declaration"];

/// Depth-first search for the first signature-bearing node. Function-like
/// nodes carry `name` and `parameters` fields in all three grammars; class
/// nodes are handled explicitly so the search never falls through into a
/// class body and reports a method's signature as the class's.
fn first_signature(node: Node<'_>, source: &str) -> Option<String> {
    if CLASS_KINDS.contains(&node.kind()) {
        return class_signature(node, source);
    }
    if let (Some(name), Some(params)) = (
        node.child_by_field_name("name"),
        node.child_by_field_name("parameters"),
    ) {
        let name_text = node_text(name, source);
        let params_text = normalize_ws(node_text(params, source));
        return Some(format!("{name_text}{params_text}"));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(sig) = first_signature(child, source) {
            return Some(sig);
        }
    }
    None
}

/// A class's signature is its name plus its base list: `Greeter(Base)` in
/// Python, `Greeter extends Base` in JS/TS.
fn class_signature(node: Node<'_>, source: &str) -> Option<String> {
    let name = node_text(node.child_by_field_name("name")?, source);
    let heritage = node
        .child_by_field_name("superclasses")
        .map(|n| node_text(n, source).to_string())
        .or_else(|| {
            let mut cursor = node.walk();
            let result = node
                .children(&mut cursor)
                .find(|c| c.kind() == "class_heritage")
                .map(|n| node_text(n, source).to_string());
            result
        })
        .map(|h| normalize_ws(&h))
        .unwrap_or_default();
    if heritage.is_empty() || heritage.starts_with('(') {
        Some(format!("{name}{heritage}"))
    } else {
        Some(format!("{name} {heritage}"))
    }
}

/// Every function-like signature in a snippet, in source order. Used to
/// check that a class rewrite preserved its method set.
fn collect_signatures(node: Node<'_>, source: &str, out: &mut Vec<String>) {
    if let (Some(name), Some(params)) = (
        node.child_by_field_name("name"),
        node.child_by_field_name("parameters"),
    ) {
        out.push(format!(
            "{}{}",
            node_text(name, source),
            normalize_ws(node_text(params, source))
        ));
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_signatures(child, source, out);
    }
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text slice for a node.
pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Kind tables driving the shared property walker.
pub(crate) struct KindTable {
    pub if_stmt: &'static [&'static str],
    pub else_clause: &'static [&'static str],
    pub loop_stmt: &'static [&'static str],
    pub return_stmt: &'static [&'static str],
    pub binary_op: &'static [&'static str],
    pub bool_op: &'static [&'static str],
    pub comparison: &'static [&'static str],
    pub assignment: &'static [&'static str],
    pub call: &'static [&'static str],
}

pub(crate) const PYTHON_KINDS: KindTable = KindTable {
    if_stmt: &["if_statement"],
    else_clause: &["else_clause", "elif_clause"],
    loop_stmt: &["for_statement", "while_statement"],
    return_stmt: &["return_statement"],
    binary_op: &["binary_operator"],
    bool_op: &["boolean_operator"],
    comparison: &["comparison_operator"],
    assignment: &["assignment", "augmented_assignment"],
    call: &["call"],
};

pub(crate) const JS_KINDS: KindTable = KindTable {
    if_stmt: &["if_statement"],
    else_clause: &["else_clause"],
    loop_stmt: &["for_statement", "for_in_statement", "while_statement", "do_statement"],
    return_stmt: &["return_statement"],
    binary_op: &["binary_expression"],
    bool_op: &["binary_expression"],
    comparison: &["binary_expression"],
    assignment: &["assignment_expression", "augmented_assignment_expression"],
    call: &["call_expression"],
};

const BOUNDARY_OPS: &[&str] = &["<", "<=", ">", ">="];
const BOOL_OPS: &[&str] = &["&&", "||", "and", "or"];

/// Nested definitions open their own scope. The property walker and the
/// procedural rewrite search never descend through them, so a class
/// entity's props reflect only its direct body and a rewrite aimed at one
/// entity never edits code belonging to a nested one.
pub(crate) const NESTED_SCOPE_KINDS: &[&str] = &[
    "function_definition",
    "decorated_definition",
    "class_definition",
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "arrow_function",
    "generator_function",
    "method_definition",
    "class_declaration",
    "abstract_class_declaration",
    "class",
];

/// Walk a subtree and derive structural properties plus a complexity score.
///
/// Complexity starts at 1 and increases for each decision point (if, loop),
/// each boolean operator, and each comparison. The walk stops at nested
/// definition boundaries.
pub(crate) fn analyze(node: Node<'_>, source: &str, kinds: &KindTable) -> (EntityProps, u32) {
    let mut props = EntityProps::default();
    let mut complexity: u32 = 1;
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        let kind = n.kind();
        if kinds.if_stmt.contains(&kind) {
            props.has_if = true;
            complexity += 1;
            let mut cursor = n.walk();
            if n.children(&mut cursor)
                .any(|c| kinds.else_clause.contains(&c.kind()))
            {
                props.has_if_else = true;
            }
        }
        if kinds.loop_stmt.contains(&kind) {
            props.has_loop = true;
            complexity += 1;
        }
        if kinds.return_stmt.contains(&kind) {
            props.has_return = true;
            if n.named_child_count() > 0 {
                props.has_return_value = true;
            }
        }
        if kinds.assignment.contains(&kind) {
            props.has_assignment = true;
        }
        if kinds.call.contains(&kind) {
            props.has_call = true;
        }
        if kinds.binary_op.contains(&kind)
            || kinds.bool_op.contains(&kind)
            || kinds.comparison.contains(&kind)
        {
            let op = operator_text(n, source);
            if BOOL_OPS.contains(&op.as_str()) {
                props.has_bool_op = true;
                complexity += 1;
            } else if BOUNDARY_OPS.contains(&op.as_str()) {
                props.has_boundary_cmp = true;
                props.has_binary_op = true;
                complexity += 1;
            } else if !op.is_empty() {
                props.has_binary_op = true;
            }
        }
        // Python comparison_operator nodes hold the operator as an anonymous
        // child rather than an `operator` field.
        if kind == "comparison_operator" {
            let mut cursor = n.walk();
            for c in n.children(&mut cursor) {
                if BOUNDARY_OPS.contains(&c.kind()) {
                    props.has_boundary_cmp = true;
                    props.has_binary_op = true;
                }
            }
            complexity += 1;
        }
        let mut cursor = n.walk();
        for child in n.children(&mut cursor) {
            if !NESTED_SCOPE_KINDS.contains(&child.kind()) {
                stack.push(child);
            }
        }
    }
    (props, complexity)
}

/// Operator text of a binary-like node: the `operator` field when the
/// grammar exposes one, otherwise empty.
fn operator_text(node: Node<'_>, source: &str) -> String {
    node.child_by_field_name("operator")
        .map(|op| node_text(op, source).to_string())
        .unwrap_or_default()
}

/// Compute 1-based line numbers for a byte span.
pub(crate) fn line_range(source: &str, lo: usize, hi: usize) -> (usize, usize) {
    let start = source[..lo].matches('\n').count() + 1;
    let end = source[..hi].matches('\n').count() + 1;
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PY_SRC: &str = r#"import os

def add(a, b):
    return a + b

class Greeter:
    def greet(self, name):
        if name:
            return "hi " + name
        return "hi"

def loop_sum(items):
    total = 0
    for x in items:
        if x < 10:
            total += x
    return total
"#;

    #[test]
    fn python_entities_extracted() {
        let adapter = LanguageAdapter::Python;
        let entities = adapter
            .entities_in_source(PY_SRC, Path::new("src/demo.py"))
            .unwrap();
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"add"));
        assert!(names.contains(&"Greeter"));
        assert!(names.contains(&"Greeter.greet"));
        assert!(names.contains(&"loop_sum"));
    }

    #[test]
    fn entity_round_trip_is_byte_exact() {
        let adapter = LanguageAdapter::Python;
        let entities = adapter
            .entities_in_source(PY_SRC, Path::new("src/demo.py"))
            .unwrap();
        for e in &entities {
            assert_eq!(&PY_SRC[e.lo..e.hi], e.src_code, "span mismatch for {}", e.name);
            let rebuilt = format!("{}{}{}", &PY_SRC[..e.lo], e.src_code, &PY_SRC[e.hi..]);
            assert_eq!(rebuilt, PY_SRC);
        }
    }

    #[test]
    fn top_level_spans_disjoint() {
        let adapter = LanguageAdapter::Python;
        let entities = adapter
            .entities_in_source(PY_SRC, Path::new("src/demo.py"))
            .unwrap();
        let top: Vec<&CodeEntity> = entities
            .iter()
            .filter(|e| e.kind != EntityKind::Method)
            .collect();
        for (i, a) in top.iter().enumerate() {
            for b in top.iter().skip(i + 1) {
                assert!(a.hi <= b.lo || b.hi <= a.lo, "{} overlaps {}", a.name, b.name);
            }
        }
        // Methods are contained by their class.
        let class = entities.iter().find(|e| e.name == "Greeter").unwrap();
        let method = entities.iter().find(|e| e.name == "Greeter.greet").unwrap();
        assert!(class.lo <= method.lo && method.hi <= class.hi);
    }

    #[test]
    fn properties_and_complexity() {
        let adapter = LanguageAdapter::Python;
        let entities = adapter
            .entities_in_source(PY_SRC, Path::new("src/demo.py"))
            .unwrap();
        let loop_sum = entities.iter().find(|e| e.name == "loop_sum").unwrap();
        assert!(loop_sum.props.has_loop);
        assert!(loop_sum.props.has_if);
        assert!(loop_sum.props.has_boundary_cmp);
        assert!(loop_sum.props.has_return_value);
        assert!(loop_sum.complexity >= 3);

        let add = entities.iter().find(|e| e.name == "add").unwrap();
        assert!(add.props.has_binary_op);
        assert!(!add.props.has_loop);
    }

    #[test]
    fn signature_extraction() {
        let adapter = LanguageAdapter::Python;
        let sig = adapter.signature_of("def add(a, b):\n    return a + b\n").unwrap();
        assert_eq!(sig, "add(a, b)");

        let js = LanguageAdapter::Javascript;
        let sig = js
            .signature_of("function add(a, b) { return a + b; }")
            .unwrap();
        assert_eq!(sig, "add(a, b)");
    }

    #[test]
    fn class_signature_is_name_and_bases_not_first_method() {
        let py = LanguageAdapter::Python;
        let sig = py
            .signature_of("class Greeter(Base):\n    def greet(self, name):\n        return name\n")
            .unwrap();
        assert_eq!(sig, "Greeter(Base)");

        let bare = py
            .signature_of("class Greeter:\n    def greet(self):\n        return 1\n")
            .unwrap();
        assert_eq!(bare, "Greeter");

        let js = LanguageAdapter::Javascript;
        let sig = js
            .signature_of("class Greeter extends Base {\n  greet(name) { return name; }\n}")
            .unwrap();
        assert_eq!(sig, "Greeter extends Base");
    }

    #[test]
    fn signatures_of_lists_every_method() {
        let src = "class Calc:\n    def add(self, a, b):\n        return a + b\n    def mul(self, a, b):\n        return a * b\n";
        let sigs = LanguageAdapter::Python.signatures_of(src);
        assert_eq!(sigs, vec!["add(self, a, b)", "mul(self, a, b)"]);
    }

    #[test]
    fn parse_check() {
        assert!(LanguageAdapter::Python.parses("def f():\n    return 1\n"));
        assert!(!LanguageAdapter::Python.parses("def f(:\n"));
        assert!(LanguageAdapter::Javascript.parses("function f() { return 1; }"));
        assert!(!LanguageAdapter::Javascript.parses("function f( { return"));
    }
}
