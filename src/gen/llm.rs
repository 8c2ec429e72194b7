//! LLM-directed bug generation.
//!
//! Two shapes: *modify* sends the entity source and asks for a subtly broken
//! version; *rewrite* sends a stub with the body stripped and asks for a
//! full reimplementation. Either way the model is an unreliable oracle: the
//! returned body must keep the entity's signature, parse under the same
//! grammar, and change more than whitespace, or no artifact is written.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::adapters::{CodeEntity, EntityKind, LanguageAdapter};
use crate::error::GenError;
use crate::gen::{patch_from_rewrite, write_artifacts, BugRewrite, GenStats};
use crate::llm::{extract_code_block, ChatMessage, CompletionRequest, LlmProvider};
use crate::util::whitespace_only_change;

/// Which LLM generator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBugMode {
    Modify,
    Rewrite,
}

impl LlmBugMode {
    pub fn bug_kind(self) -> &'static str {
        match self {
            LlmBugMode::Modify => "lm_modify",
            LlmBugMode::Rewrite => "lm_rewrite",
        }
    }
}

const MODIFY_SYSTEM_PROMPT: &str = "\
You are rewriting a function to contain a subtle functional bug for testing \
purposes. The bug must change runtime behavior on at least some inputs. You \
must NOT change the function's name, its parameter list, its declared types, \
or any import statements, and you must not touch any code outside the \
function. Respond with the complete rewritten function in a single fenced \
code block, followed by a line starting with 'Explanation:' describing the \
bug.";

const REWRITE_SYSTEM_PROMPT: &str = "\
Reimplement the function below from its signature and docstring. Write the \
complete implementation yourself; do not leave placeholders. You must keep \
the function's name, parameter list, and declared types exactly as given. \
Respond with the complete function in a single fenced code block.";

/// Outcome of one candidate's generation, before artifacts are written.
struct LlmCandidate {
    entity_index: usize,
    rewrite: String,
    explanation: String,
    output_tokens: u32,
}

/// Why a response was rejected. Logged per candidate, never fatal.
#[derive(Debug)]
enum Rejection {
    Transport(String),
    SignatureChanged,
    Unparseable,
    NoChange,
}

/// Run an LLM generator over extracted entities, `workers` calls in flight.
///
/// Emits at most `max_bugs` candidates; `max_bugs == 0` emits nothing.
pub async fn generate(
    provider: Arc<dyn LlmProvider>,
    repo_root: &std::path::Path,
    log_dir: &std::path::Path,
    entities: &[CodeEntity],
    lang: LanguageAdapter,
    mode: LlmBugMode,
    max_bugs: usize,
    workers: usize,
) -> Result<GenStats, GenError> {
    let mut stats = GenStats::default();
    if max_bugs == 0 || entities.is_empty() {
        return Ok(stats);
    }

    // Read each entity's file once up front; candidates that raced a
    // missing file are counted failed.
    let mut sources = Vec::with_capacity(entities.len());
    for entity in entities {
        sources.push(std::fs::read_to_string(repo_root.join(&entity.file_path)).ok());
    }
    let sources = Arc::new(sources);
    let entities_arc: Arc<Vec<CodeEntity>> = Arc::new(entities.to_vec());

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();

    for (idx, entity) in entities_arc.iter().enumerate() {
        // Don't bother launching more calls than bugs we can still use;
        // rejections waste a few slots, which is fine.
        if join_set.len() >= max_bugs.saturating_mul(2) {
            break;
        }
        let Some(file_src) = sources[idx].clone() else {
            stats.failed += 1;
            continue;
        };
        let prompt = match mode {
            LlmBugMode::Modify => modify_prompt(entity),
            LlmBugMode::Rewrite => match stub_of(&file_src, entity, lang) {
                Some(stub) => rewrite_prompt(entity, &stub),
                None => {
                    stats.skipped += 1;
                    continue;
                }
            },
        };
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);
        let entities_arc = Arc::clone(&entities_arc);
        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let entity = &entities_arc[idx];
            let request = CompletionRequest::new(prompt).with_temperature(1.0);
            let response = match provider.complete(request).await {
                Ok(r) => r,
                Err(e) => return Err((idx, Rejection::Transport(e.to_string()))),
            };
            let body = extract_code_block(&response.content);
            let explanation = response
                .content
                .rsplit_once("Explanation:")
                .map(|(_, e)| e.trim().to_string())
                .unwrap_or_default();
            match check_rewrite(&file_src, entity, lang, &body) {
                Ok(rewrite) => Ok(LlmCandidate {
                    entity_index: idx,
                    rewrite,
                    explanation,
                    output_tokens: response.output_tokens,
                }),
                Err(rejection) => Err((idx, rejection)),
            }
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let result = match joined {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "LLM generation task panicked");
                stats.failed += 1;
                continue;
            }
        };
        match result {
            Ok(candidate) if stats.generated < max_bugs => {
                let entity = &entities[candidate.entity_index];
                let file_src = sources[candidate.entity_index]
                    .as_ref()
                    .expect("source existed at spawn time");
                let Some(patch) =
                    patch_from_rewrite(file_src, entity, mode.bug_kind(), &candidate.rewrite)
                else {
                    stats.skipped += 1;
                    continue;
                };
                let rewrite = BugRewrite {
                    rewrite: candidate.rewrite,
                    explanation: candidate.explanation,
                    strategy: mode.bug_kind().to_string(),
                    cost: 0.0,
                };
                tracing::debug!(
                    entity = %entity.name,
                    output_tokens = candidate.output_tokens,
                    "LLM bug accepted"
                );
                write_artifacts(log_dir, entity, &patch, &rewrite)?;
                stats.generated += 1;
            }
            Ok(_) => stats.skipped += 1,
            Err((idx, rejection)) => {
                tracing::debug!(
                    entity = %entities[idx].name,
                    rejection = ?rejection,
                    "LLM bug rejected"
                );
                match rejection {
                    Rejection::Transport(_) => stats.failed += 1,
                    _ => stats.skipped += 1,
                }
            }
        }
    }
    Ok(stats)
}

fn modify_prompt(entity: &CodeEntity) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(MODIFY_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Introduce a subtle bug into this function from `{}`:\n\n```\n{}\n```",
            entity.file_path.display(),
            entity.src_code
        )),
    ]
}

fn rewrite_prompt(entity: &CodeEntity, stub: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REWRITE_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Implement this function from `{}`:\n\n```\n{}\n```",
            entity.file_path.display(),
            stub
        )),
    ]
}

/// Entity source with implementation stripped, for the rewrite prompt.
///
/// Body blocks are located on a fresh parse of the containing file so
/// nested definitions and decorators keep their spans. A function or
/// method loses its one body; a class keeps its shape and every method
/// signature, and each method's body is stripped individually, so a
/// reimplementation can satisfy the signature-set post-condition.
pub fn stub_of(file_src: &str, entity: &CodeEntity, lang: LanguageAdapter) -> Option<String> {
    let tree = lang.parser().ok()?.parse(file_src, None)?;
    let scope = tree
        .root_node()
        .descendant_for_byte_range(entity.lo, entity.hi)?;
    // Decorated definitions wrap the def node; variable-bound functions
    // are wrapped by their declaration statement.
    let mut def = scope.child_by_field_name("definition").unwrap_or(scope);
    if matches!(def.kind(), "lexical_declaration" | "variable_declaration") {
        let mut cursor = def.walk();
        let found = def
            .children(&mut cursor)
            .find(|c| c.kind() == "variable_declarator")
            .and_then(|d| d.child_by_field_name("value"));
        if let Some(value) = found {
            def = value;
        }
    }
    let placeholder = match lang {
        LanguageAdapter::Python => "raise NotImplementedError()",
        _ => "{\n  // TODO: implement\n}",
    };

    let mut body_ranges: Vec<(usize, usize)> = Vec::new();
    if entity.kind == EntityKind::Class {
        let class_body = def.child_by_field_name("body")?;
        let mut cursor = class_body.walk();
        for child in class_body.children(&mut cursor) {
            let method = child.child_by_field_name("definition").unwrap_or(child);
            if let Some(body) = method.child_by_field_name("body") {
                body_ranges.push((body.start_byte(), body.end_byte()));
            }
        }
        if body_ranges.is_empty() {
            return None;
        }
    } else {
        let body = def.child_by_field_name("body")?;
        body_ranges.push((body.start_byte(), body.end_byte()));
    }

    let mut stub = entity.src_code.clone();
    body_ranges.sort_by(|a, b| b.0.cmp(&a.0));
    for (start, end) in body_ranges {
        stub.replace_range(start - entity.lo..end - entity.lo, placeholder);
    }
    Some(stub)
}

/// Check every post-condition on a returned body and normalize its
/// indentation to the entity's site.
fn check_rewrite(
    file_src: &str,
    entity: &CodeEntity,
    lang: LanguageAdapter,
    body: &str,
) -> Result<String, Rejection> {
    if body.trim().is_empty() {
        return Err(Rejection::NoChange);
    }
    let reindented = reindent_to_site(file_src, entity, body);
    if reindented == entity.src_code || whitespace_only_change(&reindented, &entity.src_code) {
        return Err(Rejection::NoChange);
    }

    // Signature must survive byte-for-byte modulo whitespace. For a class
    // entity that means its name and base list, plus the full set of method
    // signatures inside it: renaming the class, editing its bases, or
    // adding/removing/re-signing a method is surrounding-interface change,
    // not a body bug.
    let original_sig = lang.signature_of(&dedent(&entity.src_code));
    let new_sig = lang.signature_of(&dedent(body));
    match (original_sig, new_sig) {
        (Some(a), Some(b)) if a == b => {}
        _ => return Err(Rejection::SignatureChanged),
    }
    if entity.kind == EntityKind::Class {
        let mut original_methods = lang.signatures_of(&dedent(&entity.src_code));
        let mut new_methods = lang.signatures_of(&dedent(body));
        original_methods.sort();
        new_methods.sort();
        if original_methods != new_methods {
            return Err(Rejection::SignatureChanged);
        }
    }

    // The mutated file must still parse.
    let mutated = crate::gen::splice(file_src, entity.lo, entity.hi, &reindented);
    if !lang.parses(&mutated) {
        return Err(Rejection::Unparseable);
    }
    Ok(reindented)
}

/// Leading whitespace of the entity's first line.
fn site_indent<'a>(file_src: &'a str, entity: &CodeEntity) -> &'a str {
    let line_start = file_src[..entity.lo]
        .rfind('\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let prefix = &file_src[line_start..entity.lo];
    if prefix.chars().all(|c| c == ' ' || c == '\t') {
        prefix
    } else {
        ""
    }
}

/// Models reply with dedented code for indented entities (methods). Restore
/// the site's indentation on continuation lines unless the reply already
/// carries it; a wrong guess is caught by the parse gate.
fn reindent_to_site(file_src: &str, entity: &CodeEntity, body: &str) -> String {
    let indent = site_indent(file_src, entity);
    if indent.is_empty() {
        return body.trim_end().to_string();
    }
    let already_indented = body
        .lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .all(|l| l.starts_with(indent));
    if already_indented {
        return body.trim_end().to_string();
    }
    body.trim_end()
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip the common leading whitespace from every line.
fn dedent(s: &str) -> String {
    let indent = s
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    s.lines()
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}
