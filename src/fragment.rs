//! Fragment Extractor (spec.md §4.3): splits a template body into the
//! smallest disjoint-dependency spans, assigns each a stable ID, and
//! rewrites the body to invoke them as synthetic `__frag_<id>` sub-templates.
//!
//! Grounded on the hotreload crate's content-hash IDs
//! (`shipwright-liveview-hotreload::protocol::TemplateId`, itself a `blake3`
//! digest truncated for display) — the same approach gives fragment IDs
//! that are deterministic across runs (spec.md invariant 6) without a
//! counter shared across processes.

use std::collections::HashMap;
use std::fmt;

use crate::analysis::extractor::{self, Dependencies};
use crate::ast::{Node, Pipeline};
use crate::error::Error;
use crate::path::FieldPath;

/// A stable, deterministic fragment identifier: 8 lowercase hex chars,
/// numerically suffixed on intra-page collision (spec.md §4.3, §6).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentId(String);

impl FragmentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reconstruct a previously-allocated ID, e.g. when looking up a
    /// fragment by the ID a client echoed back.
    pub fn from_raw(id: impl Into<String>) -> Self {
        FragmentId(id.into())
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(ID, TemplateRef, DependencySet, Content)` per spec.md §3. `StartPos`/
/// `EndPos` are represented structurally by `body` (the extracted node
/// span) rather than by source byte offsets, since this crate's AST has
/// no source-span tracking of its own.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub id: FragmentId,
    pub source_template: String,
    pub dependencies: Dependencies,
    pub body: Vec<Node>,
    /// Whether this fragment's whole body is a single root-level
    /// if-without-else (spec.md §4.6: such a fragment can disappear from
    /// the tree entirely, not just change content, so the Strategy
    /// Selector needs to know to consider `Decision::Remove`).
    pub root_conditional: bool,
}

/// The result of extracting fragments from one named template's body.
pub struct ExtractionResult {
    /// The template's body, rewritten so each extracted span is replaced by
    /// an invocation of its `__frag_<id>` sub-template.
    pub rewritten_body: Vec<Node>,
    /// Extracted fragments, in depth-first left-to-right discovery order —
    /// this is also the fragment-enumeration order spec.md §5 requires to
    /// stay stable across `RenderFragments` calls.
    pub fragments: Vec<Fragment>,
    /// IDs of the fragments whose invocation sits directly in this
    /// template's own top-level node list (as opposed to nested inside an
    /// `if`/`range` body, which produced its own fragment but whose tree
    /// lives *inside* the enclosing top-level fragment's subtree). A Page
    /// diffs and addresses only this outer set independently — nested
    /// fragments are diffed implicitly, as part of their parent's tree
    /// (spec.md §4.4: "the slot boundary is preserved so the Differ can
    /// recurse").
    pub top_level_ids: Vec<FragmentId>,
}

/// Allocates fragment IDs deterministically from a span's normalized AST
/// serialization, suffixing collisions with a running index.
pub struct IdAllocator {
    seen: HashMap<String, u32>,
    collisions: Vec<Error>,
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator {
            seen: HashMap::new(),
            collisions: Vec::new(),
        }
    }

    pub fn allocate(&mut self, span: &[Node]) -> FragmentId {
        let base = hash_span(span);
        let count = self.seen.entry(base.clone()).or_insert(0);
        let id = if *count == 0 {
            base.clone()
        } else {
            let resolved = format!("{base}-{count}");
            tracing::warn!(base_id = %base, resolved_id = %resolved, "fragment id collision resolved");
            self.collisions.push(Error::FragmentIdCollision {
                base_id: base.clone(),
                resolved_id: resolved.clone(),
            });
            resolved
        };
        *count += 1;
        FragmentId(id)
    }

    /// Advisory errors recorded for collisions resolved so far. Non-fatal —
    /// [`allocate`](Self::allocate) still returns a usable, unique ID on
    /// collision; callers that care can surface these (e.g. a build-time
    /// warning), and those that don't can ignore them.
    pub fn collisions(&self) -> &[Error] {
        &self.collisions
    }

    /// Drain the recorded collisions, leaving the allocator's own id
    /// bookkeeping untouched.
    pub fn take_collisions(&mut self) -> Vec<Error> {
        std::mem::take(&mut self.collisions)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_span(span: &[Node]) -> String {
    let serialized = format!("{span:?}");
    let digest = blake3::hash(serialized.as_bytes());
    hex::encode(&digest.as_bytes()[..4])
}

/// Extract fragments from one named template's body, with its own fresh
/// [`IdAllocator`]. Convenience entry point for extracting a single
/// template in isolation (used by this module's own tests); a
/// [`crate::TemplateSet`] spanning several named templates uses
/// [`extract_fragments_with`] instead, sharing one allocator across all of
/// them so `__frag_<id>` names stay unique across the whole set.
pub fn extract_fragments(template_name: &str, body: &[Node]) -> ExtractionResult {
    let mut ids = IdAllocator::new();
    extract_fragments_with(template_name, body, &mut ids)
}

/// Extract fragments from one named template's body, allocating IDs from
/// the caller-supplied `ids` allocator.
pub fn extract_fragments_with(
    template_name: &str,
    body: &[Node],
    ids: &mut IdAllocator,
) -> ExtractionResult {
    let mut fragments = Vec::new();
    let mut top_level_ids = Vec::new();
    let rewritten_body = extract_region(template_name, body, &mut fragments, ids, true, &mut top_level_ids);
    ExtractionResult {
        rewritten_body,
        fragments,
        top_level_ids,
    }
}

fn extract_region(
    template_name: &str,
    nodes: &[Node],
    fragments: &mut Vec<Fragment>,
    ids: &mut IdAllocator,
    is_top_level: bool,
    top_level_ids: &mut Vec<FragmentId>,
) -> Vec<Node> {
    // Bottom-up: recurse into if/range bodies first, so by the time this
    // level groups its own spans, any opacity nested inside a branch/body
    // has already been isolated behind its own fragment-invocation boundary
    // and no longer poisons the dependency set of the enclosing span.
    // `with` bodies are deliberately left unrecursed — per spec.md §4.3,
    // opaque spans are extracted whole, with no sub-extraction within.
    let mut rewritten = Vec::with_capacity(nodes.len());
    for node in nodes {
        let new_node = match node {
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => Node::If {
                cond: cond.clone(),
                then_branch: extract_region(
                    template_name,
                    then_branch,
                    fragments,
                    ids,
                    false,
                    top_level_ids,
                ),
                else_branch: else_branch.as_ref().map(|b| {
                    extract_region(template_name, b, fragments, ids, false, top_level_ids)
                }),
            },
            Node::Range { source, body } => Node::Range {
                source: source.clone(),
                body: extract_region(template_name, body, fragments, ids, false, top_level_ids),
            },
            other => other.clone(),
        };
        rewritten.push(new_node);
    }

    let mut output = Vec::new();
    let mut span: Vec<Node> = Vec::new();
    for node in rewritten {
        if node.is_opaque_construct() {
            flush_span(
                template_name,
                &mut span,
                &mut output,
                fragments,
                ids,
                is_top_level,
                top_level_ids,
            );
            let mut solo = vec![node];
            output.push(make_fragment_invocation(
                template_name,
                std::mem::take(&mut solo),
                fragments,
                ids,
                is_top_level,
                top_level_ids,
            ));
        } else {
            span.push(node);
        }
    }
    flush_span(
        template_name,
        &mut span,
        &mut output,
        fragments,
        ids,
        is_top_level,
        top_level_ids,
    );
    output
}

#[allow(clippy::too_many_arguments)]
fn flush_span(
    template_name: &str,
    span: &mut Vec<Node>,
    output: &mut Vec<Node>,
    fragments: &mut Vec<Fragment>,
    ids: &mut IdAllocator,
    is_top_level: bool,
    top_level_ids: &mut Vec<FragmentId>,
) {
    if span.is_empty() {
        return;
    }
    let taken = std::mem::take(span);
    if taken.iter().any(|n| !matches!(n, Node::Text(_))) {
        output.push(make_fragment_invocation(
            template_name,
            taken,
            fragments,
            ids,
            is_top_level,
            top_level_ids,
        ));
    } else {
        output.extend(taken);
    }
}

#[allow(clippy::too_many_arguments)]
fn make_fragment_invocation(
    template_name: &str,
    span: Vec<Node>,
    fragments: &mut Vec<Fragment>,
    ids: &mut IdAllocator,
    is_top_level: bool,
    top_level_ids: &mut Vec<FragmentId>,
) -> Node {
    let id = ids.allocate(&span);
    let dependencies = extractor::extract(&span, &FieldPath::dot());
    let root_conditional = is_top_level
        && span.len() == 1
        && matches!(
            &span[0],
            Node::If {
                else_branch: None,
                ..
            }
        );
    let invocation = Node::TemplateInvocation {
        name: format!("__frag_{}", id.as_str()),
        arg: Pipeline::Field(FieldPath::dot()),
    };
    if is_top_level {
        top_level_ids.push(id.clone());
    }
    fragments.push(Fragment {
        id,
        source_template: template_name.to_string(),
        dependencies,
        body: span,
        root_conditional,
    });
    invocation
}
