//! Tree Renderer and `TreeNode` (spec.md §3, §4.4): executes a template
//! body against data while recording the interleaving of static text and
//! dynamic slots, so later `RenderFragments` calls can diff trees instead
//! of re-rendering whole fragments.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::ast::Node;
use crate::data::{self, FuncMap, Scope};
use crate::error::Error;

/// A named template body, keyed for `{{template "name" .}}` resolution —
/// both host-registered templates and synthetic `__frag_<id>` fragment
/// bodies produced by the Fragment Extractor live in the same table.
#[derive(Clone, Default)]
pub struct TemplateRegistry(HashMap<String, Vec<Node>>);

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, body: Vec<Node>) {
        self.0.insert(name.into(), body);
    }

    pub fn get(&self, name: &str) -> Option<&[Node]> {
        self.0.get(name).map(Vec::as_slice)
    }
}

/// The recursive tree shape described in spec.md §3. `Conditional` has no
/// dedicated variant — per spec it is "realized as a Composite with exactly
/// one dynamic slot", so an `if`/`else` renders straight into a one-slot
/// `Composite`.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    /// A leaf dynamic value: the escaped, fully-rendered string for a
    /// scalar action, or the flattened HTML of an opaque span.
    Static(String),
    /// `s[0] ⊕ render(slots[0]) ⊕ s[1] ⊕ ... ⊕ render(slots[n-1]) ⊕ s[n]`.
    Composite { s: Vec<String>, slots: Vec<TreeNode> },
    /// One entry per loop iteration; `s` is the construct's own
    /// prefix/suffix, which is always empty since all literal text between
    /// `{{range}}` and `{{end}}` belongs to the per-item body, not to the
    /// range wrapper itself.
    Range { s: [String; 2], items: Vec<TreeNode> },
}

impl TreeNode {
    /// Flatten a tree back into the HTML it was rendered from (spec.md
    /// invariant I1: `render(T,D) == flatten(tree(T,D))`).
    pub fn flatten(&self) -> String {
        match self {
            TreeNode::Static(s) => s.clone(),
            TreeNode::Composite { s, slots } => {
                let mut out = String::new();
                for (i, lit) in s.iter().enumerate() {
                    out.push_str(lit);
                    if let Some(slot) = slots.get(i) {
                        out.push_str(&slot.flatten());
                    }
                }
                out
            }
            TreeNode::Range { items, .. } => items.iter().map(TreeNode::flatten).collect(),
        }
    }

    /// Full-fidelity wire serialization (used for a fragment's first render
    /// and for any nested subtree embedded whole inside a `TreeUpdate`).
    /// spec.md §6 describes a separate, sparser shape for a *changed* range
    /// slot inside a diff (a bare array of item values, no `s`/`items`
    /// wrapper) — that shape is produced by `crate::diff`, not here.
    pub fn to_wire_value(&self) -> Value {
        match self {
            TreeNode::Static(s) => Value::String(s.clone()),
            TreeNode::Composite { s, slots } => {
                let mut obj = serde_json::Map::new();
                obj.insert("s".to_string(), json!(s));
                for (i, slot) in slots.iter().enumerate() {
                    obj.insert(i.to_string(), slot.to_wire_value());
                }
                Value::Object(obj)
            }
            TreeNode::Range { s, items } => {
                let mut obj = serde_json::Map::new();
                obj.insert("s".to_string(), json!(s));
                obj.insert(
                    "items".to_string(),
                    Value::Array(items.iter().map(TreeNode::to_wire_value).collect()),
                );
                Value::Object(obj)
            }
        }
    }
}

/// Render a node list against a scope into a [`TreeNode`], instrumenting
/// every literal run and dynamic action per spec.md §4.4.
pub fn render_nodes(
    nodes: &[Node],
    scope: &mut Scope<'_>,
    funcs: &FuncMap,
    registry: &TemplateRegistry,
) -> Result<TreeNode, Error> {
    let mut statics = Vec::new();
    let mut slots: Vec<TreeNode> = Vec::new();
    let mut current = String::new();

    for node in nodes {
        match node {
            Node::Text(text) => current.push_str(text),
            Node::Action(pipeline) => {
                statics.push(std::mem::take(&mut current));
                let value = data::eval_pipeline(pipeline, scope, funcs)?;
                let rendered = data::escape_html(&data::stringify(&value));
                slots.push(TreeNode::Static(rendered));
            }
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                statics.push(std::mem::take(&mut current));
                let chosen = if data::truthy(&data::eval_pipeline(cond, scope, funcs)?) {
                    Some(then_branch)
                } else {
                    else_branch.as_ref()
                };
                let branch_tree = match chosen {
                    Some(body) => render_nodes(body, scope, funcs, registry)?,
                    None => TreeNode::Static(String::new()),
                };
                slots.push(branch_tree);
            }
            Node::Range { source, body } => {
                statics.push(std::mem::take(&mut current));
                let iterable = data::eval_pipeline(source, scope, funcs)?;
                let mut items = Vec::new();
                if let Value::Array(elements) = iterable {
                    for element in elements {
                        let mut child = scope.child_with_owned_dot(element);
                        items.push(render_nodes(body, &mut child, funcs, registry)?);
                    }
                }
                slots.push(TreeNode::Range {
                    s: [String::new(), String::new()],
                    items,
                });
            }
            Node::With { source, body } => {
                statics.push(std::mem::take(&mut current));
                let new_dot = data::eval_pipeline(source, scope, funcs)?;
                let mut child = scope.child_with_owned_dot(new_dot);
                let subtree = render_nodes(body, &mut child, funcs, registry)?;
                // Opaque: expose only the flattened HTML, never the inner
                // slot structure (spec.md §4.4).
                slots.push(TreeNode::Static(subtree.flatten()));
            }
            Node::VarAssign { name, pipeline } => {
                let value = data::eval_pipeline(pipeline, scope, funcs)?;
                scope.bind(name.clone(), value);
            }
            Node::TemplateInvocation { name, arg } => {
                statics.push(std::mem::take(&mut current));
                let arg_value = data::eval_pipeline(arg, scope, funcs)?;
                let body = registry.get(name).ok_or_else(|| Error::TemplateExecution {
                    fragment: name.clone(),
                    message: "invoked template not found in registry".into(),
                })?;
                let mut child = scope.child_with_owned_dot(arg_value);
                slots.push(render_nodes(body, &mut child, funcs, registry)?);
            }
        }
    }
    statics.push(current);

    Ok(TreeNode::Composite { s: statics, slots })
}
