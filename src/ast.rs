//! The template AST: the shape the Field Path Extractor, Fragment
//! Extractor, Tree Renderer, and Strategy Selector all walk.

use crate::path::{parse_dotted_path, FieldPath};

/// A pipeline: the expression inside `{{ }}` (minus block keywords like
/// `if`/`range`/`with`/`end`/`else`).
#[derive(Debug, Clone, PartialEq)]
pub enum Pipeline {
    /// A bare dotted field access, rooted at the current dot: `.User.Name`,
    /// or `.` itself.
    Field(FieldPath),
    /// Anything else: function calls, `$variable` references, `|`-chained
    /// pipes. The analyzer cannot see through these — see spec.md §4.1 and
    /// §9. `raw` is the exact source text, re-parsed at render time by the
    /// pipeline executor (`crate::data::eval_opaque`).
    Opaque(String),
}

impl Pipeline {
    pub fn parse(raw: &str) -> Self {
        match parse_dotted_path(raw) {
            Some(path) => Pipeline::Field(path),
            None => Pipeline::Opaque(raw.trim().to_string()),
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Pipeline::Opaque(_))
    }
}

/// One node of a template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A literal run of output text.
    Text(String),
    /// `{{pipeline}}` — prints a value, HTML-escaped by default.
    Action(Pipeline),
    /// `{{if cond}}then{{else}}else{{end}}`.
    If {
        cond: Pipeline,
        then_branch: Vec<Node>,
        else_branch: Option<Vec<Node>>,
    },
    /// `{{range source}}body{{end}}`.
    Range { source: Pipeline, body: Vec<Node> },
    /// `{{with source}}body{{end}}` — always opaque (spec.md §4.1).
    With { source: Pipeline, body: Vec<Node> },
    /// `{{$name := pipeline}}` — always opaque.
    VarAssign { name: String, pipeline: Pipeline },
    /// `{{template "name" arg}}` — invokes another named template
    /// (possibly a synthetic `__frag_<id>` fragment template).
    TemplateInvocation { name: String, arg: Pipeline },
}

impl Node {
    /// Whether this node's *own* pipeline (not its body) is opaque, i.e.
    /// it's a construct the Field Path Extractor and Strategy Selector
    /// must treat as a single, non-decomposable unit (spec.md §4.1, §4.6).
    pub fn is_opaque_construct(&self) -> bool {
        match self {
            Node::With { .. } | Node::VarAssign { .. } => true,
            Node::Action(p) => p.is_opaque(),
            Node::If { cond, .. } => cond.is_opaque(),
            Node::Range { source, .. } => source.is_opaque(),
            Node::Text(_) | Node::TemplateInvocation { .. } => false,
        }
    }
}

/// A named template body within a [`crate::TemplateSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDef {
    pub name: String,
    pub body: Vec<Node>,
}
