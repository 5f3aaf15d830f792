//! Field Path Extractor (spec.md §4.1): walks a parsed template body and
//! collects the absolute field paths it reads, rooted at a caller-supplied
//! base path. Opaque constructs (`with`, `{{$x := ...}}`, function-call
//! pipelines) cannot be seen through, but per spec.md §4.1 the Extractor
//! still "returns the outermost path accessed plus an 'opaque' marker" —
//! it scans the raw pipeline text for the first `.Ident(.Ident)*` run and
//! joins that to the current base path; if none is found, the base path
//! itself is the opaque root. The Strategy Selector and Fragment Extractor
//! both still treat `opaque == true` as "never narrows, always watch the
//! whole span" (spec.md §4.6) — the captured path is advisory context for
//! callers that want it, not a substitute for that conservative behavior.

use crate::ast::{Node, Pipeline};
use crate::path::{parse_dotted_path, FieldPath};

/// The set of field paths a span of template nodes reads, plus whether any
/// part of that span was opaque to analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    pub paths: Vec<FieldPath>,
    pub opaque: bool,
}

impl Dependencies {
    fn merge(&mut self, other: Dependencies) {
        self.paths.extend(other.paths);
        self.opaque |= other.opaque;
    }
}

/// Extract dependencies for a node list, with paths rooted at `base`.
pub fn extract(nodes: &[Node], base: &FieldPath) -> Dependencies {
    let mut deps = Dependencies::default();
    for node in nodes {
        extract_node(node, base, &mut deps);
    }
    deps
}

fn extract_node(node: &Node, base: &FieldPath, deps: &mut Dependencies) {
    match node {
        Node::Text(_) => {}
        Node::Action(pipeline) => extract_pipeline(pipeline, base, deps),
        Node::If {
            cond,
            then_branch,
            else_branch,
        } => {
            extract_pipeline(cond, base, deps);
            deps.merge(extract(then_branch, base));
            if let Some(else_branch) = else_branch {
                deps.merge(extract(else_branch, base));
            }
        }
        Node::Range { source, body } => {
            extract_pipeline(source, base, deps);
            match source {
                Pipeline::Field(path) => {
                    let item_base = base.join_path(path).join_index();
                    deps.merge(extract(body, &item_base));
                }
                Pipeline::Opaque(_) => {
                    // The iterated collection is opaque: its elements can't
                    // be rooted in the data tree, so the whole body is
                    // opaque too. `extract_pipeline` above already recorded
                    // the source's own outermost path, if any.
                }
            }
        }
        Node::With { source, .. } => {
            // A `with` always rebinds dot to `source`, so even when source
            // itself is a bare field path, the body beneath it can't be
            // statically decomposed (spec.md §4.1) — always opaque.
            extract_pipeline(source, base, deps);
            deps.opaque = true;
        }
        Node::VarAssign { pipeline, .. } => {
            extract_pipeline(pipeline, base, deps);
            deps.opaque = true;
        }
        Node::TemplateInvocation { arg, .. } => extract_pipeline(arg, base, deps),
    }
}

fn extract_pipeline(pipeline: &Pipeline, base: &FieldPath, deps: &mut Dependencies) {
    match pipeline {
        Pipeline::Field(path) => deps.paths.push(base.join_path(path)),
        Pipeline::Opaque(raw) => {
            deps.opaque = true;
            let captured = scan_outermost_path(raw).unwrap_or_else(FieldPath::dot);
            deps.paths.push(base.join_path(&captured));
        }
    }
}

/// Scan a raw opaque pipeline's source text for the first whitespace-
/// delimited token that parses as a bare dotted path (`.Ident(.Ident)*` or
/// `.`), e.g. pulling `.Name` out of `printf "%s!" .Name`. Returns `None`
/// if no such token is present, in which case the caller roots the
/// dependency at the current base path itself (spec.md §4.1).
fn scan_outermost_path(raw: &str) -> Option<FieldPath> {
    raw.split_whitespace().find_map(parse_dotted_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template_parser::parse_template;

    #[test]
    fn extracts_simple_action_paths() {
        let nodes = parse_template("<div>{{.A}}-{{.B}}</div>").unwrap();
        let deps = extract(&nodes, &FieldPath::dot());
        assert_eq!(
            deps.paths,
            vec![FieldPath::field("A"), FieldPath::field("B")]
        );
        assert!(!deps.opaque);
    }

    #[test]
    fn range_paths_get_index_segment() {
        let nodes = parse_template("{{range .Items}}{{.Done}}{{end}}").unwrap();
        let deps = extract(&nodes, &FieldPath::dot());
        assert_eq!(
            deps.paths,
            vec![
                FieldPath::field("Items"),
                FieldPath::field("Items").join_index().join_field("Done"),
            ]
        );
        assert!(!deps.opaque);
    }

    #[test]
    fn with_marks_opaque() {
        let nodes = parse_template("{{with .User}}{{.Name}}{{end}}").unwrap();
        let deps = extract(&nodes, &FieldPath::dot());
        assert!(deps.opaque);
    }

    #[test]
    fn opaque_range_source_marks_body_opaque() {
        let nodes = parse_template(r#"{{range printf "%s" .X}}{{.Name}}{{end}}"#).unwrap();
        let deps = extract(&nodes, &FieldPath::dot());
        assert!(deps.opaque);
    }

    #[test]
    fn opaque_pipeline_captures_outermost_path() {
        let nodes = parse_template(r#"{{printf "%s!" .Name}}"#).unwrap();
        let deps = extract(&nodes, &FieldPath::dot());
        assert!(deps.opaque);
        assert!(deps.paths.contains(&FieldPath::field("Name")));
    }

    #[test]
    fn opaque_pipeline_with_no_path_falls_back_to_base() {
        let nodes = parse_template(r#"{{now}}"#).unwrap();
        let deps = extract(&nodes, &FieldPath::field("Clock"));
        assert!(deps.opaque);
        assert!(deps.paths.contains(&FieldPath::field("Clock")));
    }

    #[test]
    fn nested_if_paths_share_base() {
        let nodes = parse_template("{{if .On}}{{.Label}}{{end}}").unwrap();
        let deps = extract(&nodes, &FieldPath::field("Toggle"));
        assert_eq!(
            deps.paths,
            vec![
                FieldPath::field("Toggle").join_field("On"),
                FieldPath::field("Toggle").join_field("Label"),
            ]
        );
    }
}
