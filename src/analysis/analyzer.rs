//! Template Analyzer (spec.md §4.2): resolves `{{template "name" .}}`
//! invocations into a dependency graph across an entire template set and
//! rejects invocation cycles before rendering ever starts.
//!
//! Grounded on the hotreload crate's use of `petgraph` for graph work
//! (`shipwright-liveview-hotreload`'s dependency tracking) — `tarjan_scc`
//! gives strongly-connected-component detection in one pass, so a cycle of
//! any length (including direct self-invocation) surfaces as a single SCC
//! of size > 1, or a self-loop edge.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::DiGraph;

use super::extractor::{self, Dependencies};
use crate::ast::{Node, Pipeline, TemplateDef};
use crate::error::Error;
use crate::path::FieldPath;

/// Per-template dependency info for a whole template set, keyed by
/// template name.
#[derive(Debug, Default)]
pub struct TemplateAnalysis {
    pub dependencies: HashMap<String, Dependencies>,
    /// Advisory [`Error::AnalysisOpaque`] entries, one per template whose
    /// own body contains a construct the Extractor couldn't see through
    /// (spec.md §4.1). Not fatal — `analyze_template_set` still succeeds;
    /// these are surfaced for callers that want a build-time warning.
    pub advisories: Vec<Error>,
}

/// Analyze a template set: build the invocation graph, reject cycles, then
/// extract field-path dependencies for each template body.
pub fn analyze_template_set(defs: &[TemplateDef]) -> Result<TemplateAnalysis, Error> {
    let mut graph = DiGraph::<String, ()>::new();
    let mut idx_of = HashMap::new();
    for def in defs {
        let idx = graph.add_node(def.name.clone());
        idx_of.insert(def.name.clone(), idx);
    }

    for def in defs {
        let mut invoked = Vec::new();
        collect_invocations(&def.body, &mut invoked);
        for (name, _arg) in invoked {
            if let (Some(&from), Some(&to)) = (idx_of.get(&def.name), idx_of.get(&name)) {
                graph.add_edge(from, to, ());
            }
            // An invocation of a name outside this set (e.g. a host-app
            // template not part of this analysis) is not an error here —
            // it is caught at render time as `TemplateExecution`.
        }
    }

    for idx in graph.node_indices() {
        if graph.find_edge(idx, idx).is_some() {
            return Err(Error::TemplateParse(format!(
                "template {:?} invokes itself",
                graph[idx]
            )));
        }
    }
    for scc in tarjan_scc(&graph) {
        if scc.len() > 1 {
            let names: Vec<_> = scc.iter().map(|i| graph[*i].clone()).collect();
            return Err(Error::TemplateParse(format!(
                "template invocation cycle detected: {}",
                names.join(" -> ")
            )));
        }
    }

    // Direct (non-transitive) dependencies of each template's own body.
    let direct: HashMap<String, Dependencies> = defs
        .iter()
        .map(|def| {
            (
                def.name.clone(),
                extractor::extract(&def.body, &FieldPath::dot()),
            )
        })
        .collect();

    let mut advisories = Vec::new();
    for def in defs {
        if direct.get(&def.name).is_some_and(|d| d.opaque) {
            advisories.push(Error::AnalysisOpaque {
                path: def.name.clone(),
            });
        }
    }

    // Which templates each template invokes, and with what argument
    // pipeline — needed to reroot the callee's dependencies at the
    // argument's path before merging them into the caller (spec.md §4.2:
    // "Dependencies(name) = ... transitively, dependencies of templates it
    // invokes").
    let mut invocations: HashMap<String, Vec<(String, Pipeline)>> = HashMap::new();
    for def in defs {
        let mut invoked = Vec::new();
        collect_invocations(&def.body, &mut invoked);
        invocations.insert(def.name.clone(), invoked);
    }

    // The graph is acyclic by this point (checked above), so a topological
    // order exists; processing it in reverse visits every invoked template
    // before its callers, so each caller's merge sees already-finalized
    // transitive dependencies.
    let order = toposort(&graph, None)
        .map_err(|_| Error::TemplateParse("template invocation cycle detected".into()))?;

    let mut dependencies: HashMap<String, Dependencies> = HashMap::new();
    for idx in order.into_iter().rev() {
        let name = graph[idx].clone();
        let mut deps = direct.get(&name).cloned().unwrap_or_default();
        if let Some(invoked) = invocations.get(&name) {
            for (callee, arg) in invoked {
                let Some(callee_deps) = dependencies.get(callee) else {
                    continue;
                };
                match arg {
                    Pipeline::Field(path) => {
                        for p in &callee_deps.paths {
                            deps.paths.push(path.join_path(p));
                        }
                        deps.opaque |= callee_deps.opaque;
                    }
                    Pipeline::Opaque(_) => deps.opaque = true,
                }
            }
        }
        dependencies.insert(name, deps);
    }
    Ok(TemplateAnalysis {
        dependencies,
        advisories,
    })
}

fn collect_invocations(nodes: &[Node], out: &mut Vec<(String, Pipeline)>) {
    for node in nodes {
        match node {
            Node::TemplateInvocation { name, arg } => out.push((name.clone(), arg.clone())),
            Node::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_invocations(then_branch, out);
                if let Some(else_branch) = else_branch {
                    collect_invocations(else_branch, out);
                }
            }
            Node::Range { body, .. } | Node::With { body, .. } => collect_invocations(body, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template_parser::parse_template;

    fn def(name: &str, source: &str) -> TemplateDef {
        TemplateDef {
            name: name.to_string(),
            body: parse_template(source).unwrap(),
        }
    }

    #[test]
    fn accepts_acyclic_invocations() {
        let defs = vec![
            def("root", r#"{{template "header" .}}"#),
            def("header", "<h1>{{.Title}}</h1>"),
        ];
        let analysis = analyze_template_set(&defs).unwrap();
        assert!(analysis.dependencies.contains_key("root"));
        assert!(analysis.dependencies.contains_key("header"));
    }

    #[test]
    fn rejects_direct_self_invocation() {
        let defs = vec![def("loop", r#"{{template "loop" .}}"#)];
        assert!(analyze_template_set(&defs).is_err());
    }

    #[test]
    fn rejects_indirect_cycle() {
        let defs = vec![
            def("a", r#"{{template "b" .}}"#),
            def("b", r#"{{template "a" .}}"#),
        ];
        assert!(analyze_template_set(&defs).is_err());
    }

    #[test]
    fn tolerates_invocation_of_unknown_template() {
        let defs = vec![def("root", r#"{{template "external" .}}"#)];
        assert!(analyze_template_set(&defs).is_ok());
    }

    #[test]
    fn dependencies_include_invoked_template_rerooted() {
        let defs = vec![
            def("root", r#"{{template "header" .Page}}"#),
            def("header", "<h1>{{.Title}}</h1>"),
        ];
        let analysis = analyze_template_set(&defs).unwrap();
        let root_deps = &analysis.dependencies["root"];
        assert!(root_deps
            .paths
            .contains(&FieldPath::field("Page").join_field("Title")));
    }

    #[test]
    fn opaque_invocation_argument_marks_caller_opaque() {
        let defs = vec![
            def("root", r#"{{template "header" printf "%s" .X}}"#),
            def("header", "<h1>{{.Title}}</h1>"),
        ];
        let analysis = analyze_template_set(&defs).unwrap();
        assert!(analysis.dependencies["root"].opaque);
    }

    #[test]
    fn opaque_body_records_an_advisory() {
        let defs = vec![def("root", "{{with .User}}{{.Name}}{{end}}")];
        let analysis = analyze_template_set(&defs).unwrap();
        assert_eq!(analysis.advisories.len(), 1);
        assert!(matches!(
            analysis.advisories[0],
            Error::AnalysisOpaque { ref path } if path == "root"
        ));
    }

    #[test]
    fn fully_static_body_records_no_advisory() {
        let defs = vec![def("root", "<h1>{{.Title}}</h1>")];
        let analysis = analyze_template_set(&defs).unwrap();
        assert!(analysis.advisories.is_empty());
    }
}
