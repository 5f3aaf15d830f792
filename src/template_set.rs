//! `TemplateSet`: the concrete Rust realization of spec.md §3's "Template
//! Handle" — a root template plus zero or more named associated templates,
//! immutable after construction, with fragment extraction and analysis
//! already run.
//!
//! Grounded on the teacher's builder-config convention
//! (`shipwright-liveview-hotreload::HotReloadConfig`'s `with_*` chain) for
//! `TemplateSetBuilder`.

use std::collections::HashMap;

use crate::analysis::analyzer::{self, TemplateAnalysis};
use crate::ast::TemplateDef;
use crate::error::{Error, Result};
use crate::fragment::{self, Fragment, FragmentId, IdAllocator};
use crate::strategy::{self, FragmentCapability};
use crate::template_parser::parse_template;
use crate::tree::TemplateRegistry;

/// A parsed, analyzed, fragment-extracted template set. Immutable after
/// [`TemplateSetBuilder::build`] — spec.md §3's Template Handle.
pub struct TemplateSet {
    root_name: String,
    registry: TemplateRegistry,
    fragments: Vec<Fragment>,
    fragment_capability: HashMap<String, FragmentCapability>,
    /// IDs of the root template's own top-level fragments, in enumeration
    /// order — the set a [`crate::session::Page`] tracks and diffs
    /// independently (see [`fragment::ExtractionResult::top_level_ids`]).
    root_top_level_ids: Vec<FragmentId>,
    analysis: TemplateAnalysis,
    root_conditional: HashMap<String, bool>,
    /// Advisory errors collected while building this set: fragment ID
    /// collisions and opaque-construct analysis gaps. Never fatal to
    /// `build()` — callers that care can inspect them, the rest can ignore.
    collision_warnings: Vec<Error>,
}

impl TemplateSet {
    /// Parse and analyze a single-template set with no associated templates.
    pub fn parse(root_name: impl Into<String>, root_source: impl Into<String>) -> Result<Self> {
        TemplateSetBuilder::new(root_name, root_source).build()
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Extracted fragments, in stable depth-first discovery order (spec.md
    /// §5: "envelopes from a given call are produced in fragment-enumeration
    /// order, stable across calls").
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// IDs of the root template's top-level fragments, in stable
    /// enumeration order (spec.md §5).
    pub fn root_top_level_ids(&self) -> &[FragmentId] {
        &self.root_top_level_ids
    }

    pub fn analysis(&self) -> &TemplateAnalysis {
        &self.analysis
    }

    pub(crate) fn capability_of(&self, fragment_id: &str) -> FragmentCapability {
        self.fragment_capability
            .get(fragment_id)
            .copied()
            .unwrap_or(FragmentCapability::Fallback)
    }

    /// Whether `fragment_id` is a root-level if-without-else (spec.md
    /// §4.6) — the one case where the Strategy Selector must be able to
    /// decide [`crate::strategy::Decision::Remove`] instead of only
    /// tree-updating or replacing.
    pub(crate) fn is_root_conditional(&self, fragment_id: &str) -> bool {
        self.root_conditional
            .get(fragment_id)
            .copied()
            .unwrap_or(false)
    }

    /// Advisory [`Error::FragmentIdCollision`] warnings accumulated while
    /// extracting this set's fragments. For the Extractor's own opaque-body
    /// advisories ([`Error::AnalysisOpaque`]), see
    /// [`analysis()`](Self::analysis)`.advisories` instead — `Error` has no
    /// `Clone` impl, so the two advisory sources can't be merged into one
    /// `Vec` without moving out of the stored `TemplateAnalysis`.
    pub fn collision_warnings(&self) -> &[Error] {
        &self.collision_warnings
    }
}

/// Builds a [`TemplateSet`] from one or more named template sources.
pub struct TemplateSetBuilder {
    templates: Vec<(String, String)>,
}

impl TemplateSetBuilder {
    pub fn new(root_name: impl Into<String>, root_source: impl Into<String>) -> Self {
        TemplateSetBuilder {
            templates: vec![(root_name.into(), root_source.into())],
        }
    }

    /// Register an additional named template, invocable via
    /// `{{template "name" .}}` from the root or from any other template in
    /// the set.
    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.push((name.into(), source.into()));
        self
    }

    #[tracing::instrument(skip(self))]
    pub fn build(self) -> Result<TemplateSet> {
        let root_name = self.templates[0].0.clone();

        let mut defs = Vec::with_capacity(self.templates.len());
        for (name, source) in &self.templates {
            let body = parse_template(source)?;
            defs.push(TemplateDef {
                name: name.clone(),
                body,
            });
        }

        // Cycle detection and per-template field dependencies, computed
        // over the original (pre-extraction) bodies. Fragment extraction
        // only introduces new synthetic leaf templates invoked from within
        // the same body they were carved out of, so it can never complete
        // an invocation cycle the original graph didn't already have.
        let analysis = analyzer::analyze_template_set(&defs)?;

        let mut ids = IdAllocator::new();
        let mut registry = TemplateRegistry::new();
        let mut fragments = Vec::new();
        let mut fragment_capability = HashMap::new();
        let mut root_conditional = HashMap::new();
        let mut root_top_level_ids = Vec::new();

        for def in &defs {
            let result = fragment::extract_fragments_with(&def.name, &def.body, &mut ids);
            if def.name == root_name {
                root_top_level_ids = result.top_level_ids;
            }
            registry.insert(def.name.clone(), result.rewritten_body);
            for frag in result.fragments {
                let capability = strategy::classify(&frag.dependencies);
                fragment_capability.insert(frag.id.as_str().to_string(), capability);
                root_conditional.insert(frag.id.as_str().to_string(), frag.root_conditional);
                registry.insert(format!("__frag_{}", frag.id.as_str()), frag.body.clone());
                fragments.push(frag);
            }
        }

        // Opaque-analysis advisories stay on `analysis.advisories` itself
        // (inspected via `TemplateSet::analysis()`) since `Error` has no
        // `Clone` impl to merge them into this `Vec` without moving out of
        // `analysis` before it's stored below.
        let collision_warnings = ids.take_collisions();

        tracing::debug!(
            template_count = defs.len(),
            fragment_count = fragments.len(),
            collision_warning_count = collision_warnings.len(),
            "template set built"
        );

        Ok(TemplateSet {
            root_name,
            registry,
            fragments,
            fragment_capability,
            root_top_level_ids,
            analysis,
            root_conditional,
            collision_warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_single_template_set() {
        let set = TemplateSet::parse("root", "<p>Hello {{.Name}}!</p>").unwrap();
        assert_eq!(set.root_name(), "root");
        assert_eq!(set.fragments().len(), 1);
    }

    #[test]
    fn rejects_cyclic_template_sets_eagerly() {
        let result = TemplateSetBuilder::new("a", r#"{{template "a" .}}"#).build();
        assert!(result.is_err());
    }

    #[test]
    fn associated_templates_are_invocable() {
        let set = TemplateSetBuilder::new("root", r#"{{template "header" .}}"#)
            .with_template("header", "<h1>{{.Title}}</h1>")
            .build()
            .unwrap();
        assert!(set.registry().get("header").is_some());
    }

    #[test]
    fn fallback_fragment_is_classified_correctly() {
        let set = TemplateSet::parse("root", "{{with .User}}{{.Name}}{{end}}").unwrap();
        let frag = &set.fragments()[0];
        assert_eq!(
            set.capability_of(frag.id.as_str()),
            FragmentCapability::Fallback
        );
    }

    #[test]
    fn root_level_if_without_else_is_flagged_root_conditional() {
        let set = TemplateSet::parse("root", "{{if .On}}ON{{end}}").unwrap();
        let frag = &set.fragments()[0];
        assert!(set.is_root_conditional(frag.id.as_str()));
    }

    #[test]
    fn if_else_is_not_flagged_root_conditional() {
        let set = TemplateSet::parse("root", "{{if .On}}ON{{else}}OFF{{end}}").unwrap();
        let frag = &set.fragments()[0];
        assert!(!set.is_root_conditional(frag.id.as_str()));
    }

    #[test]
    fn collision_warnings_empty_when_no_collisions() {
        let set = TemplateSet::parse("root", "<p>{{.A}}</p>").unwrap();
        assert!(set.collision_warnings().is_empty());
    }

    #[test]
    fn collision_warnings_populated_on_duplicate_spans() {
        let set = TemplateSetBuilder::new("root", r#"{{template "a" .}}{{template "b" .}}"#)
            .with_template("a", "{{.X}}")
            .with_template("b", "{{.X}}")
            .build()
            .unwrap();
        assert_eq!(set.collision_warnings().len(), 1);
        assert!(matches!(
            set.collision_warnings()[0],
            crate::error::Error::FragmentIdCollision { .. }
        ));
    }
}
