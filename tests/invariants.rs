//! The seven numbered invariants from spec.md §8, each as a standalone
//! integration test against the public API.

mod common;

use std::sync::Arc;

use livetemplate::{Application, FuncMap, TemplateSet, TemplateSetBuilder, TokenServiceConfig};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn page_for(source: &str) -> Arc<livetemplate::Page> {
    common::init_tracing();
    let application = Application::new("app-1", TokenServiceConfig::default());
    let set = Arc::new(TemplateSet::parse("root", source).unwrap());
    application.create_page(set, FuncMap::new()).unwrap().0
}

/// 1. Round-trip: render(T,D) == flatten(tree(T,D)).
#[test]
fn invariant_round_trip() {
    let page = page_for("<ul>{{range .Items}}<li>{{.Name}}: {{.Done}}</li>{{end}}</ul>");
    let html = page
        .render(json!({"Items": [{"Name": "a", "Done": true}, {"Name": "b", "Done": false}]}))
        .unwrap();
    assert_eq!(html, "<ul><li>a: true</li><li>b: false</li></ul>");
}

/// 2. Idempotence of empty diff: semantically-equal data yields no envelopes.
#[test]
fn invariant_idempotent_empty_diff() {
    let page = page_for("<p>{{.A}}-{{.B}}</p>");
    let data = json!({"A": "x", "B": "y"});
    page.render(data.clone()).unwrap();
    let cancel = CancellationToken::new();
    let envelopes = page.render_fragments(data, &cancel).unwrap();
    assert!(envelopes.is_empty());
}

/// 3. Static stability: a Tree-Based-capable fragment whose dependency
/// values are unchanged emits no envelope, even when unrelated data changes
/// (here: nothing changes, since both fields are its whole dependency set).
#[test]
fn invariant_static_stability() {
    let page = page_for("<span>{{.Label}}</span>");
    page.render(json!({"Label": "fixed", "Unrelated": 1})).unwrap();
    let cancel = CancellationToken::new();
    let envelopes = page
        .render_fragments(json!({"Label": "fixed", "Unrelated": 2}), &cancel)
        .unwrap();
    assert!(envelopes.is_empty());
}

/// 4. Disjoint coverage: extracted fragments partition the root template's
/// dynamic spans — every dynamic action belongs to exactly one fragment,
/// and fragments don't overlap.
#[test]
fn invariant_disjoint_coverage() {
    // `with` is opaque and always gets its own whole fragment, so this
    // template splits into three: the leading `.A` span, the `with` block,
    // and the trailing `.C` span.
    let set = TemplateSet::parse(
        "root",
        "<p>{{.A}}</p>{{with .User}}{{.Name}}{{end}}<p>{{.C}}</p>",
    )
    .unwrap();
    assert_eq!(set.fragments().len(), 3);

    let mut claimed_paths = Vec::new();
    for fragment in set.fragments() {
        for path in &fragment.dependencies.paths {
            // No dependency path is claimed by more than one fragment —
            // the extracted spans are pairwise disjoint in what they read.
            assert!(
                !claimed_paths.contains(path),
                "path {path} claimed by more than one fragment"
            );
            claimed_paths.push(path.clone());
        }
    }
}

/// 5. Skeleton conservation: when `s` is unchanged across updates, the
/// TreeUpdate omits it entirely (bare `{"0": ...}`, no `"s"` key).
#[test]
fn invariant_skeleton_conservation() {
    let page = page_for("<p>Hello {{.Name}}!</p>");
    page.render(json!({"Name": "World"})).unwrap();
    let cancel = CancellationToken::new();
    let envelopes = page
        .render_fragments(json!({"Name": "Universe"}), &cancel)
        .unwrap();
    let data = envelopes[0].data.as_ref().unwrap();
    assert!(data.get("s").is_none());
}

/// 6. Fragment ID determinism: identical template span text produces
/// identical fragment IDs, independent of the `TemplateSet` instance.
#[test]
fn invariant_fragment_id_determinism() {
    let a = TemplateSet::parse("root", "<p>Hello {{.Name}}!</p>").unwrap();
    let b = TemplateSet::parse("root", "<p>Hello {{.Name}}!</p>").unwrap();
    assert_eq!(a.fragments()[0].id, b.fragments()[0].id);
}

/// 7. Token replay: a token whose nonce was accepted within the window is
/// rejected on a second presentation.
#[test]
fn invariant_token_replay_rejected() {
    let application = Application::new("app-1", TokenServiceConfig::default());
    let token = application
        .token_service()
        .generate_token("app-1", "page-1")
        .unwrap();
    application.token_service().verify_token(&token).unwrap();
    let err = application.token_service().verify_token(&token).unwrap_err();
    assert!(err.is_token_error());
}

#[test]
fn associated_templates_compose_through_builder() {
    let set = TemplateSetBuilder::new("root", r#"<header>{{template "greeting" .}}</header>"#)
        .with_template("greeting", "Hi {{.Name}}")
        .build()
        .unwrap();
    let application = Application::new("app-1", TokenServiceConfig::default());
    let (page, _) = application.create_page(Arc::new(set), FuncMap::new()).unwrap();
    let html = page.render(json!({"Name": "Ada"})).unwrap();
    assert_eq!(html, "<header>Hi Ada</header>");
}
